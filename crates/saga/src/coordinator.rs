//! Order coordinator: the create-order half of the saga.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{AddressId, AuthContext, OrderId, ProductId, RequestId, ReservationId};
use domain::{DomainEvent, Order, OrderItem};
use event_log::EventLog;
use inventory::ledger::validate_items;
use inventory::{InventoryError, InventoryItem, InventoryLedger, ReserveStatus};

use crate::error::{Result, SagaError};
use crate::reservations::{AttemptStatus, ReservationAttempt};
use crate::services::{ProductCatalog, ProductSnapshot};
use crate::store::{OrderRepository, ReservationStore};

/// Creates orders by reserving stock, persisting the order and announcing
/// it on the event log.
///
/// There is no transaction spanning the ledger and the order store. Every
/// item reserved is pushed onto an undo list (and recorded durably on the
/// [`ReservationAttempt`]); any later failure releases that list.
///
/// A reserve whose outcome is unknown (timeout or transport failure) may
/// still commit on the ledger after we give up. Such an item gets its own
/// pending attempt, which the reconciler releases once it goes stale.
pub struct OrderCoordinator {
    ledger: Arc<dyn InventoryLedger>,
    catalog: Arc<dyn ProductCatalog>,
    orders: Arc<dyn OrderRepository>,
    reservations: Arc<dyn ReservationStore>,
    log: Arc<dyn EventLog>,
    inventory_timeout: Duration,
}

impl OrderCoordinator {
    /// Creates a new coordinator.
    pub fn new(
        ledger: Arc<dyn InventoryLedger>,
        catalog: Arc<dyn ProductCatalog>,
        orders: Arc<dyn OrderRepository>,
        reservations: Arc<dyn ReservationStore>,
        log: Arc<dyn EventLog>,
        inventory_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            catalog,
            orders,
            reservations,
            log,
            inventory_timeout,
        }
    }

    /// Places an order for the caller.
    ///
    /// Prices come from the catalog, never from the request. On success the
    /// order is `pending` and its stock is reserved.
    #[tracing::instrument(
        skip(self, auth, items),
        fields(user_id = %auth.user_id, request_id = %request_id)
    )]
    pub async fn create_order(
        &self,
        auth: &AuthContext,
        address_id: AddressId,
        items: Vec<InventoryItem>,
        request_id: &RequestId,
    ) -> Result<Order> {
        let started = std::time::Instant::now();
        let items = merge_items(items)?;

        // 1. Catalog snapshots; nothing is reserved for unknown products
        let snapshots = self.snapshots(&items).await?;
        let order_items = items
            .iter()
            .map(|item| {
                let snapshot = &snapshots[&item.product_id];
                OrderItem::new(
                    item.product_id.clone(),
                    snapshot.name.clone(),
                    item.quantity,
                    snapshot.price,
                )
            })
            .collect::<domain::Result<Vec<_>>>()?;
        let order = Order::new(auth.user_id, address_id, order_items)?;

        // 2. Reserve item by item
        let attempt = ReservationAttempt::new(auth.user_id);
        self.reservations.create(&attempt).await?;

        let mut undo: Vec<InventoryItem> = Vec::with_capacity(items.len());
        for item in &items {
            match self.reserve_one(item, request_id).await {
                Ok(()) => undo.push(item.clone()),
                Err(ReserveFailure::Rejected(e)) => {
                    self.compensate(attempt.id, &undo, request_id).await;
                    metrics::counter!("orders_create_failed_total", "reason" => "reserve")
                        .increment(1);
                    return Err(e);
                }
                Err(ReserveFailure::InDoubt(e)) => {
                    self.leave_in_doubt(auth, item).await;
                    self.compensate(attempt.id, &undo, request_id).await;
                    metrics::counter!("orders_create_failed_total", "reason" => "reserve")
                        .increment(1);
                    return Err(e);
                }
            }

            if let Err(e) = self.reservations.record_reserved(attempt.id, item).await {
                self.compensate(attempt.id, &undo, request_id).await;
                metrics::counter!("orders_create_failed_total", "reason" => "reserve")
                    .increment(1);
                return Err(e);
            }
        }

        // 3. Persist the order
        if let Err(e) = self.orders.insert(&order).await {
            tracing::error!(error = %e, order_id = %order.id, "Failed to persist order");
            self.compensate(attempt.id, &undo, request_id).await;
            metrics::counter!("orders_create_failed_total", "reason" => "persist").increment(1);
            return Err(SagaError::CreateFailed(e.to_string()));
        }

        // 4. The reservation now belongs to the order
        match self
            .reservations
            .transition(
                attempt.id,
                AttemptStatus::Pending,
                AttemptStatus::Completed,
                Some(order.id),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::error!(
                reservation_id = %attempt.id,
                order_id = %order.id,
                "Reservation attempt was no longer pending when the order was created"
            ),
            Err(e) => tracing::error!(
                error = %e,
                reservation_id = %attempt.id,
                order_id = %order.id,
                "Failed to complete reservation attempt"
            ),
        }

        // 5. Announce; the order is committed whether or not this succeeds
        self.announce(&order, request_id).await;

        metrics::counter!("orders_created_total").increment(1);
        metrics::histogram!("order_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            order_id = %order.id,
            total = %order.total_amount,
            items = order.items.len(),
            units = order.total_quantity(),
            "Order created"
        );

        Ok(order)
    }

    /// Returns an order if the caller owns it or is an admin.
    pub async fn get_order(&self, id: OrderId, auth: &AuthContext) -> Result<Order> {
        self.orders
            .get(id)
            .await?
            .filter(|order| auth.can_access(order.user_id))
            .ok_or_else(|| SagaError::NotFound(format!("order {id}")))
    }

    /// Returns the caller's orders, newest first.
    pub async fn list_orders(&self, auth: &AuthContext) -> Result<Vec<Order>> {
        self.orders.list_for_user(auth.user_id).await
    }

    async fn snapshots(
        &self,
        items: &[InventoryItem],
    ) -> Result<HashMap<ProductId, ProductSnapshot>> {
        let ids: Vec<ProductId> = items.iter().map(|i| i.product_id.clone()).collect();
        let snapshots: HashMap<ProductId, ProductSnapshot> = self
            .catalog
            .active_products(&ids)
            .await?
            .into_iter()
            .map(|s| (s.product_id.clone(), s))
            .collect();

        let missing: Vec<ProductId> = ids
            .into_iter()
            .filter(|id| !snapshots.contains_key(id))
            .collect();
        if !missing.is_empty() {
            return Err(SagaError::InvalidProducts(missing));
        }
        Ok(snapshots)
    }

    async fn reserve_one(
        &self,
        item: &InventoryItem,
        request_id: &RequestId,
    ) -> std::result::Result<(), ReserveFailure> {
        let reserved = tokio::time::timeout(
            self.inventory_timeout,
            self.ledger.reserve(std::slice::from_ref(item), request_id),
        )
        .await
        .map_err(|_| {
            tracing::warn!(product_id = %item.product_id, "Inventory reserve timed out");
            ReserveFailure::InDoubt(SagaError::Dependency(
                "inventory reserve timed out".to_string(),
            ))
        })?
        .map_err(|e| {
            if e.is_dependency_failure() {
                ReserveFailure::InDoubt(dependency_error(e))
            } else {
                ReserveFailure::Rejected(dependency_error(e))
            }
        })?;

        match reserved.first().map(|r| r.status) {
            Some(ReserveStatus::Reserved) => Ok(()),
            Some(ReserveStatus::InsufficientStock) => Err(ReserveFailure::Rejected(
                SagaError::InsufficientStock(vec![item.product_id.clone()]),
            )),
            None => Err(ReserveFailure::Rejected(SagaError::Dependency(
                "inventory returned no result".to_string(),
            ))),
        }
    }

    /// Records `item` on a fresh pending attempt so the reconciler releases
    /// it if the reserve did commit.
    async fn leave_in_doubt(&self, auth: &AuthContext, item: &InventoryItem) {
        let mut attempt = ReservationAttempt::new(auth.user_id);
        attempt.reserved.push(item.clone());
        metrics::counter!("reservations_in_doubt_total").increment(1);

        match self.reservations.create(&attempt).await {
            Ok(()) => tracing::warn!(
                reservation_id = %attempt.id,
                product_id = %item.product_id,
                quantity = item.quantity,
                "Reserve outcome unknown, leaving item to the reconciler"
            ),
            Err(e) => tracing::error!(
                error = %e,
                product_id = %item.product_id,
                quantity = item.quantity,
                "Failed to record in-doubt reservation"
            ),
        }
    }

    /// Releases everything in `undo`. The attempt is only marked compensated
    /// once the release went through; otherwise it stays pending for the
    /// reconciler.
    async fn compensate(
        &self,
        attempt_id: ReservationId,
        undo: &[InventoryItem],
        request_id: &RequestId,
    ) {
        metrics::counter!("saga_compensations_total").increment(1);

        if !undo.is_empty() {
            let released =
                tokio::time::timeout(self.inventory_timeout, self.ledger.release(undo, request_id))
                    .await;
            match released {
                Ok(Ok(_)) => {
                    tracing::info!(
                        reservation_id = %attempt_id,
                        items = undo.len(),
                        "Released reserved items"
                    );
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        error = %e,
                        reservation_id = %attempt_id,
                        "Compensation failed, leaving reservation to the reconciler"
                    );
                    return;
                }
                Err(_) => {
                    tracing::error!(
                        reservation_id = %attempt_id,
                        "Compensation timed out, leaving reservation to the reconciler"
                    );
                    return;
                }
            }
        }

        if let Err(e) = self
            .reservations
            .transition(
                attempt_id,
                AttemptStatus::Pending,
                AttemptStatus::Compensated,
                None,
            )
            .await
        {
            tracing::error!(
                error = %e,
                reservation_id = %attempt_id,
                "Failed to mark attempt compensated"
            );
        }
    }

    async fn announce(&self, order: &Order, request_id: &RequestId) {
        let event = DomainEvent::OrderCreated {
            order_id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount,
            request_id: request_id.clone(),
        };
        if let Err(e) = self.log.append(event.topic(), event.to_fields()).await {
            tracing::error!(error = %e, order_id = %order.id, "Failed to append ORDER_CREATED");
            metrics::counter!("event_append_failures_total", "type" => event.event_type())
                .increment(1);
        }
    }
}

/// Why a single-item reserve did not go through.
enum ReserveFailure {
    /// The ledger answered; nothing was reserved.
    Rejected(SagaError),
    /// The ledger may or may not have committed the reserve.
    InDoubt(SagaError),
}

/// Validates the requested items and merges duplicate products, keeping
/// first-seen order.
fn merge_items(items: Vec<InventoryItem>) -> Result<Vec<InventoryItem>> {
    validate_items(&items).map_err(validation_error)?;

    let mut merged: Vec<InventoryItem> = Vec::with_capacity(items.len());
    for item in items {
        match merged.iter_mut().find(|m| m.product_id == item.product_id) {
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .checked_add(item.quantity)
                    .ok_or_else(|| {
                        SagaError::Validation(format!(
                            "quantity for {} is too large",
                            item.product_id
                        ))
                    })?;
            }
            None => merged.push(item),
        }
    }

    validate_items(&merged).map_err(validation_error)?;
    Ok(merged)
}

fn validation_error(e: InventoryError) -> SagaError {
    match e {
        InventoryError::Validation(message) => SagaError::Validation(message),
        other => SagaError::Inventory(other),
    }
}

fn dependency_error(e: InventoryError) -> SagaError {
    if e.is_dependency_failure() {
        SagaError::Dependency(e.to_string())
    } else {
        SagaError::Inventory(e)
    }
}
