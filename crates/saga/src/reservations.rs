//! Durable reservation attempts and their reconciler.
//!
//! The coordinator records every item it reserves before it moves on. If
//! the process dies mid-saga the attempt stays `pending`, and the
//! reconciler later releases exactly what was recorded.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{OrderId, RequestId, ReservationId, UserId};
use inventory::{InventoryItem, InventoryLedger};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Result, SagaError};
use crate::store::ReservationStore;

/// Lifecycle of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    /// Reservation in progress, or abandoned by a crashed process.
    #[default]
    Pending,
    /// The order was persisted; the reservation now belongs to it.
    Completed,
    /// The coordinator released the reservation itself.
    Compensated,
    /// The reconciler released a stale reservation.
    Reconciled,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Compensated => "compensated",
            AttemptStatus::Reconciled => "reconciled",
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = SagaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "completed" => Ok(AttemptStatus::Completed),
            "compensated" => Ok(AttemptStatus::Compensated),
            "reconciled" => Ok(AttemptStatus::Reconciled),
            other => Err(SagaError::Validation(format!(
                "unknown attempt status: {other}"
            ))),
        }
    }
}

/// Items reserved on behalf of one `create_order` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationAttempt {
    pub id: ReservationId,
    pub user_id: UserId,
    pub status: AttemptStatus,
    pub reserved: Vec<InventoryItem>,
    pub order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReservationAttempt {
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: ReservationId::new(),
            user_id,
            status: AttemptStatus::Pending,
            reserved: Vec::new(),
            order_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub examined: usize,
    pub reconciled: usize,
    pub failed: usize,
}

/// Releases reservations held by attempts that never finished.
pub struct ReservationReconciler {
    reservations: Arc<dyn ReservationStore>,
    ledger: Arc<dyn InventoryLedger>,
    stale_after: Duration,
    inventory_timeout: Duration,
    batch: usize,
}

impl ReservationReconciler {
    pub fn new(
        reservations: Arc<dyn ReservationStore>,
        ledger: Arc<dyn InventoryLedger>,
        stale_after: Duration,
        inventory_timeout: Duration,
    ) -> Self {
        Self {
            reservations,
            ledger,
            stale_after,
            inventory_timeout,
            batch: 100,
        }
    }

    /// Releases every attempt still pending after `stale_after`.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_once(&self) -> Result<ReconcileStats> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| SagaError::Validation(e.to_string()))?;
        let cutoff = Utc::now() - stale_after;
        let stale = self.reservations.stale(cutoff, self.batch).await?;

        let mut stats = ReconcileStats {
            examined: stale.len(),
            ..ReconcileStats::default()
        };

        for attempt in stale {
            // Claim the attempt first so a second reconciler cannot release
            // the same reservation twice.
            let claimed = self
                .reservations
                .transition(
                    attempt.id,
                    AttemptStatus::Pending,
                    AttemptStatus::Reconciled,
                    None,
                )
                .await?;
            if !claimed {
                continue;
            }

            if attempt.reserved.is_empty() {
                stats.reconciled += 1;
                continue;
            }

            let request_id = RequestId::generate();
            let released = tokio::time::timeout(
                self.inventory_timeout,
                self.ledger.release(&attempt.reserved, &request_id),
            )
            .await;

            match released {
                Ok(Ok(_)) => {
                    stats.reconciled += 1;
                    metrics::counter!("reservations_reconciled_total").increment(1);
                    tracing::info!(
                        reservation_id = %attempt.id,
                        items = attempt.reserved.len(),
                        "Released stale reservation"
                    );
                }
                failure => {
                    stats.failed += 1;
                    let reason = match failure {
                        Ok(Err(e)) => e.to_string(),
                        _ => "inventory release timed out".to_string(),
                    };
                    tracing::error!(
                        reservation_id = %attempt.id,
                        error = %reason,
                        "Failed to release stale reservation, will retry"
                    );
                    self.reservations
                        .transition(
                            attempt.id,
                            AttemptStatus::Reconciled,
                            AttemptStatus::Pending,
                            None,
                        )
                        .await?;
                }
            }
        }

        Ok(stats)
    }

    /// Runs a pass every `interval` until `shutdown` flips to `true`.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.reconcile_once().await {
                        Ok(stats) if stats.examined > 0 => {
                            tracing::info!(?stats, "Reconciliation pass finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Reconciliation pass failed"),
                    }
                }
            }
        }
        tracing::info!("Reservation reconciler stopped");
    }
}
