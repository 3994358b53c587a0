use chrono::{DateTime, Utc};
use common::{AddressId, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::{DomainError, Money, Result};

use super::{OrderStatus, PaymentStatus};

/// A line of an order with the catalog snapshot taken at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl OrderItem {
    /// Creates an item, computing its line total.
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Result<Self> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity {
                product_id: product_id.to_string(),
                quantity,
            });
        }

        Ok(Self {
            line_total: unit_price.times(quantity),
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
        })
    }
}

/// A customer order.
///
/// `total_amount` always equals the sum of the items' line totals; it is
/// computed here and never taken from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub address_id: AddressId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Money,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending, unpaid order.
    pub fn new(user_id: UserId, address_id: AddressId, items: Vec<OrderItem>) -> Result<Self> {
        if items.is_empty() {
            return Err(DomainError::NoItems);
        }

        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(),
            user_id,
            address_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_amount: items.iter().map(|i| i.line_total).sum(),
            items,
            created_at: now,
            updated_at: now,
        })
    }

    /// Moves the order to `next` if the state machine allows it.
    pub fn transition(&mut self, next: OrderStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Applies a captured payment: `pending → confirmed`, paid.
    pub fn confirm_payment(&mut self) -> Result<()> {
        self.transition(OrderStatus::Confirmed)?;
        self.payment_status = PaymentStatus::Paid;
        Ok(())
    }

    /// Applies a failed payment: `pending → failed`.
    pub fn fail_payment(&mut self) -> Result<()> {
        self.transition(OrderStatus::Failed)?;
        self.payment_status = PaymentStatus::Failed;
        Ok(())
    }

    /// Returns true if `user_id` placed this order.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// Total number of units across all items.
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }
}
