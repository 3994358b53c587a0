//! Orders and their status machine.

mod model;
mod state;

pub use model::{Order, OrderItem};
pub use state::{OrderStatus, PaymentStatus};
