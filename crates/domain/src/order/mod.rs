//! Order aggregate and related types.

mod aggregate;
mod commands;
mod state;
mod value_objects;

pub use aggregate::{NewOrder, Order};
pub use commands::*;
pub use state::OrderStatus;
pub use value_objects::{
    AddressKind, OrderAddress, OrderItem, OrderNumber, OrderType, PaymentMethod, PaymentStatus,
    Priority, Shipment, ShipmentLine, ShippingMethod, StatusChange,
};

use common::{Currency, Money, OrderItemId};
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The transition is not an edge of the status graph, or its preconditions fail.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    /// The order is already cancelled.
    #[error("Order is already cancelled")]
    AlreadyCancelled,

    /// The action is not allowed in the current status.
    #[error("Cannot {action} while order is {status}")]
    NotEditable {
        status: OrderStatus,
        action: &'static str,
    },

    /// Shipping everything requires the order to be paid in full.
    #[error("Order must be paid in full: paid {paid}, total {total}")]
    PaymentRequired { paid: Money, total: Money },

    /// Some units have not shipped yet.
    #[error("Order has unshipped items")]
    NotFullyShipped,

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Item not found in order.
    #[error("Item not found: {0}")]
    ItemNotFound(OrderItemId),

    /// A ship or return quantity exceeds what remains on the line.
    #[error("Quantity {requested} exceeds remaining {remaining} for item {item_id}")]
    QuantityExceeded {
        item_id: OrderItemId,
        requested: u32,
        remaining: u32,
    },

    /// A payment or refund amount is not positive.
    #[error("Invalid amount: {0}")]
    InvalidAmount(Money),

    /// An amount has more fractional digits than the order currency allows.
    #[error("Amount {amount} is not representable in {currency}")]
    ExcessPrecision { amount: Money, currency: Currency },

    /// A payment would take the paid amount above the order total.
    #[error("Payment of {amount} exceeds outstanding balance {outstanding}")]
    Overpayment { amount: Money, outstanding: Money },

    /// A refund exceeds what has been paid.
    #[error("Refund of {amount} exceeds refundable {refundable}")]
    RefundExceedsPaid { amount: Money, refundable: Money },

    /// Address snapshots cannot change once the order is confirmed.
    #[error("Addresses are locked")]
    AddressesLocked,

    /// Order number is malformed or out of range.
    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(String),
}
