//! Domain layer for the order-management core.
//!
//! This crate is pure: no I/O, no clocks, no randomness beyond id
//! generation. It provides:
//! - `OrderStatus` and its transition graph
//! - the `Order` aggregate with invariant-preserving mutators
//! - command envelopes for every order operation
//! - the pricing and totals engine
//! - inventory rows, the stock ledger and its arithmetic

pub mod inventory;
pub mod order;
pub mod pricing;

pub use inventory::{
    Inventory, InventoryError, InventoryKey, InventoryTransaction, ItemCondition, LedgerKind,
    Shortfall, outstanding_reservations, reservation_balance,
};
pub use order::{
    AddressKind, CancelOrder, CreateOrder, FieldUpdate, NewOrder, NewOrderLine, Order,
    OrderAddress, OrderError, OrderItem, OrderNumber, OrderStatus, OrderType, PaymentMethod,
    PaymentStatus, Priority, ProcessPayment, RefundOrder, ReturnItems, ReturnLine, ShipItems,
    ShipLine, Shipment, ShipmentLine, ShippingMethod, StatusChange, StatusUpdate, UpdateItem,
    UpdateOrder,
};
pub use pricing::{
    Discount, OrderTotals, PricedLines, PricingError, PricingLine, PricingSnapshot, SnapshotLine,
    finalize, price_lines,
};
