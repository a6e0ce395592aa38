//! Shared types for the order management core.
//!
//! - Strongly typed UUID identifiers for every entity
//! - [`Version`] counters for optimistic concurrency checks
//! - [`Currency`] and [`Money`] fixed-point monetary values

pub mod money;
pub mod types;

pub use money::{Currency, CurrencyError, Money};
pub use types::{
    AddressId, CustomerId, LedgerEntryId, OrderId, OrderItemId, ProductId, ShipmentId, Version,
    WarehouseId,
};
