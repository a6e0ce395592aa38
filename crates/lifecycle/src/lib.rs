//! Order lifecycle service.
//!
//! This crate wires the pure domain to a transactional repository and the
//! external collaborators:
//! 1. `OrderService` runs every order operation in one transaction under a
//!    per-order lock, with retries on conflicts and a deadline
//! 2. `InventoryCoordinator` reserves, releases, deducts and restocks
//!    inventory rows and writes the stock ledger
//! 3. notifications are queued after commit and delivered in the background
//!
//! Collaborators (customers, products, tax, shipping, payments, discounts,
//! notifications) are traits with in-memory implementations.

pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod guard;
pub mod inventory;
pub mod notifications;
pub mod retry;
pub mod service;
pub mod telemetry;

pub use collaborators::{Collaborators, InMemoryCollaborators};
pub use config::{LogFormat, ServiceConfig};
pub use context::RequestContext;
pub use error::{ErrorKind, Result, ServiceError};
pub use guard::{Admission, OrderLocks};
pub use inventory::{Availability, InventoryCoordinator, ReturnedStock, StockRequest};
pub use notifications::NotificationQueue;
pub use retry::RetryPolicy;
pub use service::{
    BulkItemResult, BulkOps, BulkResult, FulfillmentOps, ItemOps, LifecycleOps, OrderService,
    PaymentOps, PaymentOutcome,
};
