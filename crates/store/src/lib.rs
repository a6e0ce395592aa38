//! Transactional repository for orders, inventory and the stock ledger.
//!
//! The order core is written against the [`Repository`] and
//! [`Transaction`] traits. [`InMemoryRepository`] is a complete backend
//! with staged writes, atomic commit, per-row pessimistic locks and
//! optimistic version checks.

pub mod error;
pub mod memory;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryRepository, InMemoryTransaction};
pub use query::OrderFilter;
pub use store::{Repository, Transaction};
