use async_trait::async_trait;
use common::OrderId;
use domain::{Inventory, InventoryKey, InventoryTransaction, Order, OrderNumber};

use crate::{OrderFilter, Result};

/// Entry point to a transactional store.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Transaction handle type.
    type Tx: Transaction;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// An open unit of work.
///
/// Writes are invisible to other transactions until [`Transaction::commit`]
/// succeeds. Dropping an uncommitted transaction rolls it back. Row locks
/// taken through `lock_*` are held until the transaction ends and are
/// re-entrant within the same transaction.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Atomically applies every staged write, or none of them.
    ///
    /// Fails with `Conflict` if a row written here was changed by another
    /// transaction since it was read.
    async fn commit(self) -> Result<()>;

    /// Discards every staged write and releases locks.
    async fn rollback(self) -> Result<()>;

    /// Takes the row lock for an order (`SELECT … FOR UPDATE`).
    async fn lock_order(&mut self, id: OrderId) -> Result<()>;

    /// Takes the row lock for an inventory row.
    ///
    /// Callers locking several rows must do so in ascending key order.
    async fn lock_inventory(&mut self, key: InventoryKey) -> Result<()>;

    /// Allocates the next order number for `year`.
    ///
    /// Sequence values are not returned on rollback, so numbers may have
    /// gaps but are never reused.
    async fn next_order_number(&mut self, year: i32) -> Result<OrderNumber>;

    /// Stages a new order and sets its version to the first version.
    async fn insert_order(&mut self, order: &mut Order) -> Result<()>;

    /// Loads an order as seen by this transaction.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Loads an order by its business key.
    async fn get_order_by_number(&self, number: OrderNumber) -> Result<Option<Order>>;

    /// Stages an update. The order's version must match the stored one;
    /// on success it is bumped.
    async fn update_order(&mut self, order: &mut Order) -> Result<()>;

    /// Lists orders matching the filter.
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>>;

    /// Counts orders matching the filter, ignoring paging.
    async fn count_orders(&self, filter: &OrderFilter) -> Result<usize>;

    /// Loads an inventory row.
    async fn get_inventory(&self, key: InventoryKey) -> Result<Option<Inventory>>;

    /// Stages an inventory row write with the same version rules as orders.
    async fn put_inventory(&mut self, row: &mut Inventory) -> Result<()>;

    /// Appends rows to the stock ledger.
    async fn append_ledger(&mut self, entries: Vec<InventoryTransaction>) -> Result<()>;

    /// Returns every ledger row referencing the order, oldest first.
    async fn ledger_for_order(&self, id: OrderId) -> Result<Vec<InventoryTransaction>>;
}
