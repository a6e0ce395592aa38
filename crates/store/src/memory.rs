use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, Version};
use domain::{Inventory, InventoryKey, InventoryTransaction, Order, OrderNumber};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};

use crate::{
    OrderFilter, Result, StoreError,
    store::{Repository, Transaction},
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Committed state.
#[derive(Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    order_numbers: HashMap<OrderNumber, OrderId>,
    inventory: BTreeMap<InventoryKey, Inventory>,
    ledger: Vec<InventoryTransaction>,
}

type LockMap<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

/// Per-key pessimistic locks. An entry lives only while someone holds or
/// waits for it.
struct LockTable<K> {
    locks: LockMap<K>,
}

impl<K: Eq + Hash + Clone + std::fmt::Display> LockTable<K> {
    fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn acquire(&self, key: &K, timeout: Duration) -> Result<RowGuard<K>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.clone()).or_default().clone()
        };
        let acquired = tokio::time::timeout(timeout, lock.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(RowGuard {
                key: key.clone(),
                guard: Some(guard),
                locks: self.locks.clone(),
            }),
            Err(_) => {
                evict_idle(&self.locks, key);
                Err(StoreError::LockTimeout(key.to_string()))
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Removes the entry for `key` if only the table still references it.
fn evict_idle<K: Eq + Hash>(locks: &Mutex<HashMap<K, Arc<AsyncMutex<()>>>>, key: &K) {
    let mut locks = locks.lock().unwrap_or_else(PoisonError::into_inner);
    if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
        locks.remove(key);
    }
}

/// A held row lock. Releasing it evicts the table entry once idle.
struct RowGuard<K: Eq + Hash> {
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap<K>,
}

impl<K: Eq + Hash> Drop for RowGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        evict_idle(&self.locks, &self.key);
    }
}

struct Shared {
    tables: RwLock<Tables>,
    sequences: Mutex<HashMap<i32, u32>>,
    order_locks: LockTable<OrderId>,
    inventory_locks: LockTable<InventoryKey>,
    injected_conflicts: AtomicU32,
    lock_timeout: Duration,
}

/// Fully transactional in-memory repository.
///
/// Transactions stage their writes privately and apply them under one
/// write lock on commit, after re-checking every row version. Row locks
/// are per-key async mutexes held until the transaction ends.
#[derive(Clone)]
pub struct InMemoryRepository {
    shared: Arc<Shared>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates a new empty repository with a custom row-lock timeout.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                sequences: Mutex::new(HashMap::new()),
                order_locks: LockTable::new(),
                inventory_locks: LockTable::new(),
                injected_conflicts: AtomicU32::new(0),
                lock_timeout,
            }),
        }
    }

    /// Writes inventory rows directly, outside any transaction.
    ///
    /// Versions are set to the first version.
    pub async fn seed_inventory(&self, rows: impl IntoIterator<Item = Inventory>) {
        let mut tables = self.shared.tables.write().await;
        for mut row in rows {
            row.version = Version::first();
            tables.inventory.insert(row.key, row);
        }
    }

    /// Returns the committed inventory row.
    pub async fn inventory(&self, key: InventoryKey) -> Option<Inventory> {
        self.shared.tables.read().await.inventory.get(&key).cloned()
    }

    /// Returns every committed inventory row.
    pub async fn all_inventory(&self) -> Vec<Inventory> {
        self.shared
            .tables
            .read()
            .await
            .inventory
            .values()
            .cloned()
            .collect()
    }

    /// Returns the committed order.
    pub async fn order(&self, id: OrderId) -> Option<Order> {
        self.shared.tables.read().await.orders.get(&id).cloned()
    }

    /// Returns the number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.shared.tables.read().await.orders.len()
    }

    /// Returns the whole committed ledger, in commit order.
    pub async fn ledger(&self) -> Vec<InventoryTransaction> {
        self.shared.tables.read().await.ledger.clone()
    }

    /// Sets the last allocated sequence value for a year.
    pub fn set_sequence(&self, year: i32, last: u32) {
        let mut sequences = self
            .shared
            .sequences
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sequences.insert(year, last);
    }

    /// Makes the next `count` commits fail with a conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.shared.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Clears all committed state.
    pub async fn clear(&self) {
        *self.shared.tables.write().await = Tables::default();
        self.shared
            .sequences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryTransaction {
            shared: self.shared.clone(),
            orders: HashMap::new(),
            inventory: BTreeMap::new(),
            ledger: Vec::new(),
            order_guards: HashMap::new(),
            inventory_guards: HashMap::new(),
            finished: false,
        })
    }
}

/// A staged row and the version it was based on.
struct Staged<T> {
    row: T,
    base: Version,
}

/// Transaction handle for [`InMemoryRepository`].
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    orders: HashMap<OrderId, Staged<Order>>,
    inventory: BTreeMap<InventoryKey, Staged<Inventory>>,
    ledger: Vec<InventoryTransaction>,
    order_guards: HashMap<OrderId, RowGuard<OrderId>>,
    inventory_guards: HashMap<InventoryKey, RowGuard<InventoryKey>>,
    finished: bool,
}

impl InMemoryTransaction {
    /// Returns true if any write is staged.
    pub fn has_writes(&self) -> bool {
        !(self.orders.is_empty() && self.inventory.is_empty() && self.ledger.is_empty())
    }

    async fn current_order_version(&self, id: OrderId) -> Option<Version> {
        if let Some(staged) = self.orders.get(&id) {
            return Some(staged.row.version());
        }
        let tables = self.shared.tables.read().await;
        tables.orders.get(&id).map(Order::version)
    }

    async fn current_inventory_version(&self, key: InventoryKey) -> Option<Version> {
        if let Some(staged) = self.inventory.get(&key) {
            return Some(staged.row.version);
        }
        let tables = self.shared.tables.read().await;
        tables.inventory.get(&key).map(|row| row.version)
    }

    fn validate(&self, tables: &Tables) -> Result<()> {
        for (id, staged) in &self.orders {
            let committed = tables.orders.get(id).map(Order::version);
            if committed.unwrap_or(Version::initial()) != staged.base {
                return Err(StoreError::Conflict {
                    entity: "order",
                    id: id.to_string(),
                });
            }
            let number = staged.row.order_number();
            if let Some(owner) = tables.order_numbers.get(&number)
                && owner != id
            {
                return Err(StoreError::DuplicateOrderNumber(number));
            }
        }
        for (key, staged) in &self.inventory {
            let committed = tables.inventory.get(key).map(|row| row.version);
            if committed.unwrap_or(Version::initial()) != staged.base {
                return Err(StoreError::Conflict {
                    entity: "inventory",
                    id: key.to_string(),
                });
            }
        }
        Ok(())
    }

    fn release_locks(&mut self) {
        self.order_guards.clear();
        self.inventory_guards.clear();
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            if self.has_writes() {
                tracing::debug!("Transaction dropped with staged writes, rolling back");
            }
            metrics::counter!("store_rollbacks_total").increment(1);
        }
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(mut self) -> Result<()> {
        if self
            .shared
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict {
                entity: "transaction",
                id: "injected".to_string(),
            });
        }

        let shared = self.shared.clone();
        let mut tables = shared.tables.write().await;
        self.validate(&tables)?;

        for (id, staged) in std::mem::take(&mut self.orders) {
            tables.order_numbers.insert(staged.row.order_number(), id);
            tables.orders.insert(id, staged.row);
        }
        for (key, staged) in std::mem::take(&mut self.inventory) {
            tables.inventory.insert(key, staged.row);
        }
        tables.ledger.append(&mut self.ledger);
        drop(tables);

        self.finished = true;
        self.release_locks();
        metrics::counter!("store_commits_total").increment(1);
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.release_locks();
        metrics::counter!("store_rollbacks_total").increment(1);
        Ok(())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<()> {
        if self.order_guards.contains_key(&id) {
            return Ok(());
        }
        let guard = self
            .shared
            .order_locks
            .acquire(&id, self.shared.lock_timeout)
            .await?;
        self.order_guards.insert(id, guard);
        Ok(())
    }

    async fn lock_inventory(&mut self, key: InventoryKey) -> Result<()> {
        if self.inventory_guards.contains_key(&key) {
            return Ok(());
        }
        let guard = self
            .shared
            .inventory_locks
            .acquire(&key, self.shared.lock_timeout)
            .await?;
        self.inventory_guards.insert(key, guard);
        Ok(())
    }

    async fn next_order_number(&mut self, year: i32) -> Result<OrderNumber> {
        let next = {
            let mut sequences = self
                .shared
                .sequences
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let last = sequences.entry(year).or_insert(0);
            if *last >= OrderNumber::MAX_SEQUENCE {
                return Err(StoreError::SequenceExhausted(year));
            }
            *last += 1;
            *last
        };
        OrderNumber::new(year, next).map_err(|e| StoreError::Internal(e.to_string()))
    }

    async fn insert_order(&mut self, order: &mut Order) -> Result<()> {
        let id = order.id();
        if self.current_order_version(id).await.is_some() {
            return Err(StoreError::Conflict {
                entity: "order",
                id: id.to_string(),
            });
        }
        let number = order.order_number();
        let taken_here = self
            .orders
            .values()
            .any(|staged| staged.row.order_number() == number);
        let taken = taken_here
            || self
                .shared
                .tables
                .read()
                .await
                .order_numbers
                .contains_key(&number);
        if taken {
            return Err(StoreError::DuplicateOrderNumber(number));
        }

        order.set_version(Version::first());
        self.orders.insert(
            id,
            Staged {
                row: order.clone(),
                base: Version::initial(),
            },
        );
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        if let Some(staged) = self.orders.get(&id) {
            return Ok(Some(staged.row.clone()));
        }
        Ok(self.shared.tables.read().await.orders.get(&id).cloned())
    }

    async fn get_order_by_number(&self, number: OrderNumber) -> Result<Option<Order>> {
        if let Some(staged) = self
            .orders
            .values()
            .find(|staged| staged.row.order_number() == number)
        {
            return Ok(Some(staged.row.clone()));
        }
        let id = self
            .shared
            .tables
            .read()
            .await
            .order_numbers
            .get(&number)
            .copied();
        match id {
            Some(id) => self.get_order(id).await,
            None => Ok(None),
        }
    }

    async fn update_order(&mut self, order: &mut Order) -> Result<()> {
        let id = order.id();
        let current = self
            .current_order_version(id)
            .await
            .ok_or_else(|| StoreError::NotFound {
                entity: "order",
                id: id.to_string(),
            })?;
        if current != order.version() {
            return Err(StoreError::Conflict {
                entity: "order",
                id: id.to_string(),
            });
        }

        // A row already staged here keeps its bumped version.
        match self.orders.get_mut(&id) {
            Some(staged) => staged.row = order.clone(),
            None => {
                order.set_version(current.next());
                self.orders.insert(
                    id,
                    Staged {
                        row: order.clone(),
                        base: current,
                    },
                );
            }
        }
        Ok(())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let matching = self.matching_orders(filter).await;
        Ok(filter.page(matching))
    }

    async fn count_orders(&self, filter: &OrderFilter) -> Result<usize> {
        Ok(self.matching_orders(filter).await.len())
    }

    async fn get_inventory(&self, key: InventoryKey) -> Result<Option<Inventory>> {
        if let Some(staged) = self.inventory.get(&key) {
            return Ok(Some(staged.row.clone()));
        }
        Ok(self.shared.tables.read().await.inventory.get(&key).cloned())
    }

    async fn put_inventory(&mut self, row: &mut Inventory) -> Result<()> {
        let key = row.key;
        let current = self
            .current_inventory_version(key)
            .await
            .unwrap_or(Version::initial());
        if current != row.version {
            return Err(StoreError::Conflict {
                entity: "inventory",
                id: key.to_string(),
            });
        }
        if !row.is_consistent() {
            return Err(StoreError::Internal(format!(
                "inventory {key} would have reserved {} above on hand {}",
                row.reserved, row.on_hand
            )));
        }

        match self.inventory.get_mut(&key) {
            Some(staged) => staged.row = row.clone(),
            None => {
                row.version = current.next();
                self.inventory.insert(
                    key,
                    Staged {
                        row: row.clone(),
                        base: current,
                    },
                );
            }
        }
        Ok(())
    }

    async fn append_ledger(&mut self, entries: Vec<InventoryTransaction>) -> Result<()> {
        self.ledger.extend(entries);
        Ok(())
    }

    async fn ledger_for_order(&self, id: OrderId) -> Result<Vec<InventoryTransaction>> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .ledger
            .iter()
            .chain(self.ledger.iter())
            .filter(|entry| entry.reference_id == id)
            .cloned()
            .collect())
    }
}

impl InMemoryTransaction {
    async fn matching_orders(&self, filter: &OrderFilter) -> Vec<Order> {
        let tables = self.shared.tables.read().await;
        let mut seen = HashSet::new();
        let mut orders: Vec<Order> = self
            .orders
            .values()
            .map(|staged| &staged.row)
            .filter(|order| seen.insert(order.id()))
            .filter(|order| filter.matches(order))
            .cloned()
            .collect();
        orders.extend(
            tables
                .orders
                .values()
                .filter(|order| !seen.contains(&order.id()) && filter.matches(order))
                .cloned(),
        );
        orders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{AddressId, Currency, CustomerId, Money, ProductId, WarehouseId};
    use domain::{NewOrder, OrderAddress, OrderType, Priority, ShippingMethod};

    fn order(number: OrderNumber) -> Order {
        let address = OrderAddress {
            source_address_id: AddressId::new(),
            recipient: "R".into(),
            line1: "L".into(),
            line2: None,
            city: "C".into(),
            region: "R".into(),
            postal_code: "P".into(),
            country: "US".into(),
        };
        Order::new(NewOrder {
            id: OrderId::new(),
            order_number: number,
            customer_id: CustomerId::new(),
            order_type: OrderType::Sales,
            priority: Priority::Normal,
            shipping_method: ShippingMethod::Standard,
            currency: Currency::USD,
            shipping_address: address.clone(),
            billing_address: address,
            discount_code: None,
            required_date: None,
            notes: None,
            created_by: "test".into(),
            created_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_insert_visible_only_after_commit() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let number = tx.next_order_number(2024).await.unwrap();
        let mut o = order(number);
        tx.insert_order(&mut o).await.unwrap();
        assert_eq!(o.version(), Version::first());

        assert!(tx.get_order(o.id()).await.unwrap().is_some());
        assert!(repo.order(o.id()).await.is_none());

        tx.commit().await.unwrap();
        assert_eq!(repo.order(o.id()).await.unwrap().version(), Version::first());
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let repo = InMemoryRepository::new();
        let id = {
            let mut tx = repo.begin().await.unwrap();
            let mut o = order(OrderNumber::new(2024, 1).unwrap());
            tx.insert_order(&mut o).await.unwrap();
            o.id()
        };
        assert!(repo.order(id).await.is_none());
        assert_eq!(repo.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_sequence_is_per_year_and_not_rolled_back() {
        let repo = InMemoryRepository::new();
        let tx = {
            let mut tx = repo.begin().await.unwrap();
            assert_eq!(tx.next_order_number(2024).await.unwrap().sequence(), 1);
            assert_eq!(tx.next_order_number(2025).await.unwrap().sequence(), 1);
            tx
        };
        tx.rollback().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        assert_eq!(
            tx.next_order_number(2024).await.unwrap().to_string(),
            "2024-000002"
        );
    }

    #[tokio::test]
    async fn test_sequence_exhaustion() {
        let repo = InMemoryRepository::new();
        repo.set_sequence(2024, OrderNumber::MAX_SEQUENCE);
        let mut tx = repo.begin().await.unwrap();
        assert_eq!(
            tx.next_order_number(2024).await,
            Err(StoreError::SequenceExhausted(2024))
        );
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let mut o = order(OrderNumber::new(2024, 1).unwrap());
        tx.insert_order(&mut o).await.unwrap();
        tx.commit().await.unwrap();

        let mut first = repo.begin().await.unwrap();
        let mut second = repo.begin().await.unwrap();
        let mut a = first.get_order(o.id()).await.unwrap().unwrap();
        let mut b = second.get_order(o.id()).await.unwrap().unwrap();
        first.update_order(&mut a).await.unwrap();
        second.update_order(&mut b).await.unwrap();

        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(StoreError::Conflict { entity: "order", .. })
        ));
        assert_eq!(repo.order(o.id()).await.unwrap().version(), Version::new(2));
    }

    #[tokio::test]
    async fn test_duplicate_order_number() {
        let repo = InMemoryRepository::new();
        let number = OrderNumber::new(2024, 5).unwrap();
        let mut tx = repo.begin().await.unwrap();
        tx.insert_order(&mut order(number)).await.unwrap();
        assert_eq!(
            tx.insert_order(&mut order(number)).await,
            Err(StoreError::DuplicateOrderNumber(number))
        );
    }

    #[tokio::test]
    async fn test_inventory_put_checks_consistency() {
        let repo = InMemoryRepository::new();
        let key = InventoryKey::new(WarehouseId::new(), ProductId::new());
        repo.seed_inventory([Inventory::new(key, 5, Money::from_units(2))])
            .await;

        let mut tx = repo.begin().await.unwrap();
        let mut row = tx.get_inventory(key).await.unwrap().unwrap();
        row.reserved = 6;
        assert!(matches!(
            tx.put_inventory(&mut row).await,
            Err(StoreError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_is_reentrant_within_transaction() {
        let repo = InMemoryRepository::with_lock_timeout(Duration::from_millis(50));
        let id = OrderId::new();
        let mut tx = repo.begin().await.unwrap();
        tx.lock_order(id).await.unwrap();
        tx.lock_order(id).await.unwrap();

        let mut other = repo.begin().await.unwrap();
        assert!(matches!(
            other.lock_order(id).await,
            Err(StoreError::LockTimeout(_))
        ));

        tx.commit().await.unwrap();
        other.lock_order(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_entries_evicted_on_release() {
        let repo = InMemoryRepository::with_lock_timeout(Duration::from_millis(50));
        let locks = &repo.shared.order_locks;

        let mut tx = repo.begin().await.unwrap();
        for _ in 0..10 {
            tx.lock_order(OrderId::new()).await.unwrap();
        }
        assert_eq!(locks.len(), 10);
        tx.commit().await.unwrap();
        assert_eq!(locks.len(), 0);

        let id = OrderId::new();
        let mut holder = repo.begin().await.unwrap();
        holder.lock_order(id).await.unwrap();
        let mut waiter = repo.begin().await.unwrap();
        assert!(waiter.lock_order(id).await.is_err());
        assert_eq!(locks.len(), 1);
        holder.rollback().await.unwrap();
        assert_eq!(locks.len(), 0);

        {
            let mut dropped = repo.begin().await.unwrap();
            dropped.lock_inventory(InventoryKey::new(WarehouseId::new(), ProductId::new()))
                .await
                .unwrap();
            assert_eq!(repo.shared.inventory_locks.len(), 1);
        }
        assert_eq!(repo.shared.inventory_locks.len(), 0);
    }

    #[tokio::test]
    async fn test_injected_conflicts() {
        let repo = InMemoryRepository::new();
        repo.inject_conflicts(1);
        let tx = repo.begin().await.unwrap();
        assert!(tx.commit().await.is_err());
        let tx = repo.begin().await.unwrap();
        assert!(tx.commit().await.is_ok());
    }
}
