//! Integration tests for the in-memory repository.
//!
//! These tests exercise transaction isolation, atomic commit, ordering of
//! row locks across tasks and the query surface.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::{AddressId, Currency, CustomerId, Money, OrderId, ProductId, WarehouseId};
use domain::{
    Inventory, InventoryKey, InventoryTransaction, LedgerKind, NewOrder, Order, OrderAddress,
    OrderNumber, OrderStatus, OrderType, Priority, ShippingMethod,
};
use store::{InMemoryRepository, OrderFilter, Repository, StoreError, Transaction};

fn address() -> OrderAddress {
    OrderAddress {
        source_address_id: AddressId::new(),
        recipient: "Test".into(),
        line1: "1 Test Rd".into(),
        line2: None,
        city: "Testville".into(),
        region: "TS".into(),
        postal_code: "12345".into(),
        country: "US".into(),
    }
}

fn new_order(number: OrderNumber, customer_id: CustomerId, offset_secs: i64) -> Order {
    Order::new(NewOrder {
        id: OrderId::new(),
        order_number: number,
        customer_id,
        order_type: OrderType::Sales,
        priority: Priority::Normal,
        shipping_method: ShippingMethod::Standard,
        currency: Currency::USD,
        shipping_address: address(),
        billing_address: address(),
        discount_code: None,
        required_date: None,
        notes: None,
        created_by: "test".into(),
        created_at: Utc::now() + ChronoDuration::seconds(offset_secs),
    })
}

async fn seeded(on_hand: u32) -> (InMemoryRepository, InventoryKey) {
    let repo = InMemoryRepository::new();
    let key = InventoryKey::new(WarehouseId::new(), ProductId::new());
    repo.seed_inventory([Inventory::new(key, on_hand, Money::from_units(5))])
        .await;
    (repo, key)
}

mod atomicity {
    use super::*;

    #[tokio::test]
    async fn commit_applies_order_inventory_and_ledger_together() {
        let (repo, key) = seeded(10).await;
        let mut tx = repo.begin().await.unwrap();

        let number = tx.next_order_number(2024).await.unwrap();
        let mut order = new_order(number, CustomerId::new(), 0);
        tx.insert_order(&mut order).await.unwrap();

        tx.lock_inventory(key).await.unwrap();
        let mut row = tx.get_inventory(key).await.unwrap().unwrap();
        row.reserve(4).unwrap();
        tx.put_inventory(&mut row).await.unwrap();
        tx.append_ledger(vec![InventoryTransaction::for_order(
            order.id(),
            LedgerKind::Reserve,
            key,
            4,
            row.average_cost,
            Utc::now(),
        )])
        .await
        .unwrap();

        // Nothing is visible before commit.
        assert_eq!(repo.inventory(key).await.unwrap().reserved, 0);
        assert!(repo.ledger().await.is_empty());

        tx.commit().await.unwrap();
        let committed = repo.inventory(key).await.unwrap();
        assert_eq!(committed.reserved, 4);
        assert_eq!(committed.version.as_u64(), 2);
        assert_eq!(repo.ledger().await.len(), 1);
        assert!(repo.order(order.id()).await.is_some());
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let (repo, key) = seeded(10).await;

        let mut stale = repo.begin().await.unwrap();
        let mut order = new_order(OrderNumber::new(2024, 9).unwrap(), CustomerId::new(), 0);
        stale.insert_order(&mut order).await.unwrap();
        let mut stale_row = stale.get_inventory(key).await.unwrap().unwrap();
        stale_row.reserve(2).unwrap();
        stale.put_inventory(&mut stale_row).await.unwrap();

        // A second transaction that skipped the row lock commits first.
        let mut tx = repo.begin().await.unwrap();
        let mut row = tx.get_inventory(key).await.unwrap().unwrap();
        row.reserve(1).unwrap();
        tx.put_inventory(&mut row).await.unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(
            stale.commit().await,
            Err(StoreError::Conflict {
                entity: "inventory",
                ..
            })
        ));

        assert!(repo.order(order.id()).await.is_none());
        assert_eq!(repo.inventory(key).await.unwrap().reserved, 1);
    }

    #[tokio::test]
    async fn ledger_reads_include_staged_rows() {
        let (repo, key) = seeded(3).await;
        let order_id = OrderId::new();
        let mut tx = repo.begin().await.unwrap();
        tx.append_ledger(vec![InventoryTransaction::for_order(
            order_id,
            LedgerKind::Reserve,
            key,
            1,
            Money::zero(),
            Utc::now(),
        )])
        .await
        .unwrap();
        assert_eq!(tx.ledger_for_order(order_id).await.unwrap().len(), 1);
        assert!(tx.ledger_for_order(OrderId::new()).await.unwrap().is_empty());
    }
}

mod locking {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn row_lock_serializes_read_modify_write() {
        let (repo, key) = seeded(100).await;
        let repo = Arc::new(repo);

        let tasks = (0..20).map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move {
                let mut tx = repo.begin().await.unwrap();
                tx.lock_inventory(key).await.unwrap();
                let mut row = tx.get_inventory(key).await.unwrap().unwrap();
                tokio::task::yield_now().await;
                row.reserve(3).unwrap();
                tx.put_inventory(&mut row).await.unwrap();
                tx.commit().await.unwrap();
            })
        });
        for result in futures_util::future::join_all(tasks).await {
            result.unwrap();
        }

        let row = repo.inventory(key).await.unwrap();
        assert_eq!(row.reserved, 60);
        assert_eq!(row.version.as_u64(), 21);
    }

    #[tokio::test]
    async fn lock_released_on_drop() {
        let repo = InMemoryRepository::with_lock_timeout(Duration::from_millis(20));
        let id = OrderId::new();
        {
            let mut tx = repo.begin().await.unwrap();
            tx.lock_order(id).await.unwrap();
        }
        let mut tx = repo.begin().await.unwrap();
        tx.lock_order(id).await.unwrap();
    }
}

mod queries {
    use super::*;

    #[tokio::test]
    async fn list_and_count_with_filters() {
        let repo = InMemoryRepository::new();
        let alice = CustomerId::new();
        let bob = CustomerId::new();

        let mut tx = repo.begin().await.unwrap();
        for (i, customer) in [alice, alice, bob].into_iter().enumerate() {
            let number = tx.next_order_number(2024).await.unwrap();
            let mut order = new_order(number, customer, i as i64);
            tx.insert_order(&mut order).await.unwrap();
        }
        let mut cancelled = new_order(
            tx.next_order_number(2024).await.unwrap(),
            alice,
            10,
        );
        cancelled.cancel("test", "test", Utc::now()).unwrap();
        tx.insert_order(&mut cancelled).await.unwrap();

        // Staged rows are visible to their own transaction.
        assert_eq!(tx.count_orders(&OrderFilter::new()).await.unwrap(), 4);
        tx.commit().await.unwrap();

        let tx = repo.begin().await.unwrap();
        assert_eq!(
            tx.count_orders(&OrderFilter::for_customer(alice)).await.unwrap(),
            3
        );
        assert_eq!(
            tx.count_orders(&OrderFilter::for_customer(alice).status(OrderStatus::Draft))
                .await
                .unwrap(),
            2
        );

        let page = tx
            .list_orders(&OrderFilter::new().offset(1).limit(2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].created_at() <= page[1].created_at());

        let by_number = tx
            .get_order_by_number(cancelled.order_number())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_number.id(), cancelled.id());
        assert_eq!(by_number.status(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn update_missing_order_is_not_found() {
        let repo = InMemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let mut ghost = new_order(OrderNumber::new(2024, 1).unwrap(), CustomerId::new(), 0);
        assert!(matches!(
            tx.update_order(&mut ghost).await,
            Err(StoreError::NotFound { entity: "order", .. })
        ));
    }
}
