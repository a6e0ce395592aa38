//! Read-only operations. Each runs in its own transaction, rolled back
//! when done, and takes no order lock.

use common::OrderId;
use domain::{InventoryTransaction, Order, OrderNumber};
use store::{OrderFilter, Repository, Transaction};

use super::OrderService;
use crate::error::{Result, ServiceError};
use crate::inventory::{Availability, StockRequest};

impl<R: Repository> OrderService<R> {
    pub async fn get_order(&self, id: OrderId) -> Result<Order> {
        let tx = self.repo.begin().await?;
        let order = tx.get_order(id).await.map_err(ServiceError::from);
        self.read_done(tx, order)
            .await?
            .ok_or(ServiceError::OrderNotFound(id))
    }

    pub async fn get_order_by_number(&self, number: OrderNumber) -> Result<Option<Order>> {
        let tx = self.repo.begin().await?;
        let order = tx.get_order_by_number(number).await.map_err(ServiceError::from);
        self.read_done(tx, order).await
    }

    pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let tx = self.repo.begin().await?;
        let orders = tx.list_orders(filter).await.map_err(ServiceError::from);
        self.read_done(tx, orders).await
    }

    pub async fn count_orders(&self, filter: &OrderFilter) -> Result<usize> {
        let tx = self.repo.begin().await?;
        let count = tx.count_orders(filter).await.map_err(ServiceError::from);
        self.read_done(tx, count).await
    }

    /// Availability per requested line, as of now. Reserves nothing.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn check_availability(&self, lines: &[StockRequest]) -> Result<Vec<Availability>> {
        let tx = self.repo.begin().await?;
        let report = self.inventory.check_availability(&tx, lines).await;
        self.read_done(tx, report).await
    }

    /// Every stock movement recorded against the order, oldest first.
    pub async fn inventory_ledger(&self, order_id: OrderId) -> Result<Vec<InventoryTransaction>> {
        let tx = self.repo.begin().await?;
        let ledger = tx.ledger_for_order(order_id).await.map_err(ServiceError::from);
        self.read_done(tx, ledger).await
    }

    async fn read_done<T>(&self, tx: R::Tx, result: Result<T>) -> Result<T> {
        if let Err(e) = tx.rollback().await {
            tracing::warn!(error = %e, "Rollback of read transaction failed");
        }
        result
    }
}
