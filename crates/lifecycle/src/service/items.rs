//! Line item edits on Draft and Pending orders.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, OrderItemId};
use domain::{NewOrderLine, Order, OrderError, UpdateItem};
use store::{Repository, Transaction};

use super::{Committed, OrderService, stock_for};
use crate::collaborators::{Notification, NotificationKind};
use crate::context::RequestContext;
use crate::error::Result;

/// Adding, changing and removing lines. Each edit moves the reservation
/// by the quantity delta and reprices the order.
#[async_trait]
pub trait ItemOps: Send + Sync {
    async fn add_item(&self, ctx: &RequestContext, id: OrderId, line: NewOrderLine) -> Result<Order>;

    async fn update_item(
        &self,
        ctx: &RequestContext,
        id: OrderId,
        item_id: OrderItemId,
        cmd: UpdateItem,
    ) -> Result<Order>;

    async fn remove_item(&self, ctx: &RequestContext, id: OrderId, item_id: OrderItemId) -> Result<Order>;
}

#[async_trait]
impl<R: Repository> ItemOps for OrderService<R> {
    #[tracing::instrument(skip(self, ctx, line), fields(order_id = %id, product_id = %line.product_id, quantity = line.quantity))]
    async fn add_item(&self, ctx: &RequestContext, id: OrderId, line: NewOrderLine) -> Result<Order> {
        let line = &line;
        self.execute(ctx, "add_item", move || {
            self.locks.with_order_lock(id, move || async move {
                let mut tx = self.repo.begin().await?;
                let result = ctx.within(self.add_item_in_tx(&mut tx, id, line)).await;
                self.finish(tx, result).await
            })
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx, cmd), fields(order_id = %id, item_id = %item_id))]
    async fn update_item(
        &self,
        ctx: &RequestContext,
        id: OrderId,
        item_id: OrderItemId,
        cmd: UpdateItem,
    ) -> Result<Order> {
        let cmd = &cmd;
        self.execute(ctx, "update_item", move || {
            self.locks.with_order_lock(id, move || async move {
                let mut tx = self.repo.begin().await?;
                let result = ctx
                    .within(self.update_item_in_tx(&mut tx, id, item_id, cmd))
                    .await;
                self.finish(tx, result).await
            })
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx), fields(order_id = %id, item_id = %item_id))]
    async fn remove_item(&self, ctx: &RequestContext, id: OrderId, item_id: OrderItemId) -> Result<Order> {
        self.execute(ctx, "remove_item", move || {
            self.locks.with_order_lock(id, move || async move {
                let mut tx = self.repo.begin().await?;
                let result = ctx
                    .within(self.remove_item_in_tx(&mut tx, id, item_id))
                    .await;
                self.finish(tx, result).await
            })
        })
        .await
    }
}

impl<R: Repository> OrderService<R> {
    async fn add_item_in_tx(&self, tx: &mut R::Tx, id: OrderId, line: &NewOrderLine) -> Result<Committed<Order>> {
        let mut order = self.load_for_update(tx, id).await?;
        let now = Utc::now();
        let before = order.total_amount();

        let item = self.build_item(&order, line).await?;
        let stock = stock_for(&item, item.quantity);
        order.add_item(item, now)?;
        self.inventory.reserve(tx, id, &[stock], now).await?;

        self.settle_item_edit(tx, order, before, now).await
    }

    async fn update_item_in_tx(
        &self,
        tx: &mut R::Tx,
        id: OrderId,
        item_id: OrderItemId,
        cmd: &UpdateItem,
    ) -> Result<Committed<Order>> {
        let mut order = self.load_for_update(tx, id).await?;
        let now = Utc::now();
        let before = order.total_amount();

        let previous = order.update_item(item_id, cmd, now)?;
        let item = order
            .item(item_id)
            .ok_or(OrderError::ItemNotFound(item_id))?;
        match item.quantity.cmp(&previous) {
            Ordering::Greater => {
                let delta = stock_for(item, item.quantity - previous);
                self.inventory.reserve(tx, id, &[delta], now).await?;
            }
            Ordering::Less => {
                let delta = stock_for(item, previous - item.quantity);
                self.inventory.release(tx, id, Some(&[delta][..]), now).await?;
            }
            Ordering::Equal => {}
        }

        self.settle_item_edit(tx, order, before, now).await
    }

    async fn remove_item_in_tx(
        &self,
        tx: &mut R::Tx,
        id: OrderId,
        item_id: OrderItemId,
    ) -> Result<Committed<Order>> {
        let mut order = self.load_for_update(tx, id).await?;
        let now = Utc::now();
        let before = order.total_amount();

        let removed = order.remove_item(item_id, now)?;
        let stock = stock_for(&removed, removed.quantity);
        self.inventory.release(tx, id, Some(&[stock][..]), now).await?;

        self.settle_item_edit(tx, order, before, now).await
    }

    /// Reprices, re-checks credit when the total went up, and saves.
    async fn settle_item_edit(
        &self,
        tx: &mut R::Tx,
        mut order: Order,
        before: Money,
        at: DateTime<Utc>,
    ) -> Result<Committed<Order>> {
        self.reprice(&mut order, at).await?;
        if order.total_amount() > before {
            let limit = self.credit_limit_for(order.customer_id()).await?;
            self.check_credit(tx, limit, &order).await?;
        }
        tx.update_order(&mut order).await?;

        let notification = Notification::for_order(&order, NotificationKind::Updated);
        Ok(Committed::new(order, vec![notification]))
    }
}
