//! Shipping, delivery and returns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{InventoryKey, Order, OrderStatus, ReturnItems, ShipItems};
use store::{Repository, Transaction};

use super::{Committed, OrderService, stock_for};
use crate::collaborators::{Notification, NotificationKind};
use crate::context::RequestContext;
use crate::error::Result;
use crate::inventory::ReturnedStock;

/// Goods leaving and coming back.
#[async_trait]
pub trait FulfillmentOps: Send + Sync {
    /// Ships the listed lines, or every outstanding unit if none are listed.
    async fn ship_order(&self, ctx: &RequestContext, id: OrderId, cmd: ShipItems) -> Result<Order>;

    /// Marks a shipped order as delivered.
    async fn deliver_order(&self, ctx: &RequestContext, id: OrderId) -> Result<Order>;

    /// Accepts returned goods, restocking what can be sold again.
    async fn return_items(&self, ctx: &RequestContext, id: OrderId, cmd: ReturnItems) -> Result<Order>;
}

#[async_trait]
impl<R: Repository> FulfillmentOps for OrderService<R> {
    #[tracing::instrument(skip(self, ctx, cmd), fields(order_id = %id, actor = %ctx.actor))]
    async fn ship_order(&self, ctx: &RequestContext, id: OrderId, cmd: ShipItems) -> Result<Order> {
        let cmd = &cmd;
        let order = self
            .execute(ctx, "ship_order", move || {
                self.locks.with_order_lock(id, move || async move {
                    let mut tx = self.repo.begin().await?;
                    let result = ctx.within(self.ship_in_tx(&mut tx, ctx, id, cmd)).await;
                    self.finish(tx, result).await
                })
            })
            .await?;
        tracing::info!(order_id = %id, status = %order.status(), "Shipment recorded");
        Ok(order)
    }

    #[tracing::instrument(skip(self, ctx), fields(order_id = %id, actor = %ctx.actor))]
    async fn deliver_order(&self, ctx: &RequestContext, id: OrderId) -> Result<Order> {
        self.execute(ctx, "deliver_order", move || {
            self.locks.with_order_lock(id, move || async move {
                let mut tx = self.repo.begin().await?;
                let result = ctx.within(self.deliver_in_tx(&mut tx, ctx, id)).await;
                self.finish(tx, result).await
            })
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx, cmd), fields(order_id = %id, refund = cmd.refund, actor = %ctx.actor))]
    async fn return_items(&self, ctx: &RequestContext, id: OrderId, cmd: ReturnItems) -> Result<Order> {
        let cmd = &cmd;
        self.execute(ctx, "return_items", move || {
            self.locks.with_order_lock(id, move || async move {
                let mut tx = self.repo.begin().await?;
                let result = ctx.within(self.return_in_tx(&mut tx, ctx, id, cmd)).await;
                self.finish(tx, result).await
            })
        })
        .await
    }
}

impl<R: Repository> OrderService<R> {
    async fn ship_in_tx(
        &self,
        tx: &mut R::Tx,
        ctx: &RequestContext,
        id: OrderId,
        cmd: &ShipItems,
    ) -> Result<Committed<Order>> {
        let mut order = self.load_for_update(tx, id).await?;
        let notifications = self
            .apply_shipment(tx, ctx, &mut order, cmd, Utc::now())
            .await?;
        tx.update_order(&mut order).await?;
        Ok(Committed::new(order, notifications))
    }

    /// Records the shipment on the order and converts the shipped units'
    /// reservations into deductions.
    pub(super) async fn apply_shipment(
        &self,
        tx: &mut R::Tx,
        ctx: &RequestContext,
        order: &mut Order,
        cmd: &ShipItems,
        at: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        let shipment = order.record_shipment(
            &cmd.lines,
            cmd.tracking_number.clone(),
            cmd.carrier.clone(),
            &ctx.actor,
            at,
        )?;
        let stock: Vec<_> = shipment
            .lines
            .iter()
            .filter_map(|line| order.item(line.item_id).map(|item| stock_for(item, line.quantity)))
            .collect();
        self.inventory.deduct(tx, order.id(), &stock, at).await?;

        Ok(vec![Notification::for_order(
            order,
            NotificationKind::Shipped {
                tracking_number: shipment.tracking_number,
            },
        )])
    }

    async fn deliver_in_tx(&self, tx: &mut R::Tx, ctx: &RequestContext, id: OrderId) -> Result<Committed<Order>> {
        let mut order = self.load_for_update(tx, id).await?;
        let notifications = self.apply_delivery(ctx, &mut order, None, Utc::now())?;
        tx.update_order(&mut order).await?;
        Ok(Committed::new(order, notifications))
    }

    /// No stock moves on delivery.
    pub(super) fn apply_delivery(
        &self,
        ctx: &RequestContext,
        order: &mut Order,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        order.transition(OrderStatus::Delivered, &ctx.actor, at, note)?;
        Ok(vec![Notification::for_order(order, NotificationKind::Delivered)])
    }

    async fn return_in_tx(
        &self,
        tx: &mut R::Tx,
        ctx: &RequestContext,
        id: OrderId,
        cmd: &ReturnItems,
    ) -> Result<Committed<Order>> {
        let mut order = self.load_for_update(tx, id).await?;
        let now = Utc::now();
        let value = order.record_return(&cmd.lines, now)?;

        let returned: Vec<_> = cmd
            .lines
            .iter()
            .filter_map(|line| {
                order.item(line.item_id).map(|item| ReturnedStock {
                    key: InventoryKey::new(item.warehouse_id, item.product_id),
                    quantity: line.quantity,
                    condition: line.condition,
                })
            })
            .collect();
        let restocked = self
            .inventory
            .return_stock(tx, order.id(), &returned, now)
            .await?;

        let mut notifications = vec![Notification::for_order(&order, NotificationKind::ItemsReturned)];
        let refund = value.min(order.paid_amount());
        if cmd.refund && refund.is_positive() {
            notifications.extend(self.apply_refund(ctx, &mut order, Some(refund), now).await?);
        }
        tx.update_order(&mut order).await?;

        tracing::info!(
            order_id = %id,
            %value,
            restocked,
            reason = cmd.reason.as_deref().unwrap_or(""),
            "Items returned"
        );
        Ok(Committed::new(order, notifications))
    }
}
