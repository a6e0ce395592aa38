//! Create, edit, status changes and cancellation.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use common::{Currency, OrderId};
use domain::{
    AddressKind, CancelOrder, CreateOrder, NewOrder, Order, OrderError, OrderStatus, ShipItems,
    StatusUpdate, UpdateOrder,
};
use store::{Repository, Transaction};

use super::{Committed, OrderService, stock_for};
use crate::collaborators::{Notification, NotificationKind};
use crate::context::RequestContext;
use crate::error::{Result, ServiceError};

/// Order creation and lifecycle transitions.
#[async_trait]
pub trait LifecycleOps: Send + Sync {
    /// Creates a draft order, reserving stock for every line.
    async fn create_order(&self, ctx: &RequestContext, cmd: CreateOrder) -> Result<Order>;

    /// Edits metadata of a Draft, Pending or OnHold order.
    async fn update_order(&self, ctx: &RequestContext, id: OrderId, cmd: UpdateOrder) -> Result<Order>;

    /// Moves the order to a new status, running that transition's side-effects.
    async fn update_status(&self, ctx: &RequestContext, id: OrderId, cmd: StatusUpdate) -> Result<Order>;

    /// Cancels the order and releases its reservations.
    async fn cancel_order(&self, ctx: &RequestContext, id: OrderId, cmd: CancelOrder) -> Result<Order>;
}

#[async_trait]
impl<R: Repository> LifecycleOps for OrderService<R> {
    #[tracing::instrument(skip(self, ctx, cmd), fields(customer_id = %cmd.customer_id, actor = %ctx.actor))]
    async fn create_order(&self, ctx: &RequestContext, cmd: CreateOrder) -> Result<Order> {
        let cmd = &cmd;
        let order = self
            .execute(ctx, "create_order", move || self.create_once(ctx, cmd))
            .await?;
        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.id(),
            order_number = %order.order_number(),
            total = %order.total_amount(),
            "Order created"
        );
        Ok(order)
    }

    #[tracing::instrument(skip(self, ctx, cmd), fields(order_id = %id, actor = %ctx.actor))]
    async fn update_order(&self, ctx: &RequestContext, id: OrderId, cmd: UpdateOrder) -> Result<Order> {
        let cmd = &cmd;
        self.execute(ctx, "update_order", move || {
            self.locks.with_order_lock(id, move || async move {
                let mut tx = self.repo.begin().await?;
                let result = ctx.within(self.update_in_tx(&mut tx, id, cmd)).await;
                self.finish(tx, result).await
            })
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx, cmd), fields(order_id = %id, to = %cmd.status, actor = %ctx.actor))]
    async fn update_status(&self, ctx: &RequestContext, id: OrderId, cmd: StatusUpdate) -> Result<Order> {
        let cmd = &cmd;
        let order = self
            .execute(ctx, "update_status", move || {
                self.locks.with_order_lock(id, move || async move {
                    let mut tx = self.repo.begin().await?;
                    let result = ctx.within(self.status_in_tx(&mut tx, ctx, id, cmd)).await;
                    self.finish(tx, result).await
                })
            })
            .await?;
        tracing::info!(order_id = %id, status = %order.status(), "Status updated");
        Ok(order)
    }

    #[tracing::instrument(skip(self, ctx, cmd), fields(order_id = %id, refund = cmd.refund, actor = %ctx.actor))]
    async fn cancel_order(&self, ctx: &RequestContext, id: OrderId, cmd: CancelOrder) -> Result<Order> {
        let cmd = &cmd;
        self.execute(ctx, "cancel_order", move || {
            self.locks.with_order_lock(id, move || async move {
                let mut tx = self.repo.begin().await?;
                let result = ctx.within(self.cancel_in_tx(&mut tx, ctx, id, cmd)).await;
                self.finish(tx, result).await
            })
        })
        .await
    }
}

impl<R: Repository> OrderService<R> {
    async fn create_once(&self, ctx: &RequestContext, cmd: &CreateOrder) -> Result<Committed<Order>> {
        let mut tx = self.repo.begin().await?;
        let result = ctx.within(self.create_in_tx(&mut tx, ctx, cmd)).await;
        self.finish(tx, result).await
    }

    async fn create_in_tx(
        &self,
        tx: &mut R::Tx,
        ctx: &RequestContext,
        cmd: &CreateOrder,
    ) -> Result<Committed<Order>> {
        let currency = Currency::from_code(&cmd.currency)?;
        if cmd.items.is_empty() {
            return Err(ServiceError::Validation(
                "an order needs at least one item".to_string(),
            ));
        }
        if let Some(line) = cmd.items.iter().find(|l| l.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                quantity: line.quantity,
            }
            .into());
        }

        let customer = self.active_customer(cmd.customer_id).await?;
        let shipping_address = self
            .customer_address(customer.id, cmd.shipping_address_id)
            .await?;
        let billing_address = self
            .customer_address(customer.id, cmd.billing_address_id)
            .await?;

        let now = Utc::now();
        let order_number = tx.next_order_number(now.year()).await?;
        let mut order = Order::new(NewOrder {
            id: OrderId::new(),
            order_number,
            customer_id: customer.id,
            order_type: cmd.order_type,
            priority: cmd.priority,
            shipping_method: cmd.shipping_method,
            currency,
            shipping_address,
            billing_address,
            discount_code: cmd.discount_code.clone(),
            required_date: cmd.required_date,
            notes: cmd.notes.clone(),
            created_by: ctx.actor.clone(),
            created_at: now,
        });
        for line in &cmd.items {
            let item = self.build_item(&order, line).await?;
            order.add_item(item, now)?;
        }

        let stock: Vec<_> = order
            .items()
            .iter()
            .map(|item| stock_for(item, item.quantity))
            .collect();
        self.inventory.reserve(tx, order.id(), &stock, now).await?;
        self.reprice(&mut order, now).await?;
        self.check_credit(tx, customer.credit_limit, &order).await?;
        tx.insert_order(&mut order).await?;

        let notification = Notification::for_order(&order, NotificationKind::Created);
        Ok(Committed::new(order, vec![notification]))
    }

    async fn update_in_tx(&self, tx: &mut R::Tx, id: OrderId, cmd: &UpdateOrder) -> Result<Committed<Order>> {
        let mut order = self.load_for_update(tx, id).await?;
        order.ensure_metadata_editable()?;
        if cmd.is_empty() {
            return Ok(Committed::silent(order));
        }

        let now = Utc::now();
        let before = order.total_amount();
        order.edit_metadata(cmd, now)?;
        if let Some(&address_id) = cmd.shipping_address_id.as_set() {
            let address = self.customer_address(order.customer_id(), address_id).await?;
            order.replace_address(AddressKind::Shipping, address, now)?;
        }
        if let Some(&address_id) = cmd.billing_address_id.as_set() {
            let address = self.customer_address(order.customer_id(), address_id).await?;
            order.replace_address(AddressKind::Billing, address, now)?;
        }
        if cmd.affects_totals() {
            self.reprice(&mut order, now).await?;
            if order.total_amount() > before {
                let limit = self.credit_limit_for(order.customer_id()).await?;
                self.check_credit(tx, limit, &order).await?;
            }
        }
        tx.update_order(&mut order).await?;

        let notification = Notification::for_order(&order, NotificationKind::Updated);
        Ok(Committed::new(order, vec![notification]))
    }

    async fn status_in_tx(
        &self,
        tx: &mut R::Tx,
        ctx: &RequestContext,
        id: OrderId,
        cmd: &StatusUpdate,
    ) -> Result<Committed<Order>> {
        let mut order = self.load_for_update(tx, id).await?;
        let from = order.status();
        let to = cmd.status;
        let now = Utc::now();

        let notifications = match to {
            OrderStatus::Cancelled => {
                let reason = cmd.note.clone().unwrap_or_else(|| "status update".to_string());
                self.apply_cancel(tx, ctx, &mut order, &CancelOrder::new(reason), now)
                    .await?
            }
            OrderStatus::Shipped => {
                if !from.can_ship() {
                    return Err(OrderError::InvalidStatusTransition { from, to }.into());
                }
                self.apply_shipment(tx, ctx, &mut order, &ShipItems::everything(), now)
                    .await?
            }
            OrderStatus::PartiallyShipped => {
                return Err(ServiceError::Validation(
                    "partial shipments must list the lines to ship".to_string(),
                ));
            }
            OrderStatus::Delivered => self.apply_delivery(ctx, &mut order, cmd.note.clone(), now)?,
            OrderStatus::Refunded => {
                if !from.can_transition_to(to) {
                    return Err(OrderError::InvalidStatusTransition { from, to }.into());
                }
                self.apply_refund(ctx, &mut order, None, now).await?
            }
            _ => {
                order.transition(to, &ctx.actor, now, cmd.note.clone())?;
                vec![Notification::for_order(
                    &order,
                    NotificationKind::StatusChanged { from, to },
                )]
            }
        };
        tx.update_order(&mut order).await?;
        Ok(Committed::new(order, notifications))
    }

    async fn cancel_in_tx(
        &self,
        tx: &mut R::Tx,
        ctx: &RequestContext,
        id: OrderId,
        cmd: &CancelOrder,
    ) -> Result<Committed<Order>> {
        let mut order = self.load_for_update(tx, id).await?;
        let notifications = self
            .apply_cancel(tx, ctx, &mut order, cmd, Utc::now())
            .await?;
        tx.update_order(&mut order).await?;
        Ok(Committed::new(order, notifications))
    }

    /// Cancels, releases every outstanding reservation and optionally
    /// refunds what was paid.
    pub(super) async fn apply_cancel(
        &self,
        tx: &mut R::Tx,
        ctx: &RequestContext,
        order: &mut Order,
        cmd: &CancelOrder,
        at: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        order.cancel(&cmd.reason, &ctx.actor, at)?;
        let released = self.inventory.release(tx, order.id(), None, at).await?;
        let mut notifications = vec![Notification::for_order(order, NotificationKind::Cancelled)];

        let paid = order.paid_amount();
        if cmd.refund && paid.is_positive() {
            self.collaborators
                .payments
                .refund(order.id(), paid, &ctx.request_id)
                .await?;
            order.record_refund(paid, at)?;
            notifications.push(Notification::for_order(
                order,
                NotificationKind::Refunded { amount: paid },
            ));
        }

        tracing::info!(
            order_id = %order.id(),
            released_lines = released.len(),
            refunded = cmd.refund && paid.is_positive(),
            "Order cancelled"
        );
        Ok(notifications)
    }
}
