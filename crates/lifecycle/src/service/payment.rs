//! Payments and refunds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId};
use domain::{Order, OrderError, OrderStatus, ProcessPayment, RefundOrder};
use store::{Repository, Transaction};

use super::{Committed, OrderService};
use crate::collaborators::{Notification, NotificationKind, PaymentReceipt, PaymentRequest};
use crate::context::RequestContext;
use crate::error::Result;

/// The order after a payment attempt and the gateway's answer.
///
/// A declined payment is not an error: the order is saved with
/// `PaymentStatus::Failed` if nothing had been paid yet.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub order: Order,
    pub receipt: PaymentReceipt,
}

/// Money in and out.
#[async_trait]
pub trait PaymentOps: Send + Sync {
    /// Charges the customer and records the payment. Never changes the order status.
    async fn process_payment(
        &self,
        ctx: &RequestContext,
        id: OrderId,
        cmd: ProcessPayment,
    ) -> Result<PaymentOutcome>;

    /// Refunds part or all of what was paid.
    async fn refund_order(&self, ctx: &RequestContext, id: OrderId, cmd: RefundOrder) -> Result<Order>;
}

#[async_trait]
impl<R: Repository> PaymentOps for OrderService<R> {
    #[tracing::instrument(skip(self, ctx, cmd), fields(order_id = %id, amount = %cmd.amount, actor = %ctx.actor))]
    async fn process_payment(
        &self,
        ctx: &RequestContext,
        id: OrderId,
        cmd: ProcessPayment,
    ) -> Result<PaymentOutcome> {
        let cmd = &cmd;
        self.execute(ctx, "process_payment", move || {
            self.locks.with_order_lock(id, move || async move {
                let mut tx = self.repo.begin().await?;
                let result = ctx.within(self.payment_in_tx(&mut tx, ctx, id, cmd)).await;
                self.finish(tx, result).await
            })
        })
        .await
    }

    #[tracing::instrument(skip(self, ctx, cmd), fields(order_id = %id, reason = %cmd.reason, actor = %ctx.actor))]
    async fn refund_order(&self, ctx: &RequestContext, id: OrderId, cmd: RefundOrder) -> Result<Order> {
        let cmd = &cmd;
        self.execute(ctx, "refund_order", move || {
            self.locks.with_order_lock(id, move || async move {
                let mut tx = self.repo.begin().await?;
                let result = ctx.within(self.refund_in_tx(&mut tx, ctx, id, cmd)).await;
                self.finish(tx, result).await
            })
        })
        .await
    }
}

impl<R: Repository> OrderService<R> {
    async fn payment_in_tx(
        &self,
        tx: &mut R::Tx,
        ctx: &RequestContext,
        id: OrderId,
        cmd: &ProcessPayment,
    ) -> Result<Committed<PaymentOutcome>> {
        let mut order = self.load_for_update(tx, id).await?;
        let now = Utc::now();

        // Validate against a copy before any money moves.
        let mut paid = order.clone();
        paid.record_payment(cmd.amount, now)?;

        let request = PaymentRequest {
            order_id: id,
            amount: cmd.amount.round_to(order.currency()),
            method: cmd.method,
            nonce: ctx.request_id.clone(),
        };
        let receipt = self.collaborators.payments.process(&request).await?;

        let notification = if receipt.is_approved() {
            order = paid;
            NotificationKind::PaymentReceived {
                amount: request.amount,
            }
        } else {
            tracing::info!(order_id = %id, transaction_id = %receipt.transaction_id, "Payment declined");
            order.record_payment_failure(now);
            NotificationKind::PaymentDeclined
        };
        tx.update_order(&mut order).await?;

        let notification = Notification::for_order(&order, notification);
        Ok(Committed::new(
            PaymentOutcome { order, receipt },
            vec![notification],
        ))
    }

    async fn refund_in_tx(
        &self,
        tx: &mut R::Tx,
        ctx: &RequestContext,
        id: OrderId,
        cmd: &RefundOrder,
    ) -> Result<Committed<Order>> {
        let mut order = self.load_for_update(tx, id).await?;
        let amount = cmd.amount.unwrap_or_else(|| order.paid_amount());
        if !amount.is_positive() {
            return Err(OrderError::InvalidAmount(amount).into());
        }
        let notifications = self
            .apply_refund(ctx, &mut order, Some(amount), Utc::now())
            .await?;
        tx.update_order(&mut order).await?;
        Ok(Committed::new(order, notifications))
    }

    /// Refunds `amount`, or everything paid when `None`.
    ///
    /// Refunding everything on a Shipped or Delivered order moves it to
    /// Refunded. The order is checked before the gateway is called.
    pub(super) async fn apply_refund(
        &self,
        ctx: &RequestContext,
        order: &mut Order,
        amount: Option<Money>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        let amount = amount.unwrap_or_else(|| order.paid_amount());
        let full = amount >= order.paid_amount();
        let settles = full && matches!(order.status(), OrderStatus::Shipped | OrderStatus::Delivered);

        let mut refunded = order.clone();
        if amount.is_positive() {
            refunded.record_refund(amount, at)?;
        }
        let from = refunded.status();
        if settles {
            refunded.transition(OrderStatus::Refunded, &ctx.actor, at, None)?;
        }

        if amount.is_positive() {
            let receipt = self
                .collaborators
                .payments
                .refund(order.id(), amount.round_to(order.currency()), &ctx.request_id)
                .await?;
            tracing::info!(
                order_id = %order.id(),
                %amount,
                transaction_id = %receipt.transaction_id,
                "Refund issued"
            );
        }
        *order = refunded;

        let mut notifications = Vec::new();
        if amount.is_positive() {
            notifications.push(Notification::for_order(order, NotificationKind::Refunded { amount }));
        }
        if settles {
            notifications.push(Notification::for_order(
                order,
                NotificationKind::StatusChanged {
                    from,
                    to: OrderStatus::Refunded,
                },
            ));
        }
        Ok(notifications)
    }
}
