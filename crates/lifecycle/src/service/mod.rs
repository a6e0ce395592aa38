//! Order aggregate service.
//!
//! Every mutation follows the same path: admission, retry loop, order
//! lock, repository transaction, deadline, commit, then post-commit
//! notifications. Operations are grouped by capability:
//! [`LifecycleOps`], [`ItemOps`], [`FulfillmentOps`], [`PaymentOps`]
//! and [`BulkOps`]. Reads are inherent methods.

mod bulk;
mod fulfillment;
mod items;
mod lifecycle;
mod payment;
mod queries;

use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{AddressId, CustomerId, Money, OrderId};
use domain::{NewOrderLine, Order, OrderAddress, OrderItem, PricingError, finalize, price_lines};
use store::{OrderFilter, Repository, Transaction};

use crate::collaborators::{Collaborators, Customer, Notification};
use crate::config::ServiceConfig;
use crate::context::RequestContext;
use crate::error::{Result, ServiceError};
use crate::guard::{Admission, OrderLocks};
use crate::inventory::{InventoryCoordinator, StockRequest};
use crate::notifications::NotificationQueue;
use crate::retry::RetryPolicy;

pub use bulk::{BulkItemResult, BulkOps, BulkResult};
pub use fulfillment::FulfillmentOps;
pub use items::ItemOps;
pub use lifecycle::LifecycleOps;
pub use payment::{PaymentOps, PaymentOutcome};

/// The order aggregate service.
pub struct OrderService<R: Repository> {
    repo: R,
    collaborators: Collaborators,
    inventory: InventoryCoordinator,
    locks: OrderLocks,
    admission: Admission,
    retry: RetryPolicy,
    notifications: NotificationQueue,
    config: ServiceConfig,
}

/// Result of one committed attempt and the notifications it owes.
struct Committed<T> {
    value: T,
    notifications: Vec<Notification>,
}

impl<T> Committed<T> {
    fn new(value: T, notifications: Vec<Notification>) -> Self {
        Self {
            value,
            notifications,
        }
    }

    fn silent(value: T) -> Self {
        Self::new(value, Vec::new())
    }
}

impl<R: Repository> OrderService<R> {
    /// Creates the service and starts its notification worker.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(repo: R, collaborators: Collaborators, config: ServiceConfig) -> Self {
        let notifications = NotificationQueue::spawn(
            collaborators.notifications.clone(),
            config.notification_queue_capacity,
        );
        Self {
            repo,
            inventory: InventoryCoordinator::new(),
            locks: OrderLocks::new(config.lock_stripes, config.lock_timeout),
            admission: Admission::new(config.max_in_flight, config.queue_timeout),
            retry: config.retry,
            notifications,
            collaborators,
            config,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// A request context with the configured operation timeout.
    pub fn context(&self, actor: impl Into<String>) -> RequestContext {
        RequestContext::new(actor).with_timeout(self.config.operation_timeout)
    }

    /// Waits until queued notifications have been handed to the notifier.
    pub async fn flush_notifications(&self) {
        self.notifications.flush().await;
    }

    /// Runs one mutation: admission, retries, metrics, then notifications
    /// for the attempt that committed.
    async fn execute<T, F, Fut>(&self, ctx: &RequestContext, op: &'static str, attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Committed<T>>>,
    {
        let start = Instant::now();
        let result = match self.admission.admit(ctx.deadline).await {
            Ok(_permit) => self.retry.run(op, ctx.deadline, attempt).await,
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().as_str(),
        };
        metrics::counter!("order_operations_total", "op" => op, "outcome" => outcome).increment(1);
        metrics::histogram!("order_operation_duration_seconds", "op" => op)
            .record(start.elapsed().as_secs_f64());

        let committed = result?;
        for notification in committed.notifications {
            self.notifications.enqueue(notification);
        }
        Ok(committed.value)
    }

    /// Commits on success, rolls back on failure.
    async fn finish<T>(&self, tx: R::Tx, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Takes the row lock and loads the order.
    async fn load_for_update(&self, tx: &mut R::Tx, id: OrderId) -> Result<Order> {
        tx.lock_order(id).await?;
        tx.get_order(id)
            .await?
            .ok_or(ServiceError::OrderNotFound(id))
    }

    async fn active_customer(&self, id: CustomerId) -> Result<Customer> {
        let customer = self
            .collaborators
            .customers
            .get_customer(id)
            .await?
            .ok_or(ServiceError::CustomerNotFound(id))?;
        if customer.is_suspended() {
            return Err(ServiceError::CustomerSuspended(id));
        }
        Ok(customer)
    }

    async fn credit_limit_for(&self, id: CustomerId) -> Result<Option<Money>> {
        let customer = self
            .collaborators
            .customers
            .get_customer(id)
            .await?
            .ok_or(ServiceError::CustomerNotFound(id))?;
        Ok(customer.credit_limit)
    }

    /// Resolves an address that must belong to the customer.
    async fn customer_address(&self, customer_id: CustomerId, id: AddressId) -> Result<OrderAddress> {
        match self.collaborators.customers.get_address(id).await? {
            Some(address) if address.customer_id == customer_id => Ok(address.snapshot()),
            _ => Err(ServiceError::AddressInvalid(id)),
        }
    }

    /// Builds an item for `order` from a catalog product.
    async fn build_item(&self, order: &Order, line: &NewOrderLine) -> Result<OrderItem> {
        let product = self
            .collaborators
            .products
            .get_product(line.product_id)
            .await?
            .ok_or(ServiceError::ProductNotFound(line.product_id))?;
        if !product.active {
            return Err(ServiceError::ProductUnavailable(product.id));
        }
        let unit_price = match line.unit_price {
            Some(price) => price,
            None if product.currency == order.currency() => product.unit_price,
            None => {
                return Err(PricingError::CurrencyMismatch {
                    expected: order.currency(),
                    found: product.currency,
                }
                .into());
            }
        };
        let warehouse_id = line.warehouse_id.unwrap_or(product.default_warehouse_id);
        Ok(OrderItem::new(
            order.id(),
            product.id,
            warehouse_id,
            line.quantity,
            unit_price,
        ))
    }

    /// Recomputes line totals, discount, tax, shipping and the total.
    async fn reprice(&self, order: &mut Order, at: DateTime<Utc>) -> Result<()> {
        let currency = order.currency();
        let priced = price_lines(currency, &order.pricing_lines())?;
        let discount = match order.discount_code() {
            Some(code) => self
                .collaborators
                .discounts
                .resolve(code)
                .await?
                .ok_or_else(|| ServiceError::UnknownDiscountCode(code.to_string()))?
                .amount_for(priced.subtotal, currency)?,
            None => Money::zero(),
        };

        let snapshot = order.pricing_snapshot(&priced, discount);
        let tax = self.collaborators.tax.calculate(&snapshot).await?;
        let shipping = self.collaborators.shipping.calculate(&snapshot).await?;
        let totals = finalize(currency, priced.subtotal, discount, tax.amount, shipping)?;
        order.apply_pricing(&priced, tax.rate, totals, at)?;
        Ok(())
    }

    /// Fails if the customer's unpaid balances plus this order exceed the limit.
    async fn check_credit(&self, tx: &R::Tx, limit: Option<Money>, order: &Order) -> Result<()> {
        let Some(limit) = limit else {
            return Ok(());
        };
        let used: Money = tx
            .list_orders(&OrderFilter::for_customer(order.customer_id()))
            .await?
            .iter()
            .filter(|o| o.id() != order.id())
            .map(Order::credit_exposure)
            .sum();
        let requested = order.credit_exposure();
        if used + requested > limit {
            tracing::info!(
                customer_id = %order.customer_id(),
                %limit,
                %used,
                %requested,
                "Credit limit exceeded"
            );
            return Err(ServiceError::CreditLimitExceeded {
                limit,
                used,
                requested,
            });
        }
        Ok(())
    }
}

/// Stock request for an item's full quantity.
fn stock_for(item: &OrderItem, quantity: u32) -> StockRequest {
    StockRequest::new(item.product_id, item.warehouse_id, quantity)
}
