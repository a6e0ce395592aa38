//! Customer notifications.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{CustomerId, Money, OrderId};
use domain::{Order, OrderNumber, OrderStatus};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// What happened to the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum NotificationKind {
    Created,
    Updated,
    StatusChanged { from: OrderStatus, to: OrderStatus },
    Cancelled,
    Shipped { tracking_number: Option<String> },
    Delivered,
    PaymentReceived { amount: Money },
    PaymentDeclined,
    Refunded { amount: Money },
    ItemsReturned,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Created => "created",
            NotificationKind::Updated => "updated",
            NotificationKind::StatusChanged { .. } => "status_changed",
            NotificationKind::Cancelled => "cancelled",
            NotificationKind::Shipped { .. } => "shipped",
            NotificationKind::Delivered => "delivered",
            NotificationKind::PaymentReceived { .. } => "payment_received",
            NotificationKind::PaymentDeclined => "payment_declined",
            NotificationKind::Refunded { .. } => "refunded",
            NotificationKind::ItemsReturned => "items_returned",
        }
    }
}

/// A message about one order, sent after its transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub customer_id: CustomerId,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn for_order(order: &Order, kind: NotificationKind) -> Self {
        Self {
            order_id: order.id(),
            order_number: order.order_number(),
            customer_id: order.customer_id(),
            kind,
        }
    }
}

/// Fire-and-forget delivery channel.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemoryNotificationState {
    sent: Vec<Notification>,
    fail: bool,
}

/// Records notifications for inspection in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    state: Arc<RwLock<InMemoryNotificationState>>,
}

impl InMemoryNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).fail = fail;
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .clone()
    }

    /// Notifications sent about one order, oldest first.
    pub fn sent_for(&self, order_id: OrderId) -> Vec<NotificationKind> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .iter()
            .filter(|n| n.order_id == order_id)
            .map(|n| n.kind.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail {
            return Err(ServiceError::collaborator("notification", "mail relay down"));
        }
        state.sent.push(notification.clone());
        Ok(())
    }
}
