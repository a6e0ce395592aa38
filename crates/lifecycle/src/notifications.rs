//! Post-commit notification queue.
//!
//! Committed operations enqueue their notifications here; a background
//! task delivers them. A full queue drops the message and a failed
//! delivery is logged; neither affects the committed state.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::collaborators::{Notification, NotificationService};

enum Message {
    Deliver(Notification),
    Flush(oneshot::Sender<()>),
}

/// Bounded queue in front of a [`NotificationService`].
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Message>,
}

impl NotificationQueue {
    /// Starts the delivery task. Must be called inside a Tokio runtime.
    pub fn spawn(service: Arc<dyn NotificationService>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel(capacity.max(1));
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    Message::Deliver(notification) => {
                        if let Err(e) = service.notify(&notification).await {
                            tracing::warn!(
                                order_id = %notification.order_id,
                                kind = notification.kind.as_str(),
                                error = %e,
                                "Notification failed"
                            );
                            metrics::counter!("notifications_failed_total").increment(1);
                        }
                    }
                    Message::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { sender }
    }

    /// Queues a notification without waiting.
    pub fn enqueue(&self, notification: Notification) {
        if let Err(e) = self.sender.try_send(Message::Deliver(notification)) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            };
            tracing::warn!(reason, "Notification dropped");
            metrics::counter!("notifications_dropped_total").increment(1);
        }
    }

    /// Waits until everything queued before this call has been handled.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Message::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }
}
