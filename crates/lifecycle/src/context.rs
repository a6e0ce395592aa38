//! Per-request context.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Result, ServiceError};

/// Who is asking, under which id, and until when.
///
/// `request_id` is also the idempotency nonce for payment calls, so a
/// retried operation never charges twice.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub actor: String,
    pub request_id: String,
    pub deadline: Instant,
}

impl RequestContext {
    /// Creates a context with a fresh request id and a 30 second deadline.
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            request_id: Uuid::new_v4().to_string(),
            deadline: Instant::now() + Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now() + timeout;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Runs `work`, failing with `DeadlineExceeded` if the deadline passes first.
    ///
    /// The future is dropped on expiry, which rolls back any transaction it owns.
    pub async fn within<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout_at(self.deadline, work)
            .await
            .map_err(|_| ServiceError::DeadlineExceeded)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_within_times_out() {
        let ctx = RequestContext::new("tester").with_timeout(Duration::from_millis(10));
        let result: Result<()> = ctx
            .within(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(ServiceError::DeadlineExceeded));
        assert!(ctx.is_expired());
    }

    #[tokio::test]
    async fn test_within_passes_result_through() {
        let ctx = RequestContext::new("tester").with_request_id("req-1");
        assert_eq!(ctx.within(async { Ok(5) }).await, Ok(5));
        assert_eq!(ctx.request_id, "req-1");
        assert!(ctx.remaining() > Duration::from_secs(1));
    }
}
