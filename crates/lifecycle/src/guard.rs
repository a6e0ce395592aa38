//! Concurrency guard: striped per-order locks and admission control.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::OrderId;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::{Result, ServiceError};

/// Logical per-order locks, striped by id hash.
///
/// Two orders may share a stripe, so a task must never hold more than one
/// order lock at a time.
#[derive(Debug, Clone)]
pub struct OrderLocks {
    stripes: Arc<Vec<Arc<Mutex<()>>>>,
    timeout: Duration,
}

/// Held while an order is being mutated.
#[derive(Debug)]
pub struct OrderLockGuard {
    order_id: OrderId,
    _guard: OwnedMutexGuard<()>,
}

impl OrderLockGuard {
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }
}

impl OrderLocks {
    pub fn new(stripes: usize, timeout: Duration) -> Self {
        let stripes = (0..stripes.max(1))
            .map(|_| Arc::new(Mutex::new(())))
            .collect();
        Self {
            stripes: Arc::new(stripes),
            timeout,
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe_for(&self, order_id: OrderId) -> usize {
        (order_id.as_uuid().as_u128() % self.stripes.len() as u128) as usize
    }

    /// Acquires the lock for `order_id`, failing with `LockTimeout`.
    pub async fn lock(&self, order_id: OrderId) -> Result<OrderLockGuard> {
        let stripe = self.stripes[self.stripe_for(order_id)].clone();
        match tokio::time::timeout(self.timeout, stripe.lock_owned()).await {
            Ok(guard) => Ok(OrderLockGuard {
                order_id,
                _guard: guard,
            }),
            Err(_) => {
                tracing::warn!(%order_id, timeout_ms = self.timeout.as_millis() as u64, "Order lock timeout");
                Err(ServiceError::LockTimeout(format!("order {order_id}")))
            }
        }
    }

    /// Runs `f` while holding the lock for `order_id`.
    pub async fn with_order_lock<T, F, Fut>(&self, order_id: OrderId, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.lock(order_id).await?;
        f().await
    }
}

/// Bounds the number of mutations in flight.
#[derive(Debug, Clone)]
pub struct Admission {
    permits: Arc<Semaphore>,
    queue_timeout: Duration,
}

impl Admission {
    pub fn new(max_in_flight: usize, queue_timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            queue_timeout,
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for a slot until the queue timeout or `deadline`, whichever is first.
    pub async fn admit(&self, deadline: Instant) -> Result<OwnedSemaphorePermit> {
        let until = deadline.min(Instant::now() + self.queue_timeout);
        match tokio::time::timeout_at(until, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(closed)) => Err(ServiceError::internal(closed)),
            Err(_) => {
                tracing::warn!("Admission queue timeout");
                Err(ServiceError::Overloaded)
            }
        }
    }
}
