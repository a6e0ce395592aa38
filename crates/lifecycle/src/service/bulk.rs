//! Multi-order operations.
//!
//! Orders are processed one at a time in ascending id order, so a bulk
//! call never holds more than one order lock. A failure on one order does
//! not undo the others.

use async_trait::async_trait;
use common::OrderId;
use domain::{CancelOrder, OrderStatus, StatusUpdate};
use store::Repository;

use super::{LifecycleOps, OrderService};
use crate::context::RequestContext;
use crate::error::{ErrorKind, ServiceError};

/// Outcome for one order of a bulk call.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemResult {
    pub order_id: OrderId,
    /// The status the order ended in, or why it was left alone.
    pub outcome: Result<OrderStatus, ServiceError>,
}

impl BulkItemResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.outcome.as_ref().err().map(ServiceError::kind)
    }

    pub fn error_message(&self) -> Option<String> {
        self.outcome.as_ref().err().map(ServiceError::user_message)
    }
}

/// Per-order results plus counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResult {
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub results: Vec<BulkItemResult>,
}

impl BulkResult {
    fn push(&mut self, result: BulkItemResult) {
        if result.is_ok() {
            self.succeeded_count += 1;
        } else {
            self.failed_count += 1;
        }
        self.results.push(result);
    }
}

#[async_trait]
pub trait BulkOps: Send + Sync {
    async fn bulk_update_status(
        &self,
        ctx: &RequestContext,
        ids: Vec<OrderId>,
        cmd: StatusUpdate,
    ) -> BulkResult;

    async fn bulk_cancel(&self, ctx: &RequestContext, ids: Vec<OrderId>, cmd: CancelOrder) -> BulkResult;
}

#[async_trait]
impl<R: Repository> BulkOps for OrderService<R> {
    #[tracing::instrument(skip(self, ctx, ids, cmd), fields(count = ids.len(), to = %cmd.status))]
    async fn bulk_update_status(
        &self,
        ctx: &RequestContext,
        ids: Vec<OrderId>,
        cmd: StatusUpdate,
    ) -> BulkResult {
        let mut result = BulkResult::default();
        for id in lock_order(ids) {
            let outcome = self
                .update_status(ctx, id, cmd.clone())
                .await
                .map(|order| order.status());
            result.push(BulkItemResult { order_id: id, outcome });
        }
        log_summary("bulk_update_status", &result);
        result
    }

    #[tracing::instrument(skip(self, ctx, ids, cmd), fields(count = ids.len()))]
    async fn bulk_cancel(&self, ctx: &RequestContext, ids: Vec<OrderId>, cmd: CancelOrder) -> BulkResult {
        let mut result = BulkResult::default();
        for id in lock_order(ids) {
            let outcome = self
                .cancel_order(ctx, id, cmd.clone())
                .await
                .map(|order| order.status());
            result.push(BulkItemResult { order_id: id, outcome });
        }
        log_summary("bulk_cancel", &result);
        result
    }
}

/// Sorted, without duplicates.
fn lock_order(mut ids: Vec<OrderId>) -> Vec<OrderId> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn log_summary(op: &'static str, result: &BulkResult) {
    tracing::info!(
        op,
        succeeded = result.succeeded_count,
        failed = result.failed_count,
        "Bulk operation finished"
    );
}
