//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{Money, OrderId};
use domain::PaymentMethod;

use crate::error::{Result, ServiceError};

/// A charge request.
///
/// Implementations must treat `(order_id, amount, method, nonce)` as an
/// idempotency key and answer a repeated request with the original receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub nonce: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Approved,
    Declined,
}

/// Result of a charge or refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub transaction_id: String,
    pub status: ReceiptStatus,
}

impl PaymentReceipt {
    pub fn is_approved(&self) -> bool {
        self.status == ReceiptStatus::Approved
    }
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges the customer.
    async fn process(&self, request: &PaymentRequest) -> Result<PaymentReceipt>;

    /// Returns money to the customer, idempotent by `(order_id, amount, nonce)`.
    async fn refund(&self, order_id: OrderId, amount: Money, nonce: &str) -> Result<PaymentReceipt>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IdempotencyKey {
    Charge(OrderId, String, PaymentMethod, String),
    Refund(OrderId, String, String),
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    receipts: HashMap<IdempotencyKey, PaymentReceipt>,
    charges: Vec<(OrderId, Money)>,
    refunds: Vec<(OrderId, Money)>,
    next_id: u32,
    fail_on_process: bool,
    fail_on_refund: bool,
    decline: bool,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `process` fail with a collaborator error.
    pub fn set_fail_on_process(&self, fail: bool) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).fail_on_process = fail;
    }

    /// Makes `refund` fail with a collaborator error.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).fail_on_refund = fail;
    }

    /// Makes `process` answer with a declined receipt.
    pub fn set_decline(&self, decline: bool) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).decline = decline;
    }

    /// Number of approved charges actually taken.
    pub fn charge_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .charges
            .len()
    }

    /// Sum of approved charges for the order.
    pub fn charged_for(&self, order_id: OrderId) -> Money {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .charges
            .iter()
            .filter(|(id, _)| *id == order_id)
            .map(|(_, amount)| *amount)
            .sum()
    }

    /// Sum of refunds issued for the order.
    pub fn refunded_for(&self, order_id: OrderId) -> Money {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .refunds
            .iter()
            .filter(|(id, _)| *id == order_id)
            .map(|(_, amount)| *amount)
            .sum()
    }

    pub fn refund_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refunds
            .len()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn process(&self, request: &PaymentRequest) -> Result<PaymentReceipt> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on_process {
            return Err(ServiceError::collaborator("payment", "gateway timeout"));
        }

        let key = IdempotencyKey::Charge(
            request.order_id,
            request.amount.to_string(),
            request.method,
            request.nonce.clone(),
        );
        if let Some(receipt) = state.receipts.get(&key) {
            return Ok(receipt.clone());
        }

        state.next_id += 1;
        let status = if state.decline {
            ReceiptStatus::Declined
        } else {
            state.charges.push((request.order_id, request.amount));
            ReceiptStatus::Approved
        };
        let receipt = PaymentReceipt {
            transaction_id: format!("PAY-{:04}", state.next_id),
            status,
        };
        state.receipts.insert(key, receipt.clone());
        Ok(receipt)
    }

    async fn refund(&self, order_id: OrderId, amount: Money, nonce: &str) -> Result<PaymentReceipt> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail_on_refund {
            return Err(ServiceError::collaborator("payment", "refund rejected by gateway"));
        }

        let key = IdempotencyKey::Refund(order_id, amount.to_string(), nonce.to_string());
        if let Some(receipt) = state.receipts.get(&key) {
            return Ok(receipt.clone());
        }

        state.next_id += 1;
        state.refunds.push((order_id, amount));
        let receipt = PaymentReceipt {
            transaction_id: format!("REF-{:04}", state.next_id),
            status: ReceiptStatus::Approved,
        };
        state.receipts.insert(key, receipt.clone());
        Ok(receipt)
    }
}
