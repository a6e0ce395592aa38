//! Service error types.

use common::{AddressId, CurrencyError, CustomerId, Money, OrderId, ProductId};
use domain::{InventoryError, OrderError, PricingError, Shortfall};
use store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Coarse error categories reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    PreconditionViolation,
    InsufficientInventory,
    CreditLimitExceeded,
    CollaboratorFailure,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PreconditionViolation => "precondition_violation",
            ErrorKind::InsufficientInventory => "insufficient_inventory",
            ErrorKind::CreditLimitExceeded => "credit_limit_exceeded",
            ErrorKind::CollaboratorFailure => "collaborator_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the order service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Malformed request.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid currency: {0}")]
    InvalidCurrency(#[from] CurrencyError),

    #[error("Customer not found: {0}")]
    CustomerNotFound(CustomerId),

    #[error("Customer {0} is suspended")]
    CustomerSuspended(CustomerId),

    /// The address is unknown or belongs to another customer.
    #[error("Address {0} is not valid for this customer")]
    AddressInvalid(AddressId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Product {0} is not available for sale")]
    ProductUnavailable(ProductId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Unknown discount code: {0}")]
    UnknownDiscountCode(String),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// Outstanding balances plus this order exceed the customer's limit.
    #[error("Credit limit {limit} exceeded: {used} in use, {requested} requested")]
    CreditLimitExceeded {
        limit: Money,
        used: Money,
        requested: Money,
    },

    /// Another transaction changed the order first.
    #[error("Concurrent update: {0}")]
    Conflict(String),

    /// Another transaction changed an inventory row first.
    #[error("Concurrent inventory update: {0}")]
    InventoryConflict(String),

    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(String),

    /// The request deadline passed before the transaction committed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Too many operations in flight.
    #[error("Service overloaded, try again later")]
    Overloaded,

    /// A collaborator call failed.
    #[error("{service} service error: {message}")]
    Collaborator {
        service: &'static str,
        message: String,
    },

    /// Unexpected failure; details are in the logs under the correlation id.
    #[error("Internal error (reference {correlation_id})")]
    Internal { correlation_id: Uuid },
}

impl ServiceError {
    /// Logs `detail` under a fresh correlation id and returns an opaque error.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        let correlation_id = Uuid::new_v4();
        tracing::error!(%correlation_id, error = %detail, "Internal error");
        ServiceError::Internal { correlation_id }
    }

    pub fn collaborator(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Collaborator {
            service,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_)
            | ServiceError::InvalidCurrency(_)
            | ServiceError::AddressInvalid(_)
            | ServiceError::ProductUnavailable(_)
            | ServiceError::UnknownDiscountCode(_)
            | ServiceError::Pricing(_) => ErrorKind::Validation,

            ServiceError::CustomerNotFound(_)
            | ServiceError::ProductNotFound(_)
            | ServiceError::OrderNotFound(_) => ErrorKind::NotFound,

            ServiceError::CustomerSuspended(_) => ErrorKind::PreconditionViolation,

            ServiceError::Order(err) => match err {
                OrderError::ItemNotFound(_) => ErrorKind::NotFound,
                OrderError::InvalidQuantity { .. }
                | OrderError::InvalidAmount(_)
                | OrderError::ExcessPrecision { .. }
                | OrderError::QuantityExceeded { .. }
                | OrderError::Overpayment { .. }
                | OrderError::RefundExceedsPaid { .. }
                | OrderError::InvalidOrderNumber(_)
                | OrderError::NoItems => ErrorKind::Validation,
                OrderError::InvalidStatusTransition { .. }
                | OrderError::AlreadyCancelled
                | OrderError::NotEditable { .. }
                | OrderError::PaymentRequired { .. }
                | OrderError::NotFullyShipped
                | OrderError::AddressesLocked => ErrorKind::PreconditionViolation,
            },

            ServiceError::Inventory(err) => match err {
                InventoryError::Insufficient { .. } => ErrorKind::InsufficientInventory,
                InventoryError::NotTracked(_) => ErrorKind::NotFound,
                InventoryError::ReservationMissing { .. } => ErrorKind::PreconditionViolation,
                InventoryError::QuantityOverflow(_) => ErrorKind::Validation,
            },

            ServiceError::CreditLimitExceeded { .. } => ErrorKind::CreditLimitExceeded,
            ServiceError::Conflict(_) | ServiceError::InventoryConflict(_) => ErrorKind::Conflict,
            ServiceError::LockTimeout(_) | ServiceError::DeadlineExceeded | ServiceError::Overloaded => {
                ErrorKind::Timeout
            }
            ServiceError::Collaborator { .. } => ErrorKind::CollaboratorFailure,
            ServiceError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Message safe to show to the caller.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// Returns true if the whole operation may be run again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Conflict(_) | ServiceError::InventoryConflict(_)
        )
    }

    /// Per-item shortfalls of an `InsufficientInventory` error.
    pub fn shortfalls(&self) -> Option<&[Shortfall]> {
        match self {
            ServiceError::Inventory(InventoryError::Insufficient { shortfalls }) => {
                Some(shortfalls)
            }
            _ => None,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict {
                entity: "inventory",
                id,
            } => ServiceError::InventoryConflict(id),
            StoreError::Conflict { entity, id } => {
                ServiceError::Conflict(format!("{entity} {id}"))
            }
            StoreError::DuplicateOrderNumber(number) => {
                ServiceError::Conflict(format!("order number {number} already taken"))
            }
            StoreError::LockTimeout(what) => ServiceError::LockTimeout(what),
            other => ServiceError::internal(other),
        }
    }
}

/// Convenience type alias for service results.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{InventoryKey, OrderStatus};

    #[test]
    fn test_kinds() {
        assert_eq!(
            ServiceError::from(OrderError::InvalidStatusTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Delivered,
            })
            .kind(),
            ErrorKind::PreconditionViolation
        );
        assert_eq!(
            ServiceError::from(OrderError::InvalidQuantity { quantity: 0 }).kind(),
            ErrorKind::Validation
        );
        assert_eq!(ServiceError::Overloaded.kind(), ErrorKind::Timeout);
        assert_eq!(
            ServiceError::CustomerNotFound(CustomerId::new()).kind(),
            ErrorKind::NotFound
        );
        let insufficient = ServiceError::from(InventoryError::Insufficient { shortfalls: vec![] });
        assert_eq!(insufficient.kind(), ErrorKind::InsufficientInventory);
        assert_eq!(insufficient.shortfalls().map(<[_]>::len), Some(0));
    }

    #[test]
    fn test_store_errors_map_to_conflicts() {
        let inventory = ServiceError::from(StoreError::Conflict {
            entity: "inventory",
            id: "w/p".into(),
        });
        assert!(matches!(inventory, ServiceError::InventoryConflict(_)));
        assert!(inventory.is_retryable());

        let order = ServiceError::from(StoreError::Conflict {
            entity: "order",
            id: "x".into(),
        });
        assert!(matches!(order, ServiceError::Conflict(_)));
        assert!(order.is_retryable());

        assert!(!ServiceError::from(InventoryError::NotTracked(InventoryKey::new(
            Default::default(),
            Default::default()
        )))
        .is_retryable());
    }

    #[test]
    fn test_internal_hides_detail() {
        let err = ServiceError::from(StoreError::Internal("table corrupted".into()));
        assert_eq!(err.kind(), ErrorKind::Internal);
        let message = err.user_message();
        assert!(message.starts_with("Internal error (reference "));
        assert!(!message.contains("corrupted"));
    }
}
