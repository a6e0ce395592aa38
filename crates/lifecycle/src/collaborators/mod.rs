//! External services the order core depends on.
//!
//! Each service is a trait with an in-memory implementation used by tests
//! and benchmarks.

mod customer;
mod discount;
mod notification;
mod payment;
mod product;
mod quotes;

use std::sync::Arc;

pub use customer::{
    Customer, CustomerAddress, CustomerService, CustomerStatus, InMemoryCustomerService,
};
pub use discount::{DiscountService, InMemoryDiscountService};
pub use notification::{
    InMemoryNotificationService, Notification, NotificationKind, NotificationService,
};
pub use payment::{
    InMemoryPaymentService, PaymentReceipt, PaymentRequest, PaymentService, ReceiptStatus,
};
pub use product::{InMemoryProductService, Product, ProductService};
pub use quotes::{FlatRateShipping, FlatRateTax, ShippingCalculator, TaxCalculator, TaxQuote};

/// Every collaborator the order service calls.
#[derive(Clone)]
pub struct Collaborators {
    pub customers: Arc<dyn CustomerService>,
    pub products: Arc<dyn ProductService>,
    pub tax: Arc<dyn TaxCalculator>,
    pub shipping: Arc<dyn ShippingCalculator>,
    pub payments: Arc<dyn PaymentService>,
    pub notifications: Arc<dyn NotificationService>,
    pub discounts: Arc<dyn DiscountService>,
}

/// Handles to the in-memory collaborators behind a [`Collaborators`] bundle.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCollaborators {
    pub customers: InMemoryCustomerService,
    pub products: InMemoryProductService,
    pub tax: FlatRateTax,
    pub shipping: FlatRateShipping,
    pub payments: InMemoryPaymentService,
    pub notifications: InMemoryNotificationService,
    pub discounts: InMemoryDiscountService,
}

impl InMemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundles clones of the doubles; state stays shared with `self`.
    pub fn bundle(&self) -> Collaborators {
        Collaborators {
            customers: Arc::new(self.customers.clone()),
            products: Arc::new(self.products.clone()),
            tax: Arc::new(self.tax.clone()),
            shipping: Arc::new(self.shipping.clone()),
            payments: Arc::new(self.payments.clone()),
            notifications: Arc::new(self.notifications.clone()),
            discounts: Arc::new(self.discounts.clone()),
        }
    }
}
