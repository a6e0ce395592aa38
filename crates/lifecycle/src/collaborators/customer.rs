//! Customer lookups.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{AddressId, CustomerId, Money};
use domain::OrderAddress;

use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerStatus {
    Active,
    Suspended,
}

/// A customer record.
#[derive(Debug, Clone)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub status: CustomerStatus,
    /// `None` for customers who do not buy on credit.
    pub credit_limit: Option<Money>,
}

impl Customer {
    pub fn active(name: impl Into<String>) -> Self {
        Self {
            id: CustomerId::new(),
            name: name.into(),
            status: CustomerStatus::Active,
            credit_limit: None,
        }
    }

    pub fn with_credit_limit(mut self, limit: Money) -> Self {
        self.credit_limit = Some(limit);
        self
    }

    pub fn suspended(mut self) -> Self {
        self.status = CustomerStatus::Suspended;
        self
    }

    pub fn is_suspended(&self) -> bool {
        self.status == CustomerStatus::Suspended
    }
}

/// An address on a customer's address book.
#[derive(Debug, Clone)]
pub struct CustomerAddress {
    pub id: AddressId,
    pub customer_id: CustomerId,
    pub recipient: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
}

impl CustomerAddress {
    /// Copies the address into an order snapshot.
    pub fn snapshot(&self) -> OrderAddress {
        OrderAddress {
            source_address_id: self.id,
            recipient: self.recipient.clone(),
            line1: self.line1.clone(),
            line2: self.line2.clone(),
            city: self.city.clone(),
            region: self.region.clone(),
            postal_code: self.postal_code.clone(),
            country: self.country.clone(),
        }
    }
}

/// Read-only customer lookups.
#[async_trait]
pub trait CustomerService: Send + Sync {
    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>>;

    async fn get_address(&self, id: AddressId) -> Result<Option<CustomerAddress>>;
}

#[derive(Debug, Default)]
struct InMemoryCustomerState {
    customers: HashMap<CustomerId, Customer>,
    addresses: HashMap<AddressId, CustomerAddress>,
    fail: bool,
}

/// In-memory customer directory for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCustomerService {
    state: Arc<RwLock<InMemoryCustomerState>>,
}

impl InMemoryCustomerService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_customer(&self, customer: Customer) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.customers.insert(customer.id, customer);
    }

    /// Adds an address for `customer_id` and returns its id.
    pub fn add_address(&self, customer_id: CustomerId, city: &str) -> AddressId {
        let address = CustomerAddress {
            id: AddressId::new(),
            customer_id,
            recipient: "Receiving".to_string(),
            line1: "1 Main St".to_string(),
            line2: None,
            city: city.to_string(),
            region: "CA".to_string(),
            postal_code: "94000".to_string(),
            country: "US".to_string(),
        };
        let id = address.id;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.addresses.insert(id, address);
        id
    }

    pub fn set_status(&self, id: CustomerId, status: CustomerStatus) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(customer) = state.customers.get_mut(&id) {
            customer.status = status;
        }
    }

    /// Makes every lookup fail.
    pub fn set_fail(&self, fail: bool) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).fail = fail;
    }
}

#[async_trait]
impl CustomerService for InMemoryCustomerService {
    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.fail {
            return Err(ServiceError::collaborator("customer", "directory unavailable"));
        }
        Ok(state.customers.get(&id).cloned())
    }

    async fn get_address(&self, id: AddressId) -> Result<Option<CustomerAddress>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.fail {
            return Err(ServiceError::collaborator("customer", "directory unavailable"));
        }
        Ok(state.addresses.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_customer_and_address() {
        let service = InMemoryCustomerService::new();
        let customer = Customer::active("Acme");
        let id = customer.id;
        service.add_customer(customer);
        let address_id = service.add_address(id, "Oakland");

        let found = service.get_customer(id).await.unwrap().unwrap();
        assert_eq!(found.name, "Acme");
        let address = service.get_address(address_id).await.unwrap().unwrap();
        assert_eq!(address.customer_id, id);
        assert_eq!(address.snapshot().city, "Oakland");
        assert!(service.get_customer(CustomerId::new()).await.unwrap().is_none());

        service.set_status(id, CustomerStatus::Suspended);
        assert!(service.get_customer(id).await.unwrap().unwrap().is_suspended());
    }

    #[tokio::test]
    async fn test_fail() {
        let service = InMemoryCustomerService::new();
        service.set_fail(true);
        assert!(service.get_customer(CustomerId::new()).await.is_err());
    }
}
