//! Product catalog lookups.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{Currency, Money, ProductId, WarehouseId};

use crate::error::{Result, ServiceError};

/// A catalog product.
#[derive(Debug, Clone)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub unit_price: Money,
    pub currency: Currency,
    /// Warehouse used when a line does not name one.
    pub default_warehouse_id: WarehouseId,
    pub active: bool,
}

impl Product {
    pub fn new(sku: impl Into<String>, unit_price: Money, warehouse_id: WarehouseId) -> Self {
        let sku = sku.into();
        Self {
            id: ProductId::new(),
            name: sku.clone(),
            sku,
            unit_price,
            currency: Currency::USD,
            default_warehouse_id: warehouse_id,
            active: true,
        }
    }

    pub fn priced_in(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }
}

/// Read-only catalog.
#[async_trait]
pub trait ProductService: Send + Sync {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;
}

#[derive(Debug, Default)]
struct InMemoryProductState {
    products: HashMap<ProductId, Product>,
    fail: bool,
}

/// In-memory catalog for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductService {
    state: Arc<RwLock<InMemoryProductState>>,
}

impl InMemoryProductService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_product(&self, product: Product) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.products.insert(product.id, product);
    }

    pub fn set_active(&self, id: ProductId, active: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(product) = state.products.get_mut(&id) {
            product.active = active;
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).fail = fail;
    }
}

#[async_trait]
impl ProductService for InMemoryProductService {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.fail {
            return Err(ServiceError::collaborator("product", "catalog unavailable"));
        }
        Ok(state.products.get(&id).cloned())
    }
}
