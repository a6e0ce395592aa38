//! Discount code resolution.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::Discount;

use crate::error::Result;

/// Resolves discount codes into order-level discounts.
#[async_trait]
pub trait DiscountService: Send + Sync {
    /// Returns `None` for unknown or expired codes.
    async fn resolve(&self, code: &str) -> Result<Option<Discount>>;
}

/// In-memory code table for testing. Codes are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDiscountService {
    codes: Arc<RwLock<HashMap<String, Discount>>>,
}

impl InMemoryDiscountService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_code(&self, code: &str, discount: Discount) {
        self.codes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(code.to_ascii_uppercase(), discount);
    }

    pub fn remove_code(&self, code: &str) {
        self.codes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&code.to_ascii_uppercase());
    }
}

#[async_trait]
impl DiscountService for InMemoryDiscountService {
    async fn resolve(&self, code: &str) -> Result<Option<Discount>> {
        let codes = self.codes.read().unwrap_or_else(PoisonError::into_inner);
        Ok(codes.get(&code.trim().to_ascii_uppercase()).copied())
    }
}
