//! Tax and shipping calculators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::Money;
use domain::{PricingSnapshot, ShippingMethod};
use rust_decimal::Decimal;

use crate::error::{Result, ServiceError};

/// Tax owed on an order and the rate it was computed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxQuote {
    pub amount: Money,
    pub rate: Decimal,
}

/// Tax calculator. Must return the same quote for the same snapshot.
#[async_trait]
pub trait TaxCalculator: Send + Sync {
    async fn calculate(&self, snapshot: &PricingSnapshot) -> Result<TaxQuote>;
}

/// Shipping calculator.
#[async_trait]
pub trait ShippingCalculator: Send + Sync {
    async fn calculate(&self, snapshot: &PricingSnapshot) -> Result<Money>;
}

/// Single-rate tax on the discounted subtotal.
#[derive(Debug, Clone)]
pub struct FlatRateTax {
    rate: Decimal,
    fail: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
    calls: Arc<AtomicU32>,
}

impl FlatRateTax {
    pub fn new(rate: Decimal) -> Self {
        Self {
            rate,
            fail: Arc::new(AtomicBool::new(false)),
            delay_ms: Arc::new(AtomicU64::new(0)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Makes every quote take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis().try_into().unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for FlatRateTax {
    /// 8%.
    fn default() -> Self {
        Self::new(Decimal::new(8, 2))
    }
}

#[async_trait]
impl TaxCalculator for FlatRateTax {
    async fn calculate(&self, snapshot: &PricingSnapshot) -> Result<TaxQuote> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::collaborator("tax", "tax engine unavailable"));
        }
        let amount = snapshot
            .taxable_amount()
            .apply_rate(self.rate)
            .round_to(snapshot.currency);
        Ok(TaxQuote {
            amount,
            rate: self.rate,
        })
    }
}

#[derive(Debug)]
struct RateCardState {
    rates: HashMap<ShippingMethod, Money>,
    fail: bool,
}

/// Per-method flat shipping fee.
#[derive(Debug, Clone)]
pub struct FlatRateShipping {
    state: Arc<RwLock<RateCardState>>,
}

impl FlatRateShipping {
    pub fn new() -> Self {
        let rates = HashMap::from([
            (ShippingMethod::Standard, Money::from_units(10)),
            (ShippingMethod::Express, Money::from_units(25)),
            (ShippingMethod::Overnight, Money::from_units(45)),
            (ShippingMethod::Pickup, Money::zero()),
        ]);
        Self {
            state: Arc::new(RwLock::new(RateCardState { rates, fail: false })),
        }
    }

    pub fn set_rate(&self, method: ShippingMethod, fee: Money) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.rates.insert(method, fee);
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).fail = fail;
    }
}

impl Default for FlatRateShipping {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShippingCalculator for FlatRateShipping {
    async fn calculate(&self, snapshot: &PricingSnapshot) -> Result<Money> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.fail {
            return Err(ServiceError::collaborator("shipping", "rate service unavailable"));
        }
        if snapshot.lines.is_empty() {
            return Ok(Money::zero().round_to(snapshot.currency));
        }
        let fee = state
            .rates
            .get(&snapshot.shipping_method)
            .copied()
            .unwrap_or_else(Money::zero);
        Ok(fee.round_to(snapshot.currency))
    }
}
