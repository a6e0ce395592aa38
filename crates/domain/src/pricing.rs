//! Pricing and totals engine.
//!
//! Every monetary field on an order is produced here from item inputs plus
//! tax and shipping quotes. All arithmetic is fixed-point; each component is
//! rounded half-to-even to the currency scale before it is summed, so the
//! total always equals `subtotal − discount + tax + shipping` exactly.

use common::{Currency, CustomerId, Money, OrderId, ProductId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::{OrderAddress, ShippingMethod};

/// Errors raised while computing totals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    /// A line is priced in a different currency than the order.
    #[error("Currency mismatch: order is {expected}, line is {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    /// A discount drives a line or the order total below zero, or is malformed.
    #[error("Invalid discount: {0}")]
    InvalidDiscount(String),

    /// A unit price is negative.
    #[error("Invalid price: {0}")]
    InvalidPrice(Money),

    /// A tax or shipping quote is negative.
    #[error("Invalid {kind} quote: {amount}")]
    InvalidQuote { kind: &'static str, amount: Money },

    /// An amount is too large to compute with.
    #[error("Amount out of range while computing {0}")]
    Overflow(&'static str),
}

/// Raw input for one order line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingLine {
    pub currency: Currency,
    pub unit_price: Money,
    pub quantity: u32,
    pub discount: Money,
}

impl PricingLine {
    pub fn new(currency: Currency, unit_price: Money, quantity: u32) -> Self {
        Self {
            currency,
            unit_price,
            quantity,
            discount: Money::zero(),
        }
    }

    pub fn with_discount(mut self, discount: Money) -> Self {
        self.discount = discount;
        self
    }
}

/// Line totals and their sum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLines {
    /// One total per input line, in input order.
    pub line_totals: Vec<Money>,
    pub subtotal: Money,
}

/// Computes `unit_price × quantity − discount` for each line and the subtotal.
pub fn price_lines(currency: Currency, lines: &[PricingLine]) -> Result<PricedLines, PricingError> {
    let mut line_totals = Vec::with_capacity(lines.len());
    for line in lines {
        if line.currency != currency {
            return Err(PricingError::CurrencyMismatch {
                expected: currency,
                found: line.currency,
            });
        }
        if line.unit_price.is_negative() {
            return Err(PricingError::InvalidPrice(line.unit_price));
        }
        if line.discount.is_negative() {
            return Err(PricingError::InvalidDiscount(format!(
                "line discount {} is negative",
                line.discount
            )));
        }

        let total = line
            .unit_price
            .checked_multiply(line.quantity)
            .and_then(|gross| gross.checked_sub(line.discount))
            .ok_or(PricingError::Overflow("line total"))?
            .round_to(currency);
        if total.is_negative() {
            return Err(PricingError::InvalidDiscount(format!(
                "line discount {} exceeds line amount",
                line.discount
            )));
        }
        line_totals.push(total);
    }

    let subtotal = checked_sum(line_totals.iter().copied())
        .ok_or(PricingError::Overflow("subtotal"))?
        .round_to(currency);
    Ok(PricedLines {
        line_totals,
        subtotal,
    })
}

fn checked_sum(amounts: impl Iterator<Item = Money>) -> Option<Money> {
    amounts.fold(Some(Money::zero()), |acc, m| acc?.checked_add(m))
}

/// An order-level discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Discount {
    /// Percentage of the subtotal, `0..=100`.
    Percent(Decimal),
    /// Fixed amount in the order currency.
    Fixed(Money),
}

impl Discount {
    /// Resolves the discount against a subtotal.
    pub fn amount_for(&self, subtotal: Money, currency: Currency) -> Result<Money, PricingError> {
        let amount = match self {
            Discount::Percent(pct) => {
                if pct.is_sign_negative() || *pct > Decimal::ONE_HUNDRED {
                    return Err(PricingError::InvalidDiscount(format!(
                        "percentage {pct} out of range"
                    )));
                }
                subtotal
                    .checked_apply_rate(*pct / Decimal::ONE_HUNDRED)
                    .ok_or(PricingError::Overflow("discount"))?
            }
            Discount::Fixed(amount) => {
                if amount.is_negative() {
                    return Err(PricingError::InvalidDiscount(format!(
                        "fixed amount {amount} is negative"
                    )));
                }
                *amount
            }
        };
        Ok(amount.round_to(currency))
    }
}

/// Monetary totals of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub discount_amount: Money,
    pub tax_amount: Money,
    pub shipping_amount: Money,
    pub total_amount: Money,
}

impl OrderTotals {
    /// All-zero totals at the currency scale.
    pub fn zero(currency: Currency) -> Self {
        let zero = Money::zero().round_to(currency);
        Self {
            subtotal: zero,
            discount_amount: zero,
            tax_amount: zero,
            shipping_amount: zero,
            total_amount: zero,
        }
    }

    /// Returns true if `total = subtotal − discount + tax + shipping`.
    pub fn is_consistent(&self) -> bool {
        self.total_amount
            == self.subtotal - self.discount_amount + self.tax_amount + self.shipping_amount
    }
}

/// Combines the subtotal with the discount and the external quotes.
pub fn finalize(
    currency: Currency,
    subtotal: Money,
    discount: Money,
    tax: Money,
    shipping: Money,
) -> Result<OrderTotals, PricingError> {
    if discount.is_negative() {
        return Err(PricingError::InvalidDiscount(format!(
            "order discount {discount} is negative"
        )));
    }
    if tax.is_negative() {
        return Err(PricingError::InvalidQuote {
            kind: "tax",
            amount: tax,
        });
    }
    if shipping.is_negative() {
        return Err(PricingError::InvalidQuote {
            kind: "shipping",
            amount: shipping,
        });
    }

    let subtotal = subtotal.round_to(currency);
    let discount_amount = discount.round_to(currency);
    let tax_amount = tax.round_to(currency);
    let shipping_amount = shipping.round_to(currency);
    let total_amount = subtotal
        .checked_sub(discount_amount)
        .and_then(|t| t.checked_add(tax_amount))
        .and_then(|t| t.checked_add(shipping_amount))
        .ok_or(PricingError::Overflow("total"))?;
    if total_amount.is_negative() {
        return Err(PricingError::InvalidDiscount(format!(
            "discount {discount_amount} makes total negative"
        )));
    }

    Ok(OrderTotals {
        subtotal,
        discount_amount,
        tax_amount,
        shipping_amount,
        total_amount: total_amount.round_to(currency),
    })
}

/// Line as seen by tax and shipping calculators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub line_total: Money,
}

/// Read-only view of an order handed to tax and shipping calculators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub shipping_method: ShippingMethod,
    pub shipping_address: Option<OrderAddress>,
    pub lines: Vec<SnapshotLine>,
    pub subtotal: Money,
    pub discount_amount: Money,
}

impl PricingSnapshot {
    /// Amount tax is levied on.
    pub fn taxable_amount(&self) -> Money {
        (self.subtotal - self.discount_amount).non_negative()
    }

    /// Total number of units on the order.
    pub fn total_units(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    #[test]
    fn test_happy_path_totals() {
        let lines = [PricingLine::new(Currency::USD, money("50"), 2)];
        let priced = price_lines(Currency::USD, &lines).unwrap();
        assert_eq!(priced.subtotal.to_string(), "100.00");

        let totals = finalize(
            Currency::USD,
            priced.subtotal,
            Money::zero(),
            money("8"),
            money("10"),
        )
        .unwrap();
        assert_eq!(totals.subtotal.to_string(), "100.00");
        assert_eq!(totals.tax_amount.to_string(), "8.00");
        assert_eq!(totals.shipping_amount.to_string(), "10.00");
        assert_eq!(totals.total_amount.to_string(), "118.00");
        assert!(totals.is_consistent());
    }

    #[test]
    fn test_line_discount_applied_per_line() {
        let lines = [
            PricingLine::new(Currency::USD, money("19.99"), 3).with_discount(money("5")),
            PricingLine::new(Currency::USD, money("0.333"), 1),
        ];
        let priced = price_lines(Currency::USD, &lines).unwrap();
        assert_eq!(priced.line_totals[0], money("54.97"));
        assert_eq!(priced.line_totals[1], money("0.33"));
        assert_eq!(priced.subtotal, money("55.30"));
    }

    #[test]
    fn test_zero_decimal_currency_rounds_to_integer() {
        let lines = [PricingLine::new(Currency::JPY, money("1250"), 3)];
        let priced = price_lines(Currency::JPY, &lines).unwrap();
        let tax = priced.subtotal.apply_rate(money("0.1").amount());
        let totals = finalize(Currency::JPY, priced.subtotal, Money::zero(), tax, money("500.5"))
            .unwrap();
        assert_eq!(totals.tax_amount.to_string(), "375");
        assert_eq!(totals.shipping_amount.to_string(), "500");
        assert_eq!(totals.total_amount.to_string(), "4625");
    }

    #[test]
    fn test_three_decimal_currency() {
        let lines = [PricingLine::new(Currency::BHD, money("1.2345"), 2)];
        let priced = price_lines(Currency::BHD, &lines).unwrap();
        assert_eq!(priced.subtotal.to_string(), "2.469");
    }

    #[test]
    fn test_currency_mismatch() {
        let lines = [
            PricingLine::new(Currency::USD, money("1"), 1),
            PricingLine::new(Currency::JPY, money("1"), 1),
        ];
        assert_eq!(
            price_lines(Currency::USD, &lines),
            Err(PricingError::CurrencyMismatch {
                expected: Currency::USD,
                found: Currency::JPY,
            })
        );
    }

    #[test]
    fn test_negative_line_is_invalid_discount() {
        let lines = [PricingLine::new(Currency::USD, money("1"), 1).with_discount(money("2"))];
        assert!(matches!(
            price_lines(Currency::USD, &lines),
            Err(PricingError::InvalidDiscount(_))
        ));
    }

    #[test]
    fn test_negative_price_rejected() {
        let lines = [PricingLine::new(Currency::USD, money("-1"), 1)];
        assert!(matches!(
            price_lines(Currency::USD, &lines),
            Err(PricingError::InvalidPrice(_))
        ));
    }

    #[test]
    fn test_negative_total_is_invalid_discount() {
        let result = finalize(
            Currency::USD,
            money("10"),
            money("25"),
            Money::zero(),
            money("5"),
        );
        assert!(matches!(result, Err(PricingError::InvalidDiscount(_))));
    }

    #[test]
    fn test_negative_quotes_rejected() {
        assert!(matches!(
            finalize(Currency::USD, money("10"), Money::zero(), money("-1"), Money::zero()),
            Err(PricingError::InvalidQuote { kind: "tax", .. })
        ));
        assert!(matches!(
            finalize(Currency::USD, money("10"), Money::zero(), Money::zero(), money("-1")),
            Err(PricingError::InvalidQuote { kind: "shipping", .. })
        ));
    }

    #[test]
    fn test_discount_resolution() {
        let subtotal = money("80.00");
        assert_eq!(
            Discount::Percent(Decimal::new(125, 1))
                .amount_for(subtotal, Currency::USD)
                .unwrap(),
            money("10.00")
        );
        assert_eq!(
            Discount::Fixed(money("5"))
                .amount_for(subtotal, Currency::USD)
                .unwrap(),
            money("5.00")
        );
        assert!(
            Discount::Percent(Decimal::from(101))
                .amount_for(subtotal, Currency::USD)
                .is_err()
        );
        assert!(
            Discount::Fixed(money("-1"))
                .amount_for(subtotal, Currency::USD)
                .is_err()
        );
    }

    #[test]
    fn test_huge_amounts_overflow_instead_of_panicking() {
        let lines = [PricingLine::new(Currency::USD, Money::new(Decimal::MAX), 2)];
        assert_eq!(
            price_lines(Currency::USD, &lines),
            Err(PricingError::Overflow("line total"))
        );

        let half = Money::new(Decimal::MAX / Decimal::TWO);
        let lines = [
            PricingLine::new(Currency::JPY, half, 1),
            PricingLine::new(Currency::JPY, half, 1),
            PricingLine::new(Currency::JPY, half, 1),
        ];
        assert_eq!(
            price_lines(Currency::JPY, &lines),
            Err(PricingError::Overflow("subtotal"))
        );

        let max = Money::new(Decimal::MAX);
        assert_eq!(
            finalize(Currency::JPY, max, Money::zero(), max, Money::zero()),
            Err(PricingError::Overflow("total"))
        );
    }

    #[test]
    fn test_empty_order_prices_to_zero() {
        let priced = price_lines(Currency::USD, &[]).unwrap();
        assert_eq!(priced.subtotal.to_string(), "0.00");
        assert!(OrderTotals::zero(Currency::USD).is_consistent());
    }
}
