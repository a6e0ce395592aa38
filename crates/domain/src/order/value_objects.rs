//! Value objects for the order domain.

use chrono::{DateTime, Utc};
use common::{AddressId, Money, OrderId, OrderItemId, ProductId, ShipmentId, WarehouseId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderStatus};

/// Payment progress of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    PartiallyPaid,
    Paid,
    Refunded,
    PartiallyRefunded,
    Failed,
}

impl PaymentStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "Unpaid",
            PaymentStatus::PartiallyPaid => "PartiallyPaid",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Refunded => "Refunded",
            PaymentStatus::PartiallyRefunded => "PartiallyRefunded",
            PaymentStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderType {
    #[default]
    Sales,
    Return,
    Exchange,
}

/// Fulfilment priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Shipping service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ShippingMethod {
    #[default]
    Standard,
    Express,
    Overnight,
    Pickup,
}

/// Means of payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    CreditCard,
    BankTransfer,
    Cash,
    StoreCredit,
}

/// Which role an address snapshot plays on the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    Shipping,
    Billing,
}

/// Snapshot of a customer address bound to an order.
///
/// The snapshot is copied at creation so later edits to the customer's
/// address book do not change where an order ships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAddress {
    /// Address book entry this snapshot was taken from.
    pub source_address_id: AddressId,
    pub recipient: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
}

/// A line on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: u32,
    pub unit_price: Money,
    /// Line-level discount, applied before the order-level discount.
    pub discount_amount: Money,
    /// Tax rate reported by the tax quote for this order (e.g. `0.08`).
    pub tax_rate: Decimal,
    /// `unit_price × quantity − discount_amount`, kept in sync by the pricing engine.
    pub line_total: Money,
    pub shipped_qty: u32,
    pub returned_qty: u32,
}

impl OrderItem {
    /// Creates a new item with no discount, no tax and nothing shipped.
    pub fn new(
        order_id: OrderId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            id: OrderItemId::new(),
            order_id,
            product_id,
            warehouse_id,
            quantity,
            unit_price,
            discount_amount: Money::zero(),
            tax_rate: Decimal::ZERO,
            line_total: unit_price.multiply(quantity),
            shipped_qty: 0,
            returned_qty: 0,
        }
    }

    /// Units reserved but not yet shipped.
    pub fn outstanding_qty(&self) -> u32 {
        self.quantity.saturating_sub(self.shipped_qty)
    }

    /// Units shipped and not yet returned.
    pub fn returnable_qty(&self) -> u32 {
        self.shipped_qty.saturating_sub(self.returned_qty)
    }

    /// Returns true if every unit has shipped.
    pub fn is_fully_shipped(&self) -> bool {
        self.shipped_qty >= self.quantity
    }
}

/// One line of a shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentLine {
    pub item_id: OrderItemId,
    pub quantity: u32,
}

/// A record of goods leaving the warehouse.
///
/// An item may appear in several shipments; its `shipped_qty` is the
/// running total across them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub lines: Vec<ShipmentLine>,
    pub shipped_at: DateTime<Utc>,
}

/// An applied status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: String,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Business key of an order: `YYYY-NNNNNN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderNumber {
    year: i32,
    sequence: u32,
}

impl OrderNumber {
    /// Largest sequence value that fits the six-digit suffix.
    pub const MAX_SEQUENCE: u32 = 999_999;

    /// Builds an order number from a year and a per-year sequence.
    pub fn new(year: i32, sequence: u32) -> Result<Self, OrderError> {
        if !(0..=9999).contains(&year) || sequence == 0 || sequence > Self::MAX_SEQUENCE {
            return Err(OrderError::InvalidOrderNumber(format!("{year}/{sequence}")));
        }
        Ok(Self { year, sequence })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:06}", self.year, self.sequence)
    }
}

impl std::str::FromStr for OrderNumber {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || OrderError::InvalidOrderNumber(s.to_string());
        let (year, sequence) = s.split_once('-').ok_or_else(invalid)?;
        let all_digits = |part: &str, len: usize| {
            part.len() == len && part.bytes().all(|b| b.is_ascii_digit())
        };
        if !all_digits(year, 4) || !all_digits(sequence, 6) {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let sequence = sequence.parse().map_err(|_| invalid())?;
        Self::new(year, sequence).map_err(|_| invalid())
    }
}

impl Serialize for OrderNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OrderNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
