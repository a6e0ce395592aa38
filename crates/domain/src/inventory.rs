//! Inventory rows and the stock ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{LedgerEntryId, Money, OrderId, ProductId, Version, WarehouseId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference type recorded on every ledger row written for an order.
pub const ORDER_REFERENCE: &str = "ORDER";

/// Identifies one inventory row.
///
/// Ordering is `(warehouse_id, product_id)`, which is the order row locks
/// must be taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InventoryKey {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
}

impl InventoryKey {
    pub fn new(warehouse_id: WarehouseId, product_id: ProductId) -> Self {
        Self {
            warehouse_id,
            product_id,
        }
    }
}

impl std::fmt::Display for InventoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)
    }
}

/// A requested quantity that could not be met.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub requested: u32,
    pub available: u32,
    /// `requested − available`.
    pub shortfall: u32,
}

impl std::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}: requested {}, available {}",
            self.product_id, self.warehouse_id, self.requested, self.available
        )
    }
}

/// Errors raised by stock arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// Not enough available stock for one or more lines.
    #[error("Insufficient inventory for {} item(s)", shortfalls.len())]
    Insufficient { shortfalls: Vec<Shortfall> },

    /// A deduction exceeds what is reserved.
    #[error("Reservation missing for {key}: reserved {reserved}, requested {requested}")]
    ReservationMissing {
        key: InventoryKey,
        reserved: u32,
        requested: u32,
    },

    /// No inventory row exists for the product in that warehouse.
    #[error("Inventory not tracked for {0}")]
    NotTracked(InventoryKey),

    /// Stock count would overflow.
    #[error("Quantity overflow for {0}")]
    QuantityOverflow(InventoryKey),
}

/// Stock levels for one product in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub key: InventoryKey,
    pub on_hand: u32,
    pub reserved: u32,
    pub reorder_level: u32,
    pub average_cost: Money,
    pub version: Version,
}

impl Inventory {
    /// Creates an unpersisted row with nothing reserved.
    pub fn new(key: InventoryKey, on_hand: u32, average_cost: Money) -> Self {
        Self {
            key,
            on_hand,
            reserved: 0,
            reorder_level: 0,
            average_cost,
            version: Version::initial(),
        }
    }

    pub fn with_reorder_level(mut self, level: u32) -> Self {
        self.reorder_level = level;
        self
    }

    /// `on_hand − reserved`.
    pub fn available(&self) -> u32 {
        self.on_hand.saturating_sub(self.reserved)
    }

    /// Returns true if available stock is at or below the reorder level.
    pub fn needs_reorder(&self) -> bool {
        self.available() <= self.reorder_level
    }

    /// Returns the shortfall for `quantity`, if any.
    pub fn shortfall_for(&self, quantity: u32) -> Option<Shortfall> {
        let available = self.available();
        (quantity > available).then(|| Shortfall {
            product_id: self.key.product_id,
            warehouse_id: self.key.warehouse_id,
            requested: quantity,
            available,
            shortfall: quantity - available,
        })
    }

    /// Earmarks `quantity` units.
    pub fn reserve(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if let Some(shortfall) = self.shortfall_for(quantity) {
            return Err(InventoryError::Insufficient {
                shortfalls: vec![shortfall],
            });
        }
        self.reserved += quantity;
        Ok(())
    }

    /// Drops up to `quantity` reserved units and returns how many were released.
    pub fn release(&mut self, quantity: u32) -> u32 {
        let released = quantity.min(self.reserved);
        self.reserved -= released;
        released
    }

    /// Converts `quantity` reserved units into shipped stock.
    pub fn deduct(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if self.reserved < quantity || self.on_hand < quantity {
            return Err(InventoryError::ReservationMissing {
                key: self.key,
                reserved: self.reserved,
                requested: quantity,
            });
        }
        self.reserved -= quantity;
        self.on_hand -= quantity;
        Ok(())
    }

    /// Puts `quantity` units back on the shelf.
    pub fn restock(&mut self, quantity: u32) -> Result<(), InventoryError> {
        self.on_hand = self
            .on_hand
            .checked_add(quantity)
            .ok_or(InventoryError::QuantityOverflow(self.key))?;
        Ok(())
    }

    /// Returns true if `on_hand ≥ reserved`.
    pub fn is_consistent(&self) -> bool {
        self.on_hand >= self.reserved
    }
}

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerKind {
    Reserve,
    Release,
    Deduct,
    Return,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Reserve => "RESERVE",
            LedgerKind::Release => "RELEASE",
            LedgerKind::Deduct => "DEDUCT",
            LedgerKind::Return => "RETURN",
        }
    }

    /// Returns true for movements that count towards an order's reservation footprint.
    pub fn affects_reservation(&self) -> bool {
        !matches!(self, LedgerKind::Return)
    }
}

impl std::fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only ledger row.
///
/// Quantities are signed: reserve `+q`, release `−q`, deduct `−q`, return `+q`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub id: LedgerEntryId,
    pub kind: LedgerKind,
    pub key: InventoryKey,
    pub quantity: i64,
    pub unit_cost: Money,
    pub reference_type: String,
    pub reference_id: OrderId,
    pub created_at: DateTime<Utc>,
}

impl InventoryTransaction {
    /// Creates a ledger row for an order, applying the sign for `kind`.
    pub fn for_order(
        order_id: OrderId,
        kind: LedgerKind,
        key: InventoryKey,
        quantity: u32,
        unit_cost: Money,
        at: DateTime<Utc>,
    ) -> Self {
        let magnitude = i64::from(quantity);
        let quantity = match kind {
            LedgerKind::Reserve | LedgerKind::Return => magnitude,
            LedgerKind::Release | LedgerKind::Deduct => -magnitude,
        };
        Self {
            id: LedgerEntryId::new(),
            kind,
            key,
            quantity,
            unit_cost,
            reference_type: ORDER_REFERENCE.to_string(),
            reference_id: order_id,
            created_at: at,
        }
    }
}

/// Units still reserved per inventory row according to the ledger.
///
/// Rows whose reservations have been fully released or deducted are omitted.
pub fn outstanding_reservations(ledger: &[InventoryTransaction]) -> BTreeMap<InventoryKey, u32> {
    let mut footprint: BTreeMap<InventoryKey, i64> = BTreeMap::new();
    for entry in ledger.iter().filter(|e| e.kind.affects_reservation()) {
        *footprint.entry(entry.key).or_default() += entry.quantity;
    }
    footprint
        .into_iter()
        .filter(|(_, qty)| *qty > 0)
        .map(|(key, qty)| (key, u32::try_from(qty).unwrap_or(u32::MAX)))
        .collect()
}

/// Sum of reserve, release and deduct quantities; zero once an order is settled.
pub fn reservation_balance(ledger: &[InventoryTransaction]) -> i64 {
    ledger
        .iter()
        .filter(|e| e.kind.affects_reservation())
        .map(|e| e.quantity)
        .sum()
}

/// Physical state of returned goods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemCondition {
    New,
    Restockable,
    Damaged,
    Defective,
}

impl ItemCondition {
    /// Returns true if goods in this condition go back on the shelf.
    pub fn is_restockable(&self) -> bool {
        matches!(self, ItemCondition::New | ItemCondition::Restockable)
    }
}
