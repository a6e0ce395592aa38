//! Inventory coordinator: stock checks, reservations and the ledger.
//!
//! Every operation runs inside the caller's transaction. Rows are locked in
//! ascending `(warehouse_id, product_id)` order so that concurrent
//! multi-line operations cannot deadlock.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, WarehouseId};
use domain::{
    InventoryError, InventoryKey, InventoryTransaction, ItemCondition, LedgerKind, Shortfall,
    outstanding_reservations,
};
use serde::Serialize;
use store::Transaction;

use crate::error::Result;

/// Units of one product in one warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockRequest {
    pub key: InventoryKey,
    pub quantity: u32,
}

impl StockRequest {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId, quantity: u32) -> Self {
        Self {
            key: InventoryKey::new(warehouse_id, product_id),
            quantity,
        }
    }
}

/// Returned goods and their state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnedStock {
    pub key: InventoryKey,
    pub quantity: u32,
    pub condition: ItemCondition,
}

/// Availability of one requested line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub requested: u32,
    pub available: u32,
    pub can_fulfill: bool,
    /// Average cost of the stock row; zero when the row is not tracked.
    pub unit_cost: Money,
    pub shortfall: u32,
}

/// Sums quantities per row and orders them by key.
fn aggregate(lines: impl IntoIterator<Item = (InventoryKey, u32)>) -> Result<BTreeMap<InventoryKey, u32>> {
    let mut totals: BTreeMap<InventoryKey, u32> = BTreeMap::new();
    for (key, quantity) in lines {
        let total = totals.entry(key).or_default();
        *total = total
            .checked_add(quantity)
            .ok_or(InventoryError::QuantityOverflow(key))?;
    }
    totals.retain(|_, q| *q > 0);
    Ok(totals)
}

/// Stateless coordinator over a [`Transaction`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryCoordinator;

impl InventoryCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Reports availability per line. Reads only.
    pub async fn check_availability<T: Transaction>(
        &self,
        tx: &T,
        lines: &[StockRequest],
    ) -> Result<Vec<Availability>> {
        let mut report = Vec::with_capacity(lines.len());
        for line in lines {
            let row = tx.get_inventory(line.key).await?;
            let available = row.as_ref().map_or(0, |r| r.available());
            report.push(Availability {
                product_id: line.key.product_id,
                warehouse_id: line.key.warehouse_id,
                requested: line.quantity,
                available,
                can_fulfill: available >= line.quantity,
                unit_cost: row.map_or_else(Money::zero, |r| r.average_cost),
                shortfall: line.quantity.saturating_sub(available),
            });
        }
        Ok(report)
    }

    /// Reserves every line or none of them.
    #[tracing::instrument(skip(self, tx, lines), fields(order_id = %order_id))]
    pub async fn reserve<T: Transaction>(
        &self,
        tx: &mut T,
        order_id: OrderId,
        lines: &[StockRequest],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let wanted = aggregate(lines.iter().map(|l| (l.key, l.quantity)))?;
        if wanted.is_empty() {
            return Ok(());
        }
        for key in wanted.keys() {
            tx.lock_inventory(*key).await?;
        }

        let mut rows = Vec::with_capacity(wanted.len());
        let mut shortfalls = Vec::new();
        for (&key, &quantity) in &wanted {
            match tx.get_inventory(key).await? {
                Some(row) => match row.shortfall_for(quantity) {
                    Some(shortfall) => shortfalls.push(shortfall),
                    None => rows.push((row, quantity)),
                },
                None => shortfalls.push(Shortfall {
                    product_id: key.product_id,
                    warehouse_id: key.warehouse_id,
                    requested: quantity,
                    available: 0,
                    shortfall: quantity,
                }),
            }
        }
        if !shortfalls.is_empty() {
            tracing::info!(lines = shortfalls.len(), "Reservation refused");
            metrics::counter!("inventory_shortfalls_total").increment(shortfalls.len() as u64);
            return Err(InventoryError::Insufficient { shortfalls }.into());
        }

        let mut ledger = Vec::with_capacity(rows.len());
        for (mut row, quantity) in rows {
            row.reserve(quantity)?;
            tx.put_inventory(&mut row).await?;
            ledger.push(InventoryTransaction::for_order(
                order_id,
                LedgerKind::Reserve,
                row.key,
                quantity,
                row.average_cost,
                at,
            ));
        }
        tx.append_ledger(ledger).await?;
        metrics::counter!("inventory_reservations_total").increment(1);
        Ok(())
    }

    /// Releases the order's outstanding reservations, all of them or the
    /// listed subset. Portions already released are skipped, so calling
    /// this twice releases nothing the second time.
    #[tracing::instrument(skip(self, tx, subset), fields(order_id = %order_id))]
    pub async fn release<T: Transaction>(
        &self,
        tx: &mut T,
        order_id: OrderId,
        subset: Option<&[StockRequest]>,
        at: DateTime<Utc>,
    ) -> Result<Vec<StockRequest>> {
        let outstanding = outstanding_reservations(&tx.ledger_for_order(order_id).await?);
        let targets = match subset {
            None => outstanding,
            Some(lines) => {
                let mut targets = BTreeMap::new();
                for (key, requested) in aggregate(lines.iter().map(|l| (l.key, l.quantity)))? {
                    let held = outstanding.get(&key).copied().unwrap_or(0);
                    if requested > held {
                        tracing::warn!(%key, requested, held, "Releasing more than is reserved");
                    }
                    if held > 0 {
                        targets.insert(key, requested.min(held));
                    }
                }
                targets
            }
        };

        let mut released = Vec::with_capacity(targets.len());
        let mut ledger = Vec::with_capacity(targets.len());
        for (&key, &quantity) in &targets {
            tx.lock_inventory(key).await?;
            let Some(mut row) = tx.get_inventory(key).await? else {
                tracing::warn!(%key, "Reservation refers to an unknown inventory row");
                continue;
            };
            let freed = row.release(quantity);
            if freed == 0 {
                continue;
            }
            tx.put_inventory(&mut row).await?;
            ledger.push(InventoryTransaction::for_order(
                order_id,
                LedgerKind::Release,
                key,
                freed,
                row.average_cost,
                at,
            ));
            released.push(StockRequest { key, quantity: freed });
        }
        if !ledger.is_empty() {
            tx.append_ledger(ledger).await?;
        }
        Ok(released)
    }

    /// Turns reserved units into shipped units.
    #[tracing::instrument(skip(self, tx, lines), fields(order_id = %order_id))]
    pub async fn deduct<T: Transaction>(
        &self,
        tx: &mut T,
        order_id: OrderId,
        lines: &[StockRequest],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let wanted = aggregate(lines.iter().map(|l| (l.key, l.quantity)))?;
        let outstanding = outstanding_reservations(&tx.ledger_for_order(order_id).await?);
        for (&key, &quantity) in &wanted {
            let held = outstanding.get(&key).copied().unwrap_or(0);
            if held < quantity {
                return Err(InventoryError::ReservationMissing {
                    key,
                    reserved: held,
                    requested: quantity,
                }
                .into());
            }
        }

        let mut ledger = Vec::with_capacity(wanted.len());
        for (&key, &quantity) in &wanted {
            tx.lock_inventory(key).await?;
            let mut row = tx
                .get_inventory(key)
                .await?
                .ok_or(InventoryError::NotTracked(key))?;
            row.deduct(quantity)?;
            tx.put_inventory(&mut row).await?;
            ledger.push(InventoryTransaction::for_order(
                order_id,
                LedgerKind::Deduct,
                key,
                quantity,
                row.average_cost,
                at,
            ));
        }
        if !ledger.is_empty() {
            tx.append_ledger(ledger).await?;
        }
        Ok(())
    }

    /// Puts returned goods back on hand when their condition allows.
    /// Returns the number of units restocked.
    #[tracing::instrument(skip(self, tx, lines), fields(order_id = %order_id))]
    pub async fn return_stock<T: Transaction>(
        &self,
        tx: &mut T,
        order_id: OrderId,
        lines: &[ReturnedStock],
        at: DateTime<Utc>,
    ) -> Result<u32> {
        let restock = aggregate(
            lines
                .iter()
                .filter(|l| l.condition.is_restockable())
                .map(|l| (l.key, l.quantity)),
        )?;

        let mut ledger = Vec::with_capacity(restock.len());
        let mut units = 0u32;
        for (&key, &quantity) in &restock {
            tx.lock_inventory(key).await?;
            let mut row = tx
                .get_inventory(key)
                .await?
                .ok_or(InventoryError::NotTracked(key))?;
            row.restock(quantity)?;
            tx.put_inventory(&mut row).await?;
            ledger.push(InventoryTransaction::for_order(
                order_id,
                LedgerKind::Return,
                key,
                quantity,
                row.average_cost,
                at,
            ));
            units = units.saturating_add(quantity);
        }
        if !ledger.is_empty() {
            tx.append_ledger(ledger).await?;
        }
        Ok(units)
    }
}
