//! Order aggregate implementation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{Currency, CustomerId, Money, OrderId, OrderItemId, ShipmentId, Version};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pricing::{OrderTotals, PricedLines, PricingLine, PricingSnapshot, SnapshotLine};

use super::{
    AddressKind, OrderAddress, OrderError, OrderItem, OrderNumber, OrderStatus, OrderType,
    PaymentStatus, Priority, ReturnLine, ShipLine, Shipment, ShipmentLine, ShippingMethod,
    StatusChange, UpdateItem, UpdateOrder,
};

/// Everything needed to open a draft order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub customer_id: CustomerId,
    pub order_type: OrderType,
    pub priority: Priority,
    pub shipping_method: ShippingMethod,
    pub currency: Currency,
    pub shipping_address: OrderAddress,
    pub billing_address: OrderAddress,
    pub discount_code: Option<String>,
    pub required_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Order aggregate root.
///
/// All state changes go through the methods below, each of which either
/// applies completely or leaves the order untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    order_number: OrderNumber,
    customer_id: CustomerId,
    status: OrderStatus,
    payment_status: PaymentStatus,
    order_type: OrderType,
    priority: Priority,
    shipping_method: ShippingMethod,
    currency: Currency,
    shipping_address: OrderAddress,
    billing_address: OrderAddress,
    addresses_locked: bool,
    items: Vec<OrderItem>,
    totals: OrderTotals,
    paid_amount: Money,
    refunded_amount: Money,
    discount_code: Option<String>,
    required_date: Option<DateTime<Utc>>,
    shipped_date: Option<DateTime<Utc>>,
    delivered_date: Option<DateTime<Utc>>,
    cancelled_date: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    tracking_number: Option<String>,
    carrier: Option<String>,
    notes: Option<String>,
    shipments: Vec<Shipment>,
    history: Vec<StatusChange>,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    /// Current version for optimistic concurrency.
    #[serde(default)]
    version: Version,
}

impl Order {
    /// Opens a draft order with no items.
    pub fn new(new: NewOrder) -> Self {
        Self {
            id: new.id,
            order_number: new.order_number,
            customer_id: new.customer_id,
            status: OrderStatus::Draft,
            payment_status: PaymentStatus::Unpaid,
            order_type: new.order_type,
            priority: new.priority,
            shipping_method: new.shipping_method,
            currency: new.currency,
            shipping_address: new.shipping_address,
            billing_address: new.billing_address,
            addresses_locked: false,
            items: Vec::new(),
            totals: OrderTotals::zero(new.currency),
            paid_amount: Money::zero().round_to(new.currency),
            refunded_amount: Money::zero().round_to(new.currency),
            discount_code: new.discount_code,
            required_date: new.required_date,
            shipped_date: None,
            delivered_date: None,
            cancelled_date: None,
            cancel_reason: None,
            tracking_number: None,
            carrier: None,
            notes: new.notes,
            shipments: Vec::new(),
            history: Vec::new(),
            created_by: new.created_by,
            created_at: new.created_at,
            updated_at: new.created_at,
            version: Version::initial(),
        }
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> OrderNumber {
        self.order_number
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn shipping_method(&self) -> ShippingMethod {
        self.shipping_method
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn shipping_address(&self) -> &OrderAddress {
        &self.shipping_address
    }

    pub fn billing_address(&self) -> &OrderAddress {
        &self.billing_address
    }

    /// Returns true once the order has been confirmed.
    pub fn addresses_locked(&self) -> bool {
        self.addresses_locked
    }

    /// Returns all items in the order.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns an item by id.
    pub fn item(&self, item_id: OrderItemId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Returns true if the order has items.
    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    /// Returns true if every unit of every item has shipped.
    pub fn is_fully_shipped(&self) -> bool {
        self.has_items() && self.items.iter().all(OrderItem::is_fully_shipped)
    }

    pub fn totals(&self) -> &OrderTotals {
        &self.totals
    }

    pub fn subtotal(&self) -> Money {
        self.totals.subtotal
    }

    pub fn discount_amount(&self) -> Money {
        self.totals.discount_amount
    }

    pub fn tax_amount(&self) -> Money {
        self.totals.tax_amount
    }

    pub fn shipping_amount(&self) -> Money {
        self.totals.shipping_amount
    }

    pub fn total_amount(&self) -> Money {
        self.totals.total_amount
    }

    /// Net amount received: payments minus refunds.
    pub fn paid_amount(&self) -> Money {
        self.paid_amount
    }

    pub fn refunded_amount(&self) -> Money {
        self.refunded_amount
    }

    /// Amount still owed, never negative.
    pub fn outstanding_balance(&self) -> Money {
        (self.totals.total_amount - self.paid_amount).non_negative()
    }

    /// Amount that counts against the customer's credit limit.
    pub fn credit_exposure(&self) -> Money {
        match self.status {
            OrderStatus::Cancelled | OrderStatus::Refunded => Money::zero(),
            _ => self.outstanding_balance(),
        }
    }

    pub fn discount_code(&self) -> Option<&str> {
        self.discount_code.as_deref()
    }

    pub fn required_date(&self) -> Option<DateTime<Utc>> {
        self.required_date
    }

    pub fn shipped_date(&self) -> Option<DateTime<Utc>> {
        self.shipped_date
    }

    pub fn delivered_date(&self) -> Option<DateTime<Utc>> {
        self.delivered_date
    }

    pub fn cancelled_date(&self) -> Option<DateTime<Utc>> {
        self.cancelled_date
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn carrier(&self) -> Option<&str> {
        self.carrier.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn shipments(&self) -> &[Shipment] {
        &self.shipments
    }

    /// Every applied status transition, oldest first.
    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns true if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pricing inputs for every item, in item order.
    pub fn pricing_lines(&self) -> Vec<PricingLine> {
        self.items
            .iter()
            .map(|item| {
                PricingLine::new(self.currency, item.unit_price, item.quantity)
                    .with_discount(item.discount_amount)
            })
            .collect()
    }

    /// View of the order handed to tax and shipping calculators.
    pub fn pricing_snapshot(&self, priced: &PricedLines, discount: Money) -> PricingSnapshot {
        PricingSnapshot {
            order_id: self.id,
            customer_id: self.customer_id,
            currency: self.currency,
            shipping_method: self.shipping_method,
            shipping_address: Some(self.shipping_address.clone()),
            lines: self
                .items
                .iter()
                .zip(&priced.line_totals)
                .map(|(item, total)| SnapshotLine {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    line_total: *total,
                })
                .collect(),
            subtotal: priced.subtotal,
            discount_amount: discount,
        }
    }
}

// Command methods
impl Order {
    /// Moves the order along an edge of the status graph.
    ///
    /// Checks the edge, then the preconditions of the target status, then
    /// stamps dates and appends to the history.
    pub fn transition(
        &mut self,
        to: OrderStatus,
        actor: &str,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> Result<(), OrderError> {
        let from = self.status;
        if from == OrderStatus::Cancelled && to == OrderStatus::Cancelled {
            return Err(OrderError::AlreadyCancelled);
        }
        if !from.can_transition_to(to) {
            return Err(OrderError::InvalidStatusTransition { from, to });
        }
        self.check_preconditions(to)?;

        match to {
            OrderStatus::Confirmed => self.addresses_locked = true,
            OrderStatus::PartiallyShipped | OrderStatus::Shipped => {
                self.shipped_date.get_or_insert(at);
            }
            OrderStatus::Delivered => self.delivered_date = Some(at),
            OrderStatus::Cancelled => self.cancelled_date = Some(at),
            _ => {}
        }

        self.status = to;
        self.history.push(StatusChange {
            from,
            to,
            actor: actor.to_string(),
            at,
            note,
        });
        self.updated_at = at;
        Ok(())
    }

    fn check_preconditions(&self, to: OrderStatus) -> Result<(), OrderError> {
        match to {
            OrderStatus::Pending | OrderStatus::Confirmed if !self.has_items() => {
                Err(OrderError::NoItems)
            }
            OrderStatus::PartiallyShipped => {
                let any_shipped = self.items.iter().any(|i| i.shipped_qty > 0);
                if !any_shipped || self.is_fully_shipped() {
                    return Err(OrderError::InvalidStatusTransition {
                        from: self.status,
                        to,
                    });
                }
                Ok(())
            }
            OrderStatus::Shipped => {
                if !self.is_fully_shipped() {
                    return Err(OrderError::NotFullyShipped);
                }
                if self.paid_amount < self.totals.total_amount {
                    return Err(OrderError::PaymentRequired {
                        paid: self.paid_amount,
                        total: self.totals.total_amount,
                    });
                }
                Ok(())
            }
            OrderStatus::Delivered if !self.is_fully_shipped() => Err(OrderError::NotFullyShipped),
            _ => Ok(()),
        }
    }

    /// Cancels the order.
    pub fn cancel(
        &mut self,
        reason: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        self.transition(OrderStatus::Cancelled, actor, at, Some(reason.to_string()))?;
        self.cancel_reason = Some(reason.to_string());
        Ok(())
    }

    fn ensure_items_editable(&self, action: &'static str) -> Result<(), OrderError> {
        if !self.status.can_modify_items() {
            return Err(OrderError::NotEditable {
                status: self.status,
                action,
            });
        }
        Ok(())
    }

    /// Fails unless order metadata may change in the current status.
    pub fn ensure_metadata_editable(&self) -> Result<(), OrderError> {
        if !self.status.can_edit_metadata() {
            return Err(OrderError::NotEditable {
                status: self.status,
                action: "edit order",
            });
        }
        Ok(())
    }

    /// Adds an item, merging it into an existing line for the same product
    /// and warehouse. Returns the id of the line that now holds the units.
    pub fn add_item(&mut self, mut item: OrderItem, at: DateTime<Utc>) -> Result<OrderItemId, OrderError> {
        self.ensure_items_editable("add item")?;
        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                quantity: item.quantity,
            });
        }
        if item.unit_price.is_negative() {
            return Err(OrderError::InvalidAmount(item.unit_price));
        }
        item.unit_price = self.in_currency(item.unit_price)?;
        item.discount_amount = self.in_currency(item.discount_amount)?;

        let id = match self
            .items
            .iter_mut()
            .find(|i| i.product_id == item.product_id && i.warehouse_id == item.warehouse_id)
        {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(item.quantity).ok_or(
                    OrderError::InvalidQuantity {
                        quantity: item.quantity,
                    },
                )?;
                existing.id
            }
            None => {
                item.order_id = self.id;
                let id = item.id;
                self.items.push(item);
                id
            }
        };
        self.updated_at = at;
        Ok(id)
    }

    /// Edits one line. Returns the quantity before the edit.
    pub fn update_item(
        &mut self,
        item_id: OrderItemId,
        update: &UpdateItem,
        at: DateTime<Utc>,
    ) -> Result<u32, OrderError> {
        self.ensure_items_editable("update item")?;
        if let Some(&quantity) = update.quantity.as_set() {
            if quantity == 0 {
                return Err(OrderError::InvalidQuantity { quantity });
            }
        }
        for amount in [update.unit_price.as_set(), update.discount_amount.as_set()]
            .into_iter()
            .flatten()
        {
            if amount.is_negative() {
                return Err(OrderError::InvalidAmount(*amount));
            }
        }
        let unit_price = update.unit_price.as_set().map(|&p| self.in_currency(p)).transpose()?;
        let discount = update
            .discount_amount
            .as_set()
            .map(|&d| self.in_currency(d))
            .transpose()?;

        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or(OrderError::ItemNotFound(item_id))?;
        let previous = item.quantity;
        update.quantity.apply_to(&mut item.quantity);
        if let Some(price) = unit_price {
            item.unit_price = price;
        }
        if let Some(discount) = discount {
            item.discount_amount = discount;
        }
        self.updated_at = at;
        Ok(previous)
    }

    /// Pins a caller-supplied amount to the order currency's scale.
    fn in_currency(&self, amount: Money) -> Result<Money, OrderError> {
        amount
            .exact_in(self.currency)
            .ok_or(OrderError::ExcessPrecision {
                amount,
                currency: self.currency,
            })
    }

    /// Removes a line. The last line cannot be removed.
    pub fn remove_item(&mut self, item_id: OrderItemId, at: DateTime<Utc>) -> Result<OrderItem, OrderError> {
        self.ensure_items_editable("remove item")?;
        let index = self
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or(OrderError::ItemNotFound(item_id))?;
        if self.items.len() == 1 {
            return Err(OrderError::NoItems);
        }
        self.updated_at = at;
        Ok(self.items.remove(index))
    }

    /// Stores freshly computed totals. `priced` must come from [`Order::pricing_lines`].
    pub fn apply_pricing(
        &mut self,
        priced: &PricedLines,
        tax_rate: Decimal,
        totals: OrderTotals,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.status.is_frozen() {
            return Err(OrderError::NotEditable {
                status: self.status,
                action: "reprice",
            });
        }
        for (item, total) in self.items.iter_mut().zip(&priced.line_totals) {
            item.line_total = *total;
            item.tax_rate = tax_rate;
        }
        self.totals = totals;
        self.refresh_payment_status();
        self.updated_at = at;
        Ok(())
    }

    /// Edits non-monetary metadata. Address ids are resolved by the caller
    /// and applied through [`Order::replace_address`].
    pub fn edit_metadata(&mut self, update: &UpdateOrder, at: DateTime<Utc>) -> Result<(), OrderError> {
        self.ensure_metadata_editable()?;
        if update.changes_addresses() && self.addresses_locked {
            return Err(OrderError::AddressesLocked);
        }
        update.priority.apply_to(&mut self.priority);
        update.shipping_method.apply_to(&mut self.shipping_method);
        update.required_date.apply_to(&mut self.required_date);
        update.notes.apply_to(&mut self.notes);
        update.discount_code.apply_to(&mut self.discount_code);
        self.updated_at = at;
        Ok(())
    }

    /// Replaces an address snapshot.
    pub fn replace_address(
        &mut self,
        kind: AddressKind,
        address: OrderAddress,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.addresses_locked || !self.status.can_edit_metadata() {
            return Err(OrderError::AddressesLocked);
        }
        match kind {
            AddressKind::Shipping => self.shipping_address = address,
            AddressKind::Billing => self.billing_address = address,
        }
        self.updated_at = at;
        Ok(())
    }

    /// Records goods leaving the warehouse and advances the status.
    ///
    /// Empty `lines` ships every outstanding unit. Shipping from Confirmed
    /// passes through Processing first.
    pub fn record_shipment(
        &mut self,
        lines: &[ShipLine],
        tracking_number: Option<String>,
        carrier: Option<String>,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<Shipment, OrderError> {
        if !self.status.can_ship() {
            return Err(OrderError::NotEditable {
                status: self.status,
                action: "ship",
            });
        }

        let requested = if lines.is_empty() {
            self.items
                .iter()
                .filter(|i| i.outstanding_qty() > 0)
                .map(|i| (i.id, i.outstanding_qty()))
                .collect::<BTreeMap<_, _>>()
        } else {
            let mut requested = BTreeMap::new();
            for line in lines {
                if line.quantity == 0 {
                    return Err(OrderError::InvalidQuantity { quantity: 0 });
                }
                let item = self
                    .item(line.item_id)
                    .ok_or(OrderError::ItemNotFound(line.item_id))?;
                let total: &mut u32 = requested.entry(line.item_id).or_default();
                *total = total.saturating_add(line.quantity);
                if *total > item.outstanding_qty() {
                    return Err(OrderError::QuantityExceeded {
                        item_id: line.item_id,
                        requested: *total,
                        remaining: item.outstanding_qty(),
                    });
                }
            }
            requested
        };
        if requested.is_empty() {
            return Err(OrderError::NotFullyShipped);
        }

        let completes = self.items.iter().all(|i| {
            i.outstanding_qty() == requested.get(&i.id).copied().unwrap_or(0)
        });
        if completes && self.paid_amount < self.totals.total_amount {
            return Err(OrderError::PaymentRequired {
                paid: self.paid_amount,
                total: self.totals.total_amount,
            });
        }

        if self.status == OrderStatus::Confirmed {
            self.transition(OrderStatus::Processing, actor, at, None)?;
        }
        for item in &mut self.items {
            if let Some(qty) = requested.get(&item.id) {
                item.shipped_qty += qty;
            }
        }
        let next = if completes {
            OrderStatus::Shipped
        } else {
            OrderStatus::PartiallyShipped
        };
        self.transition(next, actor, at, tracking_number.clone())?;

        if tracking_number.is_some() {
            self.tracking_number.clone_from(&tracking_number);
        }
        if carrier.is_some() {
            self.carrier.clone_from(&carrier);
        }
        let shipment = Shipment {
            id: ShipmentId::new(),
            tracking_number,
            carrier,
            lines: requested
                .into_iter()
                .map(|(item_id, quantity)| ShipmentLine { item_id, quantity })
                .collect(),
            shipped_at: at,
        };
        self.shipments.push(shipment.clone());
        Ok(shipment)
    }

    /// Records returned goods. Returns the value of the returned units.
    pub fn record_return(&mut self, lines: &[ReturnLine], at: DateTime<Utc>) -> Result<Money, OrderError> {
        if !self.status.can_return() {
            return Err(OrderError::NotEditable {
                status: self.status,
                action: "return items",
            });
        }
        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut requested: BTreeMap<OrderItemId, u32> = BTreeMap::new();
        for line in lines {
            if line.quantity == 0 {
                return Err(OrderError::InvalidQuantity { quantity: 0 });
            }
            let item = self
                .item(line.item_id)
                .ok_or(OrderError::ItemNotFound(line.item_id))?;
            let total = requested.entry(line.item_id).or_default();
            *total = total.saturating_add(line.quantity);
            if *total > item.returnable_qty() {
                return Err(OrderError::QuantityExceeded {
                    item_id: line.item_id,
                    requested: *total,
                    remaining: item.returnable_qty(),
                });
            }
        }

        let mut value = Money::zero();
        for item in &mut self.items {
            if let Some(&qty) = requested.get(&item.id) {
                item.returned_qty += qty;
                value += item.line_total.per_unit(item.quantity).multiply(qty);
            }
        }
        self.updated_at = at;
        Ok(value.round_to(self.currency))
    }

    /// Records an approved payment.
    pub fn record_payment(&mut self, amount: Money, at: DateTime<Utc>) -> Result<(), OrderError> {
        if !amount.is_positive() {
            return Err(OrderError::InvalidAmount(amount));
        }
        if matches!(self.status, OrderStatus::Cancelled | OrderStatus::Refunded) {
            return Err(OrderError::NotEditable {
                status: self.status,
                action: "take payment",
            });
        }
        let amount = amount.round_to(self.currency);
        let outstanding = self.outstanding_balance();
        if amount > outstanding {
            return Err(OrderError::Overpayment {
                amount,
                outstanding,
            });
        }
        self.paid_amount += amount;
        self.refresh_payment_status();
        self.updated_at = at;
        Ok(())
    }

    /// Records a declined payment. Only marks the order failed if nothing
    /// has been paid yet.
    pub fn record_payment_failure(&mut self, at: DateTime<Utc>) {
        if self.paid_amount.is_zero() && self.refunded_amount.is_zero() {
            self.payment_status = PaymentStatus::Failed;
            self.updated_at = at;
        }
    }

    /// Records money returned to the customer.
    pub fn record_refund(&mut self, amount: Money, at: DateTime<Utc>) -> Result<(), OrderError> {
        if !amount.is_positive() {
            return Err(OrderError::InvalidAmount(amount));
        }
        let amount = amount.round_to(self.currency);
        if amount > self.paid_amount {
            return Err(OrderError::RefundExceedsPaid {
                amount,
                refundable: self.paid_amount,
            });
        }
        self.paid_amount -= amount;
        self.refunded_amount += amount;
        self.refresh_payment_status();
        self.updated_at = at;
        Ok(())
    }

    fn refresh_payment_status(&mut self) {
        self.payment_status = if self.refunded_amount.is_positive() {
            if self.paid_amount.is_zero() {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartiallyRefunded
            }
        } else if self.paid_amount.is_zero() {
            match self.payment_status {
                PaymentStatus::Failed => PaymentStatus::Failed,
                _ => PaymentStatus::Unpaid,
            }
        } else if self.paid_amount >= self.totals.total_amount {
            PaymentStatus::Paid
        } else {
            PaymentStatus::PartiallyPaid
        };
    }

    /// Sets the version after a successful write.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::FieldUpdate;
    use crate::pricing::{finalize, price_lines};
    use common::{AddressId, ProductId, WarehouseId};

    fn address() -> OrderAddress {
        OrderAddress {
            source_address_id: AddressId::new(),
            recipient: "Ada Lovelace".into(),
            line1: "1 Analytical Way".into(),
            line2: None,
            city: "London".into(),
            region: "LDN".into(),
            postal_code: "N1".into(),
            country: "GB".into(),
        }
    }

    fn draft() -> Order {
        let now = Utc::now();
        Order::new(NewOrder {
            id: OrderId::new(),
            order_number: OrderNumber::new(2024, 1).unwrap(),
            customer_id: CustomerId::new(),
            order_type: OrderType::Sales,
            priority: Priority::Normal,
            shipping_method: ShippingMethod::Standard,
            currency: Currency::USD,
            shipping_address: address(),
            billing_address: address(),
            discount_code: None,
            required_date: None,
            notes: None,
            created_by: "tester".into(),
            created_at: now,
        })
    }

    fn with_item(order: &mut Order, qty: u32, price: i64) -> OrderItemId {
        let item = OrderItem::new(
            order.id(),
            ProductId::new(),
            WarehouseId::new(),
            qty,
            Money::from_units(price),
        );
        let id = order.add_item(item, Utc::now()).unwrap();
        reprice(order);
        id
    }

    fn reprice(order: &mut Order) {
        let priced = price_lines(order.currency(), &order.pricing_lines()).unwrap();
        let tax = priced.subtotal.apply_rate(Decimal::new(8, 2));
        let totals = finalize(
            order.currency(),
            priced.subtotal,
            Money::zero(),
            tax,
            Money::from_units(10),
        )
        .unwrap();
        order
            .apply_pricing(&priced, Decimal::new(8, 2), totals, Utc::now())
            .unwrap();
    }

    #[test]
    fn test_new_order_is_draft() {
        let order = draft();
        assert_eq!(order.status(), OrderStatus::Draft);
        assert_eq!(order.payment_status(), PaymentStatus::Unpaid);
        assert!(order.history().is_empty());
        assert_eq!(order.total_amount().to_string(), "0.00");
    }

    #[test]
    fn test_add_item_merges_same_key() {
        let mut order = draft();
        let item = OrderItem::new(
            order.id(),
            ProductId::new(),
            WarehouseId::new(),
            2,
            Money::from_units(5),
        );
        let mut again = item.clone();
        again.id = OrderItemId::new();
        again.quantity = 3;

        let first = order.add_item(item, Utc::now()).unwrap();
        let second = order.add_item(again, Utc::now()).unwrap();
        assert_eq!(first, second);
        assert_eq!(order.items().len(), 1);
        assert_eq!(order.items()[0].quantity, 5);
    }

    #[test]
    fn test_pending_requires_items() {
        let mut order = draft();
        assert_eq!(
            order.transition(OrderStatus::Pending, "t", Utc::now(), None),
            Err(OrderError::NoItems)
        );
    }

    #[test]
    fn test_confirm_locks_addresses() {
        let mut order = draft();
        with_item(&mut order, 1, 10);
        order.transition(OrderStatus::Pending, "t", Utc::now(), None).unwrap();
        order.transition(OrderStatus::Confirmed, "t", Utc::now(), None).unwrap();
        assert!(order.addresses_locked());
        assert_eq!(
            order.replace_address(AddressKind::Shipping, address(), Utc::now()),
            Err(OrderError::AddressesLocked)
        );
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let mut order = draft();
        with_item(&mut order, 1, 10);
        order.transition(OrderStatus::Pending, "t", Utc::now(), None).unwrap();
        let before = order.clone();
        assert_eq!(
            order.transition(OrderStatus::Delivered, "t", Utc::now(), None),
            Err(OrderError::InvalidStatusTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Delivered,
            })
        );
        assert_eq!(order, before);
    }

    #[test]
    fn test_cancel_twice() {
        let mut order = draft();
        order.cancel("changed mind", "t", Utc::now()).unwrap();
        assert!(order.cancelled_date().is_some());
        assert_eq!(order.cancel_reason(), Some("changed mind"));
        assert_eq!(
            order.cancel("again", "t", Utc::now()),
            Err(OrderError::AlreadyCancelled)
        );
    }

    #[test]
    fn test_full_shipment_requires_payment() {
        let mut order = draft();
        with_item(&mut order, 2, 50);
        order.transition(OrderStatus::Pending, "t", Utc::now(), None).unwrap();
        order.transition(OrderStatus::Confirmed, "t", Utc::now(), None).unwrap();
        let before = order.clone();

        let err = order
            .record_shipment(&[], None, None, "t", Utc::now())
            .unwrap_err();
        assert!(matches!(err, OrderError::PaymentRequired { .. }));
        assert_eq!(order, before);
    }

    #[test]
    fn test_partial_then_full_shipment() {
        let mut order = draft();
        let item = with_item(&mut order, 3, 10);
        order.transition(OrderStatus::Pending, "t", Utc::now(), None).unwrap();
        order.transition(OrderStatus::Confirmed, "t", Utc::now(), None).unwrap();

        let first = order
            .record_shipment(
                &[ShipLine {
                    item_id: item,
                    quantity: 1,
                }],
                Some("T1".into()),
                Some("UPS".into()),
                "t",
                Utc::now(),
            )
            .unwrap();
        assert_eq!(first.lines[0].quantity, 1);
        assert_eq!(order.status(), OrderStatus::PartiallyShipped);
        assert!(order.shipped_date().is_some());
        let path: Vec<_> = order.history().iter().map(|c| c.to).collect();
        assert_eq!(
            path,
            vec![
                OrderStatus::Pending,
                OrderStatus::Confirmed,
                OrderStatus::Processing,
                OrderStatus::PartiallyShipped,
            ]
        );

        order.record_payment(order.total_amount(), Utc::now()).unwrap();
        order
            .record_shipment(&[], Some("T2".into()), None, "t", Utc::now())
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);
        assert_eq!(order.items()[0].shipped_qty, 3);
        assert_eq!(order.tracking_number(), Some("T2"));
        assert_eq!(order.carrier(), Some("UPS"));
        assert_eq!(order.shipments().len(), 2);
    }

    #[test]
    fn test_ship_more_than_outstanding() {
        let mut order = draft();
        let item = with_item(&mut order, 2, 10);
        order.transition(OrderStatus::Pending, "t", Utc::now(), None).unwrap();
        order.transition(OrderStatus::Confirmed, "t", Utc::now(), None).unwrap();
        let err = order
            .record_shipment(
                &[ShipLine {
                    item_id: item,
                    quantity: 3,
                }],
                None,
                None,
                "t",
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, OrderError::QuantityExceeded { remaining: 2, .. }));
        assert_eq!(order.status(), OrderStatus::Confirmed);
    }

    #[test]
    fn test_payment_status_progression() {
        let mut order = draft();
        with_item(&mut order, 2, 50);
        assert_eq!(order.total_amount().to_string(), "118.00");

        order.record_payment(Money::from_units(18), Utc::now()).unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::PartiallyPaid);
        order.record_payment(Money::from_units(100), Utc::now()).unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Paid);

        assert!(matches!(
            order.record_payment(Money::from_units(1), Utc::now()),
            Err(OrderError::Overpayment { .. })
        ));

        order.record_refund(Money::from_units(18), Utc::now()).unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::PartiallyRefunded);
        assert_eq!(order.paid_amount(), Money::from_units(100));
        order.record_refund(Money::from_units(100), Utc::now()).unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
        assert!(matches!(
            order.record_refund(Money::from_units(1), Utc::now()),
            Err(OrderError::RefundExceedsPaid { .. })
        ));
    }

    #[test]
    fn test_payment_failure_only_when_unpaid() {
        let mut order = draft();
        with_item(&mut order, 1, 10);
        order.record_payment_failure(Utc::now());
        assert_eq!(order.payment_status(), PaymentStatus::Failed);

        order.record_payment(Money::from_units(5), Utc::now()).unwrap();
        order.record_payment_failure(Utc::now());
        assert_eq!(order.payment_status(), PaymentStatus::PartiallyPaid);
    }

    #[test]
    fn test_remove_last_item_rejected() {
        let mut order = draft();
        let only = with_item(&mut order, 1, 10);
        assert_eq!(order.remove_item(only, Utc::now()), Err(OrderError::NoItems));
        let other = with_item(&mut order, 1, 20);
        let removed = order.remove_item(other, Utc::now()).unwrap();
        assert_eq!(removed.id, other);
    }

    #[test]
    fn test_item_amounts_pinned_to_currency_scale() {
        let mut order = draft();
        let id = with_item(&mut order, 2, 50);
        assert_eq!(order.items()[0].unit_price.to_string(), "50.00");
        assert_eq!(order.items()[0].discount_amount.to_string(), "0.00");

        let update = UpdateItem {
            unit_price: FieldUpdate::Set("19.9".parse().unwrap()),
            discount_amount: FieldUpdate::Set(Money::from_units(1)),
            ..UpdateItem::default()
        };
        order.update_item(id, &update, Utc::now()).unwrap();
        assert_eq!(order.items()[0].unit_price.to_string(), "19.90");
        assert_eq!(order.items()[0].discount_amount.to_string(), "1.00");

        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["items"][0]["unit_price"], "19.90");
    }

    #[test]
    fn test_overprecise_amounts_rejected() {
        let mut order = draft();
        let id = with_item(&mut order, 1, 10);
        let fraction: Money = "0.005".parse().unwrap();
        let update = UpdateItem {
            unit_price: FieldUpdate::Set(fraction),
            ..UpdateItem::default()
        };
        assert_eq!(
            order.update_item(id, &update, Utc::now()),
            Err(OrderError::ExcessPrecision {
                amount: fraction,
                currency: Currency::USD,
            })
        );
        assert_eq!(order.items()[0].unit_price.to_string(), "10.00");

        let item = OrderItem::new(order.id(), ProductId::new(), WarehouseId::new(), 1, fraction);
        assert!(matches!(
            order.add_item(item, Utc::now()),
            Err(OrderError::ExcessPrecision { .. })
        ));
        assert_eq!(order.items().len(), 1);
    }

    #[test]
    fn test_update_item_validates() {
        let mut order = draft();
        let item = with_item(&mut order, 1, 10);
        assert_eq!(
            order.update_item(item, &UpdateItem::quantity(0), Utc::now()),
            Err(OrderError::InvalidQuantity { quantity: 0 })
        );
        assert_eq!(
            order.update_item(item, &UpdateItem::quantity(4), Utc::now()),
            Ok(1)
        );
        assert_eq!(order.items()[0].quantity, 4);
    }

    #[test]
    fn test_return_value_is_proportional() {
        let mut order = draft();
        let item = with_item(&mut order, 4, 25);
        order.record_payment(order.total_amount(), Utc::now()).unwrap();
        order.transition(OrderStatus::Pending, "t", Utc::now(), None).unwrap();
        order.transition(OrderStatus::Confirmed, "t", Utc::now(), None).unwrap();
        order.record_shipment(&[], None, None, "t", Utc::now()).unwrap();

        let value = order
            .record_return(
                &[ReturnLine {
                    item_id: item,
                    quantity: 1,
                    condition: crate::inventory::ItemCondition::New,
                }],
                Utc::now(),
            )
            .unwrap();
        assert_eq!(value.to_string(), "25.00");
        assert_eq!(order.items()[0].returned_qty, 1);
    }

    #[test]
    fn test_frozen_order_cannot_reprice() {
        let mut order = draft();
        order.cancel("x", "t", Utc::now()).unwrap();
        let priced = price_lines(Currency::USD, &[]).unwrap();
        assert!(matches!(
            order.apply_pricing(&priced, Decimal::ZERO, OrderTotals::zero(Currency::USD), Utc::now()),
            Err(OrderError::NotEditable { .. })
        ));
    }

    #[test]
    fn test_credit_exposure() {
        let mut order = draft();
        with_item(&mut order, 2, 50);
        order.record_payment(Money::from_units(18), Utc::now()).unwrap();
        assert_eq!(order.credit_exposure(), Money::from_units(100));
        order.cancel("x", "t", Utc::now()).unwrap();
        assert_eq!(order.credit_exposure(), Money::zero());
    }
}
