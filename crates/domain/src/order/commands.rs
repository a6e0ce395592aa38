//! Order commands.
//!
//! Commands are already-validated typed requests. Partial updates use
//! [`FieldUpdate`] so that "leave alone" and "set to this value" are
//! always distinguishable, including for optional fields.

use chrono::{DateTime, Utc};
use common::{AddressId, CustomerId, Money, OrderItemId, ProductId, WarehouseId};

use crate::inventory::ItemCondition;

use super::{OrderStatus, OrderType, PaymentMethod, Priority, ShippingMethod};

/// A single field of a partial update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate<T> {
    /// Keep the current value.
    #[default]
    Unchanged,
    /// Replace the current value.
    Set(T),
}

impl<T> FieldUpdate<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, FieldUpdate::Set(_))
    }

    /// Returns the new value, if any.
    pub fn as_set(&self) -> Option<&T> {
        match self {
            FieldUpdate::Set(value) => Some(value),
            FieldUpdate::Unchanged => None,
        }
    }

    /// Returns the new value or `current`.
    pub fn resolve<'a>(&'a self, current: &'a T) -> &'a T {
        self.as_set().unwrap_or(current)
    }
}

impl<T: Clone> FieldUpdate<T> {
    /// Writes the new value into `target`. Returns true if a value was set.
    pub fn apply_to(&self, target: &mut T) -> bool {
        match self {
            FieldUpdate::Set(value) => {
                *target = value.clone();
                true
            }
            FieldUpdate::Unchanged => false,
        }
    }
}

/// A product line requested on create or add-item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Overrides the catalog price.
    pub unit_price: Option<Money>,
    /// Overrides the product's default warehouse.
    pub warehouse_id: Option<WarehouseId>,
}

impl NewOrderLine {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
            unit_price: None,
            warehouse_id: None,
        }
    }

    pub fn with_unit_price(mut self, unit_price: Money) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    pub fn from_warehouse(mut self, warehouse_id: WarehouseId) -> Self {
        self.warehouse_id = Some(warehouse_id);
        self
    }
}

/// Command to create a new order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub customer_id: CustomerId,
    pub order_type: OrderType,
    pub priority: Priority,
    pub shipping_method: ShippingMethod,
    pub shipping_address_id: AddressId,
    pub billing_address_id: AddressId,
    /// ISO-4217 code; validated by the service.
    pub currency: String,
    pub items: Vec<NewOrderLine>,
    pub discount_code: Option<String>,
    pub required_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl CreateOrder {
    /// Creates a standard sales order request with no items.
    pub fn new(
        customer_id: CustomerId,
        shipping_address_id: AddressId,
        billing_address_id: AddressId,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            customer_id,
            order_type: OrderType::Sales,
            priority: Priority::Normal,
            shipping_method: ShippingMethod::Standard,
            shipping_address_id,
            billing_address_id,
            currency: currency.into(),
            items: Vec::new(),
            discount_code: None,
            required_date: None,
            notes: None,
        }
    }

    pub fn with_item(mut self, line: NewOrderLine) -> Self {
        self.items.push(line);
        self
    }

    pub fn with_shipping_method(mut self, method: ShippingMethod) -> Self {
        self.shipping_method = method;
        self
    }

    pub fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_discount_code(mut self, code: impl Into<String>) -> Self {
        self.discount_code = Some(code.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Command to edit order metadata.
#[derive(Debug, Clone, Default)]
pub struct UpdateOrder {
    pub priority: FieldUpdate<Priority>,
    pub shipping_method: FieldUpdate<ShippingMethod>,
    pub required_date: FieldUpdate<Option<DateTime<Utc>>>,
    pub notes: FieldUpdate<Option<String>>,
    pub discount_code: FieldUpdate<Option<String>>,
    pub shipping_address_id: FieldUpdate<AddressId>,
    pub billing_address_id: FieldUpdate<AddressId>,
}

impl UpdateOrder {
    /// Returns true if nothing would change.
    pub fn is_empty(&self) -> bool {
        !(self.priority.is_set()
            || self.shipping_method.is_set()
            || self.required_date.is_set()
            || self.notes.is_set()
            || self.discount_code.is_set()
            || self.shipping_address_id.is_set()
            || self.billing_address_id.is_set())
    }

    /// Returns true if the edit changes an input of the totals.
    pub fn affects_totals(&self) -> bool {
        self.shipping_method.is_set()
            || self.discount_code.is_set()
            || self.shipping_address_id.is_set()
    }

    pub fn changes_addresses(&self) -> bool {
        self.shipping_address_id.is_set() || self.billing_address_id.is_set()
    }
}

/// Command to move an order to a new status.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    pub note: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: OrderStatus) -> Self {
        Self { status, note: None }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Command to cancel an order.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub reason: String,
    /// Refund whatever has been paid.
    pub refund: bool,
}

impl CancelOrder {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            refund: false,
        }
    }

    pub fn with_refund(mut self) -> Self {
        self.refund = true;
        self
    }
}

/// Quantity of one item to ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShipLine {
    pub item_id: OrderItemId,
    pub quantity: u32,
}

/// Command to ship some or all outstanding units.
#[derive(Debug, Clone, Default)]
pub struct ShipItems {
    /// Lines to ship. Empty means every outstanding unit.
    pub lines: Vec<ShipLine>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
}

impl ShipItems {
    /// Ships every outstanding unit.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn lines(lines: Vec<ShipLine>) -> Self {
        Self {
            lines,
            ..Self::default()
        }
    }

    pub fn with_tracking(mut self, tracking_number: impl Into<String>) -> Self {
        self.tracking_number = Some(tracking_number.into());
        self
    }

    pub fn with_carrier(mut self, carrier: impl Into<String>) -> Self {
        self.carrier = Some(carrier.into());
        self
    }

    pub fn ships_everything(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Quantity of one item coming back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnLine {
    pub item_id: OrderItemId,
    pub quantity: u32,
    pub condition: ItemCondition,
}

/// Command to accept returned goods.
#[derive(Debug, Clone)]
pub struct ReturnItems {
    pub lines: Vec<ReturnLine>,
    /// Refund the value of the returned lines.
    pub refund: bool,
    pub reason: Option<String>,
}

impl ReturnItems {
    pub fn new(lines: Vec<ReturnLine>) -> Self {
        Self {
            lines,
            refund: false,
            reason: None,
        }
    }

    pub fn with_refund(mut self) -> Self {
        self.refund = true;
        self
    }
}

/// Command to take a payment.
#[derive(Debug, Clone, Copy)]
pub struct ProcessPayment {
    pub amount: Money,
    pub method: PaymentMethod,
}

impl ProcessPayment {
    pub fn new(amount: Money, method: PaymentMethod) -> Self {
        Self { amount, method }
    }
}

/// Command to return money to the customer.
#[derive(Debug, Clone)]
pub struct RefundOrder {
    /// Amount to refund. `None` refunds everything still refundable.
    pub amount: Option<Money>,
    pub reason: String,
}

impl RefundOrder {
    pub fn full(reason: impl Into<String>) -> Self {
        Self {
            amount: None,
            reason: reason.into(),
        }
    }

    pub fn partial(amount: Money, reason: impl Into<String>) -> Self {
        Self {
            amount: Some(amount),
            reason: reason.into(),
        }
    }
}

/// Command to edit one line.
#[derive(Debug, Clone, Default)]
pub struct UpdateItem {
    pub quantity: FieldUpdate<u32>,
    pub unit_price: FieldUpdate<Money>,
    pub discount_amount: FieldUpdate<Money>,
}

impl UpdateItem {
    pub fn quantity(quantity: u32) -> Self {
        Self {
            quantity: FieldUpdate::Set(quantity),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_update_apply() {
        let mut value = Some("old".to_string());
        assert!(!FieldUpdate::Unchanged.apply_to(&mut value));
        assert_eq!(value.as_deref(), Some("old"));

        assert!(FieldUpdate::Set(None).apply_to(&mut value));
        assert_eq!(value, None);
    }

    #[test]
    fn test_field_update_resolve() {
        let current = 3u32;
        assert_eq!(*FieldUpdate::Unchanged.resolve(&current), 3);
        assert_eq!(*FieldUpdate::Set(7).resolve(&current), 7);
    }

    #[test]
    fn test_update_order_flags() {
        let empty = UpdateOrder::default();
        assert!(empty.is_empty());
        assert!(!empty.affects_totals());

        let notes_only = UpdateOrder {
            notes: FieldUpdate::Set(Some("gift wrap".into())),
            ..UpdateOrder::default()
        };
        assert!(!notes_only.is_empty());
        assert!(!notes_only.affects_totals());

        let method = UpdateOrder {
            shipping_method: FieldUpdate::Set(ShippingMethod::Express),
            ..UpdateOrder::default()
        };
        assert!(method.affects_totals());
    }

    #[test]
    fn test_create_order_builder() {
        let cmd = CreateOrder::new(CustomerId::new(), AddressId::new(), AddressId::new(), "usd")
            .with_item(NewOrderLine::new(ProductId::new(), 2))
            .with_discount_code("SAVE10");
        assert_eq!(cmd.items.len(), 1);
        assert_eq!(cmd.order_type, OrderType::Sales);
        assert_eq!(cmd.discount_code.as_deref(), Some("SAVE10"));
    }
}
