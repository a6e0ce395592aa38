use chrono::{DateTime, Utc};
use common::CustomerId;
use domain::{Order, OrderStatus};

/// Builder for constructing order queries.
///
/// Filters combine with AND; `statuses` matches any of the listed values.
/// Results are ordered by creation time, then id.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// Filter by customer.
    pub customer_id: Option<CustomerId>,

    /// Filter by status (any of these).
    pub statuses: Option<Vec<OrderStatus>>,

    /// Orders created at or after this instant.
    pub created_from: Option<DateTime<Utc>>,

    /// Orders created at or before this instant.
    pub created_to: Option<DateTime<Utc>>,

    /// Maximum number of orders to return.
    pub limit: Option<usize>,

    /// Number of orders to skip.
    pub offset: Option<usize>,
}

impl OrderFilter {
    /// Creates a filter that matches every order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter for one customer's orders.
    pub fn for_customer(customer_id: CustomerId) -> Self {
        Self {
            customer_id: Some(customer_id),
            ..Default::default()
        }
    }

    pub fn customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.statuses = Some(vec![status]);
        self
    }

    pub fn statuses(mut self, statuses: Vec<OrderStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn created_from(mut self, from: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self
    }

    pub fn created_to(mut self, to: DateTime<Utc>) -> Self {
        self.created_to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the order passes every filter. Paging is not applied.
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(customer_id) = self.customer_id
            && order.customer_id() != customer_id
        {
            return false;
        }
        if let Some(ref statuses) = self.statuses
            && !statuses.contains(&order.status())
        {
            return false;
        }
        if let Some(from) = self.created_from
            && order.created_at() < from
        {
            return false;
        }
        if let Some(to) = self.created_to
            && order.created_at() > to
        {
            return false;
        }
        true
    }

    /// Sorts, then applies offset and limit.
    pub fn page(&self, mut orders: Vec<Order>) -> Vec<Order> {
        orders.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then(a.id().cmp(&b.id())));
        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        orders.into_iter().skip(offset).take(limit).collect()
    }
}
