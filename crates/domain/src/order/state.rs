//! Order state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// Allowed transitions:
/// ```text
/// Draft ──────────► Pending ◄──────────┐
///   │                 │   │            │
///   │                 │   └──► OnHold ─┤
///   │                 ▼          │     │
///   │             Confirmed ◄────┘     │
///   │                 │   └──► OnHold ─┘
///   │                 ▼
///   │             Processing ──► PartiallyShipped ─┐ (loops)
///   │                 │                │           │
///   │                 └───────┬────────┘◄──────────┘
///   │                         ▼
///   │                      Shipped ──► Delivered ──► Refunded
///   │                         └────────────────────► Refunded
///   └──► Cancelled  (also from Pending, Confirmed, OnHold, Processing, PartiallyShipped)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order is being assembled; items and addresses can change.
    #[default]
    Draft,

    /// Submitted by the customer, awaiting confirmation.
    Pending,

    /// Accepted for fulfilment; address snapshots are locked.
    Confirmed,

    /// Parked by an operator.
    OnHold,

    /// Being picked and packed.
    Processing,

    /// Some, but not all, units have shipped.
    PartiallyShipped,

    /// Every unit has shipped.
    Shipped,

    /// Received by the customer.
    Delivered,

    /// Cancelled before completion (terminal).
    Cancelled,

    /// Payment returned after shipment (terminal).
    Refunded,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Draft,
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::OnHold,
        OrderStatus::Processing,
        OrderStatus::PartiallyShipped,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    /// Returns the statuses reachable from this one in a single step.
    pub fn allowed_next(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Draft => &[Pending, Cancelled],
            Pending => &[Confirmed, OnHold, Cancelled],
            Confirmed => &[Processing, OnHold, Cancelled],
            OnHold => &[Pending, Confirmed, Cancelled],
            Processing => &[PartiallyShipped, Shipped, Cancelled],
            PartiallyShipped => &[PartiallyShipped, Shipped, Cancelled],
            Shipped => &[Delivered, Refunded],
            Delivered => &[Refunded],
            Cancelled | Refunded => &[],
        }
    }

    /// Returns true if the graph has an edge from this status to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    /// Returns true if items can be added, changed or removed in this status.
    pub fn can_modify_items(&self) -> bool {
        matches!(self, OrderStatus::Draft | OrderStatus::Pending)
    }

    /// Returns true if non-monetary metadata can be edited in this status.
    pub fn can_edit_metadata(&self) -> bool {
        matches!(
            self,
            OrderStatus::Draft | OrderStatus::Pending | OrderStatus::OnHold
        )
    }

    /// Returns true if goods can be shipped from this status.
    pub fn can_ship(&self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Processing | OrderStatus::PartiallyShipped
        )
    }

    /// Returns true if shipped goods can come back in this status.
    pub fn can_return(&self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Delivered)
    }

    /// Returns true if this status has no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Returns true if monetary and item fields can no longer change.
    pub fn is_frozen(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "Draft",
            OrderStatus::Pending => "Pending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::OnHold => "OnHold",
            OrderStatus::Processing => "Processing",
            OrderStatus::PartiallyShipped => "PartiallyShipped",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Refunded => "Refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn test_default_status_is_draft() {
        assert_eq!(OrderStatus::default(), Draft);
    }

    #[test]
    fn test_transition_table() {
        assert!(Draft.can_transition_to(Pending));
        assert!(Draft.can_transition_to(Cancelled));
        assert!(!Draft.can_transition_to(Confirmed));

        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(OnHold));
        assert!(!Pending.can_transition_to(Delivered));

        assert!(OnHold.can_transition_to(Pending));
        assert!(OnHold.can_transition_to(Confirmed));

        assert!(Confirmed.can_transition_to(Processing));
        assert!(!Confirmed.can_transition_to(Shipped));

        assert!(Processing.can_transition_to(PartiallyShipped));
        assert!(PartiallyShipped.can_transition_to(PartiallyShipped));
        assert!(PartiallyShipped.can_transition_to(Shipped));

        assert!(Shipped.can_transition_to(Delivered));
        assert!(Shipped.can_transition_to(Refunded));
        assert!(!Shipped.can_transition_to(Cancelled));

        assert!(Delivered.can_transition_to(Refunded));
        assert!(!Delivered.can_transition_to(Cancelled));
    }

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        for status in OrderStatus::ALL {
            let terminal = matches!(status, Cancelled | Refunded);
            assert_eq!(status.is_terminal(), terminal, "{status}");
            if terminal {
                assert!(OrderStatus::ALL.iter().all(|s| !status.can_transition_to(*s)));
            }
        }
    }

    #[test]
    fn test_frozen_statuses() {
        assert!(Delivered.is_frozen());
        assert!(Cancelled.is_frozen());
        assert!(Refunded.is_frozen());
        assert!(!Shipped.is_frozen());
    }

    #[test]
    fn test_item_and_metadata_edit_windows() {
        assert!(Draft.can_modify_items());
        assert!(Pending.can_modify_items());
        assert!(!OnHold.can_modify_items());
        assert!(OnHold.can_edit_metadata());
        assert!(!Confirmed.can_edit_metadata());
    }

    #[test]
    fn test_ship_and_return_windows() {
        assert!(Confirmed.can_ship());
        assert!(Processing.can_ship());
        assert!(PartiallyShipped.can_ship());
        assert!(!Shipped.can_ship());
        assert!(Shipped.can_return());
        assert!(Delivered.can_return());
        assert!(!Processing.can_return());
    }

    #[test]
    fn test_display() {
        assert_eq!(PartiallyShipped.to_string(), "PartiallyShipped");
        assert_eq!(OnHold.to_string(), "OnHold");
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&Processing).unwrap();
        let back: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Processing);
    }
}
