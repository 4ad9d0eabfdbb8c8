//! # Marketplace Order Lifecycle
//!
//! Orders advance free-form: an administrator may set any known status from
//! any other, including moving a cancelled order back to `placed`. Only
//! unknown status names are refused. Every advance is recorded.
//!
//! ```text
//! Placed ─▶ Confirmed ─▶ InTransit ─▶ Delivered     (usual path)
//!   └──────────┴────────────┴──────────▶ Cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Note written when an order is first placed.
pub const PLACED_NOTE: &str = "Order placed";
/// Default note for an administrator status update.
pub const UPDATED_NOTE: &str = "Status updated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Placed,
    Confirmed,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        Self::Placed,
        Self::Confirmed,
        Self::InTransit,
        Self::Delivered,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placed => "placed",
            Self::Confirmed => "confirmed",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }

    /// Awaiting fulfilment: placed or confirmed.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Placed | Self::Confirmed)
    }

    /// Whether the order claims its listing. Cancelled orders release it.
    pub fn claims_listing(&self) -> bool {
        *self != Self::Cancelled
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| OrderError::UnknownStatus(s.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("invalid order status: \"{0}\"")]
    UnknownStatus(String),
}

/// One row of the append-only order status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusChange {
    pub status: OrderStatus,
    pub note: String,
    pub changed_at: DateTime<Utc>,
}

impl OrderStatusChange {
    pub fn new(status: OrderStatus, note: impl Into<String>) -> Self {
        Self {
            status,
            note: note.into(),
            changed_at: Utc::now(),
        }
    }

    pub fn placed() -> Self {
        Self::new(OrderStatus::Placed, PLACED_NOTE)
    }
}

/// A record carrying an order status and its history.
pub trait OrderLifecycle {
    fn order_status(&self) -> OrderStatus;

    fn apply_order_change(&mut self, change: OrderStatusChange);

    /// Set `target` unconditionally and record it. An empty note becomes
    /// "Status updated".
    fn advance_status(&mut self, target: OrderStatus, note: &str) -> OrderStatusChange {
        let note = if note.trim().is_empty() { UPDATED_NOTE } else { note };
        let change = OrderStatusChange::new(target, note);
        self.apply_order_change(change.clone());
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Order {
        status: OrderStatus,
        history: Vec<OrderStatusChange>,
    }

    impl OrderLifecycle for Order {
        fn order_status(&self) -> OrderStatus {
            self.status
        }
        fn apply_order_change(&mut self, change: OrderStatusChange) {
            self.status = change.status;
            self.history.push(change);
        }
    }

    fn placed() -> Order {
        Order {
            status: OrderStatus::Placed,
            history: vec![OrderStatusChange::placed()],
        }
    }

    #[test]
    fn any_status_reachable_from_any_status() {
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                let mut o = Order {
                    status: from,
                    history: Vec::new(),
                };
                o.advance_status(to, "");
                assert_eq!(o.order_status(), to);
                assert_eq!(o.history.len(), 1);
            }
        }
    }

    #[test]
    fn empty_note_defaults() {
        let mut o = placed();
        let c = o.advance_status(OrderStatus::Confirmed, "  ");
        assert_eq!(c.note, UPDATED_NOTE);
        let c = o.advance_status(OrderStatus::InTransit, "Handed to courier");
        assert_eq!(c.note, "Handed to courier");
        assert_eq!(o.history.len(), 3);
        assert_eq!(o.history[0].note, PLACED_NOTE);
    }

    #[test]
    fn unknown_status_rejected() {
        assert_eq!(
            "shipped".parse::<OrderStatus>().unwrap_err(),
            OrderError::UnknownStatus("shipped".into())
        );
    }

    #[test]
    fn pending_and_claim_predicates() {
        assert!(OrderStatus::Placed.is_pending());
        assert!(OrderStatus::Confirmed.is_pending());
        assert!(!OrderStatus::InTransit.is_pending());
        assert!(OrderStatus::Delivered.claims_listing());
        assert!(!OrderStatus::Cancelled.claims_listing());
    }
}
