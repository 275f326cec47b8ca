//! Order status vocabulary.
//!
//! Status strings arrive from several producers with inconsistent casing and
//! spacing (`"on the way"`, `"On-The-Way"`, `"on_the_way"`). Everything is
//! funnelled through [`OrderStatus::normalize`] at the feed boundary so the
//! rest of the crate compares enum variants, never raw strings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Acknowledged,
    Preparing,
    OnTheWay,
    Delivered,
    Cancelled,
    /// Anything the feed sends that we do not recognise, kept in normalized form.
    Other(String),
}

/// Icon + headline shown for a status in toasts and the bell popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusDisplay {
    pub emoji: &'static str,
    pub message: &'static str,
}

impl OrderStatus {
    pub fn normalize(raw: &str) -> OrderStatus {
        let key: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match key.as_str() {
            "pending" => OrderStatus::Pending,
            "acknowledged" => OrderStatus::Acknowledged,
            "preparing" => OrderStatus::Preparing,
            "on_the_way" | "ontheway" => OrderStatus::OnTheWay,
            "delivered" => OrderStatus::Delivered,
            "cancelled" | "canceled" => OrderStatus::Cancelled,
            _ => OrderStatus::Other(key),
        }
    }

    /// Canonical snake_case form, used in ledger keys and persisted snapshots.
    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Acknowledged => "acknowledged",
            OrderStatus::Preparing => "preparing",
            OrderStatus::OnTheWay => "on_the_way",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Other(s) => s.as_str(),
        }
    }

    /// Statuses that produce a toast + sound when an order moves into them.
    /// A freshly placed (`pending`) order is not itself news.
    pub fn is_notify_worthy(&self) -> bool {
        matches!(
            self,
            OrderStatus::Acknowledged
                | OrderStatus::Preparing
                | OrderStatus::OnTheWay
                | OrderStatus::Delivered
                | OrderStatus::Cancelled
        )
    }

    /// Removing an order from the bell at one of these statuses hides it for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, OrderStatus::Other(_))
    }

    pub fn display(&self) -> StatusDisplay {
        classify(self)
    }
}

pub fn classify(status: &OrderStatus) -> StatusDisplay {
    let (emoji, message) = match status {
        OrderStatus::Pending => ("🕒", "Order Received"),
        OrderStatus::Acknowledged => ("✅", "Order Acknowledged"),
        OrderStatus::Preparing => ("👨‍🍳", "Preparing Your Order"),
        OrderStatus::OnTheWay => ("🛎️", "On The Way"),
        OrderStatus::Delivered => ("🎉", "Delivered!"),
        OrderStatus::Cancelled => ("❌", "Order Cancelled"),
        OrderStatus::Other(_) => ("🔔", "Order Updated"),
    };
    StatusDisplay { emoji, message }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(OrderStatus::normalize(&raw))
    }
}
