//! Order records as they arrive from the two order feeds.
//!
//! Both feeds are loosely shaped JSON produced by several clients, so parsing
//! is tolerant: alternate key spellings are accepted, missing prices and
//! quantities default, and a record without an id is dropped rather than
//! failing the whole batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::OrderStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    Active,
    CancelledFeed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub price: f64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub room_number: String,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    pub source: OrderSource,
}

impl Order {
    /// Parse one record of the active-orders feed.
    pub fn from_feed_value(v: &Value) -> Option<Order> {
        let id = str_any(v, &["_id", "id", "orderId"])?;
        let status = str_any(v, &["status"])
            .map(|s| OrderStatus::normalize(&s))
            .unwrap_or_else(|| OrderStatus::Other(String::new()));
        Some(Order {
            id,
            room_number: room_any(v).unwrap_or_default(),
            status,
            items: parse_items(v.get("items")),
            cancellation_reason: str_any(v, &["cancellationReason", "cancellation_reason"]),
            source: OrderSource::Active,
        })
    }

    /// Parse one record of the cancelled-orders feed. These are keyed by the
    /// id of the order they cancel and always carry `cancelled` status unless
    /// the record says otherwise.
    pub fn from_cancelled_value(v: &Value) -> Option<Order> {
        // `_id` here is the cancellation document's own id, not the order's.
        let id = str_any(v, &["originalOrderId", "original_order_id", "orderId"])?;
        let status = str_any(v, &["status"])
            .map(|s| OrderStatus::normalize(&s))
            .unwrap_or(OrderStatus::Cancelled);
        let items = v
            .get("items")
            .or_else(|| v.get("originalOrder").and_then(|o| o.get("items")));
        let room_number = room_any(v)
            .or_else(|| v.get("originalOrder").and_then(room_any))
            .unwrap_or_default();
        Some(Order {
            id,
            room_number,
            status,
            items: parse_items(items),
            cancellation_reason: str_any(
                v,
                &["cancellationReason", "cancellation_reason", "reason"],
            ),
            source: OrderSource::CancelledFeed,
        })
    }

    pub fn total(&self) -> f64 {
        self.items
            .iter()
            .map(|item| item.price * f64::from(item.quantity))
            .sum()
    }

    pub fn item_summary(&self) -> String {
        self.items
            .iter()
            .map(|item| format!("{}x {}", item.quantity, item.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Parse the active feed for one room: drops malformed records, other rooms,
/// and unrecognised statuses, then orders newest-first by id.
pub fn parse_active_feed(body: &Value, room: &str) -> Vec<Order> {
    let mut orders: Vec<Order> = feed_array(body, &["orders", "data"])
        .iter()
        .filter_map(Order::from_feed_value)
        .filter(|o| o.room_number == room.trim())
        .filter(|o| o.status.is_recognized())
        .collect();
    // Document ids are time-ordered, so descending id is newest-first.
    orders.sort_by(|a, b| b.id.cmp(&a.id));
    orders
}

pub fn parse_cancelled_feed(body: &Value, room: &str) -> Vec<Order> {
    feed_array(body, &["cancelledOrders", "orders", "data"])
        .iter()
        .filter_map(Order::from_cancelled_value)
        .filter(|o| o.room_number == room.trim())
        .collect()
}

fn feed_array<'a>(body: &'a Value, wrapper_keys: &[&str]) -> &'a [Value] {
    if let Some(arr) = body.as_array() {
        return arr;
    }
    for key in wrapper_keys {
        if let Some(arr) = body.get(*key).and_then(Value::as_array) {
            return arr;
        }
    }
    &[]
}

fn parse_items(raw: Option<&Value>) -> Vec<OrderItem> {
    let Some(arr) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };
    arr.iter()
        .map(|item| OrderItem {
            name: str_any(item, &["name", "title"]).unwrap_or_default(),
            price: num_any(item, &["price"]).unwrap_or(0.0),
            quantity: num_any(item, &["quantity", "qty"])
                .filter(|q| *q >= 0.0)
                .map(|q| q as u32)
                .unwrap_or(1),
        })
        .collect()
}

fn str_any(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(Value::as_str) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn num_any(v: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match v.get(*key) {
            Some(Value::Number(n)) => return n.as_f64(),
            Some(Value::String(s)) => {
                if let Ok(n) = s.trim().parse::<f64>() {
                    return Some(n);
                }
            }
            _ => {}
        }
    }
    None
}

/// Room numbers show up as `"204"` or `204` depending on the producer.
fn room_any(v: &Value) -> Option<String> {
    for key in ["roomNumber", "room_number", "room"] {
        match v.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}
