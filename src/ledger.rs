//! Acknowledgement ledgers and the visibility rule built on them.
//!
//! Both ledgers are plain string maps so their persisted JSON stays the flat
//! object shape the guest UI has always written.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::orders::Order;
use crate::status::OrderStatus;

fn pair_key(order_id: &str, status: &OrderStatus) -> String {
    format!("{order_id}-{}", status.as_str())
}

/// Set of `(orderId, status)` pairs, persisted as `{"<id>-<status>": true}`.
/// Entries are only ever added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeenStatusLedger {
    entries: BTreeMap<String, bool>,
}

impl SeenStatusLedger {
    pub fn has_seen(&self, order_id: &str, status: &OrderStatus) -> bool {
        self.entries
            .get(&pair_key(order_id, status))
            .copied()
            .unwrap_or(false)
    }

    /// Returns `true` when the pair was not already present.
    pub fn mark_seen(&mut self, order_id: &str, status: &OrderStatus) -> bool {
        let previous = self.entries.insert(pair_key(order_id, status), true);
        previous != Some(true)
    }

    pub fn len(&self) -> usize {
        self.entries.values().filter(|v| **v).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `orderId -> status at the moment the guest removed it from the bell`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemovalLedger {
    entries: BTreeMap<String, String>,
}

impl RemovalLedger {
    /// Overwrites any earlier removal of the same order.
    pub fn record_removal(&mut self, order_id: &str, status: &OrderStatus) -> bool {
        let previous = self
            .entries
            .insert(order_id.to_string(), status.as_str().to_string());
        previous.as_deref() != Some(status.as_str())
    }

    pub fn status_at_removal(&self, order_id: &str) -> Option<OrderStatus> {
        self.entries
            .get(order_id)
            .map(|raw| OrderStatus::normalize(raw))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether an order should currently be surfaced to the guest.
///
/// An order removed at `delivered`/`cancelled` stays hidden forever; one
/// removed at any other status comes back only once its live status moves on.
pub fn is_visible(order: &Order, removals: &RemovalLedger) -> bool {
    if order.id.trim().is_empty() {
        return false;
    }
    match removals.status_at_removal(&order.id) {
        None => true,
        Some(removed_at) if removed_at.is_terminal() => false,
        Some(removed_at) => removed_at != order.status,
    }
}
