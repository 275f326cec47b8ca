//! Transient toast popups, newest first, at most one per order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orders::Order;
use crate::status::OrderStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toast {
    pub id: String,
    pub order_id: String,
    pub room_number: String,
    pub status: OrderStatus,
    pub emoji: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub item_summary: String,
    #[serde(default)]
    pub total: f64,
    pub created_at: DateTime<Utc>,
}

impl Toast {
    pub fn for_order(order: &Order) -> Toast {
        let display = order.status.display();
        Toast {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            room_number: order.room_number.clone(),
            status: order.status.clone(),
            emoji: display.emoji.to_string(),
            message: display.message.to_string(),
            reason: order.cancellation_reason.clone(),
            item_summary: order.item_summary(),
            total: order.total(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToastQueue {
    toasts: Vec<Toast>,
}

impl ToastQueue {
    /// Replace any toast for the same order, then put this one on top.
    pub fn push_front(&mut self, toast: Toast) {
        self.toasts.retain(|t| t.order_id != toast.order_id);
        self.toasts.insert(0, toast);
    }

    /// Prepend a batch given in display order (first element ends up on top).
    pub fn prepend_all(&mut self, toasts: &[Toast]) {
        for toast in toasts.iter().rev() {
            self.push_front(toast.clone());
        }
    }

    pub fn remove_order(&mut self, order_id: &str) -> Option<Toast> {
        let idx = self.toasts.iter().position(|t| t.order_id == order_id)?;
        Some(self.toasts.remove(idx))
    }

    pub fn get(&self, order_id: &str) -> Option<&Toast> {
        self.toasts.iter().find(|t| t.order_id == order_id)
    }

    pub fn clear(&mut self) {
        self.toasts.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Toast> {
        self.toasts.iter()
    }

    pub fn len(&self) -> usize {
        self.toasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toasts.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Toast> {
        self.toasts.clone()
    }
}
