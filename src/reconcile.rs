//! Per-tick diff of order statuses into toasts, sounds and the unread count.
//!
//! `reconcile` is pure: it reads the ledgers and the previous status map and
//! returns what should happen. The session applies the outcome.

use std::collections::{HashMap, HashSet};

use crate::ledger::{is_visible, RemovalLedger, SeenStatusLedger};
use crate::orders::{Order, OrderSource};
use crate::status::OrderStatus;
use crate::toast::Toast;

/// Last status observed per order in this process. Active and cancelled
/// feed records are tracked separately so each feed diffs against itself.
pub type StatusMap = HashMap<(OrderSource, String), OrderStatus>;

#[derive(Clone, Copy)]
pub struct Ledgers<'a> {
    /// Pairs the guest has acknowledged.
    pub seen: &'a SeenStatusLedger,
    /// Pairs already toasted and sounded.
    pub announced: &'a SeenStatusLedger,
    pub removals: &'a RemovalLedger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundCue {
    pub order_id: String,
    pub status: OrderStatus,
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// New toasts in display order: the first one belongs on top.
    pub toasts_to_add: Vec<Toast>,
    pub sounds_to_play: Vec<SoundCue>,
    pub unread_count: usize,
    pub updated_status_map: StatusMap,
}

/// Diff `current` (active orders followed by cancelled-feed records) against
/// `previous` and decide which transitions notify.
pub fn reconcile(
    current: &[Order],
    previous: &StatusMap,
    ledgers: Ledgers<'_>,
) -> ReconcileOutcome {
    let mut updated_status_map = previous.clone();
    let mut toasts_to_add = Vec::new();
    let mut sounds_to_play = Vec::new();
    let mut emitted: HashSet<(&str, &OrderStatus)> = HashSet::new();
    let shown = latest_per_order(current);

    for order in current {
        if order.id.trim().is_empty() {
            continue;
        }
        let key = (order.source, order.id.clone());
        if previous.get(&key) == Some(&order.status) {
            continue;
        }
        updated_status_map.insert(key, order.status.clone());

        // An active record shadowed by its cancellation is tracked but never announced.
        if !shown.iter().any(|o| std::ptr::eq(*o, order)) {
            continue;
        }
        if !should_notify(order, ledgers) {
            continue;
        }
        // The same cancellation can arrive on both feeds in one tick.
        if !emitted.insert((order.id.as_str(), &order.status)) {
            continue;
        }
        toasts_to_add.push(Toast::for_order(order));
        sounds_to_play.push(SoundCue {
            order_id: order.id.clone(),
            status: order.status.clone(),
        });
    }

    ReconcileOutcome {
        toasts_to_add,
        sounds_to_play,
        unread_count: unread_count(current, ledgers),
        updated_status_map,
    }
}

fn should_notify(order: &Order, ledgers: Ledgers<'_>) -> bool {
    order.status.is_notify_worthy()
        && !ledgers.seen.has_seen(&order.id, &order.status)
        && !ledgers.announced.has_seen(&order.id, &order.status)
        && is_visible(order, ledgers.removals)
}

/// One record per order id, in first-seen order. A cancelled-feed record
/// replaces the active record for the same id; otherwise the first wins.
pub fn latest_per_order<'a, I>(orders: I) -> Vec<&'a Order>
where
    I: IntoIterator<Item = &'a Order>,
{
    let mut out: Vec<&'a Order> = Vec::new();
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    for order in orders {
        match index.get(order.id.as_str()) {
            Some(&i) => {
                if order.source == OrderSource::CancelledFeed
                    && out[i].source == OrderSource::Active
                {
                    out[i] = order;
                }
            }
            None => {
                index.insert(order.id.as_str(), out.len());
                out.push(order);
            }
        }
    }
    out
}

/// Visible, notify-worthy, not-yet-seen orders, recomputed from scratch over
/// the merged set with one record per order id.
pub fn unread_count(orders: &[Order], ledgers: Ledgers<'_>) -> usize {
    latest_per_order(orders)
        .into_iter()
        .filter(|o| !o.id.trim().is_empty())
        .filter(|o| o.status.is_notify_worthy())
        .filter(|o| !ledgers.seen.has_seen(&o.id, &o.status))
        .filter(|o| is_visible(o, ledgers.removals))
        .count()
}
