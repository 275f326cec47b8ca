//! Background pollers for the active and cancelled order feeds.
//!
//! Each feed gets its own loop. A loop fetches, filters to the session's room
//! and hands the snapshot to the session with an increasing sequence number,
//! then sleeps. Fetch failures are logged and skipped; the session keeps the
//! last good snapshot until the next tick succeeds.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::OrderFeed;
use crate::error::FeedError;
use crate::orders::{parse_active_feed, parse_cancelled_feed, Order, OrderSource};
use crate::session::NotificationHandle;

/// Host-provided "is the guest looking at the page" signal. Polling pauses
/// while it is false.
#[derive(Clone, Debug)]
pub struct PageVisibility(Arc<AtomicBool>);

impl PageVisibility {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn set_visible(&self, visible: bool) {
        self.0.store(visible, Ordering::SeqCst);
    }

    pub fn is_visible(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for PageVisibility {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub room_number: String,
    pub active_interval: Duration,
    pub cancelled_interval: Duration,
}

pub struct PollerHandles {
    pub active: JoinHandle<()>,
    pub cancelled: JoinHandle<()>,
}

impl PollerHandles {
    pub async fn join(self) {
        let _ = self.active.await;
        let _ = self.cancelled.await;
    }
}

/// Start both poll loops. They stop when `cancel` fires or the session goes away.
pub fn start_pollers<F: OrderFeed>(
    feed: Arc<F>,
    session: NotificationHandle,
    config: PollerConfig,
    visibility: PageVisibility,
    cancel: CancellationToken,
) -> PollerHandles {
    let active = spawn_poll_loop(
        feed.clone(),
        OrderSource::Active,
        config.active_interval,
        config.room_number.clone(),
        session.clone(),
        visibility.clone(),
        cancel.clone(),
    );
    let cancelled = spawn_poll_loop(
        feed,
        OrderSource::CancelledFeed,
        config.cancelled_interval,
        config.room_number,
        session,
        visibility,
        cancel,
    );
    PollerHandles { active, cancelled }
}

fn feed_name(feed: OrderSource) -> &'static str {
    match feed {
        OrderSource::Active => "active",
        OrderSource::CancelledFeed => "cancelled",
    }
}

async fn fetch_snapshot<F: OrderFeed>(
    feed: &F,
    kind: OrderSource,
    room: &str,
) -> Result<Vec<Order>, FeedError> {
    let body: Value = match kind {
        OrderSource::Active => feed.fetch_orders().await?,
        OrderSource::CancelledFeed => feed.fetch_cancelled_orders().await?,
    };
    Ok(match kind {
        OrderSource::Active => parse_active_feed(&body, room),
        OrderSource::CancelledFeed => parse_cancelled_feed(&body, room),
    })
}

fn spawn_poll_loop<F: OrderFeed>(
    feed: Arc<F>,
    kind: OrderSource,
    interval: Duration,
    room: String,
    session: NotificationHandle,
    visibility: PageVisibility,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = feed_name(kind);
        info!(
            feed = name,
            room = %room,
            interval_ms = interval.as_millis() as u64,
            "Order poller started"
        );
        let mut seq: u64 = 0;
        let mut failing = false;

        loop {
            if visibility.is_visible() {
                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = fetch_snapshot(feed.as_ref(), kind, &room) => r,
                };
                match result {
                    Ok(orders) => {
                        if failing {
                            info!(feed = name, "Order feed reachable again");
                            failing = false;
                        }
                        seq += 1;
                        debug!(feed = name, seq, count = orders.len(), "Order snapshot fetched");
                        if session.submit_snapshot(kind, seq, orders).await.is_err() {
                            debug!(feed = name, "Session closed; stopping poller");
                            break;
                        }
                    }
                    Err(e) => {
                        if failing {
                            debug!(feed = name, error = %e, "Order feed still failing");
                        } else {
                            warn!(
                                feed = name,
                                error = %e,
                                "Order feed fetch failed; keeping last snapshot"
                            );
                            failing = true;
                        }
                    }
                }
            } else {
                debug!(feed = name, "Page hidden; skipping poll");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(feed = name, "Order poller stopped");
    })
}
