//! The notification session for one room, and the task that owns it.
//!
//! All state changes go through a single `NotificationService` task: poll
//! results and guest actions arrive as commands on one channel and are
//! applied one at a time, so a reconciliation never interleaves with a
//! bell or toast action.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::ledger::is_visible;
use crate::orders::{Order, OrderSource};
use crate::reconcile::{latest_per_order, reconcile, unread_count, StatusMap};
use crate::sound::{play_quietly, SoundPlayer};
use crate::status::OrderStatus;
use crate::store::NotificationStore;
use crate::toast::Toast;

const EVENT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    ToastAdded { toast: Toast },
    ToastDismissed { order_id: String },
    ToastsCleared,
    UnreadCountChanged { count: usize },
    PopupToggled { open: bool },
    OrderRemoved { order_id: String, status: OrderStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BellEntry {
    pub order_id: String,
    pub status: OrderStatus,
    pub emoji: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub item_summary: String,
    pub total: f64,
    pub seen: bool,
}

/// Everything a bell/toast view needs to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationState {
    pub room_number: String,
    pub toasts: Vec<Toast>,
    pub unread_count: usize,
    pub popup_open: bool,
    pub bell_entries: Vec<BellEntry>,
}

pub struct NotificationSession {
    room_number: String,
    store: NotificationStore,
    sound: Arc<dyn SoundPlayer>,
    events: broadcast::Sender<NotificationEvent>,
    active: Vec<Order>,
    cancelled: Vec<Order>,
    status_map: StatusMap,
    last_active_seq: Option<u64>,
    last_cancelled_seq: Option<u64>,
    unread_count: usize,
}

impl NotificationSession {
    pub fn new(room_number: &str, store: NotificationStore, sound: Arc<dyn SoundPlayer>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            room_number: room_number.trim().to_string(),
            store,
            sound,
            events,
            active: Vec::new(),
            cancelled: Vec::new(),
            status_map: StatusMap::new(),
            last_active_seq: None,
            last_cancelled_seq: None,
            unread_count: 0,
        }
    }

    pub fn room_number(&self) -> &str {
        &self.room_number
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &NotificationStore {
        &self.store
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    /// Apply a fresh active-orders snapshot. Returns `false` when the
    /// snapshot was superseded by one already applied.
    pub fn apply_active(&mut self, seq: u64, orders: Vec<Order>) -> bool {
        if self.last_active_seq.is_some_and(|last| seq <= last) {
            debug!(seq, "Ignoring superseded active-orders snapshot");
            return false;
        }
        self.last_active_seq = Some(seq);
        self.active = orders;
        self.run_reconcile();
        true
    }

    pub fn apply_cancelled(&mut self, seq: u64, orders: Vec<Order>) -> bool {
        if self.last_cancelled_seq.is_some_and(|last| seq <= last) {
            debug!(seq, "Ignoring superseded cancelled-orders snapshot");
            return false;
        }
        self.last_cancelled_seq = Some(seq);
        self.cancelled = orders;
        self.run_reconcile();
        true
    }

    fn merged(&self) -> Vec<Order> {
        self.active
            .iter()
            .chain(self.cancelled.iter())
            .cloned()
            .collect()
    }

    fn run_reconcile(&mut self) {
        let merged = self.merged();
        let outcome = reconcile(&merged, &self.status_map, self.store.ledgers());
        self.status_map = outcome.updated_status_map;

        if !outcome.toasts_to_add.is_empty() {
            for toast in &outcome.toasts_to_add {
                self.store.mark_announced(toast);
                info!(
                    room = %self.room_number,
                    order_id = %toast.order_id,
                    status = %toast.status,
                    "{} {}",
                    toast.emoji,
                    toast.message
                );
            }
            self.store
                .update_toasts(|queue| queue.prepend_all(&outcome.toasts_to_add));
            for toast in outcome.toasts_to_add.into_iter().rev() {
                self.emit(NotificationEvent::ToastAdded { toast });
            }
        }

        for cue in &outcome.sounds_to_play {
            play_quietly(self.sound.as_ref(), cue);
        }

        self.set_unread_count(outcome.unread_count);
    }

    /// Orders shown in the bell popup: visible, one entry per order id, a
    /// cancelled-feed record taking precedence over a stale active record.
    /// The unread counter counts over the same merge.
    fn bell_orders(&self) -> Vec<&Order> {
        let mut out = latest_per_order(self.active.iter().chain(self.cancelled.iter()));
        out.retain(|o| is_visible(o, self.store.removals()));
        out
    }

    pub fn find_order(&self, order_id: &str) -> Option<Order> {
        self.active
            .iter()
            .find(|o| o.id == order_id)
            .or_else(|| self.cancelled.iter().find(|o| o.id == order_id))
            .cloned()
    }

    /// Opening the bell counts as reading everything in it.
    pub fn open_bell(&mut self) {
        self.sweep_visible_as_seen();
        self.store.set_popup_open(true);
        self.emit(NotificationEvent::PopupToggled { open: true });
    }

    pub fn close_bell(&mut self) {
        self.sweep_visible_as_seen();
        self.store.set_popup_open(false);
        self.emit(NotificationEvent::PopupToggled { open: false });
    }

    fn sweep_visible_as_seen(&mut self) {
        let merged = self.merged();
        let removals = self.store.removals().clone();
        let pairs = merged
            .iter()
            .filter(|o| is_visible(o, &removals))
            .map(|o| (o.id.as_str(), &o.status));
        let marked = self.store.mark_all_seen(pairs);
        debug!(marked, "Marked visible order statuses as seen");

        if !self.store.toasts().is_empty() {
            self.store.update_toasts(|queue| queue.clear());
            self.emit(NotificationEvent::ToastsCleared);
        }
        self.recount(&merged);
    }

    /// Closing a toast acknowledges its status but leaves the order in the bell.
    pub fn close_toast(&mut self, order_id: &str) -> bool {
        let Some(toast) = self.store.toasts().get(order_id).cloned() else {
            return false;
        };
        self.store.mark_seen(&toast.order_id, &toast.status);
        self.store.update_toasts(|queue| queue.remove_order(order_id));
        self.emit(NotificationEvent::ToastDismissed {
            order_id: order_id.to_string(),
        });
        let merged = self.merged();
        self.recount(&merged);
        true
    }

    /// Removing from the bell acknowledges and hides the order until its
    /// status changes (or for good, at a terminal status).
    pub fn remove_from_bell(&mut self, order_id: &str) -> bool {
        let Some(status) = self
            .bell_orders()
            .into_iter()
            .find(|o| o.id == order_id)
            .map(|o| o.status.clone())
        else {
            return false;
        };
        self.store.mark_seen(order_id, &status);
        self.store.record_removal(order_id, &status);
        if self.store.toasts().get(order_id).is_some() {
            self.store.update_toasts(|queue| queue.remove_order(order_id));
            self.emit(NotificationEvent::ToastDismissed {
                order_id: order_id.to_string(),
            });
        }
        info!(order_id, status = %status, "Order removed from notifications");
        self.emit(NotificationEvent::OrderRemoved {
            order_id: order_id.to_string(),
            status,
        });
        let merged = self.merged();
        self.recount(&merged);
        true
    }

    pub fn state(&self) -> PresentationState {
        let seen = self.store.seen();
        let bell_entries = self
            .bell_orders()
            .into_iter()
            .map(|o| {
                let display = o.status.display();
                BellEntry {
                    order_id: o.id.clone(),
                    status: o.status.clone(),
                    emoji: display.emoji.to_string(),
                    message: display.message.to_string(),
                    reason: o.cancellation_reason.clone(),
                    item_summary: o.item_summary(),
                    total: o.total(),
                    seen: seen.has_seen(&o.id, &o.status),
                }
            })
            .collect();
        PresentationState {
            room_number: self.room_number.clone(),
            toasts: self.store.toasts().to_vec(),
            unread_count: self.unread_count,
            popup_open: self.store.popup_open(),
            bell_entries,
        }
    }

    fn recount(&mut self, merged: &[Order]) {
        let count = unread_count(merged, self.store.ledgers());
        self.set_unread_count(count);
    }

    fn set_unread_count(&mut self, count: usize) {
        if count != self.unread_count {
            self.unread_count = count;
            self.emit(NotificationEvent::UnreadCountChanged { count });
        }
    }

    fn emit(&self, event: NotificationEvent) {
        // No subscribers is fine; views come and go.
        let _ = self.events.send(event);
    }

    pub fn save(&self) {
        if let Err(e) = self.store.save() {
            warn!(error = %e, "Failed to flush notification store");
        }
    }

    fn handle(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Snapshot { feed, seq, orders } => {
                match feed {
                    OrderSource::Active => self.apply_active(seq, orders),
                    OrderSource::CancelledFeed => self.apply_cancelled(seq, orders),
                };
            }
            SessionCommand::OpenBell => self.open_bell(),
            SessionCommand::CloseBell => self.close_bell(),
            SessionCommand::CloseToast { order_id, reply } => {
                let _ = reply.send(self.close_toast(&order_id));
            }
            SessionCommand::RemoveFromBell { order_id, reply } => {
                let _ = reply.send(self.remove_from_bell(&order_id));
            }
            SessionCommand::FindOrder { order_id, reply } => {
                let _ = reply.send(self.find_order(&order_id));
            }
            SessionCommand::State { reply } => {
                let _ = reply.send(self.state());
            }
        }
    }
}

pub enum SessionCommand {
    Snapshot {
        feed: OrderSource,
        seq: u64,
        orders: Vec<Order>,
    },
    OpenBell,
    CloseBell,
    CloseToast {
        order_id: String,
        reply: oneshot::Sender<bool>,
    },
    RemoveFromBell {
        order_id: String,
        reply: oneshot::Sender<bool>,
    },
    FindOrder {
        order_id: String,
        reply: oneshot::Sender<Option<Order>>,
    },
    State {
        reply: oneshot::Sender<PresentationState>,
    },
}

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct NotificationHandle {
    tx: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<NotificationEvent>,
}

impl NotificationHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.events.subscribe()
    }

    pub async fn submit_snapshot(
        &self,
        feed: OrderSource,
        seq: u64,
        orders: Vec<Order>,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::Snapshot { feed, seq, orders })
            .await
    }

    pub async fn open_bell(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::OpenBell).await
    }

    pub async fn close_bell(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::CloseBell).await
    }

    pub async fn close_toast(&self, order_id: &str) -> Result<bool, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::CloseToast {
            order_id: order_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn remove_from_bell(&self, order_id: &str) -> Result<bool, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::RemoveFromBell {
            order_id: order_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn find_order(&self, order_id: &str) -> Result<Option<Order>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::FindOrder {
            order_id: order_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn state(&self) -> Result<PresentationState, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::State { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.tx.send(cmd).await.map_err(|_| SessionError::Closed)
    }
}

pub struct NotificationService;

impl NotificationService {
    /// Move `session` into its own task. The task ends when `cancel` fires
    /// or every handle is dropped, flushing the store and handing the
    /// session back through the join handle.
    pub fn spawn(
        mut session: NotificationSession,
        cancel: CancellationToken,
    ) -> (NotificationHandle, JoinHandle<NotificationSession>) {
        let (tx, mut rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = NotificationHandle {
            tx,
            events: session.events.clone(),
        };

        let task = tokio::spawn(async move {
            info!(room = %session.room_number, "Notification session started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    cmd = rx.recv() => match cmd {
                        Some(cmd) => session.handle(cmd),
                        None => break,
                    },
                }
            }
            session.save();
            info!(room = %session.room_number, "Notification session stopped");
            session
        });

        (handle, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::SoundCue;
    use crate::store::MemoryBackend;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPlayer {
        played: Mutex<Vec<SoundCue>>,
    }

    impl SoundPlayer for RecordingPlayer {
        fn play(&self, cue: &SoundCue) -> Result<(), String> {
            self.played.lock().unwrap().push(cue.clone());
            // Behave like a browser with autoplay blocked after recording.
            Err("autoplay blocked".into())
        }
    }

    fn order(id: &str, room: &str, status: OrderStatus) -> Order {
        Order {
            id: id.into(),
            room_number: room.into(),
            status,
            items: vec![],
            cancellation_reason: None,
            source: OrderSource::Active,
        }
    }

    fn session_with(backend: &MemoryBackend) -> (NotificationSession, Arc<RecordingPlayer>) {
        let player = Arc::new(RecordingPlayer::default());
        let store = NotificationStore::load(Box::new(backend.clone()));
        (
            NotificationSession::new("204", store, player.clone()),
            player,
        )
    }

    fn played(player: &RecordingPlayer) -> usize {
        player.played.lock().unwrap().len()
    }

    #[test]
    fn test_scenario_a_pending_acknowledged_preparing() {
        let backend = MemoryBackend::new();
        let (mut s, player) = session_with(&backend);

        s.apply_active(1, vec![order("O1", "204", OrderStatus::Pending)]);
        assert!(s.state().toasts.is_empty());
        assert_eq!(played(&player), 0);

        s.apply_active(2, vec![order("O1", "204", OrderStatus::Acknowledged)]);
        assert_eq!(s.state().toasts.len(), 1);
        assert_eq!(played(&player), 1);

        s.apply_active(3, vec![order("O1", "204", OrderStatus::Preparing)]);
        let state = s.state();
        assert_eq!(state.toasts.len(), 1, "one toast per order");
        assert_eq!(state.toasts[0].message, "Preparing Your Order");
        assert_eq!(played(&player), 2);
        assert_eq!(state.unread_count, 1);
    }

    #[test]
    fn test_scenario_b_delivered_then_removed_never_returns() {
        let backend = MemoryBackend::new();
        let (mut s, player) = session_with(&backend);

        s.apply_active(1, vec![order("O1", "204", OrderStatus::Delivered)]);
        assert_eq!(s.unread_count(), 1);

        s.open_bell();
        let state = s.state();
        assert!(state.toasts.is_empty());
        assert_eq!(state.unread_count, 0);
        assert!(state.popup_open);

        assert!(s.remove_from_bell("O1"));
        assert!(s.state().bell_entries.is_empty());

        s.apply_active(2, vec![order("O1", "204", OrderStatus::Delivered)]);
        let state = s.state();
        assert!(state.bell_entries.is_empty());
        assert!(state.toasts.is_empty());
        assert_eq!(played(&player), 1);

        // Still hidden after a reload.
        let (mut reloaded, player2) = session_with(&backend);
        reloaded.apply_active(1, vec![order("O1", "204", OrderStatus::Delivered)]);
        assert!(reloaded.state().bell_entries.is_empty());
        assert_eq!(played(&player2), 0);
    }

    #[test]
    fn test_scenario_c_cancelled_feed_only() {
        let backend = MemoryBackend::new();
        let (mut s, player) = session_with(&backend);

        let record = Order {
            id: "O2".into(),
            room_number: "204".into(),
            status: OrderStatus::Cancelled,
            items: vec![],
            cancellation_reason: Some("Customer cancelled".into()),
            source: OrderSource::CancelledFeed,
        };
        s.apply_cancelled(1, vec![record.clone()]);
        s.apply_cancelled(2, vec![record]);

        let state = s.state();
        assert_eq!(state.toasts.len(), 1);
        assert_eq!(state.toasts[0].message, "Order Cancelled");
        assert_eq!(state.toasts[0].reason.as_deref(), Some("Customer cancelled"));
        assert_eq!(played(&player), 1);
        assert_eq!(state.bell_entries.len(), 1);
        assert_eq!(state.bell_entries[0].status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_counter_matches_bell_when_cancellation_shadows_active_record() {
        let backend = MemoryBackend::new();
        let (mut s, _player) = session_with(&backend);

        s.apply_active(1, vec![order("O2", "204", OrderStatus::Preparing)]);
        s.apply_cancelled(
            1,
            vec![Order {
                id: "O2".into(),
                room_number: "204".into(),
                status: OrderStatus::Cancelled,
                items: vec![],
                cancellation_reason: Some("Kitchen closed".into()),
                source: OrderSource::CancelledFeed,
            }],
        );

        let unseen = |state: &PresentationState| {
            state.bell_entries.iter().filter(|e| !e.seen).count()
        };
        let state = s.state();
        assert_eq!(state.bell_entries.len(), 1);
        assert_eq!(state.bell_entries[0].status, OrderStatus::Cancelled);
        assert_eq!(state.unread_count, 1);
        assert_eq!(state.unread_count, unseen(&state));

        assert!(s.close_toast("O2"));
        let state = s.state();
        assert_eq!(state.unread_count, 0);
        assert_eq!(state.unread_count, unseen(&state));
    }

    #[test]
    fn test_scenario_d_removed_at_acknowledged_stays_hidden() {
        let backend = MemoryBackend::new();
        let (mut s, _player) = session_with(&backend);

        s.apply_active(1, vec![order("O3", "204", OrderStatus::Acknowledged)]);
        assert!(s.remove_from_bell("O3"));
        s.apply_active(2, vec![order("O3", "204", OrderStatus::Acknowledged)]);

        let state = s.state();
        assert!(state.toasts.is_empty());
        assert!(state.bell_entries.is_empty());
        assert_eq!(state.unread_count, 0);

        s.apply_active(3, vec![order("O3", "204", OrderStatus::Preparing)]);
        let state = s.state();
        assert_eq!(state.toasts.len(), 1);
        assert_eq!(state.unread_count, 1);
    }

    #[test]
    fn test_scenario_e_room_partition_via_feed_parsing() {
        let backend = MemoryBackend::new();
        let (mut s, player) = session_with(&backend);
        let body = serde_json::json!([
            { "_id": "O1", "roomNumber": "204", "status": "acknowledged" },
            { "_id": "O7", "roomNumber": "305", "status": "delivered" }
        ]);
        let room = s.room_number().to_string();
        s.apply_active(1, crate::orders::parse_active_feed(&body, &room));

        let state = s.state();
        assert_eq!(state.unread_count, 1);
        assert_eq!(state.toasts.len(), 1);
        assert_eq!(state.toasts[0].order_id, "O1");
        assert!(state.bell_entries.iter().all(|e| e.order_id != "O7"));
        assert_eq!(played(&player), 1);
    }

    #[test]
    fn test_close_toast_marks_seen_without_removal() {
        let backend = MemoryBackend::new();
        let (mut s, _player) = session_with(&backend);
        s.apply_active(1, vec![order("O1", "204", OrderStatus::OnTheWay)]);
        assert_eq!(s.unread_count(), 1);

        assert!(s.close_toast("O1"));
        assert!(!s.close_toast("O1"));
        let state = s.state();
        assert!(state.toasts.is_empty());
        assert_eq!(state.unread_count, 0);
        assert!(s.store().removals().is_empty());
        assert_eq!(state.bell_entries.len(), 1);
        assert!(state.bell_entries[0].seen);
    }

    #[test]
    fn test_superseded_snapshot_is_ignored() {
        let backend = MemoryBackend::new();
        let (mut s, player) = session_with(&backend);
        assert!(s.apply_active(5, vec![order("O1", "204", OrderStatus::Preparing)]));
        assert!(!s.apply_active(4, vec![order("O1", "204", OrderStatus::Acknowledged)]));
        assert_eq!(played(&player), 1);
        assert_eq!(s.state().toasts[0].status, OrderStatus::Preparing);
    }

    #[test]
    fn test_events_are_broadcast() {
        let backend = MemoryBackend::new();
        let (mut s, _player) = session_with(&backend);
        let mut rx = s.subscribe();
        s.apply_active(1, vec![order("O1", "204", OrderStatus::Acknowledged)]);
        s.close_bell();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events[0], NotificationEvent::ToastAdded { .. }));
        assert!(events.contains(&NotificationEvent::UnreadCountChanged { count: 1 }));
        assert!(events.contains(&NotificationEvent::ToastsCleared));
        assert!(events.contains(&NotificationEvent::UnreadCountChanged { count: 0 }));
        assert!(events.contains(&NotificationEvent::PopupToggled { open: false }));
    }

    #[tokio::test]
    async fn test_service_applies_commands_in_order_and_returns_session() {
        let backend = MemoryBackend::new();
        let (session, player) = session_with(&backend);
        let cancel = CancellationToken::new();
        let (handle, task) = NotificationService::spawn(session, cancel.clone());

        handle
            .submit_snapshot(
                OrderSource::Active,
                1,
                vec![order("O1", "204", OrderStatus::Acknowledged)],
            )
            .await
            .unwrap();
        let state = handle.state().await.unwrap();
        assert_eq!(state.unread_count, 1);

        assert!(handle.remove_from_bell("O1").await.unwrap());
        assert!(!handle.remove_from_bell("missing").await.unwrap());
        assert!(handle.find_order("O1").await.unwrap().is_some());

        cancel.cancel();
        let session = task.await.unwrap();
        assert_eq!(session.unread_count(), 0);
        assert_eq!(played(&player), 1);
        assert!(handle.open_bell().await.is_err());
    }
}
