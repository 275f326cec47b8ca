//! Persisted notification state for one guest device.
//!
//! `NotificationStore` keeps the ledgers, the toast snapshot and the popup
//! flag in memory and writes each change through to a [`LedgerBackend`].
//! Writes are best-effort: if the backend fails the in-memory copy stays
//! authoritative for the rest of the session and the failure is logged.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::db::{self, DbState};
use crate::error::StoreError;
use crate::ledger::{RemovalLedger, SeenStatusLedger};
use crate::reconcile::Ledgers;
use crate::status::OrderStatus;
use crate::toast::{Toast, ToastQueue};

pub const SETTINGS_CATEGORY: &str = "notifications";

pub const KEY_SEEN: &str = "seenOrderStatuses";
pub const KEY_ANNOUNCED: &str = "announcedOrderStatuses";
pub const KEY_REMOVED: &str = "removedOrderStatuses";
pub const KEY_TOASTS: &str = "notificationToasts";
pub const KEY_POPUP_OPEN: &str = "notificationPopupOpen";

/// Key/value persistence used by [`NotificationStore`].
pub trait LedgerBackend: Send {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Append an announced toast to the backend's history, if it keeps one.
    fn log_notification(&self, _toast: &Toast) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Backend over the SQLite `local_settings` table.
pub struct SqliteBackend {
    db: Arc<DbState>,
}

impl SqliteBackend {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }
}

impl LedgerBackend for SqliteBackend {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.db.conn.lock().map_err(|_| StoreError::Poisoned)?;
        db::get_setting(&conn, SETTINGS_CATEGORY, key)
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.db.conn.lock().map_err(|_| StoreError::Poisoned)?;
        db::set_setting(&conn, SETTINGS_CATEGORY, key, value)
    }

    fn log_notification(&self, toast: &Toast) -> Result<(), StoreError> {
        let conn = self.db.conn.lock().map_err(|_| StoreError::Poisoned)?;
        db::insert_notification_log(
            &conn,
            &toast.id,
            &toast.order_id,
            toast.status.as_str(),
            &toast.message,
            &toast.room_number,
            &toast.created_at.to_rfc3339(),
        )
    }
}

/// In-process backend. Clones share the same map, which lets a test drop a
/// store and load a fresh one to simulate a page reload.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    values: Arc<Mutex<HashMap<String, String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail, as a full or unavailable store would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }
}

impl LedgerBackend for MemoryBackend {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::DataDir(std::io::Error::new(
                std::io::ErrorKind::Other,
                "storage quota exceeded",
            )));
        }
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub struct NotificationStore {
    backend: Box<dyn LedgerBackend>,
    seen: SeenStatusLedger,
    announced: SeenStatusLedger,
    removals: RemovalLedger,
    toasts: ToastQueue,
    popup_open: bool,
}

impl NotificationStore {
    /// Restore state from the backend. Missing or unreadable entries start empty.
    pub fn load(backend: Box<dyn LedgerBackend>) -> Self {
        let seen = load_json(backend.as_ref(), KEY_SEEN);
        let announced = load_json(backend.as_ref(), KEY_ANNOUNCED);
        let removals = load_json(backend.as_ref(), KEY_REMOVED);
        let toasts = load_json(backend.as_ref(), KEY_TOASTS);
        let popup_open = load_json(backend.as_ref(), KEY_POPUP_OPEN);
        let store = Self {
            backend,
            seen,
            announced,
            removals,
            toasts,
            popup_open,
        };
        debug!(
            seen = store.seen.len(),
            removed = store.removals.len(),
            toasts = store.toasts.len(),
            "Notification store loaded"
        );
        store
    }

    /// Write every key back to the backend.
    pub fn save(&self) -> Result<(), StoreError> {
        self.backend
            .save(KEY_SEEN, &serde_json::to_string(&self.seen)?)?;
        self.backend
            .save(KEY_ANNOUNCED, &serde_json::to_string(&self.announced)?)?;
        self.backend
            .save(KEY_REMOVED, &serde_json::to_string(&self.removals)?)?;
        self.backend
            .save(KEY_TOASTS, &serde_json::to_string(&self.toasts)?)?;
        self.backend
            .save(KEY_POPUP_OPEN, &serde_json::to_string(&self.popup_open)?)?;
        Ok(())
    }

    pub fn ledgers(&self) -> Ledgers<'_> {
        Ledgers {
            seen: &self.seen,
            announced: &self.announced,
            removals: &self.removals,
        }
    }

    pub fn seen(&self) -> &SeenStatusLedger {
        &self.seen
    }

    pub fn removals(&self) -> &RemovalLedger {
        &self.removals
    }

    pub fn toasts(&self) -> &ToastQueue {
        &self.toasts
    }

    pub fn popup_open(&self) -> bool {
        self.popup_open
    }

    pub fn mark_seen(&mut self, order_id: &str, status: &OrderStatus) -> bool {
        let added = self.seen.mark_seen(order_id, status);
        if added {
            self.persist(KEY_SEEN, &self.seen);
        }
        added
    }

    /// Mark a batch of pairs seen with a single write.
    pub fn mark_all_seen<'a, I>(&mut self, pairs: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, &'a OrderStatus)>,
    {
        let added = pairs
            .into_iter()
            .filter(|(id, status)| self.seen.mark_seen(id, status))
            .count();
        if added > 0 {
            self.persist(KEY_SEEN, &self.seen);
        }
        added
    }

    pub fn mark_announced(&mut self, toast: &Toast) -> bool {
        let added = self.announced.mark_seen(&toast.order_id, &toast.status);
        if added {
            self.persist(KEY_ANNOUNCED, &self.announced);
            if let Err(e) = self.backend.log_notification(toast) {
                warn!(order_id = %toast.order_id, error = %e, "Failed to log notification");
            }
        }
        added
    }

    pub fn record_removal(&mut self, order_id: &str, status: &OrderStatus) -> bool {
        let changed = self.removals.record_removal(order_id, status);
        if changed {
            self.persist(KEY_REMOVED, &self.removals);
        }
        changed
    }

    /// Mutate the toast queue and persist the resulting snapshot.
    pub fn update_toasts<R>(&mut self, f: impl FnOnce(&mut ToastQueue) -> R) -> R {
        let result = f(&mut self.toasts);
        self.persist(KEY_TOASTS, &self.toasts);
        result
    }

    pub fn set_popup_open(&mut self, open: bool) {
        if self.popup_open != open {
            self.popup_open = open;
            self.persist(KEY_POPUP_OPEN, &self.popup_open);
        }
    }

    fn persist<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(StoreError::from)
            .and_then(|raw| self.backend.save(key, &raw));
        if let Err(e) = result {
            warn!(key, error = %e, "Ledger write failed; keeping in-memory state");
        }
    }
}

fn load_json<T: DeserializeOwned + Default>(backend: &dyn LedgerBackend, key: &str) -> T {
    match backend.load(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable ledger entry");
                T::default()
            }
        },
        Ok(None) => T::default(),
        Err(e) => {
            warn!(key, error = %e, "Ledger read failed; starting empty");
            T::default()
        }
    }
}
