//! Notification fan-out.
//!
//! Sending is fire-and-forget: a [`Notifier`] never reports failure back to the
//! lifecycle, which only calls it after a transition has been persisted.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::lifecycle::Role;
use crate::store::RecordStore;

/// Store key for the notification outbox.
pub const NOTIFICATIONS_KEY: &str = "notifications";

/// Identical messages to the same target inside this window are dropped.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Who a notification is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyTarget {
    /// Everyone holding a role.
    Role(Role),
    /// A single user.
    User(String),
}

impl fmt::Display for NotifyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyTarget::Role(role) => write!(f, "role:{role}"),
            NotifyTarget::User(id) => write!(f, "{id}"),
        }
    }
}

pub trait Notifier {
    fn send(&self, target: &NotifyTarget, message: &str);
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn send(&self, target: &NotifyTarget, message: &str) {
        (**self).send(target, message);
    }
}

/// Emits each notification as a tracing event.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, target: &NotifyTarget, message: &str) {
        info!(%target, message, "notification");
    }
}

/// A delivered notification as kept in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub target: NotifyTarget,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

/// Appends notifications to a [`RecordStore`] under [`NOTIFICATIONS_KEY`].
pub struct OutboxNotifier<R> {
    store: R,
}

impl<R: RecordStore> OutboxNotifier<R> {
    pub fn new(store: R) -> Self {
        Self { store }
    }

    /// All notifications, optionally only those for `target`.
    pub fn inbox(
        &self,
        target: Option<&NotifyTarget>,
    ) -> crate::store::Result<Vec<NotificationRecord>> {
        let records: Vec<NotificationRecord> = self.store.load(NOTIFICATIONS_KEY, Vec::new())?;
        Ok(records
            .into_iter()
            .filter(|r| target.is_none_or(|t| &r.target == t))
            .collect())
    }
}

impl<R: RecordStore> Notifier for OutboxNotifier<R> {
    fn send(&self, target: &NotifyTarget, message: &str) {
        let appended = self
            .store
            .load::<NotificationRecord>(NOTIFICATIONS_KEY, Vec::new())
            .and_then(|mut records| {
                records.push(NotificationRecord {
                    id: Uuid::new_v4(),
                    target: target.clone(),
                    message: message.to_string(),
                    sent_at: Utc::now(),
                });
                self.store.save(NOTIFICATIONS_KEY, &records)
            });
        if let Err(err) = appended {
            warn!(%target, %err, "failed to record notification");
        }
    }
}

/// Drops a message already sent to the same target within the window.
pub struct DedupNotifier<N> {
    inner: N,
    window: Duration,
    sent: Mutex<HashMap<(NotifyTarget, String), Instant>>,
}

impl<N: Notifier> DedupNotifier<N> {
    pub fn new(inner: N) -> Self {
        Self::with_window(inner, DEFAULT_DEDUP_WINDOW)
    }

    pub fn with_window(inner: N, window: Duration) -> Self {
        Self {
            inner,
            window,
            sent: Mutex::default(),
        }
    }

    pub fn inner(&self) -> &N {
        &self.inner
    }
}

impl<N: Notifier> Notifier for DedupNotifier<N> {
    fn send(&self, target: &NotifyTarget, message: &str) {
        let now = Instant::now();
        {
            let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
            sent.retain(|_, at| now.duration_since(*at) < self.window);
            let key = (target.clone(), message.to_string());
            if sent.contains_key(&key) {
                debug!(%target, message, "suppressing duplicate notification");
                return;
            }
            sent.insert(key, now);
        }
        self.inner.send(target, message);
    }
}
