//! Session store — per-user dialogue state with serialized access.
//!
//! Every user owns one slot. A transition locks the user's slot for its
//! whole duration, so two deliveries for the same user never interleave,
//! while different users proceed in parallel.

use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Messaging-platform user (chat) identifier.
pub type UserId = i64;

/// Collected answers keyed by field key.
pub type Answers = BTreeMap<String, String>;

/// Default interval between idle-session sweeps.
const SWEEP_INTERVAL_SECS: u64 = 60;

/// One user's progress through the field catalog.
///
/// `answers` holds exactly the keys of the fields before `cursor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub cursor: usize,
    pub answers: Answers,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            cursor: 0,
            answers: Answers::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Store the answer for the field under the cursor and advance.
    pub fn record(&mut self, key: &str, value: &str) {
        self.answers.insert(key.to_string(), value.to_string());
        self.cursor += 1;
        self.updated_at = Utc::now();
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

type Slot = Arc<Mutex<Option<Session>>>;

/// Exclusive access to one user's session for the duration of a transition.
pub struct SessionGuard {
    user_id: UserId,
    slot: OwnedMutexGuard<Option<Session>>,
}

impl SessionGuard {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl Deref for SessionGuard {
    type Target = Option<Session>;

    fn deref(&self) -> &Self::Target {
        &self.slot
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.slot
    }
}

/// In-memory session store keyed by user.
pub struct SessionStore {
    slots: Mutex<HashMap<UserId, Slot>>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the user's slot, waiting for any in-flight transition for the
    /// same user to finish.
    pub async fn lock(&self, user_id: UserId) -> SessionGuard {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(user_id).or_default())
        };

        SessionGuard {
            user_id,
            slot: slot.lock_owned().await,
        }
    }

    /// Drop the guard and forget the slot if it is empty and nobody else
    /// is waiting on it.
    pub async fn release(&self, guard: SessionGuard) {
        let user_id = guard.user_id;
        let emptied = guard.is_none();
        drop(guard);

        if !emptied {
            return;
        }

        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get(&user_id) {
            // Clones are only taken under the map lock, so a count of one
            // means no transition is queued behind us.
            let idle_and_empty =
                Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|s| s.is_none());
            if idle_and_empty {
                slots.remove(&user_id);
            }
        }
    }

    /// Snapshot of a user's session, if any.
    pub async fn get(&self, user_id: UserId) -> Option<Session> {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(&user_id).map(Arc::clone)?
        };
        slot.lock().await.clone()
    }

    /// Number of live sessions. A slot locked by an in-flight transition
    /// counts as live, since its contents cannot be inspected without waiting.
    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|slot| slot.try_lock().map_or(true, |s| s.is_some()))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove sessions untouched for longer than `max_idle`. Slots locked by
    /// an in-flight transition are skipped. Returns how many were removed.
    pub async fn expire_idle(&self, max_idle: chrono::Duration) -> usize {
        let now = Utc::now();
        let mut expired = 0;

        let mut slots = self.slots.lock().await;
        slots.retain(|user_id, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Ok(mut session) = slot.try_lock() else {
                return true;
            };
            let stale = session.as_ref().is_some_and(|s| s.idle_for(now) > max_idle);
            if stale {
                debug!(user_id, "Expiring idle session");
                *session = None;
                expired += 1;
            }
            session.is_some()
        });

        if expired > 0 {
            info!(expired, "Expired idle sessions");
        }
        expired
    }
}

/// Spawn a background task that periodically expires idle sessions.
pub fn spawn_expiry_task(
    store: Arc<SessionStore>,
    max_idle: chrono::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            store.expire_idle(max_idle).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn record_advances_cursor() {
        let mut session = Session::new();
        session.record("a", "x");
        session.record("b", "y");

        assert_eq!(session.cursor, 2);
        assert_eq!(session.answers.len(), 2);
        assert_eq!(session.answers["a"], "x");
        assert!(session.updated_at >= session.started_at);
    }

    #[tokio::test]
    async fn lock_creates_empty_slot() {
        let store = SessionStore::new();
        let guard = store.lock(42).await;
        assert_eq!(guard.user_id(), 42);
        assert!(guard.is_none());
        store.release(guard).await;

        assert!(store.get(42).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn session_survives_release() {
        let store = SessionStore::new();
        let mut guard = store.lock(1).await;
        *guard = Some(Session::new());
        store.release(guard).await;

        let session = store.get(1).await.unwrap();
        assert_eq!(session.cursor, 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn same_user_is_serialized() {
        let store = SessionStore::new();
        let mut first = store.lock(7).await;
        *first = Some(Session::new());

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut guard = store.lock(7).await;
                let cursor = guard.as_ref().map(|s| s.cursor);
                if let Some(s) = guard.as_mut() {
                    s.record("b", "second");
                }
                store.release(guard).await;
                cursor
            })
        };

        // The waiter must not observe the session until we release it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        first.as_mut().unwrap().record("a", "first");
        store.release(first).await;

        assert_eq!(waiter.await.unwrap(), Some(1));
        let session = store.get(7).await.unwrap();
        assert_eq!(session.cursor, 2);
    }

    #[tokio::test]
    async fn different_users_do_not_block() {
        let store = SessionStore::new();
        let held = store.lock(1).await;

        let other = tokio::time::timeout(Duration::from_millis(200), store.lock(2)).await;
        assert!(other.is_ok(), "user 2 should not wait on user 1");

        store.release(other.unwrap()).await;
        store.release(held).await;
    }

    #[tokio::test]
    async fn len_counts_locked_slots() {
        let store = SessionStore::new();
        let guard = store.lock(3).await;
        assert_eq!(store.len().await, 1);

        store.release(guard).await;
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn expire_idle_removes_stale_sessions() {
        let store = SessionStore::new();

        let mut stale = store.lock(1).await;
        let mut old = Session::new();
        old.updated_at = Utc::now() - chrono::Duration::hours(2);
        *stale = Some(old);
        store.release(stale).await;

        let mut fresh = store.lock(2).await;
        *fresh = Some(Session::new());
        store.release(fresh).await;

        let removed = store.expire_idle(chrono::Duration::hours(1)).await;
        assert_eq!(removed, 1);
        assert!(store.get(1).await.is_none());
        assert!(store.get(2).await.is_some());
    }

    #[tokio::test]
    async fn expire_idle_skips_locked_slots() {
        let store = SessionStore::new();
        let mut guard = store.lock(1).await;
        let mut old = Session::new();
        old.updated_at = Utc::now() - chrono::Duration::hours(2);
        *guard = Some(old);

        assert_eq!(store.expire_idle(chrono::Duration::hours(1)).await, 0);
        assert!(guard.is_some());
        store.release(guard).await;
    }
}
