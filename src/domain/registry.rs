//! Connection registry: the single owner of the id-to-channel mapping.
//!
//! [`ConnectionRegistry`] stores every live subscriber in one `HashMap`
//! behind a single [`parking_lot::Mutex`]. Every mutation path (accept,
//! probe sweep, idle sweep, broadcast pruning, transport close) funnels
//! through the methods below, and the lock is never held across an
//! `.await`.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::ClientId;
use super::connection_entry::{ConnectionEntry, ConnectionHandle};

/// Result of arming a liveness probe for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeArm {
    /// The previous probe was answered; a new one is now outstanding.
    Armed,
    /// The previous probe is still unanswered.
    Unanswered,
    /// The entry is no longer registered.
    Gone,
}

/// Central store for all live subscriber connections.
///
/// # Concurrency
///
/// All access is serialized behind one lock, so an entry is never
/// concurrently registered and removed by two paths. Removal is
/// idempotent: exactly one caller observes an effective unregister.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<ClientId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry under its id.
    ///
    /// If an entry with the same id is already registered it is replaced
    /// and its channel is force-closed, so no displaced channel leaks.
    /// Returns `true` when an entry was displaced.
    pub fn register(&self, entry: ConnectionEntry) -> bool {
        let id = entry.id();
        let displaced = self.entries.lock().insert(id, entry);
        match displaced {
            Some(old) => {
                old.handle().terminate();
                tracing::warn!(client_id = %id, "client id collision, displaced connection closed");
                true
            }
            None => false,
        }
    }

    /// Removes an entry and force-closes its channel.
    ///
    /// Idempotent: returns `false` and does nothing if `id` is absent.
    pub fn unregister(&self, id: ClientId) -> bool {
        let removed = self.entries.lock().remove(&id);
        match removed {
            Some(entry) => {
                entry.handle().terminate();
                true
            }
            None => false,
        }
    }

    /// Removes the entry under `id` only if it still holds `handle`'s
    /// channel, then force-closes `handle`.
    ///
    /// Used on paths that act on behalf of one specific connection, so a
    /// connection displaced by an id collision cannot remove its
    /// replacement. Returns `true` if an entry was removed.
    pub fn unregister_channel(&self, id: ClientId, handle: &ConnectionHandle) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            let owned = entries
                .get(&id)
                .is_some_and(|entry| entry.handle().same_channel(handle));
            if owned { entries.remove(&id) } else { None }
        };
        handle.terminate();
        removed.is_some()
    }

    /// Invokes `f` once per currently-registered entry.
    ///
    /// Iterates over a snapshot of ids and re-reads each entry right before
    /// the call, without holding the lock while `f` runs. `f` may therefore
    /// register or unregister freely: entries removed during the iteration
    /// are skipped and no entry is visited twice.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&ConnectionEntry),
    {
        let ids: Vec<ClientId> = self.entries.lock().keys().copied().collect();
        for id in ids {
            let entry = self.entries.lock().get(&id).cloned();
            if let Some(entry) = entry {
                f(&entry);
            }
        }
    }

    /// Returns a snapshot of the entry registered under `id`.
    #[must_use]
    pub fn get(&self, id: ClientId) -> Option<ConnectionEntry> {
        self.entries.lock().get(&id).cloned()
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ClientId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Records inbound activity on `id`. Returns `false` if it is gone.
    pub fn record_activity(&self, id: ClientId, now: Instant) -> bool {
        self.entries
            .lock()
            .get_mut(&id)
            .map(|entry| entry.liveness_mut().touch(now))
            .is_some()
    }

    /// Records a probe acknowledgment on `id`. Returns `false` if it is gone.
    pub fn acknowledge_probe(&self, id: ClientId, now: Instant) -> bool {
        self.entries
            .lock()
            .get_mut(&id)
            .map(|entry| entry.liveness_mut().acknowledge(now))
            .is_some()
    }

    /// Checks the outstanding probe of `id` and, if it was answered, arms
    /// a new one.
    pub fn arm_probe(&self, id: ClientId, now: Instant) -> ProbeArm {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&id) else {
            return ProbeArm::Gone;
        };
        if entry.liveness().is_alive() {
            entry.liveness_mut().arm(now);
            ProbeArm::Armed
        } else {
            ProbeArm::Unanswered
        }
    }

    /// Unregisters `id` if it has had no inbound activity for longer than
    /// `timeout`. Returns `true` if it was evicted.
    pub fn evict_if_idle(&self, id: ClientId, now: Instant, timeout: Duration) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            let idle = entries
                .get(&id)
                .is_some_and(|entry| entry.liveness().idle_for(now) > timeout);
            if idle { entries.remove(&id) } else { None }
        };
        match removed {
            Some(entry) => {
                entry.handle().terminate();
                true
            }
            None => false,
        }
    }

    /// Removes and force-closes every entry. Returns how many were closed.
    pub fn drain(&self) -> usize {
        let drained: Vec<ConnectionEntry> =
            self.entries.lock().drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.handle().terminate();
        }
        drained.len()
    }

    /// Returns the number of registered connections. Diagnostics only.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
