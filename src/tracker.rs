//! Connection admission and per-IP tracking.
//!
//! A [`ConnectionTracker`] holds a global [`Semaphore`](tokio::sync::Semaphore)
//! of capacity `max_connections` plus a lazily-populated map from remote IP
//! to its own semaphore of capacity `max_per_ip`. Acquisition takes the
//! global permit first, then the per-IP permit; if the per-IP acquisition
//! fails the global permit is dropped immediately (returning it to the
//! pool) before reporting admission failure, so a burst of denied
//! connections from one noisy IP never starves other remotes.
//!
//! Per-IP entries are reference-counted and removed by the last handle to
//! release them, so the map never grows unbounded with one-shot clients.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct PerIpEntry {
    semaphore: Arc<Semaphore>,
    refs: usize,
}

struct Inner {
    global: Arc<Semaphore>,
    max_connections: usize,
    max_per_ip: usize,
    per_ip: Mutex<HashMap<IpAddr, PerIpEntry>>,
}

/// Tracks globally- and per-IP-bounded connection admission.
#[derive(Clone)]
pub struct ConnectionTracker {
    inner: Arc<Inner>,
}

impl ConnectionTracker {
    pub fn new(max_connections: usize, max_per_ip: usize) -> Self {
        ConnectionTracker {
            inner: Arc::new(Inner {
                global: Arc::new(Semaphore::new(max_connections)),
                max_connections,
                max_per_ip,
                per_ip: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Attempts to admit a connection from `remote`. Returns `None`
    /// (without blocking) if either the global or per-IP capacity is
    /// exhausted.
    pub fn try_acquire(&self, remote: IpAddr) -> Option<ConnectionHandle> {
        let global_permit = Arc::clone(&self.inner.global).try_acquire_owned().ok()?;

        let per_ip_semaphore = {
            let mut map = self.inner.per_ip.lock().unwrap();
            let entry = map.entry(remote).or_insert_with(|| PerIpEntry {
                semaphore: Arc::new(Semaphore::new(self.inner.max_per_ip)),
                refs: 0,
            });
            entry.refs += 1;
            Arc::clone(&entry.semaphore)
        };

        match per_ip_semaphore.try_acquire_owned() {
            Ok(per_ip_permit) => Some(ConnectionHandle {
                tracker: self.clone(),
                remote,
                global_permit: Some(global_permit),
                per_ip_permit: Some(per_ip_permit),
                released: false,
            }),
            Err(_) => {
                self.release_per_ip_ref(remote);
                // global_permit drops here, returning the slot immediately.
                None
            }
        }
    }

    /// Number of live handles currently held for `remote`.
    pub fn count(&self, remote: IpAddr) -> usize {
        let map = self.inner.per_ip.lock().unwrap();
        match map.get(&remote) {
            Some(entry) => self.inner.max_per_ip - entry.semaphore.available_permits(),
            None => 0,
        }
    }

    /// Total live handles across all remotes.
    pub fn total_count(&self) -> usize {
        self.inner
            .max_connections
            .saturating_sub(self.inner.global.available_permits())
    }

    fn release_per_ip_ref(&self, remote: IpAddr) {
        let mut map = self.inner.per_ip.lock().unwrap();
        if let Some(entry) = map.get_mut(&remote) {
            entry.refs -= 1;
            if entry.refs == 0 {
                map.remove(&remote);
            }
        }
    }
}

/// A scoped lease on one global slot and one per-IP slot.
///
/// Dropping the handle (or calling [`ConnectionHandle::release`] explicitly)
/// releases both permits. Release is idempotent: a second call, or a drop
/// after an explicit release, is a no-op.
pub struct ConnectionHandle {
    tracker: ConnectionTracker,
    remote: IpAddr,
    global_permit: Option<OwnedSemaphorePermit>,
    per_ip_permit: Option<OwnedSemaphorePermit>,
    released: bool,
}

impl ConnectionHandle {
    /// Releases the held slots. Safe to call multiple times.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.per_ip_permit.take();
        self.global_permit.take();
        self.tracker.release_per_ip_ref(self.remote);
        self.released = true;
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.release();
    }
}
