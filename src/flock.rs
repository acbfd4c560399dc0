//! Per-path advisory locks with handle-scoped ownership.
//!
//! Grants live in a table behind a short internal mutex; blocked
//! acquisitions park on a per-path notifier and re-check eligibility
//! on every wakeup. Wakeups are not prioritized: releasing a path
//! wakes every waiter and lets them race, which is cheap because the
//! critical section is a few map operations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::{Result, VfsError};

/// Identifier of an open file handle.
pub type HandleId = u64;

/// Advisory lock mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LockType {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct LockState {
    lock_type: LockType,
    holders: HashSet<HandleId>,
}

#[derive(Default)]
struct Inner {
    locks: HashMap<String, LockState>,
    waiters: HashMap<String, Arc<Notify>>,
}

/// Advisory flock table.
///
/// - `Shared` is granted when the path is free, shared, or exclusively
///   held by the requesting handle alone (downgrade).
/// - `Exclusive` is granted when the path is free or the requesting
///   handle is the sole holder (upgrade).
/// - Re-acquisition by a holder releases its previous grant first.
#[derive(Default)]
pub struct FileLockManager {
    inner: Mutex<Inner>,
}

impl FileLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquisition; `Locked` on conflict.
    pub fn try_lock(&self, path: &str, handle: HandleId, lock_type: LockType) -> Result<()> {
        let mut inner = self.inner.lock().expect("lock table mutex poisoned");
        if Self::grant(&mut inner, path, handle, lock_type) {
            Ok(())
        } else {
            Err(VfsError::locked(path))
        }
    }

    /// Blocks until the lock can be granted.
    ///
    /// Callers must not hold any other lock across this await; the
    /// facade releases its coordinator mutex first.
    pub async fn lock(&self, path: &str, handle: HandleId, lock_type: LockType) {
        loop {
            let notify = {
                let mut inner = self.inner.lock().expect("lock table mutex poisoned");
                if Self::grant(&mut inner, path, handle, lock_type) {
                    return;
                }
                inner.waiters.entry(path.to_string()).or_default().clone()
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            // Register interest before the second eligibility check so a
            // release between the two cannot be missed.
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().expect("lock table mutex poisoned");
                if Self::grant(&mut inner, path, handle, lock_type) {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Releases one handle's grant on a path. A no-op when the handle
    /// holds nothing there.
    pub fn unlock(&self, path: &str, handle: HandleId) {
        let mut inner = self.inner.lock().expect("lock table mutex poisoned");
        Self::release(&mut inner, path, handle);
    }

    /// Releases every grant of a handle; runs on handle close.
    pub fn unlock_all(&self, handle: HandleId) {
        let mut inner = self.inner.lock().expect("lock table mutex poisoned");
        let held: Vec<String> = inner
            .locks
            .iter()
            .filter(|(_, state)| state.holders.contains(&handle))
            .map(|(path, _)| path.clone())
            .collect();
        for path in held {
            Self::release(&mut inner, &path, handle);
        }
    }

    /// Whether any handle holds a lock on the path.
    pub fn is_locked(&self, path: &str) -> bool {
        self.inner.lock().expect("lock table mutex poisoned").locks.contains_key(path)
    }

    /// Whether the path is locked by anyone other than `handle`.
    pub fn is_locked_by_other(&self, path: &str, handle: HandleId) -> bool {
        let inner = self.inner.lock().expect("lock table mutex poisoned");
        inner
            .locks
            .get(path)
            .is_some_and(|state| state.holders.iter().any(|holder| *holder != handle))
    }

    fn grant(inner: &mut Inner, path: &str, handle: HandleId, lock_type: LockType) -> bool {
        let eligible = match inner.locks.get(path) {
            None => true,
            Some(state) => match lock_type {
                LockType::Shared => {
                    state.lock_type == LockType::Shared
                        || (state.holders.len() == 1 && state.holders.contains(&handle))
                }
                LockType::Exclusive => {
                    state.holders.len() == 1 && state.holders.contains(&handle)
                }
            },
        };
        if !eligible {
            return false;
        }
        match inner.locks.get_mut(path) {
            Some(state) if state.lock_type == lock_type => {
                state.holders.insert(handle);
            }
            Some(state) => {
                // Upgrade or downgrade: the prior grant is replaced.
                state.lock_type = lock_type;
                state.holders.clear();
                state.holders.insert(handle);
            }
            None => {
                inner.locks.insert(
                    path.to_string(),
                    LockState { lock_type, holders: HashSet::from([handle]) },
                );
            }
        }
        true
    }

    fn release(inner: &mut Inner, path: &str, handle: HandleId) {
        let emptied = match inner.locks.get_mut(path) {
            Some(state) => {
                state.holders.remove(&handle);
                state.holders.is_empty()
            }
            None => return,
        };
        if emptied {
            inner.locks.remove(path);
        }
        // Shared holders leaving can also unblock an upgrade, so wake
        // waiters on every release, not just the emptying one.
        if let Some(notify) = inner.waiters.get(path) {
            notify.notify_waiters();
            if emptied {
                inner.waiters.remove(path);
            }
        }
    }
}
