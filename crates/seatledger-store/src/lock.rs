//! Per-course lock table.
//!
//! Each course key maps to its own async mutex, so purchases and refunds of
//! one course run in strict FIFO order while different courses never wait
//! on each other. Slots are created on first use and dropped again once no
//! holder or waiter references them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Default ceiling for a lock wait.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

type Slot = Arc<AsyncMutex<()>>;
type SlotMap<K> = Arc<Mutex<HashMap<K, Slot>>>;

/// Table of exclusive locks keyed by `K`.
pub struct KeyLocks<K> {
    slots: SlotMap<K>,
    wait: Duration,
}

/// The lock wait ceiling elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("lock wait exceeded {0:?}")]
pub struct LockTimeout(pub Duration);

impl<K> KeyLocks<K>
where
    K: Clone + Eq + Hash,
{
    /// Create a table whose waits give up after `wait`.
    #[must_use]
    pub fn new(wait: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            wait,
        }
    }

    /// Configured wait ceiling.
    #[must_use]
    pub const fn wait(&self) -> Duration {
        self.wait
    }

    /// Acquire the lock for `key`, waiting at most the configured ceiling.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock is still held when the ceiling
    /// elapses.
    pub async fn acquire(&self, key: K) -> Result<KeyGuard<K>, LockTimeout> {
        let slot = {
            let mut slots = lock_map(&self.slots);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        if let Ok(guard) = tokio::time::timeout(self.wait, Arc::clone(&slot).lock_owned()).await {
            Ok(KeyGuard {
                key,
                slot,
                guard: Some(guard),
                slots: Arc::clone(&self.slots),
            })
        } else {
            release_slot(&self.slots, &key, &slot);
            Err(LockTimeout(self.wait))
        }
    }

    /// Number of keys currently held or waited on.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        lock_map(&self.slots).len()
    }
}

impl<K> Default for KeyLocks<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_WAIT)
    }
}

/// Exclusive hold on one key. Released on drop.
pub struct KeyGuard<K>
where
    K: Eq + Hash,
{
    key: K,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
    slots: SlotMap<K>,
}

impl<K> KeyGuard<K>
where
    K: Eq + Hash,
{
    /// The locked key.
    pub const fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        drop(self.guard.take());
        release_slot(&self.slots, &self.key, &self.slot);
    }
}

/// Remove the slot for `key` when `slot` is its last outside reference.
fn release_slot<K: Eq + Hash>(slots: &SlotMap<K>, key: &K, slot: &Slot) {
    let mut map = lock_map(slots);
    // One reference in the map, one held by the caller.
    let unused = map.get(key).is_some_and(|s| Arc::ptr_eq(s, slot)) && Arc::strong_count(slot) == 2;
    if unused {
        map.remove(key);
    }
}

fn lock_map<K>(slots: &Mutex<HashMap<K, Slot>>) -> MutexGuard<'_, HashMap<K, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}
