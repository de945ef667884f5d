use crate::blocking;
use crate::gate::WaitGate;
use parking_lot::Mutex;
use std::{
    collections::{hash_map::RandomState, HashMap},
    hash::{BuildHasher, Hash},
    sync::Arc,
};
use tracing::{error, trace};

/// Registry entry for a key that is currently held.
///
/// `waiters` counts threads that found the key held and are blocked (or about
/// to block) on `gate`. It is only touched under the registry mutex, which is
/// what makes reclamation safe: a holder that sees zero waiters can drop the
/// slot knowing no thread has captured the gate.
#[derive(Default)]
struct Slot {
    gate: Option<Arc<WaitGate>>,
    waiters: usize,
}

/// An RAII implementation of a scoped lock. When this structure is dropped
/// (falls out of scope), the lock is released.
#[must_use = "if unused the key is released immediately"]
pub struct Guard<'k, K: Eq + Hash + Clone, S: BuildHasher = RandomState> {
    key: K,
    keyed_lock: &'k KeyedLock<K, S>,
}

impl<'k, K: Eq + Hash + Clone, S: BuildHasher> Guard<'k, K, S> {
    /// The key this guard holds.
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<'k, K: Eq + Hash + Clone, S: BuildHasher> Drop for Guard<'k, K, S> {
    fn drop(&mut self) {
        self.keyed_lock.release(&self.key);
    }
}

/// An RAII implementation of a scoped lock for an `Arc<KeyedLock>`. When this
/// structure is dropped (falls out of scope), the lock is released.
#[must_use = "if unused the key is released immediately"]
pub struct OwnedGuard<K: Eq + Hash + Clone, S: BuildHasher = RandomState> {
    key: K,
    keyed_lock: Arc<KeyedLock<K, S>>,
}

impl<K: Eq + Hash + Clone, S: BuildHasher> OwnedGuard<K, S> {
    /// The key this guard holds.
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone, S: BuildHasher> Drop for OwnedGuard<K, S> {
    fn drop(&mut self) {
        self.keyed_lock.release(&self.key);
    }
}

/// A lock that provides mutually exclusive access to a resource, where the
/// resource is identified by a key.
///
/// Keys are compared with their own `Eq`, so two keys share a lock exactly
/// when they are equal; a hash collision between unequal keys never makes them
/// wait on each other. Only keys that are currently held occupy memory.
///
/// The lock is not reentrant: taking a key again on a thread that already
/// holds it deadlocks. There is no timeout; a waiter blocks until the holder
/// releases.
pub struct KeyedLock<K: Eq + Hash + Clone, S: BuildHasher = RandomState>(
    Mutex<HashMap<K, Slot, S>>,
);

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    /// Creates a new `KeyedLock`.
    #[must_use]
    pub fn new() -> Self {
        Self(Mutex::new(HashMap::new()))
    }

    /// Creates a new `KeyedLock` with room for `capacity` simultaneously held
    /// keys before the registry reallocates.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Mutex::new(HashMap::with_capacity(capacity)))
    }
}

impl<K: Eq + Hash + Clone, S: BuildHasher + Default> Default for KeyedLock<K, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K: Eq + Hash + Clone, S: BuildHasher> KeyedLock<K, S> {
    /// Creates a new `KeyedLock` that hashes keys with `hasher`.
    #[must_use]
    pub fn with_hasher(hasher: S) -> Self {
        Self(Mutex::new(HashMap::with_hasher(hasher)))
    }

    /// Creates a new `KeyedLock` with the given capacity and hasher.
    #[must_use]
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self(Mutex::new(HashMap::with_capacity_and_hasher(
            capacity, hasher,
        )))
    }

    /// Runs `action` on the calling thread while holding the lock for `key`,
    /// and returns whatever it returns.
    ///
    /// If another thread holds an equal key, this blocks until it is handed
    /// over. The key is released on every exit path, including when `action`
    /// panics; the panic then continues to unwind into the caller.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the current thread is marked with
    /// [`forbid_blocking`](crate::blocking::forbid_blocking).
    pub fn with_exclusive_access<F, R>(&self, key: K, action: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = self.lock(key);
        action()
    }

    /// Acquires a lock for a given key.
    ///
    /// If the lock is already held by another thread, this method will wait
    /// until the lock is released.
    ///
    /// When the returned `Guard` is dropped, the lock is released.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the current thread is marked with
    /// [`forbid_blocking`](crate::blocking::forbid_blocking).
    pub fn lock(&self, key: K) -> Guard<'_, K, S> {
        self.acquire(&key);
        Guard {
            key,
            keyed_lock: self,
        }
    }

    /// Acquires a lock for a given key, returning an `OwnedGuard`.
    ///
    /// This method is for use with `Arc<KeyedLock>`. If the lock is already
    /// held by another thread, this method will wait until the lock is
    /// released.
    ///
    /// When the returned `OwnedGuard` is dropped, the lock is released. It may
    /// be dropped on a different thread than the one that acquired it.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the current thread is marked with
    /// [`forbid_blocking`](crate::blocking::forbid_blocking).
    pub fn lock_owned(self: &Arc<Self>, key: K) -> OwnedGuard<K, S> {
        self.acquire(&key);
        OwnedGuard {
            key,
            keyed_lock: Arc::clone(self),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Returns `true` if no key is currently held.
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Registers the caller on `key` and waits for ownership if it is taken.
    fn acquire(&self, key: &K) {
        debug_assert!(
            blocking::is_blocking_allowed(),
            "KeyedLock used on a thread that must not block"
        );

        let gate = {
            let mut registry = self.0.lock();
            if let Some(slot) = registry.get_mut(key) {
                slot.waiters += 1;
                let gate = slot
                    .gate
                    .get_or_insert_with(|| Arc::new(WaitGate::new()));
                Some(Arc::clone(gate))
            } else {
                registry.insert(key.clone(), Slot::default());
                None
            }
        };

        // The registry mutex is released by now; only this key's waiters
        // are held up.
        if let Some(gate) = gate {
            trace!("key is held, waiting for handoff");
            gate.acquire();
        }
    }

    /// Hands `key` to the next waiter, or drops its slot if nobody waits.
    fn release(&self, key: &K) {
        let mut registry = self.0.lock();
        debug_assert!(
            registry.contains_key(key),
            "released a key that was not held"
        );
        let Some(slot) = registry.get_mut(key) else {
            error!("released a key that was not held");
            return;
        };

        if slot.waiters == 0 {
            registry.remove(key);
            trace!(held = registry.len(), "reclaimed key slot");
            return;
        }

        slot.waiters -= 1;
        trace!(waiters = slot.waiters, "handing key to next waiter");
        if let Some(gate) = &slot.gate {
            gate.release();
        }
    }

    #[cfg(test)]
    fn waiters(&self, key: &K) -> Option<usize> {
        self.0.lock().get(key).map(|slot| slot.waiters)
    }
}
