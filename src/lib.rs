//! This crate provides a keyed lock: exclusive execution of a block of code
//! scoped to one key, while code working on other keys runs concurrently.
//!
//! ```
//! use keyed_gate::KeyedLock;
//!
//! let accounts = KeyedLock::new();
//! let balance = accounts.with_exclusive_access("alice", || 40 + 2);
//! assert_eq!(balance, 42);
//! ```
//!
//! Per-key state lives only while a key is held or waited on, so locking an
//! unbounded number of distinct keys over time does not grow memory.
//!
//! Acquiring blocks the calling thread. Threads that must stay responsive can
//! be marked with [`blocking::forbid_blocking`]; debug builds then panic
//! instead of stalling them.

pub mod blocking;
mod gate;
pub mod sync;

pub use sync::{Guard, KeyedLock, OwnedGuard};
