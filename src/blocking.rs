//! Per-thread marking of threads that must never block on a keyed lock.
//!
//! Some threads (an event loop, a UI thread, a reactor driving I/O) must stay
//! responsive. Wrapping their lifetime in [`forbid_blocking`] turns any
//! attempt to take a [`KeyedLock`](crate::KeyedLock) on them into a panic in
//! debug builds, instead of a silent stall.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static FORBIDDEN: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as one that must not block until the returned
/// scope is dropped.
///
/// Scopes nest; dropping one restores whatever the thread's state was when it
/// was created.
pub fn forbid_blocking() -> NonBlockingScope {
    let previous = FORBIDDEN.with(|forbidden| forbidden.replace(true));
    NonBlockingScope {
        previous,
        _not_send: PhantomData,
    }
}

/// Returns `false` while the current thread is inside a [`NonBlockingScope`].
pub fn is_blocking_allowed() -> bool {
    !FORBIDDEN.with(Cell::get)
}

/// Scope returned by [`forbid_blocking`]. Tied to the thread that created it.
#[must_use = "the thread is only marked while the scope is alive"]
#[derive(Debug)]
pub struct NonBlockingScope {
    previous: bool,
    _not_send: PhantomData<*const ()>,
}

impl Drop for NonBlockingScope {
    fn drop(&mut self) {
        FORBIDDEN.with(|forbidden| forbidden.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_allowed_by_default() {
        assert!(is_blocking_allowed());
    }

    #[test]
    fn test_scope_marks_and_restores() {
        let scope = forbid_blocking();
        assert!(!is_blocking_allowed());
        drop(scope);
        assert!(is_blocking_allowed());
    }

    #[test]
    fn test_nested_scopes() {
        let outer = forbid_blocking();
        {
            let _inner = forbid_blocking();
            assert!(!is_blocking_allowed());
        }
        // Still inside the outer scope.
        assert!(!is_blocking_allowed());
        drop(outer);
        assert!(is_blocking_allowed());
    }

    #[test]
    fn test_mark_is_per_thread() {
        let _scope = forbid_blocking();
        let other = thread::spawn(is_blocking_allowed).join().unwrap();
        assert!(other);
        assert!(!is_blocking_allowed());
    }
}
