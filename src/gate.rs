use parking_lot::{Condvar, Mutex};

/// A handoff point shared by the threads contending for one key.
///
/// Behaves like a counting semaphore that starts at zero: [`WaitGate::acquire`]
/// blocks until a permit is available and consumes it, and
/// [`WaitGate::release`] deposits a permit and wakes at most one waiter. A
/// permit deposited before its waiter gets around to blocking is kept, so a
/// handoff can never be lost.
#[derive(Debug, Default)]
pub(crate) struct WaitGate {
    permits: Mutex<usize>,
    available: Condvar,
}

impl WaitGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Blocks the calling thread until a permit is available, then takes it.
    pub(crate) fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Deposits one permit and wakes a single waiter, if any.
    pub(crate) fn release(&self) {
        *self.permits.lock() += 1;
        self.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_permit_before_acquire_is_kept() {
        let gate = WaitGate::new();
        gate.release();
        // Must not block: the permit was deposited ahead of time.
        gate.acquire();
        assert_eq!(*gate.permits.lock(), 0);
    }

    #[test]
    fn test_permits_accumulate() {
        let gate = WaitGate::new();
        gate.release();
        gate.release();
        gate.acquire();
        gate.acquire();
        assert_eq!(*gate.permits.lock(), 0);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let gate = Arc::new(WaitGate::new());
        let passed = Arc::new(AtomicBool::new(false));

        let handle = {
            let gate = Arc::clone(&gate);
            let passed = Arc::clone(&passed);
            thread::spawn(move || {
                gate.acquire();
                passed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!passed.load(Ordering::SeqCst));

        gate.release();
        handle.join().unwrap();
        assert!(passed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_release_wakes_one_waiter_at_a_time() {
        let gate = Arc::new(WaitGate::new());
        let woken = Arc::new(parking_lot::Mutex::new(0usize));
        let mut handles = vec![];

        for _ in 0..2 {
            let gate = Arc::clone(&gate);
            let woken = Arc::clone(&woken);
            handles.push(thread::spawn(move || {
                gate.acquire();
                *woken.lock() += 1;
            }));
        }

        thread::sleep(Duration::from_millis(50));
        gate.release();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(*woken.lock(), 1);

        gate.release();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*woken.lock(), 2);
    }
}
