//! Single-flight run lock

use std::sync::atomic::{AtomicBool, Ordering};

/// `Idle`/`Running` flag flipped with compare-and-swap
///
/// Acquisition fails fast when the lock is held; there is no waiting.
#[derive(Debug, Default)]
pub struct RunLock {
    running: AtomicBool,
}

impl RunLock {
    /// An idle lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `Idle -> Running`, or return `None` if already running
    pub fn try_acquire(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { lock: self })
    }

    /// Whether the lock is currently held
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Holds the lock; moves it back to `Idle` when dropped
#[derive(Debug)]
pub struct RunGuard<'a> {
    lock: &'a RunLock,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.lock.running.store(false, Ordering::Release);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn second_acquire_fails_until_guard_drops() {
        let lock = RunLock::new();

        let guard = lock.try_acquire().unwrap();
        assert!(lock.is_running());
        assert!(lock.try_acquire().is_none());

        drop(guard);
        assert!(!lock.is_running());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn guard_releases_on_panic() {
        let lock = Arc::new(RunLock::new());
        let inner = lock.clone();

        let result = std::thread::spawn(move || {
            let _guard = inner.try_acquire().unwrap();
            panic!("run blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!lock.is_running());
    }

    #[test]
    fn exactly_one_thread_wins() {
        let lock = Arc::new(RunLock::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    // Leak the guard so the winner keeps the lock
                    lock.try_acquire().map(std::mem::forget).is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
