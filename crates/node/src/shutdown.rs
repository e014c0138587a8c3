//! Exactly-once shutdown teardown under concurrent requesters.
//!
//! Any thread (signal task, a stop command, the bootstrap failure path)
//! may call `run`; the first caller becomes the leader and executes the
//! teardown body, everyone else blocks on the condvar until the leader
//! marks the teardown complete.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use tokio::sync::watch;

#[derive(Default)]
struct ShutdownFlags {
    taken: bool,
    exited: bool,
}

pub struct ShutdownCoordinator {
    requested: AtomicBool,
    revision: AtomicU64,
    flags: Mutex<ShutdownFlags>,
    exited_cv: Condvar,
    notify: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            requested: AtomicBool::new(false),
            revision: AtomicU64::new(0),
            flags: Mutex::new(ShutdownFlags::default()),
            exited_cv: Condvar::new(),
            notify,
        }
    }

    /// Async observers wait on this channel; it flips to `true` once a
    /// shutdown has been requested.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.notify.subscribe()
    }

    /// Flag long-running loops poll; index load takes it directly.
    pub fn requested_flag(&self) -> &AtomicBool {
        &self.requested
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Counter bumped on every request, for polling loops that care
    /// about "something changed" rather than the flag itself.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.revision.fetch_add(1, Ordering::SeqCst);
        let _ = self.notify.send(true);
    }

    pub fn has_exited(&self) -> bool {
        self.flags.lock().expect("shutdown lock").exited
    }

    /// Execute `teardown` exactly once. The first caller runs it; later
    /// or concurrent callers block until it has finished, then return
    /// without repeating any of it.
    pub fn run(&self, teardown: impl FnOnce()) {
        self.request();
        let leader = {
            let mut flags = self.flags.lock().expect("shutdown lock");
            if flags.taken {
                false
            } else {
                flags.taken = true;
                true
            }
        };

        if leader {
            teardown();
            let mut flags = self.flags.lock().expect("shutdown lock");
            flags.exited = true;
            self.exited_cv.notify_all();
        } else {
            let mut flags = self.flags.lock().expect("shutdown lock");
            while !flags.exited {
                flags = self.exited_cv.wait(flags).expect("shutdown lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn request_sets_flag_and_bumps_revision() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_requested());
        let before = coordinator.revision();
        coordinator.request();
        assert!(coordinator.is_requested());
        assert_eq!(coordinator.revision(), before + 1);
    }

    #[test]
    fn teardown_runs_exactly_once_under_concurrent_callers() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let runs = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let runs = runs.clone();
            handles.push(std::thread::spawn(move || {
                coordinator.run(|| {
                    // Give the other threads time to pile up as followers.
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    runs.fetch_add(1, Ordering::SeqCst);
                });
            }));
        }
        for handle in handles {
            handle.join().expect("join");
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(coordinator.has_exited());
    }

    #[test]
    fn run_after_exit_does_not_repeat_teardown() {
        let coordinator = ShutdownCoordinator::new();
        let runs = AtomicU32::new(0);
        coordinator.run(|| {
            runs.fetch_add(1, Ordering::SeqCst);
        });
        coordinator.run(|| {
            runs.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn watch_subscribers_observe_request() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();
        assert!(!*rx.borrow());
        coordinator.request();
        rx.changed().await.expect("changed");
        assert!(*rx.borrow());
    }
}
