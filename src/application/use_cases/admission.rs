use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::suite::Suite;

/// One Idle/Running slot per suite. A Web run and an Api run may overlap;
/// two Web runs may not.
#[derive(Debug, Default)]
pub struct RunAdmissionGuard {
    running: [AtomicBool; 3],
}

impl RunAdmissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle -> Running. Returns false, without side effects, if the suite is
    /// already running.
    pub fn try_acquire(&self, suite: Suite) -> bool {
        self.running[suite.index()]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Running -> Idle. No-op on an idle suite.
    pub fn release(&self, suite: Suite) {
        self.running[suite.index()].store(false, Ordering::Release);
    }

    pub fn is_running(&self, suite: Suite) -> bool {
        self.running[suite.index()].load(Ordering::Acquire)
    }

    /// Acquire a slot that is released when the returned permit drops, including
    /// during unwinding.
    pub fn permit(self: &Arc<Self>, suite: Suite) -> Option<AdmissionPermit> {
        if self.try_acquire(suite) {
            Some(AdmissionPermit {
                guard: Arc::clone(self),
                suite,
            })
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub struct AdmissionPermit {
    guard: Arc<RunAdmissionGuard>,
    suite: Suite,
}

impl AdmissionPermit {
    pub fn suite(&self) -> Suite {
        self.suite
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.guard.release(self.suite);
        tracing::debug!(suite = %self.suite, "admission slot released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let guard = RunAdmissionGuard::new();
        assert!(guard.try_acquire(Suite::Web));
        assert!(!guard.try_acquire(Suite::Web));
        guard.release(Suite::Web);
        assert!(guard.try_acquire(Suite::Web));
    }

    #[test]
    fn suites_are_independent() {
        let guard = RunAdmissionGuard::new();
        assert!(guard.try_acquire(Suite::Web));
        assert!(guard.try_acquire(Suite::Api));
        assert!(guard.try_acquire(Suite::App));
        assert!(guard.is_running(Suite::Api));
    }

    #[test]
    fn release_on_idle_suite_is_noop() {
        let guard = RunAdmissionGuard::new();
        guard.release(Suite::App);
        guard.release(Suite::App);
        assert!(!guard.is_running(Suite::App));
        assert!(guard.try_acquire(Suite::App));
    }

    #[test]
    fn permit_releases_on_drop() {
        let guard = Arc::new(RunAdmissionGuard::new());
        let permit = guard.permit(Suite::Api).expect("idle suite");
        assert!(guard.permit(Suite::Api).is_none());
        drop(permit);
        assert!(!guard.is_running(Suite::Api));
    }

    #[test]
    fn permit_releases_when_worker_panics() {
        let guard = Arc::new(RunAdmissionGuard::new());
        let permit = guard.permit(Suite::Web).expect("idle suite");
        let result = std::thread::spawn(move || {
            let _permit = permit;
            panic!("worker blew up");
        })
        .join();
        assert!(result.is_err());
        assert!(!guard.is_running(Suite::Web));
    }

    #[test]
    fn only_one_of_many_racing_triggers_wins() {
        let guard = Arc::new(RunAdmissionGuard::new());
        let winners: usize = (0..16)
            .map(|_| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.try_acquire(Suite::Web))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().map(usize::from).unwrap_or(0))
            .sum();
        assert_eq!(winners, 1);
    }
}
