//! Completion and heartbeat tracking for members working out.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::types::MemberId;

struct TrackerState {
    running: BTreeSet<MemberId>,
    last_seen: HashMap<MemberId, Instant>,
}

/// Members signal here when they make progress or leave; the supervisor
/// blocks on it instead of polling thread liveness.
pub struct CompletionTracker {
    state: Mutex<TrackerState>,
    finished: Condvar,
}

impl CompletionTracker {
    fn overdue_members(
        state: &TrackerState,
        now: Instant,
        timeout: Duration,
    ) -> BTreeSet<MemberId> {
        state
            .running
            .iter()
            .copied()
            .filter(|member| {
                state
                    .last_seen
                    .get(member)
                    .is_none_or(|&last| now.duration_since(last) > timeout)
            })
            .collect()
    }

    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                running: BTreeSet::new(),
                last_seen: HashMap::new(),
            }),
            finished: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a member as running; no-op if already registered.
    pub fn register(&self, member: MemberId) {
        let mut guard = self.lock();
        guard.running.insert(member);
        guard.last_seen.entry(member).or_insert_with(Instant::now);
    }

    /// Record that a member just made progress.
    pub fn heartbeat(&self, member: MemberId) {
        let mut guard = self.lock();
        guard.last_seen.insert(member, Instant::now());
    }

    /// Remove a member from the running set and wake the supervisor.
    pub fn finish(&self, member: MemberId) {
        let mut guard = self.lock();
        if guard.running.remove(&member) {
            self.finished.notify_all();
        }
    }

    /// Snapshot of the members still running.
    pub fn running(&self) -> BTreeSet<MemberId> {
        self.lock().running.clone()
    }

    /// Running members with no heartbeat for longer than `timeout`.
    pub fn idle_members(&self, timeout: Duration) -> BTreeSet<MemberId> {
        let guard = self.lock();
        Self::overdue_members(&guard, Instant::now(), timeout)
    }

    /// Block until the running set differs in size from `seen` or `tick`
    /// elapses, then return the current running set.
    pub fn wait_for_change(&self, seen: usize, tick: Duration) -> BTreeSet<MemberId> {
        let guard = self.lock();
        let (guard, _) = self
            .finished
            .wait_timeout_while(guard, tick, |state| state.running.len() == seen)
            .unwrap_or_else(PoisonError::into_inner);
        guard.running.clone()
    }

    /// Test-only hook to set deterministic timestamps without sleeping.
    #[cfg(test)]
    fn set_last_seen_for_test(&self, member: MemberId, instant: Instant) {
        let mut guard = self.lock();
        guard.last_seen.insert(member, instant);
    }
}

/// Calls [`CompletionTracker::finish`] on drop, so a member that panics is
/// still counted as done.
pub struct FinishGuard<'t> {
    tracker: &'t CompletionTracker,
    member: MemberId,
}

impl<'t> FinishGuard<'t> {
    pub fn new(tracker: &'t CompletionTracker, member: MemberId) -> Self {
        Self { tracker, member }
    }
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.tracker.finish(self.member);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn idle_after_timeout() {
        let tracker = CompletionTracker::new();
        tracker.register(7);
        let past = Instant::now() - Duration::from_millis(50);
        tracker.set_last_seen_for_test(7, past);
        // Timeout shorter than elapsed time should mark idle.
        assert!(tracker.idle_members(Duration::from_millis(10)).contains(&7));
    }

    #[test]
    fn heartbeat_clears_idle() {
        let tracker = CompletionTracker::new();
        tracker.register(21);
        tracker.set_last_seen_for_test(21, Instant::now() - Duration::from_secs(5));
        assert!(tracker.idle_members(Duration::from_secs(1)).contains(&21));
        tracker.heartbeat(21);
        assert!(tracker.idle_members(Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn finished_members_are_never_idle() {
        let tracker = CompletionTracker::new();
        tracker.register(3);
        tracker.set_last_seen_for_test(3, Instant::now() - Duration::from_secs(5));
        tracker.finish(3);
        assert!(tracker.idle_members(Duration::from_secs(1)).is_empty());
        assert!(tracker.running().is_empty());
    }

    #[test]
    fn finish_wakes_waiting_observer() {
        let tracker = Arc::new(CompletionTracker::new());
        tracker.register(1);
        tracker.register(2);

        let member = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let _guard = FinishGuard::new(&tracker, 2);
            })
        };

        let start = Instant::now();
        let running = tracker.wait_for_change(2, Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(running, BTreeSet::from([1]));
        member.join().expect("member thread panicked");
    }

    #[test]
    fn wait_for_change_returns_after_tick() {
        let tracker = CompletionTracker::new();
        tracker.register(1);
        let running = tracker.wait_for_change(1, Duration::from_millis(10));
        assert_eq!(running, BTreeSet::from([1]));
    }

    #[test]
    fn guard_finishes_on_panic() {
        let tracker = Arc::new(CompletionTracker::new());
        tracker.register(9);
        let result = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                let _guard = FinishGuard::new(&tracker, 9);
                panic!("routine blew up");
            })
            .join()
        };
        assert!(result.is_err());
        assert!(tracker.running().is_empty());
    }
}
