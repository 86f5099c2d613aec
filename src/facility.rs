//! The shared monitor arbitrating machines and weight plates.
//!
//! One mutex guards the whole ledger and one condvar carries every wakeup.
//! Releases broadcast: waiters have different predicates, so each re-checks
//! its own after waking.

use std::ptr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::error::AcquireError;
use crate::events::{EventSink, GymEvent};
use crate::ledger::{Grant, ResourceLedger};
use crate::types::{Availability, Exercise, MemberId};

struct FacilityState {
    ledger: ResourceLedger,
    closed: bool,
}

pub struct Facility {
    state: Mutex<FacilityState>,
    changed: Condvar,
    sink: Arc<dyn EventSink>,
}

/// Proof of a successful acquire. Dropping it without [`Facility::release`]
/// still returns the equipment.
#[must_use = "dropping the handle returns the equipment immediately"]
pub struct AcquisitionHandle<'f> {
    facility: &'f Facility,
    member: MemberId,
    grant: Option<Grant>,
}

impl Drop for AcquisitionHandle<'_> {
    fn drop(&mut self) {
        if let Some(grant) = self.grant.take() {
            self.facility.restore(&grant);
            warn!(
                member = self.member,
                machine = %grant.machine,
                "handle dropped while held; equipment returned"
            );
        }
    }
}

impl Facility {
    pub fn new(ledger: ResourceLedger, sink: Arc<dyn EventSink>) -> Self {
        Self {
            state: Mutex::new(FacilityState {
                ledger,
                closed: false,
            }),
            changed: Condvar::new(),
            sink,
        }
    }

    // Ledger mutations never panic part-way, so a poisoned guard still holds
    // consistent counts.
    fn lock(&self) -> MutexGuard<'_, FacilityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the exercise's machine and every plate class are available,
    /// then take them all at once.
    pub fn acquire(
        &self,
        member: MemberId,
        exercise: &Exercise,
    ) -> Result<AcquisitionHandle<'_>, AcquireError> {
        self.acquire_until(member, exercise, None)
    }

    /// Like [`Self::acquire`], but give up once `patience` has elapsed.
    pub fn acquire_timeout(
        &self,
        member: MemberId,
        exercise: &Exercise,
        patience: Duration,
    ) -> Result<AcquisitionHandle<'_>, AcquireError> {
        self.acquire_until(member, exercise, Some(patience))
    }

    /// Take the exercise's equipment only if it is available right now.
    pub fn try_acquire(
        &self,
        member: MemberId,
        exercise: &Exercise,
    ) -> Option<AcquisitionHandle<'_>> {
        let mut guard = self.lock();
        if guard.closed || !guard.ledger.can_satisfy(exercise) {
            return None;
        }
        let grant = guard.ledger.take(exercise);
        let available = guard.ledger.available().clone();
        drop(guard);
        Some(self.granted(member, exercise, grant, available))
    }

    fn acquire_until(
        &self,
        member: MemberId,
        exercise: &Exercise,
        patience: Option<Duration>,
    ) -> Result<AcquisitionHandle<'_>, AcquireError> {
        let start = Instant::now();
        let mut announced = false;
        let mut guard = self.lock();
        loop {
            if guard.closed {
                drop(guard);
                return Err(self.abandon(member, exercise, AcquireError::Closed));
            }
            if guard.ledger.can_satisfy(exercise) {
                let grant = guard.ledger.take(exercise);
                let available = guard.ledger.available().clone();
                drop(guard);
                return Ok(self.granted(member, exercise, grant, available));
            }
            if !announced {
                announced = true;
                let exceeds_capacity = guard.ledger.exceeds_capacity(exercise);
                // Emitting under the lock keeps the event ordered with the check.
                self.sink.emit(GymEvent::Waiting {
                    member,
                    exercise: exercise.clone(),
                    exceeds_capacity,
                });
            } else {
                trace!(member, "woke without enough equipment; waiting again");
            }
            // Wait releases the lock and re-acquires it before returning.
            guard = match patience {
                None => self.changed.wait(guard).unwrap_or_else(PoisonError::into_inner),
                Some(patience) => {
                    let waited = start.elapsed();
                    if waited >= patience {
                        drop(guard);
                        let reason = AcquireError::TimedOut { waited };
                        return Err(self.abandon(member, exercise, reason));
                    }
                    let (guard, _) = self
                        .changed
                        .wait_timeout(guard, patience - waited)
                        .unwrap_or_else(PoisonError::into_inner);
                    guard
                }
            };
        }
    }

    fn granted(
        &self,
        member: MemberId,
        exercise: &Exercise,
        grant: Grant,
        available: Availability,
    ) -> AcquisitionHandle<'_> {
        // Built before emitting so a panicking sink still returns the grant.
        let handle = AcquisitionHandle {
            facility: self,
            member,
            grant: Some(grant),
        };
        self.sink.emit(GymEvent::Acquired {
            member,
            exercise: exercise.clone(),
            available,
        });
        handle
    }

    fn abandon(&self, member: MemberId, exercise: &Exercise, reason: AcquireError) -> AcquireError {
        self.sink.emit(GymEvent::Abandoned {
            member,
            exercise: exercise.clone(),
            reason: reason.clone(),
        });
        reason
    }

    /// Return exactly what the handle took and wake every waiter.
    ///
    /// # Panics
    ///
    /// Panics if the handle was issued by a different facility.
    pub fn release(&self, mut handle: AcquisitionHandle<'_>) {
        assert!(
            ptr::eq(self, handle.facility),
            "handle released on a facility that did not issue it"
        );
        if let Some(grant) = handle.grant.take() {
            let available = self.restore(&grant);
            self.sink.emit(GymEvent::Released {
                member: handle.member,
                machine: grant.machine,
                available,
            });
        }
    }

    fn restore(&self, grant: &Grant) -> Availability {
        let mut guard = self.lock();
        guard.ledger.restore(grant);
        let available = guard.ledger.available().clone();
        self.changed.notify_all();
        available
    }

    /// Refuse further acquires and wake every waiter so it can give up.
    pub fn close(&self) {
        let mut guard = self.lock();
        guard.closed = true;
        self.changed.notify_all();
    }

    pub fn availability(&self) -> Availability {
        self.lock().ledger.available().clone()
    }

    pub fn capacity(&self) -> Availability {
        self.lock().ledger.capacity().clone()
    }

    /// True when nothing is currently held.
    pub fn is_restored(&self) -> bool {
        self.lock().ledger.is_restored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingSink;
    use crate::types::{MachineKind, WeightClass};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Barrier;
    use std::thread;

    fn facility(
        machines: &[(MachineKind, u32)],
        weights: &[(WeightClass, u32)],
    ) -> (Arc<Facility>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let ledger = ResourceLedger::new(machines.iter().copied(), weights.iter().copied());
        (Arc::new(Facility::new(ledger, sink.clone())), sink)
    }

    fn exercise(machine: MachineKind, medium: u32, ms: u64) -> Exercise {
        Exercise::new(
            machine,
            [(WeightClass::Medium, medium)],
            Duration::from_millis(ms),
        )
    }

    #[test]
    fn acquire_and_release_restore_capacity() {
        let (facility, sink) =
            facility(&[(MachineKind::Barbell, 2)], &[(WeightClass::Medium, 100)]);
        let handle = facility
            .acquire(1, &exercise(MachineKind::Barbell, 10, 0))
            .expect("acquire");
        let during = facility.availability();
        assert_eq!(during.machine(MachineKind::Barbell), 1);
        assert_eq!(during.plates(WeightClass::Medium), 90);
        facility.release(handle);
        let after = facility.availability();
        assert_eq!(after.machine(MachineKind::Barbell), 2);
        assert_eq!(after.plates(WeightClass::Medium), 100);
        assert!(facility.is_restored());

        let events = sink.events();
        assert!(matches!(events[0], GymEvent::Acquired { member: 1, .. }));
        assert!(matches!(events[1], GymEvent::Released { member: 1, .. }));
    }

    #[test]
    fn single_machine_is_exclusive_under_contention() {
        let (facility, _) = facility(&[(MachineKind::SquatMachine, 1)], &[]);
        let contenders = 6;
        let barrier = Arc::new(Barrier::new(contenders));
        let holders = Arc::new(AtomicUsize::new(0));
        let violation = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for member in 0..contenders {
            let facility = Arc::clone(&facility);
            let barrier = Arc::clone(&barrier);
            let holders = Arc::clone(&holders);
            let violation = Arc::clone(&violation);
            handles.push(thread::spawn(move || {
                let squat = exercise(MachineKind::SquatMachine, 0, 0);
                barrier.wait();
                let handle = facility.acquire(member as u64, &squat).expect("acquire");
                if holders.fetch_add(1, Ordering::SeqCst) + 1 > 1 {
                    violation.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(10));
                holders.fetch_sub(1, Ordering::SeqCst);
                facility.release(handle);
            }));
        }

        for handle in handles {
            handle.join().expect("member thread panicked");
        }
        assert!(!violation.load(Ordering::SeqCst));
        assert!(facility.is_restored());
    }

    #[test]
    fn plates_are_never_overcommitted() {
        let (facility, _) = facility(&[(MachineKind::Barbell, 8)], &[(WeightClass::Medium, 30)]);
        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));
        let held_plates = Arc::new(AtomicUsize::new(0));
        let violation = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for member in 0..contenders {
            let facility = Arc::clone(&facility);
            let barrier = Arc::clone(&barrier);
            let held_plates = Arc::clone(&held_plates);
            let violation = Arc::clone(&violation);
            handles.push(thread::spawn(move || {
                let heavy = exercise(MachineKind::Barbell, 12, 0);
                barrier.wait();
                for _ in 0..5 {
                    let handle = facility.acquire(member as u64, &heavy).expect("acquire");
                    if held_plates.fetch_add(12, Ordering::SeqCst) + 12 > 30 {
                        violation.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(2));
                    held_plates.fetch_sub(12, Ordering::SeqCst);
                    facility.release(handle);
                }
            }));
        }

        for handle in handles {
            handle.join().expect("member thread panicked");
        }
        assert!(!violation.load(Ordering::SeqCst));
        assert_eq!(facility.availability().plates(WeightClass::Medium), 30);
    }

    #[test]
    fn release_wakes_blocked_member() {
        let (facility, _) = facility(&[(MachineKind::LegCurl, 1)], &[]);
        let curl = exercise(MachineKind::LegCurl, 0, 0);
        let first = facility.acquire(1, &curl).expect("acquire");

        let (done_tx, done_rx) = mpsc::channel();
        let waiter = {
            let facility = Arc::clone(&facility);
            let curl = curl.clone();
            thread::spawn(move || {
                let handle = facility.acquire(2, &curl).expect("acquire");
                done_tx.send(()).expect("done");
                facility.release(handle);
            })
        };

        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
        facility.release(first);
        done_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("waiter should acquire after release");
        waiter.join().expect("waiter panicked");
        assert!(facility.is_restored());
    }

    #[test]
    fn close_unblocks_waiter_without_taking_anything() {
        let (facility, sink) =
            facility(&[(MachineKind::SquatMachine, 1)], &[(WeightClass::Medium, 5)]);
        let impossible = exercise(MachineKind::SquatMachine, 10, 0);
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let waiter = {
            let facility = Arc::clone(&facility);
            thread::spawn(move || {
                ready_tx.send(()).expect("ready");
                let result = facility
                    .acquire(3, &impossible)
                    .map(|handle| facility.release(handle));
                done_tx.send(result).expect("done");
            })
        };

        ready_rx.recv_timeout(Duration::from_secs(1)).expect("ready");
        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
        facility.close();
        let result = done_rx.recv_timeout(Duration::from_secs(1)).expect("done");
        assert_eq!(result, Err(AcquireError::Closed));
        waiter.join().expect("waiter panicked");

        // No phantom release: counts never moved.
        assert!(facility.is_restored());
        let events = sink.events();
        assert!(events.iter().any(|event| matches!(
            event,
            GymEvent::Waiting { member: 3, exceeds_capacity: true, .. }
        )));
        assert!(!events.iter().any(|event| matches!(event, GymEvent::Released { .. })));
    }

    #[test]
    fn timed_out_acquire_leaves_counts_untouched() {
        let (facility, _) = facility(&[(MachineKind::Barbell, 1)], &[(WeightClass::Medium, 10)]);
        let held = facility
            .acquire(1, &exercise(MachineKind::Barbell, 4, 0))
            .expect("acquire");
        let result = facility.acquire_timeout(
            2,
            &exercise(MachineKind::Barbell, 4, 0),
            Duration::from_millis(30),
        );
        match result {
            Err(AcquireError::TimedOut { waited }) => assert!(waited >= Duration::from_millis(30)),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("acquire should have timed out"),
        }
        assert_eq!(facility.availability().plates(WeightClass::Medium), 6);
        facility.release(held);
        assert!(facility.is_restored());
    }

    #[test]
    fn try_acquire_does_not_block() {
        let (facility, _) = facility(&[(MachineKind::PecDeck, 1)], &[]);
        let pec = exercise(MachineKind::PecDeck, 0, 0);
        let handle = facility.try_acquire(1, &pec).expect("first try");
        assert!(facility.try_acquire(2, &pec).is_none());
        facility.release(handle);
        assert!(facility.try_acquire(2, &pec).is_some());
        // The second handle was dropped at the end of the statement.
        assert!(facility.is_restored());
    }

    #[test]
    fn dropped_handle_returns_equipment() {
        let (facility, sink) = facility(&[(MachineKind::Barbell, 1)], &[(WeightClass::Medium, 10)]);
        {
            let _handle = facility
                .acquire(1, &exercise(MachineKind::Barbell, 10, 0))
                .expect("acquire");
            assert_eq!(facility.availability().plates(WeightClass::Medium), 0);
        }
        assert!(facility.is_restored());
        assert!(!sink.events().iter().any(|event| matches!(event, GymEvent::Released { .. })));
    }

    #[test]
    #[should_panic(expected = "did not issue it")]
    fn release_on_foreign_facility_panics() {
        let (first, _) = facility(&[(MachineKind::Barbell, 1)], &[]);
        let (second, _) = facility(&[(MachineKind::Barbell, 1)], &[]);
        let handle = first
            .acquire(1, &exercise(MachineKind::Barbell, 0, 0))
            .expect("acquire");
        second.release(handle);
    }
}
