//! A gym member working through an ordered routine of exercises.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::AcquireError;
use crate::facility::Facility;
use crate::progress::CompletionTracker;
use crate::types::{Exercise, MemberId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoutineSummary {
    pub completed: usize,
    pub abandoned: usize,
}

#[derive(Clone, Debug)]
pub struct Member {
    id: MemberId,
    exercises: Vec<Exercise>,
}

impl Member {
    pub fn new(id: MemberId, exercises: Vec<Exercise>) -> Self {
        Self { id, exercises }
    }

    pub fn id(&self) -> MemberId {
        self.id
    }

    pub fn exercises(&self) -> &[Exercise] {
        &self.exercises
    }

    /// Perform every exercise in order: acquire, hold without the lock,
    /// release.
    ///
    /// With `patience`, an exercise that cannot start in time is skipped and
    /// the routine moves on. A closed facility ends the routine; remaining
    /// exercises count as abandoned.
    pub fn perform_routine(
        &self,
        facility: &Facility,
        tracker: &CompletionTracker,
        patience: Option<Duration>,
    ) -> RoutineSummary {
        let mut summary = RoutineSummary::default();
        for (index, exercise) in self.exercises.iter().enumerate() {
            debug!(member = self.id, %exercise, "checking equipment");
            let acquired = match patience {
                Some(patience) => facility.acquire_timeout(self.id, exercise, patience),
                None => facility.acquire(self.id, exercise),
            };
            match acquired {
                Ok(handle) => {
                    tracker.heartbeat(self.id);
                    if !exercise.duration().is_zero() {
                        thread::sleep(exercise.duration());
                    }
                    facility.release(handle);
                    tracker.heartbeat(self.id);
                    summary.completed += 1;
                }
                Err(AcquireError::TimedOut { .. }) => {
                    summary.abandoned += 1;
                }
                Err(AcquireError::Closed) => {
                    summary.abandoned += self.exercises.len() - index;
                    break;
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingSink;
    use crate::events::GymEvent;
    use crate::ledger::ResourceLedger;
    use crate::types::{MachineKind, WeightClass};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn exercise(machine: MachineKind, large: u32, ms: u64) -> Exercise {
        Exercise::new(machine, [(WeightClass::Large, large)], Duration::from_millis(ms))
    }

    fn facility(sink: Arc<RecordingSink>) -> Facility {
        Facility::new(
            ResourceLedger::new(
                [(MachineKind::Barbell, 1), (MachineKind::LegPress, 1)],
                [(WeightClass::Large, 6)],
            ),
            sink,
        )
    }

    #[test]
    fn routine_runs_in_order_and_restores() {
        let sink = Arc::new(RecordingSink::new());
        let facility = facility(sink.clone());
        let tracker = CompletionTracker::new();
        let member = Member::new(
            5,
            vec![
                exercise(MachineKind::Barbell, 2, 1),
                exercise(MachineKind::LegPress, 6, 1),
                exercise(MachineKind::Barbell, 0, 0),
            ],
        );

        let summary = member.perform_routine(&facility, &tracker, None);
        assert_eq!(summary, RoutineSummary { completed: 3, abandoned: 0 });
        assert!(facility.is_restored());

        let acquired: Vec<MachineKind> = sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                GymEvent::Acquired { exercise, .. } => Some(exercise.machine()),
                _ => None,
            })
            .collect();
        assert_eq!(
            acquired,
            vec![MachineKind::Barbell, MachineKind::LegPress, MachineKind::Barbell]
        );
    }

    #[test]
    fn timed_out_exercise_is_skipped_and_routine_continues() {
        let sink = Arc::new(RecordingSink::new());
        let facility = facility(sink.clone());
        let tracker = CompletionTracker::new();
        let member = Member::new(
            6,
            vec![
                exercise(MachineKind::Barbell, 7, 0),
                exercise(MachineKind::LegPress, 1, 0),
            ],
        );

        let summary = member.perform_routine(&facility, &tracker, Some(Duration::from_millis(20)));
        assert_eq!(summary, RoutineSummary { completed: 1, abandoned: 1 });
        assert!(facility.is_restored());
        let releases = sink
            .events()
            .iter()
            .filter(|event| matches!(event, GymEvent::Released { .. }))
            .count();
        assert_eq!(releases, 1);
    }

    #[test]
    fn closed_facility_abandons_the_rest() {
        let sink = Arc::new(RecordingSink::new());
        let facility = facility(sink);
        facility.close();
        let tracker = CompletionTracker::new();
        let member = Member::new(
            7,
            vec![
                exercise(MachineKind::Barbell, 0, 0),
                exercise(MachineKind::Barbell, 0, 0),
            ],
        );
        let summary = member.perform_routine(&facility, &tracker, None);
        assert_eq!(summary, RoutineSummary { completed: 0, abandoned: 2 });
    }

    #[test]
    fn hold_happens_outside_the_lock() {
        // Two members on different machines must overlap their holds.
        let sink = Arc::new(RecordingSink::new());
        let facility = Arc::new(facility(sink));
        let tracker = Arc::new(CompletionTracker::new());
        let overlapped = Arc::new(AtomicBool::new(false));

        let probe = {
            let facility = Arc::clone(&facility);
            let overlapped = Arc::clone(&overlapped);
            std::thread::spawn(move || {
                for _ in 0..40 {
                    let held = facility.availability();
                    if held.machine(MachineKind::Barbell) == 0
                        && held.machine(MachineKind::LegPress) == 0
                    {
                        overlapped.store(true, Ordering::SeqCst);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            })
        };

        let mut members = Vec::new();
        for (id, machine) in [(1, MachineKind::Barbell), (2, MachineKind::LegPress)] {
            let facility = Arc::clone(&facility);
            let tracker = Arc::clone(&tracker);
            members.push(std::thread::spawn(move || {
                Member::new(id, vec![exercise(machine, 0, 120)])
                    .perform_routine(&facility, &tracker, None)
            }));
        }
        for member in members {
            assert_eq!(member.join().expect("member panicked").completed, 1);
        }
        probe.join().expect("probe panicked");
        assert!(overlapped.load(Ordering::SeqCst));
    }
}
