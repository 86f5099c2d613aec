//! Gym roster setup and the day's run: members and staff on their own threads.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info};

use crate::error::GymError;
use crate::events::{EventSink, GymEvent};
use crate::facility::Facility;
use crate::ledger::ResourceLedger;
use crate::member::{Member, RoutineSummary};
use crate::progress::{CompletionTracker, FinishGuard};
use crate::routine::RoutinePlanner;
use crate::supervisor::{Supervisor, SupervisorOutcome};
use crate::types::{Availability, MachineKind, MemberId, WeightClass};

/// Knobs for a single day's run.
#[derive(Clone, Copy, Debug)]
pub struct OpenOptions {
    /// Supervisor tick between progress checks.
    pub poll_interval: Duration,
    /// Give up on a day whose remaining members have all been silent this long.
    pub stall_timeout: Option<Duration>,
    /// Per-exercise patience before a member skips it.
    pub acquire_timeout: Option<Duration>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            stall_timeout: None,
            acquire_timeout: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberOutcome {
    /// The routine ran to its end; some exercises may have been abandoned.
    Finished(RoutineSummary),
    /// The routine panicked and was cut short.
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DayOutcome {
    Completed,
    /// Members that could not make progress when the day was called off.
    Stalled { blocked: BTreeSet<MemberId> },
}

#[derive(Clone, Debug)]
pub struct DayReport {
    pub outcome: DayOutcome,
    pub members: BTreeMap<MemberId, MemberOutcome>,
    /// Running-set size at each supervisor report.
    pub progress: Vec<usize>,
    pub capacity: Availability,
    pub final_availability: Availability,
}

impl DayReport {
    /// Every machine and plate is back where it started.
    pub fn restored(&self) -> bool {
        self.final_availability == self.capacity
    }

    pub fn exercises_completed(&self) -> usize {
        self.members
            .values()
            .map(|outcome| match outcome {
                MemberOutcome::Finished(summary) => summary.completed,
                MemberOutcome::Failed(_) => 0,
            })
            .sum()
    }
}

pub struct Gym {
    capacity: usize,
    machines: BTreeMap<MachineKind, u32>,
    weights: BTreeMap<WeightClass, u32>,
    members: BTreeMap<MemberId, Member>,
}

impl Gym {
    /// An empty gym that admits at most `capacity` members.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            machines: BTreeMap::new(),
            weights: BTreeMap::new(),
            members: BTreeMap::new(),
        }
    }

    /// Add machines; repeated calls for a kind accumulate.
    pub fn add_machine(&mut self, kind: MachineKind, amount: u32) {
        *self.machines.entry(kind).or_insert(0) += amount;
    }

    /// Add plates; repeated calls for a class accumulate.
    pub fn add_weight(&mut self, class: WeightClass, amount: u32) {
        *self.weights.entry(class).or_insert(0) += amount;
    }

    pub fn machines(&self) -> &BTreeMap<MachineKind, u32> {
        &self.machines
    }

    pub fn weights(&self) -> &BTreeMap<WeightClass, u32> {
        &self.weights
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn enroll(&mut self, member: Member) -> Result<(), GymError> {
        if self.members.contains_key(&member.id()) {
            return Err(GymError::DuplicateMember(member.id()));
        }
        if self.members.len() >= self.capacity {
            return Err(GymError::Full {
                capacity: self.capacity,
            });
        }
        self.members.insert(member.id(), member);
        Ok(())
    }

    /// Enroll a member whose routine is drawn from the current equipment.
    pub fn add_member(
        &mut self,
        id: MemberId,
        planner: &mut RoutinePlanner,
    ) -> Result<(), GymError> {
        let member = planner.member(id, &self.machines, &self.weights);
        self.enroll(member)
    }

    /// Enroll members with the smallest unused ids until the gym is full.
    /// Returns how many were added.
    pub fn fill_members(&mut self, planner: &mut RoutinePlanner) -> usize {
        let mut added = 0;
        let mut next_id: MemberId = 1;
        while self.members.len() < self.capacity {
            while self.members.contains_key(&next_id) {
                next_id += 1;
            }
            let member = planner.member(next_id, &self.machines, &self.weights);
            self.members.insert(next_id, member);
            added += 1;
        }
        added
    }

    /// Open the doors: one thread per member plus a supervisor, all at once.
    ///
    /// Returns once the supervisor sees every member finish. If it reports a
    /// stall instead, the facility is closed so blocked members give up, and
    /// the report lists them. Without a stall timeout, a member whose exercise
    /// exceeds the gym's equipment blocks this call forever.
    pub fn open_for_the_day(
        self,
        options: OpenOptions,
        sink: Arc<dyn EventSink>,
    ) -> Result<DayReport, GymError> {
        let ledger = ResourceLedger::new(self.machines, self.weights);
        let facility = Arc::new(Facility::new(ledger, Arc::clone(&sink)));
        let tracker = Arc::new(CompletionTracker::new());
        for &id in self.members.keys() {
            tracker.register(id);
        }
        info!(members = self.members.len(), "gym open for the day");

        let mut handles = Vec::with_capacity(self.members.len());
        for (id, member) in self.members {
            let member_facility = Arc::clone(&facility);
            let member_tracker = Arc::clone(&tracker);
            let member_sink = Arc::clone(&sink);
            let name = format!("member-{id}");
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    run_member(
                        &member,
                        &member_facility,
                        &member_tracker,
                        member_sink.as_ref(),
                        options,
                    )
                })
                .map_err(|source| GymError::Spawn { name, source });
            match handle {
                Ok(handle) => handles.push((id, handle)),
                Err(err) => {
                    // Members already running must not be left blocked.
                    facility.close();
                    return Err(err);
                }
            }
        }

        let supervisor = Supervisor::new(
            Arc::clone(&tracker),
            Arc::clone(&sink),
            options.poll_interval,
            options.stall_timeout,
        );
        let staff = match thread::Builder::new()
            .name("gym-staff".to_string())
            .spawn(move || supervisor.watch())
        {
            Ok(staff) => staff,
            Err(source) => {
                facility.close();
                return Err(GymError::Spawn {
                    name: "gym-staff".to_string(),
                    source,
                });
            }
        };
        let report = staff.join().map_err(|_| GymError::SupervisorPanicked)?;

        let outcome = match report.outcome {
            SupervisorOutcome::Completed => DayOutcome::Completed,
            SupervisorOutcome::Stalled { running } => {
                facility.close();
                DayOutcome::Stalled { blocked: running }
            }
        };

        let mut members = BTreeMap::new();
        for (id, handle) in handles {
            let outcome = handle
                .join()
                .unwrap_or_else(|payload| MemberOutcome::Failed(panic_message(payload.as_ref())));
            members.insert(id, outcome);
        }

        Ok(DayReport {
            outcome,
            members,
            progress: report.progress,
            capacity: facility.capacity(),
            final_availability: facility.availability(),
        })
    }
}

/// Runs one member's routine; a panic is contained to this member.
fn run_member(
    member: &Member,
    facility: &Facility,
    tracker: &CompletionTracker,
    sink: &dyn EventSink,
    options: OpenOptions,
) -> MemberOutcome {
    let _finished = FinishGuard::new(tracker, member.id());
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        member.perform_routine(facility, tracker, options.acquire_timeout)
    }));
    match result {
        Ok(summary) => {
            sink.emit(GymEvent::RoutineFinished {
                member: member.id(),
                completed: summary.completed,
                abandoned: summary.abandoned,
            });
            MemberOutcome::Finished(summary)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(member = member.id(), %message, "exception during member's routine");
            sink.emit(GymEvent::RoutineFailed {
                member: member.id(),
                message: message.clone(),
            });
            MemberOutcome::Failed(message)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
