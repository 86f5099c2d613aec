//! Structured events emitted by the facility, members, and supervisor.
//!
//! The core never prints. Everything observable goes through an [`EventSink`];
//! the CLI installs [`TracingSink`] to turn events into log lines.

use tracing::{debug, info, warn};

use crate::error::AcquireError;
use crate::types::{Availability, Exercise, MachineKind, MemberId};

#[derive(Clone, Debug, PartialEq)]
pub enum GymEvent {
    /// A member found its exercise unavailable and started waiting.
    Waiting {
        member: MemberId,
        exercise: Exercise,
        exceeds_capacity: bool,
    },
    Acquired {
        member: MemberId,
        exercise: Exercise,
        available: Availability,
    },
    Released {
        member: MemberId,
        machine: MachineKind,
        available: Availability,
    },
    /// An acquire ended without a grant; nothing was taken.
    Abandoned {
        member: MemberId,
        exercise: Exercise,
        reason: AcquireError,
    },
    RoutineFinished {
        member: MemberId,
        completed: usize,
        abandoned: usize,
    },
    RoutineFailed {
        member: MemberId,
        message: String,
    },
    /// The set of members still working out shrank.
    Progress { running: Vec<MemberId> },
    /// Tick with no change: the same members are still working out.
    StillRunning { running: Vec<MemberId> },
    /// Every running member has been silent past the stall timeout.
    Stalled { running: Vec<MemberId> },
    AllDone,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: GymEvent);
}

/// Renders events as structured `tracing` records.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: GymEvent) {
        match event {
            GymEvent::Waiting {
                member,
                exercise,
                exceeds_capacity,
            } => {
                if exceeds_capacity {
                    warn!(
                        member,
                        %exercise,
                        "waiting for equipment the gym does not own enough of"
                    );
                } else {
                    info!(member, %exercise, "waiting");
                }
            }
            GymEvent::Acquired {
                member,
                exercise,
                available,
            } => {
                info!(member, %exercise, "performing exercise");
                debug!(member, %available, "availability after acquire");
            }
            GymEvent::Released {
                member,
                machine,
                available,
            } => {
                info!(member, %machine, "finished exercise");
                debug!(member, %available, "availability after release");
            }
            GymEvent::Abandoned {
                member,
                exercise,
                reason,
            } => warn!(member, %exercise, %reason, "exercise abandoned"),
            GymEvent::RoutineFinished {
                member,
                completed,
                abandoned,
            } => info!(member, completed, abandoned, "routine finished"),
            GymEvent::RoutineFailed { member, message } => {
                warn!(member, %message, "routine failed")
            }
            GymEvent::Progress { running } => info!(
                count = running.len(),
                ?running,
                "people still working out"
            ),
            GymEvent::StillRunning { running } => info!(
                count = running.len(),
                ?running,
                "people still working out"
            ),
            GymEvent::Stalled { running } => warn!(
                count = running.len(),
                ?running,
                "members stuck waiting; no progress possible"
            ),
            GymEvent::AllDone => info!("all members have completed"),
        }
    }
}

/// Discards everything; used where per-exercise logging would swamp timings.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: GymEvent) {}
}
