//! Observer that reports members still working out until none remain.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::events::{EventSink, GymEvent};
use crate::progress::CompletionTracker;
use crate::types::MemberId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// The running set became empty.
    Completed,
    /// Every remaining member went silent past the stall timeout.
    Stalled { running: BTreeSet<MemberId> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisorReport {
    pub outcome: SupervisorOutcome,
    /// Running-set size at each progress report, first report included.
    pub progress: Vec<usize>,
}

/// Watches a [`CompletionTracker`]; never touches the facility.
pub struct Supervisor {
    tracker: Arc<CompletionTracker>,
    sink: Arc<dyn EventSink>,
    tick: Duration,
    stall_timeout: Option<Duration>,
}

impl Supervisor {
    pub fn new(
        tracker: Arc<CompletionTracker>,
        sink: Arc<dyn EventSink>,
        tick: Duration,
        stall_timeout: Option<Duration>,
    ) -> Self {
        Self {
            tracker,
            sink,
            tick,
            stall_timeout,
        }
    }

    fn report(&self, running: &BTreeSet<MemberId>, progress: &mut Vec<usize>) {
        progress.push(running.len());
        self.sink.emit(GymEvent::Progress {
            running: running.iter().copied().collect(),
        });
    }

    /// Block until every member has finished, or until the run stalls.
    pub fn watch(&self) -> SupervisorReport {
        let mut progress = Vec::new();
        let mut running = self.tracker.running();
        self.report(&running, &mut progress);

        loop {
            if running.is_empty() {
                self.sink.emit(GymEvent::AllDone);
                return SupervisorReport {
                    outcome: SupervisorOutcome::Completed,
                    progress,
                };
            }

            let next = self.tracker.wait_for_change(running.len(), self.tick);
            if next.len() < running.len() {
                running = next;
                self.report(&running, &mut progress);
                continue;
            }
            running = next;
            self.sink.emit(GymEvent::StillRunning {
                running: running.iter().copied().collect(),
            });

            if let Some(stall_timeout) = self.stall_timeout {
                let idle = self.tracker.idle_members(stall_timeout);
                if !running.is_empty() && idle == running {
                    self.sink.emit(GymEvent::Stalled {
                        running: running.iter().copied().collect(),
                    });
                    return SupervisorReport {
                        outcome: SupervisorOutcome::Stalled { running },
                        progress,
                    };
                }
            }
        }
    }
}
