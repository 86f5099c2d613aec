//! Benchmark and stress-test runners for the facility monitor.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::events::NullSink;
use crate::facility::Facility;
use crate::ledger::ResourceLedger;
use crate::member::Member;
use crate::routine::RoutinePlanner;
use crate::types::{Availability, MachineKind, WeightClass};

const BENCH_MACHINES: [MachineKind; 3] = [
    MachineKind::Barbell,
    MachineKind::LegCurl,
    MachineKind::SquatMachine,
];
const BENCH_PLATES_PER_CLASS: u32 = 100;
const BENCH_SEED: u64 = 2024;
// Sampling interval for the validation watcher.
const VALIDATE_POLL_US: u64 = 200;

pub const CSV_HEADER: &str = "members,exercises_per_member,machines_per_kind,total_exercises,elapsed_ms,throughput_ex_per_s,avg_acquire_wait_us,uncontended,cpu_user_s,cpu_sys_s,max_holders,capacity_violation,restored";

/// User and system CPU seconds this process has used so far, from `getrusage`.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    // SAFETY: rusage is plain old data; getrusage only writes into it.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let seconds = |tv: libc::timeval| tv.tv_sec as f64 + (tv.tv_usec as f64 / 1_000_000.0);
    Some((seconds(usage.ru_utime), seconds(usage.ru_stime)))
}

/// No `getrusage` here, so the CPU columns print `NA`.
#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// Concurrent-holder counters kept outside the facility lock.
struct HoldMetrics {
    holders: AtomicUsize,
    max_holders: AtomicUsize,
}

impl HoldMetrics {
    fn new() -> Self {
        Self {
            holders: AtomicUsize::new(0),
            max_holders: AtomicUsize::new(0),
        }
    }

    fn enter(&self) {
        let current = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_holders.fetch_max(current, Ordering::SeqCst);
    }

    fn exit(&self) {
        let prev = self.holders.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "holder counter underflow");
    }

    fn max_holders(&self) -> usize {
        self.max_holders.load(Ordering::SeqCst)
    }
}

fn exceeds(available: &Availability, capacity: &Availability) -> bool {
    available
        .machines
        .iter()
        .any(|(kind, &count)| count > capacity.machine(*kind))
        || available
            .weights
            .iter()
            .any(|(class, &count)| count > capacity.plates(*class))
}

/// Samples availability until told to stop, flagging any count above capacity.
fn spawn_validator(
    facility: Arc<Facility>,
    stop_flag: Arc<AtomicBool>,
    violation: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let capacity = facility.capacity();
        while !stop_flag.load(Ordering::SeqCst) {
            if exceeds(&facility.availability(), &capacity) {
                violation.store(true, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_micros(VALIDATE_POLL_US));
        }
    })
}

/// One CSV row: how fast the roster got through its exercises and whether
/// the facility stayed within its equipment.
#[derive(Clone, Debug)]
pub struct BenchResult {
    pub members: usize,
    pub exercises_per_member: usize,
    pub machines_per_kind: u32,
    pub total_exercises: usize,
    pub elapsed_ms: f64,
    pub throughput: f64,
    pub avg_acquire_wait_us: f64,
    /// Acquisitions that succeeded without waiting.
    pub uncontended: usize,
    pub cpu_user_s: Option<f64>,
    pub cpu_sys_s: Option<f64>,
    pub max_holders: usize,
    pub capacity_violation: bool,
    pub restored: bool,
}

impl BenchResult {
    pub fn csv_row(&self) -> String {
        let cpu_user = self
            .cpu_user_s
            .map(|v| format!("{v:.4}"))
            .unwrap_or_else(|| "NA".to_string());
        let cpu_sys = self
            .cpu_sys_s
            .map(|v| format!("{v:.4}"))
            .unwrap_or_else(|| "NA".to_string());
        format!(
            "{},{},{},{},{:.2},{:.2},{:.2},{},{},{},{},{},{}",
            self.members,
            self.exercises_per_member,
            self.machines_per_kind,
            self.total_exercises,
            self.elapsed_ms,
            self.throughput,
            self.avg_acquire_wait_us,
            self.uncontended,
            cpu_user,
            cpu_sys,
            self.max_holders,
            self.capacity_violation,
            self.restored
        )
    }
}

/// Run `members` threads with `exercises_per_member` fixed-length exercises
/// each against a gym with `machines_per_kind` of each bench machine.
pub fn benchmark_once(
    members: usize,
    exercises_per_member: usize,
    machines_per_kind: u32,
    work_ms: u64,
    validate: bool,
) -> BenchResult {
    debug_assert!(members > 0, "members must be > 0");
    debug_assert!(exercises_per_member > 0, "exercises_per_member must be > 0");
    debug_assert!(machines_per_kind > 0, "machines_per_kind must be > 0");

    let machines: BTreeMap<MachineKind, u32> = BENCH_MACHINES
        .iter()
        .map(|&kind| (kind, machines_per_kind))
        .collect();
    let weights: BTreeMap<WeightClass, u32> = WeightClass::ALL
        .iter()
        .map(|&class| (class, BENCH_PLATES_PER_CLASS))
        .collect();
    let mut planner =
        RoutinePlanner::new(Some(BENCH_SEED), work_ms..=work_ms, exercises_per_member);
    let roster: Vec<Member> = (0..members as u64)
        .map(|id| planner.member(id, &machines, &weights))
        .collect();
    let total_exercises: usize = roster.iter().map(|member| member.exercises().len()).sum();

    let facility = Arc::new(Facility::new(
        ResourceLedger::new(machines, weights),
        Arc::new(NullSink),
    ));
    // Total wait time across all acquisitions for averaging.
    let wait_us = Arc::new(AtomicU64::new(0));
    let uncontended = Arc::new(AtomicUsize::new(0));
    let metrics = Arc::new(HoldMetrics::new());
    let violation = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::new(AtomicBool::new(false));
    let validator = validate.then(|| {
        spawn_validator(
            Arc::clone(&facility),
            Arc::clone(&stop_flag),
            Arc::clone(&violation),
        )
    });

    let cpu_start = cpu_times_seconds();
    let start = Instant::now();
    let mut handles = Vec::with_capacity(members);
    for member in roster {
        let facility = Arc::clone(&facility);
        let wait_us = Arc::clone(&wait_us);
        let uncontended = Arc::clone(&uncontended);
        let metrics = Arc::clone(&metrics);
        handles.push(thread::spawn(move || {
            for exercise in member.exercises() {
                let wait_start = Instant::now();
                let handle = match facility.try_acquire(member.id(), exercise) {
                    Some(handle) => {
                        uncontended.fetch_add(1, Ordering::SeqCst);
                        handle
                    }
                    None => match facility.acquire(member.id(), exercise) {
                        Ok(handle) => handle,
                        Err(_) => return,
                    },
                };
                wait_us.fetch_add(wait_start.elapsed().as_micros() as u64, Ordering::SeqCst);
                metrics.enter();
                if !exercise.duration().is_zero() {
                    thread::sleep(exercise.duration());
                }
                metrics.exit();
                facility.release(handle);
            }
        }));
    }

    for handle in handles {
        if handle.join().is_err() {
            warn!("benchmark member thread panicked");
        }
    }
    let elapsed_ms = start.elapsed().as_millis() as f64;
    stop_flag.store(true, Ordering::SeqCst);
    if let Some(validator) = validator {
        if validator.join().is_err() {
            warn!("validator thread panicked");
        }
    }

    let throughput = if elapsed_ms > 0.0 {
        (total_exercises as f64) / (elapsed_ms / 1000.0)
    } else {
        0.0
    };
    let avg_acquire_wait_us = if total_exercises > 0 {
        wait_us.load(Ordering::SeqCst) as f64 / total_exercises as f64
    } else {
        0.0
    };
    let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
            (Some(user_end - user_start), Some(sys_end - sys_start))
        }
        _ => (None, None),
    };
    debug!(members, total_exercises, elapsed_ms, "benchmark run finished");

    BenchResult {
        members,
        exercises_per_member,
        machines_per_kind,
        total_exercises,
        elapsed_ms,
        throughput,
        avg_acquire_wait_us,
        uncontended: uncontended.load(Ordering::SeqCst),
        cpu_user_s,
        cpu_sys_s,
        max_holders: metrics.max_holders(),
        capacity_violation: violation.load(Ordering::SeqCst),
        restored: facility.is_restored(),
    }
}

fn report(result: &BenchResult, validate: bool) {
    println!("{}", result.csv_row());
    if validate {
        if result.capacity_violation {
            eprintln!("# violation,capacity");
        }
        if !result.restored {
            eprintln!("# violation,not_restored");
        }
    }
}

/// Time one roster shape and print the header plus its row.
pub fn run_benchmark(
    members: usize,
    exercises_per_member: usize,
    machines_per_kind: u32,
    work_ms: u64,
    validate: bool,
) {
    let result = benchmark_once(
        members,
        exercises_per_member,
        machines_per_kind,
        work_ms,
        validate,
    );
    println!("{CSV_HEADER}");
    report(&result, validate);
}

/// Try every member/exercise/machine count combination, one row each.
pub fn run_stress(
    member_sets: &[usize],
    exercise_sets: &[usize],
    machine_sets: &[u32],
    work_ms: u64,
    validate: bool,
) {
    println!("{CSV_HEADER}");
    for &members in member_sets {
        for &exercises_per_member in exercise_sets {
            for &machines_per_kind in machine_sets {
                let result = benchmark_once(
                    members,
                    exercises_per_member,
                    machines_per_kind,
                    work_ms,
                    validate,
                );
                report(&result, validate);
            }
        }
    }
}
