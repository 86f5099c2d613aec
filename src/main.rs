mod bench;
mod config;
mod error;
mod events;
mod facility;
mod gym;
mod ledger;
mod logging;
mod member;
mod progress;
mod routine;
mod supervisor;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::config::GymConfig;
use crate::events::TracingSink;
use crate::gym::{DayOutcome, Gym, MemberOutcome, OpenOptions};
use crate::routine::RoutinePlanner;

/// Gym floor simulator: members contend for machines and weight plates.
#[derive(Parser)]
#[command(name = "gym_floor", version)]
struct Cli {
    /// TOML file with the day's configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter directives (overrides RUST_LOG).
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Open the gym for one day (default).
    Open(OpenArgs),
    /// Time a single configuration and print one CSV row.
    Bench {
        #[arg(long, default_value_t = 4)]
        members: usize,
        #[arg(long, default_value_t = 25)]
        exercises: usize,
        #[arg(long, default_value_t = 2)]
        machines: u32,
        #[arg(long, default_value_t = 5)]
        work_ms: u64,
        /// Sample availability concurrently and check it against capacity.
        #[arg(long)]
        validate: bool,
    },
    /// Sweep several configurations and print CSV rows.
    Stress {
        #[arg(long, value_delimiter = ',', default_values_t = [1usize, 2, 4, 8, 12])]
        member_sets: Vec<usize>,
        #[arg(long, value_delimiter = ',', default_values_t = [10usize, 25, 50])]
        exercise_sets: Vec<usize>,
        #[arg(long, value_delimiter = ',', default_values_t = [1u32, 2, 4])]
        machine_sets: Vec<u32>,
        #[arg(long, default_value_t = 5)]
        work_ms: u64,
        #[arg(long)]
        validate: bool,
    },
}

/// Command-line overrides for the config file.
#[derive(Args, Default)]
struct OpenArgs {
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    exercises: Option<usize>,
    #[arg(long)]
    min_duration_ms: Option<u64>,
    #[arg(long)]
    max_duration_ms: Option<u64>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// Call the day off once every remaining member has been stuck this long.
    #[arg(long)]
    stall_timeout_ms: Option<u64>,
    /// Skip an exercise that cannot start within this many milliseconds.
    #[arg(long)]
    acquire_timeout_ms: Option<u64>,
    /// Print the equipment and every member's routine before opening.
    #[arg(long)]
    roster: bool,
}

impl OpenArgs {
    fn apply(&self, config: &mut GymConfig) {
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(exercises) = self.exercises {
            config.exercises_per_member = exercises;
        }
        if let Some(ms) = self.min_duration_ms {
            config.min_duration_ms = ms;
        }
        if let Some(ms) = self.max_duration_ms {
            config.max_duration_ms = ms;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(ms) = self.stall_timeout_ms {
            config.stall_timeout_ms = Some(ms);
        }
        if let Some(ms) = self.acquire_timeout_ms {
            config.acquire_timeout_ms = Some(ms);
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<GymConfig> {
    match path {
        Some(path) => GymConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(GymConfig::default()),
    }
}

fn print_roster(gym: &Gym) {
    for (kind, count) in gym.machines() {
        println!("Machine:\t{kind},\tamount:\t{count}");
    }
    for (class, count) in gym.weights() {
        println!("Weight:\t{class},\tamount:\t{count}");
    }
    for member in gym.members() {
        println!("------------------------------");
        println!("Member {} exercises:", member.id());
        for exercise in member.exercises() {
            println!("  {exercise}");
        }
    }
    println!("------------------------------");
}

fn open_day(config: GymConfig, show_roster: bool) -> Result<()> {
    let mut gym = Gym::new(config.capacity);
    for (&kind, &count) in &config.machines {
        gym.add_machine(kind, count);
    }
    for (&class, &count) in &config.weights {
        gym.add_weight(class, count);
    }
    let mut planner = RoutinePlanner::new(
        config.seed,
        config.duration_range(),
        config.exercises_per_member,
    );
    for &id in &config.members {
        gym.add_member(id, &mut planner)
            .with_context(|| format!("enrolling member {id}"))?;
    }
    let filled = gym.fill_members(&mut planner);
    info!(filled, "roster filled");
    if show_roster {
        print_roster(&gym);
    }

    let options = OpenOptions {
        poll_interval: config.poll_interval(),
        stall_timeout: config.stall_timeout(),
        acquire_timeout: config.acquire_timeout(),
    };
    let report = gym.open_for_the_day(options, Arc::new(TracingSink))?;

    let failed: Vec<_> = report
        .members
        .iter()
        .filter(|(_, outcome)| matches!(outcome, MemberOutcome::Failed(_)))
        .map(|(id, _)| *id)
        .collect();
    println!("DAY SUMMARY");
    println!(
        "members={} exercises_completed={}",
        report.members.len(),
        report.exercises_completed()
    );
    match &report.outcome {
        DayOutcome::Completed => {
            println!("outcome=completed");
            println!("blocked_members=[]");
        }
        DayOutcome::Stalled { blocked } => {
            println!("outcome=stalled");
            println!("blocked_members={:?}", blocked.iter().collect::<Vec<_>>());
        }
    }
    println!("failed_members={failed:?}");
    println!("progress={:?}", report.progress);
    println!("restored={}", report.restored());
    println!("final_availability={}", report.final_availability);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log.as_deref());

    match cli.command.unwrap_or(Command::Open(OpenArgs::default())) {
        Command::Open(args) => {
            let mut config = load_config(cli.config.as_ref())?;
            args.apply(&mut config);
            config.validate().context("invalid configuration")?;
            open_day(config, args.roster)
        }
        Command::Bench {
            members,
            exercises,
            machines,
            work_ms,
            validate,
        } => {
            if members == 0 || exercises == 0 || machines == 0 {
                bail!("bench: members, exercises, and machines must be > 0");
            }
            bench::run_benchmark(members, exercises, machines, work_ms, validate);
            Ok(())
        }
        Command::Stress {
            member_sets,
            exercise_sets,
            mut machine_sets,
            work_ms,
            validate,
        } => {
            if member_sets.contains(&0) || exercise_sets.contains(&0) {
                bail!("stress: member and exercise sets must be > 0");
            }
            let before = machine_sets.len();
            machine_sets.retain(|&machines| machines > 0);
            let dropped = before - machine_sets.len();
            if dropped > 0 {
                eprintln!("stress warning: ignored {dropped} machine set(s) <= 0");
            }
            if machine_sets.is_empty() {
                bail!("stress: machines must be > 0");
            }
            bench::run_stress(&member_sets, &exercise_sets, &machine_sets, work_ms, validate);
            Ok(())
        }
    }
}
