//! Shared identifiers and the equipment/exercise model used across the gym.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Unique identifier for a gym member thread.
pub type MemberId = u64;

/// Gym machines; each exercise occupies exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    LegPress,
    Barbell,
    SquatMachine,
    LegExtension,
    LegCurl,
    LatPulldown,
    PecDeck,
    CableCrossover,
}

impl MachineKind {
    pub const ALL: [MachineKind; 8] = [
        MachineKind::LegPress,
        MachineKind::Barbell,
        MachineKind::SquatMachine,
        MachineKind::LegExtension,
        MachineKind::LegCurl,
        MachineKind::LatPulldown,
        MachineKind::PecDeck,
        MachineKind::CableCrossover,
    ];

    /// Human-readable machine name for reports.
    pub fn display_name(self) -> &'static str {
        match self {
            MachineKind::LegPress => "Leg Press",
            MachineKind::Barbell => "Bar Bells",
            MachineKind::SquatMachine => "Squat Machine",
            MachineKind::LegExtension => "Leg Extensions",
            MachineKind::LegCurl => "Leg Curls",
            MachineKind::LatPulldown => "Lat Pull Downs",
            MachineKind::PecDeck => "Pec Deck Machine",
            MachineKind::CableCrossover => "Cable Crossovers",
        }
    }
}

impl fmt::Display for MachineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Weight plate classes; an exercise borrows a bundle across all of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightClass {
    Small,
    Medium,
    Large,
}

impl WeightClass {
    pub const ALL: [WeightClass; 3] = [WeightClass::Small, WeightClass::Medium, WeightClass::Large];

    /// Plate weight in pounds.
    pub fn pounds(self) -> u32 {
        match self {
            WeightClass::Small => 5,
            WeightClass::Medium => 10,
            WeightClass::Large => 25,
        }
    }
}

impl fmt::Display for WeightClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} lbs", self.pounds())
    }
}

/// One unit of work: a machine, a plate bundle, and how long it is held.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exercise {
    machine: MachineKind,
    weights: BTreeMap<WeightClass, u32>,
    duration: Duration,
}

impl Exercise {
    /// Build an exercise; weight classes missing from `weights` need zero plates.
    pub fn new(
        machine: MachineKind,
        weights: impl IntoIterator<Item = (WeightClass, u32)>,
        duration: Duration,
    ) -> Self {
        let mut bundle: BTreeMap<WeightClass, u32> =
            WeightClass::ALL.iter().map(|&class| (class, 0)).collect();
        for (class, amount) in weights {
            bundle.insert(class, amount);
        }
        Self {
            machine,
            weights: bundle,
            duration,
        }
    }

    pub fn machine(&self) -> MachineKind {
        self.machine
    }

    /// Plates required per class, zero entries included.
    pub fn weights(&self) -> &BTreeMap<WeightClass, u32> {
        &self.weights
    }

    pub fn plates(&self, class: WeightClass) -> u32 {
        self.weights.get(&class).copied().unwrap_or(0)
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Total load across the bundle in pounds.
    pub fn total_pounds(&self) -> u64 {
        self.weights
            .iter()
            .map(|(class, &amount)| u64::from(class.pounds()) * u64::from(amount))
            .sum()
    }
}

impl fmt::Display for Exercise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} with {} lbs of plates ({} x 5, {} x 10, {} x 25) for {}ms",
            self.machine,
            self.total_pounds(),
            self.plates(WeightClass::Small),
            self.plates(WeightClass::Medium),
            self.plates(WeightClass::Large),
            self.duration.as_millis()
        )
    }
}

/// Point-in-time counts for both catalogues.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Availability {
    pub machines: BTreeMap<MachineKind, u32>,
    pub weights: BTreeMap<WeightClass, u32>,
}

impl Availability {
    pub fn machine(&self, kind: MachineKind) -> u32 {
        self.machines.get(&kind).copied().unwrap_or(0)
    }

    pub fn plates(&self, class: WeightClass) -> u32 {
        self.weights.get(&class).copied().unwrap_or(0)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let machines: Vec<String> = self
            .machines
            .iter()
            .map(|(kind, count)| format!("{kind}={count}"))
            .collect();
        let weights: Vec<String> = self
            .weights
            .iter()
            .map(|(class, count)| format!("{class}={count}"))
            .collect();
        write!(
            f,
            "machines[{}] plates[{}]",
            machines.join(", "),
            weights.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_weight_classes_default_to_zero() {
        let exercise = Exercise::new(
            MachineKind::Barbell,
            [(WeightClass::Large, 2)],
            Duration::from_millis(10),
        );
        assert_eq!(exercise.plates(WeightClass::Small), 0);
        assert_eq!(exercise.plates(WeightClass::Medium), 0);
        assert_eq!(exercise.plates(WeightClass::Large), 2);
        assert_eq!(exercise.weights().len(), WeightClass::ALL.len());
    }

    #[test]
    fn display_reports_total_load() {
        let exercise = Exercise::new(
            MachineKind::LegCurl,
            [(WeightClass::Small, 1), (WeightClass::Medium, 2), (WeightClass::Large, 3)],
            Duration::from_millis(1500),
        );
        assert_eq!(exercise.total_pounds(), 5 + 20 + 75);
        let text = exercise.to_string();
        assert!(text.starts_with("Leg Curls with 100 lbs"));
        assert!(text.ends_with("for 1500ms"));
    }

    #[test]
    fn total_load_beyond_u32_is_reported_exactly() {
        let exercise = Exercise::new(
            MachineKind::Barbell,
            [(WeightClass::Large, 200_000_000)],
            Duration::ZERO,
        );
        assert_eq!(exercise.total_pounds(), 5_000_000_000);
        assert!(exercise
            .to_string()
            .starts_with("Bar Bells with 5000000000 lbs of plates"));
    }
}
