//! Random exercise generation for member routines.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::member::Member;
use crate::types::{Exercise, MachineKind, MemberId, WeightClass};

/// Draws exercises against the gym's catalogues.
pub struct RoutinePlanner {
    rng: StdRng,
    duration_ms: RangeInclusive<u64>,
    exercises_per_member: usize,
}

impl RoutinePlanner {
    /// A planner seeded for reproducible routines, or from entropy when `seed`
    /// is `None`.
    pub fn new(
        seed: Option<u64>,
        duration_ms: RangeInclusive<u64>,
        exercises_per_member: usize,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            duration_ms,
            exercises_per_member,
        }
    }

    /// One exercise on a machine the gym owns at least one of, or `None` if it
    /// owns no machines at all.
    ///
    /// Each plate class with capacity `c` asks for half of a draw from
    /// `[0, c)`, rounded up, so demand never exceeds capacity.
    pub fn exercise(
        &mut self,
        machines: &BTreeMap<MachineKind, u32>,
        weights: &BTreeMap<WeightClass, u32>,
    ) -> Option<Exercise> {
        let stocked: Vec<MachineKind> = machines
            .iter()
            .filter(|&(_, &count)| count > 0)
            .map(|(&kind, _)| kind)
            .collect();
        let machine = *stocked.choose(&mut self.rng)?;
        let bundle: Vec<(WeightClass, u32)> = WeightClass::ALL
            .iter()
            .map(|&class| {
                let capacity = weights.get(&class).copied().unwrap_or(0);
                if capacity == 0 {
                    return (class, 0);
                }
                let draw = self.rng.gen_range(0..capacity);
                (class, draw.div_ceil(2))
            })
            .collect();
        let duration = Duration::from_millis(self.rng.gen_range(self.duration_ms.clone()));
        Some(Exercise::new(machine, bundle, duration))
    }

    /// A member with a freshly drawn routine.
    pub fn member(
        &mut self,
        id: MemberId,
        machines: &BTreeMap<MachineKind, u32>,
        weights: &BTreeMap<WeightClass, u32>,
    ) -> Member {
        let exercises = (0..self.exercises_per_member)
            .filter_map(|_| self.exercise(machines, weights))
            .collect();
        Member::new(id, exercises)
    }
}
