//! Available counts for machines and weight plates.
//!
//! The ledger is plain data: it has no lock of its own and is only mutated
//! through [`crate::facility::Facility`] while the facility mutex is held.

use std::collections::BTreeMap;

use crate::types::{Availability, Exercise, MachineKind, WeightClass};

/// Exactly what one successful acquire took from the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grant {
    pub machine: MachineKind,
    /// Non-zero plate counts only.
    pub weights: BTreeMap<WeightClass, u32>,
}

#[derive(Clone, Debug)]
pub struct ResourceLedger {
    capacity: Availability,
    available: Availability,
}

impl ResourceLedger {
    /// Every kind of both catalogues is tracked; kinds not listed start at zero.
    pub fn new(
        machines: impl IntoIterator<Item = (MachineKind, u32)>,
        weights: impl IntoIterator<Item = (WeightClass, u32)>,
    ) -> Self {
        let mut capacity = Availability {
            machines: MachineKind::ALL.iter().map(|&kind| (kind, 0)).collect(),
            weights: WeightClass::ALL.iter().map(|&class| (class, 0)).collect(),
        };
        for (kind, count) in machines {
            *capacity.machines.entry(kind).or_insert(0) += count;
        }
        for (class, count) in weights {
            *capacity.weights.entry(class).or_insert(0) += count;
        }
        Self {
            available: capacity.clone(),
            capacity,
        }
    }

    /// Whether the exercise could be granted right now.
    pub fn can_satisfy(&self, exercise: &Exercise) -> bool {
        self.available.machine(exercise.machine()) >= 1
            && exercise
                .weights()
                .iter()
                .all(|(&class, &needed)| self.available.plates(class) >= needed)
    }

    /// Whether the exercise asks for more than the gym owns in total, so it
    /// can never be granted.
    pub fn exceeds_capacity(&self, exercise: &Exercise) -> bool {
        self.capacity.machine(exercise.machine()) == 0
            || exercise
                .weights()
                .iter()
                .any(|(&class, &needed)| self.capacity.plates(class) < needed)
    }

    /// Decrement everything the exercise needs in one step.
    ///
    /// # Panics
    ///
    /// Panics if any counter would drop below zero. Callers check
    /// [`Self::can_satisfy`] under the same lock first.
    pub fn take(&mut self, exercise: &Exercise) -> Grant {
        assert!(
            self.can_satisfy(exercise),
            "ledger underflow: {exercise} against {}",
            self.available
        );
        let machine = exercise.machine();
        if let Some(count) = self.available.machines.get_mut(&machine) {
            *count -= 1;
        }
        let mut weights = BTreeMap::new();
        for (&class, &needed) in exercise.weights() {
            if needed == 0 {
                continue;
            }
            if let Some(count) = self.available.weights.get_mut(&class) {
                *count -= needed;
            }
            weights.insert(class, needed);
        }
        Grant { machine, weights }
    }

    /// Return a grant's machine and plates in one step.
    ///
    /// # Panics
    ///
    /// Panics if any counter would exceed its capacity.
    pub fn restore(&mut self, grant: &Grant) {
        let machine_after = self.available.machine(grant.machine) + 1;
        assert!(
            machine_after <= self.capacity.machine(grant.machine),
            "ledger overflow: {} above capacity",
            grant.machine
        );
        for (&class, &amount) in &grant.weights {
            assert!(
                self.available.plates(class) + amount <= self.capacity.plates(class),
                "ledger overflow: {class} plates above capacity"
            );
        }
        self.available.machines.insert(grant.machine, machine_after);
        for (&class, &amount) in &grant.weights {
            *self.available.weights.entry(class).or_insert(0) += amount;
        }
    }

    pub fn available(&self) -> &Availability {
        &self.available
    }

    pub fn capacity(&self) -> &Availability {
        &self.capacity
    }

    /// True when every counter is back at its capacity.
    pub fn is_restored(&self) -> bool {
        self.available == self.capacity
    }
}
