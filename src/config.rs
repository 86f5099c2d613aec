//! Day configuration loaded from TOML and overridden from the command line.

use std::collections::BTreeMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::{MachineKind, MemberId, WeightClass};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GymConfig {
    /// Maximum number of enrolled members.
    pub capacity: usize,
    pub machines: BTreeMap<MachineKind, u32>,
    pub weights: BTreeMap<WeightClass, u32>,
    /// Ids enrolled before the roster is filled up to capacity.
    pub members: Vec<MemberId>,
    pub exercises_per_member: usize,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub poll_interval_ms: u64,
    pub stall_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub seed: Option<u64>,
}

impl Default for GymConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            machines: BTreeMap::from([
                (MachineKind::Barbell, 2),
                (MachineKind::LegCurl, 2),
                (MachineKind::SquatMachine, 1),
            ]),
            weights: BTreeMap::from([
                (WeightClass::Small, 100),
                (WeightClass::Medium, 100),
                (WeightClass::Large, 100),
            ]),
            members: vec![1, 2],
            exercises_per_member: 4,
            min_duration_ms: 1000,
            max_duration_ms: 3000,
            poll_interval_ms: 1000,
            stall_timeout_ms: None,
            acquire_timeout_ms: None,
            seed: None,
        }
    }
}

impl GymConfig {
    /// Read and validate a TOML config; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: GymConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exercises_per_member == 0 {
            return Err(ConfigError::InvalidValue {
                field: "exercises_per_member",
                message: "must be > 0".to_string(),
            });
        }
        if self.min_duration_ms > self.max_duration_ms {
            return Err(ConfigError::InvalidValue {
                field: "min_duration_ms",
                message: format!(
                    "{} is above max_duration_ms {}",
                    self.min_duration_ms, self.max_duration_ms
                ),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                message: "must be > 0".to_string(),
            });
        }
        if self.members.len() > self.capacity {
            return Err(ConfigError::InvalidValue {
                field: "members",
                message: format!(
                    "{} ids listed for capacity {}",
                    self.members.len(),
                    self.capacity
                ),
            });
        }
        // A member holding for the longest duration is silent that whole time.
        if let Some(stall) = self.stall_timeout_ms {
            if stall <= self.max_duration_ms {
                return Err(ConfigError::InvalidValue {
                    field: "stall_timeout_ms",
                    message: format!(
                        "{stall} must exceed max_duration_ms {}",
                        self.max_duration_ms
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn duration_range(&self) -> RangeInclusive<u64> {
        self.min_duration_ms..=self.max_duration_ms
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms.map(Duration::from_millis)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}
