//! Error types for configuration, the gym roster, and facility waits.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::MemberId;

/// An acquire that ended without taking anything from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    #[error("facility closed while waiting")]
    Closed,

    #[error("gave up after waiting {}ms", waited.as_millis())]
    TimedOut { waited: Duration },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum GymError {
    #[error("member id already enrolled: {0}")]
    DuplicateMember(MemberId),

    #[error("the gym is full ({capacity} members)")]
    Full { capacity: usize },

    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("supervisor thread panicked")]
    SupervisorPanicked,
}
