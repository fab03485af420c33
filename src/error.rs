//! Error types shared by the memory model, the tick pipeline and the
//! sector streaming tasks.

use thiserror::Error;

/// Errors surfaced by the physics core.
///
/// Range-table violations are not represented here: they are contract
/// violations and are only checked with debug assertions.
#[derive(Error, Debug)]
pub enum PhysicsError {
    /// A device buffer could not grow to the requested element capacity.
    #[error("device allocation failed for `{label}`: {requested} elements")]
    DeviceAllocation {
        /// Column label of the buffer that failed to grow.
        label: &'static str,
        /// Element capacity that was requested.
        requested: usize,
    },

    /// A configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// A configuration value is outside of its accepted range.
    #[error("invalid configuration value `{field}`: {reason}")]
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Reading a configuration file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task observed shutdown while blocked.
    #[error("interrupted by shutdown")]
    Interrupted,

    /// The other side of a hand-off channel is gone.
    #[error("hand-off channel `{0}` disconnected")]
    Disconnected(&'static str),

    /// A background task thread could not be spawned.
    #[error("failed to spawn task `{name}`: {source}")]
    TaskSpawn {
        /// Thread name of the task.
        name: &'static str,
        /// Underlying spawn error.
        source: std::io::Error,
    },

    /// A background task panicked before it could report its result.
    #[error("task `{0}` panicked")]
    TaskPanicked(&'static str),
}

impl PhysicsError {
    /// True for the only recoverable failure: a clean shutdown interruption.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, PhysicsError::Interrupted)
    }
}

/// Convenience alias used across the crate.
pub type PhysicsResult<T> = Result<T, PhysicsError>;
