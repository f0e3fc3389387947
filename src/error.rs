//! Error types for definition validation and run control.
//!
//! Three classes of failure exist:
//!
//! - [`DefinitionError`]: detected once while a driver definition is built. The run
//!   loop never sees an invalid definition.
//! - Operational failures: any error an operation handler returns that does not
//!   carry a [`FatalError`] in its chain. These are absorbed by the thread loop,
//!   counted, and logged.
//! - [`DriverError`]: run-level failures, including fatal aborts raised by any
//!   thread and failures in the layer that binds handlers to operations.

use thiserror::Error;

/// Result type for definition building.
pub type DefinitionResult<T> = Result<T, DefinitionError>;

/// Errors in a driver, operation, mix or distribution definition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("invalid percentile suffix {suffix} in {label}")]
    PercentileSuffix { label: String, suffix: String },

    #[error("{label} not a number")]
    PercentileNotANumber { label: String },

    #[error("percentile {label} must be greater than 0 and less than 100")]
    PercentileRange { label: String },

    #[error("response time unit must not be nanoseconds")]
    NanosecondResponseUnit,

    #[error("histogram unit must not be nanoseconds")]
    NanosecondHistogramUnit,

    #[error(
        "operation {operation} has {actual} percentile limits, driver declares {expected} percentiles"
    )]
    PercentileLimitCount {
        operation: String,
        expected: usize,
        actual: usize,
    },

    #[error("at least one percentile limit must be specified")]
    NoPercentileLimit,

    #[error("at least one max90th must be specified")]
    NoMax90th,

    #[error("no cycle distribution for operation {operation}")]
    NoCycle { operation: String },

    #[error("operation \"{name}\" listed in mix not found")]
    UnknownOperation { name: String },

    #[error("duplicate operation name {name}")]
    DuplicateOperation { name: String },

    #[error("mix has no operations")]
    EmptyMix,

    #[error("mix weight for {name} is {weight}, weights must be finite and non-negative")]
    InvalidWeight { name: String, weight: f64 },

    #[error("mix weights sum to zero")]
    ZeroWeights,

    #[error("mix lists {operations} operations but {weights} weights")]
    MixLengthMismatch { operations: usize, weights: usize },

    #[error("mix weights rejected: {reason}")]
    WeightedMix { reason: String },

    #[error("no of background ops must match the no of timings, currently {operations} vs {timings}")]
    BackgroundTimings { operations: usize, timings: usize },

    #[error("{field} must not be negative, got {value}")]
    NegativeBound { field: &'static str, value: f64 },

    #[error("{field} must be finite, got {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("uniform cycle min {min} exceeds max {max}")]
    InvertedBounds { min: f64, max: f64 },

    #[error("cycle deviation {value} must be in [0, 100)")]
    Deviation { value: f64 },

    #[error("thread per scale must be positive, got {value}")]
    ThreadPerScale { value: f64 },

    #[error("driver defines no foreground mix")]
    MissingMix,
}

/// Marker cause requesting that the whole run be aborted.
///
/// Handlers return it directly or attach it anywhere in an `anyhow` chain;
/// the scheduler searches the full chain before classifying a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fatal: {message}")]
pub struct FatalError {
    pub message: String,
}

impl FatalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Returned by waits that were cancelled by the global abort signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run aborted while waiting")]
pub struct RunAborted;

/// Run-level errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A thread raised a fatal cause; all threads were stopped.
    #[error("thread {thread_id} aborted the run during {operation}: {cause:#}")]
    Fatal {
        thread_id: usize,
        operation: String,
        cause: anyhow::Error,
    },

    /// The handler binding for an operation could not be used.
    #[error("thread {thread_id}: {message}")]
    Binding { thread_id: usize, message: String },

    /// Driver instance creation or the once-before hook failed.
    #[error("thread {thread_id}: error initializing driver {driver}: {cause:#}")]
    Initialization {
        thread_id: usize,
        driver: String,
        cause: anyhow::Error,
    },

    #[error("failed to spawn driver thread {thread_id}: {source}")]
    Spawn {
        thread_id: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("driver thread {thread_id} panicked")]
    Panicked { thread_id: usize },

    #[error("invalid run control: {0}")]
    RunControl(String),
}

/// Locate a [`FatalError`] anywhere in an error's cause chain.
pub fn fatal_cause(err: &anyhow::Error) -> Option<&FatalError> {
    err.chain().find_map(|cause| cause.downcast_ref::<FatalError>())
}

/// Whether an error's cause chain contains a cancelled wait.
pub fn is_run_aborted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<RunAborted>())
}
