//! # Workload Driver Library
//!
//! A benchmark load-generation engine. A workload is described once as a
//! [`Driver`]: a set of named operations, a probabilistic or fixed-sequence
//! mix over them, and a delay distribution for each. The engine then runs one
//! OS thread per virtual user. Each thread repeatedly picks the next
//! operation, waits until its scheduled time, invokes it, and hands the timing
//! to a metrics sink, tagged with the run phase it fell in.
//!
//! ## Run Control
//!
//! Two run policies share one thread loop:
//!
//! - **Cycle mode**: ramp-up, steady state and ramp-down are counted in
//!   completed cycles per thread
//! - **Time mode**: the phases are wall-clock intervals measured from a
//!   coordinated start time, optionally with a variable thread count and a
//!   background mix interleaved with the foreground mix
//!
//! ## Architecture Overview
//!
//! - `driver`: Validated workload definitions and handler binding
//! - `cycle`, `mix`, `operation`: Delay distributions, mixes and operation descriptors
//! - `timing`, `context`: Per-invocation timing and the handle operations see
//! - `scheduler`: The thread loop and the two run policies
//! - `coordination`: Start-time signal, global abort and variable load
//! - `metrics`: Metrics sink contract and the HDR histogram default sink
//! - `benchmark`: Spawning, starting and joining a run
//! - `cli`, `logging`, `utils`: Command-line front end, log output and helpers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use workload_driver::{BenchmarkRunner, Cycle, DriverBuilder, OperationSpec, RunControl};
//!
//! fn main() -> anyhow::Result<()> {
//!     let driver = DriverBuilder::new("EchoDriver", |_thread_id| Ok(()))
//!         .percentiles(&["90th", "99th"])
//!         .default_cycle(Cycle::fixed(Duration::from_millis(20)))
//!         .operation(
//!             OperationSpec::new("Echo").percentile_limits(vec![0.05, 0.1]),
//!             |_, _ctx| Ok(()),
//!         )
//!         .flat_mix(&[("Echo", 1.0)])
//!         .build()?;
//!
//!     let control = RunControl::time(
//!         Duration::from_secs(5),
//!         Duration::from_secs(30),
//!         Duration::from_secs(5),
//!     )
//!     .threads(8)
//!     .simultaneous_start(true);
//!
//!     let report = BenchmarkRunner::new(Arc::new(driver), control)?
//!         .run()?
//!         .into_result()?;
//!     println!("Steady state transactions: {}", report.steady_state_tx());
//!     Ok(())
//! }
//! ```

/// Run orchestration
///
/// Contains `RunControl`, `BenchmarkRunner` and `RunReport`. The runner:
/// - Spawns one named thread per virtual user, optionally pinned to a core
/// - Waits on a countdown latch until every thread has initialized
/// - Fixes and signals the start time
/// - Joins the threads and collects their metrics and errors
pub mod benchmark;

/// Command-line interface and configuration
///
/// Provides argument parsing using clap. Includes:
/// - Duration parsing with human-readable formats (e.g., "10s", "5m")
/// - Variable-load schedule parsing (e.g., "10s:4,20s:8")
/// - Demo workload parameters for the bundled binary
pub mod cli;

/// Execution context handed to operation handlers
///
/// Exposes thread and operation identity, manual timing calls and the
/// steady-state query.
pub mod context;

/// Run-wide coordination primitives
///
/// The one-shot start-time signal, the global abort signal with its first cause,
/// abort-cancellable waits, and the variable-load schedule.
pub mod coordination;

/// Delay distributions
///
/// Fixed, uniform and truncated negative exponential delays, measured as cycle
/// time or think time.
pub mod cycle;

/// Driver definitions
///
/// `DriverBuilder` validates a workload definition and binds every operation
/// to its handler. The resulting `Driver` is immutable and shared by all threads.
pub mod driver;

/// Error taxonomy
///
/// Definition errors, the fatal marker cause, cancelled waits and run-level errors.
pub mod error;

/// Log output formatting and subscriber setup
pub mod logging;

/// Metrics collection
///
/// The `MetricsSink` contract and `ThreadMetrics`, a per-thread sink using HDR
/// histograms with per-phase counts and SLA compliance checks.
pub mod metrics;

/// Operation mixes and per-thread selectors
pub mod mix;

/// Operation descriptors, percentiles and time units
pub mod operation;

/// The per-thread scheduling loop and run policies
///
/// `AgentThread` drives one virtual user. `CyclePolicy` and `TimePolicy` decide
/// when it stops and which phase each invocation belongs to.
pub mod scheduler;

/// Monotonic clock and per-invocation timing records
pub mod timing;

pub mod utils;

// Re-export key types for convenient library usage

/// Run orchestration types
pub use benchmark::{BenchmarkRunner, RunControl, RunMode, RunReport};

/// Definition types
pub use context::DriverContext;
pub use cycle::{Cycle, CycleSpec, CycleType};
pub use driver::{Driver, DriverBuilder};
pub use operation::{OperationSpec, TimeUnit, Timing};

/// Error types
pub use error::{DefinitionError, DriverError, FatalError, RunAborted};

/// Metrics types
pub use metrics::{MetricsSink, ThreadMetrics};

/// The current version of the workload driver
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// These values seed the command-line defaults. Phase lengths are strings
/// because they are read as cycle counts or durations depending on the run mode.
pub mod defaults {
    /// Default ramp-up length
    pub const RAMP_UP: &str = "10";

    /// Default steady state length
    ///
    /// 60 cycles or 60 seconds, depending on the run mode
    pub const STEADY_STATE: &str = "60";

    /// Default ramp-down length
    pub const RAMP_DOWN: &str = "5";

    /// Default scale factor
    pub const SCALE: u32 = 1;

    /// Default delay between all threads being ready and the start time
    pub const START_DELAY: &str = "0s";

    /// Default mean think time of the demo workload
    pub const THINK_TIME: &str = "50ms";

    /// Default service time of the demo workload
    pub const SERVICE_TIME: &str = "5ms";
}
