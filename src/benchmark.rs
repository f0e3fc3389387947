//! # Benchmark Run Orchestration
//!
//! This module drives one complete run of a [`Driver`]: it spawns one OS thread
//! per virtual user, coordinates their start, and collects the per-thread
//! metrics sinks once every thread has finished.
//!
//! ## Key Components
//!
//! - **RunControl**: How long the run lasts (cycles or wall-clock time), how many
//!   threads run, and how they start
//! - **BenchmarkRunner**: Spawns and joins the driver threads
//! - **RunReport**: Per-thread results and the abort cause, if any
//!
//! ## Run Lifecycle
//!
//! 1. **Initialization**: Every thread creates its driver instance and metrics
//!    sink. Thread 0 also runs the once-before hook.
//! 2. **Latch**: The coordinator waits until every thread has initialized.
//! 3. **Start**: The start time is fixed at now plus the start delay and signalled
//!    to all threads.
//! 4. **Run**: Each thread runs its agent loop until its run policy stops it or
//!    the run is aborted.
//! 5. **Collection**: Threads are joined. Thread 0 runs the once-after hook before
//!    it exits.
//!
//! ## Aborts
//!
//! Any thread can abort the whole run: a fatal operation error, a handler
//! binding failure or an initialization failure raises the shared abort signal,
//! which cancels every pending wait. The report records the first cause.

use crate::{
    cli::{Args, RunModeArg},
    coordination::{AbortCause, LoadSchedule, RunCoordinator},
    driver::Driver,
    error::DriverError,
    metrics::ThreadMetrics,
    scheduler::{cycle_thread::CyclePolicy, time_thread::TimePolicy, AgentThread, RunPolicy},
    timing::Timer,
    utils,
};
use core_affinity::CoreId;
use crossbeam::sync::WaitGroup;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

/// Length of each run phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Phases measured in completed cycles per thread.
    Cycles {
        ramp_up: u64,
        steady_state: u64,
        ramp_down: u64,
    },
    /// Phases measured in wall-clock time from the start time.
    Time {
        ramp_up: Duration,
        steady_state: Duration,
        ramp_down: Duration,
    },
}

impl RunMode {
    pub fn is_time(&self) -> bool {
        matches!(self, RunMode::Time { .. })
    }
}

/// How the number of driver threads is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadCount {
    /// Run exactly this many threads.
    Fixed(usize),
    /// Derive the thread count from the driver's threads per scale.
    Scale(u32),
}

/// Run control parameters
///
/// `RunControl` holds everything about a run that is not part of the workload
/// definition itself. It is built either programmatically with [`RunControl::cycles`]
/// or [`RunControl::time`] and the builder setters, or from CLI arguments with
/// [`RunControl::from_args`].
#[derive(Debug, Clone)]
pub struct RunControl {
    /// Phase lengths and the policy that enforces them
    pub mode: RunMode,

    /// Number of virtual users
    pub threads: ThreadCount,

    /// Whether every thread waits for the start signal before its first
    /// operation. Without it, threads start as soon as they are initialized and
    /// their early cycles count as warm-up.
    pub simultaneous_start: bool,

    /// Thread counts over time. Only valid in time mode.
    pub variable_load: Option<LoadSchedule>,

    /// Base seed for the per-thread random generators. Thread `n` uses
    /// `seed + n`. A random seed is drawn when unset.
    pub seed: Option<u64>,

    /// Delay between the latch releasing and the start time
    pub start_delay: Duration,

    /// Pin each thread to a CPU core, round-robin
    pub pin_threads: bool,
}

impl RunControl {
    /// A cycle-count run with one thread.
    pub fn cycles(ramp_up: u64, steady_state: u64, ramp_down: u64) -> Self {
        Self::with_mode(RunMode::Cycles {
            ramp_up,
            steady_state,
            ramp_down,
        })
    }

    /// A wall-clock run with one thread.
    pub fn time(ramp_up: Duration, steady_state: Duration, ramp_down: Duration) -> Self {
        Self::with_mode(RunMode::Time {
            ramp_up,
            steady_state,
            ramp_down,
        })
    }

    fn with_mode(mode: RunMode) -> Self {
        Self {
            mode,
            threads: ThreadCount::Fixed(1),
            simultaneous_start: false,
            variable_load: None,
            seed: None,
            start_delay: Duration::ZERO,
            pin_threads: false,
        }
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = ThreadCount::Fixed(threads);
        self
    }

    pub fn scale(mut self, scale: u32) -> Self {
        self.threads = ThreadCount::Scale(scale);
        self
    }

    pub fn simultaneous_start(mut self, simultaneous: bool) -> Self {
        self.simultaneous_start = simultaneous;
        self
    }

    pub fn variable_load(mut self, schedule: LoadSchedule) -> Self {
        self.variable_load = Some(schedule);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn pin_threads(mut self, pin: bool) -> Self {
        self.pin_threads = pin;
        self
    }

    /// Create run control from CLI arguments
    ///
    /// Phase lengths are read as cycle counts in cycle mode and as durations in
    /// time mode.
    ///
    /// ## Parameters
    /// - `args`: Parsed command-line arguments
    ///
    /// ## Returns
    /// - `Ok(RunControl)`: Valid run control ready for use
    /// - `Err(anyhow::Error)`: A phase length does not parse or a limit is exceeded
    pub fn from_args(args: &Args) -> anyhow::Result<Self> {
        let mode = match args.mode {
            RunModeArg::Cycles => RunMode::Cycles {
                ramp_up: utils::parse_cycles("ramp-up", &args.ramp_up)?,
                steady_state: utils::parse_cycles("steady-state", &args.steady_state)?,
                ramp_down: utils::parse_cycles("ramp-down", &args.ramp_down)?,
            },
            RunModeArg::Time => RunMode::Time {
                ramp_up: utils::parse_phase_duration("ramp-up", &args.ramp_up)?,
                steady_state: utils::parse_phase_duration("steady-state", &args.steady_state)?,
                ramp_down: utils::parse_phase_duration("ramp-down", &args.ramp_down)?,
            },
        };

        let threads = match args.threads {
            Some(threads) => {
                utils::validate_threads(threads)?;
                ThreadCount::Fixed(threads)
            }
            None => {
                utils::validate_scale(args.scale)?;
                ThreadCount::Scale(args.scale)
            }
        };

        let control = Self {
            mode,
            threads,
            simultaneous_start: args.simultaneous_start,
            variable_load: args.variable_load.clone(),
            seed: args.seed,
            start_delay: args.start_delay,
            pin_threads: args.pin_threads,
        };
        utils::validate_steady_state(&control.mode)?;
        Ok(control)
    }

    /// Resolve the thread count for a driver.
    pub fn thread_count<D>(&self, driver: &Driver<D>) -> usize {
        match self.threads {
            ThreadCount::Fixed(threads) => threads,
            ThreadCount::Scale(scale) => driver.threads_for_scale(scale),
        }
    }

    /// Check the run control against the driver it will run.
    ///
    /// ## Validation
    /// - At least one thread must run
    /// - Variable load and background mixes require time mode
    /// - A variable-load level must not ask for more threads than the run has
    pub fn validate<D>(&self, driver: &Driver<D>) -> Result<(), DriverError> {
        let threads = self.thread_count(driver);
        if threads == 0 {
            return Err(DriverError::RunControl(
                "run needs at least one thread".to_string(),
            ));
        }
        if !self.mode.is_time() {
            if self.variable_load.is_some() {
                return Err(DriverError::RunControl(
                    "variable load is only supported in time mode".to_string(),
                ));
            }
            if driver.background_mix().is_some() {
                return Err(DriverError::RunControl(format!(
                    "driver {} defines a background mix, which is only supported in time mode",
                    driver.name()
                )));
            }
        }
        if let Some(schedule) = &self.variable_load {
            if schedule.max_threads() > threads {
                return Err(DriverError::RunControl(format!(
                    "variable load asks for {} threads but the run has {}",
                    schedule.max_threads(),
                    threads
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of one driver thread.
#[derive(Debug)]
pub struct ThreadReport {
    pub thread_id: usize,

    /// Metrics sink, absent when the thread failed before it was created or
    /// panicked
    pub metrics: Option<ThreadMetrics>,

    /// Why the thread stopped early, if it did
    pub error: Option<DriverError>,
}

/// Results of one run.
#[derive(Debug)]
pub struct RunReport {
    /// Unique identifier of the run
    pub run_id: String,

    pub driver: String,

    /// One entry per thread, ordered by thread id
    pub threads: Vec<ThreadReport>,

    /// First abort cause, if the run was aborted
    pub abort: Option<AbortCause>,

    /// When the abort was raised, on the run's timer
    pub abort_ns: Option<i64>,

    /// Coordinated start time on the run's timer, if the start was reached
    pub start_ns: Option<i64>,

    /// Wall-clock time from the start signal to the last thread joining
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    pub fn metrics(&self) -> impl Iterator<Item = &ThreadMetrics> {
        self.threads.iter().filter_map(|t| t.metrics.as_ref())
    }

    pub fn total_tx(&self) -> u64 {
        self.metrics().map(ThreadMetrics::total_tx).sum()
    }

    pub fn steady_state_tx(&self) -> u64 {
        self.metrics().map(ThreadMetrics::steady_state_tx).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.metrics().map(ThreadMetrics::total_errors).sum()
    }

    /// Turn an aborted report into the error that caused the abort.
    ///
    /// The error of the thread that raised the abort is preferred. When that
    /// thread left no error behind, one is built from the recorded cause.
    pub fn into_result(mut self) -> Result<RunReport, DriverError> {
        let Some(cause) = self.abort.clone() else {
            return Ok(self);
        };
        let position = self
            .threads
            .iter()
            .position(|t| t.thread_id == cause.thread_id && t.error.is_some())
            .or_else(|| self.threads.iter().position(|t| t.error.is_some()));
        if let Some(err) = position.and_then(|i| self.threads[i].error.take()) {
            return Err(err);
        }
        Err(DriverError::Fatal {
            thread_id: cause.thread_id,
            operation: cause.operation,
            cause: anyhow::anyhow!(cause.message),
        })
    }
}

/// Benchmark runner that executes one driver under one run control.
///
/// ## Usage Pattern
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use workload_driver::benchmark::{BenchmarkRunner, RunControl};
/// # use workload_driver::cycle::Cycle;
/// # use workload_driver::driver::DriverBuilder;
/// # use workload_driver::operation::OperationSpec;
/// # fn main() -> anyhow::Result<()> {
/// let driver = DriverBuilder::new("PingDriver", |_| Ok(()))
///     .percentiles(&["90th"])
///     .default_cycle(Cycle::fixed(Duration::from_millis(10)))
///     .operation(OperationSpec::new("Ping").percentile_limits(vec![0.1]), |_, _| Ok(()))
///     .flat_mix(&[("Ping", 1.0)])
///     .build()?;
/// let control = RunControl::cycles(10, 100, 10).threads(4).simultaneous_start(true);
/// let report = BenchmarkRunner::new(Arc::new(driver), control)?.run()?.into_result()?;
/// println!("{} transactions", report.total_tx());
/// # Ok(())
/// # }
/// ```
pub struct BenchmarkRunner<D> {
    driver: Arc<Driver<D>>,
    control: RunControl,
}

impl<D: 'static> BenchmarkRunner<D> {
    /// Create a new benchmark runner
    ///
    /// ## Parameters
    /// - `driver`: Validated driver definition shared by all threads
    /// - `control`: Run control parameters
    ///
    /// ## Returns
    /// - `Ok(BenchmarkRunner)`: Runner ready for execution
    /// - `Err(DriverError::RunControl)`: The run control does not fit the driver
    pub fn new(driver: Arc<Driver<D>>, control: RunControl) -> Result<Self, DriverError> {
        control.validate(&driver)?;
        Ok(Self { driver, control })
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Run the benchmark and return the per-thread results
    ///
    /// ## Execution Flow
    ///
    /// 1. **Spawn**: One named thread per virtual user
    /// 2. **Latch**: Wait for every thread to initialize
    /// 3. **Start**: Fix the start time and release waiting threads
    /// 4. **Join**: Collect every thread's metrics and error
    ///
    /// ## Returns
    /// - `Ok(RunReport)`: The run finished, possibly aborted; see
    ///   [`RunReport::into_result`]
    /// - `Err(DriverError::Spawn)`: A thread could not be spawned. Already
    ///   spawned threads are aborted and joined first.
    pub fn run(&self) -> Result<RunReport, DriverError> {
        let threads = self.control.thread_count(&self.driver);
        let run_id = utils::generate_run_id();
        let timer = Timer::new();
        let coordinator = Arc::new(RunCoordinator::new(
            timer,
            self.control.variable_load.clone(),
        ));
        let seed = self.control.seed.unwrap_or_else(rand::random);
        let cores = if self.control.pin_threads {
            utils::core_ids()
        } else {
            Vec::new()
        };

        info!(
            "Starting run {} of {} with {} threads ({:?})",
            run_id,
            self.driver.name(),
            threads,
            self.control.mode
        );
        debug!("Base seed {}", seed);

        let ready = WaitGroup::new();
        let mut handles: Vec<(usize, JoinHandle<ThreadReport>)> = Vec::with_capacity(threads);
        for thread_id in 0..threads {
            let core = (!cores.is_empty()).then(|| cores[thread_id % cores.len()]);
            let agent = AgentSetup {
                thread_id,
                driver: Arc::clone(&self.driver),
                mode: self.control.mode,
                simultaneous_start: self.control.simultaneous_start,
                coordinator: Arc::clone(&coordinator),
                seed: seed.wrapping_add(thread_id as u64),
                core,
            };
            let latch = ready.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.driver.name(), thread_id))
                .spawn(move || agent.run(latch));
            match spawned {
                Ok(handle) => handles.push((thread_id, handle)),
                Err(source) => {
                    coordinator.abort_run(AbortCause {
                        thread_id,
                        operation: String::new(),
                        message: format!("failed to spawn thread: {}", source),
                    });
                    drop(ready);
                    join_all(handles);
                    return Err(DriverError::Spawn { thread_id, source });
                }
            }
        }

        ready.wait();
        let start_ns = timer
            .now_ns()
            .saturating_add(i64::try_from(self.control.start_delay.as_nanos()).unwrap_or(i64::MAX));
        coordinator.fix_start_time(start_ns);
        let started = Instant::now();
        debug!("Start time fixed at {}ns", start_ns);

        let reports = join_all(handles);
        let elapsed = started.elapsed();
        let abort = coordinator.abort_cause();
        match &abort {
            Some(cause) => warn!(
                "Run {} aborted by thread {}: {}",
                run_id, cause.thread_id, cause.message
            ),
            None => info!(
                "Run {} completed in {}",
                run_id,
                utils::format_duration(elapsed)
            ),
        }

        Ok(RunReport {
            run_id,
            driver: self.driver.name().to_string(),
            threads: reports,
            abort,
            abort_ns: coordinator.abort_time(),
            start_ns: coordinator.start_time(),
            elapsed,
        })
    }
}

fn join_all(handles: Vec<(usize, JoinHandle<ThreadReport>)>) -> Vec<ThreadReport> {
    handles
        .into_iter()
        .map(|(thread_id, handle)| match handle.join() {
            Ok(report) => report,
            Err(_) => {
                error!("Driver thread {} panicked", thread_id);
                ThreadReport {
                    thread_id,
                    metrics: None,
                    error: Some(DriverError::Panicked { thread_id }),
                }
            }
        })
        .collect()
}

/// Everything one driver thread needs, moved into the thread.
struct AgentSetup<D> {
    thread_id: usize,
    driver: Arc<Driver<D>>,
    mode: RunMode,
    simultaneous_start: bool,
    coordinator: Arc<RunCoordinator>,
    seed: u64,
    core: Option<CoreId>,
}

impl<D: 'static> AgentSetup<D> {
    fn run(self, latch: WaitGroup) -> ThreadReport {
        let span = info_span!("agent", driver = %self.driver.name(), thread = self.thread_id);
        let _enter = span.enter();
        let thread_id = self.thread_id;

        if let Some(core) = self.core {
            if !core_affinity::set_for_current(core) {
                warn!("Failed to pin thread {} to core {}", thread_id, core.id);
            }
        }

        let metrics = match ThreadMetrics::new(thread_id, &self.driver) {
            Ok(metrics) => metrics,
            Err(cause) => return self.init_failed(cause),
        };
        let mut instance = match self.driver.create_instance(thread_id) {
            Ok(instance) => instance,
            Err(cause) => return self.init_failed(cause),
        };
        if thread_id == 0 {
            if let Some(hook) = self.driver.before_run() {
                if let Err(cause) = hook(&mut instance) {
                    return self.init_failed(cause.context("once-before hook failed"));
                }
            }
        }
        drop(latch);

        let rng = StdRng::seed_from_u64(self.seed);
        let (outcome, mut instance, metrics) = match self.mode {
            RunMode::Cycles {
                ramp_up,
                steady_state,
                ramp_down,
            } => self.drive(
                instance,
                CyclePolicy::new(ramp_up, steady_state, ramp_down, self.simultaneous_start),
                metrics,
                rng,
            ),
            RunMode::Time {
                ramp_up,
                steady_state,
                ramp_down,
            } => self.drive(
                instance,
                TimePolicy::new(ramp_up, steady_state, ramp_down, self.simultaneous_start),
                metrics,
                rng,
            ),
        };

        if thread_id == 0 {
            if let Some(hook) = self.driver.after_run() {
                if let Err(cause) = hook(&mut instance) {
                    error!("Once-after hook failed: {:#}", cause);
                }
            }
        }

        ThreadReport {
            thread_id,
            metrics: Some(metrics),
            error: outcome.err(),
        }
    }

    fn drive<P: RunPolicy>(
        &self,
        instance: D,
        policy: P,
        metrics: ThreadMetrics,
        rng: StdRng,
    ) -> (Result<(), DriverError>, D, ThreadMetrics) {
        let mut agent = AgentThread::new(
            self.thread_id,
            Arc::clone(&self.driver),
            instance,
            Arc::clone(&self.coordinator),
            policy,
            metrics,
            rng,
        );
        let outcome = agent.run();
        let (instance, metrics) = agent.into_parts();
        (outcome, instance, metrics)
    }

    fn init_failed(&self, cause: anyhow::Error) -> ThreadReport {
        error!(
            "Error initializing driver {}: {:#}",
            self.driver.name(),
            cause
        );
        self.coordinator.abort_run(AbortCause {
            thread_id: self.thread_id,
            operation: String::new(),
            message: format!("{:#}", cause),
        });
        ThreadReport {
            thread_id: self.thread_id,
            metrics: None,
            error: Some(DriverError::Initialization {
                thread_id: self.thread_id,
                driver: self.driver.name().to_string(),
                cause,
            }),
        }
    }
}
