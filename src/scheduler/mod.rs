//! # Thread Scheduler
//!
//! Each virtual user runs an [`AgentThread`]: select an operation, compute its
//! intended invoke time, wait for it, invoke, classify the run phase, report to
//! the metrics sink. The loop shape is shared; where the run stops and how an
//! invocation is classified is delegated to a [`RunPolicy`]:
//!
//! - [`cycle_thread::CyclePolicy`]: boundaries are completed-cycle counts
//! - [`time_thread::TimePolicy`]: boundaries are absolute timestamps derived from
//!   the coordinated start time
//!
//! Failure handling that is common to both policies lives in [`recovery`].

pub mod agent;
pub mod cycle_thread;
pub mod recovery;
pub mod time_thread;

pub use agent::AgentThread;

use crate::coordination::{RunCoordinator, Sleeper};
use crate::error::{FatalError, RunAborted};
use crate::timing::TimingInfo;
use std::fmt;
use std::time::Duration;

/// Run phase an invocation is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    RampUp,
    SteadyState,
    RampDown,
}

impl RunPhase {
    pub fn is_steady_state(self) -> bool {
        self == RunPhase::SteadyState
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::RampUp => write!(f, "ramp-up"),
            RunPhase::SteadyState => write!(f, "steady-state"),
            RunPhase::RampDown => write!(f, "ramp-down"),
        }
    }
}

/// Phase transition points in completed cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleBounds {
    pub end_ramp_up: u64,
    pub end_steady_state: u64,
    pub end_ramp_down: u64,
}

impl CycleBounds {
    pub fn new(ramp_up: u64, steady_state: u64, ramp_down: u64) -> Self {
        let end_ramp_up = ramp_up;
        let end_steady_state = end_ramp_up.saturating_add(steady_state);
        Self {
            end_ramp_up,
            end_steady_state,
            end_ramp_down: end_steady_state.saturating_add(ramp_down),
        }
    }

    /// Phase of the cycle numbered `count` (1-based).
    pub fn phase_of(&self, count: u64) -> RunPhase {
        if count <= self.end_ramp_up {
            RunPhase::RampUp
        } else if count <= self.end_steady_state {
            RunPhase::SteadyState
        } else {
            RunPhase::RampDown
        }
    }
}

/// Phase transition points as absolute timer nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub end_ramp_up: i64,
    pub end_steady_state: i64,
    pub end_ramp_down: i64,
}

impl TimeBounds {
    pub fn from_start(
        start_ns: i64,
        ramp_up: Duration,
        steady_state: Duration,
        ramp_down: Duration,
    ) -> Self {
        let end_ramp_up = start_ns.saturating_add(nanos(ramp_up));
        let end_steady_state = end_ramp_up.saturating_add(nanos(steady_state));
        Self {
            end_ramp_up,
            end_steady_state,
            end_ramp_down: end_steady_state.saturating_add(nanos(ramp_down)),
        }
    }

    /// Steady state requires starting at or after the end of ramp-up and
    /// finishing strictly before the end of steady state.
    pub fn is_steady_state(&self, start: i64, end: i64) -> bool {
        start >= self.end_ramp_up && end < self.end_steady_state
    }

    pub fn phase_of(&self, invoke: i64, respond: i64) -> RunPhase {
        if self.is_steady_state(invoke, respond) {
            RunPhase::SteadyState
        } else if invoke < self.end_ramp_up {
            RunPhase::RampUp
        } else {
            RunPhase::RampDown
        }
    }
}

fn nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Read-only snapshot of a thread's ramp accounting, handed to the running
/// operation through its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseView {
    Cycles {
        started: bool,
        completed: u64,
        bounds: CycleBounds,
    },
    Time {
        bounds: Option<TimeBounds>,
    },
}

impl PhaseView {
    /// Whether the invocation described by `timing` is in steady state.
    ///
    /// Fails when the invoke time is not yet known.
    pub fn is_steady_state(&self, timing: &TimingInfo) -> Result<bool, FatalError> {
        let invoke = timing.invoke_time().ok_or_else(|| {
            FatalError::new(
                "steady state queried before invoke time capture, this is a bug in the driver code",
            )
        })?;
        Ok(match *self {
            PhaseView::Cycles {
                started,
                completed,
                bounds,
            } => started && bounds.phase_of(completed.saturating_add(1)).is_steady_state(),
            PhaseView::Time { bounds } => {
                let end = timing
                    .respond_time()
                    .or_else(|| timing.last_respond_time())
                    .unwrap_or(invoke);
                bounds.is_some_and(|b| b.is_steady_state(invoke, end))
            }
        })
    }
}

/// Outcome of a policy's per-iteration gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Run the next iteration.
    Proceed,
    /// The thread was inactive and has been woken; slot history must be reset.
    Resumed,
    /// The run is over for this thread.
    Stop,
}

/// What to do when a failed invocation never captured an invoke time and the
/// intended time has not been reached yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyFailure {
    /// Drop the iteration without touching statistics.
    Skip,
    /// Reuse the previous invocation's start and end times.
    ReusePrevious,
}

/// Run-control policy driven by the shared thread loop.
pub trait RunPolicy: Send {
    /// Called once after the thread signalled readiness.
    fn prepare(&mut self, coordinator: &RunCoordinator) -> Result<(), RunAborted>;

    /// Reference time for the first intended invoke of a fresh slot.
    fn initial_reference(&self, now_ns: i64) -> i64;

    /// Per-iteration gate, evaluated before an operation is selected. Waits go
    /// through the calling thread's `sleeper`.
    fn begin_iteration(&mut self, thread_id: usize, sleeper: &Sleeper) -> Result<Gate, RunAborted>;

    /// Whether an operation intended for `intended_ns` must not be invoked.
    fn stop_before(&self, intended_ns: i64) -> bool;

    /// Classify a completed invocation and advance the policy's accounting.
    fn classify(&mut self, timing: &TimingInfo, coordinator: &RunCoordinator) -> RunPhase;

    /// Whether the thread stops after the iteration just classified.
    fn stop_after(&self, timing: &TimingInfo) -> bool;

    fn phase_view(&self) -> PhaseView;

    fn early_failure(&self) -> EarlyFailure;
}
