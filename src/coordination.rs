//! # Run Coordination
//!
//! The only state shared between driver threads besides the read-only driver
//! definition. A [`RunCoordinator`] carries:
//!
//! - **Start time signal**: fires once when the coordinator fixes the benchmark
//!   start time. Threads either block on it (simultaneous start) or poll it
//!   each iteration and compute their ramp boundaries the first time they see it.
//! - **Abort signal**: raised by any thread hitting a fatal cause. Every wait in
//!   the engine is cancelled by it, so no thread outlives an abort.
//! - **Load schedule**: optional variable-load levels evaluated against the start
//!   time.
//!
//! The thread start countdown is a `crossbeam::sync::WaitGroup` handed to each
//! thread by the runner.
//!
//! Polling paths only touch atomics. The mutex and condvar publish the two
//! one-shot transitions and serve the start-time wait. Timed waits go through a
//! per-thread [`Sleeper`] that parks on its own `crossbeam` parker, so threads
//! sleeping towards their next invocation share no lock.

use crate::error::{DriverError, RunAborted};
use crate::timing::Timer;
use crossbeam::sync::{Parker, Unparker};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a run was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortCause {
    pub thread_id: usize,
    pub operation: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct SignalState {
    start_ns: Option<i64>,
    abort: Option<AbortCause>,
    abort_ns: Option<i64>,
}

/// Shared coordination primitives for one run.
#[derive(Debug)]
pub struct RunCoordinator {
    timer: Timer,
    state: Mutex<SignalState>,
    changed: Condvar,
    sleepers: Mutex<Vec<Unparker>>,
    start_fixed: AtomicBool,
    start_ns: AtomicI64,
    aborted: AtomicBool,
    load: Option<LoadSchedule>,
}

impl RunCoordinator {
    pub fn new(timer: Timer, load: Option<LoadSchedule>) -> Self {
        Self {
            timer,
            state: Mutex::new(SignalState::default()),
            changed: Condvar::new(),
            sleepers: Mutex::new(Vec::new()),
            start_fixed: AtomicBool::new(false),
            start_ns: AtomicI64::new(0),
            aborted: AtomicBool::new(false),
            load,
        }
    }

    pub fn timer(&self) -> Timer {
        self.timer
    }

    pub fn load_schedule(&self) -> Option<&LoadSchedule> {
        self.load.as_ref()
    }

    /// Fix the benchmark start time. Only the first call has an effect.
    pub fn fix_start_time(&self, start_ns: i64) -> bool {
        let mut state = self.state.lock();
        if state.start_ns.is_some() {
            return false;
        }
        state.start_ns = Some(start_ns);
        self.start_ns.store(start_ns, Ordering::Release);
        self.start_fixed.store(true, Ordering::Release);
        self.changed.notify_all();
        true
    }

    /// The start time, once fixed. Never blocks.
    pub fn start_time(&self) -> Option<i64> {
        if self.start_fixed.load(Ordering::Acquire) {
            Some(self.start_ns.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Block until the start time is fixed.
    pub fn wait_start_time(&self) -> Result<i64, RunAborted> {
        let mut state = self.state.lock();
        loop {
            if state.abort.is_some() {
                return Err(RunAborted);
            }
            if let Some(start) = state.start_ns {
                return Ok(start);
            }
            self.changed.wait(&mut state);
        }
    }

    /// Raise the global abort. Returns `true` for the call that raised it first.
    pub fn abort_run(&self, cause: AbortCause) -> bool {
        let mut state = self.state.lock();
        if state.abort.is_some() {
            return false;
        }
        state.abort = Some(cause);
        self.aborted.store(true, Ordering::Release);
        // Stamped after the flag, so every sample kept by a thread that saw
        // the flag clear was taken earlier.
        state.abort_ns = Some(self.timer.now_ns());
        self.changed.notify_all();
        drop(state);
        for unparker in self.sleepers.lock().iter() {
            unparker.unpark();
        }
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn abort_cause(&self) -> Option<AbortCause> {
        self.state.lock().abort.clone()
    }

    /// Timer reading taken when the abort was raised.
    pub fn abort_time(&self) -> Option<i64> {
        self.state.lock().abort_ns
    }

    /// A timed-wait handle for the calling thread.
    ///
    /// Registration takes the sleeper lock once; waits on the returned handle
    /// never touch shared locks.
    pub fn sleeper(self: &Arc<Self>) -> Sleeper {
        let parker = Parker::new();
        self.sleepers.lock().push(parker.unparker().clone());
        Sleeper {
            coordinator: Arc::clone(self),
            parker,
        }
    }
}

/// Per-thread handle for abort-cancellable timed waits.
///
/// Owned by exactly one thread. An abort unparks every registered sleeper.
#[derive(Debug)]
pub struct Sleeper {
    coordinator: Arc<RunCoordinator>,
    parker: Parker,
}

impl Sleeper {
    pub fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    /// Sleep until the timer reaches `ns`, without spinning.
    ///
    /// Returns immediately when the deadline has passed or the run is aborted.
    pub fn wakeup_at(&self, ns: i64) -> Result<(), RunAborted> {
        let deadline = self.coordinator.timer.instant_at(ns);
        loop {
            if self.coordinator.is_aborted() {
                return Err(RunAborted);
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            self.parker.park_deadline(deadline);
        }
    }
}

/// One variable-load level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLevel {
    pub duration: Duration,
    pub threads: usize,
}

/// Thread counts over time, measured from the benchmark start. The last level
/// holds until the end of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSchedule {
    levels: Vec<LoadLevel>,
}

impl LoadSchedule {
    pub fn new(levels: Vec<LoadLevel>) -> Result<Self, DriverError> {
        if levels.is_empty() {
            return Err(DriverError::RunControl(
                "variable load schedule has no levels".to_string(),
            ));
        }
        if let Some(level) = levels.iter().find(|l| l.duration.is_zero()) {
            return Err(DriverError::RunControl(format!(
                "variable load level for {} threads has zero duration",
                level.threads
            )));
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[LoadLevel] {
        &self.levels
    }

    pub fn max_threads(&self) -> usize {
        self.levels.iter().map(|l| l.threads).max().unwrap_or(0)
    }

    /// Active thread count at `elapsed_ns` after start, and the offset of the
    /// next level switch if there is one.
    pub fn level_at(&self, elapsed_ns: i64) -> (usize, Option<i64>) {
        let mut boundary: i64 = 0;
        for level in &self.levels {
            let length = i64::try_from(level.duration.as_nanos()).unwrap_or(i64::MAX);
            boundary = boundary.saturating_add(length);
            if elapsed_ns < boundary {
                let is_last = std::ptr::eq(level, self.levels.last().unwrap_or(level));
                return (level.threads, if is_last { None } else { Some(boundary) });
            }
        }
        (self.levels.last().map(|l| l.threads).unwrap_or(0), None)
    }
}
