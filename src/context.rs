//! Per-thread execution context handed to every operation handler.
//!
//! The context owns the current [`TimingInfo`] and is the only way a handler
//! reports manual timing. It is exclusively owned by its thread.

use crate::coordination::Sleeper;
use crate::error::{FatalError, RunAborted};
use crate::operation::Timing;
use crate::scheduler::PhaseView;
use crate::timing::{Timer, TimingInfo};
use std::sync::Arc;

pub struct DriverContext {
    thread_id: usize,
    driver_name: Arc<str>,
    operation_names: Arc<[String]>,
    sleeper: Sleeper,
    timer: Timer,
    timing: TimingInfo,
    phase: PhaseView,
    current: Option<usize>,
    timing_mode: Timing,
}

impl DriverContext {
    pub(crate) fn new(
        thread_id: usize,
        driver_name: Arc<str>,
        operation_names: Arc<[String]>,
        sleeper: Sleeper,
        phase: PhaseView,
    ) -> Self {
        let timer = sleeper.coordinator().timer();
        Self {
            thread_id,
            driver_name,
            operation_names,
            sleeper,
            timer,
            timing: TimingInfo::default(),
            phase,
            current: None,
            timing_mode: Timing::Auto,
        }
    }

    /// Prepare for the next invocation.
    pub(crate) fn begin(
        &mut self,
        operation: usize,
        timing_mode: Timing,
        intended_ns: i64,
        phase: PhaseView,
    ) {
        self.current = Some(operation);
        self.timing_mode = timing_mode;
        self.timing.reset(intended_ns);
        self.phase = phase;
    }

    pub(crate) fn sleeper(&self) -> &Sleeper {
        &self.sleeper
    }

    pub(crate) fn timing_mut(&mut self) -> &mut TimingInfo {
        &mut self.timing
    }

    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// Name of the operation currently executing.
    pub fn operation_name(&self) -> Option<&str> {
        self.current
            .and_then(|i| self.operation_names.get(i))
            .map(String::as_str)
    }

    pub fn timing(&self) -> &TimingInfo {
        &self.timing
    }

    pub fn intended_invoke_time(&self) -> Option<i64> {
        self.timing.intended_invoke_time()
    }

    /// Current timer reading in nanoseconds.
    pub fn now_ns(&self) -> i64 {
        self.timer.now_ns()
    }

    /// Record the invoke time on the first call and the respond time on the
    /// second. Has no effect for automatically timed operations.
    pub fn record_time(&mut self) -> Result<(), RunAborted> {
        if self.timing.has_invoke_time() {
            self.record_end_time();
            Ok(())
        } else {
            self.record_start_time()
        }
    }

    /// Wait for the intended invoke time, then record it as started.
    pub fn record_start_time(&mut self) -> Result<(), RunAborted> {
        if self.timing_mode != Timing::Manual {
            return Ok(());
        }
        if let Some(intended) = self.timing.intended_invoke_time() {
            self.sleeper.wakeup_at(intended)?;
        }
        let now = self.timer.now_ns();
        self.timing.set_invoke_time(now);
        Ok(())
    }

    pub fn record_end_time(&mut self) {
        if self.timing_mode != Timing::Manual {
            return;
        }
        let now = self.timer.now_ns();
        self.timing.set_respond_time(now);
    }

    /// Mark an interim response inside a still-open request.
    pub fn record_last_respond_time(&mut self) {
        let now = self.timer.now_ns();
        self.timing.set_last_respond_time(now);
    }

    /// Exclude `ns` of the current invocation from its response time.
    pub fn add_pause_time(&mut self, ns: i64) {
        self.timing.add_pause_time(ns);
    }

    /// Whether the current invocation counts as steady state.
    ///
    /// Calling this before the invoke time is known is a driver bug and yields a
    /// [`FatalError`], which aborts the run when propagated.
    pub fn is_steady_state(&self) -> Result<bool, FatalError> {
        self.phase.is_steady_state(&self.timing)
    }
}

impl std::fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverContext")
            .field("thread_id", &self.thread_id)
            .field("driver_name", &self.driver_name)
            .field("operation", &self.operation_name())
            .field("timing", &self.timing)
            .field("phase", &self.phase)
            .finish()
    }
}
