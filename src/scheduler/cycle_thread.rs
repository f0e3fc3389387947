//! Cycle-count run control.
//!
//! Ramp-up, steady state and ramp-down are measured in completed cycles. Without
//! a simultaneous start, cycles invoked before the coordinated start time are
//! warm-up: they run and are reported as ramp-up, but are not counted. The
//! first cycle invoked at or after the start time is cycle 1.

use super::{CycleBounds, EarlyFailure, Gate, PhaseView, RunPhase, RunPolicy};
use crate::coordination::{RunCoordinator, Sleeper};
use crate::error::RunAborted;
use crate::timing::TimingInfo;

#[derive(Debug, Clone)]
pub struct CyclePolicy {
    bounds: CycleBounds,
    simultaneous_start: bool,
    started: bool,
    completed: u64,
    start_ns: Option<i64>,
}

impl CyclePolicy {
    pub fn new(ramp_up: u64, steady_state: u64, ramp_down: u64, simultaneous_start: bool) -> Self {
        Self {
            bounds: CycleBounds::new(ramp_up, steady_state, ramp_down),
            simultaneous_start,
            started: false,
            completed: 0,
            start_ns: None,
        }
    }

    pub fn bounds(&self) -> CycleBounds {
        self.bounds
    }

    /// Cycles counted so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl RunPolicy for CyclePolicy {
    fn prepare(&mut self, coordinator: &RunCoordinator) -> Result<(), RunAborted> {
        if self.simultaneous_start {
            self.start_ns = Some(coordinator.wait_start_time()?);
            self.started = true;
        }
        Ok(())
    }

    fn initial_reference(&self, now_ns: i64) -> i64 {
        self.start_ns.unwrap_or(now_ns)
    }

    fn begin_iteration(&mut self, _thread_id: usize, _sleeper: &Sleeper) -> Result<Gate, RunAborted> {
        if self.started && self.completed >= self.bounds.end_ramp_down {
            return Ok(Gate::Stop);
        }
        Ok(Gate::Proceed)
    }

    fn stop_before(&self, _intended_ns: i64) -> bool {
        false
    }

    fn classify(&mut self, timing: &TimingInfo, coordinator: &RunCoordinator) -> RunPhase {
        if !self.started {
            let reached = match (coordinator.start_time(), timing.invoke_time()) {
                (Some(start), Some(invoke)) => invoke >= start,
                _ => false,
            };
            if !reached {
                return RunPhase::RampUp;
            }
            self.started = true;
        }
        self.completed += 1;
        self.bounds.phase_of(self.completed)
    }

    fn stop_after(&self, _timing: &TimingInfo) -> bool {
        false
    }

    fn phase_view(&self) -> PhaseView {
        PhaseView::Cycles {
            started: self.started,
            completed: self.completed,
            bounds: self.bounds,
        }
    }

    fn early_failure(&self) -> EarlyFailure {
        EarlyFailure::ReusePrevious
    }
}
