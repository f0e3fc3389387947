//! Wall-clock run control.
//!
//! Boundaries are absolute timestamps derived from the coordinated start time.
//! With a simultaneous start they are computed right after the start signal;
//! otherwise each thread computes them the first time it observes the signal.
//! A variable-load schedule parks threads above the active level until the next
//! level switch.

use super::{EarlyFailure, Gate, PhaseView, RunPhase, RunPolicy, TimeBounds};
use crate::coordination::{RunCoordinator, Sleeper};
use crate::error::RunAborted;
use crate::timing::TimingInfo;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TimePolicy {
    ramp_up: Duration,
    steady_state: Duration,
    ramp_down: Duration,
    simultaneous_start: bool,
    start_ns: Option<i64>,
    bounds: Option<TimeBounds>,
}

impl TimePolicy {
    pub fn new(
        ramp_up: Duration,
        steady_state: Duration,
        ramp_down: Duration,
        simultaneous_start: bool,
    ) -> Self {
        Self {
            ramp_up,
            steady_state,
            ramp_down,
            simultaneous_start,
            start_ns: None,
            bounds: None,
        }
    }

    pub fn bounds(&self) -> Option<TimeBounds> {
        self.bounds
    }

    fn ensure_bounds(&mut self, start_ns: i64) {
        if self.bounds.is_none() {
            self.start_ns = Some(start_ns);
            self.bounds = Some(TimeBounds::from_start(
                start_ns,
                self.ramp_up,
                self.steady_state,
                self.ramp_down,
            ));
        }
    }
}

impl RunPolicy for TimePolicy {
    fn prepare(&mut self, coordinator: &RunCoordinator) -> Result<(), RunAborted> {
        if self.simultaneous_start {
            let start = coordinator.wait_start_time()?;
            self.ensure_bounds(start);
        }
        Ok(())
    }

    fn initial_reference(&self, now_ns: i64) -> i64 {
        if self.simultaneous_start {
            self.start_ns.unwrap_or(now_ns)
        } else {
            now_ns
        }
    }

    fn begin_iteration(&mut self, thread_id: usize, sleeper: &Sleeper) -> Result<Gate, RunAborted> {
        let coordinator = sleeper.coordinator();
        if let Some(schedule) = coordinator.load_schedule() {
            let start = match coordinator.start_time() {
                Some(start) => start,
                None => coordinator.wait_start_time()?,
            };
            self.ensure_bounds(start);
            let elapsed = coordinator.timer().now_ns().saturating_sub(start).max(0);
            let (active, next_switch) = schedule.level_at(elapsed);
            if thread_id >= active {
                let Some(offset) = next_switch else {
                    return Ok(Gate::Stop);
                };
                let wake_at = start.saturating_add(offset);
                if self.bounds.is_some_and(|b| wake_at >= b.end_ramp_down) {
                    return Ok(Gate::Stop);
                }
                debug!(
                    "Current load level: ({}) Thread {} sleeping.",
                    active, thread_id
                );
                sleeper.wakeup_at(wake_at)?;
                return Ok(Gate::Resumed);
            }
        }
        if self.bounds.is_none() {
            if let Some(start) = coordinator.start_time() {
                self.ensure_bounds(start);
            }
        }
        Ok(Gate::Proceed)
    }

    fn stop_before(&self, intended_ns: i64) -> bool {
        self.bounds.is_some_and(|b| intended_ns >= b.end_ramp_down)
    }

    fn classify(&mut self, timing: &TimingInfo, _coordinator: &RunCoordinator) -> RunPhase {
        let invoke = timing.invoke_time().unwrap_or_default();
        let respond = timing.respond_time().unwrap_or(invoke);
        match self.bounds {
            Some(bounds) => bounds.phase_of(invoke, respond),
            None => RunPhase::RampUp,
        }
    }

    fn stop_after(&self, timing: &TimingInfo) -> bool {
        match (self.bounds, timing.respond_time()) {
            (Some(bounds), Some(respond)) => respond >= bounds.end_ramp_down,
            _ => false,
        }
    }

    fn phase_view(&self) -> PhaseView {
        PhaseView::Time {
            bounds: self.bounds,
        }
    }

    fn early_failure(&self) -> EarlyFailure {
        EarlyFailure::Skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{LoadLevel, LoadSchedule};
    use crate::timing::Timer;
    use std::sync::Arc;

    const SEC: i64 = 1_000_000_000;

    fn timing(invoke: i64, respond: i64) -> TimingInfo {
        let mut timing = TimingInfo::new(invoke);
        timing.set_invoke_time(invoke);
        timing.set_respond_time(respond);
        timing
    }

    fn policy(simultaneous: bool) -> TimePolicy {
        TimePolicy::new(
            Duration::from_secs(10),
            Duration::from_secs(20),
            Duration::from_secs(5),
            simultaneous,
        )
    }

    #[test]
    fn test_simultaneous_start_bounds() {
        let coord = RunCoordinator::new(Timer::new(), None);
        coord.fix_start_time(SEC);
        let mut policy = policy(true);
        policy.prepare(&coord).unwrap();
        let bounds = policy.bounds().unwrap();
        assert_eq!(bounds.end_ramp_up, 11 * SEC);
        assert_eq!(bounds.end_steady_state, 31 * SEC);
        assert_eq!(bounds.end_ramp_down, 36 * SEC);
        assert_eq!(policy.initial_reference(0), SEC);
    }

    #[test]
    fn test_lazy_bounds_and_classification() {
        let coord = Arc::new(RunCoordinator::new(Timer::new(), None));
        let sleeper = coord.sleeper();
        let mut policy = policy(false);
        policy.prepare(&coord).unwrap();
        assert_eq!(policy.begin_iteration(0, &sleeper), Ok(Gate::Proceed));
        assert!(policy.bounds().is_none());
        assert!(!policy.stop_before(i64::MAX));
        assert_eq!(policy.classify(&timing(0, 1), &coord), RunPhase::RampUp);

        coord.fix_start_time(0);
        policy.begin_iteration(0, &sleeper).unwrap();
        assert!(policy.bounds().is_some());

        // Straddles the end of ramp-up.
        let straddle = timing(9 * SEC, 11 * SEC);
        assert_eq!(policy.classify(&straddle, &coord), RunPhase::RampUp);
        assert_eq!(
            policy.classify(&timing(10 * SEC, 12 * SEC), &coord),
            RunPhase::SteadyState
        );
        assert_eq!(
            policy.classify(&timing(29 * SEC, 31 * SEC), &coord),
            RunPhase::RampDown
        );
    }

    #[test]
    fn test_stop_conditions() {
        let coord = RunCoordinator::new(Timer::new(), None);
        coord.fix_start_time(0);
        let mut policy = policy(true);
        policy.prepare(&coord).unwrap();
        assert!(!policy.stop_before(35 * SEC - 1));
        assert!(policy.stop_before(35 * SEC));
        assert!(!policy.stop_after(&timing(33 * SEC, 34 * SEC)));
        assert!(policy.stop_after(&timing(34 * SEC, 35 * SEC)));
        assert_eq!(policy.early_failure(), EarlyFailure::Skip);
    }

    #[test]
    fn test_variable_load_parks_inactive_threads() {
        let schedule = LoadSchedule::new(vec![
            LoadLevel {
                duration: Duration::from_millis(30),
                threads: 1,
            },
            LoadLevel {
                duration: Duration::from_secs(60),
                threads: 2,
            },
        ])
        .unwrap();
        let timer = Timer::new();
        let coord = Arc::new(RunCoordinator::new(timer, Some(schedule)));
        let sleeper = coord.sleeper();
        coord.fix_start_time(timer.now_ns());
        let mut policy = TimePolicy::new(
            Duration::ZERO,
            Duration::from_secs(60),
            Duration::ZERO,
            false,
        );
        assert_eq!(policy.begin_iteration(0, &sleeper), Ok(Gate::Proceed));
        assert_eq!(policy.begin_iteration(1, &sleeper), Ok(Gate::Resumed));
        assert!(timer.now_ns() >= policy.bounds().unwrap().end_ramp_up + 30_000_000);
        assert_eq!(policy.begin_iteration(1, &sleeper), Ok(Gate::Proceed));
        assert_eq!(policy.begin_iteration(2, &sleeper), Ok(Gate::Stop));
    }
}
