//! Per-invocation timing record and the monotonic timer it is stamped from.
//!
//! All timestamps are signed nanoseconds relative to the timer's epoch. A field
//! that has not been captured is `None`.

use std::time::{Duration, Instant};

/// Monotonic nanosecond clock shared by every thread of a run.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    epoch: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Nanoseconds since the epoch.
    pub fn now_ns(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    /// `Instant` corresponding to a timestamp. Timestamps before the epoch clamp to it.
    pub fn instant_at(&self, ns: i64) -> Instant {
        let offset = Duration::from_nanos(u64::try_from(ns).unwrap_or(0));
        self.epoch + offset
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing of one operation invocation.
///
/// Created or reset at the start of each iteration and consumed by phase
/// classification and the metrics sink before the next one begins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimingInfo {
    intended_invoke: Option<i64>,
    invoke: Option<i64>,
    respond: Option<i64>,
    last_respond: Option<i64>,
    pause: i64,
}

impl TimingInfo {
    pub fn new(intended_invoke: i64) -> Self {
        Self {
            intended_invoke: Some(intended_invoke),
            ..Self::default()
        }
    }

    /// Clear every field and set the intended invoke time for a new iteration.
    pub fn reset(&mut self, intended_invoke: i64) {
        *self = Self::new(intended_invoke);
    }

    pub fn intended_invoke_time(&self) -> Option<i64> {
        self.intended_invoke
    }

    pub fn has_invoke_time(&self) -> bool {
        self.invoke.is_some()
    }

    pub fn invoke_time(&self) -> Option<i64> {
        self.invoke
    }

    pub fn set_invoke_time(&mut self, ns: i64) {
        self.invoke = Some(ns);
    }

    pub fn has_respond_time(&self) -> bool {
        self.respond.is_some()
    }

    pub fn respond_time(&self) -> Option<i64> {
        self.respond
    }

    pub fn set_respond_time(&mut self, ns: i64) {
        self.respond = Some(ns);
    }

    pub fn clear_respond_time(&mut self) {
        self.respond = None;
    }

    pub fn has_last_respond_time(&self) -> bool {
        self.last_respond.is_some()
    }

    /// Interim response inside a still-open request. Survives `clear_respond_time`.
    pub fn last_respond_time(&self) -> Option<i64> {
        self.last_respond
    }

    pub fn set_last_respond_time(&mut self, ns: i64) {
        self.last_respond = Some(ns);
    }

    pub fn clear_last_respond_time(&mut self) {
        self.last_respond = None;
    }

    pub fn pause_time(&self) -> i64 {
        self.pause
    }

    pub fn add_pause_time(&mut self, ns: i64) {
        self.pause = self.pause.saturating_add(ns.max(0));
    }

    /// Respond minus invoke minus pause, when both ends are known.
    pub fn response_time_ns(&self) -> Option<i64> {
        match (self.invoke, self.respond) {
            (Some(invoke), Some(respond)) => {
                Some(respond.saturating_sub(invoke).saturating_sub(self.pause).max(0))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_everything() {
        let mut timing = TimingInfo::new(10);
        timing.set_invoke_time(12);
        timing.set_respond_time(20);
        timing.set_last_respond_time(18);
        timing.add_pause_time(3);
        timing.reset(100);
        assert_eq!(timing, TimingInfo::new(100));
        assert_eq!(timing.pause_time(), 0);
    }

    #[test]
    fn test_last_respond_survives_clear() {
        let mut timing = TimingInfo::new(0);
        timing.set_invoke_time(1);
        timing.set_last_respond_time(5);
        timing.set_respond_time(9);
        timing.clear_respond_time();
        assert!(!timing.has_respond_time());
        assert_eq!(timing.last_respond_time(), Some(5));
    }

    #[test]
    fn test_response_time_excludes_pause() {
        let mut timing = TimingInfo::new(0);
        timing.set_invoke_time(1_000);
        timing.set_respond_time(6_000);
        timing.add_pause_time(2_000);
        assert_eq!(timing.response_time_ns(), Some(3_000));
        timing.add_pause_time(-50);
        assert_eq!(timing.pause_time(), 2_000);
    }

    #[test]
    fn test_timer_monotonic() {
        let timer = Timer::new();
        let a = timer.now_ns();
        let b = timer.now_ns();
        assert!(b >= a);
        assert!(timer.instant_at(-5) <= timer.instant_at(a));
    }
}
