//! # Metrics Sink
//!
//! The engine pushes exactly one outcome per iteration into a [`MetricsSink`]:
//! a transaction, an error, and (when the scheduling delay is measurable) a
//! delay-time sample. Every sample is already phase-classified and carries
//! internally consistent timestamps.
//!
//! [`ThreadMetrics`] is the per-thread sink used by the runner. It keeps
//! per-phase counts, HDR histograms for steady-state response times and
//! scheduling delays, and can check one thread's results against the driver's
//! percentile SLAs, mix and delay deviations. Aggregating threads into a final
//! report is left to the caller.

use crate::cycle::CycleType;
use crate::driver::Driver;
use crate::operation::{Percentile, TimeUnit};
use crate::scheduler::RunPhase;
use anyhow::Result;
use hdrhistogram::Histogram;

/// Response histograms saturate at this multiple of the driver's largest
/// percentile limit.
pub const RESPONSE_HEADROOM: f64 = 10.0;

/// A classified invocation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSample {
    /// Driver-wide operation index.
    pub operation: usize,
    pub phase: RunPhase,
    pub intended_ns: i64,
    pub invoke_ns: i64,
    pub respond_ns: i64,
    pub pause_ns: i64,
}

impl TxSample {
    /// Respond minus invoke minus pause, never negative.
    pub fn response_time_ns(&self) -> u64 {
        let rt = self
            .respond_ns
            .saturating_sub(self.invoke_ns)
            .saturating_sub(self.pause_ns);
        u64::try_from(rt).unwrap_or(0)
    }
}

/// Scheduling delay observed before an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelaySample {
    /// Operation whose distribution produced the delay (the previous one).
    pub operation: usize,
    /// Phase of the invocation that followed the delay.
    pub phase: RunPhase,
    pub cycle_type: CycleType,
    pub targeted_ns: i64,
    pub actual_ns: i64,
}

/// Receives classified samples from one thread.
pub trait MetricsSink: Send {
    fn record_tx(&mut self, sample: &TxSample);

    fn record_error(&mut self, sample: &TxSample);

    fn record_delay_time(&mut self, sample: &DelaySample);
}

/// Counts split by run phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseCounts {
    pub ramp_up: u64,
    pub steady_state: u64,
    pub ramp_down: u64,
}

impl PhaseCounts {
    pub fn add(&mut self, phase: RunPhase) {
        match phase {
            RunPhase::RampUp => self.ramp_up += 1,
            RunPhase::SteadyState => self.steady_state += 1,
            RunPhase::RampDown => self.ramp_down += 1,
        }
    }

    pub fn get(&self, phase: RunPhase) -> u64 {
        match phase {
            RunPhase::RampUp => self.ramp_up,
            RunPhase::SteadyState => self.steady_state,
            RunPhase::RampDown => self.ramp_down,
        }
    }

    pub fn total(&self) -> u64 {
        self.ramp_up + self.steady_state + self.ramp_down
    }
}

/// Per-operation statistics of one thread.
#[derive(Debug)]
pub struct OperationStats {
    pub name: String,
    pub count_to_metric: bool,
    pub tx: PhaseCounts,
    pub errors: PhaseCounts,
    percentile_limits: Vec<f64>,
    max90th: f64,
    cycle_deviation: f64,
    response: Histogram<u64>,
    targeted_delay: Histogram<u64>,
    actual_delay: Histogram<u64>,
    targeted_delay_sum: u128,
    actual_delay_sum: u128,
}

impl OperationStats {
    /// Steady-state response times in nanoseconds, pause excluded.
    pub fn response_histogram(&self) -> &Histogram<u64> {
        &self.response
    }

    pub fn targeted_delay_histogram(&self) -> &Histogram<u64> {
        &self.targeted_delay
    }

    pub fn actual_delay_histogram(&self) -> &Histogram<u64> {
        &self.actual_delay
    }

    pub fn mean_targeted_delay_ns(&self) -> Option<f64> {
        mean(self.targeted_delay_sum, self.targeted_delay.len())
    }

    pub fn mean_actual_delay_ns(&self) -> Option<f64> {
        mean(self.actual_delay_sum, self.actual_delay.len())
    }
}

fn mean(sum: u128, count: u64) -> Option<f64> {
    (count > 0).then(|| sum as f64 / count as f64)
}

/// Outcome of one response-time SLA check.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCheck {
    pub operation: String,
    pub percentile: String,
    /// Limit and measured value, in the driver's response time unit.
    pub limit: f64,
    pub actual: f64,
    pub passed: bool,
}

/// Outcome of one mix ratio check.
#[derive(Debug, Clone, PartialEq)]
pub struct MixCheck {
    pub operation: String,
    pub expected: f64,
    pub actual: f64,
    pub passed: bool,
}

/// Outcome of one delay deviation check.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayCheck {
    pub operation: String,
    pub targeted_ns: f64,
    pub actual_ns: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComplianceReport {
    pub response: Vec<ResponseCheck>,
    pub mix: Vec<MixCheck>,
    pub delay: Vec<DelayCheck>,
}

impl ComplianceReport {
    pub fn passed(&self) -> bool {
        self.response.iter().all(|c| c.passed)
            && self.mix.iter().all(|c| c.passed)
            && self.delay.iter().all(|c| c.passed)
    }
}

/// Default per-thread sink backed by HDR histograms.
#[derive(Debug)]
pub struct ThreadMetrics {
    thread_id: usize,
    percentiles: Vec<Percentile>,
    response_time_unit: TimeUnit,
    expected_mix: Vec<(usize, f64)>,
    mix_deviation: f64,
    operations: Vec<OperationStats>,
}

impl ThreadMetrics {
    pub fn new<D>(thread_id: usize, driver: &Driver<D>) -> Result<Self> {
        // One histogram unit is the smallest response time told apart.
        let resolution = driver.histogram_unit().nanos();
        let ceiling = driver
            .response_time_unit()
            .to_duration(driver.max_percentile() * RESPONSE_HEADROOM);
        let response_max = nanos_u64(ceiling).max(resolution.saturating_mul(2));

        let mut operations = Vec::with_capacity(driver.operations().len());
        for op in driver.operations() {
            let delay_max = nanos_u64(op.cycle().histogram_max()).max(2);
            operations.push(OperationStats {
                name: op.name().to_string(),
                count_to_metric: op.count_to_metric(),
                tx: PhaseCounts::default(),
                errors: PhaseCounts::default(),
                percentile_limits: op.percentile_limits().to_vec(),
                max90th: op.max90th(),
                cycle_deviation: op.cycle().deviation(),
                response: Histogram::<u64>::new_with_bounds(resolution, response_max, 3)?,
                targeted_delay: Histogram::<u64>::new_with_max(delay_max, 3)?,
                actual_delay: Histogram::<u64>::new_with_max(delay_max, 3)?,
                targeted_delay_sum: 0,
                actual_delay_sum: 0,
            });
        }
        Ok(Self {
            thread_id,
            percentiles: driver.percentiles().to_vec(),
            response_time_unit: driver.response_time_unit(),
            expected_mix: driver.mix().expected_ratios(),
            mix_deviation: driver.mix().deviation(),
            operations,
        })
    }

    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    pub fn operations(&self) -> &[OperationStats] {
        &self.operations
    }

    pub fn operation(&self, index: usize) -> Option<&OperationStats> {
        self.operations.get(index)
    }

    pub fn operation_by_name(&self, name: &str) -> Option<&OperationStats> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Successful transactions across all phases.
    pub fn total_tx(&self) -> u64 {
        self.operations.iter().map(|op| op.tx.total()).sum()
    }

    pub fn steady_state_tx(&self) -> u64 {
        self.operations.iter().map(|op| op.tx.steady_state).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.operations.iter().map(|op| op.errors.total()).sum()
    }

    /// Check this thread's steady-state results against the driver's SLAs.
    pub fn check_compliance(&self) -> ComplianceReport {
        let mut report = ComplianceReport::default();
        for op in self.operations.iter().filter(|op| op.count_to_metric) {
            if op.tx.steady_state == 0 {
                continue;
            }
            if self.percentiles.is_empty() {
                if op.max90th > 0.0 {
                    report
                        .response
                        .push(self.response_check(op, "90th".to_string(), 90.0, op.max90th));
                }
            } else {
                for (pct, &limit) in self.percentiles.iter().zip(&op.percentile_limits) {
                    if limit > 0.0 {
                        report
                            .response
                            .push(self.response_check(op, pct.to_string(), pct.value(), limit));
                    }
                }
            }
            if let (Some(targeted), Some(actual)) =
                (op.mean_targeted_delay_ns(), op.mean_actual_delay_ns())
            {
                let allowed = targeted * op.cycle_deviation / 100.0;
                report.delay.push(DelayCheck {
                    operation: op.name.clone(),
                    targeted_ns: targeted,
                    actual_ns: actual,
                    passed: (actual - targeted).abs() <= allowed,
                });
            }
        }

        let steady: u64 = self
            .expected_mix
            .iter()
            .filter_map(|(i, _)| self.operations.get(*i))
            .map(|op| op.tx.steady_state)
            .sum();
        if steady > 0 {
            for &(index, expected) in &self.expected_mix {
                let Some(op) = self.operations.get(index) else {
                    continue;
                };
                let actual = op.tx.steady_state as f64 / steady as f64;
                report.mix.push(MixCheck {
                    operation: op.name.clone(),
                    expected,
                    actual,
                    passed: (actual - expected).abs() * 100.0 <= self.mix_deviation,
                });
            }
        }
        report
    }

    fn response_check(
        &self,
        op: &OperationStats,
        percentile: String,
        value: f64,
        limit: f64,
    ) -> ResponseCheck {
        let measured = op.response.value_at_percentile(value);
        let actual = self.response_time_unit.from_nanos(measured);
        ResponseCheck {
            operation: op.name.clone(),
            percentile,
            limit,
            actual,
            passed: actual <= limit,
        }
    }
}

impl MetricsSink for ThreadMetrics {
    fn record_tx(&mut self, sample: &TxSample) {
        let Some(op) = self.operations.get_mut(sample.operation) else {
            return;
        };
        op.tx.add(sample.phase);
        if sample.phase.is_steady_state() {
            op.response.saturating_record(sample.response_time_ns());
        }
    }

    fn record_error(&mut self, sample: &TxSample) {
        if let Some(op) = self.operations.get_mut(sample.operation) {
            op.errors.add(sample.phase);
        }
    }

    fn record_delay_time(&mut self, sample: &DelaySample) {
        if !sample.phase.is_steady_state() {
            return;
        }
        let Some(op) = self.operations.get_mut(sample.operation) else {
            return;
        };
        let targeted = u64::try_from(sample.targeted_ns).unwrap_or(0);
        let actual = u64::try_from(sample.actual_ns).unwrap_or(0);
        op.targeted_delay.saturating_record(targeted);
        op.actual_delay.saturating_record(actual);
        op.targeted_delay_sum += u128::from(targeted);
        op.actual_delay_sum += u128::from(actual);
    }
}

fn nanos_u64(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
