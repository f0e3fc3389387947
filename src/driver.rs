//! # Driver Definitions
//!
//! A [`Driver`] is the validated, immutable description of one workload: its
//! operations, the handlers bound to them, the foreground mix and an optional
//! background mix, percentile SLAs and the initial delays. It is shared
//! read-only by every thread of a run.
//!
//! [`DriverBuilder`] performs every check a workload loader would: percentile
//! labels, time units, limit list lengths, mix membership, distribution
//! resolution and background timings. Handlers are bound to operations once,
//! here; the scheduler only ever calls through the stored handle.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use workload_driver::cycle::Cycle;
//! use workload_driver::driver::DriverBuilder;
//! use workload_driver::operation::OperationSpec;
//!
//! struct Shop;
//!
//! let driver = DriverBuilder::new("ShopDriver", |_thread_id| Ok(Shop))
//!     .percentiles(&["90th", "99th"])
//!     .default_cycle(Cycle::fixed(Duration::from_millis(100)))
//!     .operation(
//!         OperationSpec::new("Browse").percentile_limits(vec![0.5, 1.0]),
//!         |_shop: &mut Shop, _ctx| Ok(()),
//!     )
//!     .operation(
//!         OperationSpec::new("Purchase").percentile_limits(vec![1.0, 2.0]),
//!         |_shop: &mut Shop, _ctx| Ok(()),
//!     )
//!     .flat_mix(&[("Browse", 80.0), ("Purchase", 20.0)])
//!     .build()
//!     .unwrap();
//! assert_eq!(driver.operations().len(), 2);
//! ```

use crate::context::DriverContext;
use crate::cycle::Cycle;
use crate::error::{DefinitionError, DefinitionResult};
use crate::mix::{Mix, DEFAULT_MIX_DEVIATION};
use crate::operation::{Operation, OperationSpec, Percentile, TimeUnit};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Handler bound to one operation.
pub type OperationFn<D> =
    Arc<dyn Fn(&mut D, &mut DriverContext) -> anyhow::Result<()> + Send + Sync>;

/// Creates the per-thread driver instance, given the thread id.
pub type DriverFactory<D> = Arc<dyn Fn(usize) -> anyhow::Result<D> + Send + Sync>;

/// Once-per-run hook executed on thread 0's instance.
pub type HookFn<D> = Arc<dyn Fn(&mut D) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone)]
enum MixDecl {
    Flat(Vec<(String, f64)>),
    Sequence(Vec<String>),
}

pub struct DriverBuilder<D> {
    name: String,
    factory: DriverFactory<D>,
    percentiles: Vec<String>,
    response_time_unit: TimeUnit,
    histogram_unit: TimeUnit,
    thread_per_scale: f64,
    default_cycle: Option<Cycle>,
    foreground: Vec<(OperationSpec, OperationFn<D>)>,
    background: Vec<(OperationSpec, OperationFn<D>)>,
    background_timings: Vec<Cycle>,
    mix: Option<MixDecl>,
    mix_deviation: f64,
    initial_delay: Duration,
    background_initial_delay: Duration,
    before_run: Option<HookFn<D>>,
    after_run: Option<HookFn<D>>,
}

impl<D: 'static> DriverBuilder<D> {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(usize) -> anyhow::Result<D> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
            percentiles: Vec::new(),
            response_time_unit: TimeUnit::Seconds,
            histogram_unit: TimeUnit::Milliseconds,
            thread_per_scale: 1.0,
            default_cycle: None,
            foreground: Vec::new(),
            background: Vec::new(),
            background_timings: Vec::new(),
            mix: None,
            mix_deviation: DEFAULT_MIX_DEVIATION,
            initial_delay: Duration::ZERO,
            background_initial_delay: Duration::ZERO,
            before_run: None,
            after_run: None,
        }
    }

    /// Percentile labels such as `"90th"` or `"99.9%"`. Leave empty for the
    /// legacy single `max90th` mode.
    pub fn percentiles(mut self, labels: &[&str]) -> Self {
        self.percentiles = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn response_time_unit(mut self, unit: TimeUnit) -> Self {
        self.response_time_unit = unit;
        self
    }

    /// Resolution of the response-time histograms.
    pub fn histogram_unit(mut self, unit: TimeUnit) -> Self {
        self.histogram_unit = unit;
        self
    }

    pub fn thread_per_scale(mut self, value: f64) -> Self {
        self.thread_per_scale = value;
        self
    }

    pub fn default_cycle(mut self, cycle: Cycle) -> Self {
        self.default_cycle = Some(cycle);
        self
    }

    pub fn operation<F>(mut self, spec: OperationSpec, handler: F) -> Self
    where
        F: Fn(&mut D, &mut DriverContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.foreground.push((spec, Arc::new(handler)));
        self
    }

    /// Background operations run as a fixed sequence, interleaved with the
    /// foreground mix on the same thread.
    pub fn background_operation<F>(mut self, spec: OperationSpec, handler: F) -> Self
    where
        F: Fn(&mut D, &mut DriverContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.background.push((spec, Arc::new(handler)));
        self
    }

    /// None, one shared, or one timing per background operation.
    pub fn background_timings(mut self, timings: Vec<Cycle>) -> Self {
        self.background_timings = timings;
        self
    }

    pub fn flat_mix(mut self, weights: &[(&str, f64)]) -> Self {
        self.mix = Some(MixDecl::Flat(
            weights.iter().map(|(n, w)| (n.to_string(), *w)).collect(),
        ));
        self
    }

    pub fn fixed_sequence_mix(mut self, names: &[&str]) -> Self {
        self.mix = Some(MixDecl::Sequence(
            names.iter().map(|n| n.to_string()).collect(),
        ));
        self
    }

    pub fn mix_deviation(mut self, deviation: f64) -> Self {
        self.mix_deviation = deviation;
        self
    }

    /// Upper bound of the uniform delay before the first foreground operation.
    pub fn initial_delay(mut self, max: Duration) -> Self {
        self.initial_delay = max;
        self
    }

    pub fn background_initial_delay(mut self, max: Duration) -> Self {
        self.background_initial_delay = max;
        self
    }

    pub fn before_run<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut D) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before_run = Some(Arc::new(hook));
        self
    }

    pub fn after_run<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut D) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after_run = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> DefinitionResult<Driver<D>> {
        if self.response_time_unit == TimeUnit::Nanoseconds {
            return Err(DefinitionError::NanosecondResponseUnit);
        }
        if self.histogram_unit == TimeUnit::Nanoseconds {
            return Err(DefinitionError::NanosecondHistogramUnit);
        }
        if !self.thread_per_scale.is_finite() || self.thread_per_scale <= 0.0 {
            return Err(DefinitionError::ThreadPerScale {
                value: self.thread_per_scale,
            });
        }
        let percentiles = self
            .percentiles
            .iter()
            .map(|label| Percentile::parse(label))
            .collect::<DefinitionResult<Vec<_>>>()?;

        let mut seen = HashSet::new();
        for (spec, _) in self.foreground.iter().chain(self.background.iter()) {
            if !seen.insert(spec.name.as_str()) {
                return Err(DefinitionError::DuplicateOperation {
                    name: spec.name.clone(),
                });
            }
        }

        let default_cycle = self.default_cycle.as_ref();
        let mut operations = Vec::with_capacity(self.foreground.len() + self.background.len());
        let mut handlers = Vec::with_capacity(operations.capacity());
        for (spec, handler) in &self.foreground {
            operations.push(Operation::new(spec, &percentiles, default_cycle)?);
            handlers.push(Arc::clone(handler));
        }
        let foreground_count = operations.len();

        let timings = &self.background_timings;
        if timings.len() > 1 && timings.len() != self.background.len() {
            return Err(DefinitionError::BackgroundTimings {
                operations: self.background.len(),
                timings: timings.len(),
            });
        }
        for (i, (spec, handler)) in self.background.iter().enumerate() {
            let timing = match timings.len() {
                0 => None,
                1 => timings.first(),
                _ => timings.get(i),
            };
            let op = match timing {
                Some(cycle) => Operation::new(spec, &percentiles, Some(cycle))?.with_cycle(cycle.clone()),
                None => Operation::new(spec, &percentiles, default_cycle)?,
            };
            operations.push(op);
            handlers.push(Arc::clone(handler));
        }

        let max_percentile = if percentiles.is_empty() {
            let max = operations.iter().map(Operation::max90th).fold(0.0, f64::max);
            if max <= 0.0 {
                return Err(DefinitionError::NoMax90th);
            }
            max
        } else {
            let max = operations
                .iter()
                .flat_map(|op| op.percentile_limits().iter().copied())
                .fold(0.0, f64::max);
            if max <= 0.0 {
                return Err(DefinitionError::NoPercentileLimit);
            }
            max
        };

        let index_of = |name: &str| {
            operations[..foreground_count]
                .iter()
                .position(|op| op.name() == name)
                .ok_or_else(|| DefinitionError::UnknownOperation {
                    name: name.to_string(),
                })
        };
        let mix = match self.mix.as_ref().ok_or(DefinitionError::MissingMix)? {
            MixDecl::Flat(entries) => {
                let indices = entries
                    .iter()
                    .map(|(name, _)| index_of(name))
                    .collect::<DefinitionResult<Vec<_>>>()?;
                let weights: Vec<f64> = entries.iter().map(|(_, w)| *w).collect();
                let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
                Mix::flat(indices, &weights, &names)?
            }
            MixDecl::Sequence(names) => {
                let indices = names
                    .iter()
                    .map(|name| index_of(name))
                    .collect::<DefinitionResult<Vec<_>>>()?;
                Mix::fixed_sequence(indices)?
            }
        }
        .with_deviation(self.mix_deviation)?;

        let background = if self.background.is_empty() {
            None
        } else {
            Some(Mix::fixed_sequence(
                (foreground_count..operations.len()).collect(),
            )?)
        };

        let operation_names: Arc<[String]> = operations
            .iter()
            .map(|op| op.name().to_string())
            .collect::<Vec<_>>()
            .into();

        Ok(Driver {
            name: Arc::from(self.name.as_str()),
            factory: self.factory,
            percentiles,
            response_time_unit: self.response_time_unit,
            histogram_unit: self.histogram_unit,
            thread_per_scale: self.thread_per_scale,
            operations,
            operation_names,
            handlers,
            foreground_count,
            mix,
            background,
            initial_delay: Cycle::initial_delay(self.initial_delay),
            background_initial_delay: Cycle::initial_delay(self.background_initial_delay),
            max_percentile,
            before_run: self.before_run,
            after_run: self.after_run,
        })
    }
}

/// A validated driver definition with its bound handlers.
pub struct Driver<D> {
    name: Arc<str>,
    factory: DriverFactory<D>,
    percentiles: Vec<Percentile>,
    response_time_unit: TimeUnit,
    histogram_unit: TimeUnit,
    thread_per_scale: f64,
    operations: Vec<Operation>,
    operation_names: Arc<[String]>,
    handlers: Vec<OperationFn<D>>,
    foreground_count: usize,
    mix: Mix,
    background: Option<Mix>,
    initial_delay: Cycle,
    background_initial_delay: Cycle,
    max_percentile: f64,
    before_run: Option<HookFn<D>>,
    after_run: Option<HookFn<D>>,
}

impl<D> Driver<D> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn percentiles(&self) -> &[Percentile] {
        &self.percentiles
    }

    pub fn response_time_unit(&self) -> TimeUnit {
        self.response_time_unit
    }

    pub fn histogram_unit(&self) -> TimeUnit {
        self.histogram_unit
    }

    pub fn thread_per_scale(&self) -> f64 {
        self.thread_per_scale
    }

    /// Thread count for a given scale, never less than one.
    pub fn threads_for_scale(&self, scale: u32) -> usize {
        ((f64::from(scale) * self.thread_per_scale).round() as usize).max(1)
    }

    /// Foreground operations first, then background ones.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub(crate) fn operation_names(&self) -> Arc<[String]> {
        Arc::clone(&self.operation_names)
    }

    pub fn foreground_operations(&self) -> &[Operation] {
        &self.operations[..self.foreground_count]
    }

    pub fn background_operations(&self) -> &[Operation] {
        &self.operations[self.foreground_count..]
    }

    pub(crate) fn handler(&self, operation: usize) -> Option<&OperationFn<D>> {
        self.handlers.get(operation)
    }

    pub fn mix(&self) -> &Mix {
        &self.mix
    }

    pub fn background_mix(&self) -> Option<&Mix> {
        self.background.as_ref()
    }

    pub fn initial_delay(&self) -> &Cycle {
        &self.initial_delay
    }

    pub fn background_initial_delay(&self) -> &Cycle {
        &self.background_initial_delay
    }

    /// Largest response time limit across all operations, in the response
    /// time unit.
    pub fn max_percentile(&self) -> f64 {
        self.max_percentile
    }

    pub(crate) fn create_instance(&self, thread_id: usize) -> anyhow::Result<D> {
        (self.factory)(thread_id)
    }

    pub(crate) fn before_run(&self) -> Option<&HookFn<D>> {
        self.before_run.as_ref()
    }

    pub(crate) fn after_run(&self) -> Option<&HookFn<D>> {
        self.after_run.as_ref()
    }
}

impl<D> fmt::Debug for Driver<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.name)
            .field("percentiles", &self.percentiles)
            .field("response_time_unit", &self.response_time_unit)
            .field("operations", &self.operations)
            .field("mix", &self.mix)
            .field("background", &self.background)
            .field("max_percentile", &self.max_percentile)
            .finish_non_exhaustive()
    }
}
