//! The per-thread driver loop shared by both run policies.

use super::recovery::{repair_failed, validate_completion};
use super::{Gate, RunPhase, RunPolicy};
use crate::context::DriverContext;
use crate::coordination::{AbortCause, RunCoordinator};
use crate::cycle::{Cycle, CycleType};
use crate::driver::Driver;
use crate::error::{fatal_cause, is_run_aborted, DriverError, FatalError};
use crate::metrics::{DelaySample, MetricsSink, TxSample};
use crate::mix::Selector;
use crate::operation::Timing;
use crate::timing::{Timer, TimingInfo};
use rand::rngs::StdRng;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace};

#[derive(Debug, Clone, Copy)]
struct PlannedDelay {
    previous: usize,
    cycle_type: CycleType,
    targeted_ns: i64,
}

/// The next invocation a slot intends to make.
#[derive(Debug, Clone, Copy)]
struct Pending {
    operation: usize,
    intended_ns: i64,
    reference_ns: i64,
    delay: Option<PlannedDelay>,
}

/// Selection and delay state of one mix on one thread.
#[derive(Debug)]
struct MixSlot {
    selector: Selector,
    background: bool,
    current: Option<usize>,
    previous_start: i64,
    previous_end: i64,
    pending: Option<Pending>,
}

impl MixSlot {
    fn new(selector: Selector, background: bool, reference_ns: i64) -> Self {
        Self {
            selector,
            background,
            current: None,
            previous_start: reference_ns,
            previous_end: reference_ns,
            pending: None,
        }
    }

    /// Forget history so the next operation uses the initial delay again.
    fn reset(&mut self, reference_ns: i64) {
        self.current = None;
        self.pending = None;
        self.previous_start = reference_ns;
        self.previous_end = reference_ns;
    }

    fn intended(&self) -> i64 {
        self.pending.map_or(i64::MAX, |p| p.intended_ns)
    }
}

#[derive(Debug)]
struct MixSlots {
    foreground: MixSlot,
    background: Option<MixSlot>,
}

impl MixSlots {
    fn reset(&mut self, reference_ns: i64) {
        self.foreground.reset(reference_ns);
        if let Some(bg) = self.background.as_mut() {
            bg.reset(reference_ns);
        }
    }

    /// Slot whose pending invocation is due first. Ties go to the foreground.
    fn earliest_mut(&mut self) -> &mut MixSlot {
        match self.background.as_mut() {
            Some(bg) if bg.intended() < self.foreground.intended() => bg,
            _ => &mut self.foreground,
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// One virtual user.
pub struct AgentThread<D, P, M> {
    id: usize,
    driver: Arc<Driver<D>>,
    instance: D,
    coordinator: Arc<RunCoordinator>,
    timer: Timer,
    policy: P,
    metrics: M,
    rng: StdRng,
    context: DriverContext,
}

impl<D, P, M> AgentThread<D, P, M>
where
    P: RunPolicy,
    M: MetricsSink,
{
    pub fn new(
        id: usize,
        driver: Arc<Driver<D>>,
        instance: D,
        coordinator: Arc<RunCoordinator>,
        policy: P,
        metrics: M,
        rng: StdRng,
    ) -> Self {
        let context = DriverContext::new(
            id,
            driver.shared_name(),
            driver.operation_names(),
            coordinator.sleeper(),
            policy.phase_view(),
        );
        Self {
            id,
            timer: coordinator.timer(),
            driver,
            instance,
            coordinator,
            policy,
            metrics,
            rng,
            context,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn metrics(&self) -> &M {
        &self.metrics
    }

    pub fn instance_mut(&mut self) -> &mut D {
        &mut self.instance
    }

    pub fn into_parts(self) -> (D, M) {
        (self.instance, self.metrics)
    }

    /// Drive operations until the policy's boundary, an abort, or a fatal error.
    ///
    /// Operational failures are absorbed and counted. Only fatal causes and
    /// binding failures are returned, after the run-wide abort was raised.
    pub fn run(&mut self) -> Result<(), DriverError> {
        if self.policy.prepare(&self.coordinator).is_err() {
            return Ok(());
        }
        let reference = self.policy.initial_reference(self.timer.now_ns());
        let mut slots = self.new_slots(reference);

        debug!("{}: Start of run.", self.name());
        let result = self.drive(&mut slots);
        debug!("{}: End of run.", self.name());
        result
    }

    fn name(&self) -> String {
        format!("{}.{}", self.driver.name(), self.id)
    }

    fn new_slots(&mut self, reference_ns: i64) -> MixSlots {
        let foreground = MixSlot::new(self.driver.mix().selector(&mut self.rng), false, reference_ns);
        let background = self
            .driver
            .background_mix()
            .map(|mix| MixSlot::new(mix.selector(&mut self.rng), true, reference_ns));
        MixSlots {
            foreground,
            background,
        }
    }

    fn drive(&mut self, slots: &mut MixSlots) -> Result<(), DriverError> {
        loop {
            if self.coordinator.is_aborted() {
                return Ok(());
            }
            match self.policy.begin_iteration(self.id, self.context.sleeper()) {
                Ok(Gate::Proceed) => {}
                Ok(Gate::Resumed) => {
                    slots.reset(self.timer.now_ns());
                    continue;
                }
                Ok(Gate::Stop) | Err(_) => return Ok(()),
            }

            self.plan(&mut slots.foreground);
            if let Some(bg) = slots.background.as_mut() {
                self.plan(bg);
            }
            let slot = slots.earliest_mut();
            let Some(pending) = slot.pending.take() else {
                return Ok(());
            };
            match self.execute(slot, pending)? {
                Flow::Continue => {}
                Flow::Stop => return Ok(()),
            }
        }
    }

    /// Select the slot's next operation and compute its intended invoke time.
    fn plan(&mut self, slot: &mut MixSlot) {
        if slot.pending.is_some() {
            return;
        }
        let previous = slot.current;
        let operation = slot.selector.select();
        slot.current = Some(operation);

        let pending = match previous {
            None => {
                let initial: &Cycle = if slot.background {
                    self.driver.background_initial_delay()
                } else {
                    self.driver.initial_delay()
                };
                let delay = initial.delay_ns(&mut self.rng);
                Pending {
                    operation,
                    intended_ns: slot.previous_start.saturating_add(delay),
                    reference_ns: slot.previous_start,
                    delay: None,
                }
            }
            Some(previous) => {
                let cycle = self.driver.operations()[previous].cycle();
                let delay = cycle.delay_ns(&mut self.rng);
                let reference = match cycle.cycle_type() {
                    CycleType::CycleTime => slot.previous_start,
                    CycleType::ThinkTime => slot.previous_end,
                };
                Pending {
                    operation,
                    intended_ns: reference.saturating_add(delay),
                    reference_ns: reference,
                    delay: Some(PlannedDelay {
                        previous,
                        cycle_type: cycle.cycle_type(),
                        targeted_ns: delay,
                    }),
                }
            }
        };
        slot.pending = Some(pending);
    }

    fn execute(&mut self, slot: &mut MixSlot, pending: Pending) -> Result<Flow, DriverError> {
        if self.policy.stop_before(pending.intended_ns) {
            return Ok(Flow::Stop);
        }
        let driver = &*self.driver;
        let op = &driver.operations()[pending.operation];
        let Some(handler) = driver.handler(pending.operation) else {
            let message = format!("no handler bound to operation {}", op.name());
            self.raise_abort(op.name(), &message);
            return Err(DriverError::Binding {
                thread_id: self.id,
                message,
            });
        };

        if self.id == 0 {
            trace!(
                "{}: Invoking {} at time {}.",
                self.name(),
                op.name(),
                pending.intended_ns
            );
        }
        let phase_view = self.policy.phase_view();
        self.context
            .begin(pending.operation, op.timing(), pending.intended_ns, phase_view);

        if op.timing() == Timing::Auto {
            if self.context.sleeper().wakeup_at(pending.intended_ns).is_err() {
                return Ok(Flow::Stop);
            }
            let now = self.timer.now_ns();
            self.context.timing_mut().set_invoke_time(now);
        }

        let instance = &mut self.instance;
        let context = &mut self.context;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| handler(instance, context))) {
            Ok(outcome) => outcome,
            Err(_) => {
                let message = format!("handler for operation {} panicked", op.name());
                self.raise_abort(op.name(), &message);
                error!("{}: {}", self.name(), message);
                return Err(DriverError::Binding {
                    thread_id: self.id,
                    message,
                });
            }
        };
        if op.timing() == Timing::Auto && outcome.is_ok() {
            let now = self.timer.now_ns();
            self.context.timing_mut().set_respond_time(now);
        }

        // Samples taken after an abort are dropped.
        if self.coordinator.is_aborted() {
            return Ok(Flow::Stop);
        }

        match outcome {
            Ok(()) => {
                if let Err(fatal) = validate_completion(self.context.timing_mut(), op.name()) {
                    return Err(self.fatal(op.name(), anyhow::Error::new(fatal)));
                }
                if self.id == 0 {
                    let t = self.context.timing();
                    trace!(
                        "Invoke: {:?}, Respond: {:?}, Pause: {}",
                        t.invoke_time(),
                        t.respond_time(),
                        t.pause_time()
                    );
                }
                let phase = self.policy.classify(self.context.timing(), &self.coordinator);
                let sample = tx_sample(pending.operation, phase, self.context.timing());
                self.metrics.record_tx(&sample);
                self.record_delay(&pending, phase);
            }
            Err(err) => {
                // No abort is raised at this point, so a cancelled wait the
                // handler made up itself is a driver bug.
                if fatal_cause(&err).is_some() || is_run_aborted(&err) {
                    return Err(self.fatal(op.name(), err));
                }
                let now = self.timer.now_ns();
                let repair = repair_failed(
                    self.context.timing_mut(),
                    now,
                    self.policy.early_failure(),
                    (slot.previous_start, slot.previous_end),
                );
                if repair.open_request {
                    debug!("Potential open request in operation {}.", op.name());
                }
                if repair.skip {
                    debug!("{}: {} failed before its invoke time: {:#}", self.name(), op.name(), err);
                    return Ok(Flow::Continue);
                }
                let phase = self.policy.classify(self.context.timing(), &self.coordinator);
                let sample = tx_sample(pending.operation, phase, self.context.timing());
                self.metrics.record_error(&sample);
                debug!("{}: Error in {} ({}): {:#}", self.name(), op.name(), phase, err);
                if repair.delay_valid {
                    self.record_delay(&pending, phase);
                }
            }
        }

        let timing = self.context.timing();
        if let (Some(invoke), Some(respond)) = (timing.invoke_time(), timing.respond_time()) {
            slot.previous_start = invoke;
            slot.previous_end = respond;
        }
        if self.policy.stop_after(timing) {
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    fn record_delay(&mut self, pending: &Pending, phase: RunPhase) {
        let (Some(delay), Some(invoke)) = (pending.delay, self.context.timing().invoke_time()) else {
            return;
        };
        self.metrics.record_delay_time(&DelaySample {
            operation: delay.previous,
            phase,
            cycle_type: delay.cycle_type,
            targeted_ns: delay.targeted_ns,
            actual_ns: invoke.saturating_sub(pending.reference_ns),
        });
    }

    fn raise_abort(&self, operation: &str, message: &str) {
        self.coordinator.abort_run(AbortCause {
            thread_id: self.id,
            operation: operation.to_string(),
            message: message.to_string(),
        });
    }

    fn fatal(&self, operation: &str, cause: anyhow::Error) -> DriverError {
        let message = match fatal_cause(&cause) {
            Some(FatalError { message }) => message.clone(),
            None => cause.to_string(),
        };
        if self.coordinator.abort_run(AbortCause {
            thread_id: self.id,
            operation: operation.to_string(),
            message,
        }) {
            error!("{}: Fatal error in {}, aborting run: {:#}", self.name(), operation, cause);
        }
        DriverError::Fatal {
            thread_id: self.id,
            operation: operation.to_string(),
            cause,
        }
    }
}

fn tx_sample(operation: usize, phase: RunPhase, timing: &TimingInfo) -> TxSample {
    let intended_ns = timing.intended_invoke_time().unwrap_or_default();
    let invoke_ns = timing.invoke_time().unwrap_or(intended_ns);
    TxSample {
        operation,
        phase,
        intended_ns,
        invoke_ns,
        respond_ns: timing.respond_time().unwrap_or(invoke_ns),
        pause_ns: timing.pause_time(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::Cycle;
    use crate::driver::DriverBuilder;
    use crate::error::{FatalError, RunAborted};
    use crate::operation::OperationSpec;
    use crate::scheduler::cycle_thread::CyclePolicy;
    use crate::scheduler::time_thread::TimePolicy;
    use rand::SeedableRng;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorder {
        tx: Vec<TxSample>,
        errors: Vec<TxSample>,
        delays: Vec<DelaySample>,
    }

    impl MetricsSink for Recorder {
        fn record_tx(&mut self, sample: &TxSample) {
            self.tx.push(*sample);
        }

        fn record_error(&mut self, sample: &TxSample) {
            self.errors.push(*sample);
        }

        fn record_delay_time(&mut self, sample: &DelaySample) {
            self.delays.push(*sample);
        }
    }

    #[derive(Default)]
    struct Counter {
        calls: u64,
        marks: Vec<i64>,
    }

    fn started(coordinator: &RunCoordinator) {
        coordinator.fix_start_time(coordinator.timer().now_ns());
    }

    fn agent<P: RunPolicy>(
        driver: Driver<Counter>,
        policy: P,
    ) -> (AgentThread<Counter, P, Recorder>, Arc<RunCoordinator>) {
        let coordinator = Arc::new(RunCoordinator::new(Timer::new(), None));
        started(&coordinator);
        let agent = AgentThread::new(
            0,
            Arc::new(driver),
            Counter::default(),
            Arc::clone(&coordinator),
            policy,
            Recorder::default(),
            StdRng::seed_from_u64(99),
        );
        (agent, coordinator)
    }

    #[test]
    fn test_cycle_run_counts_exactly() {
        let driver = DriverBuilder::new("Counting", |_| Ok(Counter::default()))
            .default_cycle(Cycle::fixed(Duration::ZERO))
            .operation(OperationSpec::new("Tick").max90th(1.0), |c: &mut Counter, _| {
                c.calls += 1;
                Ok(())
            })
            .flat_mix(&[("Tick", 1.0)])
            .build()
            .unwrap();
        let (mut agent, _) = agent(driver, CyclePolicy::new(5, 10, 5, true));
        agent.run().unwrap();
        let (counter, recorder) = agent.into_parts();
        assert_eq!(counter.calls, 20);
        assert_eq!(recorder.tx.len(), 20);
        let steady = recorder.tx.iter().filter(|s| s.phase.is_steady_state()).count();
        assert_eq!(steady, 10);
        assert_eq!(recorder.delays.len(), 19);
    }

    #[test]
    fn test_operational_errors_absorbed() {
        let driver = DriverBuilder::new("Flaky", |_| Ok(Counter::default()))
            .default_cycle(Cycle::fixed(Duration::ZERO))
            .operation(OperationSpec::new("Flaky").max90th(1.0), |c: &mut Counter, _| {
                c.calls += 1;
                if c.calls % 2 == 0 {
                    anyhow::bail!("transient failure {}", c.calls);
                }
                Ok(())
            })
            .flat_mix(&[("Flaky", 1.0)])
            .build()
            .unwrap();
        let (mut agent, coordinator) = agent(driver, CyclePolicy::new(0, 10, 0, true));
        agent.run().unwrap();
        assert!(!coordinator.is_aborted());
        let (_, recorder) = agent.into_parts();
        assert_eq!(recorder.tx.len(), 5);
        assert_eq!(recorder.errors.len(), 5);
        assert!(recorder
            .errors
            .iter()
            .all(|s| s.respond_ns >= s.invoke_ns));
    }

    #[test]
    fn test_fatal_cause_aborts() {
        let driver = DriverBuilder::new("Fatal", |_| Ok(Counter::default()))
            .default_cycle(Cycle::fixed(Duration::ZERO))
            .operation(OperationSpec::new("Boom").max90th(1.0), |c: &mut Counter, _| {
                c.calls += 1;
                if c.calls == 3 {
                    return Err(anyhow::Error::new(FatalError::new("database lost"))
                        .context("Boom failed"));
                }
                Ok(())
            })
            .flat_mix(&[("Boom", 1.0)])
            .build()
            .unwrap();
        let (mut agent, coordinator) = agent(driver, CyclePolicy::new(0, 100, 0, true));
        let err = agent.run().unwrap_err();
        assert!(matches!(err, DriverError::Fatal { thread_id: 0, .. }));
        assert!(coordinator.is_aborted());
        assert_eq!(coordinator.abort_cause().unwrap().message, "database lost");
        assert_eq!(agent.metrics().tx.len(), 2);
    }

    #[test]
    fn test_manual_timing_missing_invoke_is_fatal() {
        let driver = DriverBuilder::new("Manual", |_| Ok(Counter::default()))
            .default_cycle(Cycle::fixed(Duration::ZERO))
            .operation(
                OperationSpec::new("Forgetful")
                    .max90th(1.0)
                    .timing(Timing::Manual),
                |_: &mut Counter, _| Ok(()),
            )
            .flat_mix(&[("Forgetful", 1.0)])
            .build()
            .unwrap();
        let (mut agent, coordinator) = agent(driver, CyclePolicy::new(0, 10, 0, true));
        assert!(matches!(agent.run(), Err(DriverError::Fatal { .. })));
        assert!(coordinator.is_aborted());
    }

    #[test]
    fn test_manual_timing_and_pause() {
        let driver = DriverBuilder::new("Manual", |_| Ok(Counter::default()))
            .default_cycle(Cycle::fixed(Duration::from_millis(1)))
            .operation(
                OperationSpec::new("Upload")
                    .max90th(1.0)
                    .timing(Timing::Manual),
                |_: &mut Counter, ctx: &mut DriverContext| {
                    ctx.record_time()?;
                    ctx.add_pause_time(1_000);
                    ctx.record_time()?;
                    Ok(())
                },
            )
            .flat_mix(&[("Upload", 1.0)])
            .build()
            .unwrap();
        let (mut agent, _) = agent(driver, CyclePolicy::new(0, 5, 0, true));
        agent.run().unwrap();
        let (_, recorder) = agent.into_parts();
        assert_eq!(recorder.tx.len(), 5);
        for sample in &recorder.tx {
            assert!(sample.invoke_ns >= sample.intended_ns);
            assert_eq!(sample.pause_ns, 1_000);
        }
    }

    #[test]
    fn test_failure_with_last_respond_promoted() {
        let driver = DriverBuilder::new("Open", |_| Ok(Counter::default()))
            .default_cycle(Cycle::fixed(Duration::ZERO))
            .operation(
                OperationSpec::new("Stream")
                    .max90th(1.0)
                    .timing(Timing::Manual),
                |c: &mut Counter, ctx: &mut DriverContext| {
                    ctx.record_time()?;
                    ctx.record_last_respond_time();
                    c.marks.push(ctx.timing().last_respond_time().unwrap());
                    anyhow::bail!("stream reset")
                },
            )
            .flat_mix(&[("Stream", 1.0)])
            .build()
            .unwrap();
        let (mut agent, _) = agent(driver, CyclePolicy::new(1, 1, 0, true));
        agent.run().unwrap();
        let (counter, recorder) = agent.into_parts();
        assert_eq!(recorder.errors.len(), 2);
        assert_eq!(recorder.errors[0].phase, RunPhase::RampUp);
        assert_eq!(recorder.errors[1].phase, RunPhase::SteadyState);
        let responds: Vec<i64> = recorder.errors.iter().map(|s| s.respond_ns).collect();
        assert_eq!(responds, counter.marks);
    }

    /// Fails before recording its invoke time on every even call, which is
    /// always one think time ahead of the previous response.
    fn refuses_every_other_call(c: &mut Counter, ctx: &mut DriverContext) -> anyhow::Result<()> {
        c.calls += 1;
        if c.calls % 2 == 0 {
            anyhow::bail!("connection refused");
        }
        ctx.record_time()?;
        ctx.record_time()?;
        Ok(())
    }

    fn early_failing_driver(cycle: Duration) -> Driver<Counter> {
        DriverBuilder::new("Early", |_| Ok(Counter::default()))
            .default_cycle(Cycle::fixed(cycle))
            .operation(
                OperationSpec::new("Connect")
                    .max90th(1.0)
                    .timing(Timing::Manual),
                refuses_every_other_call,
            )
            .flat_mix(&[("Connect", 1.0)])
            .build()
            .unwrap()
    }

    #[test]
    fn test_time_mode_skips_failure_before_intended_time() {
        let driver = early_failing_driver(Duration::from_millis(20));
        let policy = TimePolicy::new(Duration::ZERO, Duration::from_millis(200), Duration::ZERO, true);
        let (mut agent, _) = agent(driver, policy);
        agent.run().unwrap();
        let (counter, recorder) = agent.into_parts();
        assert!(recorder.errors.is_empty());
        assert!(recorder.tx.len() >= 3, "only {} transactions", recorder.tx.len());
        assert_eq!(recorder.tx.len() as u64, (counter.calls + 1) / 2);
        assert!(recorder.delays.len() <= recorder.tx.len());
    }

    #[test]
    fn test_cycle_mode_reuses_previous_times_for_early_failure() {
        let driver = early_failing_driver(Duration::from_millis(5));
        let (mut agent, _) = agent(driver, CyclePolicy::new(0, 6, 0, true));
        agent.run().unwrap();
        let (counter, recorder) = agent.into_parts();
        assert_eq!(counter.calls, 6);
        assert_eq!(recorder.tx.len(), 3);
        assert_eq!(recorder.errors.len(), 3);
        for (error, previous) in recorder.errors.iter().zip(&recorder.tx) {
            assert_eq!(error.invoke_ns, previous.invoke_ns);
            assert_eq!(error.respond_ns, previous.respond_ns);
        }
        // Reused times carry no valid delay, and the first call has none.
        assert_eq!(recorder.delays.len(), 2);
    }

    #[test]
    fn test_handler_run_aborted_without_abort_is_fatal() {
        let driver = DriverBuilder::new("Confused", |_| Ok(Counter::default()))
            .default_cycle(Cycle::fixed(Duration::ZERO))
            .operation(OperationSpec::new("Wait").max90th(1.0), |_: &mut Counter, _| {
                Err(RunAborted.into())
            })
            .flat_mix(&[("Wait", 1.0)])
            .build()
            .unwrap();
        let (mut agent, coordinator) = agent(driver, CyclePolicy::new(0, 10, 0, true));
        assert!(matches!(agent.run(), Err(DriverError::Fatal { thread_id: 0, .. })));
        assert!(coordinator.is_aborted());
        assert_eq!(coordinator.abort_cause().unwrap().operation, "Wait");
        assert!(agent.metrics().tx.is_empty());
    }

    #[test]
    fn test_no_samples_recorded_after_abort() {
        let driver = Arc::new(
            DriverBuilder::new("Racing", |_| Ok(Counter::default()))
                .default_cycle(Cycle::fixed(Duration::from_millis(1)))
                .operation(
                    OperationSpec::new("Step").max90th(1.0),
                    |c: &mut Counter, ctx: &mut DriverContext| {
                        c.calls += 1;
                        if ctx.thread_id() == 1 && c.calls == 20 {
                            return Err(FatalError::new("lost quorum").into());
                        }
                        Ok(())
                    },
                )
                .flat_mix(&[("Step", 1.0)])
                .build()
                .unwrap(),
        );
        let coordinator = Arc::new(RunCoordinator::new(Timer::new(), None));
        started(&coordinator);

        let began = Instant::now();
        let handles: Vec<_> = (0..3)
            .map(|id| {
                let driver = Arc::clone(&driver);
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || {
                    let policy =
                        TimePolicy::new(Duration::ZERO, Duration::from_secs(10), Duration::ZERO, true);
                    let mut agent = AgentThread::new(
                        id,
                        driver,
                        Counter::default(),
                        coordinator,
                        policy,
                        Recorder::default(),
                        StdRng::seed_from_u64(id as u64),
                    );
                    let failed = agent.run().is_err();
                    (failed, agent.into_parts().1)
                })
            })
            .collect();
        let results: Vec<(bool, Recorder)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(began.elapsed() < Duration::from_secs(5));

        let abort_ns = coordinator.abort_time().unwrap();
        assert_eq!(results.iter().filter(|(failed, _)| *failed).count(), 1);
        for (_, recorder) in &results {
            assert!(!recorder.tx.is_empty());
            for sample in &recorder.tx {
                assert!(sample.invoke_ns <= abort_ns);
                assert!(sample.respond_ns <= abort_ns);
            }
        }
    }

    #[test]
    fn test_background_slot_interleaves() {
        let driver = DriverBuilder::new("Mixed", |_| Ok(Counter::default()))
            .default_cycle(Cycle::fixed(Duration::from_millis(2)))
            .operation(OperationSpec::new("Fg").max90th(1.0), |_: &mut Counter, _| Ok(()))
            .background_operation(OperationSpec::new("Bg").max90th(1.0), |_: &mut Counter, _| {
                Ok(())
            })
            .background_timings(vec![Cycle::fixed(Duration::from_millis(10))])
            .flat_mix(&[("Fg", 1.0)])
            .build()
            .unwrap();
        let policy = TimePolicy::new(Duration::ZERO, Duration::from_millis(100), Duration::ZERO, true);
        let (mut agent, _) = agent(driver, policy);
        agent.run().unwrap();
        let (_, recorder) = agent.into_parts();
        let fg = recorder.tx.iter().filter(|s| s.operation == 0).count();
        let bg = recorder.tx.iter().filter(|s| s.operation == 1).count();
        assert!(bg >= 3, "background ran {} times", bg);
        assert!(fg > bg * 2, "foreground {} background {}", fg, bg);
    }
}
