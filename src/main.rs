//! # Workload Driver - Main Entry Point
//!
//! Runs a synthetic online-shop workload through the engine. It exercises both run
//! modes, auto and manual timing, operational errors and, in time mode, a
//! background mix.
//!
//! The main function performs these key operations:
//! 1. **Parse arguments**: Processes command-line configuration
//! 2. **Initialize logging**: Console or file output at the requested verbosity
//! 3. **Build the driver**: Defines and validates the demo workload
//! 4. **Run**: Executes the run described by the run control options
//! 5. **Report**: Prints per-operation counts and per-thread SLA compliance

use anyhow::{Context, Result};
use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use workload_driver::{
    benchmark::{BenchmarkRunner, RunControl, RunReport},
    cli::Args,
    cycle::{Cycle, CycleSpec, CycleType},
    driver::{Driver, DriverBuilder},
    logging,
    operation::{OperationSpec, TimeUnit, Timing},
    utils, DriverContext,
};

/// Per-thread state of the demo workload.
struct Shop {
    rng: StdRng,
    service_time: Duration,
    error_rate: f64,
}

impl Shop {
    fn serve(&mut self, operation: &str) -> Result<()> {
        thread::sleep(self.service_time);
        if self.error_rate > 0.0 && self.rng.gen_bool(self.error_rate) {
            anyhow::bail!("simulated {} timeout", operation);
        }
        Ok(())
    }
}

fn browse(shop: &mut Shop, _ctx: &mut DriverContext) -> Result<()> {
    shop.serve("browse")
}

fn search(shop: &mut Shop, _ctx: &mut DriverContext) -> Result<()> {
    shop.serve("search")
}

/// Times itself and excludes a simulated client-side pause from its response time.
fn purchase(shop: &mut Shop, ctx: &mut DriverContext) -> Result<()> {
    ctx.record_time()?;
    shop.serve("purchase")?;
    let pause = shop.service_time / 2;
    thread::sleep(pause);
    ctx.add_pause_time(i64::try_from(pause.as_nanos()).unwrap_or(i64::MAX));
    ctx.record_time()?;
    Ok(())
}

fn heartbeat(_shop: &mut Shop, _ctx: &mut DriverContext) -> Result<()> {
    Ok(())
}

fn build_driver(args: &Args, with_background: bool) -> Result<Driver<Shop>> {
    if !(0.0..=1.0).contains(&args.error_rate) {
        anyhow::bail!("Error rate must be within [0, 1], got {}", args.error_rate);
    }
    let think_time = if args.think_time.is_zero() {
        Cycle::fixed(Duration::ZERO)
    } else {
        Cycle::init(
            &CycleSpec::NegativeExponential {
                mean_ms: args.think_time.as_secs_f64() * 1_000.0,
                max_ms: None,
            },
            CycleType::ThinkTime,
            Cycle::DEFAULT_DEVIATION,
        )?
    };
    let service_time = args.service_time;
    let error_rate = args.error_rate;
    let seed = args.seed.unwrap_or_else(rand::random);

    let mut builder = DriverBuilder::new("ShopDriver", move |thread_id| {
        Ok(Shop {
            rng: StdRng::seed_from_u64(seed ^ thread_id as u64),
            service_time,
            error_rate,
        })
    })
    .percentiles(&["90th", "99th"])
    .response_time_unit(TimeUnit::Milliseconds)
    .default_cycle(think_time)
    .initial_delay(args.think_time)
    .operation(
        OperationSpec::new("Browse").percentile_limits(vec![50.0, 100.0]),
        browse,
    )
    .operation(
        OperationSpec::new("Search").percentile_limits(vec![50.0, 100.0]),
        search,
    )
    .operation(
        OperationSpec::new("Purchase")
            .percentile_limits(vec![100.0, 200.0])
            .timing(Timing::Manual),
        purchase,
    )
    .flat_mix(&[("Browse", 60.0), ("Search", 30.0), ("Purchase", 10.0)])
    .before_run(|_| {
        info!("Preparing shop catalogue");
        Ok(())
    });

    if with_background {
        builder = builder
            .background_operation(
                OperationSpec::new("Heartbeat")
                    .percentile_limits(vec![10.0, 10.0])
                    .count_to_metric(false),
                heartbeat,
            )
            .background_timings(vec![Cycle::fixed(Duration::from_secs(1))]);
    }

    builder.build().context("Invalid shop driver definition")
}

fn print_report(driver: &Driver<Shop>, report: &RunReport) {
    println!("-----------------------------------------------------------------");
    println!("Run {} of {}", report.run_id, report.driver);
    println!("  Elapsed:             {}", utils::format_duration(report.elapsed));
    println!("  Transactions:        {}", report.total_tx());
    println!("  Steady state:        {}", report.steady_state_tx());
    println!("  Errors:              {}", report.total_errors());

    for (index, operation) in driver.operations().iter().enumerate() {
        let stats: Vec<_> = report
            .metrics()
            .filter_map(|m| m.operation(index))
            .collect();
        let tx: u64 = stats.iter().map(|s| s.tx.total()).sum();
        let errors: u64 = stats.iter().map(|s| s.errors.total()).sum();
        let slowest_p90 = stats
            .iter()
            .filter(|s| s.response_histogram().len() > 0)
            .map(|s| s.response_histogram().value_at_quantile(0.9))
            .max();
        let p90 = slowest_p90.map_or_else(|| "-".to_string(), utils::format_duration_ns);
        println!(
            "  {:<12} tx {:>8}  errors {:>6}  slowest thread p90 {}",
            operation.name(),
            tx,
            errors,
            p90
        );
    }

    for metrics in report.metrics() {
        let compliance = metrics.check_compliance();
        if compliance.passed() {
            println!("  Thread {:>4}: passed", metrics.thread_id());
            continue;
        }
        println!("  Thread {:>4}: failed", metrics.thread_id());
        for check in compliance.response.iter().filter(|c| !c.passed) {
            println!(
                "    {} {} {:.3} exceeds limit {:.3}",
                check.operation, check.percentile, check.actual, check.limit
            );
        }
        for check in compliance.mix.iter().filter(|c| !c.passed) {
            println!(
                "    {} mix {:.2}% outside expected {:.2}%",
                check.operation,
                check.actual * 100.0,
                check.expected * 100.0
            );
        }
        for check in compliance.delay.iter().filter(|c| !c.passed) {
            println!(
                "    {} delay {} vs targeted {}",
                check.operation,
                utils::format_duration_ns(check.actual_ns as u64),
                utils::format_duration_ns(check.targeted_ns as u64)
            );
        }
    }
    println!("-----------------------------------------------------------------");
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init_logging(args.verbose, args.log_file.as_deref())?;

    info!("Starting Workload Driver {}", workload_driver::VERSION);
    debug!("Configuration: {:?}", args);
    debug!("Detected {} CPU cores", utils::get_cpu_cores());

    let control = RunControl::from_args(&args)?;
    let driver = Arc::new(build_driver(&args, control.mode.is_time())?);
    let runner = BenchmarkRunner::new(Arc::clone(&driver), control)?;

    let report = runner.run()?;
    print_report(&driver, &report);
    if report.is_aborted() {
        warn!("Run was aborted, results are incomplete");
    }
    report.into_result()?;
    Ok(())
}
