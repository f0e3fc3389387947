use crate::coordination::{LoadLevel, LoadSchedule};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Workload Driver - drives a timed operation mix across concurrent virtual users
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// How run phases are measured
    #[clap(short = 'm', long, value_enum, default_value_t = RunModeArg::Time, help_heading = "Run Control")]
    pub mode: RunModeArg,

    /// Ramp-up length: a cycle count in cycles mode, a duration (e.g. "10s") in time mode
    #[clap(long, default_value = crate::defaults::RAMP_UP, help_heading = "Run Control")]
    pub ramp_up: String,

    /// Steady state length: a cycle count in cycles mode, a duration in time mode
    #[clap(long, default_value = crate::defaults::STEADY_STATE, help_heading = "Run Control")]
    pub steady_state: String,

    /// Ramp-down length: a cycle count in cycles mode, a duration in time mode
    #[clap(long, default_value = crate::defaults::RAMP_DOWN, help_heading = "Run Control")]
    pub ramp_down: String,

    /// Number of driver threads (takes precedence over scale)
    #[clap(short = 't', long, help_heading = "Run Control")]
    pub threads: Option<usize>,

    /// Scale factor, converted to threads through the driver's threads per scale
    #[clap(short = 's', long, default_value_t = crate::defaults::SCALE, help_heading = "Run Control")]
    pub scale: u32,

    /// Hold every thread until the coordinated start time
    #[clap(long, default_value_t = false, help_heading = "Run Control")]
    pub simultaneous_start: bool,

    /// Delay between all threads being ready and the start time
    #[clap(long, value_parser = parse_duration, default_value = crate::defaults::START_DELAY, help_heading = "Run Control")]
    pub start_delay: Duration,

    /// Thread counts over time, e.g. "10s:4,20s:8". Time mode only
    #[clap(long, value_parser = parse_load_schedule, help_heading = "Run Control")]
    pub variable_load: Option<LoadSchedule>,

    /// Base seed for the per-thread random generators
    #[clap(long, help_heading = "Run Control")]
    pub seed: Option<u64>,

    /// Pin driver threads to CPU cores, round-robin
    #[clap(long, default_value_t = false, help_heading = "Run Control")]
    pub pin_threads: bool,

    /// Mean think time between operations of the demo workload
    #[clap(long, value_parser = parse_duration, default_value = crate::defaults::THINK_TIME, help_heading = "Demo Workload")]
    pub think_time: Duration,

    /// Simulated service time of each demo operation
    #[clap(long, value_parser = parse_duration, default_value = crate::defaults::SERVICE_TIME, help_heading = "Demo Workload")]
    pub service_time: Duration,

    /// Fraction of demo operations that fail with an operational error
    #[clap(long, default_value_t = 0.0, help_heading = "Demo Workload")]
    pub error_rate: f64,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = clap::ArgAction::Count, help_heading = "Output")]
    pub verbose: u8,

    /// Write logs to this file instead of the console
    #[clap(long, help_heading = "Output")]
    pub log_file: Option<PathBuf>,
}

/// Run phase measurement selected on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RunModeArg {
    /// Phases are counted in completed cycles
    #[clap(name = "cycles")]
    Cycles,

    /// Phases are measured in wall-clock time
    #[clap(name = "time")]
    Time,
}

impl std::fmt::Display for RunModeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunModeArg::Cycles => write!(f, "Cycles"),
            RunModeArg::Time => write!(f, "Time"),
        }
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h", "250ms")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be non-negative: {}", s));
    }

    let seconds = match unit {
        "ms" => num / 1_000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(Duration::from_secs_f64(seconds))
}

/// Parse a variable-load schedule: comma-separated `duration:threads` levels.
fn parse_load_schedule(s: &str) -> Result<LoadSchedule, String> {
    let mut levels = Vec::new();
    for level in s.split(',').map(str::trim).filter(|l| !l.is_empty()) {
        let (duration, threads) = level
            .split_once(':')
            .ok_or_else(|| format!("Load level must be duration:threads, got {}", level))?;
        let threads = threads
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("Invalid thread count in load level: {}", level))?;
        levels.push(LoadLevel {
            duration: parse_duration(duration)?,
            threads,
        });
    }
    LoadSchedule::new(levels).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_load_schedule() {
        let schedule = parse_load_schedule("10s:4, 500ms:8").unwrap();
        assert_eq!(
            schedule.levels(),
            &[
                LoadLevel {
                    duration: Duration::from_secs(10),
                    threads: 4,
                },
                LoadLevel {
                    duration: Duration::from_millis(500),
                    threads: 8,
                },
            ]
        );
        assert!(parse_load_schedule("").is_err());
        assert!(parse_load_schedule("10s").is_err());
        assert!(parse_load_schedule("10s:x").is_err());
        assert!(parse_load_schedule("0s:2").is_err());
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["workload-driver"]);
        assert_eq!(args.mode, RunModeArg::Time);
        assert_eq!(args.scale, crate::defaults::SCALE);
        assert!(args.threads.is_none());
        assert!(args.variable_load.is_none());
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_args_cycle_mode() {
        let args = Args::parse_from([
            "workload-driver",
            "-m",
            "cycles",
            "--ramp-up",
            "10",
            "--steady-state",
            "100",
            "--ramp-down",
            "5",
            "-t",
            "4",
            "--simultaneous-start",
            "-vv",
        ]);
        assert_eq!(args.mode, RunModeArg::Cycles);
        assert_eq!(args.threads, Some(4));
        assert!(args.simultaneous_start);
        assert_eq!(args.verbose, 2);
    }
}
