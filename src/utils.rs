//! # Utility Functions and Helper Module
//!
//! Helpers shared by the run orchestration and the command-line front end.
//!
//! ## Key Functionality Categories
//!
//! - **Formatting**: Human-readable display of durations
//! - **Validation**: Run control parameter validation with clear error messages
//! - **Parsing**: Phase lengths given as cycle counts or durations
//! - **System Information**: CPU core detection and core ids for thread pinning
//!
//! ## Usage Examples
//!
//! ```rust
//! use workload_driver::utils::*;
//! use std::time::Duration;
//!
//! let duration_str = format_duration(Duration::from_micros(1500));
//! assert_eq!(duration_str, "1.50ms");
//!
//! # fn main() -> anyhow::Result<()> {
//! validate_threads(16)?;
//! assert_eq!(parse_cycles("steady-state", "1000")?, 1000);
//! # Ok(())
//! # }
//! ```

use crate::benchmark::RunMode;
use anyhow::{Context, Result};
use core_affinity::CoreId;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound on driver threads in a single run.
pub const MAX_THREADS: usize = 10_000;

/// Generate a unique run identifier
///
/// ## Returns
/// String representation of a UUID v4 (e.g., "550e8400-e29b-41d4-a716-446655440000")
///
/// Used to tag the start and end log lines of a run and the [`crate::benchmark::RunReport`].
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format nanoseconds in a human-readable way
///
/// ## Examples
///
/// ```rust
/// # use workload_driver::utils::format_duration_ns;
/// assert_eq!(format_duration_ns(500), "500ns");
/// assert_eq!(format_duration_ns(1500), "1.50μs");
/// assert_eq!(format_duration_ns(1500000), "1.50ms");
/// ```
pub fn format_duration_ns(ns: u64) -> String {
    format_duration(Duration::from_nanos(ns))
}

/// Format a duration in a human-readable way
///
/// ## Unit Selection Logic
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s", "2h 15m 30s")
///
/// ## Examples
///
/// ```rust
/// # use workload_driver::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Validate a fixed thread count
///
/// ## Validation Rules
///
/// - **Minimum**: 1 thread
/// - **Maximum**: [`MAX_THREADS`]
pub fn validate_threads(threads: usize) -> Result<()> {
    if threads == 0 {
        anyhow::bail!("Thread count cannot be zero");
    }
    if threads > MAX_THREADS {
        anyhow::bail!(
            "Thread count {} is too high (maximum {})",
            threads,
            MAX_THREADS
        );
    }
    Ok(())
}

pub fn validate_scale(scale: u32) -> Result<()> {
    if scale == 0 {
        anyhow::bail!("Scale cannot be zero");
    }
    Ok(())
}

/// Reject runs without a steady state. Ramp-up and ramp-down may be empty.
pub fn validate_steady_state(mode: &RunMode) -> Result<()> {
    let empty = match mode {
        RunMode::Cycles { steady_state, .. } => *steady_state == 0,
        RunMode::Time { steady_state, .. } => steady_state.is_zero(),
    };
    if empty {
        anyhow::bail!("Steady state cannot be empty");
    }
    Ok(())
}

/// Parse a phase length given in cycles.
pub fn parse_cycles(phase: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("Invalid {} cycle count: {}", phase, value))
}

/// Parse a phase length given as a duration such as "10s" or "500ms".
pub fn parse_phase_duration(phase: &str, value: &str) -> Result<Duration> {
    crate::cli::parse_duration(value)
        .map_err(|msg| anyhow::anyhow!(msg))
        .with_context(|| format!("Invalid {} duration", phase))
}

/// Get the number of CPU cores available
pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}

/// Core ids available for thread pinning. Empty when the platform does not
/// report them.
pub fn core_ids() -> Vec<CoreId> {
    match core_affinity::get_core_ids() {
        Some(cores) if !cores.is_empty() => cores,
        _ => {
            tracing::warn!("Failed to get core IDs, skipping thread pinning");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
        assert_eq!(format_duration(Duration::from_nanos(1500)), "1.50μs");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(format_duration_ns(2_500_000), "2.50ms");
    }

    #[test]
    fn test_validate_threads() {
        assert!(validate_threads(1).is_ok());
        assert!(validate_threads(MAX_THREADS).is_ok());
        assert!(validate_threads(0).is_err());
        assert!(validate_threads(MAX_THREADS + 1).is_err());
        assert!(validate_scale(0).is_err());
        assert!(validate_scale(5).is_ok());
    }

    #[test]
    fn test_validate_steady_state() {
        assert!(validate_steady_state(&RunMode::Cycles {
            ramp_up: 10,
            steady_state: 0,
            ramp_down: 10,
        })
        .is_err());
        assert!(validate_steady_state(&RunMode::Time {
            ramp_up: Duration::ZERO,
            steady_state: Duration::from_secs(1),
            ramp_down: Duration::ZERO,
        })
        .is_ok());
    }

    #[test]
    fn test_parse_phase_lengths() {
        assert_eq!(parse_cycles("ramp-up", " 250 ").unwrap(), 250);
        assert!(parse_cycles("ramp-up", "10s").is_err());
        assert_eq!(
            parse_phase_duration("ramp-up", "500ms").unwrap(),
            Duration::from_millis(500)
        );
        let err = parse_phase_duration("ramp-down", "soon").unwrap_err();
        assert!(format!("{:#}", err).contains("ramp-down"));
    }

    #[test]
    fn test_get_cpu_cores() {
        assert!(get_cpu_cores() > 0);
    }
}
