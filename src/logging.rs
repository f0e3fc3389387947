//! Log output setup.
//!
//! Console output is coloured by level and carries no metadata. File output
//! uses the plain `tracing-subscriber` format with timestamps, thread names and
//! span context, written through a non-blocking appender.

use anyhow::{anyhow, Result};
use colored::*;
use std::fmt;
use std::path::Path;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// A tracing event formatter that colours each log line by its level.
///
/// Only the event fields are printed, so console output stays readable while
/// a run is in progress.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Buffer the fields so the whole line gets one colour.
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

/// Filter for a given `-v` count. Without `-v`, `RUST_LOG` applies, falling
/// back to `info`.
pub fn verbosity_filter(verbosity: u8) -> EnvFilter {
    match verbosity {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

/// Install the global subscriber.
///
/// ## Returns
/// - `Ok(Some(guard))`: Logging to `log_file`. Keep the guard alive until exit
///   so buffered lines are flushed.
/// - `Ok(None)`: Logging to stderr
/// - `Err(anyhow::Error)`: The path has no file name or a subscriber is
///   already installed
pub fn init_logging(verbosity: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = verbosity_filter(verbosity);
    match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow!("Log file path {} has no file name", path.display()))?;
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .event_format(ColorizedFormatter)
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_without_name_is_rejected() {
        let err = init_logging(0, Some(Path::new("/"))).unwrap_err();
        assert!(err.to_string().contains("no file name"));
    }

    #[test]
    fn test_verbosity_filter_levels() {
        use tracing_subscriber::filter::LevelFilter;

        assert_eq!(verbosity_filter(1).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(verbosity_filter(2).max_level_hint(), Some(LevelFilter::TRACE));
        assert_eq!(verbosity_filter(5).max_level_hint(), Some(LevelFilter::TRACE));
    }
}
