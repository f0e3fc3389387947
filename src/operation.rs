//! Operation descriptors and the percentile/time-unit vocabulary they are
//! validated against.

use crate::cycle::Cycle;
use crate::error::{DefinitionError, DefinitionResult};
use std::fmt;
use std::time::Duration;

/// Who captures invoke and respond times for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timing {
    /// The engine stamps wall time immediately around the handler call.
    #[default]
    Auto,
    /// The handler reports its own times through the `DriverContext`.
    Manual,
}

/// Units used for response-time limits and histogram reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimeUnit {
    /// Nanoseconds in one unit.
    pub fn nanos(self) -> u64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
        }
    }

    /// Express `nanos` in this unit.
    pub fn from_nanos(self, nanos: u64) -> f64 {
        nanos as f64 / self.nanos() as f64
    }

    pub fn to_duration(self, value: f64) -> Duration {
        Duration::from_nanos((value.max(0.0) * self.nanos() as f64) as u64)
    }
}

/// A driver-level percentile, e.g. `90th` or `99.9%`.
#[derive(Debug, Clone, PartialEq)]
pub struct Percentile {
    value: f64,
    label: String,
    suffix: Option<String>,
}

impl Percentile {
    /// Parse a percentile label, accepting an optional `%` and an ordinal suffix.
    pub fn parse(label: &str) -> DefinitionResult<Self> {
        let trimmed = label.trim();
        let without_pct = trimmed.strip_suffix('%').unwrap_or(trimmed);

        let mut number = without_pct;
        let mut suffix = None;
        if without_pct
            .chars()
            .last()
            .is_some_and(|c| !c.is_ascii_digit())
        {
            let split = without_pct.len().saturating_sub(2);
            let (head, tail) = without_pct.split_at(
                if without_pct.is_char_boundary(split) {
                    split
                } else {
                    0
                },
            );
            if !matches!(tail, "th" | "st" | "nd" | "rd") {
                return Err(DefinitionError::PercentileSuffix {
                    label: label.to_string(),
                    suffix: tail.to_string(),
                });
            }
            number = head;
            suffix = Some(tail.to_string());
        }

        let value: f64 = number
            .parse()
            .map_err(|_| DefinitionError::PercentileNotANumber {
                label: number.to_string(),
            })?;
        if !(value > 0.0 && value < 100.0) {
            return Err(DefinitionError::PercentileRange {
                label: number.to_string(),
            });
        }
        Ok(Self {
            value,
            label: number.to_string(),
            suffix,
        })
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Numeric part as written in the definition.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }
}

impl fmt::Display for Percentile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.label, self.suffix.as_deref().unwrap_or("%"))
    }
}

/// Operation metadata as declared, before a distribution is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSpec {
    pub name: String,
    /// One limit per driver percentile, in the driver's response time unit.
    /// A limit `<= 0` leaves that percentile unbounded.
    pub percentile_limits: Vec<f64>,
    /// Legacy single 90th percentile limit, used when the driver declares no percentiles.
    pub max90th: f64,
    pub timing: Timing,
    pub count_to_metric: bool,
    pub cycle: Option<Cycle>,
}

impl OperationSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            percentile_limits: Vec::new(),
            max90th: 0.0,
            timing: Timing::Auto,
            count_to_metric: true,
            cycle: None,
        }
    }

    pub fn percentile_limits(mut self, limits: impl Into<Vec<f64>>) -> Self {
        self.percentile_limits = limits.into();
        self
    }

    pub fn max90th(mut self, limit: f64) -> Self {
        self.max90th = limit;
        self
    }

    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn count_to_metric(mut self, count: bool) -> Self {
        self.count_to_metric = count;
        self
    }

    pub fn cycle(mut self, cycle: Cycle) -> Self {
        self.cycle = Some(cycle);
        self
    }
}

/// An immutable, fully resolved operation descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    name: String,
    percentile_limits: Vec<f64>,
    max90th: f64,
    timing: Timing,
    count_to_metric: bool,
    cycle: Cycle,
}

impl Operation {
    /// Resolve a declared operation against its driver.
    ///
    /// The limit list must match the driver's percentile set in length. The
    /// distribution is the operation's own, else `default_cycle`.
    pub fn new(
        spec: &OperationSpec,
        percentiles: &[Percentile],
        default_cycle: Option<&Cycle>,
    ) -> DefinitionResult<Self> {
        if spec.percentile_limits.len() != percentiles.len() {
            return Err(DefinitionError::PercentileLimitCount {
                operation: spec.name.clone(),
                expected: percentiles.len(),
                actual: spec.percentile_limits.len(),
            });
        }
        let cycle = spec
            .cycle
            .clone()
            .or_else(|| default_cycle.cloned())
            .ok_or_else(|| DefinitionError::NoCycle {
                operation: spec.name.clone(),
            })?;
        Ok(Self {
            name: spec.name.clone(),
            percentile_limits: spec.percentile_limits.clone(),
            max90th: spec.max90th,
            timing: spec.timing,
            count_to_metric: spec.count_to_metric,
            cycle,
        })
    }

    /// Same operation bound to a different distribution.
    pub(crate) fn with_cycle(mut self, cycle: Cycle) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn percentile_limits(&self) -> &[f64] {
        &self.percentile_limits
    }

    pub fn max90th(&self) -> f64 {
        self.max90th
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn count_to_metric(&self) -> bool {
        self.count_to_metric
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn percentiles(labels: &[&str]) -> Vec<Percentile> {
        labels.iter().map(|l| Percentile::parse(l).unwrap()).collect()
    }

    #[test]
    fn test_percentile_parse_forms() {
        let p = Percentile::parse("90th").unwrap();
        assert_eq!(p.value(), 90.0);
        assert_eq!(p.suffix(), Some("th"));
        assert_eq!(p.to_string(), "90th");

        let p = Percentile::parse("99.9%").unwrap();
        assert_eq!(p.value(), 99.9);
        assert_eq!(p.suffix(), None);
        assert_eq!(p.to_string(), "99.9%");

        assert_eq!(Percentile::parse("95").unwrap().value(), 95.0);
        assert_eq!(Percentile::parse("21st%").unwrap().suffix(), Some("st"));
    }

    #[test]
    fn test_percentile_parse_rejects() {
        assert!(matches!(
            Percentile::parse("90xy"),
            Err(DefinitionError::PercentileSuffix { .. })
        ));
        assert!(matches!(
            Percentile::parse("abcth"),
            Err(DefinitionError::PercentileNotANumber { .. })
        ));
        assert!(matches!(
            Percentile::parse("100"),
            Err(DefinitionError::PercentileRange { .. })
        ));
        assert!(matches!(
            Percentile::parse("0th"),
            Err(DefinitionError::PercentileRange { .. })
        ));
    }

    #[test]
    fn test_operation_limits_match_percentiles() {
        let pcts = percentiles(&["90th", "99th"]);
        let spec = OperationSpec::new("Login")
            .percentile_limits(vec![0.5, 1.0])
            .cycle(Cycle::fixed(Duration::from_millis(10)));
        let op = Operation::new(&spec, &pcts, None).unwrap();
        assert_eq!(op.name(), "Login");
        assert_eq!(op.percentile_limits(), &[0.5, 1.0]);
    }

    #[test]
    fn test_operation_limit_length_mismatch() {
        let pcts = percentiles(&["90th", "99th", "99.9th"]);
        let spec = OperationSpec::new("Login")
            .percentile_limits(vec![0.5, 1.0])
            .cycle(Cycle::fixed(Duration::ZERO));
        assert_eq!(
            Operation::new(&spec, &pcts, None),
            Err(DefinitionError::PercentileLimitCount {
                operation: "Login".to_string(),
                expected: 3,
                actual: 2,
            })
        );
    }

    #[test]
    fn test_operation_cycle_resolution() {
        let default = Cycle::fixed(Duration::from_millis(7));
        let spec = OperationSpec::new("Browse").max90th(2.0);
        let op = Operation::new(&spec, &[], Some(&default)).unwrap();
        assert_eq!(op.cycle(), &default);

        assert_eq!(
            Operation::new(&spec, &[], None),
            Err(DefinitionError::NoCycle {
                operation: "Browse".to_string()
            })
        );
    }

    #[test]
    fn test_time_unit_conversions() {
        assert_eq!(TimeUnit::Milliseconds.from_nanos(2_500_000), 2.5);
        assert_eq!(
            TimeUnit::Seconds.to_duration(1.5),
            Duration::from_millis(1500)
        );
    }
}
