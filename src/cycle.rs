//! # Delay Distributions
//!
//! A [`Cycle`] models the cycle time or think time between two operations of one
//! virtual user. Distributions are built once while a driver is defined, are
//! immutable afterwards, and are shared read-only by every thread. Drawing a delay
//! is a pure function of the caller's random source, so each thread keeps its own
//! `StdRng` and the same seed always yields the same delays.
//!
//! ## Supported shapes
//!
//! - **Fixed time**: the same delay on every draw
//! - **Uniform**: drawn uniformly over `[min, max]`
//! - **Negative exponential**: exponential with the given mean, truncated at `max`
//!
//! ## Cycle type
//!
//! [`CycleType::CycleTime`] measures the delay from the *invoke* time of the previous
//! operation, giving a fixed arrival rate. [`CycleType::ThinkTime`] measures it from
//! the previous *respond* time, modelling a user who pauses after each reply.

use crate::error::{DefinitionError, DefinitionResult};
use rand::Rng;
use rand_distr::{Distribution, Exp};
use std::time::Duration;

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Reference point a delay is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleType {
    /// Delay counts from the previous operation's invoke time.
    CycleTime,
    /// Delay counts from the previous operation's respond time.
    #[default]
    ThinkTime,
}

/// Declarative distribution parameters, in milliseconds, as a workload loader
/// would produce them. Validated and bound by [`Cycle::init`].
#[derive(Debug, Clone, PartialEq)]
pub enum CycleSpec {
    FixedTime {
        cycle_time_ms: f64,
    },
    Uniform {
        min_ms: f64,
        max_ms: f64,
    },
    NegativeExponential {
        mean_ms: f64,
        /// Truncation bound; `None` selects five times the mean.
        max_ms: Option<f64>,
    },
}

/// Bound distribution shape.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleKind {
    FixedTime { cycle_time: Duration },
    Uniform { min: Duration, max: Duration },
    NegativeExponential { mean: Duration, max: Duration },
}

/// An immutable delay distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    kind: CycleKind,
    cycle_type: CycleType,
    deviation: f64,
}

impl Cycle {
    /// Default allowed deviation, in percent.
    pub const DEFAULT_DEVIATION: f64 = 5.0;

    /// Validate `spec` and bind it into a distribution.
    pub fn init(spec: &CycleSpec, cycle_type: CycleType, deviation: f64) -> DefinitionResult<Self> {
        if !deviation.is_finite() || !(0.0..100.0).contains(&deviation) {
            return Err(DefinitionError::Deviation { value: deviation });
        }
        let kind = match *spec {
            CycleSpec::FixedTime { cycle_time_ms } => CycleKind::FixedTime {
                cycle_time: millis("cycle_time", cycle_time_ms)?,
            },
            CycleSpec::Uniform { min_ms, max_ms } => {
                let min = millis("cycle_min", min_ms)?;
                let max = millis("cycle_max", max_ms)?;
                if min > max {
                    return Err(DefinitionError::InvertedBounds {
                        min: min_ms,
                        max: max_ms,
                    });
                }
                CycleKind::Uniform { min, max }
            }
            CycleSpec::NegativeExponential { mean_ms, max_ms } => {
                let mean = millis("cycle_mean", mean_ms)?;
                let max = match max_ms {
                    Some(max_ms) => millis("cycle_max", max_ms)?,
                    None => mean * 5,
                };
                if mean > max {
                    return Err(DefinitionError::InvertedBounds {
                        min: mean_ms,
                        max: max_ms.unwrap_or_default(),
                    });
                }
                CycleKind::NegativeExponential { mean, max }
            }
        };
        Ok(Self {
            kind,
            cycle_type,
            deviation,
        })
    }

    /// A fixed delay measured as think time with the default deviation.
    pub fn fixed(cycle_time: Duration) -> Self {
        Self {
            kind: CycleKind::FixedTime { cycle_time },
            cycle_type: CycleType::ThinkTime,
            deviation: Self::DEFAULT_DEVIATION,
        }
    }

    /// Delay applied before the first operation of a mix.
    ///
    /// A non-positive `max` means no initial delay; otherwise the delay is uniform
    /// over `[0, max]`. Both are cycle-time based with zero deviation.
    pub fn initial_delay(max: Duration) -> Self {
        let kind = if max.is_zero() {
            CycleKind::FixedTime {
                cycle_time: Duration::ZERO,
            }
        } else {
            CycleKind::Uniform {
                min: Duration::ZERO,
                max,
            }
        };
        Self {
            kind,
            cycle_type: CycleType::CycleTime,
            deviation: 0.0,
        }
    }

    pub fn kind(&self) -> &CycleKind {
        &self.kind
    }

    pub fn cycle_type(&self) -> CycleType {
        self.cycle_type
    }

    pub fn deviation(&self) -> f64 {
        self.deviation
    }

    /// Draw the next delay from the thread's random source.
    pub fn delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match self.kind {
            CycleKind::FixedTime { cycle_time } => cycle_time,
            CycleKind::Uniform { min, max } => {
                if min == max {
                    return min;
                }
                let nanos = rng.gen_range(nanos(min)..=nanos(max));
                Duration::from_nanos(nanos)
            }
            CycleKind::NegativeExponential { mean, max } => {
                if mean.is_zero() {
                    return Duration::ZERO;
                }
                let lambda = 1.0 / mean.as_nanos() as f64;
                let draw = match Exp::new(lambda) {
                    Ok(exp) => exp.sample(rng),
                    Err(_) => 0.0,
                };
                let capped = draw.min(max.as_nanos() as f64).max(0.0);
                Duration::from_nanos(capped as u64)
            }
        }
    }

    /// Delay in nanoseconds, as used by the engine's timestamp arithmetic.
    pub fn delay_ns<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        i64::try_from(self.delay(rng).as_nanos()).unwrap_or(i64::MAX)
    }

    /// Upper bound used to size delay histograms, independent of any draw.
    pub fn histogram_max(&self) -> Duration {
        match self.kind {
            CycleKind::FixedTime { cycle_time } => cycle_time * 2,
            CycleKind::Uniform { max, .. } => max,
            CycleKind::NegativeExponential { max, .. } => max,
        }
    }
}

fn millis(field: &'static str, value: f64) -> DefinitionResult<Duration> {
    if !value.is_finite() {
        return Err(DefinitionError::NonFinite { field, value });
    }
    if value < 0.0 {
        return Err(DefinitionError::NegativeBound { field, value });
    }
    Ok(Duration::from_nanos((value * NANOS_PER_MILLI).round() as u64))
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn all_kinds() -> Vec<Cycle> {
        vec![
            Cycle::init(
                &CycleSpec::FixedTime { cycle_time_ms: 25.0 },
                CycleType::ThinkTime,
                5.0,
            )
            .unwrap(),
            Cycle::init(
                &CycleSpec::Uniform {
                    min_ms: 1.0,
                    max_ms: 9.0,
                },
                CycleType::CycleTime,
                2.0,
            )
            .unwrap(),
            Cycle::init(
                &CycleSpec::NegativeExponential {
                    mean_ms: 3.0,
                    max_ms: None,
                },
                CycleType::ThinkTime,
                5.0,
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_delay_is_deterministic_for_seed() {
        for cycle in all_kinds() {
            let mut a = StdRng::seed_from_u64(42);
            let mut b = StdRng::seed_from_u64(42);
            let first: Vec<Duration> = (0..100).map(|_| cycle.delay(&mut a)).collect();
            let second: Vec<Duration> = (0..100).map(|_| cycle.delay(&mut b)).collect();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_delay_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for cycle in all_kinds() {
            for _ in 0..5_000 {
                let delay = cycle.delay(&mut rng);
                assert!(delay <= cycle.histogram_max().max(Duration::from_millis(25)));
                assert!(cycle.delay_ns(&mut rng) >= 0);
            }
        }
    }

    #[test]
    fn test_uniform_covers_range() {
        let cycle = Cycle::init(
            &CycleSpec::Uniform {
                min_ms: 10.0,
                max_ms: 20.0,
            },
            CycleType::ThinkTime,
            5.0,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let draws: Vec<Duration> = (0..10_000).map(|_| cycle.delay(&mut rng)).collect();
        assert!(draws.iter().all(|d| *d >= Duration::from_millis(10)));
        assert!(draws.iter().all(|d| *d <= Duration::from_millis(20)));
        let mean_ms =
            draws.iter().map(|d| d.as_secs_f64() * 1000.0).sum::<f64>() / draws.len() as f64;
        assert!((mean_ms - 15.0).abs() < 0.5, "mean was {}", mean_ms);
    }

    #[test]
    fn test_negative_exponential_truncated() {
        let cycle = Cycle::init(
            &CycleSpec::NegativeExponential {
                mean_ms: 2.0,
                max_ms: Some(4.0),
            },
            CycleType::ThinkTime,
            5.0,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!((0..10_000).all(|_| cycle.delay(&mut rng) <= Duration::from_millis(4)));
        assert_eq!(cycle.histogram_max(), Duration::from_millis(4));
    }

    #[test]
    fn test_init_rejects_out_of_range() {
        assert_eq!(
            Cycle::init(
                &CycleSpec::FixedTime { cycle_time_ms: -1.0 },
                CycleType::ThinkTime,
                5.0
            ),
            Err(DefinitionError::NegativeBound {
                field: "cycle_time",
                value: -1.0
            })
        );
        assert!(matches!(
            Cycle::init(
                &CycleSpec::Uniform {
                    min_ms: 5.0,
                    max_ms: 1.0
                },
                CycleType::ThinkTime,
                5.0
            ),
            Err(DefinitionError::InvertedBounds { .. })
        ));
        assert!(matches!(
            Cycle::init(
                &CycleSpec::FixedTime { cycle_time_ms: 1.0 },
                CycleType::ThinkTime,
                100.0
            ),
            Err(DefinitionError::Deviation { .. })
        ));
        assert!(matches!(
            Cycle::init(
                &CycleSpec::Uniform {
                    min_ms: f64::NAN,
                    max_ms: 1.0
                },
                CycleType::ThinkTime,
                5.0
            ),
            Err(DefinitionError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_histogram_max_independent_of_draws() {
        let fixed = Cycle::fixed(Duration::from_millis(50));
        assert_eq!(fixed.histogram_max(), Duration::from_millis(100));
        let mut rng = StdRng::seed_from_u64(9);
        let _ = fixed.delay(&mut rng);
        assert_eq!(fixed.histogram_max(), Duration::from_millis(100));
    }

    #[test]
    fn test_initial_delay_shapes() {
        let none = Cycle::initial_delay(Duration::ZERO);
        assert_eq!(
            none.kind(),
            &CycleKind::FixedTime {
                cycle_time: Duration::ZERO
            }
        );
        assert_eq!(none.cycle_type(), CycleType::CycleTime);
        let some = Cycle::initial_delay(Duration::from_millis(30));
        assert_eq!(
            some.kind(),
            &CycleKind::Uniform {
                min: Duration::ZERO,
                max: Duration::from_millis(30)
            }
        );
    }
}
