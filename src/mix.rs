//! # Operation Mixes
//!
//! A [`Mix`] is the shared, read-only definition of how a virtual user chooses its
//! next operation. Each thread obtains its own [`Selector`] through
//! [`Mix::selector`], seeded from the thread's random stream, so selection stays
//! statistically independent across threads while the definition is shared.
//!
//! Operation indices returned by a selector address the driver's flat operation
//! array (foreground operations first, then background ones).

use crate::error::{DefinitionError, DefinitionResult};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default allowed mix deviation, in percent.
pub const DEFAULT_MIX_DEVIATION: f64 = 2.0;

/// Mix shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum MixKind {
    /// Independent weighted draws.
    Flat { weights: Vec<f64> },
    /// Operations run in declaration order, wrapping around.
    FixedSequence,
}

/// A shared mix definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Mix {
    operations: Vec<usize>,
    kind: MixKind,
    index: Option<WeightedIndex<f64>>,
    deviation: f64,
}

impl Mix {
    /// Weighted mix over `operations` (driver-wide indices).
    ///
    /// Weights are normalized so they sum to one.
    pub fn flat(operations: Vec<usize>, weights: &[f64], names: &[&str]) -> DefinitionResult<Self> {
        if operations.is_empty() {
            return Err(DefinitionError::EmptyMix);
        }
        if operations.len() != weights.len() {
            return Err(DefinitionError::MixLengthMismatch {
                operations: operations.len(),
                weights: weights.len(),
            });
        }
        for (i, &weight) in weights.iter().enumerate() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(DefinitionError::InvalidWeight {
                    name: names.get(i).copied().unwrap_or("?").to_string(),
                    weight,
                });
            }
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(DefinitionError::ZeroWeights);
        }
        let weights: Vec<f64> = weights.iter().map(|w| w / total).collect();
        let index = WeightedIndex::new(weights.iter().copied())
            .map_err(|e| DefinitionError::WeightedMix { reason: e.to_string() })?;
        Ok(Self {
            operations,
            kind: MixKind::Flat { weights },
            index: Some(index),
            deviation: DEFAULT_MIX_DEVIATION,
        })
    }

    /// Fixed round-robin sequence, as used for background work.
    pub fn fixed_sequence(operations: Vec<usize>) -> DefinitionResult<Self> {
        if operations.is_empty() {
            return Err(DefinitionError::EmptyMix);
        }
        Ok(Self {
            operations,
            kind: MixKind::FixedSequence,
            index: None,
            deviation: DEFAULT_MIX_DEVIATION,
        })
    }

    pub fn with_deviation(mut self, deviation: f64) -> DefinitionResult<Self> {
        if !deviation.is_finite() || !(0.0..100.0).contains(&deviation) {
            return Err(DefinitionError::Deviation { value: deviation });
        }
        self.deviation = deviation;
        Ok(self)
    }

    pub fn operations(&self) -> &[usize] {
        &self.operations
    }

    pub fn kind(&self) -> &MixKind {
        &self.kind
    }

    pub fn deviation(&self) -> f64 {
        self.deviation
    }

    /// Expected share of each operation, keyed by driver-wide index.
    pub fn expected_ratios(&self) -> Vec<(usize, f64)> {
        match &self.kind {
            MixKind::Flat { weights } => self
                .operations
                .iter()
                .copied()
                .zip(weights.iter().copied())
                .collect(),
            MixKind::FixedSequence => {
                let share = 1.0 / self.operations.len() as f64;
                self.operations.iter().map(|&op| (op, share)).collect()
            }
        }
    }

    /// A thread-exclusive selector seeded from `rng`.
    pub fn selector<R: Rng + ?Sized>(&self, rng: &mut R) -> Selector {
        let state = match &self.index {
            Some(index) => SelectorState::Weighted {
                index: index.clone(),
                rng: StdRng::seed_from_u64(rng.gen()),
            },
            None => SelectorState::Sequence { position: 0 },
        };
        Selector {
            operations: self.operations.clone(),
            state,
        }
    }
}

#[derive(Debug, Clone)]
enum SelectorState {
    Weighted {
        index: WeightedIndex<f64>,
        rng: StdRng,
    },
    Sequence {
        position: usize,
    },
}

/// Per-thread selection state over a [`Mix`].
#[derive(Debug, Clone)]
pub struct Selector {
    operations: Vec<usize>,
    state: SelectorState,
}

impl Selector {
    /// Driver-wide index of the next operation to run.
    pub fn select(&mut self) -> usize {
        match &mut self.state {
            SelectorState::Weighted { index, rng } => self.operations[index.sample(rng)],
            SelectorState::Sequence { position } => {
                let op = self.operations[*position];
                *position = (*position + 1) % self.operations.len();
                op
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_normalized() {
        let mix = Mix::flat(vec![0, 1, 2], &[2.0, 6.0, 2.0], &["a", "b", "c"]).unwrap();
        match mix.kind() {
            MixKind::Flat { weights } => {
                assert_eq!(weights, &vec![0.2, 0.6, 0.2]);
                assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_flat_frequencies_converge() {
        let mix = Mix::flat(vec![0, 1, 2], &[50.0, 30.0, 20.0], &["a", "b", "c"]).unwrap();
        let mut rng = StdRng::seed_from_u64(2024);
        let mut selector = mix.selector(&mut rng);
        let samples = 200_000;
        let mut counts = [0usize; 3];
        for _ in 0..samples {
            counts[selector.select()] += 1;
        }
        for (count, expected) in counts.iter().zip([0.5, 0.3, 0.2]) {
            let observed = *count as f64 / samples as f64;
            assert!(
                (observed - expected).abs() < 0.01,
                "observed {} expected {}",
                observed,
                expected
            );
        }
    }

    #[test]
    fn test_selection_reproducible_for_seed() {
        let mix = Mix::flat(vec![3, 4], &[1.0, 1.0], &["a", "b"]).unwrap();
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut selector = mix.selector(&mut rng);
            (0..64).map(|_| selector.select()).collect::<Vec<_>>()
        };
        assert_eq!(run(11), run(11));
        assert!(run(11).iter().all(|op| *op == 3 || *op == 4));
    }

    #[test]
    fn test_selectors_independent() {
        let mix = Mix::flat(vec![0, 1], &[1.0, 1.0], &["a", "b"]).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let mut first = mix.selector(&mut rng);
        let mut second = mix.selector(&mut rng);
        let a: Vec<usize> = (0..64).map(|_| first.select()).collect();
        let b: Vec<usize> = (0..64).map(|_| second.select()).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fixed_sequence_wraps() {
        let mix = Mix::fixed_sequence(vec![5, 6, 7]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let mut selector = mix.selector(&mut rng);
        let picks: Vec<usize> = (0..7).map(|_| selector.select()).collect();
        assert_eq!(picks, vec![5, 6, 7, 5, 6, 7, 5]);
    }

    #[test]
    fn test_invalid_mixes() {
        assert_eq!(Mix::flat(vec![], &[], &[]), Err(DefinitionError::EmptyMix));
        assert_eq!(
            Mix::flat(vec![0], &[0.0], &["a"]),
            Err(DefinitionError::ZeroWeights)
        );
        assert!(matches!(
            Mix::flat(vec![0, 1], &[1.0, -1.0], &["a", "b"]),
            Err(DefinitionError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn test_flat_rejects_length_mismatch() {
        assert_eq!(
            Mix::flat(vec![0], &[1.0, 1.0], &["a", "b"]),
            Err(DefinitionError::MixLengthMismatch {
                operations: 1,
                weights: 2
            })
        );
        assert_eq!(
            Mix::flat(vec![0, 1, 2], &[1.0], &["a"]),
            Err(DefinitionError::MixLengthMismatch {
                operations: 3,
                weights: 1
            })
        );
    }

    #[test]
    fn test_selector_only_returns_mix_operations() {
        let mix = Mix::flat(vec![9], &[3.0], &["only"]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let mut selector = mix.selector(&mut rng);
        assert!((0..32).all(|_| selector.select() == 9));
    }
}
