//! Chromosome sampling, crossover and mutation.

use rand::prelude::*;
use rand::seq::index;

use crate::schema::{Chromosome, ParameterSpace};

/// How a mutation changes the chosen parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMode {
    /// Small uniform step around the current value.
    Local,
    /// Redraw over the full declared range.
    Global,
}

/// Random number generator wrapper for chromosome operations.
pub struct GenomeRng {
    rng: StdRng,
}

impl GenomeRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create with random seed.
    pub fn random() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Seeded when `seed` is given, from entropy otherwise.
    pub fn with_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::random, Self::new)
    }

    /// Uniform sample in `[lo, hi]`.
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        if lo >= hi {
            return lo;
        }
        self.rng.gen_range(lo..=hi)
    }

    /// Fair coin.
    pub fn coin(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }

    /// Draw every parameter uniformly over its declared range.
    pub fn random_chromosome(&mut self, space: &ParameterSpace) -> Chromosome {
        let values = space
            .parameters
            .iter()
            .map(|p| self.uniform(p.min, p.max))
            .collect();
        Chromosome::new(values)
    }

    /// Draw around the reference profile, then clamp.
    ///
    /// Parameters the profile does not mention are drawn over their full
    /// range.
    pub fn reference_chromosome(&mut self, space: &ParameterSpace) -> Chromosome {
        let values = space
            .parameters
            .iter()
            .map(|p| {
                let window = space.reference.as_ref().and_then(|r| r.window(&p.name));
                match window {
                    Some((lo, hi)) => p.clamp(self.uniform(lo, hi)),
                    None => self.uniform(p.min, p.max),
                }
            })
            .collect();
        Chromosome::new(values)
    }

    /// Single-point crossover. The cut point is drawn from `[1, k - 1]` and
    /// the tails past it are swapped.
    pub fn crossover(&mut self, parent1: &Chromosome, parent2: &Chromosome) -> (Chromosome, Chromosome) {
        let k = parent1.len().min(parent2.len());
        if k < 2 {
            return (parent1.stripped(), parent2.stripped());
        }
        let cut = self.rng.gen_range(1..k);

        let splice = |head: &Chromosome, tail: &Chromosome| {
            let mut values = head.values()[..cut].to_vec();
            values.extend_from_slice(&tail.values()[cut..k]);
            Chromosome::new(values)
        };
        (splice(parent1, parent2), splice(parent2, parent1))
    }

    /// With probability `rate`, change one randomly chosen parameter.
    ///
    /// Local steps are uniform within `±step_fraction` of the parameter's
    /// range. The result is always clamped.
    pub fn mutate(
        &mut self,
        chromosome: &mut Chromosome,
        space: &ParameterSpace,
        rate: f64,
        mode: MutationMode,
        step_fraction: f64,
    ) {
        let k = chromosome.len().min(space.len());
        if k == 0 || !self.rng.gen_bool(rate.clamp(0.0, 1.0)) {
            return;
        }

        let index = self.rng.gen_range(0..k);
        let param = &space.parameters[index];
        let value = match mode {
            MutationMode::Local => {
                let step = step_fraction * param.span();
                chromosome.value(index) + self.uniform(-step, step)
            }
            MutationMode::Global => self.uniform(param.min, param.max),
        };
        chromosome.set_value(index, param.clamp(value));
    }

    /// Tournament over `size` distinct members; the fittest wins.
    ///
    /// Missing fitness counts as `-inf`. Ties go to the first drawn.
    pub fn tournament(&mut self, population: &[Chromosome], size: usize) -> usize {
        let amount = size.clamp(1, population.len().max(1));
        if population.is_empty() {
            return 0;
        }

        let fitness = |i: usize| population[i].fitness().unwrap_or(f64::NEG_INFINITY);
        let mut entrants = index::sample(&mut self.rng, population.len(), amount).into_iter();
        let Some(mut winner) = entrants.next() else {
            return 0;
        };
        for candidate in entrants {
            if fitness(candidate) > fitness(winner) {
                winner = candidate;
            }
        }
        winner
    }

    /// Shuffle in place.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}
