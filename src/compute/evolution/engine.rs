//! Evolutionary engine: population lifecycle, selection, crossover,
//! mutation and elitism.

use log::debug;

use crate::schema::{
    BestRecord, Chromosome, ConfigError, FitnessHistory, GeneticConfig, ParameterSpace,
};

use super::genome::{GenomeRng, MutationMode};

/// Fatal evolution errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvolutionError {
    #[error("Fitness vector has {actual} entries but the population has {expected}")]
    FitnessLengthMismatch { expected: usize, actual: usize },
    #[error("Population has not been initialized")]
    NotInitialized,
}

/// Map NaN and `+inf` onto the `-inf` penalty.
#[inline]
pub fn sanitize_fitness(fitness: f64) -> f64 {
    if fitness.is_finite() {
        fitness
    } else {
        f64::NEG_INFINITY
    }
}

/// Owns the population, the best-ever record and the fitness history.
///
/// The engine always maximizes; fitness values are oriented before they
/// reach it.
pub struct EvolutionEngine {
    space: ParameterSpace,
    config: GeneticConfig,
    rng: GenomeRng,
    population: Vec<Chromosome>,
    best: Option<BestRecord>,
    history: FitnessHistory,
    generation: usize,
}

impl EvolutionEngine {
    /// Create an engine. The population is empty until
    /// [`initialize_population`](Self::initialize_population) is called.
    pub fn new(
        space: ParameterSpace,
        config: GeneticConfig,
        seed: Option<u64>,
    ) -> Result<Self, ConfigError> {
        space.validate()?;
        if config.population_size < 2 {
            return Err(ConfigError::PopulationTooSmall);
        }
        if config.tournament_size == 0 {
            return Err(ConfigError::InvalidTournament);
        }

        Ok(Self {
            space,
            config,
            rng: GenomeRng::with_seed(seed),
            population: Vec::new(),
            best: None,
            history: FitnessHistory::default(),
            generation: 0,
        })
    }

    /// Build a fresh population.
    ///
    /// A `reference_share` of it is drawn around the reference profile (when
    /// one is declared), the rest uniformly over the declared ranges, and the
    /// order is shuffled.
    pub fn initialize_population(&mut self) -> &[Chromosome] {
        let size = self.config.population_size;
        let from_reference = if self.space.reference.is_some() {
            ((size as f64 * self.config.reference_share).round() as usize).min(size)
        } else {
            0
        };

        let mut population = Vec::with_capacity(size);
        for _ in 0..from_reference {
            population.push(self.rng.reference_chromosome(&self.space));
        }
        while population.len() < size {
            population.push(self.rng.random_chromosome(&self.space));
        }
        self.rng.shuffle(&mut population);

        debug!(
            "Initialized {} chromosomes ({} around the reference profile)",
            size, from_reference
        );

        self.population = population;
        self.best = None;
        self.history = FitnessHistory::default();
        self.generation = 0;
        &self.population
    }

    /// Two independent tournaments over the current population.
    pub fn select_parents(&mut self) -> (Chromosome, Chromosome) {
        let size = self.config.tournament_size;
        let first = self.rng.tournament(&self.population, size);
        let second = self.rng.tournament(&self.population, size);
        (
            self.population[first].clone(),
            self.population[second].clone(),
        )
    }

    /// Single-point crossover of two parents.
    pub fn crossover(&mut self, parent1: &Chromosome, parent2: &Chromosome) -> (Chromosome, Chromosome) {
        self.rng.crossover(parent1, parent2)
    }

    /// Mutate with the configured rate and local step.
    pub fn mutate(&mut self, chromosome: &mut Chromosome, mode: MutationMode) {
        self.rng.mutate(
            chromosome,
            &self.space,
            self.config.mutation_rate,
            mode,
            self.config.local_step_fraction,
        );
    }

    /// Assign fitness to the current population and breed the next one.
    ///
    /// Returns parameter-only chromosomes for the next evaluation.
    pub fn evolve(&mut self, fitness: &[f64]) -> Result<Vec<Chromosome>, EvolutionError> {
        if self.population.is_empty() {
            return Err(EvolutionError::NotInitialized);
        }
        if fitness.len() != self.population.len() {
            return Err(EvolutionError::FitnessLengthMismatch {
                expected: self.population.len(),
                actual: fitness.len(),
            });
        }

        let mut generation_best: Option<usize> = None;
        let mut finite_sum = 0.0;
        let mut finite_count = 0usize;
        for (index, (chromosome, &raw)) in self.population.iter_mut().zip(fitness).enumerate() {
            let value = sanitize_fitness(raw);
            chromosome.set_fitness(value);
            if value.is_finite() {
                finite_sum += value;
                finite_count += 1;
            }
            match generation_best {
                Some(best) if fitness_at(fitness, best) >= value => {}
                _ => generation_best = Some(index),
            }
        }

        let best_value = generation_best
            .map(|i| fitness_at(fitness, i))
            .unwrap_or(f64::NEG_INFINITY);
        if let Some(index) = generation_best
            && best_value.is_finite()
            && self.best.as_ref().is_none_or(|best| best_value > best.fitness)
        {
            debug!("New best fitness {:.6} in generation {}", best_value, self.generation);
            self.best = Some(BestRecord {
                chromosome: self.population[index].stripped(),
                fitness: best_value,
            });
        }

        let mean = if finite_count > 0 {
            finite_sum / finite_count as f64
        } else {
            f64::NEG_INFINITY
        };
        self.history
            .push(best_value, mean, self.population.len() - finite_count);

        let next = self.breed();
        self.population = next.clone();
        self.generation += 1;
        Ok(next)
    }

    /// Elite (if any) plus offspring, shuffled.
    fn breed(&mut self) -> Vec<Chromosome> {
        let size = self.config.population_size;
        let mut next = Vec::with_capacity(size);
        if let Some(best) = &self.best {
            next.push(best.chromosome.stripped());
        }

        let offspring = size - next.len();
        let local_slots = (offspring as f64 * self.config.local_mutation_share).round() as usize;
        for slot in 0..offspring {
            let (parent1, parent2) = self.select_parents();
            let (child1, child2) = self.crossover(&parent1, &parent2);
            let mut child = if self.rng.coin() { child1 } else { child2 };
            let mode = if slot < local_slots {
                MutationMode::Local
            } else {
                MutationMode::Global
            };
            self.mutate(&mut child, mode);
            next.push(child);
        }

        self.rng.shuffle(&mut next);
        next
    }

    /// Current population (fitness attached only between `evolve` calls'
    /// assignment and breeding).
    pub fn population(&self) -> &[Chromosome] {
        &self.population
    }

    /// Best individual observed across the run.
    pub fn best(&self) -> Option<&BestRecord> {
        self.best.as_ref()
    }

    /// Best-ever fitness, `-inf` before any finite evaluation.
    pub fn best_fitness(&self) -> f64 {
        self.best.as_ref().map_or(f64::NEG_INFINITY, |b| b.fitness)
    }

    pub fn history(&self) -> &FitnessHistory {
        &self.history
    }

    /// Number of completed `evolve` calls.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn config(&self) -> &GeneticConfig {
        &self.config
    }
}

#[inline]
fn fitness_at(fitness: &[f64], index: usize) -> f64 {
    sanitize_fitness(fitness[index])
}
