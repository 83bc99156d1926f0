//! Progress and result snapshots handed to reporting code.
//!
//! Everything here is plain data. Rendering and persistence are left to the
//! caller; the binary only prints these and optionally dumps them as JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-generation statistics. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FitnessHistory {
    best_fitness: Vec<f64>,
    mean_fitness: Vec<f64>,
    failures: Vec<usize>,
}

impl FitnessHistory {
    /// Record one completed generation.
    pub(crate) fn push(&mut self, best: f64, mean: f64, failures: usize) {
        self.best_fitness.push(best);
        self.mean_fitness.push(mean);
        self.failures.push(failures);
    }

    /// Best fitness per generation.
    pub fn best_fitness(&self) -> &[f64] {
        &self.best_fitness
    }

    /// Mean finite fitness per generation (`-inf` when nothing was finite).
    pub fn mean_fitness(&self) -> &[f64] {
        &self.mean_fitness
    }

    /// Penalized evaluations per generation.
    pub fn failures(&self) -> &[usize] {
        &self.failures
    }

    /// Best fitness of the most recent generation.
    pub fn last_best(&self) -> Option<f64> {
        self.best_fitness.last().copied()
    }

    pub fn len(&self) -> usize {
        self.best_fitness.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best_fitness.is_empty()
    }
}

/// Best individual, keyed by parameter name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BestIndividual {
    /// Parameter values.
    pub parameters: BTreeMap<String, f64>,
    /// Fitness achieved.
    pub fitness: f64,
}

/// One evaluated chromosome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndividualRecord {
    /// Generation the chromosome was evaluated in (0-based).
    pub generation: usize,
    /// Parameter values.
    pub parameters: BTreeMap<String, f64>,
    /// Fitness assigned (`-inf` if penalized).
    pub fitness: f64,
}

/// Current phase of the optimization loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OptimizationPhase {
    /// Population built, nothing evaluated yet.
    #[default]
    Initializing,
    /// Generations are being evaluated.
    Evaluating,
    /// Loop finished normally.
    Complete,
    /// Loop stopped by cancellation or a fatal error.
    Stopped,
}

/// Progress update emitted after every generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationProgress {
    /// Number of completed generations.
    pub generation: usize,
    /// Generation cap.
    pub max_generations: usize,
    /// Best individual seen so far.
    pub best: Option<BestIndividual>,
    /// Best fitness of the generation just evaluated.
    pub generation_best: f64,
    /// Penalized evaluations in the generation just evaluated.
    pub generation_failures: usize,
    /// Generations without improvement, under the patience policy.
    pub stagnant_generations: Option<usize>,
    /// Everything evaluated in the generation just completed.
    pub individuals: Vec<IndividualRecord>,
    /// Per-generation history.
    pub history: FitnessHistory,
    /// Wall-clock time since the run started.
    pub elapsed_seconds: f64,
    /// Current phase.
    pub phase: OptimizationPhase,
}

/// Final result of an optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Best individual found, if any evaluation ever succeeded.
    pub best: Option<BestIndividual>,
    /// Per-generation history.
    pub history: FitnessHistory,
    /// Run statistics.
    pub stats: RunStats,
    /// Population size used.
    pub population_size: usize,
    /// Mutation rate used.
    pub mutation_rate: f64,
    /// Generation cap used.
    pub max_generations: usize,
    /// Declared parameter ranges.
    pub parameter_ranges: BTreeMap<String, (f64, f64)>,
}

/// Statistics from an optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    /// Generations completed.
    pub generations: usize,
    /// Evaluations dispatched to the simulation engine.
    pub total_evaluations: u64,
    /// Evaluations penalized with `-inf`.
    pub failed_evaluations: u64,
    /// Time taken (in seconds).
    pub elapsed_seconds: f64,
    /// Reason for stopping.
    pub stop_reason: StopReason,
}

/// Reason the optimization loop stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Reached maximum generations.
    MaxGenerations,
    /// Best-ever fitness stagnated for the configured patience.
    Stagnation,
    /// Consecutive generation bests within the relative threshold.
    RelativeDelta,
    /// Cancellation was requested.
    Cancelled,
    /// Fatal error occurred.
    Error(String),
}
