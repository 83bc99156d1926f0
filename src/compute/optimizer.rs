//! Closed optimization loop: evaluate, evolve, check convergence, report.

use std::time::Instant;

use log::{error, info};

use crate::schema::{
    BestIndividual, ConfigError, IndividualRecord, OptimizationPhase, OptimizationProgress,
    OptimizationResult, OptimizerConfig, RunStats, StopReason,
};

use super::evolution::{ConvergenceMonitor, EvolutionEngine, sanitize_fitness};
use super::fitness::FitnessExtractor;
use super::scheduler::{CancelToken, EvaluationContext, GenerationOutcome, GenerationScheduler};

/// Drives the engine, scheduler and convergence monitor.
pub struct Optimizer<S: GenerationScheduler> {
    config: OptimizerConfig,
    engine: EvolutionEngine,
    monitor: ConvergenceMonitor,
    extractor: FitnessExtractor,
    scheduler: S,
    cancel: CancelToken,
}

impl<S: GenerationScheduler> Optimizer<S> {
    /// Validate the configuration and assemble the loop.
    pub fn new(config: OptimizerConfig, scheduler: S) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = EvolutionEngine::new(
            config.parameters.clone(),
            config.genetic.clone(),
            config.random_seed,
        )?;
        let extractor = FitnessExtractor::new(&config.cascade, &config.parameters)?;
        let monitor = ConvergenceMonitor::new(&config.convergence);

        Ok(Self {
            config,
            engine,
            monitor,
            extractor,
            scheduler,
            cancel: CancelToken::new(),
        })
    }

    /// Token that stops the run at the next poll point.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn engine(&self) -> &EvolutionEngine {
        &self.engine
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    fn best_individual(&self) -> Option<BestIndividual> {
        self.engine.best().map(|best| BestIndividual {
            parameters: best.named(self.engine.space()),
            fitness: best.fitness,
        })
    }

    fn progress(
        &self,
        outcome: Option<&GenerationOutcome>,
        individuals: Vec<IndividualRecord>,
        start: Instant,
        phase: OptimizationPhase,
    ) -> OptimizationProgress {
        OptimizationProgress {
            generation: self.engine.generation(),
            max_generations: self.config.genetic.max_generations,
            best: self.best_individual(),
            generation_best: self
                .engine
                .history()
                .last_best()
                .unwrap_or(f64::NEG_INFINITY),
            generation_failures: outcome.map_or(0, |o| o.failures),
            stagnant_generations: self.monitor.stagnant_generations(),
            individuals,
            history: self.engine.history().clone(),
            elapsed_seconds: start.elapsed().as_secs_f64(),
            phase,
        }
    }

    /// Run the loop, calling `callback` after initialization and after every
    /// completed generation. A run ended by cancellation or a fatal error
    /// reports one last `Stopped` snapshot.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> OptimizationResult
    where
        F: FnMut(&OptimizationProgress),
    {
        let start = Instant::now();
        let max_generations = self.config.genetic.max_generations;
        let mut total_evaluations = 0u64;
        let mut failed_evaluations = 0u64;

        self.engine.initialize_population();
        callback(&self.progress(None, Vec::new(), start, OptimizationPhase::Initializing));

        let stop_reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if self.engine.generation() >= max_generations {
                break StopReason::MaxGenerations;
            }

            let generation = self.engine.generation();
            let population = self.engine.population().to_vec();
            let ctx = EvaluationContext {
                generation,
                space: self.engine.space(),
                extractor: &self.extractor,
                cancel: &self.cancel,
            };
            let outcome = self.scheduler.evaluate_generation(&population, ctx);
            total_evaluations += outcome.dispatched as u64;
            failed_evaluations += outcome.failures as u64;

            // A partially dispatched generation is discarded.
            if outcome.cancelled {
                info!("Generation {} cancelled", generation);
                break StopReason::Cancelled;
            }

            if let Err(e) = self.engine.evolve(&outcome.fitness) {
                error!("Generation {} aborted: {}", generation, e);
                break StopReason::Error(e.to_string());
            }

            let individuals = population
                .iter()
                .zip(&outcome.fitness)
                .map(|(chromosome, &fitness)| IndividualRecord {
                    generation,
                    parameters: self.engine.space().record(chromosome).to_map(),
                    fitness: sanitize_fitness(fitness),
                })
                .collect();

            let converged = self.monitor.observe(&self.engine);
            info!(
                "Generation {}/{}: best {:.6}, best ever {:.6}, {} failed",
                generation + 1,
                max_generations,
                self.engine
                    .history()
                    .last_best()
                    .unwrap_or(f64::NEG_INFINITY),
                self.engine.best_fitness(),
                outcome.failures
            );

            let phase = if converged.is_some() || self.engine.generation() >= max_generations {
                OptimizationPhase::Complete
            } else {
                OptimizationPhase::Evaluating
            };
            callback(&self.progress(Some(&outcome), individuals, start, phase));

            if let Some(reason) = converged {
                break reason;
            }
        };

        if matches!(stop_reason, StopReason::Cancelled | StopReason::Error(_)) {
            callback(&self.progress(None, Vec::new(), start, OptimizationPhase::Stopped));
        }

        let elapsed = start.elapsed().as_secs_f64();
        info!(
            "Optimization stopped after {} generations ({:?}) in {:.2}s",
            self.engine.generation(),
            stop_reason,
            elapsed
        );

        OptimizationResult {
            best: self.best_individual(),
            history: self.engine.history().clone(),
            stats: RunStats {
                generations: self.engine.generation(),
                total_evaluations,
                failed_evaluations,
                elapsed_seconds: elapsed,
                stop_reason,
            },
            population_size: self.config.genetic.population_size,
            mutation_rate: self.config.genetic.mutation_rate,
            max_generations,
            parameter_ranges: self.engine.space().ranges(),
        }
    }

    /// Run the loop without progress reporting.
    pub fn run(&mut self) -> OptimizationResult {
        self.run_with_callback(|_| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::scheduler::Scheduler;
    use crate::compute::synthetic::{FrequencyGrid, SyntheticAdapter, SyntheticConfig};
    use crate::schema::{Chromosome, ConvergencePolicy, SchedulerConfig};

    fn config(max_generations: usize) -> OptimizerConfig {
        let mut config = OptimizerConfig {
            convergence: ConvergencePolicy::Disabled,
            random_seed: Some(42),
            ..Default::default()
        };
        config.genetic.population_size = 6;
        config.genetic.max_generations = max_generations;
        config
    }

    fn adapter() -> SyntheticAdapter {
        SyntheticAdapter::new(SyntheticConfig {
            grid: FrequencyGrid {
                points: 32,
                ..Default::default()
            },
            random_seed: Some(1),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_runs_to_generation_cap() {
        let adapter = adapter();
        let config = config(3);
        let scheduler = Scheduler::from_config(&config.scheduler, &adapter);
        let mut optimizer = Optimizer::new(config, scheduler).unwrap();

        let mut updates = Vec::new();
        let result =
            optimizer.run_with_callback(|p| updates.push((p.generation, p.phase.clone())));

        assert_eq!(result.stats.stop_reason, StopReason::MaxGenerations);
        assert_eq!(result.stats.generations, 3);
        assert_eq!(result.stats.total_evaluations, 18);
        assert_eq!(result.history.len(), 3);
        assert!(result.best.is_some());
        assert_eq!(result.parameter_ranges.len(), 4);
        assert_eq!(updates.len(), 4);
        assert_eq!(updates[0], (0, OptimizationPhase::Initializing));
        assert_eq!(updates[3], (3, OptimizationPhase::Complete));
        assert_eq!(adapter.sessions_opened(), 1);
    }

    #[test]
    fn test_parallel_run_records_individuals() {
        let adapter = adapter();
        let mut config = config(2);
        config.scheduler = SchedulerConfig::Parallel {
            max_simultaneous_sessions: 3,
        };
        let scheduler = Scheduler::from_config(&config.scheduler, &adapter);
        let mut optimizer = Optimizer::new(config, scheduler).unwrap();

        let mut individuals = 0;
        let result = optimizer.run_with_callback(|p| individuals += p.individuals.len());

        assert_eq!(individuals, 12);
        assert_eq!(result.stats.generations, 2);
        assert_eq!(adapter.sessions_opened(), 12);
        let best = result.best.unwrap().fitness;
        assert!(result.history.best_fitness().iter().all(|&f| f <= best));
    }

    /// Scores every chromosome with the same fitness.
    struct Constant(f64);

    impl GenerationScheduler for Constant {
        fn evaluate_generation(
            &mut self,
            population: &[Chromosome],
            _ctx: EvaluationContext<'_>,
        ) -> GenerationOutcome {
            GenerationOutcome {
                fitness: vec![self.0; population.len()],
                dispatched: population.len(),
                failures: 0,
                cancelled: false,
            }
        }
    }

    #[test]
    fn test_patience_stops_after_stagnant_generations() {
        let mut config = config(50);
        config.convergence = ConvergencePolicy::Patience { patience: 3 };
        let mut optimizer = Optimizer::new(config, Constant(0.25)).unwrap();

        let mut stagnant = Vec::new();
        let result = optimizer.run_with_callback(|p| stagnant.push(p.stagnant_generations));

        assert_eq!(result.stats.stop_reason, StopReason::Stagnation);
        assert_eq!(result.stats.generations, 4);
        assert_eq!(result.best.unwrap().fitness, 0.25);
        assert_eq!(stagnant, vec![Some(0), Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_relative_delta_stops_on_flat_generation_best() {
        let mut config = config(50);
        config.convergence = ConvergencePolicy::RelativeDelta {
            threshold_percent: 0.0,
        };
        let mut optimizer = Optimizer::new(config, Constant(2.0)).unwrap();

        let result = optimizer.run();
        assert_eq!(result.stats.stop_reason, StopReason::RelativeDelta);
        assert_eq!(result.stats.generations, 2);
    }

    /// Requests cancellation while the second generation is in flight.
    struct CancelSecond {
        calls: usize,
    }

    impl GenerationScheduler for CancelSecond {
        fn evaluate_generation(
            &mut self,
            population: &[Chromosome],
            ctx: EvaluationContext<'_>,
        ) -> GenerationOutcome {
            self.calls += 1;
            if self.calls == 2 {
                ctx.cancel.cancel();
            }
            GenerationOutcome {
                fitness: vec![self.calls as f64; population.len()],
                dispatched: population.len(),
                failures: 0,
                cancelled: ctx.cancel.is_cancelled(),
            }
        }
    }

    #[test]
    fn test_cancel_mid_run_discards_generation_and_reports_stopped() {
        let mut optimizer = Optimizer::new(config(10), CancelSecond { calls: 0 }).unwrap();

        let mut phases = Vec::new();
        let result = optimizer.run_with_callback(|p| phases.push(p.phase.clone()));

        assert_eq!(result.stats.stop_reason, StopReason::Cancelled);
        assert_eq!(result.stats.generations, 1);
        assert_eq!(result.history.len(), 1);
        assert_eq!(result.best.unwrap().fitness, 1.0);
        assert_eq!(
            phases,
            vec![
                OptimizationPhase::Initializing,
                OptimizationPhase::Evaluating,
                OptimizationPhase::Stopped,
            ]
        );
    }

    #[test]
    fn test_cancel_before_run() {
        let adapter = adapter();
        let config = config(10);
        let scheduler = Scheduler::from_config(&config.scheduler, &adapter);
        let mut optimizer = Optimizer::new(config, scheduler).unwrap();

        optimizer.cancel_handle().cancel();
        let mut phases = Vec::new();
        let result = optimizer.run_with_callback(|p| phases.push(p.phase.clone()));
        assert_eq!(result.stats.stop_reason, StopReason::Cancelled);
        assert_eq!(phases, vec![OptimizationPhase::Initializing, OptimizationPhase::Stopped]);
        assert_eq!(result.stats.generations, 0);
        assert!(result.best.is_none());
    }

    /// Returns a fitness vector of the wrong length after the first
    /// generation.
    struct Truncating {
        calls: usize,
    }

    impl GenerationScheduler for Truncating {
        fn evaluate_generation(
            &mut self,
            population: &[Chromosome],
            _ctx: EvaluationContext<'_>,
        ) -> GenerationOutcome {
            self.calls += 1;
            let len = if self.calls == 1 {
                population.len()
            } else {
                population.len() - 1
            };
            GenerationOutcome {
                fitness: (0..len).map(|i| i as f64).collect(),
                dispatched: len,
                failures: 0,
                cancelled: false,
            }
        }
    }

    #[test]
    fn test_length_mismatch_is_fatal_but_keeps_best() {
        let mut optimizer = Optimizer::new(config(10), Truncating { calls: 0 }).unwrap();
        let mut last = None;
        let result = optimizer.run_with_callback(|p| last = Some(p.phase.clone()));
        assert_eq!(last, Some(OptimizationPhase::Stopped));

        assert!(matches!(result.stats.stop_reason, StopReason::Error(_)));
        assert_eq!(result.stats.generations, 1);
        assert_eq!(result.best.unwrap().fitness, 5.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config(10);
        config.genetic.population_size = 1;
        assert!(matches!(
            Optimizer::new(config, Truncating { calls: 0 }),
            Err(ConfigError::PopulationTooSmall)
        ));
    }
}
