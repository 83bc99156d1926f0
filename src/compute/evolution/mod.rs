//! Genetic search over a fixed, real-valued parameter space.
//!
//! # Overview
//!
//! - **Genome Operations** (`genome`): Sampling, crossover and mutation
//! - **Engine** (`engine`): Population lifecycle, tournament selection,
//!   elitism, best-ever tracking and fitness history
//! - **Convergence** (`convergence`): Patience and relative-delta stopping
//!
//! # Example
//!
//! ```rust
//! use metaguide::compute::evolution::{ConvergenceMonitor, EvolutionEngine};
//! use metaguide::schema::OptimizerConfig;
//!
//! let config = OptimizerConfig::default();
//! let mut engine =
//!     EvolutionEngine::new(config.parameters.clone(), config.genetic.clone(), Some(7)).unwrap();
//! let mut monitor = ConvergenceMonitor::new(&config.convergence);
//!
//! let population = engine.initialize_population().to_vec();
//! let fitness: Vec<f64> = population.iter().map(|c| c.value(0)).collect();
//! let next = engine.evolve(&fitness).unwrap();
//!
//! assert_eq!(next.len(), population.len());
//! assert!(monitor.observe(&engine).is_none());
//! ```
//!
//! Fitness is always maximized. Non-finite values are treated as the `-inf`
//! penalty and never reach the best-ever record or the history.

mod convergence;
mod engine;
mod genome;

pub use convergence::{ConvergenceMonitor, ConvergenceState};
pub use engine::{EvolutionEngine, EvolutionError, sanitize_fitness};
pub use genome::{GenomeRng, MutationMode};
