//! Metaguide - Closed-loop genetic optimization of periodic waveguides.
//!
//! This crate searches the geometry of a periodic metamaterial waveguide
//! for a target spectral response. Each candidate unit cell is simulated by
//! an external electromagnetic engine behind [`compute::SimulationAdapter`],
//! cascaded to the full structure length with transfer matrices, scored and
//! fed back into a genetic algorithm.
//!
//! # Architecture
//!
//! The crate is split into three modules:
//!
//! - `schema`: Configuration, parameter space and report types
//! - `artifact`: Binary spectral artifact files exchanged with the engine
//! - `compute`: Cascade, fitness, scheduling and the evolutionary loop
//!
//! # Example
//!
//! ```rust,no_run
//! use metaguide::{
//!     compute::{Optimizer, SyntheticAdapter, SyntheticConfig, scheduler::Scheduler},
//!     schema::OptimizerConfig,
//! };
//!
//! let config = OptimizerConfig::default();
//! let adapter = SyntheticAdapter::new(SyntheticConfig::default()).unwrap();
//!
//! let scheduler = Scheduler::from_config(&config.scheduler, &adapter);
//! let mut optimizer = Optimizer::new(config, scheduler).unwrap();
//! let result = optimizer.run();
//!
//! println!("Stopped after {} generations", result.stats.generations);
//! ```

pub mod artifact;
pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{Optimizer, SimulationAdapter, SimulationSession};
pub use schema::{OptimizationResult, OptimizerConfig, StopReason};
