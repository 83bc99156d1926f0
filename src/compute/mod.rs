//! Compute module - Transfer-matrix cascade, fitness extraction, generation
//! scheduling and the evolutionary loop.

mod adapter;
mod cascade;
mod fitness;
mod optimizer;
mod synthetic;

pub mod evolution;
pub mod scheduler;

pub use adapter::*;
pub use cascade::*;
pub use fitness::*;
pub use optimizer::*;
pub use synthetic::*;
