//! Schema module - Configuration, parameter space and report types.

mod config;
mod params;
mod report;

pub use config::*;
pub use params::*;
pub use report::*;
