//! Simulation adapter contract.
//!
//! The physics engine is an external collaborator. An adapter opens
//! [`SimulationSession`]s; a session evaluates one chromosome at a time and
//! is released when dropped, on every exit path.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use crate::artifact::{ArtifactError, MonitorSpectrum};
use crate::schema::ParameterRecord;

use super::cascade::{ResponseError, UnitCellResponse};

/// Position of a chromosome within a run.
///
/// Used to key simulation inputs and artifacts so names never depend on
/// floating-point formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId {
    /// Generation index (0-based).
    pub generation: usize,
    /// Index within the generation's population.
    pub index: usize,
}

impl CandidateId {
    pub fn new(generation: usize, index: usize) -> Self {
        Self { generation, index }
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}_chrom{}", self.generation, self.index)
    }
}

/// One unit of work handed to a session.
#[derive(Debug, Clone, Copy)]
pub struct SimulationJob<'a> {
    pub id: CandidateId,
    pub parameters: ParameterRecord<'a>,
}

/// What a session produced for one chromosome.
#[derive(Debug, Clone)]
pub enum SimulationOutput {
    /// Unit-cell scattering matrix over a frequency grid.
    Scattering(UnitCellResponse),
    /// Scalar-ready field-magnitude spectrum.
    Spectrum(MonitorSpectrum),
    /// Spectrum persisted in an artifact file under `monitor`.
    Artifact { path: PathBuf, monitor: String },
}

/// Failures of the simulation engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SimulationError {
    #[error("Could not open simulation session: {0}")]
    SessionUnavailable(String),
    #[error("Simulation session lost: {0}")]
    SessionLost(String),
    #[error("Simulation failed: {0}")]
    Engine(String),
    #[error("Simulation produced malformed output: {0}")]
    MalformedOutput(String),
    #[error("Simulation engine panicked: {0}")]
    Panicked(String),
}

/// Recoverable failure of one candidate evaluation. Always folded into a
/// `-inf` fitness.
#[derive(Debug, thiserror::Error)]
pub enum CandidateError {
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error("Frequency grid differs from the rest of the generation")]
    GridMismatch,
    #[error("Evaluation cancelled")]
    Cancelled,
}

/// A live connection to the simulation engine.
pub trait SimulationSession {
    /// Simulate one chromosome.
    fn simulate(&mut self, job: &SimulationJob<'_>) -> Result<SimulationOutput, SimulationError>;
}

/// Factory for simulation sessions.
///
/// Shared by reference across worker threads, so it must be `Sync`. Sessions
/// are opened on the thread that uses them and never cross threads.
pub trait SimulationAdapter: Sync {
    type Session: SimulationSession;

    /// Acquire a new session.
    fn open_session(&self) -> Result<Self::Session, SimulationError>;
}

impl<A: SimulationAdapter> SimulationAdapter for &A {
    type Session = A::Session;

    fn open_session(&self) -> Result<Self::Session, SimulationError> {
        (**self).open_session()
    }
}

/// Run one engine call, turning a panic into [`SimulationError::Panicked`].
pub(crate) fn catch_panic<T, E>(f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
where
    E: From<SimulationError>,
{
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(SimulationError::Panicked(panic_message(&*payload)).into()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
