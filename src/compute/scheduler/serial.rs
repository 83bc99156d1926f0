//! Sequential strategy: one session reused for the whole run.

use log::{info, warn};
use rayon::prelude::*;

use crate::compute::adapter::{
    CandidateError, SimulationAdapter, SimulationError, SimulationJob, SimulationOutput,
    SimulationSession, catch_panic,
};
use crate::schema::Chromosome;

use super::{EvaluationContext, GenerationOutcome, GenerationScheduler, reconcile};

/// Evaluates chromosomes one after another in population order.
///
/// The session is opened lazily and kept across generations. A lost
/// or panicked session is dropped and reopened for the next chromosome.
pub struct SerialScheduler<A: SimulationAdapter> {
    adapter: A,
    session: Option<A::Session>,
}

impl<A: SimulationAdapter> SerialScheduler<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            session: None,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    fn session(&mut self) -> Result<&mut A::Session, SimulationError> {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                info!("Opening simulation session");
                self.adapter.open_session()?
            }
        };
        Ok(self.session.insert(session))
    }

    fn simulate(&mut self, job: &SimulationJob<'_>) -> Result<SimulationOutput, SimulationError> {
        let session = self.session()?;
        let result = catch_panic(|| session.simulate(job));
        if let Err(e @ (SimulationError::SessionLost(_) | SimulationError::Panicked(_))) = &result {
            warn!("Dropping simulation session after {}: {}", job.id, e);
            self.session = None;
        }
        result
    }
}

impl<A: SimulationAdapter> GenerationScheduler for SerialScheduler<A> {
    fn evaluate_generation(
        &mut self,
        population: &[Chromosome],
        ctx: EvaluationContext<'_>,
    ) -> GenerationOutcome {
        let mut outputs: Vec<Option<Result<SimulationOutput, CandidateError>>> =
            Vec::with_capacity(population.len());

        for (index, chromosome) in population.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                info!(
                    "Cancellation requested after {} of {} evaluations",
                    index,
                    population.len()
                );
                break;
            }
            let job = SimulationJob {
                id: ctx.candidate(index),
                parameters: ctx.space.record(chromosome),
            };
            outputs.push(Some(self.simulate(&job).map_err(CandidateError::from)));
        }
        outputs.resize_with(population.len(), || None);

        // Spectral post-processing is independent per chromosome.
        let results: Vec<_> = outputs
            .into_par_iter()
            .zip(population.par_iter())
            .map(|(output, chromosome)| {
                output.map(|r| r.and_then(|o| ctx.extractor.evaluate(chromosome, o)))
            })
            .collect();

        reconcile(results, &ctx)
    }
}
