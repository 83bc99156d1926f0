//! Generation scheduling.
//!
//! A scheduler takes one generation's population and returns a fitness
//! vector aligned with it. Two strategies exist:
//!
//! - [`SerialScheduler`]: one long-lived session, chromosomes in order.
//! - [`ParallelScheduler`]: one worker and one session per chromosome, at most
//!   `max_simultaneous_sessions` at a time.
//!
//! Both return only after every dispatched evaluation has finished. Any
//! per-candidate failure becomes a `-inf` fitness for that slot.

mod parallel;
mod semaphore;
mod serial;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;

use crate::schema::{Chromosome, ParameterSpace, SchedulerConfig};

use super::adapter::{CandidateError, CandidateId, SimulationAdapter};
use super::fitness::{FitnessExtractor, GridSignature, Scored};

pub use parallel::ParallelScheduler;
pub use semaphore::{SessionSlots, SlotPermit};
pub use serial::SerialScheduler;

/// Cooperative cancellation flag shared between the loop, the scheduler
/// and its workers. Cancellation never interrupts a running simulation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Everything a generation evaluation reads.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub generation: usize,
    pub space: &'a ParameterSpace,
    pub extractor: &'a FitnessExtractor,
    pub cancel: &'a CancelToken,
}

impl EvaluationContext<'_> {
    pub fn candidate(&self, index: usize) -> CandidateId {
        CandidateId::new(self.generation, index)
    }
}

/// Result of evaluating one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    /// Fitness per chromosome, in population order.
    pub fitness: Vec<f64>,
    /// Evaluations actually started.
    pub dispatched: usize,
    /// Started evaluations that were penalized.
    pub failures: usize,
    /// Cancellation was observed during the generation.
    pub cancelled: bool,
}

/// Evaluates whole generations.
pub trait GenerationScheduler {
    fn evaluate_generation(
        &mut self,
        population: &[Chromosome],
        ctx: EvaluationContext<'_>,
    ) -> GenerationOutcome;
}

/// Build the index-aligned fitness vector.
///
/// `None` marks a chromosome that was never dispatched. Successful results
/// whose grid differs from the first successful result are penalized.
pub(crate) fn reconcile(
    results: Vec<Option<Result<Scored, CandidateError>>>,
    ctx: &EvaluationContext<'_>,
) -> GenerationOutcome {
    let mut reference: Option<GridSignature> = None;
    let mut fitness = Vec::with_capacity(results.len());
    let mut dispatched = 0;
    let mut failures = 0;

    for (index, result) in results.into_iter().enumerate() {
        let Some(result) = result else {
            fitness.push(f64::NEG_INFINITY);
            continue;
        };
        dispatched += 1;

        let scored = result.and_then(|scored| match &reference {
            None => {
                reference = Some(scored.grid.clone());
                Ok(scored)
            }
            Some(grid) if grid.matches(&scored.grid) => Ok(scored),
            Some(_) => Err(CandidateError::GridMismatch),
        });

        match scored {
            Ok(scored) => fitness.push(scored.fitness),
            Err(e) => {
                warn!("{} penalized: {}", ctx.candidate(index), e);
                failures += 1;
                fitness.push(f64::NEG_INFINITY);
            }
        }
    }

    GenerationOutcome {
        fitness,
        dispatched,
        failures,
        cancelled: ctx.cancel.is_cancelled(),
    }
}

/// Strategy chosen from configuration.
pub enum Scheduler<A: SimulationAdapter> {
    Serial(SerialScheduler<A>),
    Parallel(ParallelScheduler<A>),
}

impl<A: SimulationAdapter> Scheduler<A> {
    pub fn from_config(config: &SchedulerConfig, adapter: A) -> Self {
        match config {
            SchedulerConfig::Serial => Scheduler::Serial(SerialScheduler::new(adapter)),
            SchedulerConfig::Parallel {
                max_simultaneous_sessions,
            } => Scheduler::Parallel(ParallelScheduler::new(adapter, *max_simultaneous_sessions)),
        }
    }
}

impl<A: SimulationAdapter> GenerationScheduler for Scheduler<A> {
    fn evaluate_generation(
        &mut self,
        population: &[Chromosome],
        ctx: EvaluationContext<'_>,
    ) -> GenerationOutcome {
        match self {
            Scheduler::Serial(s) => s.evaluate_generation(population, ctx),
            Scheduler::Parallel(p) => p.evaluate_generation(population, ctx),
        }
    }
}

/// Instrumented adapters for scheduler tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    use crate::artifact::MonitorSpectrum;
    use crate::compute::adapter::{
        SimulationAdapter, SimulationError, SimulationJob, SimulationOutput, SimulationSession,
    };
    use crate::compute::fitness::FitnessExtractor;
    use crate::schema::{CascadeConfig, Chromosome, Parameter, ParameterSpace};

    use super::CancelToken;

    /// Single parameter `s` in [0, 10]. `l` exists only to satisfy the
    /// default period terms.
    pub fn space() -> ParameterSpace {
        ParameterSpace::new(vec![
            Parameter::new("s", 0.0, 10.0),
            Parameter::new("l", 0.0, 10.0),
        ])
    }

    pub fn extractor(space: &ParameterSpace) -> FitnessExtractor {
        FitnessExtractor::new(&CascadeConfig::default(), space).unwrap()
    }

    /// Chromosome `i` has `s = i`.
    pub fn population(n: usize) -> Vec<Chromosome> {
        (0..n).map(|i| Chromosome::new(vec![i as f64, 1.0])).collect()
    }

    /// Adapter whose spectrum magnitude equals the chromosome's `s` value.
    #[derive(Default)]
    pub struct StubAdapter {
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub active: AtomicUsize,
        pub peak_active: AtomicUsize,
        pub simulations: AtomicUsize,
        /// `s` values that fail.
        pub failing: Vec<f64>,
        /// `s` values whose simulation panics.
        pub panicking: Vec<f64>,
        /// Sleep `(10 - s) * delay` inside each simulation.
        pub delay: Option<Duration>,
        /// Cancel once this many simulations have started.
        pub cancel_after: Option<(usize, CancelToken)>,
        /// Hold simulations until this many have started.
        pub rendezvous: Option<Arc<Barrier>>,
        /// Every simulated candidate id, in call order.
        pub seen: Mutex<Vec<String>>,
    }

    pub struct StubSession<'a> {
        adapter: &'a StubAdapter,
    }

    /// Sessions borrow the adapter so they can report their lifetime.
    pub struct Stub<'a>(pub &'a StubAdapter);

    impl<'a> SimulationAdapter for Stub<'a> {
        type Session = StubSession<'a>;

        fn open_session(&self) -> Result<Self::Session, SimulationError> {
            let adapter = self.0;
            adapter.opened.fetch_add(1, Ordering::SeqCst);
            let now = adapter.active.fetch_add(1, Ordering::SeqCst) + 1;
            adapter.peak_active.fetch_max(now, Ordering::SeqCst);
            Ok(StubSession { adapter })
        }
    }

    impl SimulationSession for StubSession<'_> {
        fn simulate(
            &mut self,
            job: &SimulationJob<'_>,
        ) -> Result<SimulationOutput, SimulationError> {
            let adapter = self.adapter;
            let started = adapter.simulations.fetch_add(1, Ordering::SeqCst) + 1;
            if let Ok(mut seen) = adapter.seen.lock() {
                seen.push(job.id.to_string());
            }

            if let Some((limit, token)) = &adapter.cancel_after
                && started >= *limit
            {
                token.cancel();
            }
            if let Some(barrier) = &adapter.rendezvous {
                barrier.wait();
            }

            let s = job.parameters.get("s").unwrap_or(0.0);
            if let Some(delay) = adapter.delay {
                thread::sleep(delay.mul_f64(10.0 - s));
            }
            if adapter.panicking.contains(&s) {
                panic!("engine crashed on {}", job.id);
            }
            if adapter.failing.contains(&s) {
                return Err(SimulationError::Engine(format!("{} diverged", job.id)));
            }

            let spectrum = MonitorSpectrum::new(vec![1.0, 2.0], vec![s, s])
                .map_err(|e| SimulationError::MalformedOutput(e.to_string()))?;
            Ok(SimulationOutput::Spectrum(spectrum))
        }
    }

    impl Drop for StubSession<'_> {
        fn drop(&mut self) {
            self.adapter.active.fetch_sub(1, Ordering::SeqCst);
            self.adapter.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
