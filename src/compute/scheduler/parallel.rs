//! Bounded-parallel strategy: one worker and one session per chromosome.

use std::sync::mpsc;
use std::thread;

use log::{debug, info};

use crate::compute::adapter::{
    CandidateError, SimulationAdapter, SimulationJob, SimulationSession, catch_panic,
};
use crate::compute::fitness::Scored;
use crate::schema::Chromosome;

use super::semaphore::SessionSlots;
use super::{EvaluationContext, GenerationOutcome, GenerationScheduler, reconcile};

/// Runs up to `max_simultaneous_sessions` evaluations at once.
///
/// Workers share only the slot pool, the cancel token and the result
/// channel. The cancel token is polled before a slot is acquired, before the
/// simulation starts and after it returns.
pub struct ParallelScheduler<A: SimulationAdapter> {
    adapter: A,
    slots: SessionSlots,
}

impl<A: SimulationAdapter> ParallelScheduler<A> {
    pub fn new(adapter: A, max_simultaneous_sessions: usize) -> Self {
        Self {
            adapter,
            slots: SessionSlots::new(max_simultaneous_sessions.max(1)),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn max_simultaneous_sessions(&self) -> usize {
        self.slots.capacity()
    }
}

impl<A: SimulationAdapter> GenerationScheduler for ParallelScheduler<A> {
    fn evaluate_generation(
        &mut self,
        population: &[Chromosome],
        ctx: EvaluationContext<'_>,
    ) -> GenerationOutcome {
        let (tx, rx) = mpsc::channel::<(usize, Result<Scored, CandidateError>)>();
        let adapter = &self.adapter;
        let slots = &self.slots;

        // The scope joins every worker before returning.
        thread::scope(|scope| {
            for (index, chromosome) in population.iter().enumerate() {
                if ctx.cancel.is_cancelled() {
                    info!(
                        "Cancellation requested; {} of {} workers dispatched",
                        index,
                        population.len()
                    );
                    break;
                }
                let permit = slots.acquire();
                if ctx.cancel.is_cancelled() {
                    info!(
                        "Cancellation requested; {} of {} workers dispatched",
                        index,
                        population.len()
                    );
                    break;
                }

                let tx = tx.clone();
                scope.spawn(move || {
                    let _permit = permit;
                    let result = catch_panic(|| run_worker(adapter, chromosome, index, &ctx));
                    // The receiver outlives the scope.
                    let _ = tx.send((index, result));
                });
            }
        });
        drop(tx);

        let mut results: Vec<Option<Result<Scored, CandidateError>>> =
            (0..population.len()).map(|_| None).collect();
        for (index, result) in rx {
            results[index] = Some(result);
        }

        reconcile(results, &ctx)
    }
}

/// One worker: private session, simulation, fitness extraction.
fn run_worker<A: SimulationAdapter>(
    adapter: &A,
    chromosome: &Chromosome,
    index: usize,
    ctx: &EvaluationContext<'_>,
) -> Result<Scored, CandidateError> {
    let id = ctx.candidate(index);
    if ctx.cancel.is_cancelled() {
        return Err(CandidateError::Cancelled);
    }

    let mut session = adapter.open_session()?;
    debug!("{} simulating", id);
    let job = SimulationJob {
        id,
        parameters: ctx.space.record(chromosome),
    };
    let output = session.simulate(&job)?;
    drop(session);

    if ctx.cancel.is_cancelled() {
        return Err(CandidateError::Cancelled);
    }
    ctx.extractor.evaluate(chromosome, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::scheduler::CancelToken;
    use crate::compute::scheduler::testing::*;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[test]
    fn test_parallel_respects_session_limit() {
        let stub = StubAdapter {
            delay: Some(Duration::from_millis(3)),
            ..Default::default()
        };
        let space = space();
        let extractor = extractor(&space);
        let cancel = CancelToken::new();
        let ctx = EvaluationContext {
            generation: 0,
            space: &space,
            extractor: &extractor,
            cancel: &cancel,
        };

        let mut scheduler = ParallelScheduler::new(Stub(&stub), 2);
        let outcome = scheduler.evaluate_generation(&population(5), ctx);

        assert!(stub.peak_active.load(Ordering::SeqCst) <= 2);
        assert_eq!(outcome.fitness.len(), 5);
        assert_eq!(outcome.dispatched, 5);
        assert_eq!(scheduler.slots.available(), 2);
    }

    #[test]
    fn test_parallel_results_follow_submission_order() {
        // Later chromosomes finish first.
        let stub = StubAdapter {
            delay: Some(Duration::from_millis(4)),
            ..Default::default()
        };
        let space = space();
        let extractor = extractor(&space);
        let cancel = CancelToken::new();
        let ctx = EvaluationContext {
            generation: 0,
            space: &space,
            extractor: &extractor,
            cancel: &cancel,
        };

        let mut scheduler = ParallelScheduler::new(Stub(&stub), 5);
        let outcome = scheduler.evaluate_generation(&population(5), ctx);
        assert_eq!(outcome.fitness, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_parallel_cancellation_mid_generation() {
        let cancel = CancelToken::new();
        let stub = StubAdapter {
            cancel_after: Some((2, cancel.clone())),
            rendezvous: Some(Arc::new(Barrier::new(2))),
            ..Default::default()
        };
        let space = space();
        let extractor = extractor(&space);
        let ctx = EvaluationContext {
            generation: 0,
            space: &space,
            extractor: &extractor,
            cancel: &cancel,
        };

        let mut scheduler = ParallelScheduler::new(Stub(&stub), 2);
        let outcome = scheduler.evaluate_generation(&population(5), ctx);

        assert_eq!(stub.simulations.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.dispatched, 2);
        assert!(outcome.cancelled);
        assert_eq!(outcome.fitness.len(), 5);
        assert!(outcome.fitness[2..].iter().all(|f| *f == f64::NEG_INFINITY));
    }

    #[test]
    fn test_parallel_sessions_always_released() {
        let stub = StubAdapter {
            failing: vec![1.0, 3.0],
            ..Default::default()
        };
        let space = space();
        let extractor = extractor(&space);
        let cancel = CancelToken::new();
        let ctx = EvaluationContext {
            generation: 4,
            space: &space,
            extractor: &extractor,
            cancel: &cancel,
        };

        let mut scheduler = ParallelScheduler::new(Stub(&stub), 3);
        let outcome = scheduler.evaluate_generation(&population(6), ctx);

        assert_eq!(
            outcome.fitness,
            vec![0.0, f64::NEG_INFINITY, 2.0, f64::NEG_INFINITY, 4.0, 5.0]
        );
        assert_eq!(outcome.failures, 2);
        assert_eq!(stub.opened.load(Ordering::SeqCst), 6);
        assert_eq!(stub.closed.load(Ordering::SeqCst), 6);
        assert_eq!(stub.active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parallel_survives_panicking_engine() {
        let stub = StubAdapter {
            panicking: vec![2.0],
            ..Default::default()
        };
        let space = space();
        let extractor = extractor(&space);
        let cancel = CancelToken::new();
        let ctx = EvaluationContext {
            generation: 0,
            space: &space,
            extractor: &extractor,
            cancel: &cancel,
        };

        let mut scheduler = ParallelScheduler::new(Stub(&stub), 2);
        let outcome = scheduler.evaluate_generation(&population(4), ctx);

        assert_eq!(outcome.fitness, vec![0.0, 1.0, f64::NEG_INFINITY, 3.0]);
        assert_eq!(outcome.failures, 1);
        assert_eq!(stub.closed.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.slots.available(), 2);
    }
}
