//! Early stopping decisions between generations.

use log::info;

use crate::schema::{ConvergencePolicy, StopReason};

use super::engine::EvolutionEngine;

/// Per-policy state, updated once per generation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvergenceState {
    Disabled,
    Patience {
        patience: usize,
        best_ever: f64,
        stagnant: usize,
    },
    RelativeDelta {
        threshold_percent: f64,
        previous: Option<f64>,
    },
}

/// Decides whether the loop should stop early.
///
/// The generation cap is enforced by the loop itself, not here.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    state: ConvergenceState,
}

impl ConvergenceMonitor {
    pub fn new(policy: &ConvergencePolicy) -> Self {
        let state = match *policy {
            ConvergencePolicy::Disabled => ConvergenceState::Disabled,
            ConvergencePolicy::Patience { patience } => ConvergenceState::Patience {
                patience,
                best_ever: f64::NEG_INFINITY,
                stagnant: 0,
            },
            ConvergencePolicy::RelativeDelta { threshold_percent } => {
                ConvergenceState::RelativeDelta {
                    threshold_percent,
                    previous: None,
                }
            }
        };
        Self { state }
    }

    /// Inspect the engine after a completed generation.
    pub fn observe(&mut self, engine: &EvolutionEngine) -> Option<StopReason> {
        let generation_best = engine.history().last_best()?;
        self.observe_values(engine.best_fitness(), generation_best)
    }

    /// Update with the best-ever fitness and this generation's best.
    pub fn observe_values(&mut self, best_ever: f64, generation_best: f64) -> Option<StopReason> {
        match &mut self.state {
            ConvergenceState::Disabled => None,
            ConvergenceState::Patience {
                patience,
                best_ever: recorded,
                stagnant,
            } => {
                if best_ever > *recorded {
                    *recorded = best_ever;
                    *stagnant = 0;
                } else {
                    *stagnant += 1;
                }
                if *stagnant >= *patience {
                    info!(
                        "Best fitness has not improved for {} generations; stopping",
                        stagnant
                    );
                    Some(StopReason::Stagnation)
                } else {
                    None
                }
            }
            ConvergenceState::RelativeDelta {
                threshold_percent,
                previous,
            } => {
                let converged = previous
                    .is_some_and(|prev| within_threshold(prev, generation_best, *threshold_percent));
                *previous = Some(generation_best);
                if converged {
                    info!(
                        "Generation best changed by at most {}%; stopping",
                        threshold_percent
                    );
                    Some(StopReason::RelativeDelta)
                } else {
                    None
                }
            }
        }
    }

    /// Generations without improvement under the patience policy.
    pub fn stagnant_generations(&self) -> Option<usize> {
        match self.state {
            ConvergenceState::Patience { stagnant, .. } => Some(stagnant),
            _ => None,
        }
    }

    pub fn state(&self) -> &ConvergenceState {
        &self.state
    }
}

/// Relative change test. Exactly equal values always converge, including two
/// consecutive all-failed (`-inf`) generations. Otherwise a zero or
/// non-finite value never converges.
fn within_threshold(previous: f64, current: f64, threshold_percent: f64) -> bool {
    if current == previous {
        return true;
    }
    if !previous.is_finite() || !current.is_finite() || previous == 0.0 {
        return false;
    }
    ((current - previous) / previous).abs() * 100.0 <= threshold_percent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{GeneticConfig, Parameter, ParameterSpace};

    #[test]
    fn test_patience_counts_stagnant_generations() {
        let mut monitor = ConvergenceMonitor::new(&ConvergencePolicy::Patience { patience: 2 });
        assert_eq!(monitor.observe_values(1.0, 1.0), None);
        assert_eq!(monitor.stagnant_generations(), Some(0));
        assert_eq!(monitor.observe_values(1.0, 0.5), None);
        assert_eq!(monitor.stagnant_generations(), Some(1));
        // Improvement resets the counter.
        assert_eq!(monitor.observe_values(1.5, 1.5), None);
        assert_eq!(monitor.observe_values(1.5, 1.2), None);
        assert_eq!(
            monitor.observe_values(1.5, 1.4),
            Some(StopReason::Stagnation)
        );
    }

    #[test]
    fn test_patience_without_finite_fitness_still_stops() {
        let mut monitor = ConvergenceMonitor::new(&ConvergencePolicy::Patience { patience: 1 });
        assert_eq!(
            monitor.observe_values(f64::NEG_INFINITY, f64::NEG_INFINITY),
            Some(StopReason::Stagnation)
        );
    }

    #[test]
    fn test_relative_delta() {
        let mut monitor = ConvergenceMonitor::new(&ConvergencePolicy::RelativeDelta {
            threshold_percent: 1.0,
        });
        assert_eq!(monitor.observe_values(1.0, 1.0), None);
        assert_eq!(monitor.observe_values(2.0, 2.0), None);
        assert_eq!(
            monitor.observe_values(2.0, 1.99),
            Some(StopReason::RelativeDelta)
        );
        assert_eq!(monitor.stagnant_generations(), None);
    }

    #[test]
    fn test_relative_delta_zero_and_non_finite_previous() {
        assert!(!within_threshold(0.0, 1e-12, 5.0));
        assert!(within_threshold(0.0, 0.0, 0.0));
        assert!(within_threshold(f64::NEG_INFINITY, f64::NEG_INFINITY, 0.0));
        assert!(!within_threshold(f64::NEG_INFINITY, 1.0, 100.0));
        assert!(!within_threshold(1.0, f64::NAN, 100.0));
        assert!(!within_threshold(f64::NAN, f64::NAN, 100.0));
        assert!(within_threshold(-2.0, -2.01, 1.0));
    }

    #[test]
    fn test_relative_delta_stops_on_consecutive_failed_generations() {
        let mut monitor = ConvergenceMonitor::new(&ConvergencePolicy::RelativeDelta {
            threshold_percent: 1.0,
        });
        assert_eq!(monitor.observe_values(f64::NEG_INFINITY, f64::NEG_INFINITY), None);
        assert_eq!(
            monitor.observe_values(f64::NEG_INFINITY, f64::NEG_INFINITY),
            Some(StopReason::RelativeDelta)
        );
    }

    #[test]
    fn test_disabled_never_stops() {
        let mut monitor = ConvergenceMonitor::new(&ConvergencePolicy::Disabled);
        for _ in 0..100 {
            assert_eq!(monitor.observe_values(1.0, 1.0), None);
        }
    }

    #[test]
    fn test_observe_reads_engine_state() {
        let space = ParameterSpace::new(vec![
            Parameter::new("s", 0.0, 1.0),
            Parameter::new("l", 0.0, 1.0),
        ]);
        let config = GeneticConfig {
            population_size: 2,
            ..Default::default()
        };
        let mut engine = EvolutionEngine::new(space, config, Some(0)).unwrap();
        let mut monitor = ConvergenceMonitor::new(&ConvergencePolicy::RelativeDelta {
            threshold_percent: 0.0,
        });

        engine.initialize_population();
        assert_eq!(monitor.observe(&engine), None);

        engine.evolve(&[0.5, 0.25]).unwrap();
        assert_eq!(monitor.observe(&engine), None);
        engine.evolve(&[0.1, 0.5]).unwrap();
        assert_eq!(monitor.observe(&engine), Some(StopReason::RelativeDelta));
    }
}
