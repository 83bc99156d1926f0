//! Configuration types for the waveguide optimization loop.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Parameter, ParameterSpace, ReferenceProfile};

/// Top-level optimizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Parameters being optimized and their reference profile.
    #[serde(default = "default_parameter_space")]
    pub parameters: ParameterSpace,
    /// Genetic algorithm settings.
    #[serde(default)]
    pub genetic: GeneticConfig,
    /// Early stopping policy.
    #[serde(default)]
    pub convergence: ConvergencePolicy,
    /// How evaluations are dispatched to the simulation engine.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Spectral post-processing settings.
    #[serde(default)]
    pub cascade: CascadeConfig,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            parameters: default_parameter_space(),
            genetic: GeneticConfig::default(),
            convergence: ConvergencePolicy::default(),
            scheduler: SchedulerConfig::default(),
            cascade: CascadeConfig::default(),
            random_seed: None,
        }
    }
}

/// Gap `s`, width `w`, segment length `l` and etch `height` of a
/// segmented waveguide, with the published design as reference.
fn default_parameter_space() -> ParameterSpace {
    let nominal = BTreeMap::from([
        ("s".to_string(), 0.15e-6),
        ("w".to_string(), 0.5e-6),
        ("l".to_string(), 0.15e-6),
        ("height".to_string(), 0.22e-6),
    ]);

    ParameterSpace::new(vec![
        Parameter::new("s", 0.1e-6, 0.6e-6),
        Parameter::new("w", 0.3e-6, 0.7e-6),
        Parameter::new("l", 0.1e-6, 0.6e-6),
        Parameter::new("height", 0.15e-6, 0.3e-6),
    ])
    .with_reference(ReferenceProfile::with_relative_amplitude(nominal, 0.5))
}

/// Genetic algorithm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticConfig {
    /// Number of chromosomes per generation.
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Probability that an offspring is mutated (0.0-1.0).
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Hard cap on the number of generations.
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,
    /// Tournament sample size (capped by the population size).
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    /// Share of offspring slots that use local mutation; the rest use global.
    #[serde(default = "default_local_mutation_share")]
    pub local_mutation_share: f64,
    /// Local mutation step as a fraction of the parameter's range.
    #[serde(default = "default_local_step_fraction")]
    pub local_step_fraction: f64,
    /// Share of the initial population drawn around the reference profile.
    #[serde(default = "default_reference_share")]
    pub reference_share: f64,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            mutation_rate: default_mutation_rate(),
            max_generations: default_max_generations(),
            tournament_size: default_tournament_size(),
            local_mutation_share: default_local_mutation_share(),
            local_step_fraction: default_local_step_fraction(),
            reference_share: default_reference_share(),
        }
    }
}

fn default_population_size() -> usize {
    30
}
fn default_mutation_rate() -> f64 {
    0.2
}
fn default_max_generations() -> usize {
    100
}
fn default_tournament_size() -> usize {
    5
}
fn default_local_mutation_share() -> f64 {
    0.8
}
fn default_local_step_fraction() -> f64 {
    0.05
}
fn default_reference_share() -> f64 {
    0.5
}

/// Early stopping policy. Every policy is bounded by `max_generations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy")]
pub enum ConvergencePolicy {
    /// Run to the generation cap.
    Disabled,
    /// Stop once best-ever fitness has not improved for `patience`
    /// consecutive generations.
    Patience {
        #[serde(default = "default_patience")]
        patience: usize,
    },
    /// Stop once consecutive generation bests differ by at most
    /// `threshold_percent` percent.
    RelativeDelta {
        #[serde(default = "default_threshold_percent")]
        threshold_percent: f64,
    },
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self::Patience {
            patience: default_patience(),
        }
    }
}

fn default_patience() -> usize {
    20
}
fn default_threshold_percent() -> f64 {
    1.0
}

/// Evaluation dispatch strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy")]
pub enum SchedulerConfig {
    /// One long-lived session, chromosomes evaluated in order.
    Serial,
    /// Up to `max_simultaneous_sessions` concurrent workers.
    Parallel {
        #[serde(default = "default_max_sessions")]
        max_simultaneous_sessions: usize,
    },
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::Serial
    }
}

fn default_max_sessions() -> usize {
    4
}

/// Spectral post-processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Total structure length in meters.
    #[serde(default = "default_structure_length")]
    pub structure_length: f64,
    /// Parameters whose sum is the period length.
    #[serde(default = "default_period_terms")]
    pub period_terms: Vec<String>,
    /// How `length / period` becomes an integer period count.
    #[serde(default)]
    pub rounding: PeriodRounding,
    /// Input excitation applied at port 1.
    #[serde(default)]
    pub excitation: Excitation,
    /// How a spectrum becomes a scalar.
    #[serde(default)]
    pub policy: FitnessPolicy,
    /// Whether a larger scalar is a better design.
    #[serde(default)]
    pub objective: Objective,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            structure_length: default_structure_length(),
            period_terms: default_period_terms(),
            rounding: PeriodRounding::default(),
            excitation: Excitation::default(),
            policy: FitnessPolicy::default(),
            objective: Objective::default(),
        }
    }
}

fn default_structure_length() -> f64 {
    40e-6
}
fn default_period_terms() -> Vec<String> {
    vec!["s".to_string(), "l".to_string()]
}

/// Period count rounding rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PeriodRounding {
    /// Round to the nearest integer.
    #[default]
    Nearest,
    /// Truncate toward zero.
    Floor,
}

/// Port-1 input excitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Excitation {
    /// Unit amplitude at every frequency.
    #[default]
    Flat,
    /// Gaussian window centered on the mean grid frequency with a FWHM of
    /// 10% of the grid span.
    Gaussian,
}

/// Scalar extraction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FitnessPolicy {
    /// Mean of `|S11_total|` over the grid.
    #[default]
    MeanMagnitude,
    /// Sum of peak-to-next-valley drops in the reflected magnitude.
    DeltaAmplitude,
}

/// Optimization direction of the extracted scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Objective {
    /// Larger scalars are better.
    #[default]
    Maximize,
    /// Smaller scalars are better; the scalar is negated before selection.
    Minimize,
}

impl Objective {
    /// Map an extracted scalar onto the engine's maximized fitness.
    #[inline]
    pub fn orient(self, score: f64) -> f64 {
        match self {
            Objective::Maximize => score,
            Objective::Minimize => -score,
        }
    }
}

impl OptimizerConfig {
    /// Validate every section of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parameters.validate()?;

        let genetic = &self.genetic;
        if genetic.population_size < 2 {
            return Err(ConfigError::PopulationTooSmall);
        }
        if genetic.max_generations == 0 {
            return Err(ConfigError::NoGenerations);
        }
        if genetic.tournament_size == 0 {
            return Err(ConfigError::InvalidTournament);
        }

        let check_fraction = |value: f64, name: &str| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::InvalidFraction {
                    name: name.to_string(),
                    value,
                })
            }
        };
        check_fraction(genetic.mutation_rate, "mutation_rate")?;
        check_fraction(genetic.local_mutation_share, "local_mutation_share")?;
        check_fraction(genetic.reference_share, "reference_share")?;
        check_fraction(genetic.local_step_fraction, "local_step_fraction")?;

        match self.convergence {
            ConvergencePolicy::Patience { patience } if patience == 0 => {
                return Err(ConfigError::InvalidConvergence(
                    "patience must be at least 1".to_string(),
                ));
            }
            ConvergencePolicy::RelativeDelta { threshold_percent }
                if !threshold_percent.is_finite() || threshold_percent < 0.0 =>
            {
                return Err(ConfigError::InvalidConvergence(format!(
                    "threshold_percent {} must be non-negative",
                    threshold_percent
                )));
            }
            _ => {}
        }

        if let SchedulerConfig::Parallel {
            max_simultaneous_sessions: 0,
        } = self.scheduler
        {
            return Err(ConfigError::NoSessions);
        }

        let cascade = &self.cascade;
        if !cascade.structure_length.is_finite() || cascade.structure_length <= 0.0 {
            return Err(ConfigError::InvalidStructureLength(cascade.structure_length));
        }
        if cascade.period_terms.is_empty() {
            return Err(ConfigError::NoPeriodTerms);
        }
        for term in &cascade.period_terms {
            if self.parameters.get(term).is_none() {
                return Err(ConfigError::UnknownParameter(term.clone()));
            }
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("At least one parameter must be declared")]
    NoParameters,
    #[error("Parameter {0} is declared more than once")]
    DuplicateParameter(String),
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Invalid parameter bounds: {0}")]
    InvalidBounds(String),
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("Maximum generations must be positive")]
    NoGenerations,
    #[error("Tournament size must be positive")]
    InvalidTournament,
    #[error("{name} must lie in [0, 1], got {value}")]
    InvalidFraction { name: String, value: f64 },
    #[error("Invalid convergence policy: {0}")]
    InvalidConvergence(String),
    #[error("Parallel scheduler needs at least one session slot")]
    NoSessions,
    #[error("Structure length must be positive, got {0}")]
    InvalidStructureLength(f64),
    #[error("At least one period term must be named")]
    NoPeriodTerms,
}
