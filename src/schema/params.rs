//! Parameter space, reference profile and chromosome types.
//!
//! A chromosome stores one value per declared parameter, index-aligned with
//! the ordered parameter list of its [`ParameterSpace`]. Name-based access
//! only happens at the simulation boundary through [`ParameterRecord`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// A named real-valued parameter with an inclusive range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name (unique within a space).
    pub name: String,
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
}

impl Parameter {
    /// Declare a parameter.
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    /// Total width of the declared range.
    #[inline]
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Clamp a value into the declared range.
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Position of `value` inside the range, 0.0 at `min` and 1.0 at `max`.
    pub fn normalize(&self, value: f64) -> f64 {
        let span = self.span();
        if span <= 0.0 {
            0.5
        } else {
            ((value - self.min) / span).clamp(0.0, 1.0)
        }
    }

    /// Check whether `value` lies inside the declared range.
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Nominal values and perturbation amplitudes used to seed part of the
/// initial population.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceProfile {
    /// Nominal value per parameter name.
    pub nominal: BTreeMap<String, f64>,
    /// Perturbation amplitude per parameter name.
    #[serde(default)]
    pub amplitude: BTreeMap<String, f64>,
}

impl ReferenceProfile {
    /// Profile whose amplitudes are a fixed fraction of each nominal value.
    pub fn with_relative_amplitude(nominal: BTreeMap<String, f64>, fraction: f64) -> Self {
        let amplitude = nominal
            .iter()
            .map(|(name, value)| (name.clone(), (value * fraction).abs()))
            .collect();
        Self { nominal, amplitude }
    }

    /// Sampling window `[ref - amplitude, ref + amplitude]` for a parameter.
    pub fn window(&self, name: &str) -> Option<(f64, f64)> {
        let nominal = *self.nominal.get(name)?;
        let amplitude = self.amplitude.get(name).copied().unwrap_or(0.0);
        Some((nominal - amplitude, nominal + amplitude))
    }
}

/// The ordered set of parameters being optimized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    /// Declared parameters, in crossover order.
    pub parameters: Vec<Parameter>,
    /// Optional reference profile for initialization.
    #[serde(default)]
    pub reference: Option<ReferenceProfile>,
}

impl ParameterSpace {
    /// Create a space without a reference profile.
    pub fn new(parameters: Vec<Parameter>) -> Self {
        Self {
            parameters,
            reference: None,
        }
    }

    /// Attach a reference profile.
    pub fn with_reference(mut self, reference: ReferenceProfile) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Number of declared parameters.
    #[inline]
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Index of a parameter by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    /// Parameter declaration by name.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Parameter names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    /// Declared ranges keyed by name.
    pub fn ranges(&self) -> BTreeMap<String, (f64, f64)> {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), (p.min, p.max)))
            .collect()
    }

    /// Clamp every value of a chromosome into its declared range.
    pub fn clamp(&self, chromosome: &mut Chromosome) {
        for (value, param) in chromosome.values.iter_mut().zip(&self.parameters) {
            *value = param.clamp(*value);
        }
    }

    /// Check that a chromosome has one in-range value per parameter.
    pub fn contains(&self, chromosome: &Chromosome) -> bool {
        chromosome.values.len() == self.parameters.len()
            && chromosome
                .values
                .iter()
                .zip(&self.parameters)
                .all(|(v, p)| p.contains(*v))
    }

    /// Name-keyed view of a chromosome for the simulation boundary.
    pub fn record<'a>(&'a self, chromosome: &'a Chromosome) -> ParameterRecord<'a> {
        ParameterRecord {
            space: self,
            chromosome,
        }
    }

    /// Validate the declaration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parameters.is_empty() {
            return Err(ConfigError::NoParameters);
        }

        for (i, param) in self.parameters.iter().enumerate() {
            if self.parameters[..i].iter().any(|p| p.name == param.name) {
                return Err(ConfigError::DuplicateParameter(param.name.clone()));
            }
            if !param.min.is_finite() || !param.max.is_finite() || param.min > param.max {
                return Err(ConfigError::InvalidBounds(format!(
                    "{} min ({}) > max ({})",
                    param.name, param.min, param.max
                )));
            }
        }

        if let Some(reference) = &self.reference {
            for name in reference.nominal.keys().chain(reference.amplitude.keys()) {
                if self.get(name).is_none() {
                    return Err(ConfigError::UnknownParameter(name.clone()));
                }
            }
            for (name, amplitude) in &reference.amplitude {
                if !amplitude.is_finite() || *amplitude < 0.0 {
                    return Err(ConfigError::InvalidBounds(format!(
                        "{} reference amplitude {} must be non-negative",
                        name, amplitude
                    )));
                }
            }
        }

        Ok(())
    }
}

/// One candidate parameter vector.
///
/// `fitness` is only attached while the current generation is being
/// evolved; chromosomes handed out for evaluation never carry one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chromosome {
    values: Vec<f64>,
    #[serde(skip)]
    fitness: Option<f64>,
}

impl Chromosome {
    /// Create from values aligned with a parameter space.
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            fitness: None,
        }
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn value(&self, index: usize) -> f64 {
        self.values[index]
    }

    #[inline]
    pub fn set_value(&mut self, index: usize, value: f64) {
        self.values[index] = value;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fitness assigned during the current evolution step, if any.
    #[inline]
    pub fn fitness(&self) -> Option<f64> {
        self.fitness
    }

    pub(crate) fn set_fitness(&mut self, fitness: f64) {
        self.fitness = Some(fitness);
    }

    /// Parameter-only copy.
    pub fn stripped(&self) -> Self {
        Self::new(self.values.clone())
    }
}

/// Name-keyed, read-only view of a chromosome.
#[derive(Debug, Clone, Copy)]
pub struct ParameterRecord<'a> {
    space: &'a ParameterSpace,
    chromosome: &'a Chromosome,
}

impl<'a> ParameterRecord<'a> {
    /// Value of a named parameter.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.space
            .index_of(name)
            .and_then(|i| self.chromosome.values.get(i).copied())
    }

    /// Value of a named parameter normalized into `[0, 1]`.
    pub fn normalized(&self, name: &str) -> Option<f64> {
        let param = self.space.get(name)?;
        self.get(name).map(|v| param.normalize(v))
    }

    /// `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        let chromosome = self.chromosome;
        self.space
            .parameters
            .iter()
            .zip(chromosome.values.iter())
            .map(|(p, v)| (p.name.as_str(), *v))
    }

    /// Mean of all normalized values.
    pub fn mean_normalized(&self) -> f64 {
        if self.space.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .space
            .parameters
            .iter()
            .zip(self.chromosome.values.iter())
            .map(|(p, v)| p.normalize(*v))
            .sum();
        total / self.space.len() as f64
    }

    /// Owned name → value map.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    /// The parameter space backing this record.
    pub fn space(&self) -> &'a ParameterSpace {
        self.space
    }
}

/// Best individual observed across a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestRecord {
    /// Parameter values, aligned with the parameter space.
    pub chromosome: Chromosome,
    /// Fitness the values achieved.
    pub fitness: f64,
}

impl BestRecord {
    /// Name-keyed parameter values.
    pub fn named(&self, space: &ParameterSpace) -> BTreeMap<String, f64> {
        space.record(&self.chromosome).to_map()
    }
}
