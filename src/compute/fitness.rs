//! Scalar fitness extraction from simulated spectra.

use std::sync::Arc;

use log::debug;

use crate::artifact::MonitorSpectrum;
use crate::schema::{CascadeConfig, Chromosome, ConfigError, FitnessPolicy, ParameterSpace};

use super::adapter::{CandidateError, SimulationOutput};
use super::cascade::{ResponseError, UnitCellResponse, cascade, period_count};

/// Relative tolerance when comparing frequency grids.
const GRID_TOLERANCE: f64 = 1e-9;

/// Mean of a magnitude spectrum; 0.0 when empty.
pub fn mean_magnitude(magnitude: &[f64]) -> f64 {
    if magnitude.is_empty() {
        return 0.0;
    }
    magnitude.iter().sum::<f64>() / magnitude.len() as f64
}

/// Sum of peak-to-next-valley drops.
///
/// Peaks and valleys are interior samples strictly above (below) both
/// neighbours. Each peak contributes the absolute difference to the first
/// valley after it, or nothing if there is none.
pub fn delta_amplitude(magnitude: &[f64]) -> f64 {
    if magnitude.len() < 3 {
        return 0.0;
    }

    let interior = 1..magnitude.len() - 1;
    let is_peak = |i: usize| magnitude[i] > magnitude[i - 1] && magnitude[i] > magnitude[i + 1];
    let is_valley = |i: usize| magnitude[i] < magnitude[i - 1] && magnitude[i] < magnitude[i + 1];

    let mut total = 0.0;
    for peak in interior.clone().filter(|&i| is_peak(i)) {
        if let Some(valley) = (peak + 1..interior.end).find(|&i| is_valley(i)) {
            total += (magnitude[peak] - magnitude[valley]).abs();
        }
    }
    total
}

/// Frequency grid a score was computed on.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSignature {
    frequencies: Arc<[f64]>,
}

impl GridSignature {
    /// `None` for an empty grid.
    pub fn of(frequencies: impl Into<Arc<[f64]>>) -> Option<Self> {
        let frequencies = frequencies.into();
        if frequencies.is_empty() {
            return None;
        }
        Some(Self { frequencies })
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Same length and every sample within a relative tolerance.
    pub fn matches(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .frequencies
                .iter()
                .zip(other.frequencies.iter())
                .all(|(&a, &b)| (a - b).abs() <= GRID_TOLERANCE * a.abs().max(b.abs()))
    }
}

/// Fitness of one candidate together with the grid it was computed on.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub fitness: f64,
    pub grid: GridSignature,
}

/// Turns simulation output into an oriented scalar fitness.
#[derive(Debug, Clone)]
pub struct FitnessExtractor {
    config: CascadeConfig,
    period_indices: Vec<usize>,
}

impl FitnessExtractor {
    /// Resolve the configured period terms against a parameter space.
    pub fn new(config: &CascadeConfig, space: &ParameterSpace) -> Result<Self, ConfigError> {
        if config.period_terms.is_empty() {
            return Err(ConfigError::NoPeriodTerms);
        }
        let period_indices = config
            .period_terms
            .iter()
            .map(|term| {
                space
                    .index_of(term)
                    .ok_or_else(|| ConfigError::UnknownParameter(term.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config: config.clone(),
            period_indices,
        })
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Period length of a chromosome's geometry.
    pub fn period(&self, chromosome: &Chromosome) -> f64 {
        self.period_indices
            .iter()
            .map(|&i| chromosome.values().get(i).copied().unwrap_or(f64::NAN))
            .sum()
    }

    /// Number of periods that fit in the structure.
    pub fn period_count(&self, chromosome: &Chromosome) -> u32 {
        period_count(
            self.period(chromosome),
            self.config.structure_length,
            self.config.rounding,
        )
    }

    /// Cascade a unit-cell response over `n` periods and reduce it.
    ///
    /// A geometry that fits no whole period scores `-inf` under either
    /// objective.
    pub fn score_response(&self, response: &UnitCellResponse, n: u32) -> f64 {
        if n == 0 {
            debug!("No whole period fits the structure; scoring -inf");
            return f64::NEG_INFINITY;
        }
        let total = cascade(response, n);
        let raw = match self.config.policy {
            FitnessPolicy::MeanMagnitude => mean_magnitude(&total.s11_magnitude()),
            FitnessPolicy::DeltaAmplitude => {
                delta_amplitude(&total.reflected_magnitude(self.config.excitation))
            }
        };
        self.config.objective.orient(raw)
    }

    /// Reduce a full-structure magnitude spectrum.
    pub fn score_spectrum(&self, spectrum: &MonitorSpectrum) -> f64 {
        let raw = match self.config.policy {
            FitnessPolicy::MeanMagnitude => mean_magnitude(spectrum.magnitude()),
            FitnessPolicy::DeltaAmplitude => delta_amplitude(spectrum.magnitude()),
        };
        self.config.objective.orient(raw)
    }

    /// Score one candidate's simulation output.
    pub fn evaluate(
        &self,
        chromosome: &Chromosome,
        output: SimulationOutput,
    ) -> Result<Scored, CandidateError> {
        let (fitness, frequencies) = match output {
            SimulationOutput::Scattering(response) => {
                let n = self.period_count(chromosome);
                debug!(
                    "Cascading {} periods of {:.4e} m over {} samples",
                    n,
                    self.period(chromosome),
                    response.len()
                );
                (
                    self.score_response(&response, n),
                    response.frequencies().to_vec(),
                )
            }
            SimulationOutput::Spectrum(spectrum) => {
                (self.score_spectrum(&spectrum), spectrum.frequencies().to_vec())
            }
            SimulationOutput::Artifact { path, monitor } => {
                let spectrum = MonitorSpectrum::load(&path, &monitor)?;
                (self.score_spectrum(&spectrum), spectrum.frequencies().to_vec())
            }
        };

        let grid = GridSignature::of(frequencies)
            .ok_or(CandidateError::Response(ResponseError::EmptyGrid))?;
        Ok(Scored { fitness, grid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::cascade::Matrix2;
    use crate::schema::{Objective, Parameter};
    use num_complex::Complex64;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn space() -> ParameterSpace {
        ParameterSpace::new(vec![
            Parameter::new("s", 0.1e-6, 0.6e-6),
            Parameter::new("w", 0.3e-6, 0.7e-6),
            Parameter::new("l", 0.1e-6, 0.6e-6),
        ])
    }

    fn reflecting_cell(points: usize) -> UnitCellResponse {
        let r = Complex64::new(0.0, 0.3f64.sin());
        let t = Complex64::new(0.3f64.cos(), 0.0);
        let frequencies = (0..points).map(|i| 190e12 + i as f64 * 1e11).collect();
        UnitCellResponse::new(frequencies, vec![Matrix2::new(r, t, t, r); points]).unwrap()
    }

    #[test]
    fn test_delta_amplitude_peaks_and_valleys() {
        // Peaks at 1 (3.0) and 5 (4.0); valleys at 2 (1.0) and 6 (0.5).
        let spectrum = [0.0, 3.0, 1.0, 2.0, 2.0, 4.0, 0.5, 1.0];
        assert!((delta_amplitude(&spectrum) - (2.0 + 3.5)).abs() < 1e-12);
    }

    #[test]
    fn test_delta_amplitude_peak_without_valley() {
        assert_eq!(delta_amplitude(&[0.0, 1.0, 0.5, 0.2]), 0.0);
        assert_eq!(delta_amplitude(&[1.0, 2.0]), 0.0);
        assert_eq!(delta_amplitude(&[]), 0.0);
    }

    #[test]
    fn test_mean_magnitude() {
        assert_eq!(mean_magnitude(&[]), 0.0);
        assert!((mean_magnitude(&[0.2, 0.4, 0.6]) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_extractor_rejects_unknown_period_term() {
        let config = CascadeConfig {
            period_terms: vec!["Lambda".into()],
            ..Default::default()
        };
        assert!(matches!(
            FitnessExtractor::new(&config, &space()),
            Err(ConfigError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_period_from_terms() {
        let extractor = FitnessExtractor::new(&CascadeConfig::default(), &space()).unwrap();
        let chromosome = Chromosome::new(vec![0.15e-6, 0.5e-6, 0.15e-6]);
        assert!((extractor.period(&chromosome) - 0.3e-6).abs() < 1e-18);
        assert_eq!(extractor.period_count(&chromosome), 133);
    }

    #[test]
    fn test_zero_period_count_scores_worst_under_both_objectives() {
        for objective in [Objective::Maximize, Objective::Minimize] {
            let config = CascadeConfig {
                structure_length: 0.1e-6,
                rounding: crate::schema::PeriodRounding::Floor,
                objective,
                ..Default::default()
            };
            let extractor = FitnessExtractor::new(&config, &space()).unwrap();
            let degenerate = Chromosome::new(vec![0.6e-6, 0.5e-6, 0.6e-6]);
            let fitting = Chromosome::new(vec![0.025e-6, 0.5e-6, 0.025e-6]);
            assert_eq!(extractor.period_count(&degenerate), 0);
            assert_eq!(extractor.period_count(&fitting), 2);

            let cell = SimulationOutput::Scattering(reflecting_cell(8));
            let worst = extractor.evaluate(&degenerate, cell.clone()).unwrap();
            let normal = extractor.evaluate(&fitting, cell).unwrap();
            assert_eq!(worst.fitness, f64::NEG_INFINITY);
            assert!(normal.fitness.is_finite());
            assert!(normal.fitness > worst.fitness);
        }
    }

    #[test]
    fn test_strong_reflector_scores_near_one() {
        let extractor = FitnessExtractor::new(&CascadeConfig::default(), &space()).unwrap();
        let r = Complex64::new(0.0, 1.55f64.sin());
        let t = Complex64::new(1.55f64.cos(), 0.0);
        let frequencies = (0..4).map(|i| 190e12 + i as f64 * 1e11).collect();
        let cell = UnitCellResponse::new(frequencies, vec![Matrix2::new(r, t, t, r); 4]).unwrap();
        for n in [20, 133, 200] {
            let score = extractor.score_response(&cell, n);
            assert!((score - 1.0).abs() < 1e-9, "n = {n}: {score}");
        }
    }

    #[test]
    fn test_more_periods_reflect_more() {
        let extractor = FitnessExtractor::new(&CascadeConfig::default(), &space()).unwrap();
        let cell = reflecting_cell(4);
        assert!(extractor.score_response(&cell, 10) > extractor.score_response(&cell, 1));
    }

    #[test]
    fn test_minimize_negates_score() {
        let config = CascadeConfig {
            objective: Objective::Minimize,
            ..Default::default()
        };
        let extractor = FitnessExtractor::new(&config, &space()).unwrap();
        let spectrum = MonitorSpectrum::new(vec![1.0, 2.0], vec![0.5, 0.5]).unwrap();
        assert_eq!(extractor.score_spectrum(&spectrum), -0.5);
    }

    #[test]
    fn test_artifact_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gen0_chrom0.mgsa");
        MonitorSpectrum::new(vec![1.0, 2.0, 3.0], vec![0.1, 0.2, 0.3])
            .unwrap()
            .save(&path, "in")
            .unwrap();

        let extractor = FitnessExtractor::new(&CascadeConfig::default(), &space()).unwrap();
        let chromosome = Chromosome::new(vec![0.15e-6, 0.5e-6, 0.15e-6]);

        let scored = extractor
            .evaluate(
                &chromosome,
                SimulationOutput::Artifact {
                    path: path.clone(),
                    monitor: "in".into(),
                },
            )
            .unwrap();
        assert!((scored.fitness - 0.2).abs() < 1e-12);
        assert_eq!(scored.grid.len(), 3);

        let missing = extractor.evaluate(
            &chromosome,
            SimulationOutput::Artifact {
                path,
                monitor: "out".into(),
            },
        );
        assert!(matches!(missing, Err(CandidateError::Artifact(_))));
    }

    #[test]
    fn test_grid_signature_matching() {
        let a = GridSignature::of(vec![190e12, 195e12, 200e12]).unwrap();
        let b = GridSignature::of(vec![190e12, 195e12 * (1.0 - 1e-12), 200e12 * (1.0 + 1e-12)])
            .unwrap();
        // Same end points, different interior spacing.
        let skewed = GridSignature::of(vec![190e12, 196e12, 200e12]).unwrap();
        let short = GridSignature::of(vec![190e12, 200e12]).unwrap();
        assert!(a.matches(&b));
        assert!(!a.matches(&skewed));
        assert!(!a.matches(&short));
        assert!(GridSignature::of(Vec::new()).is_none());
    }

    proptest! {
        #[test]
        fn prop_delta_amplitude_non_negative(
            spectrum in proptest::collection::vec(-1.0e3f64..1.0e3, 0..64)
        ) {
            prop_assert!(delta_amplitude(&spectrum) >= 0.0);
        }
    }
}
