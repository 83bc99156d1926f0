//! Analytic stand-in for the physics engine.
//!
//! Produces a lossless, reciprocal, symmetric unit cell whose reflection
//! peaks at a frequency set by the candidate's geometry. Useful for demos,
//! benchmarks and end-to-end tests; it is not a physical model.

use std::f64::consts::PI;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use num_complex::Complex64;
use rand::prelude::*;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::artifact::MonitorSpectrum;
use crate::schema::ParameterRecord;

use super::adapter::{
    SimulationAdapter, SimulationError, SimulationJob, SimulationOutput, SimulationSession,
};
use super::cascade::{Matrix2, UnitCellResponse};

/// Largest coupling angle; keeps `|S21|` well away from zero.
const MAX_THETA: f64 = 1.4;

/// Uniform frequency grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyGrid {
    /// First sample in Hz.
    #[serde(default = "default_start_hz")]
    pub start_hz: f64,
    /// Last sample in Hz.
    #[serde(default = "default_stop_hz")]
    pub stop_hz: f64,
    /// Number of samples.
    #[serde(default = "default_points")]
    pub points: usize,
}

impl Default for FrequencyGrid {
    fn default() -> Self {
        Self {
            start_hz: default_start_hz(),
            stop_hz: default_stop_hz(),
            points: default_points(),
        }
    }
}

fn default_start_hz() -> f64 {
    180e12
}
fn default_stop_hz() -> f64 {
    200e12
}
fn default_points() -> usize {
    500
}

impl FrequencyGrid {
    /// Sample frequencies, ascending.
    pub fn frequencies(&self) -> Vec<f64> {
        match self.points {
            0 => Vec::new(),
            1 => vec![self.start_hz],
            n => {
                let step = (self.stop_hz - self.start_hz) / (n - 1) as f64;
                (0..n).map(|i| self.start_hz + i as f64 * step).collect()
            }
        }
    }

    pub fn span(&self) -> f64 {
        self.stop_hz - self.start_hz
    }
}

/// What a synthetic session hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind")]
pub enum SyntheticOutput {
    /// Return the unit-cell matrix directly.
    #[default]
    Scattering,
    /// Persist `|S11|` as a monitor spectrum under `directory` and return
    /// the file path.
    Artifact { directory: PathBuf, monitor: String },
}

/// Synthetic adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    #[serde(default)]
    pub grid: FrequencyGrid,
    /// Standard deviation of Gaussian noise added to the coupling angle.
    #[serde(default)]
    pub noise_std: f64,
    /// Probability that a simulation fails.
    #[serde(default)]
    pub failure_rate: f64,
    #[serde(default)]
    pub output: SyntheticOutput,
    /// Base seed for session RNGs.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            grid: FrequencyGrid::default(),
            noise_std: 0.0,
            failure_rate: 0.0,
            output: SyntheticOutput::default(),
            random_seed: None,
        }
    }
}

/// Adapter producing analytic unit-cell responses.
#[derive(Debug)]
pub struct SyntheticAdapter {
    config: Arc<SyntheticConfig>,
    frequencies: Arc<[f64]>,
    sessions: AtomicU64,
}

impl SyntheticAdapter {
    pub fn new(config: SyntheticConfig) -> Result<Self, SimulationError> {
        let grid = &config.grid;
        if grid.points == 0
            || !grid.start_hz.is_finite()
            || !grid.stop_hz.is_finite()
            || grid.stop_hz < grid.start_hz
        {
            return Err(SimulationError::SessionUnavailable(format!(
                "invalid frequency grid {:?}",
                grid
            )));
        }
        if !(0.0..=1.0).contains(&config.failure_rate) {
            return Err(SimulationError::SessionUnavailable(format!(
                "failure_rate {} must lie in [0, 1]",
                config.failure_rate
            )));
        }
        if let SyntheticOutput::Artifact { directory, .. } = &config.output {
            fs::create_dir_all(directory)
                .map_err(|e| SimulationError::SessionUnavailable(e.to_string()))?;
        }

        Ok(Self {
            frequencies: config.grid.frequencies().into(),
            config: Arc::new(config),
            sessions: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Sessions opened so far.
    pub fn sessions_opened(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }
}

impl SimulationAdapter for SyntheticAdapter {
    type Session = SyntheticSession;

    fn open_session(&self) -> Result<Self::Session, SimulationError> {
        let ordinal = self.sessions.fetch_add(1, Ordering::Relaxed);
        let rng = match self.config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(ordinal)),
            None => StdRng::from_entropy(),
        };
        let noise = Normal::new(0.0, self.config.noise_std)
            .map_err(|e| SimulationError::SessionUnavailable(e.to_string()))?;
        debug!("Opened synthetic session {}", ordinal);

        Ok(SyntheticSession {
            config: Arc::clone(&self.config),
            frequencies: Arc::clone(&self.frequencies),
            rng,
            noise,
        })
    }
}

/// One synthetic session with its own noise stream.
pub struct SyntheticSession {
    config: Arc<SyntheticConfig>,
    frequencies: Arc<[f64]>,
    rng: StdRng,
    noise: Normal<f64>,
}

impl SyntheticSession {
    /// Unit-cell S-matrix at every grid sample.
    ///
    /// The segment gap `s` (or the first parameter) places the reflection
    /// peak on the grid; the mean normalized value sets its strength.
    fn unit_cell(&mut self, parameters: &ParameterRecord<'_>) -> Vec<Matrix2> {
        let first = parameters.iter().next().map(|(name, _)| name);
        let position = parameters
            .normalized("s")
            .or_else(|| first.and_then(|name| parameters.normalized(name)))
            .unwrap_or(0.5);
        let strength = parameters.mean_normalized();

        let grid = &self.config.grid;
        let span = grid.span().max(f64::MIN_POSITIVE);
        let center = grid.start_hz + position * span;
        let width = 0.15 * span;
        let jitter = self.noise.sample(&mut self.rng);

        self.frequencies
            .iter()
            .map(|&f| {
                let x = (f - center) / width;
                let theta = (MAX_THETA * (0.2 + 0.8 * strength) * (-x * x).exp() + jitter)
                    .clamp(0.0, MAX_THETA);
                let phase = Complex64::from_polar(1.0, 2.0 * PI * (f - grid.start_hz) / span);
                let r = Complex64::new(0.0, theta.sin()) * phase;
                let t = Complex64::new(theta.cos(), 0.0) * phase;
                Matrix2::new(r, t, t, r)
            })
            .collect()
    }
}

impl SimulationSession for SyntheticSession {
    fn simulate(&mut self, job: &SimulationJob<'_>) -> Result<SimulationOutput, SimulationError> {
        if self.config.failure_rate > 0.0 && self.rng.gen_bool(self.config.failure_rate) {
            return Err(SimulationError::Engine(format!(
                "injected failure for {}",
                job.id
            )));
        }

        let matrices = self.unit_cell(&job.parameters);
        match &self.config.output {
            SyntheticOutput::Scattering => {
                let response = UnitCellResponse::new(self.frequencies.to_vec(), matrices)
                    .map_err(|e| SimulationError::MalformedOutput(e.to_string()))?;
                Ok(SimulationOutput::Scattering(response))
            }
            SyntheticOutput::Artifact { directory, monitor } => {
                let magnitude = matrices.iter().map(|m| m.m11.norm()).collect();
                let path = directory.join(format!("{}.mgsa", job.id));
                MonitorSpectrum::new(self.frequencies.to_vec(), magnitude)
                    .and_then(|spectrum| spectrum.save(&path, monitor))
                    .map_err(|e| SimulationError::Engine(e.to_string()))?;
                Ok(SimulationOutput::Artifact {
                    path,
                    monitor: monitor.clone(),
                })
            }
        }
    }
}
