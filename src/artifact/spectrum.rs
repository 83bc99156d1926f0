//! Keyed spectral artifacts and monitor spectra.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::format::{
    ArtifactError, ArtifactHeader, CompressionType, read_dataset, write_dataset,
};

/// Dataset holding the frequency grid.
pub const FREQUENCY_DATASET: &str = "frequencies_hz";

/// Name of the field-magnitude dataset recorded by `monitor`.
pub fn magnitude_dataset(monitor: &str) -> String {
    format!("{}_spectrum_E_magnitude", monitor)
}

/// A set of named f64 arrays persisted together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumArtifact {
    datasets: BTreeMap<String, Vec<f64>>,
    compression: CompressionType,
}

impl SpectrumArtifact {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `compression` for dataset payloads when writing.
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Insert or replace a dataset, returning the previous values.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Option<Vec<f64>> {
        self.datasets.insert(name.into(), values)
    }

    pub fn dataset(&self, name: &str) -> Option<&[f64]> {
        self.datasets.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ArtifactError> {
        let header = ArtifactHeader {
            compression: self.compression,
            dataset_count: self.datasets.len() as u32,
        };
        header.write_to(w)?;
        for (name, values) in &self.datasets {
            write_dataset(w, name, values, self.compression)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, ArtifactError> {
        let header = ArtifactHeader::read_from(r)?;
        let mut datasets = BTreeMap::new();
        for _ in 0..header.dataset_count {
            let (name, values) = read_dataset(r, header.compression)?;
            if datasets.insert(name.clone(), values).is_some() {
                return Err(ArtifactError::Malformed(format!(
                    "dataset '{}' appears twice",
                    name
                )));
            }
        }
        Ok(Self {
            datasets,
            compression: header.compression,
        })
    }

    /// Write to a file, replacing any existing one.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ArtifactError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ArtifactError> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }
}

/// Field-magnitude spectrum recorded by one monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSpectrum {
    frequencies: Vec<f64>,
    magnitude: Vec<f64>,
}

impl MonitorSpectrum {
    pub fn new(frequencies: Vec<f64>, magnitude: Vec<f64>) -> Result<Self, ArtifactError> {
        if frequencies.is_empty() {
            return Err(ArtifactError::Malformed("empty frequency grid".to_string()));
        }
        if frequencies.len() != magnitude.len() {
            return Err(ArtifactError::Malformed(format!(
                "{} frequencies but {} magnitude samples",
                frequencies.len(),
                magnitude.len()
            )));
        }
        Ok(Self {
            frequencies,
            magnitude,
        })
    }

    /// Extract the spectrum of `monitor` from an artifact.
    pub fn from_artifact(artifact: &SpectrumArtifact, monitor: &str) -> Result<Self, ArtifactError> {
        let frequencies = artifact
            .dataset(FREQUENCY_DATASET)
            .ok_or_else(|| ArtifactError::MissingDataset(FREQUENCY_DATASET.to_string()))?;
        let key = magnitude_dataset(monitor);
        let magnitude = artifact
            .dataset(&key)
            .ok_or(ArtifactError::MissingDataset(key))?;
        Self::new(frequencies.to_vec(), magnitude.to_vec())
    }

    /// Artifact holding this spectrum under `monitor`.
    pub fn to_artifact(&self, monitor: &str) -> SpectrumArtifact {
        let mut artifact = SpectrumArtifact::new();
        artifact.insert(FREQUENCY_DATASET, self.frequencies.clone());
        artifact.insert(magnitude_dataset(monitor), self.magnitude.clone());
        artifact
    }

    pub fn load<P: AsRef<Path>>(path: P, monitor: &str) -> Result<Self, ArtifactError> {
        Self::from_artifact(&SpectrumArtifact::load(path)?, monitor)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P, monitor: &str) -> Result<(), ArtifactError> {
        self.to_artifact(monitor).save(path)
    }

    #[inline]
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    #[inline]
    pub fn magnitude(&self) -> &[f64] {
        &self.magnitude
    }
}
