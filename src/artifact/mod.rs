//! Spectral artifacts written by the simulation engine.
//!
//! An artifact is a small keyed container of f64 arrays. A monitor spectrum
//! is stored as two datasets: the frequency grid (`frequencies_hz`) and the
//! field magnitude recorded by the monitor (`<monitor>_spectrum_E_magnitude`).
//!
//! # File Format
//!
//! ```text
//! Header (20 bytes):
//!   Magic: "MGSA" (4 bytes)
//!   Version: u16
//!   Flags: u16 (compression in the lower 4 bits)
//!   Dataset count: u32
//!   Reserved: 8 bytes
//!
//! Dataset record (repeated dataset count times):
//!   Name length: u16
//!   Name: UTF-8 bytes
//!   Element count: u64
//!   Payload length: u64
//!   Payload: element count * 8 bytes (f64, little-endian), optionally LZ4
//! ```

mod format;
mod spectrum;

pub use format::{
    ARTIFACT_MAGIC, ARTIFACT_VERSION, ArtifactError, ArtifactHeader, CompressionType,
};
pub use spectrum::{FREQUENCY_DATASET, MonitorSpectrum, SpectrumArtifact, magnitude_dataset};
