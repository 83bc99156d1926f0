//! Binary format definitions for spectral artifact files.

use std::io::{self, Read, Write};

/// Magic bytes identifying a spectral artifact file.
pub const ARTIFACT_MAGIC: &[u8; 4] = b"MGSA";

/// Current format version.
pub const ARTIFACT_VERSION: u16 = 1;

/// Upper bound on a dataset name, in bytes.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Errors reading or writing spectral artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid MGSA magic bytes")]
    BadMagic,
    #[error("Unsupported MGSA version: {0}")]
    UnsupportedVersion(u16),
    #[error("Malformed artifact: {0}")]
    Malformed(String),
    #[error("Artifact is missing dataset '{0}'")]
    MissingDataset(String),
    #[error("{0:?} compression is not available in this build")]
    CompressionUnavailable(CompressionType),
}

/// Compression applied to dataset payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionType {
    /// Raw little-endian f64 data.
    #[default]
    None = 0,
    /// LZ4 fast compression.
    Lz4 = 1,
}

impl CompressionType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Lz4),
            _ => None,
        }
    }
}

/// File header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactHeader {
    /// Payload compression for every dataset.
    pub compression: CompressionType,
    /// Number of datasets that follow.
    pub dataset_count: u32,
}

impl ArtifactHeader {
    /// Magic(4) + Version(2) + Flags(2) + DatasetCount(4) + Reserved(8) = 20
    pub const SIZE: usize = 20;

    /// Write header to output.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(ARTIFACT_MAGIC)?;
        w.write_all(&ARTIFACT_VERSION.to_le_bytes())?;
        w.write_all(&(self.compression as u16).to_le_bytes())?;
        w.write_all(&self.dataset_count.to_le_bytes())?;
        // Reserved bytes
        w.write_all(&[0u8; 8])?;
        Ok(())
    }

    /// Read header from input.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, ArtifactError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != ARTIFACT_MAGIC {
            return Err(ArtifactError::BadMagic);
        }

        let mut buf2 = [0u8; 2];
        let mut buf4 = [0u8; 4];

        r.read_exact(&mut buf2)?;
        let version = u16::from_le_bytes(buf2);
        if version != ARTIFACT_VERSION {
            return Err(ArtifactError::UnsupportedVersion(version));
        }

        r.read_exact(&mut buf2)?;
        let flags = u16::from_le_bytes(buf2);
        let compression = CompressionType::from_u8((flags & 0x0F) as u8).ok_or_else(|| {
            ArtifactError::Malformed(format!("unknown compression flag {}", flags & 0x0F))
        })?;

        r.read_exact(&mut buf4)?;
        let dataset_count = u32::from_le_bytes(buf4);

        // Skip reserved bytes
        let mut reserved = [0u8; 8];
        r.read_exact(&mut reserved)?;

        Ok(Self {
            compression,
            dataset_count,
        })
    }
}

/// Write one named dataset record.
pub fn write_dataset<W: Write>(
    w: &mut W,
    name: &str,
    values: &[f64],
    compression: CompressionType,
) -> Result<(), ArtifactError> {
    if name.len() > MAX_NAME_LEN {
        return Err(ArtifactError::Malformed(format!(
            "dataset name of {} bytes is too long",
            name.len()
        )));
    }

    let raw = encode_values(values);
    let payload = match compression {
        CompressionType::None => raw,
        CompressionType::Lz4 => compress_lz4(&raw)?,
    };

    w.write_all(&(name.len() as u16).to_le_bytes())?;
    w.write_all(name.as_bytes())?;
    w.write_all(&(values.len() as u64).to_le_bytes())?;
    w.write_all(&(payload.len() as u64).to_le_bytes())?;
    w.write_all(&payload)?;
    Ok(())
}

/// Read one named dataset record.
pub fn read_dataset<R: Read>(
    r: &mut R,
    compression: CompressionType,
) -> Result<(String, Vec<f64>), ArtifactError> {
    let mut buf2 = [0u8; 2];
    let mut buf8 = [0u8; 8];

    r.read_exact(&mut buf2)?;
    let name_len = u16::from_le_bytes(buf2) as usize;
    let mut name = vec![0u8; name_len];
    r.read_exact(&mut name)?;
    let name = String::from_utf8(name)
        .map_err(|e| ArtifactError::Malformed(format!("dataset name is not UTF-8: {}", e)))?;

    r.read_exact(&mut buf8)?;
    let count = u64::from_le_bytes(buf8) as usize;

    r.read_exact(&mut buf8)?;
    let payload_len = u64::from_le_bytes(buf8) as usize;

    let mut payload = Vec::new();
    r.by_ref()
        .take(payload_len as u64)
        .read_to_end(&mut payload)?;
    if payload.len() != payload_len {
        return Err(ArtifactError::Malformed(format!(
            "dataset '{}' truncated: {} of {} bytes",
            name,
            payload.len(),
            payload_len
        )));
    }

    let raw = match compression {
        CompressionType::None => payload,
        CompressionType::Lz4 => decompress_lz4(&payload)?,
    };

    let values = decode_values(&raw)?;
    if values.len() != count {
        return Err(ArtifactError::Malformed(format!(
            "dataset '{}' declares {} values but holds {}",
            name,
            count,
            values.len()
        )));
    }

    Ok((name, values))
}

/// Encode f64 slice to bytes.
pub fn encode_values(data: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() * 8);
    for v in data {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode bytes to f64 values.
pub fn decode_values(bytes: &[u8]) -> Result<Vec<f64>, ArtifactError> {
    if bytes.len() % 8 != 0 {
        return Err(ArtifactError::Malformed(format!(
            "payload of {} bytes is not a whole number of f64 values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect())
}

/// Compress data using LZ4.
#[cfg(feature = "lz4")]
pub fn compress_lz4(data: &[u8]) -> Result<Vec<u8>, ArtifactError> {
    Ok(lz4_flex::compress_prepend_size(data))
}

/// Decompress LZ4 data.
#[cfg(feature = "lz4")]
pub fn decompress_lz4(data: &[u8]) -> Result<Vec<u8>, ArtifactError> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| ArtifactError::Malformed(format!("LZ4 payload: {}", e)))
}

#[cfg(not(feature = "lz4"))]
pub fn compress_lz4(_data: &[u8]) -> Result<Vec<u8>, ArtifactError> {
    Err(ArtifactError::CompressionUnavailable(CompressionType::Lz4))
}

#[cfg(not(feature = "lz4"))]
pub fn decompress_lz4(_data: &[u8]) -> Result<Vec<u8>, ArtifactError> {
    Err(ArtifactError::CompressionUnavailable(CompressionType::Lz4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_size_and_fields() {
        let header = ArtifactHeader {
            compression: CompressionType::None,
            dataset_count: 2,
        };

        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), ArtifactHeader::SIZE);
        assert_eq!(&buf[..4], ARTIFACT_MAGIC);

        let decoded = ArtifactHeader::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut buf = Vec::new();
        ArtifactHeader {
            compression: CompressionType::None,
            dataset_count: 0,
        }
        .write_to(&mut buf)
        .unwrap();

        let mut wrong_magic = buf.clone();
        wrong_magic[0] = b'X';
        assert!(matches!(
            ArtifactHeader::read_from(&mut Cursor::new(&wrong_magic)),
            Err(ArtifactError::BadMagic)
        ));

        let mut wrong_version = buf;
        wrong_version[4] = 9;
        assert!(matches!(
            ArtifactHeader::read_from(&mut Cursor::new(&wrong_version)),
            Err(ArtifactError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_truncated_dataset_is_malformed() {
        let mut buf = Vec::new();
        write_dataset(&mut buf, "in", &[1.0, 2.0, 3.0], CompressionType::None).unwrap();
        buf.truncate(buf.len() - 4);

        let err = read_dataset(&mut Cursor::new(&buf), CompressionType::None).unwrap_err();
        assert!(matches!(err, ArtifactError::Malformed(_)));
    }

    #[test]
    fn test_decode_rejects_partial_values() {
        assert!(decode_values(&[0u8; 12]).is_err());
        assert_eq!(decode_values(&encode_values(&[0.5, -1.0])).unwrap(), vec![0.5, -1.0]);
    }

    #[cfg(not(feature = "lz4"))]
    #[test]
    fn test_lz4_unavailable_without_feature() {
        let err = write_dataset(&mut Vec::new(), "in", &[1.0], CompressionType::Lz4).unwrap_err();
        assert!(matches!(err, ArtifactError::CompressionUnavailable(_)));
    }
}
