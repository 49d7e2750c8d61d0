//! Feature Extraction Handler
//!
//! Wraps the external color-descriptor binary. The binary writes its output into the
//! worker's scratch directory in the binary descriptor format; the file is parsed into
//! regions and removed before the next task.

use crate::task::types::ExtractedRegion;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Magic bytes opening a binary descriptor file.
const BINARY_MAGIC: &[u8; 8] = b"BINDESC1";
const HEADER_LEN: usize = 16 + 4 * 4;
/// Location layout with regions: x, y, scale, orientation, cornerness.
const REGION_ELEMENTS: usize = 5;
/// Converts detector scale into a region radius in pixels.
const RADIUS_SCALE: f64 = 8.4853;
const ARTIFACT_NAME: &str = "descriptors.bin";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("descriptor binary exited with {0}")]
    ExitStatus(std::process::ExitStatus),

    #[error("descriptor binary produced no output file")]
    MissingOutput,

    #[error("malformed descriptor file: {0}")]
    Format(String),

    #[error("scratch directory I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns one image into a list of regions with descriptors.
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    /// `scratch` is a directory owned by the calling worker for intermediate files.
    async fn extract(
        &self,
        image: &Path,
        scratch: &Path,
    ) -> Result<Vec<ExtractedRegion>, ExtractError>;
}

/// Runs the color-descriptor binary on one image at a time.
#[derive(Debug, Clone)]
pub struct ColorDescriptorExtractor {
    pub binary: PathBuf,
    pub detector: String,
    pub descriptor: String,
    pub max_regions: usize,
}

impl ColorDescriptorExtractor {
    pub fn new(binary: impl Into<PathBuf>, max_regions: usize) -> Self {
        Self {
            binary: binary.into(),
            detector: "harrislaplace".to_string(),
            descriptor: "csift".to_string(),
            max_regions,
        }
    }

    fn command(&self, image: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg(image)
            .arg("--detector")
            .arg(&self.detector)
            .arg("--descriptor")
            .arg(&self.descriptor)
            .arg("--output")
            .arg(output)
            .arg("--outputFormat")
            .arg("binary")
            .arg("--keepLimited")
            .arg(self.max_regions.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl FeatureExtractor for ColorDescriptorExtractor {
    async fn extract(
        &self,
        image: &Path,
        scratch: &Path,
    ) -> Result<Vec<ExtractedRegion>, ExtractError> {
        let output = scratch.join(ARTIFACT_NAME);

        let status = self
            .command(image, &output)
            .status()
            .await
            .map_err(|source| ExtractError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        let parsed = if status.success() {
            match tokio::fs::read(&output).await {
                Ok(bytes) => parse_descriptor_file(&bytes).map(DescriptorFile::into_regions),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ExtractError::MissingOutput),
                Err(e) => Err(ExtractError::Io(e)),
            }
        } else {
            Err(ExtractError::ExitStatus(status))
        };

        if let Err(e) = tokio::fs::remove_file(&output).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Could not remove {}: {}", output.display(), e);
            }
        }

        parsed
    }
}

/// Parsed contents of a binary descriptor file.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorFile {
    pub name: String,
    pub elements_per_point: usize,
    pub dimensions: usize,
    /// One row of `elements_per_point` values per point.
    pub locations: Vec<Vec<f64>>,
    /// One row of `dimensions` values per point.
    pub descriptors: Vec<Vec<f64>>,
}

impl DescriptorFile {
    /// Converts points into regions. Files whose locations are not
    /// `(x, y, scale, orientation, cornerness)` carry no regions.
    pub fn into_regions(self) -> Vec<ExtractedRegion> {
        if self.elements_per_point != REGION_ELEMENTS {
            return Vec::new();
        }

        self.locations
            .into_iter()
            .zip(self.descriptors)
            .map(|(location, descriptor)| ExtractedRegion {
                center: [location[0] as i64, location[1] as i64],
                radius: (location[2] * RADIUS_SCALE) as i64,
                cornerness: location[4],
                descriptor: descriptor
                    .into_iter()
                    .map(|v| v.clamp(0.0, 255.0) as u8)
                    .collect(),
            })
            .collect()
    }
}

/// Parses the binary descriptor format.
///
/// Layout: `BINDESC1`, an 8-byte descriptor name, four little-endian `u32`
/// (elements per point, dimensions, point count, bytes per element), then all location
/// values followed by all descriptor values as `f32` or `f64`.
pub fn parse_descriptor_file(bytes: &[u8]) -> Result<DescriptorFile, ExtractError> {
    if bytes.len() < HEADER_LEN {
        return Err(ExtractError::Format(format!(
            "{} bytes is shorter than the header",
            bytes.len()
        )));
    }
    if &bytes[..8] != BINARY_MAGIC {
        return Err(ExtractError::Format("missing BINDESC1 magic".to_string()));
    }

    let name = String::from_utf8_lossy(&bytes[8..16])
        .trim_end_matches(['\0', ' '])
        .to_string();
    let field = |i: usize| {
        let at = 16 + i * 4;
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize
    };
    let elements_per_point = field(0);
    let dimensions = field(1);
    let point_count = field(2);
    let bytes_per_element = field(3);

    if bytes_per_element != 4 && bytes_per_element != 8 {
        return Err(ExtractError::Format(format!(
            "unsupported element size {}",
            bytes_per_element
        )));
    }

    let overflow = || ExtractError::Format("header sizes overflow".to_string());
    let location_len = point_count
        .checked_mul(elements_per_point)
        .ok_or_else(overflow)?;
    let values_needed = point_count
        .checked_mul(dimensions)
        .and_then(|descriptor_len| descriptor_len.checked_add(location_len))
        .ok_or_else(overflow)?;
    let bytes_needed = values_needed
        .checked_mul(bytes_per_element)
        .ok_or_else(overflow)?;
    let body = &bytes[HEADER_LEN..];
    if body.len() < bytes_needed {
        return Err(ExtractError::Format(format!(
            "expected {} values, file holds {}",
            values_needed,
            body.len() / bytes_per_element
        )));
    }

    let values: Vec<f64> = body
        .chunks_exact(bytes_per_element)
        .take(values_needed)
        .map(|chunk| match chunk {
            [a, b, c, d] => f64::from(f32::from_le_bytes([*a, *b, *c, *d])),
            _ => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            }
        })
        .collect();

    let (location_values, descriptor_values) = values.split_at(location_len);
    let rows = |flat: &[f64], width: usize| -> Vec<Vec<f64>> {
        if width == 0 {
            return vec![Vec::new(); point_count];
        }
        flat.chunks_exact(width).map(<[f64]>::to_vec).collect()
    };

    Ok(DescriptorFile {
        name,
        elements_per_point,
        dimensions,
        locations: rows(location_values, elements_per_point),
        descriptors: rows(descriptor_values, dimensions),
    })
}
