//! Pipeline Configuration
//!
//! One TOML file configures every subcommand. All fields have defaults, so a missing
//! file or a partial one is valid.
//!
//! ```toml
//! [queue]
//! port = 50757
//! secret = "change-me"
//!
//! [pool]
//! workers = 8
//!
//! [extract]
//! image_root = "/data/websites"
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::controller::types::ControllerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue: QueueSettings,
    pub pool: PoolSettings,
    pub extract: ExtractSettings,
    pub neighbors: NeighborSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueSettings {
    /// Address the service binds to.
    pub host: String,
    /// Host written into the address file when workers reach the service under
    /// another name than `host`.
    pub advertise_host: Option<String>,
    /// 0 picks a free port.
    pub port: u16,
    pub secret: String,
    /// Items each channel holds before producers block.
    pub capacity: usize,
    pub address_file: PathBuf,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            advertise_host: None,
            port: 50757,
            secret: "feature-pipeline".to_string(),
            capacity: 100,
            address_file: PathBuf::from("queue-address.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    pub workers: usize,
    /// Workers started for feature extraction; the pool grows to `workers` for the
    /// neighbor search. Defaults to half the pool.
    pub extract_workers: Option<usize>,
    pub checkpoint_every: usize,
    pub progress_every: usize,
    pub scratch_dir: PathBuf,
    /// Connection attempts a worker makes before giving up.
    pub connect_attempts: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 7,
            extract_workers: None,
            checkpoint_every: 100,
            progress_every: 100,
            scratch_dir: std::env::temp_dir().join("feature-pipeline"),
            connect_attempts: 10,
        }
    }
}

impl PoolSettings {
    pub fn extract_workers(&self) -> usize {
        self.extract_workers
            .unwrap_or(self.workers / 2)
            .clamp(1, self.workers.max(1))
    }

    /// Controller settings for a job running on `pool_size` workers.
    pub fn controller(&self, pool_size: usize, release_workers: bool) -> ControllerConfig {
        ControllerConfig {
            pool_size,
            checkpoint_every: self.checkpoint_every,
            progress_every: self.progress_every,
            release_workers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractSettings {
    pub binary: PathBuf,
    pub detector: String,
    pub descriptor: String,
    pub max_regions: usize,
    pub image_root: PathBuf,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("colorDescriptor"),
            detector: "harrislaplace".to_string(),
            descriptor: "csift".to_string(),
            max_regions: 10_000,
            image_root: PathBuf::from("images"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NeighborSettings {
    /// K, the number of centroids kept per row.
    pub count: usize,
    pub batch_size: usize,
    pub codebook: PathBuf,
}

impl Default for NeighborSettings {
    fn default() -> Self {
        Self {
            count: 10,
            batch_size: 100,
            codebook: PathBuf::from("codebook.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("features.journal"),
        }
    }
}

impl PipelineConfig {
    /// Reads `path`, or returns the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::parse(&text).with_context(|| format!("in config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            bail!("queue.capacity must be at least 1");
        }
        if self.pool.workers == 0 {
            bail!("pool.workers must be at least 1");
        }
        if self.neighbors.batch_size == 0 {
            bail!("neighbors.batch_size must be at least 1");
        }
        if self.neighbors.count == 0 {
            bail!("neighbors.count must be at least 1");
        }
        Ok(())
    }
}
