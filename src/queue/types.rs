use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// One of the two channels served by the queue service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Tasks,
    Results,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Tasks => "tasks",
            Channel::Results => "results",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a process needs to reach the queue service.
///
/// Written by whoever starts the service and read by every worker at startup,
/// so it must stay stable for the duration of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueAddress {
    pub host: String,
    pub port: u16,
    pub secret: String,
}

impl QueueAddress {
    pub fn new(host: impl Into<String>, port: u16, secret: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            secret: secret.into(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Writes the address as JSON, replacing any previous file atomically.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;

        tracing::info!("Queue address {}:{} written to {}", self.host, self.port, path.display());
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading address file {}", path.display()))?;
        let address = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing address file {}", path.display()))?;
        Ok(address)
    }
}

/// Fill level of one channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelStatus {
    pub len: usize,
    pub capacity: usize,
}
