//! Probe configuration.

use memprobe_cgroups::CgroupPaths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Error;
use crate::Result;

/// Immutable settings handed to every component at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub cgroup: CgroupPaths,
    /// Share of the ceiling to allocate, in percent
    pub allocation_percent: u8,
    /// Delay between two reads of the ceiling file
    pub poll_interval_ms: u64,
    /// Share of the ceiling the managed heap may use, in percent
    pub heap_limit_percent: u8,
    /// Fixed heap ceiling; when set the heap no longer follows the cgroup
    pub heap_hard_limit: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            cgroup: CgroupPaths::default(),
            allocation_percent: 70,
            poll_interval_ms: 1000,
            heap_limit_percent: 75,
            heap_hard_limit: None,
        }
    }
}

impl ProbeConfig {
    /// Load a JSON configuration file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.allocation_percent) {
            return Err(Error::Config(format!(
                "allocation_percent must be within 1..=100, got {}",
                self.allocation_percent
            )));
        }
        if !(1..=100).contains(&self.heap_limit_percent) {
            return Err(Error::Config(format!(
                "heap_limit_percent must be within 1..=100, got {}",
                self.heap_limit_percent
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
