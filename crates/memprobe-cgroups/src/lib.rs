//! Cgroup v2 memory ceiling discovery: locating the control file that holds the
//! process's memory limit and parsing its content.

pub mod error;
pub mod limit;
pub mod path;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use limit::{parse_limit, read_limit, read_usage, ResourceLimit};
pub use path::{ControlFilePath, LimitPathResolver};

pub type Result<T> = std::result::Result<T, error::Error>;

/// Locations of the cgroup files the probe reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CgroupPaths {
    /// Process identity descriptor listing the process's cgroup membership
    pub proc_cgroup: PathBuf,
    /// Mount point of the unified cgroup hierarchy
    pub mount_root: PathBuf,
    /// Name of the memory ceiling file inside the process's cgroup
    pub limit_file: String,
    /// Name of the current-usage file inside the process's cgroup
    pub usage_file: String,
}

impl Default for CgroupPaths {
    fn default() -> Self {
        Self {
            proc_cgroup: PathBuf::from("/proc/self/cgroup"),
            mount_root: PathBuf::from("/sys/fs/cgroup"),
            limit_file: "memory.max".to_string(),
            usage_file: "memory.current".to_string(),
        }
    }
}
