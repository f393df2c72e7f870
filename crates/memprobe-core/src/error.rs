//! Error types for the probe core.

use thiserror::Error;

/// Errors that can occur while bootstrapping or adapting the probe
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Cgroup(#[from] memprobe_cgroups::error::Error),

    #[error("memory ceiling is unlimited; nothing to size an allocation against")]
    UnlimitedAtBootstrap,

    #[error("memory ceiling is zero; refusing to start")]
    ZeroLimit,

    #[error("allocation target for a ceiling of {limit} bytes rounds down to zero")]
    ZeroTarget { limit: u64 },

    #[error("failed to allocate {bytes} bytes: {reason}")]
    AllocationFailure { bytes: u64, reason: String },

    #[error("runtime cannot refresh its memory ceiling: {0}")]
    RefreshUnsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
