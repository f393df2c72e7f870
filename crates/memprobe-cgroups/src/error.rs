//! Error types for cgroup operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while locating or reading the memory ceiling
#[derive(Error, Debug)]
pub enum Error {
    #[error("no unified hierarchy (0::) entry in {descriptor}")]
    NotFound { descriptor: PathBuf },

    #[error("memory ceiling file {path} is unavailable: {source}")]
    PathUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse memory ceiling value {value:?}")]
    Parse { value: String },
}
