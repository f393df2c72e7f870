//! Parsing of cgroup v2 memory ceiling files.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::Error;
use crate::Result;

/// Token the kernel writes into `memory.max` when no ceiling is set
pub const UNLIMITED_TOKEN: &str = "max";

/// Memory ceiling published by the cgroup hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLimit {
    Unlimited,
    Bytes(u64),
}

impl ResourceLimit {
    /// Concrete byte count, if any
    pub fn bytes(self) -> Option<u64> {
        match self {
            ResourceLimit::Bytes(n) => Some(n),
            ResourceLimit::Unlimited => None,
        }
    }

    pub fn is_unlimited(self) -> bool {
        matches!(self, ResourceLimit::Unlimited)
    }
}

impl fmt::Display for ResourceLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLimit::Unlimited => f.write_str(UNLIMITED_TOKEN),
            ResourceLimit::Bytes(n) => write!(f, "{n} bytes"),
        }
    }
}

/// Parse the textual content of a ceiling file.
///
/// Surrounding whitespace is ignored and the unlimited token matches
/// case-insensitively.
pub fn parse_limit(content: &str) -> Result<ResourceLimit> {
    let value = content.trim();
    if value.eq_ignore_ascii_case(UNLIMITED_TOKEN) {
        return Ok(ResourceLimit::Unlimited);
    }
    // The kernel never publishes a ceiling above i64::MAX.
    match value.parse::<u64>() {
        Ok(n) if i64::try_from(n).is_ok() => Ok(ResourceLimit::Bytes(n)),
        _ => Err(Error::Parse {
            value: value.to_string(),
        }),
    }
}

/// Read and parse a ceiling file
pub fn read_limit(path: impl AsRef<Path>) -> Result<ResourceLimit> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_limit(&content)
}

/// Read a usage counter such as `memory.current`
pub fn read_usage(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value = content.trim();
    value.parse().map_err(|_| Error::Parse {
        value: value.to_string(),
    })
}
