//! Resolution of the memory ceiling file for the current process.

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Error;
use crate::{CgroupPaths, Result};

/// Absolute path of the control file holding the memory ceiling.
///
/// Resolved once at startup; the monitor rereads the same file on every tick
/// even when its content changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFilePath(PathBuf);

impl ControlFilePath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Sibling file in the same cgroup directory (e.g. `memory.current`)
    pub fn sibling(&self, file_name: &str) -> PathBuf {
        match self.0.parent() {
            Some(dir) => dir.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}

impl AsRef<Path> for ControlFilePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ControlFilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Maps the current process to the ceiling file of its unified-hierarchy cgroup
#[derive(Debug, Clone)]
pub struct LimitPathResolver {
    paths: CgroupPaths,
}

impl LimitPathResolver {
    pub fn new(paths: CgroupPaths) -> Self {
        Self { paths }
    }

    /// Read the process descriptor and return the path of the ceiling file
    pub fn resolve(&self) -> Result<ControlFilePath> {
        let descriptor = &self.paths.proc_cgroup;
        let content = fs::read_to_string(descriptor).map_err(|source| Error::Io {
            path: descriptor.clone(),
            source,
        })?;

        let relative = unified_entry(&content).ok_or_else(|| Error::NotFound {
            descriptor: descriptor.clone(),
        })?;
        debug!(relative, "found unified hierarchy entry");

        let path = self
            .paths
            .mount_root
            .join(relative.trim_start_matches('/'))
            .join(&self.paths.limit_file);

        info!(path = %path.display(), "reading memory ceiling");

        if let Err(source) = File::open(&path) {
            return Err(Error::PathUnavailable { path, source });
        }

        Ok(ControlFilePath(path))
    }
}

/// Returns the hierarchy-relative path of the `0::<path>` line, if any.
///
/// Only lines with hierarchy id `0` and an empty controller list belong to the
/// unified hierarchy; v1 controller lines are skipped.
pub fn unified_entry(descriptor: &str) -> Option<&str> {
    descriptor.lines().find_map(|line| {
        let mut fields = line.splitn(3, ':');
        match (fields.next(), fields.next(), fields.next()) {
            (Some("0"), Some(""), Some(path)) => Some(path.trim_end()),
            _ => None,
        }
    })
}
