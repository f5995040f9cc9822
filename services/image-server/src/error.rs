//! Error types for source inspection and startup.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from inspecting a single source.
#[derive(Debug, Error)]
pub enum InspectError {
    /// The source could not be opened (missing, permission denied, busy).
    #[error("failed to open {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    /// The source was opened but reading it failed.
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
}

impl InspectError {
    pub fn path(&self) -> &PathBuf {
        match self {
            InspectError::Open { path, .. } | InspectError::Read { path, .. } => path,
        }
    }
}

/// Errors that abort startup before any route is served.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Inspect(#[from] InspectError),

    /// The source is neither a regular file, a SquashFS image nor a
    /// block device whose size could be queried.
    #[error(
        "cannot determine the content length of {}: not a regular file, SquashFS image or sized block device",
        .path.display()
    )]
    Unclassified { path: PathBuf },

    #[error("at least one source is required")]
    NoSources,
}
