//! Error types for tierfill-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from checkpoint persistence.
///
/// None of these are fatal to a run: the orchestrator logs them and keeps
/// going, at the cost of a less useful resume.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CheckpointError {
    /// Reading, writing, renaming or deleting the checkpoint file failed.
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The in-memory state could not be serialized.
    #[error("checkpoint serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// An update or save was attempted before `initialize` or a successful `load`.
    #[error("checkpoint not initialized")]
    NotInitialized,
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_display_names_path() {
        let err = CheckpointError::io(
            "/tmp/out/.tierfill-checkpoint.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains(".tierfill-checkpoint.json"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn not_initialized_display() {
        assert_eq!(
            CheckpointError::NotInitialized.to_string(),
            "checkpoint not initialized"
        );
    }
}
