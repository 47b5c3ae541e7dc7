//! Error types for the timeline tools
//!
//! Data-quality problems in logs are never errors; these cover the outer
//! surfaces only (files, manifests, profiles, serialization).

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for timeline operations
pub type TimelineResult<T> = Result<T, TimelineError>;

/// Timeline errors
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid address manifest: {message}")]
    Manifest { message: String },

    #[error("Invalid target profile: {message}")]
    Profile { message: String },

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid option: {message}")]
    InvalidOption { message: String },
}

impl TimelineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        TimelineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn manifest(msg: impl Into<String>) -> Self {
        TimelineError::Manifest { message: msg.into() }
    }

    pub fn profile(msg: impl Into<String>) -> Self {
        TimelineError::Profile { message: msg.into() }
    }

    pub fn invalid_option(msg: impl Into<String>) -> Self {
        TimelineError::InvalidOption { message: msg.into() }
    }
}
