//! Error types for the replacement loader's public constructors.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors from setting up filesystems, workers and configuration.
///
/// Decode failures never surface here; they only reduce the levels a
/// texture ends up with.
#[derive(Error, Debug)]
pub enum ReplacerError {
    /// I/O error while opening a backend
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The zip archive could not be read
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Root of a directory filesystem is not a directory
    #[error("Not a directory: {path:?}")]
    NotADirectory {
        /// The path that was given
        path: PathBuf,
    },

    /// A decode worker thread could not be started
    #[error("Failed to spawn worker thread: {message}")]
    WorkerSpawn {
        /// OS error text
        message: String,
    },

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ReplacerError>;
