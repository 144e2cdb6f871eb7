//! Error types for chirp-scrape

use std::path::PathBuf;

use chirp_common::Band;
use thiserror::Error;

/// Result type alias for library operations
pub type Result<T> = std::result::Result<T, ChirpError>;

#[derive(Error, Debug)]
pub enum ChirpError {
    /// Network failure or retryable status that outlived every attempt
    #[error("Fetch of {url} failed after {attempts} attempt(s): {message}")]
    TransientFetch {
        url: String,
        attempts: u32,
        message: String,
    },

    /// The page does not have the shape the parser expects
    #[error("Unrecognized page structure ({context}): {reason}")]
    StructuralParse { context: String, reason: String },

    #[error("Default table for band {band} is missing: {}", path.display())]
    MissingDefaults { band: Band, path: PathBuf },

    #[error("Invalid default table {}: {reason}", path.display())]
    InvalidDefaults { path: PathBuf, reason: String },

    #[error("Catalog index {} is unavailable: {source}", path.display())]
    IndexUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ChirpError {
    pub fn parse(context: impl Into<String>, reason: impl Into<String>) -> Self {
        ChirpError::StructuralParse {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Configuration-level failures abort a run; everything else is absorbed per item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChirpError::MissingDefaults { .. }
                | ChirpError::InvalidDefaults { .. }
                | ChirpError::IndexUnavailable { .. }
                | ChirpError::Config(_)
        )
    }
}
