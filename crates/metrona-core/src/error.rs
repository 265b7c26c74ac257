//! Error types for metrona

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetronaError {
    /// A sequence source could not process a pulse
    #[error("Source failed: {0}")]
    SourceFailed(String),
}

pub type Result<T> = std::result::Result<T, MetronaError>;
