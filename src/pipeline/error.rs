//! Pipeline-specific error types.

use thiserror::Error;

/// Errors that can occur while running a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stage {index} ('{label}') failed: {message}")]
    Stage {
        index: usize,
        label: String,
        message: String,
    },

    #[error("Pipeline has no stages")]
    Empty,

    #[error("Failed to spawn pipeline worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Pipeline worker panicked")]
    WorkerPanicked,
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
