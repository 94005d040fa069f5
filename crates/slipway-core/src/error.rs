//! Error types for the Slipway orchestration core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Not-found business errors
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Build not found: {0}")]
    BuildNotFound(String),

    #[error("No jobs to start for trigger '{start_from}' on pipeline {pipeline_id}")]
    NoJobsToStart {
        pipeline_id: String,
        start_from: String,
    },

    // Collaborator failures, propagated unchanged
    #[error("Executor error: {0}")]
    Executor(String),

    #[error("SCM error: {0}")]
    Scm(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Token error: {0}")]
    Token(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
