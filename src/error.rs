use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the pipeline phases.
///
/// Each variant maps onto one failure category a caller may want to tell apart:
/// malformed input, a degenerate batch, a missing dependency artifact, or a
/// document that fails schema validation on read.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("record {index} is malformed: {reason}")]
    MalformedRecord { index: usize, reason: String },

    #[error("record {index} has an invalid partition key: {value}")]
    InvalidPartitionKey { index: usize, value: String },

    #[error("{}: missing required field `{field}`", path.display())]
    MissingField { path: PathBuf, field: String },

    #[error("no work units found in {}", dir.display())]
    EmptyBatch { dir: PathBuf },

    #[error("refusing to build a job graph with zero prediction jobs")]
    DegenerateGraph,

    #[error("invalid job graph: {0}")]
    InvalidGraph(String),

    #[error("result for job {job_id} is missing or unreadable at {}", path.display())]
    MissingArtifact { job_id: u32, path: PathBuf },

    #[error("{}: malformed document: {reason}", path.display())]
    MalformedDocument { path: PathBuf, reason: String },

    #[error("{}: column header {found:?} does not match {expected:?}", path.display())]
    HeaderMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
