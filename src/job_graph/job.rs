use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::write_atomic;
use crate::error::{PipelineError, Result};

/// Role of a job in the fan-out/fan-in graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    /// A leaf that runs one work unit.
    #[serde(rename = "prediction")]
    Prediction,
    /// The single sink that merges every leaf's result.
    #[serde(rename = "postprocess")]
    Aggregation,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Prediction => write!(f, "prediction"),
            JobType::Aggregation => write!(f, "postprocess"),
        }
    }
}

/// One entry of the job-description document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Opaque command an external executor runs for this job.
    #[serde(rename = "shell_cmd")]
    pub invocation: String,
    pub job_id: u32,
    pub job_type: JobType,
    #[serde(rename = "depends_on_job_ids")]
    pub depends_on: Vec<u32>,
    pub expected_outputs: Vec<PathBuf>,
}

impl Job {
    /// The first expected output, where the job's result artifact lands.
    pub fn primary_output(&self) -> Option<&Path> {
        self.expected_outputs.first().map(PathBuf::as_path)
    }
}

/// Ordered jobs; the order is a valid execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobGraph {
    jobs: Vec<Job>,
}

impl JobGraph {
    /// Wrap `jobs` after checking the fan-out/fan-in invariants.
    pub fn new(jobs: Vec<Job>) -> Result<Self> {
        let graph = Self { jobs };
        graph.validate()?;
        Ok(graph)
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn job(&self, job_id: u32) -> Option<&Job> {
        // Ids are dense and zero-based, so the id is the position.
        self.jobs.get(job_id as usize).filter(|j| j.job_id == job_id)
    }

    /// The sink job. Always present on a validated graph.
    pub fn aggregation_job(&self) -> Option<&Job> {
        self.jobs
            .last()
            .filter(|j| j.job_type == JobType::Aggregation)
    }

    pub fn prediction_jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs
            .iter()
            .filter(|j| j.job_type == JobType::Prediction)
    }

    /// True for an aggregation-only graph with nothing to merge.
    pub fn is_degenerate(&self) -> bool {
        self.jobs.len() == 1
    }

    /// Check the invariants every job-description document must hold:
    /// dense zero-based ids, leaves without dependencies, one aggregation job
    /// in last position depending on every leaf in ascending order, and at
    /// least one expected output per job.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| -> Result<()> { Err(PipelineError::InvalidGraph(reason)) };

        let Some(last) = self.jobs.last() else {
            return invalid("graph has no jobs".into());
        };
        if last.job_type != JobType::Aggregation {
            return invalid(format!("last job {} is not an aggregation job", last.job_id));
        }

        let leaves = self.jobs.len() - 1;
        for (pos, job) in self.jobs.iter().enumerate() {
            if job.job_id as usize != pos {
                return invalid(format!("job at position {pos} has id {}", job.job_id));
            }
            if job.expected_outputs.is_empty() {
                return invalid(format!("job {} declares no expected outputs", job.job_id));
            }
            if pos < leaves {
                if job.job_type != JobType::Prediction {
                    return invalid(format!("job {} must be a prediction job", job.job_id));
                }
                if !job.depends_on.is_empty() {
                    return invalid(format!("prediction job {} has dependencies", job.job_id));
                }
            }
        }

        let expected: Vec<u32> = (0..leaves as u32).collect();
        if last.depends_on != expected {
            return invalid(format!(
                "aggregation job depends on {:?}, expected {:?}",
                last.depends_on, expected
            ));
        }
        Ok(())
    }

    /// Read and validate a job-description document.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let jobs: Vec<Job> =
            serde_json::from_str(&contents).map_err(|e| PipelineError::MalformedDocument {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Self::new(jobs)
    }

    /// Write the document atomically as a pretty-printed JSON array.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
    }
}
