//! Merges the result fragments of a finished fan-out into a single table.
//!
//! Fragments are read in ascending job id order when driven by a job graph, or
//! in directory enumeration order when driven by a results directory. The
//! header of the first fragment becomes the merged header. Every fragment is
//! read before anything is returned, so a missing fragment never produces a
//! partial aggregate.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::artifact::{ResultArtifact, ResultTable};
use crate::error::{PipelineError, Result};
use crate::job_graph::JobGraph;

/// What to do when a fragment's header differs from the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderPolicy {
    /// Keep the first header and log a warning.
    #[default]
    TrustFirst,
    /// Abort with [`PipelineError::HeaderMismatch`].
    Strict,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub fragments: usize,
}

impl AggregatedResult {
    fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            fragments: 0,
        }
    }

    fn absorb(&mut self, path: &Path, table: ResultTable, policy: HeaderPolicy) -> Result<()> {
        if self.fragments == 0 {
            self.columns = table.table_columns;
        } else if table.table_columns != self.columns {
            match policy {
                HeaderPolicy::Strict => {
                    return Err(PipelineError::HeaderMismatch {
                        path: path.to_path_buf(),
                        expected: self.columns.clone(),
                        found: table.table_columns,
                    });
                }
                HeaderPolicy::TrustFirst => {
                    tracing::warn!(
                        fragment = %path.display(),
                        expected = ?self.columns,
                        found = ?table.table_columns,
                        "fragment header differs from the first fragment; keeping the first"
                    );
                }
            }
        }
        self.rows.extend(table.table_data);
        self.fragments += 1;
        Ok(())
    }

    /// Wrap the merged table in a result artifact tagged with `kind`.
    pub fn into_artifact(self, kind: &str) -> ResultArtifact {
        ResultArtifact::from_table(ResultTable {
            kind: kind.to_string(),
            table_columns: self.columns,
            table_data: self.rows,
        })
    }
}

pub struct Aggregator {
    policy: HeaderPolicy,
}

impl Aggregator {
    pub fn new(policy: HeaderPolicy) -> Self {
        Self { policy }
    }

    /// Merge the outputs of every job the aggregation job depends on.
    pub fn from_graph(&self, graph: &JobGraph) -> Result<AggregatedResult> {
        let sink = graph
            .aggregation_job()
            .ok_or_else(|| PipelineError::InvalidGraph("no aggregation job".into()))?;

        if graph.is_degenerate() {
            tracing::warn!("job graph has no prediction jobs; aggregate will be empty");
        }

        let mut deps = sink.depends_on.clone();
        deps.sort_unstable();

        let mut merged = AggregatedResult::empty();
        for job_id in deps {
            let job = graph.job(job_id).ok_or_else(|| {
                PipelineError::InvalidGraph(format!("dependency {job_id} is not in the graph"))
            })?;
            let path = job.primary_output().ok_or_else(|| {
                PipelineError::InvalidGraph(format!("job {job_id} declares no expected outputs"))
            })?;

            let table = read_fragment(path).map_err(|e| match e {
                PipelineError::Io(_) => PipelineError::MissingArtifact {
                    job_id,
                    path: path.to_path_buf(),
                },
                other => other,
            })?;
            merged.absorb(path, table, self.policy)?;
        }

        tracing::info!(
            fragments = merged.fragments,
            rows = merged.rows.len(),
            "merged job results"
        );
        Ok(merged)
    }

    /// Merge every result artifact found directly in `dir`.
    pub fn from_directory(&self, dir: &Path) -> Result<AggregatedResult> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                paths.push(entry.path());
            }
        }

        if paths.is_empty() {
            return Err(PipelineError::EmptyBatch {
                dir: dir.to_path_buf(),
            });
        }

        let mut merged = AggregatedResult::empty();
        for path in &paths {
            let table = read_fragment(path)?;
            merged.absorb(path, table, self.policy)?;
        }

        tracing::info!(
            fragments = merged.fragments,
            rows = merged.rows.len(),
            dir = %dir.display(),
            "merged result directory"
        );
        Ok(merged)
    }
}

fn read_fragment(path: &Path) -> Result<ResultTable> {
    ResultArtifact::from_path(path)?
        .into_table()
        .ok_or_else(|| PipelineError::MalformedDocument {
            path: path.to_path_buf(),
            reason: "no results entry".into(),
        })
}
