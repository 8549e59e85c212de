use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::aggregate::{AggregatedResult, Aggregator, HeaderPolicy};
use crate::artifact::{OutputFormat, with_format_extension};
use crate::batch::BatchSelector;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job_graph::{GraphBuilder, JobGraph};
use crate::partition::{PartitionInput, Partitioner};

/// File written by a directory-driven postprocess when no prefix is given.
const NO_JD_RESULT: &str = "final-result-no-jd";

/// Outcome of a preprocess run.
#[derive(Debug)]
pub struct PreprocessReport {
    /// Work units written by this run.
    pub units_written: usize,
    /// Parameter files of the active batch, in job id order.
    pub param_files: Vec<PathBuf>,
    /// Parameter files from earlier runs that were ignored.
    pub stale: usize,
    pub graph: JobGraph,
    pub job_descriptions: PathBuf,
}

/// Partition the input, select the active batch and write the job graph.
pub fn preprocess(
    config: &PipelineConfig,
    input_path: &Path,
    final_format: OutputFormat,
) -> Result<PreprocessReport> {
    // PARTITION
    let input = PartitionInput::from_path(input_path)
        .with_context(|| format!("failed to read input {}", input_path.display()))?;
    input.require_metadata(input_path, &config.required_metadata)?;
    let units = Partitioner::from_config(config).partition(&input)?;
    for unit in &units {
        tracing::debug!(
            partition_key = unit.partition_key,
            sequences = unit.payload.len(),
            payload = %unit.payload_path.display(),
            params = %unit.parameter_path.display(),
            created_at = %unit.created_at,
            "wrote work unit"
        );
    }
    if units.is_empty() {
        bail!(PipelineError::EmptyBatch {
            dir: config.params_dir()
        });
    }

    // SELECT
    let batch = BatchSelector::from_config(config).select(&config.params_dir())?;
    tracing::debug!(
        clusters = batch.clusters,
        selected = batch.files.len(),
        "clustered parameter files"
    );
    if batch.files.len() != units.len() {
        tracing::warn!(
            written = units.len(),
            selected = batch.files.len(),
            "active batch size differs from the number of units just written"
        );
    }

    // BUILD
    let graph = GraphBuilder::from_config(config)
        .with_final_format(final_format)
        .build(&batch.files)?;
    for job in graph.jobs() {
        tracing::debug!(
            job_id = job.job_id,
            job_type = %job.job_type,
            depends_on = ?job.depends_on,
            shell_cmd = %job.invocation,
            "planned job"
        );
    }
    let job_descriptions = config.job_descriptions();
    graph
        .write(&job_descriptions)
        .with_context(|| format!("failed to write {}", job_descriptions.display()))?;

    tracing::info!(path = %job_descriptions.display(), "wrote job descriptions");

    Ok(PreprocessReport {
        units_written: units.len(),
        param_files: batch.files,
        stale: batch.stale,
        graph,
        job_descriptions,
    })
}

/// Inputs for a postprocess run, already resolved against the configuration.
#[derive(Debug, Clone)]
pub struct PostprocessRequest {
    /// Job-description document; `None` selects directory-driven mode.
    pub job_descriptions: Option<PathBuf>,
    pub results_dir: PathBuf,
    pub postprocessed_dir: PathBuf,
    pub output_prefix: Option<PathBuf>,
    pub format: OutputFormat,
    pub policy: HeaderPolicy,
}

impl PostprocessRequest {
    /// Defaults from `config`: graph-driven when its job-description document
    /// exists, directory-driven otherwise.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let jd = config.job_descriptions();
        Self {
            job_descriptions: jd.is_file().then_some(jd),
            results_dir: config.results_dir(),
            postprocessed_dir: config.output_dir(),
            output_prefix: None,
            format: OutputFormat::Json,
            policy: if config.strict_headers {
                HeaderPolicy::Strict
            } else {
                HeaderPolicy::TrustFirst
            },
        }
    }
}

#[derive(Debug)]
pub struct PostprocessReport {
    pub output: PathBuf,
    pub fragments: usize,
    pub rows: usize,
}

/// Merge all fragments and write the consolidated artifact.
pub fn postprocess(config: &PipelineConfig, req: &PostprocessRequest) -> Result<PostprocessReport> {
    let aggregator = Aggregator::new(req.policy);

    let (merged, default_output): (AggregatedResult, PathBuf) = match &req.job_descriptions {
        Some(jd) => {
            let graph = JobGraph::from_path(jd)
                .with_context(|| format!("failed to load job descriptions {}", jd.display()))?;
            let sink_output = graph
                .aggregation_job()
                .and_then(|j| j.primary_output())
                .map(|p| p.with_extension(req.format.extension()))
                .ok_or_else(|| PipelineError::InvalidGraph("no aggregation output".into()))?;
            (aggregator.from_graph(&graph)?, sink_output)
        }
        None => {
            let merged = aggregator.from_directory(&req.results_dir).with_context(|| {
                format!("failed to merge results in {}", req.results_dir.display())
            })?;
            let output = with_format_extension(&req.postprocessed_dir.join(NO_JD_RESULT), req.format);
            (merged, output)
        }
    };

    let output = match &req.output_prefix {
        Some(prefix) => with_format_extension(prefix, req.format),
        None => default_output,
    };

    let fragments = merged.fragments;
    let rows = merged.rows.len();
    merged
        .into_artifact(&config.result_type)
        .write(&output, req.format)
        .with_context(|| format!("failed to write {}", output.display()))?;

    tracing::info!(path = %output.display(), rows, "wrote aggregated result");

    Ok(PostprocessReport {
        output,
        fragments,
        rows,
    })
}
