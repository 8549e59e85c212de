use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::artifact::{OutputFormat, with_format_extension};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

use super::job::{Job, JobGraph, JobType};

/// Everything an external executor needs to run one job.
///
/// Rendered into the document's `shell_cmd` field through [`fmt::Display`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Predict {
        executable: PathBuf,
        param_file: PathBuf,
        output_prefix: PathBuf,
        format: OutputFormat,
    },
    Postprocess {
        executable: PathBuf,
        job_descriptions: PathBuf,
        output_prefix: PathBuf,
        format: OutputFormat,
    },
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Predict {
                executable,
                param_file,
                output_prefix,
                format,
            } => write!(
                f,
                "{} predict -j {} -o {} -f {format}",
                shell_quote(executable),
                shell_quote(param_file),
                shell_quote(output_prefix)
            ),
            Invocation::Postprocess {
                executable,
                job_descriptions,
                output_prefix,
                format,
            } => write!(
                f,
                "{} postprocess --job-desc-file={} -o {} -f {format}",
                shell_quote(executable),
                shell_quote(job_descriptions),
                shell_quote(output_prefix)
            ),
        }
    }
}

/// Single-quote a path for a POSIX shell unless every character is safe bare.
fn shell_quote(path: &Path) -> Cow<'_, str> {
    let raw = path.to_string_lossy();
    let safe = !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@%".contains(c));
    if safe {
        raw
    } else {
        Cow::Owned(format!("'{}'", raw.replace('\'', r"'\''")))
    }
}

/// Turns an active batch of parameter files into a fan-out/fan-in graph.
pub struct GraphBuilder {
    executable: PathBuf,
    results_dir: PathBuf,
    output_dir: PathBuf,
    job_descriptions: PathBuf,
    final_format: OutputFormat,
}

impl GraphBuilder {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            executable: config.executable(),
            results_dir: config.results_dir(),
            output_dir: config.output_dir(),
            job_descriptions: config.job_descriptions(),
            final_format: OutputFormat::Json,
        }
    }

    /// Format of the consolidated artifact. Leaf results are always JSON,
    /// since that is what the aggregator reads.
    pub fn with_final_format(mut self, format: OutputFormat) -> Self {
        self.final_format = format;
        self
    }

    /// Emit one prediction job per parameter file, in the given order, then a
    /// single aggregation job depending on all of them.
    ///
    /// An empty batch is refused with [`PipelineError::DegenerateGraph`].
    pub fn build(&self, param_files: &[PathBuf]) -> Result<JobGraph> {
        if param_files.is_empty() {
            return Err(PipelineError::DegenerateGraph);
        }

        let mut jobs: Vec<Job> = param_files
            .iter()
            .enumerate()
            .map(|(i, param_file)| self.prediction_job(i as u32, param_file))
            .collect();

        let leaves = jobs.len() as u32;
        jobs.push(self.aggregation_job(leaves));

        let graph = JobGraph::new(jobs)?;
        tracing::info!(
            prediction_jobs = leaves,
            total_jobs = graph.len(),
            "built job graph"
        );
        Ok(graph)
    }

    fn prediction_job(&self, job_id: u32, param_file: &Path) -> Job {
        let output_prefix = self.results_dir.join(format!("result.{job_id}"));
        let expected = with_format_extension(&output_prefix, OutputFormat::Json);
        let invocation = Invocation::Predict {
            executable: self.executable.clone(),
            param_file: param_file.to_path_buf(),
            output_prefix,
            format: OutputFormat::Json,
        };
        Job {
            invocation: invocation.to_string(),
            job_id,
            job_type: JobType::Prediction,
            depends_on: Vec::new(),
            expected_outputs: vec![expected],
        }
    }

    fn aggregation_job(&self, job_id: u32) -> Job {
        let output_prefix = self.output_dir.join("final-result");
        let expected = with_format_extension(&output_prefix, self.final_format);
        let invocation = Invocation::Postprocess {
            executable: self.executable.clone(),
            job_descriptions: self.job_descriptions.clone(),
            output_prefix,
            format: self.final_format,
        };
        Job {
            invocation: invocation.to_string(),
            job_id,
            job_type: JobType::Aggregation,
            depends_on: (0..job_id).collect(),
            expected_outputs: vec![expected],
        }
    }
}
