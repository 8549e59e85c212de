mod aggregate;
mod artifact;
mod batch;
mod cli;
mod config;
mod error;
mod job_graph;
mod logging;
mod partition;
mod pipeline;
mod predict;
mod ui;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use artifact::{OutputFormat, with_format_extension};
use cli::{Cli, Command};
use config::{DEFAULT_CONFIG_FILE, PipelineConfig};
use pipeline::PostprocessRequest;
use predict::PredictInput;
use ui::StageProgress;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ui::print_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = PipelineConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    match cli.command {
        Command::Preprocess {
            input_json,
            params_dir,
            inputs_dir,
            job_desc_file,
            output_format,
        } => {
            if let Some(dir) = params_dir {
                config.params_dir = Some(absolute(&dir)?);
            }
            if let Some(dir) = inputs_dir {
                config.inputs_dir = Some(absolute(&dir)?);
            }
            if let Some(path) = job_desc_file {
                config.job_descriptions = Some(absolute(&path)?);
            }

            let progress = StageProgress::start("preprocess: partitioning input");
            match pipeline::preprocess(&config, &input_json, output_format.into()) {
                Ok(report) => progress.preprocessed(&report),
                Err(err) => {
                    progress.abandon();
                    return Err(err);
                }
            }
        }
        Command::Predict {
            input_json,
            input_tsv,
            amino_acid,
            output_prefix,
            output_format,
        } => {
            let format = OutputFormat::from(output_format);
            let input = match (input_json, input_tsv) {
                (Some(path), _) => PredictInput::from_path(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, Some(path)) => {
                    PredictInput::from_tsv(&path, amino_acid.as_deref().unwrap_or_default())
                        .with_context(|| format!("failed to read {}", path.display()))?
                }
                (None, None) => anyhow::bail!("predict needs --input-json or --input-tsv"),
            };
            let artifact = predict::predict(&input, &config.result_type);

            match output_prefix {
                Some(prefix) => {
                    let path = with_format_extension(&prefix, format);
                    artifact.write(&path, format)?;
                    tracing::info!(path = %path.display(), rows = input.peptides.len(), "wrote prediction");
                }
                None => println!("{}", artifact.render(format)?),
            }
        }
        Command::Postprocess {
            job_desc_file,
            input_results_dir,
            postprocessed_results_dir,
            output_prefix,
            output_format,
            strict_headers,
        } => {
            if strict_headers {
                config.strict_headers = true;
            }
            let mut req = PostprocessRequest::from_config(&config);
            if let Some(path) = job_desc_file {
                req.job_descriptions = Some(path);
            }
            if let Some(dir) = input_results_dir {
                req.results_dir = dir;
            }
            if let Some(dir) = postprocessed_results_dir {
                req.postprocessed_dir = dir;
            }
            req.output_prefix = output_prefix;
            req.format = output_format.into();

            let progress = StageProgress::start("postprocess: merging results");
            match pipeline::postprocess(&config, &req) {
                Ok(report) => progress.postprocessed(&report),
                Err(err) => {
                    progress.abandon();
                    return Err(err);
                }
            }
        }
    }

    Ok(())
}

/// Resolve CLI paths against the working directory rather than the configured root.
fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("invalid path {}", path.display()))
}
