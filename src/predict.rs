//! Bundled reference predictor: counts an amino acid in each peptide.
//!
//! Accepts a raw input document (`peptide` array plus metadata), a work-unit
//! parameter document whose `peptide_file_path` points at a payload file, or a
//! TSV table whose first column holds the peptides.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use crate::artifact::{ResultArtifact, ResultTable};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictInput {
    pub peptides: Vec<String>,
    pub amino_acid: String,
}

impl PredictInput {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let doc: Value =
            serde_json::from_str(&contents).map_err(|e| PipelineError::MalformedDocument {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let malformed = |reason: &str| PipelineError::MalformedDocument {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        let missing = |field: &str| PipelineError::MissingField {
            path: path.to_path_buf(),
            field: field.to_string(),
        };

        let amino_acid = match doc.get("amino_acid") {
            Some(Value::String(aa)) if !aa.trim().is_empty() => aa.trim().to_string(),
            Some(_) => return Err(malformed("`amino_acid` must be a non-empty string")),
            None => return Err(missing("amino_acid")),
        };

        let peptides = if let Some(payload) = doc.get("peptide_file_path") {
            let payload = payload
                .as_str()
                .map(PathBuf::from)
                .ok_or_else(|| malformed("`peptide_file_path` must be a string"))?;
            read_payload(&payload)?
        } else {
            let list = doc.get("peptide").ok_or_else(|| missing("peptide"))?;
            serde_json::from_value::<Vec<String>>(list.clone())
                .map_err(|_| malformed("`peptide` must be an array of strings"))?
        };

        Ok(Self {
            peptides,
            amino_acid,
        })
    }

    /// Read peptides from the first column of a tab-separated table. The first
    /// line is a header and is skipped.
    pub fn from_tsv(path: &Path, amino_acid: &str) -> Result<Self> {
        let amino_acid = amino_acid.trim();
        if amino_acid.is_empty() {
            return Err(PipelineError::MissingField {
                path: path.to_path_buf(),
                field: "amino_acid".into(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let peptides = contents
            .lines()
            .skip(1)
            .filter_map(|line| line.split('\t').next())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            peptides,
            amino_acid: amino_acid.to_string(),
        })
    }
}

fn read_payload(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Case-insensitive, non-overlapping occurrences of `needle` in `peptide`.
pub fn count_occurrences(peptide: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    peptide
        .to_uppercase()
        .matches(&needle.to_uppercase())
        .count()
}

/// Run the counter and shape its output as a result artifact.
pub fn predict(input: &PredictInput, kind: &str) -> ResultArtifact {
    let count_column = format!("AAcount({})", input.amino_acid);
    let rows = input
        .peptides
        .iter()
        .map(|p| {
            vec![
                json!(p),
                json!(p.chars().count()),
                json!(count_occurrences(p, &input.amino_acid)),
            ]
        })
        .collect();

    ResultArtifact {
        warnings: Vec::new(),
        errors: None,
        results: vec![ResultTable {
            kind: kind.to_string(),
            table_columns: vec!["peptide".into(), "length".into(), count_column],
            table_data: rows,
        }],
    }
}
