//! Result artifacts exchanged between prediction jobs and the aggregator.
//!
//! A result artifact is a JSON object with `warnings`, an optional `errors`
//! array and a `results` array holding exactly one table. Reading validates that
//! shape, so a malformed fragment fails with [`PipelineError::MalformedDocument`]
//! instead of surfacing as a raw parse error halfway through a merge.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};

/// On-disk encoding of a result artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    Tsv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Tsv => "tsv",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// One tabular result: a column header and rows of JSON cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    #[serde(rename = "type")]
    pub kind: String,
    pub table_columns: Vec<String>,
    pub table_data: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultArtifact {
    #[serde(default)]
    pub warnings: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Value>>,
    pub results: Vec<ResultTable>,
}

impl ResultArtifact {
    /// Wrap a single table with empty warning and error lists.
    pub fn from_table(table: ResultTable) -> Self {
        Self {
            warnings: Vec::new(),
            errors: Some(Vec::new()),
            results: vec![table],
        }
    }

    /// Read and validate the artifact at `path`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let artifact: ResultArtifact =
            serde_json::from_str(&contents).map_err(|e| PipelineError::MalformedDocument {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        artifact.validate(path)?;
        Ok(artifact)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let malformed = |reason: String| PipelineError::MalformedDocument {
            path: path.to_path_buf(),
            reason,
        };

        if self.results.len() != 1 {
            return Err(malformed(format!(
                "expected exactly one results entry, found {}",
                self.results.len()
            )));
        }

        let table = &self.results[0];
        let width = table.table_columns.len();
        if let Some(idx) = table.table_data.iter().position(|row| row.len() != width) {
            return Err(malformed(format!(
                "row {idx} has {} cells but the header has {width} columns",
                table.table_data[idx].len()
            )));
        }
        Ok(())
    }

    /// Take ownership of the single table of a validated artifact.
    pub fn into_table(self) -> Option<ResultTable> {
        self.results.into_iter().next()
    }

    /// Render in the requested format.
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Tsv => Ok(self.render_tsv()),
        }
    }

    fn render_tsv(&self) -> String {
        let mut out = String::new();
        for table in &self.results {
            out.push_str(&table.table_columns.join("\t"));
            out.push('\n');
            for row in &table.table_data {
                let cells: Vec<String> = row.iter().map(tsv_cell).collect();
                out.push_str(&cells.join("\t"));
                out.push('\n');
            }
        }
        out
    }

    /// Write the artifact to `path` in one step.
    pub fn write(&self, path: &Path, format: OutputFormat) -> Result<()> {
        write_atomic(path, self.render(format)?.as_bytes())
    }
}

fn tsv_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Write `bytes` to a temporary file next to `path`, then rename it into place,
/// so readers never observe a partially written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let mut tmp = NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| PipelineError::Io(e.error))?;
    Ok(())
}

/// `<prefix>.<ext>`, appending rather than replacing any dot already in the prefix.
pub fn with_format_extension(prefix: &Path, format: OutputFormat) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".");
    name.push(format.extension());
    PathBuf::from(name)
}
