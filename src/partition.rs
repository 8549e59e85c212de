//! Splits a bulk input into work units keyed by a partition key.
//!
//! Records sharing a key land in the same unit; every record lands in exactly
//! one unit. Each unit is materialized as a payload file (one sequence per line)
//! and a parameter document pointing at it.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// Bulk input: sequences, an optional explicit key per sequence, and shared
/// scalar metadata copied into every unit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PartitionInput {
    pub peptide: Vec<String>,
    #[serde(default)]
    pub length: Option<Vec<Value>>,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

impl PartitionInput {
    /// Read and validate an input document.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let value: Value =
            serde_json::from_str(&contents).map_err(|e| PipelineError::MalformedDocument {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if value.get("peptide").is_none() {
            return Err(PipelineError::MissingField {
                path: path.to_path_buf(),
                field: "peptide".into(),
            });
        }

        let input: PartitionInput =
            serde_json::from_value(value).map_err(|e| PipelineError::MalformedDocument {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if let Some((key, _)) = input
            .metadata
            .iter()
            .find(|(_, v)| v.is_array() || v.is_object())
        {
            return Err(PipelineError::MalformedDocument {
                path: path.to_path_buf(),
                reason: format!("metadata field `{key}` must be a scalar"),
            });
        }

        Ok(input)
    }

    /// Fail with [`PipelineError::MissingField`] unless every field in
    /// `fields` is present as shared metadata.
    pub fn require_metadata(&self, path: &Path, fields: &[String]) -> Result<()> {
        match fields.iter().find(|f| !self.metadata.contains_key(f.as_str())) {
            Some(field) => Err(PipelineError::MissingField {
                path: path.to_path_buf(),
                field: field.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Parameter document written for each unit and read back by `predict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitParameters {
    pub length: usize,
    pub peptide_file_path: PathBuf,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

/// One independently processable slice of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    pub partition_key: usize,
    pub payload: Vec<String>,
    pub payload_path: PathBuf,
    pub parameter_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Group sequences by key, in ascending key order, keeping input order within
/// each group. Nothing is written; any invalid record fails the whole call.
pub fn group_by_key(input: &PartitionInput) -> Result<BTreeMap<usize, Vec<String>>> {
    if let Some(lengths) = &input.length {
        if lengths.len() != input.peptide.len() {
            return Err(PipelineError::MalformedRecord {
                index: lengths.len().min(input.peptide.len()),
                reason: format!(
                    "{} partition keys given for {} sequences",
                    lengths.len(),
                    input.peptide.len()
                ),
            });
        }
    }

    let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (index, seq) in input.peptide.iter().enumerate() {
        let seq = seq.trim();
        if seq.is_empty() {
            return Err(PipelineError::MalformedRecord {
                index,
                reason: "empty sequence".into(),
            });
        }
        // Payload files hold one sequence per line.
        if seq.contains(['\n', '\r']) {
            return Err(PipelineError::MalformedRecord {
                index,
                reason: "sequence contains a line break".into(),
            });
        }

        let key = match &input.length {
            Some(lengths) => parse_key(index, &lengths[index])?,
            None => seq.chars().count(),
        };
        groups.entry(key).or_default().push(seq.to_string());
    }
    Ok(groups)
}

fn parse_key(index: usize, value: &Value) -> Result<usize> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| PipelineError::InvalidPartitionKey {
        index,
        value: value.to_string(),
    })
}

/// Writes work units into the payload and parameter directories.
pub struct Partitioner {
    params_dir: PathBuf,
    inputs_dir: PathBuf,
}

impl Partitioner {
    pub fn new(params_dir: PathBuf, inputs_dir: PathBuf) -> Self {
        Self {
            params_dir,
            inputs_dir,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.params_dir(), config.inputs_dir())
    }

    /// Partition `input` and write one payload file and one parameter document
    /// per distinct key. An empty input produces no units.
    ///
    /// Validation happens before the first write. If a write fails midway the
    /// files already written by this call are removed.
    pub fn partition(&self, input: &PartitionInput) -> Result<Vec<WorkUnit>> {
        self.partition_with(input, Self::write_unit)
    }

    fn partition_with<F>(&self, input: &PartitionInput, mut write_unit: F) -> Result<Vec<WorkUnit>>
    where
        F: FnMut(
            &Self,
            usize,
            &str,
            usize,
            Vec<String>,
            &BTreeMap<String, Value>,
            &mut Vec<PathBuf>,
        ) -> Result<WorkUnit>,
    {
        let groups = group_by_key(input)?;
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        std::fs::create_dir_all(&self.params_dir)?;
        std::fs::create_dir_all(&self.inputs_dir)?;

        let run_stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let mut written: Vec<PathBuf> = Vec::new();
        let mut units = Vec::with_capacity(groups.len());

        for (i, (key, payload)) in groups.into_iter().enumerate() {
            match write_unit(self, i, &run_stamp, key, payload, &input.metadata, &mut written) {
                Ok(unit) => units.push(unit),
                Err(e) => {
                    for path in &written {
                        let _ = std::fs::remove_file(path);
                    }
                    tracing::warn!(removed = written.len(), error = %e, "rolled back partial partition");
                    return Err(e);
                }
            }
        }

        tracing::info!(
            units = units.len(),
            records = input.peptide.len(),
            params_dir = %self.params_dir.display(),
            "partitioned input into work units"
        );
        Ok(units)
    }

    fn write_unit(
        &self,
        index: usize,
        run_stamp: &str,
        key: usize,
        payload: Vec<String>,
        metadata: &BTreeMap<String, Value>,
        written: &mut Vec<PathBuf>,
    ) -> Result<WorkUnit> {
        let prefix = format!("{index:04}-{run_stamp}-");

        let payload_path = keep_temp(
            &self.inputs_dir,
            &prefix,
            ".txt",
            payload.join("\n").as_bytes(),
        )?;
        written.push(payload_path.clone());
        let payload_path = std::fs::canonicalize(&payload_path)?;

        let params = UnitParameters {
            length: key,
            peptide_file_path: payload_path.clone(),
            metadata: metadata.clone(),
        };
        let parameter_path = keep_temp(
            &self.params_dir,
            &prefix,
            ".json",
            serde_json::to_string_pretty(&params)?.as_bytes(),
        )?;
        written.push(parameter_path.clone());

        Ok(WorkUnit {
            partition_key: key,
            payload,
            payload_path,
            parameter_path,
            created_at: Utc::now(),
        })
    }
}

fn keep_temp(dir: &Path, prefix: &str, suffix: &str, bytes: &[u8]) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)?;
    file.write_all(bytes)?;
    let (_, path) = file.keep().map_err(|e| PipelineError::Io(e.error))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn input(peptides: &[&str]) -> PartitionInput {
        let mut metadata = BTreeMap::new();
        metadata.insert("amino_acid".to_string(), json!("L"));
        PartitionInput {
            peptide: peptides.iter().map(|p| p.to_string()).collect(),
            length: None,
            metadata,
        }
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn groups_by_sequence_length() {
        let groups = group_by_key(&input(&["ADMGHLKY", "ELDDTLKY", "AAAA"])).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&4], vec!["AAAA"]);
        assert_eq!(groups[&8], vec!["ADMGHLKY", "ELDDTLKY"]);
    }

    #[test]
    fn explicit_keys_accept_numbers_and_numeric_strings() {
        let mut inp = input(&["AAAA", "CCCC", "DD"]);
        inp.length = Some(vec![json!(4), json!("4"), json!(2)]);
        let groups = group_by_key(&inp).unwrap();
        assert_eq!(groups[&4], vec!["AAAA", "CCCC"]);
        assert_eq!(groups[&2], vec!["DD"]);
    }

    #[test]
    fn invalid_key_is_rejected() {
        let mut inp = input(&["AAAA", "CCCC"]);
        inp.length = Some(vec![json!(4), json!(-1)]);
        let err = group_by_key(&inp).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPartitionKey { index: 1, .. }));
    }

    #[test]
    fn key_count_mismatch_is_rejected() {
        let mut inp = input(&["AAAA", "CCCC"]);
        inp.length = Some(vec![json!(4)]);
        assert!(matches!(
            group_by_key(&inp),
            Err(PipelineError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn empty_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let partitioner = Partitioner::new(dir.path().join("params"), dir.path().join("data"));
        let units = partitioner.partition(&input(&[])).unwrap();
        assert!(units.is_empty());
        assert_eq!(file_count(&dir.path().join("params")), 0);
    }

    #[test]
    fn malformed_record_aborts_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let params = dir.path().join("params");
        let data = dir.path().join("data");
        let partitioner = Partitioner::new(params.clone(), data.clone());

        let err = partitioner.partition(&input(&["AAAA", "  "])).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord { index: 1, .. }));
        assert_eq!(file_count(&params), 0);
        assert_eq!(file_count(&data), 0);
    }

    #[test]
    fn line_break_inside_sequence_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let params = dir.path().join("params");
        let partitioner = Partitioner::new(params.clone(), dir.path().join("data"));

        let err = partitioner.partition(&input(&["AAAA", "AA\nCC"])).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord { index: 1, .. }));
        assert!(matches!(
            group_by_key(&input(&["AA\r\nCC"])),
            Err(PipelineError::MalformedRecord { index: 0, .. })
        ));
        assert_eq!(file_count(&params), 0);
    }

    #[test]
    fn failed_write_removes_units_already_written() {
        let dir = tempfile::tempdir().unwrap();
        let params = dir.path().join("params");
        let data = dir.path().join("data");
        let partitioner = Partitioner::new(params.clone(), data.clone());

        let err = partitioner
            .partition_with(
                &input(&["AAAA", "CCCCCC", "DDDDDDDD"]),
                |p, index, stamp, key, payload, metadata, written| {
                    let unit = p.write_unit(index, stamp, key, payload, metadata, written)?;
                    if index == 1 {
                        return Err(PipelineError::Io(std::io::Error::other("disk full")));
                    }
                    Ok(unit)
                },
            )
            .unwrap_err();

        assert!(matches!(err, PipelineError::Io(_)));
        assert_eq!(file_count(&params), 0);
        assert_eq!(file_count(&data), 0);
    }

    #[test]
    fn require_metadata_reports_first_missing_field() {
        let inp = input(&["AAAA"]);
        let path = Path::new("input.json");
        assert!(inp.require_metadata(path, &["amino_acid".into()]).is_ok());
        let err = inp
            .require_metadata(path, &["amino_acid".into(), "allele".into()])
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingField { ref field, .. } if field == "allele"));
    }

    #[test]
    fn writes_payload_and_parameter_files() {
        let dir = tempfile::tempdir().unwrap();
        let partitioner = Partitioner::new(dir.path().join("params"), dir.path().join("data"));
        let units = partitioner
            .partition(&input(&["ADMGHLKY", "ELDDTLKY", "AAAA"]))
            .unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].partition_key, 4);
        assert_eq!(units[1].partition_key, 8);

        let payload = std::fs::read_to_string(&units[1].payload_path).unwrap();
        assert_eq!(payload, "ADMGHLKY\nELDDTLKY");

        let raw = std::fs::read_to_string(&units[1].parameter_path).unwrap();
        let params: UnitParameters = serde_json::from_str(&raw).unwrap();
        assert_eq!(params.length, 8);
        assert_eq!(params.peptide_file_path, units[1].payload_path);
        assert!(params.peptide_file_path.is_absolute());
        assert_eq!(params.metadata["amino_acid"], json!("L"));
    }

    #[test]
    fn from_path_requires_peptide_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, r#"{"amino_acid": "L"}"#).unwrap();
        let err = PartitionInput::from_path(&path).unwrap_err();
        assert!(matches!(err, PipelineError::MissingField { ref field, .. } if field == "peptide"));
    }

    #[test]
    fn from_path_rejects_structured_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, r#"{"peptide": ["AAAA"], "extra": {"a": 1}}"#).unwrap();
        assert!(matches!(
            PartitionInput::from_path(&path),
            Err(PipelineError::MalformedDocument { .. })
        ));
    }

    proptest! {
        #[test]
        fn partition_is_exact_and_exhaustive(peptides in prop::collection::vec("[A-Y]{1,12}", 0..40)) {
            let refs: Vec<&str> = peptides.iter().map(String::as_str).collect();
            let groups = group_by_key(&input(&refs)).unwrap();

            let mut distinct: Vec<usize> = peptides.iter().map(|p| p.len()).collect();
            distinct.sort_unstable();
            distinct.dedup();
            prop_assert_eq!(groups.len(), distinct.len());

            for (key, seqs) in &groups {
                prop_assert!(seqs.iter().all(|s| s.len() == *key));
            }

            let mut merged: Vec<String> = groups.into_values().flatten().collect();
            let mut original = peptides.clone();
            merged.sort();
            original.sort();
            prop_assert_eq!(merged, original);
        }
    }
}
