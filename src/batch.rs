//! Isolates the most recent run's parameter files from stale leftovers.
//!
//! Files are ordered by creation time and split into clusters wherever the gap
//! between neighbours exceeds a threshold. The last cluster is the active batch.
//! The scan is not atomic with respect to concurrent writers; callers must not
//! run it while a partition is still writing into the same directory.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// A file together with the timestamp used for clustering, as an offset from
/// the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedFile {
    pub path: PathBuf,
    pub stamp: Duration,
}

/// The files belonging to the most recent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBatch {
    /// Parameter files in ascending timestamp order.
    pub files: Vec<PathBuf>,
    /// Files from earlier clusters that were left untouched.
    pub stale: usize,
    /// Total number of clusters found in the directory.
    pub clusters: usize,
}

/// Split time-ordered files into clusters. A file joins the current cluster
/// when its stamp is within `gap` (inclusive) of the file right before it.
pub fn cluster_by_gap(files: &[StampedFile], gap: Duration) -> Vec<Vec<StampedFile>> {
    let mut clusters: Vec<Vec<StampedFile>> = Vec::new();
    let mut current: Vec<StampedFile> = Vec::new();

    for file in files {
        let joins = match current.last() {
            Some(prev) => file.stamp.saturating_sub(prev.stamp) <= gap,
            None => true,
        };
        if !joins {
            clusters.push(std::mem::take(&mut current));
        }
        current.push(file.clone());
    }

    if !current.is_empty() {
        clusters.push(current);
    }
    clusters
}

pub struct BatchSelector {
    gap: Duration,
}

impl BatchSelector {
    pub fn new(gap: Duration) -> Self {
        Self { gap }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.batch_gap())
    }

    /// Select the active batch in `dir`.
    ///
    /// A missing or empty directory yields [`PipelineError::EmptyBatch`].
    pub fn select(&self, dir: &Path) -> Result<ActiveBatch> {
        let mut files = scan(dir)?;
        if files.is_empty() {
            return Err(PipelineError::EmptyBatch {
                dir: dir.to_path_buf(),
            });
        }

        files.sort_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.path.cmp(&b.path)));

        let total = files.len();
        let mut clusters = cluster_by_gap(&files, self.gap);
        let count = clusters.len();
        let last = clusters.pop().unwrap_or_default();
        let stale = total - last.len();

        if stale > 0 {
            tracing::warn!(
                stale,
                clusters = count,
                dir = %dir.display(),
                "ignoring parameter files from earlier runs"
            );
        }
        tracing::debug!(selected = last.len(), "selected active batch");

        Ok(ActiveBatch {
            files: last.into_iter().map(|f| f.path).collect(),
            stale,
            clusters: count,
        })
    }
}

fn scan(dir: &Path) -> Result<Vec<StampedFile>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        // Birth time is not available on every filesystem.
        let time = meta.created().or_else(|_| meta.modified())?;
        files.push(StampedFile {
            path: entry.path(),
            stamp: since_epoch(time),
        });
    }
    Ok(files)
}

fn since_epoch(time: SystemTime) -> Duration {
    time.duration_since(UNIX_EPOCH).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamped(ms: &[u64]) -> Vec<StampedFile> {
        ms.iter()
            .map(|&ms| StampedFile {
                path: PathBuf::from(format!("{ms}.json")),
                stamp: Duration::from_millis(ms),
            })
            .collect()
    }

    fn stamps(cluster: &[StampedFile]) -> Vec<u128> {
        cluster.iter().map(|f| f.stamp.as_millis()).collect()
    }

    #[test]
    fn clusters_split_on_gaps() {
        let files = stamped(&[0, 50, 500, 10_000, 10_020]);
        let clusters = cluster_by_gap(&files, Duration::from_millis(100));

        assert_eq!(clusters.len(), 3);
        assert_eq!(stamps(&clusters[0]), vec![0, 50]);
        assert_eq!(stamps(&clusters[1]), vec![500]);
        assert_eq!(stamps(&clusters[2]), vec![10_000, 10_020]);
    }

    #[test]
    fn gap_is_inclusive() {
        let clusters = cluster_by_gap(&stamped(&[0, 100, 200]), Duration::from_millis(100));
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn gap_chains_through_neighbours() {
        // Each step is within the gap even though the ends are far apart.
        let clusters = cluster_by_gap(&stamped(&[0, 90, 180, 270]), Duration::from_millis(100));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 4);
    }

    #[test]
    fn no_files_no_clusters() {
        assert!(cluster_by_gap(&[], Duration::from_millis(100)).is_empty());
    }

    #[test]
    fn empty_directory_is_an_explicit_condition() {
        let dir = tempfile::tempdir().unwrap();
        let err = BatchSelector::new(Duration::from_millis(100))
            .select(dir.path())
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyBatch { .. }));
    }

    #[test]
    fn missing_directory_is_an_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let err = BatchSelector::new(Duration::from_millis(100))
            .select(&dir.path().join("nope"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyBatch { .. }));
    }

    #[test]
    fn files_written_together_form_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            std::fs::write(dir.path().join(format!("{i:04}-unit.json")), "{}").unwrap();
        }
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let batch = BatchSelector::new(Duration::from_secs(5))
            .select(dir.path())
            .unwrap();
        assert_eq!(batch.files.len(), 3);
        assert_eq!(batch.stale, 0);
        assert_eq!(batch.clusters, 1);
    }

    #[test]
    fn stale_files_from_an_earlier_run_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0000-old.json"), "{}").unwrap();
        std::thread::sleep(Duration::from_millis(400));
        std::fs::write(dir.path().join("0000-new.json"), "{}").unwrap();
        std::fs::write(dir.path().join("0001-new.json"), "{}").unwrap();

        let batch = BatchSelector::new(Duration::from_millis(100))
            .select(dir.path())
            .unwrap();
        let names: Vec<String> = batch
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["0000-new.json", "0001-new.json"]);
        assert_eq!(batch.stale, 1);
        assert_eq!(batch.clusters, 2);
    }
}
