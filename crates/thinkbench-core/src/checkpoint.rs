use crate::error::EngineError;
use crate::fold::FoldOutcome;
use crate::plan::FoldSink;
use crate::types::FoldSummary;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Writes each finished fold under `<root>/folds/` and, when the fold kept
/// them, its per-instance records under `<root>/details/`.
pub struct DirSink {
    root: PathBuf,
}

impl DirSink {
    pub fn create(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("folds"))?;
        Ok(Self { root })
    }

    pub fn fold_path(&self, label: &str, fold: usize) -> PathBuf {
        self.root.join("folds").join(format!("{label}_fold{fold}.json"))
    }

    pub fn details_path(&self, label: &str, fold: usize) -> PathBuf {
        self.root
            .join("details")
            .join(format!("{label}_fold{fold}.json"))
    }

    fn write(&self, label: &str, outcome: &FoldOutcome) -> io::Result<()> {
        let fold = outcome.summary.fold;
        let summary = serde_json::to_vec_pretty(&outcome.summary)?;
        write_atomic(&self.fold_path(label, fold), &summary)?;
        if let Some(details) = &outcome.details {
            fs::create_dir_all(self.root.join("details"))?;
            let payload = serde_json::to_vec_pretty(details)?;
            write_atomic(&self.details_path(label, fold), &payload)?;
        }
        Ok(())
    }
}

impl FoldSink for DirSink {
    fn fold_completed(&self, label: &str, outcome: &FoldOutcome) -> Result<(), EngineError> {
        self.write(label, outcome)
            .map_err(|source| EngineError::Checkpoint {
                configuration: label.to_string(),
                fold: outcome.summary.fold,
                source,
            })?;
        tracing::debug!(config = label, fold = outcome.summary.fold, "checkpoint written");
        Ok(())
    }
}

/// Loads every fold checkpoint in `<root>/folds/`, sorted by file name.
pub fn load_folds(root: &Path) -> io::Result<Vec<FoldSummary>> {
    let dir = root.join("folds");
    let mut paths = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();
    paths
        .iter()
        .map(|path| -> io::Result<FoldSummary> {
            let text = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        })
        .collect()
}

/// Temp file and rename, so a reader never sees a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fold::InstanceDetail;
    use crate::task::{Expected, Inputs};
    use crate::types::Judgment;
    use tempfile::TempDir;

    fn outcome(fold: usize, details: bool) -> FoldOutcome {
        FoldOutcome {
            summary: FoldSummary {
                task: "sum".to_string(),
                list_size: Some(8),
                fold,
                seed: 5,
                samples: 1,
                parse_failures: 0,
                accuracy: 1.0,
                instruction_followed: 1.0,
                tokens: 12.0,
                chars: 30.0,
                words: 6.0,
            },
            details: details.then(|| {
                vec![InstanceDetail {
                    index: 0,
                    inputs: Inputs::List(vec![1, 2]),
                    expected: Expected::Integer { value: 3 },
                    prompt: "Add".to_string(),
                    response: "\\boxed{3}".to_string(),
                    judgment: Judgment {
                        answer: None,
                        correct: true,
                        instruction_followed: true,
                        parse_failed: false,
                        tokens: 12,
                        chars: 9,
                        words: 1,
                    },
                }]
            }),
        }
    }

    #[test]
    fn folds_round_trip_through_disk() {
        let dir = TempDir::new().expect("tempdir");
        let sink = DirSink::create(dir.path()).expect("sink");
        sink.fold_completed("sum_8", &outcome(1, false)).expect("write");
        sink.fold_completed("sum_8", &outcome(0, false)).expect("write");

        let folds = load_folds(dir.path()).expect("load");
        assert_eq!(folds.len(), 2);
        assert_eq!(folds[0].fold, 0);
        assert_eq!(folds[1], outcome(1, false).summary);
        assert!(!dir.path().join("details").exists());
        assert!(!sink.fold_path("sum_8", 0).with_extension("tmp").exists());
    }

    #[test]
    fn details_are_written_when_present() {
        let dir = TempDir::new().expect("tempdir");
        let sink = DirSink::create(dir.path()).expect("sink");
        sink.fold_completed("sum_8", &outcome(0, true)).expect("write");
        let text = std::fs::read_to_string(sink.details_path("sum_8", 0)).expect("details");
        assert!(text.contains("\"response\": \"\\\\boxed{3}\""));
    }
}
