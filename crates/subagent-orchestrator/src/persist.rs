//! `run.json` snapshots on disk.

use std::io::Write;
use std::path::{Path, PathBuf};

use subagent_core::{CoreError, RunSnapshot};
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the snapshot file inside a run's artifacts directory.
pub const RUN_FILE: &str = "run.json";

/// Errors reading or writing snapshots.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid snapshot at {}: {source}", path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: CoreError,
    },
}

/// Write `snapshot` to `<dir>/run.json`, replacing any previous file.
pub fn write_snapshot(dir: &Path, snapshot: &RunSnapshot) -> Result<PathBuf, PersistError> {
    let path = dir.join(RUN_FILE);
    let json = snapshot.to_json().map_err(|source| PersistError::Snapshot {
        path: path.clone(),
        source,
    })?;

    // Written beside the target and renamed so readers never see half a file.
    let io_error = |source| PersistError::Io {
        path: path.clone(),
        source,
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".run-")
        .suffix(".json.tmp")
        .tempfile_in(dir)
        .map_err(io_error)?;
    tmp.write_all(json.as_bytes()).map_err(io_error)?;
    tmp.persist(&path).map_err(|e| io_error(e.error))?;

    debug!(run_id = %snapshot.run_id, path = %path.display(), "Wrote run snapshot");
    Ok(path)
}

pub fn read_snapshot(path: &Path) -> Result<RunSnapshot, PersistError> {
    let json = std::fs::read_to_string(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    RunSnapshot::from_json(&json).map_err(|source| PersistError::Snapshot {
        path: path.to_path_buf(),
        source,
    })
}

/// Load every `<root>/*/run.json`, oldest first.
///
/// Unreadable snapshots are skipped with a warning. A missing root yields
/// an empty list.
pub fn load_snapshots(root: &Path) -> Vec<RunSnapshot> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "No run history to load");
            return Vec::new();
        }
    };

    let mut snapshots: Vec<RunSnapshot> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path().join(RUN_FILE))
        .filter(|path| path.is_file())
        .filter_map(|path| match read_snapshot(&path) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable run snapshot");
                None
            }
        })
        .collect();

    snapshots.sort_by_key(|s| s.started_at);
    snapshots
}

#[cfg(test)]
mod tests {
    use super::*;
    use subagent_core::{ExecutionResult, RunError, RunId, RunRecord, TaskId, TaskSpec};

    fn failed_record(id: &str) -> RunRecord {
        let spec = TaskSpec::new("scout", "find TODOs", "m1");
        let mut result = ExecutionResult::pending(TaskId::new("t-1"), &spec);
        result.record_message(crate::testing::assistant("3 TODOs"));
        result.settle(0);

        let mut record = RunRecord::new(RunId::new(id), "find TODOs");
        record.results = vec![result];
        record.fail(RunError::runtime("launcher crashed")).unwrap();
        record
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = RunSnapshot::from_record(&failed_record("run-1"));

        let path = write_snapshot(dir.path(), &snapshot).unwrap();
        assert_eq!(path, dir.path().join(RUN_FILE));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name() != RUN_FILE)
            .collect();
        assert!(leftovers.is_empty());

        // A second write replaces the first.
        write_snapshot(dir.path(), &RunSnapshot::from_record(&failed_record("run-2"))).unwrap();
        assert_eq!(read_snapshot(&path).unwrap().run_id.as_str(), "run-2");

        let loaded = read_snapshot(&path).unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.results[0].text, "3 TODOs");
    }

    #[test]
    fn test_load_snapshots_skips_bad_files() {
        let root = tempfile::tempdir().unwrap();
        for id in ["run-a", "run-b"] {
            let dir = root.path().join(id);
            std::fs::create_dir_all(&dir).unwrap();
            write_snapshot(&dir, &RunSnapshot::from_record(&failed_record(id))).unwrap();
        }
        let broken = root.path().join("run-broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(RUN_FILE), "{ not json").unwrap();
        std::fs::create_dir_all(root.path().join("run-unfinished")).unwrap();

        let snapshots = load_snapshots(root.path());

        let mut ids: Vec<String> = snapshots.iter().map(|s| s.run_id.to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["run-a", "run-b"]);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert!(load_snapshots(&root.path().join("nope")).is_empty());
    }
}
