//! Per-run event log and artifact directory.
//!
//! The newest events of each run are kept in memory for display. When the
//! run is persisted every event is also appended to
//! `<artifacts_dir>/events.jsonl`, so the full history survives the window.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use subagent_core::{EventKind, ObservabilityEvent, ObservabilitySummary, RunId, RunStatus};
use tracing::{debug, warn};

use crate::config::DEFAULT_EVENT_WINDOW;

/// File receiving the full event log of a persisted run.
pub const EVENTS_FILE: &str = "events.jsonl";

struct RunLog {
    artifacts_dir: Option<PathBuf>,
    /// Open `events.jsonl`; flushed after every line.
    event_log: Option<LineWriter<File>>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    status: RunStatus,
    events: VecDeque<ObservabilityEvent>,
    artifacts: Vec<PathBuf>,
}

/// Event and artifact store shared by every run of an orchestrator.
pub struct ObservabilityStore {
    window: usize,
    runs: Mutex<HashMap<RunId, RunLog>>,
}

impl ObservabilityStore {
    /// Create a store keeping the last `window` events of each run.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a run.
    ///
    /// With `persist`, creates `<parent_dir>/<run_id>` and returns it. A
    /// directory that cannot be created leaves the run memory-only.
    pub fn create_run(&self, run_id: &RunId, persist: bool, parent_dir: &Path) -> Option<PathBuf> {
        let artifacts_dir = if persist {
            let dir = parent_dir.join(run_id.as_str());
            match std::fs::create_dir_all(&dir) {
                Ok(()) => Some(dir),
                Err(e) => {
                    warn!(%run_id, dir = %dir.display(), error = %e, "Failed to create artifacts directory");
                    None
                }
            }
        } else {
            None
        };

        let event_log = artifacts_dir.as_deref().and_then(|dir| match open_event_log(dir) {
            Ok(writer) => Some(writer),
            Err(e) => {
                warn!(%run_id, error = %e, "Failed to open event log");
                None
            }
        });

        let log = RunLog {
            artifacts_dir: artifacts_dir.clone(),
            event_log,
            started_at: Utc::now(),
            ended_at: None,
            status: RunStatus::Running,
            events: VecDeque::with_capacity(self.window),
            artifacts: Vec::new(),
        };
        self.lock().insert(run_id.clone(), log);
        artifacts_dir
    }

    /// Record an event.
    pub fn push(&self, run_id: &RunId, kind: EventKind, message: impl Into<String>, data: Option<Value>) {
        self.record(run_id, ObservabilityEvent::new(kind, message, data));
    }

    fn record(&self, run_id: &RunId, event: ObservabilityEvent) {
        let mut runs = self.lock();
        let Some(log) = runs.get_mut(run_id) else {
            debug!(%run_id, "Dropping event for unknown run");
            return;
        };

        // Appended under the lock so the file keeps the in-memory order.
        if let Some(writer) = log.event_log.as_mut() {
            if let Err(e) = append_event(writer, &event) {
                warn!(%run_id, error = %e, "Failed to append event log");
            }
        }

        if log.events.len() == self.window {
            log.events.pop_front();
        }
        log.events.push_back(event);
    }

    /// Record a status change; terminal statuses stamp the end time.
    pub fn set_status(&self, run_id: &RunId, status: RunStatus, reason: Option<&str>) {
        {
            let mut runs = self.lock();
            let Some(log) = runs.get_mut(run_id) else {
                return;
            };
            log.status = status;
            if status.is_terminal() && log.ended_at.is_none() {
                log.ended_at = Some(Utc::now());
            }
        }

        let kind = match status {
            RunStatus::Failed => EventKind::Error,
            RunStatus::Cancelled => EventKind::Warning,
            RunStatus::Running | RunStatus::Done => EventKind::Info,
        };
        let message = match reason {
            Some(reason) => format!("run {status}: {reason}"),
            None => format!("run {status}"),
        };
        self.push(run_id, kind, message, None);
    }

    /// Write `content` to `<artifacts_dir>/<relative_path>`.
    ///
    /// Best effort: returns `None` for memory-only runs, paths escaping the
    /// artifacts directory, and I/O failures.
    pub fn write_artifact(&self, run_id: &RunId, relative_path: &str, content: &[u8]) -> Option<PathBuf> {
        let Some(relative) = safe_relative(relative_path) else {
            warn!(%run_id, path = relative_path, "Rejected artifact path");
            return None;
        };
        let dir = self.lock().get(run_id)?.artifacts_dir.clone()?;
        let path = dir.join(relative);

        let written = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| std::fs::write(&path, content));
        if let Err(e) = written {
            warn!(%run_id, path = %path.display(), error = %e, "Failed to write artifact");
            return None;
        }

        if let Some(log) = self.lock().get_mut(run_id) {
            if !log.artifacts.contains(&path) {
                log.artifacts.push(path.clone());
            }
        }
        self.push(
            run_id,
            EventKind::Info,
            format!("artifact written: {relative_path}"),
            Some(serde_json::json!({ "path": path, "bytes": content.len() })),
        );
        Some(path)
    }

    /// Artifacts directory of a persisted run.
    pub fn artifacts_dir(&self, run_id: &RunId) -> Option<PathBuf> {
        self.lock().get(run_id)?.artifacts_dir.clone()
    }

    /// Current status as recorded by [`set_status`](Self::set_status).
    pub fn status(&self, run_id: &RunId) -> Option<RunStatus> {
        self.lock().get(run_id).map(|log| log.status)
    }

    pub fn to_summary(&self, run_id: &RunId) -> Option<ObservabilitySummary> {
        let runs = self.lock();
        let log = runs.get(run_id)?;
        Some(ObservabilitySummary {
            artifacts_dir: log.artifacts_dir.clone(),
            started_at: Some(log.started_at),
            ended_at: log.ended_at,
            events: log.events.iter().cloned().collect(),
            artifacts: log.artifacts.clone(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RunId, RunLog>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ObservabilityStore {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_WINDOW)
    }
}

fn open_event_log(dir: &Path) -> std::io::Result<LineWriter<File>> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(EVENTS_FILE))?;
    Ok(LineWriter::new(file))
}

fn append_event(writer: &mut LineWriter<File>, event: &ObservabilityEvent) -> std::io::Result<()> {
    let line = serde_json::to_string(event)?;
    writeln!(writer, "{line}")
}

/// Accept only plain relative paths that stay below their base.
pub(crate) fn safe_relative(path: &str) -> Option<&Path> {
    let path = Path::new(path);
    let mut normal = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (normal > 0).then_some(path)
}
