//! Run-scoped handle on the observability store.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use subagent_core::{EventKind, RunId};

use crate::observability::ObservabilityStore;

/// Logs events and writes artifacts for one run.
#[derive(Clone)]
pub struct Observer {
    run_id: RunId,
    store: Arc<ObservabilityStore>,
}

impl Observer {
    pub fn new(run_id: RunId, store: Arc<ObservabilityStore>) -> Self {
        Self { run_id, store }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn log(&self, kind: EventKind, message: impl Into<String>, data: Option<Value>) {
        self.store.push(&self.run_id, kind, message, data);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(EventKind::Info, message, None);
    }

    /// Best-effort artifact write, see [`ObservabilityStore::write_artifact`].
    pub fn artifact(&self, path: &str, content: impl AsRef<[u8]>) -> Option<PathBuf> {
        self.store.write_artifact(&self.run_id, path, content.as_ref())
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer").field("run_id", &self.run_id).finish()
    }
}
