//! Scratch directories shared by the tasks of one program.

use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use subagent_core::RunError;
use tracing::{debug, info, warn};

/// Named scratch directories below a run-specific root.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    created: Mutex<Vec<PathBuf>>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create (or reuse) the directory `<root>/<name>`.
    ///
    /// `name` must be a single plain path component.
    pub fn create(&self, name: &str) -> Result<PathBuf, RunError> {
        let mut components = Path::new(name).components();
        let valid = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !valid {
            return Err(RunError::invalid_input(format!(
                "invalid workspace name '{name}'"
            )));
        }

        let path = self.root.join(name);
        std::fs::create_dir_all(&path).map_err(|e| {
            RunError::runtime(format!("failed to create workspace {}: {e}", path.display()))
        })?;

        let mut created = self.lock();
        if !created.contains(&path) {
            debug!(path = %path.display(), "Created workspace");
            created.push(path.clone());
        }
        Ok(path)
    }

    /// Path of a workspace created earlier.
    pub fn get(&self, name: &str) -> Option<PathBuf> {
        let path = self.root.join(name);
        self.lock().contains(&path).then_some(path)
    }

    /// Remove every created directory and, if empty, the root.
    ///
    /// Returns the number of directories removed.
    pub fn cleanup(&self) -> usize {
        let created = std::mem::take(&mut *self.lock());
        let mut removed = 0;
        for path in created {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove workspace"),
            }
        }
        // Only succeeds when nothing else lives under the root.
        let _ = std::fs::remove_dir(&self.root);
        info!(root = %self.root.display(), removed, "Workspace cleaned up");
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PathBuf>> {
        self.created.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
