//! Private on-disk copy of a task's system prompt.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::LauncherError;

/// A system prompt written into its own temporary directory.
///
/// The directory (0700) and file (0600) are removed when this value drops,
/// so every exit path of the executor cleans up.
#[derive(Debug)]
pub struct PromptFile {
    _dir: TempDir,
    path: PathBuf,
}

impl PromptFile {
    /// Write `prompt` to a fresh private file. Blank prompts produce `None`.
    pub fn create(agent: &str, prompt: &str) -> Result<Option<Self>, LauncherError> {
        if prompt.trim().is_empty() {
            return Ok(None);
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("subagent-prompt-");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o700));
        }
        let dir = builder.tempdir().map_err(LauncherError::PromptFile)?;
        let path = dir.path().join(format!("prompt-{}.md", file_safe(agent)));

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path).map_err(LauncherError::PromptFile)?;
        file.write_all(prompt.as_bytes())
            .map_err(LauncherError::PromptFile)?;

        Ok(Some(Self { _dir: dir, path }))
    }

    /// Path to pass to the launcher.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn file_safe(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "agent".to_string()
    } else {
        cleaned
    }
}
