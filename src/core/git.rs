//! Source control access for the project being deployed.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// Source control operations the deployment core needs.
pub trait Scm: Send + Sync {
    /// Raw output of the "current branch" query for the working copy.
    fn current_branch(&self) -> Result<String>;
}

/// Git working copy at a local path.
#[derive(Debug, Clone)]
pub struct GitScm {
    dir: PathBuf,
}

impl GitScm {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Scm for GitScm {
    fn current_branch(&self) -> Result<String> {
        let output = Command::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(&self.dir)
            .output()
            .map_err(|e| Error::git_command_failed(format!("Failed to run git rev-parse: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::git_command_failed(format!(
                "git rev-parse failed: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
