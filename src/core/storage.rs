//! Persisted local storage.
//!
//! A JSON document on disk holding values that must survive between
//! invocations: stored connection credentials
//! (`connections.<name>.servers.<index>.<field>`) and repository credentials
//! (`credentials`). Every `set` is written through immediately.

use crate::config::{get_path, set_path};
use crate::error::{Error, Result};
use crate::local_files::{self, FileSystem};
use crate::paths;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: Option<PathBuf>,
    data: Value,
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LocalStorage {
    /// Storage that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Value::Object(Map::new()),
        }
    }

    /// Open the storage file at `path`, starting empty when it doesn't exist.
    pub fn open(path: &Path) -> Result<Self> {
        let data = if path.is_file() {
            let content = local_files::local().read(path)?;
            if content.trim().is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    Error::config_invalid_json(path.display().to_string(), e.to_string())
                })?
            }
        } else {
            Value::Object(Map::new())
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            data,
        })
    }

    /// Open the default storage file for an application.
    pub fn for_application(application: &str) -> Result<Self> {
        Self::open(&paths::storage(application)?)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        get_path(&self.data, key).filter(|v| !v.is_null())
    }

    /// Set a value and write the document through to disk.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        set_path(&mut self.data, key, value);
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(&self.data)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize storage".to_string())))?;
        local_files::local().write(path, &content)
    }
}
