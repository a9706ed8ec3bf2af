use serde::{Deserialize, Serialize};

/// Default size of the worker pool used in parallel mode.
pub const DEFAULT_WORKERS: usize = 8;

/// Options of the invoking command, exposed to the tasks it runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandOptions {
    /// Run each task on all targets concurrently.
    #[serde(default)]
    pub parallel: bool,
    /// Log remote commands instead of running them.
    #[serde(default)]
    pub pretend: bool,
    /// Connection(s) to run on, comma separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Server indices to restrict multiserver connections to, comma separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Interactive release selection for rollback.
    #[serde(default)]
    pub list: bool,
    /// Positional release argument for rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

impl CommandOptions {
    /// Parsed `--server` filter. Unparseable entries are ignored.
    pub fn server_filter(&self) -> Option<Vec<usize>> {
        let raw = self.server.as_deref().filter(|s| !s.trim().is_empty())?;
        Some(
            raw.split(',')
                .filter_map(|s| s.trim().parse::<usize>().ok())
                .collect(),
        )
    }

    pub fn worker_count(&self) -> usize {
        self.workers.filter(|n| *n > 0).unwrap_or(DEFAULT_WORKERS)
    }
}
