//! Release history per target.
//!
//! Releases are identified by their deployment timestamp (`YYYYMMDDHHMMSS`)
//! and kept oldest first. The controller is the only place that moves a
//! target's current release; mirroring that onto the server's `current`
//! symlink is left to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

/// Format of release identifiers.
pub const RELEASE_FORMAT: &str = "%Y%m%d%H%M%S";

pub const NO_PREVIOUS_RELEASE: &str =
    "Could not rollback as no releases have yet been deployed";

/// Asks the user to pick among choices.
pub trait Prompt: Send + Sync {
    /// Returns the 1-based position of the chosen entry.
    fn ask_with(&self, question: &str, choices: &[String]) -> Result<usize>;
}

/// Holds a lock across each question so answers from parallel targets
/// cannot cross.
pub struct SerializedPrompt {
    inner: Arc<dyn Prompt>,
    turn: Mutex<()>,
}

impl SerializedPrompt {
    pub fn new(inner: Arc<dyn Prompt>) -> Self {
        Self {
            inner,
            turn: Mutex::new(()),
        }
    }
}

impl Prompt for SerializedPrompt {
    fn ask_with(&self, question: &str, choices: &[String]) -> Result<usize> {
        let _turn = self.turn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.inner.ask_with(question, choices)
    }
}

/// Identifier for a release deployed now.
pub fn next_release_id() -> u64 {
    Utc::now()
        .format(RELEASE_FORMAT)
        .to_string()
        .parse()
        .unwrap_or_default()
}

/// Human readable label for a release, with its timestamp when parseable.
pub fn release_label(release: u64) -> String {
    match NaiveDateTime::parse_from_str(&release.to_string(), RELEASE_FORMAT) {
        Ok(date) => format!("{} ({})", release, date.format("%Y-%m-%d %H:%M:%S")),
        Err(_) => release.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackOutcome {
    Activated { release: u64 },
    /// No release to go back to; nothing changed.
    Unavailable,
    /// The requested release isn't known; nothing changed.
    Ignored { requested: String },
}

impl RollbackOutcome {
    pub fn message(&self) -> String {
        match self {
            RollbackOutcome::Activated { release } => {
                format!("Rolled back to release {}", release_label(*release))
            }
            RollbackOutcome::Unavailable => NO_PREVIOUS_RELEASE.to_string(),
            RollbackOutcome::Ignored { requested } => {
                format!("Release '{}' is not known, current release unchanged", requested)
            }
        }
    }
}

/// Known releases of one target and the active one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseHistory {
    releases: Vec<u64>,
    current: Option<u64>,
}

impl ReleaseHistory {
    pub fn new(releases: impl IntoIterator<Item = u64>, current: Option<u64>) -> Self {
        let mut releases: Vec<u64> = releases.into_iter().collect();
        releases.sort_unstable();
        releases.dedup();

        let current = current.filter(|id| releases.contains(id));
        Self { releases, current }
    }

    /// Oldest first.
    pub fn releases(&self) -> &[u64] {
        &self.releases
    }

    /// Newest first.
    pub fn newest_first(&self) -> Vec<u64> {
        self.releases.iter().rev().copied().collect()
    }

    pub fn get_current_release(&self) -> Option<u64> {
        self.current
    }

    /// The release right before the current one.
    pub fn get_previous_release(&self) -> Option<u64> {
        let current = self.current?;
        let position = self.releases.iter().position(|id| *id == current)?;
        position
            .checked_sub(1)
            .and_then(|previous| self.releases.get(previous))
            .copied()
    }

    /// Make `release` current. Unknown releases are ignored.
    pub fn activate(&mut self, release: u64) -> bool {
        if !self.releases.contains(&release) {
            return false;
        }
        self.current = Some(release);
        true
    }

    pub fn rollback_to_previous(&mut self) -> RollbackOutcome {
        match self.get_previous_release() {
            Some(previous) => {
                self.current = Some(previous);
                RollbackOutcome::Activated { release: previous }
            }
            None => RollbackOutcome::Unavailable,
        }
    }

    /// Roll back to a release given as text. Anything that isn't a known
    /// release id leaves the history untouched.
    pub fn rollback_to(&mut self, requested: &str) -> RollbackOutcome {
        match requested.trim().parse::<u64>() {
            Ok(release) if self.activate(release) => RollbackOutcome::Activated { release },
            _ => RollbackOutcome::Ignored {
                requested: requested.to_string(),
            },
        }
    }

    /// Let the user pick a release, newest first.
    pub fn rollback_interactive(&mut self, prompt: &dyn Prompt) -> Result<RollbackOutcome> {
        let choices = self.newest_first();
        if choices.is_empty() {
            return Ok(RollbackOutcome::Unavailable);
        }

        let labels: Vec<String> = choices.iter().map(|id| release_label(*id)).collect();
        let position = prompt.ask_with("Which release do you want to rollback to?", &labels)?;

        let release = position
            .checked_sub(1)
            .and_then(|index| choices.get(index))
            .copied()
            .ok_or_else(|| {
                Error::validation_invalid_argument(
                    "release",
                    format!("Choose a position between 1 and {}", choices.len()),
                    Some(position.to_string()),
                    None,
                )
            })?;

        self.activate(release);
        Ok(RollbackOutcome::Activated { release })
    }
}

/// Release histories keyed by target handle.
#[derive(Debug, Default)]
pub struct ReleaseController {
    histories: Mutex<HashMap<String, ReleaseHistory>>,
}

impl ReleaseController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ReleaseHistory>> {
        self.histories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace what is known about a target.
    pub fn sync(&self, handle: &str, history: ReleaseHistory) {
        self.lock().insert(handle.to_string(), history);
    }

    pub fn history(&self, handle: &str) -> ReleaseHistory {
        self.lock().get(handle).cloned().unwrap_or_default()
    }

    pub fn get_current_release(&self, handle: &str) -> Option<u64> {
        self.lock().get(handle).and_then(ReleaseHistory::get_current_release)
    }

    pub fn get_previous_release(&self, handle: &str) -> Option<u64> {
        self.lock().get(handle).and_then(ReleaseHistory::get_previous_release)
    }

    pub fn activate(&self, handle: &str, release: u64) -> bool {
        self.lock()
            .get_mut(handle)
            .is_some_and(|history| history.activate(release))
    }

    pub fn rollback_to_previous(&self, handle: &str) -> RollbackOutcome {
        self.lock()
            .entry(handle.to_string())
            .or_default()
            .rollback_to_previous()
    }

    pub fn rollback_to(&self, handle: &str, requested: &str) -> RollbackOutcome {
        self.lock()
            .entry(handle.to_string())
            .or_default()
            .rollback_to(requested)
    }

    /// Prompt without holding the lock, then apply the choice.
    pub fn rollback_interactive(&self, handle: &str, prompt: &dyn Prompt) -> Result<RollbackOutcome> {
        let mut history = self.history(handle);
        let outcome = history.rollback_interactive(prompt)?;

        if let RollbackOutcome::Activated { release } = outcome {
            self.activate(handle, release);
        }
        Ok(outcome)
    }
}
