//! Event hooks for task lifecycle extensibility.
//!
//! Hooks are shell commands that run on the target at named events. They can
//! be declared globally, per connection and per stage; commands for a scope
//! run in that order (global, connection, stage).
//!
//! Event naming convention: `before:<task>` / `after:<task>`
//! Examples: `before:dependencies`, `after:rollback`

use crate::config::{value_to_string_list, Config};
use crate::error::{Error, Result};
use crate::remote::ReleaseShell;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// A map of event names to command lists.
pub type HookMap = HashMap<String, Vec<String>>;

/// The (connection, stage) pair hooks are resolved for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct HookScope {
    pub connection: Option<String>,
    pub stage: Option<String>,
}

impl HookScope {
    pub fn new(connection: Option<&str>, stage: Option<&str>) -> Self {
        Self {
            connection: connection.map(String::from),
            stage: stage.map(String::from),
        }
    }
}

/// Receives re-registration requests when the active connection or stage changes.
pub trait EventRegistrar: Send + Sync {
    fn register_configured_events(&self, scope: &HookScope);
}

/// Result of running a single hook command.
#[derive(Debug, Clone, Serialize)]
pub struct HookCommandResult {
    pub command: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Result of running all hooks for an event.
#[derive(Debug, Clone, Serialize)]
pub struct HookRunResult {
    pub event: String,
    pub commands: Vec<HookCommandResult>,
    pub all_succeeded: bool,
}

/// Whether hook failures abort the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFailureMode {
    /// Non-zero exit stops remaining hooks and returns an error.
    Fatal,
    /// Failures are recorded but execution continues.
    NonFatal,
}

/// Configured hooks, resolved and cached per scope.
#[derive(Debug, Default)]
pub struct Hooks {
    global: HookMap,
    connections: HashMap<String, HookMap>,
    stages: HashMap<String, HookMap>,
    registered: RwLock<HashMap<HookScope, HookMap>>,
}

impl Hooks {
    /// Read `hooks`, `on.connections.<name>.hooks` and `on.stages.<name>.hooks`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            global: parse_hook_map(config.get("hooks")),
            connections: parse_scoped(config.get("on.connections")),
            stages: parse_scoped(config.get("on.stages")),
            registered: RwLock::new(HashMap::new()),
        }
    }

    /// Commands bound to `event` for `scope`.
    pub fn resolve(&self, scope: &HookScope, event: &str) -> Vec<String> {
        if let Ok(registered) = self.registered.read() {
            if let Some(map) = registered.get(scope) {
                return map.get(event).cloned().unwrap_or_default();
            }
        }

        self.build(scope).remove(event).unwrap_or_default()
    }

    pub fn is_registered(&self, scope: &HookScope) -> bool {
        self.registered
            .read()
            .map(|registered| registered.contains_key(scope))
            .unwrap_or(false)
    }

    fn build(&self, scope: &HookScope) -> HookMap {
        let mut map = self.global.clone();

        let scoped = [
            scope.connection.as_ref().and_then(|c| self.connections.get(c)),
            scope.stage.as_ref().and_then(|s| self.stages.get(s)),
        ];

        for extra in scoped.into_iter().flatten() {
            for (event, commands) in extra {
                map.entry(event.clone())
                    .or_default()
                    .extend(commands.iter().cloned());
            }
        }

        map
    }
}

impl EventRegistrar for Hooks {
    fn register_configured_events(&self, scope: &HookScope) {
        let map = self.build(scope);
        let count: usize = map.values().map(Vec::len).sum();

        if let Ok(mut registered) = self.registered.write() {
            registered.insert(scope.clone(), map);
        }

        log_status!(
            "hooks",
            "Registered {} hook command(s) for {}{}",
            count,
            scope.connection.as_deref().unwrap_or("<none>"),
            scope
                .stage
                .as_deref()
                .map(|s| format!(" (stage {})", s))
                .unwrap_or_default()
        );
    }
}

fn parse_hook_map(value: Option<&Value>) -> HookMap {
    let Some(Value::Object(obj)) = value else {
        return HookMap::new();
    };

    obj.iter()
        .map(|(event, commands)| (event.clone(), value_to_string_list(Some(commands))))
        .filter(|(_, commands)| !commands.is_empty())
        .collect()
}

fn parse_scoped(value: Option<&Value>) -> HashMap<String, HookMap> {
    let Some(Value::Object(obj)) = value else {
        return HashMap::new();
    };

    obj.iter()
        .map(|(name, scoped)| (name.clone(), parse_hook_map(scoped.get("hooks"))))
        .collect()
}

/// Run a list of commands on a target, inside its current release.
pub fn run_commands(
    shell: &ReleaseShell,
    commands: &[String],
    event: &str,
    failure_mode: HookFailureMode,
) -> Result<HookRunResult> {
    let mut results = Vec::new();
    let mut all_succeeded = true;

    for command in commands {
        let output = shell.run_for_current_release(command);

        let result = HookCommandResult {
            command: command.clone(),
            success: output.success,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            exit_code: output.exit_code,
        };

        if !output.success {
            all_succeeded = false;

            if failure_mode == HookFailureMode::Fatal {
                let error_text = if output.stderr.trim().is_empty() {
                    &output.stdout
                } else {
                    &output.stderr
                };
                return Err(Error::internal_unexpected(format!(
                    "Hook '{}' command failed: {}\n{}",
                    event, command, error_text
                )));
            }
        }

        results.push(result);
    }

    Ok(HookRunResult {
        event: event.to_string(),
        commands: results,
        all_succeeded,
    })
}

/// Standard event names for task hooks.
pub mod events {
    pub fn before(task: &str) -> String {
        format!("before:{}", task)
    }

    pub fn after(task: &str) -> String {
        format!("after:{}", task)
    }
}
