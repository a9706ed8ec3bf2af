use clap::Args;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dockhand::config::Config;
use dockhand::executor::{application_name, QueueRunResult, Task, TaskQueueExecutor};
use dockhand::git::GitScm;
use dockhand::options::CommandOptions;
use dockhand::paths;
use dockhand::ssh::SshTransport;
use dockhand::storage::LocalStorage;
use dockhand::targets::{Settings, TargetResolver};

use crate::tty::TerminalPrompt;

pub type CmdResult<T> = dockhand::Result<(T, i32)>;

/// Exit code of a queue run where some targets failed.
const PARTIAL_FAILURE_EXIT_CODE: i32 = 20;

pub(crate) struct GlobalArgs {
    /// Directory holding the project configuration and manifests.
    pub project_dir: PathBuf,
}

/// Target selection and execution flags shared by every task command.
#[derive(Args, Default, Debug, Clone)]
pub struct TargetArgs {
    /// Run each task on all targets concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Print remote commands instead of running them
    #[arg(long)]
    pub pretend: bool,

    /// Connection(s) to run on, comma separated
    #[arg(long, value_name = "CONNECTIONS")]
    pub on: Option<String>,

    /// Stage to run on
    #[arg(long)]
    pub stage: Option<String>,

    /// Server indices of multiserver connections, comma separated
    #[arg(long, value_name = "INDICES")]
    pub server: Option<String>,

    /// Branch to deploy
    #[arg(long)]
    pub branch: Option<String>,

    /// Worker pool size in parallel mode
    #[arg(long)]
    pub workers: Option<usize>,
}

impl TargetArgs {
    pub fn options(&self) -> CommandOptions {
        CommandOptions {
            parallel: self.parallel,
            pretend: self.pretend,
            on: self.on.clone(),
            stage: self.stage.clone(),
            server: self.server.clone(),
            branch: self.branch.clone(),
            workers: self.workers,
            ..Default::default()
        }
    }
}

/// Load the project configuration and its local storage.
pub(crate) fn load_settings(project_dir: &Path, options: CommandOptions) -> dockhand::Result<Settings> {
    let config = match paths::project_config(project_dir) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let storage = LocalStorage::for_application(&application_name(&config, project_dir))?;

    Ok(Settings {
        config,
        storage,
        options,
    })
}

pub(crate) fn load_resolver(global: &GlobalArgs, options: CommandOptions) -> dockhand::Result<TargetResolver> {
    Ok(TargetResolver::new(load_settings(&global.project_dir, options)?))
}

/// Run a task queue over SSH against the selected targets.
pub(crate) fn run_tasks(
    tasks: Vec<Box<dyn Task>>,
    options: CommandOptions,
    global: &GlobalArgs,
) -> CmdResult<QueueRunResult> {
    let resolver = load_resolver(global, options.clone())?;
    let mut executor = TaskQueueExecutor::new(
        resolver,
        Arc::new(GitScm::new(&global.project_dir)),
        Arc::new(SshTransport),
        Arc::new(TerminalPrompt),
    )
    .with_app_root(&global.project_dir);

    let result = executor.run(&tasks, options)?;
    let exit_code = if result.success() {
        0
    } else {
        PARTIAL_FAILURE_EXIT_CODE
    };
    Ok((result, exit_code))
}

// ============================================================================
// Dynamic flag parsing (CLI layer)
// ============================================================================

/// Parse --key value pairs into a JSON object.
pub(crate) fn parse_kv_flags(extra: &[String]) -> dockhand::Result<Map<String, Value>> {
    let mut obj = Map::new();
    let mut iter = extra.iter();

    while let Some(arg) = iter.next() {
        let Some(key) = arg.strip_prefix("--") else {
            return Err(dockhand::Error::validation_invalid_argument(
                arg,
                format!("Expected a --key value flag, got '{}'", arg),
                None,
                None,
            ));
        };

        if let Some((key, value)) = key.split_once('=') {
            obj.insert(key.to_string(), parse_value(value));
            continue;
        }

        let value = iter.next().ok_or_else(|| {
            dockhand::Error::validation_invalid_argument(
                key,
                format!("Missing value for flag --{}", key),
                None,
                None,
            )
        })?;
        obj.insert(key.to_string(), parse_value(value));
    }

    Ok(obj)
}

/// Parse a string value into appropriate JSON type.
/// Order: bool → number → string
fn parse_value(s: &str) -> Value {
    if s == "true" {
        return json!(true);
    }
    if s == "false" {
        return json!(false);
    }
    if let Ok(n) = s.parse::<i64>() {
        return json!(n);
    }
    json!(s)
}

pub mod check;
pub mod connections;
pub mod credentials;
pub mod dependencies;
pub mod rollback;
pub mod run;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (dockhand::Result<serde_json::Value>, i32) {
    crate::tty::status("dockhand is working...");

    match command {
        crate::Commands::Check(args) => dispatch!(args, global, check),
        crate::Commands::Dependencies(args) => dispatch!(args, global, dependencies),
        crate::Commands::Rollback(args) => dispatch!(args, global, rollback),
        crate::Commands::Current(args) => {
            crate::output::map_cmd_result_to_json(rollback::current(args, global))
        }
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Connections(args) => dispatch!(args, global, connections),
        crate::Commands::Credentials(args) => dispatch!(args, global, credentials),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_kv_flags_types_values() {
        let flags = parse_kv_flags(&args(&["--host", "example.com", "--port", "2222", "--agent", "true"])).unwrap();
        assert_eq!(flags["host"], json!("example.com"));
        assert_eq!(flags["port"], json!(2222));
        assert_eq!(flags["agent"], json!(true));
    }

    #[test]
    fn parse_kv_flags_accepts_equals_form() {
        let flags = parse_kv_flags(&args(&["--username=deploy"])).unwrap();
        assert_eq!(flags["username"], json!("deploy"));
    }

    #[test]
    fn parse_kv_flags_rejects_missing_value_and_bare_words() {
        assert!(parse_kv_flags(&args(&["--host"])).is_err());
        assert!(parse_kv_flags(&args(&["host"])).is_err());
    }

    #[test]
    fn target_args_map_to_options() {
        let options = TargetArgs {
            parallel: true,
            on: Some("production,staging".to_string()),
            workers: Some(4),
            ..Default::default()
        }
        .options();

        assert!(options.parallel);
        assert_eq!(options.on.as_deref(), Some("production,staging"));
        assert_eq!(options.worker_count(), 4);
        assert!(!options.list);
    }
}
