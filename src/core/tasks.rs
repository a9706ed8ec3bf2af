//! Built-in tasks.

use serde_json::json;

use crate::error::Result;
use crate::executor::{StepOutcome, Task, TaskContext};
use crate::release::{release_label, RollbackOutcome};
use crate::strategy::{configured_strategies, Family, Inventory, PolyglotStrategy};

/// Verify the target can host the application: SCM binary, package
/// managers, runtime versions, PHP extensions and database drivers.
pub struct CheckTask;

impl Task for CheckTask {
    fn name(&self) -> &str {
        "check"
    }

    fn description(&self) -> &str {
        "Check that the server is ready to receive the application"
    }

    fn execute(&self, context: &TaskContext<'_>) -> Result<StepOutcome> {
        let config = &context.execution.config;
        let mut errors: Vec<String> = Vec::new();

        let scm = config.get_str("scm.scm").unwrap_or("git");
        if context.shell.which(scm).is_none() {
            errors.push(format!("The {} binary could not be found", scm));
        }

        let factory = context.strategy_factory();
        let mut polyglot = PolyglotStrategy::new(
            Family::Check,
            configured_strategies(config, Family::Check),
            &factory,
            context.mode(),
        );

        if !polyglot.manager() {
            errors.push(format!("Missing package manager(s): {}", failed_children(&polyglot)));
        }
        if !polyglot.language() {
            errors.push(format!(
                "Runtime version requirement not met: {}",
                failed_children(&polyglot)
            ));
        }

        let extensions = polyglot.gather_missing_from_method(Inventory::Extensions);
        if !extensions.is_empty() {
            errors.push(format!("Missing extension(s): {}", extensions.join(", ")));
        }
        let drivers = polyglot.gather_missing_from_method(Inventory::Drivers);
        if !drivers.is_empty() {
            errors.push(format!("Missing database driver(s): {}", drivers.join(", ")));
        }

        let data = json!({
            "strategies": polyglot.strategies(),
            "extensions": extensions,
            "drivers": drivers,
        });

        if errors.is_empty() {
            Ok(StepOutcome::succeeded("Your server is ready to deploy").with_data(data))
        } else {
            Ok(StepOutcome::failed(errors.join("\n")).with_data(data))
        }
    }
}

/// Children whose last result was an explicit failure.
fn failed_children(polyglot: &PolyglotStrategy<'_>) -> String {
    polyglot
        .results()
        .iter()
        .filter(|(_, result)| **result == Some(false))
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Install (or update) the application's dependencies in the current release.
pub struct DependenciesTask {
    pub update: bool,
}

impl Task for DependenciesTask {
    fn name(&self) -> &str {
        "dependencies"
    }

    fn description(&self) -> &str {
        "Install or update the dependencies"
    }

    fn execute(&self, context: &TaskContext<'_>) -> Result<StepOutcome> {
        let factory = context.strategy_factory();
        let mut polyglot = PolyglotStrategy::new(
            Family::Dependencies,
            configured_strategies(&context.execution.config, Family::Dependencies),
            &factory,
            context.mode(),
        );

        let (passed, verb) = if self.update {
            (polyglot.update(), "updated")
        } else {
            (polyglot.install(), "installed")
        };
        let data = json!({ "results": polyglot.results() });

        if !passed {
            return Ok(StepOutcome::failed(format!(
                "Dependencies could not be {}: {}",
                verb,
                failed_children(&polyglot)
            ))
            .with_data(data));
        }

        let ran: Vec<&str> = polyglot
            .results()
            .iter()
            .filter(|(_, result)| result.is_some())
            .map(|(name, _)| name.as_str())
            .collect();

        if ran.is_empty() {
            Ok(StepOutcome::unchanged("No dependencies to manage").with_data(data))
        } else {
            Ok(StepOutcome::succeeded(format!("Dependencies {} ({})", verb, ran.join(", "))).with_data(data))
        }
    }
}

/// Point `current` back at an earlier release.
///
/// A positional release rolls back to that release, `--list` asks which
/// one, otherwise the release before the current one is used.
pub struct RollbackTask;

impl Task for RollbackTask {
    fn name(&self) -> &str {
        "rollback"
    }

    fn description(&self) -> &str {
        "Rollback to the previous release"
    }

    fn execute(&self, context: &TaskContext<'_>) -> Result<StepOutcome> {
        let handle = context.target.handle.as_str();
        let options = context.options();
        let previous = context.releases.get_current_release(handle);

        let outcome = match options.release.as_deref().filter(|r| !r.trim().is_empty()) {
            Some(requested) => context.releases.rollback_to(handle, requested),
            None if options.list => context.releases.rollback_interactive(handle, context.prompt)?,
            None => context.releases.rollback_to_previous(handle),
        };
        log_status!("rollback", "[{}] {}", handle, outcome.message());

        let RollbackOutcome::Activated { release } = outcome else {
            return Ok(StepOutcome::unchanged(outcome.message()).with_data(json!(outcome)));
        };

        if let Err(err) = context.shell.activate(release) {
            if let Some(previous) = previous {
                context.releases.activate(handle, previous);
            }
            return Err(err);
        }

        Ok(StepOutcome::succeeded(outcome.message()).with_data(json!(outcome)))
    }
}

/// Report the current release of each target.
pub struct CurrentReleaseTask;

impl Task for CurrentReleaseTask {
    fn name(&self) -> &str {
        "current"
    }

    fn description(&self) -> &str {
        "Display what the current release is"
    }

    fn execute(&self, context: &TaskContext<'_>) -> Result<StepOutcome> {
        let history = context.releases.history(&context.target.handle);
        let data = json!({
            "current": history.get_current_release(),
            "previous": history.get_previous_release(),
            "releases": history.newest_first(),
        });

        match history.get_current_release() {
            Some(current) => Ok(StepOutcome::succeeded(format!(
                "The current release is {}",
                release_label(current)
            ))
            .with_data(data)),
            None => Ok(StepOutcome::unchanged("No release has yet been deployed").with_data(data)),
        }
    }
}

/// Run arbitrary commands inside the current release, stopping at the first
/// failure.
pub struct CommandTask {
    pub commands: Vec<String>,
}

impl Task for CommandTask {
    fn name(&self) -> &str {
        "run"
    }

    fn description(&self) -> &str {
        "Run commands in the current release"
    }

    fn execute(&self, context: &TaskContext<'_>) -> Result<StepOutcome> {
        let mut outputs = Vec::new();

        for command in &self.commands {
            let output = context.shell.run_for_current_release(command);
            outputs.push(json!({
                "command": command,
                "exitCode": output.exit_code,
                "stdout": output.stdout,
            }));

            if !output.success {
                return Ok(StepOutcome::failed(format!(
                    "'{}' failed: {}",
                    command,
                    output.error_text()
                ))
                .with_data(json!(outputs)));
            }
        }

        Ok(StepOutcome::succeeded(format!("Ran {} command(s)", self.commands.len())).with_data(json!(outputs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ErrorCode;
    use crate::executor::{ExecutionContext, StepStatus};
    use crate::options::CommandOptions;
    use crate::queue::QueueMode;
    use crate::release::{Prompt, ReleaseController, ReleaseHistory};
    use crate::remote::testing::RecordingShell;
    use crate::remote::{ReleaseLayout, ReleaseShell};
    use crate::strategy::testing::FakeStrategy;
    use crate::strategy::{Strategy, StrategyContext, StrategyRegistry};
    use crate::targets::TargetContext;
    use serde_json::{Map, Value};
    use std::path::PathBuf;
    use std::sync::Arc;

    const HANDLE: &str = "production";

    struct Choose(usize);

    impl Prompt for Choose {
        fn ask_with(&self, _question: &str, _choices: &[String]) -> Result<usize> {
            Ok(self.0)
        }
    }

    struct Fixture {
        remote: Arc<RecordingShell>,
        target: TargetContext,
        execution: ExecutionContext,
        releases: ReleaseController,
        strategies: StrategyRegistry,
    }

    impl Fixture {
        fn new(remote: RecordingShell, options: CommandOptions, config: Value) -> Self {
            let releases = ReleaseController::new();
            releases.sync(HANDLE, ReleaseHistory::new([10, 15, 20], Some(20)));

            Self {
                remote: Arc::new(remote),
                target: TargetContext {
                    connection: HANDLE.to_string(),
                    server: 0,
                    stage: None,
                    handle: HANDLE.to_string(),
                    credentials: Map::new(),
                    multiserver: false,
                },
                execution: ExecutionContext {
                    mode: QueueMode::from_options(&options),
                    options,
                    config: Config::new(config),
                    branch: "main".to_string(),
                    app_root: PathBuf::from("."),
                    layout: ReleaseLayout::new("/srv", "blog"),
                },
                releases,
                strategies: StrategyRegistry::new(),
            }
        }

        fn run(&self, task: &dyn Task, prompt: &dyn Prompt) -> Result<StepOutcome> {
            let shell = ReleaseShell::new(self.remote.clone(), self.execution.layout.clone())
                .with_release(self.releases.get_current_release(HANDLE));
            task.execute(&TaskContext {
                target: &self.target,
                shell,
                execution: &self.execution,
                releases: &self.releases,
                strategies: &self.strategies,
                prompt,
            })
        }
    }

    fn passing_node(_context: &StrategyContext) -> Box<dyn Strategy> {
        Box::new(FakeStrategy::passing("Node"))
    }

    fn failing_php(_context: &StrategyContext) -> Box<dyn Strategy> {
        Box::new(FakeStrategy::failing("Php"))
    }

    fn php_without_intl(_context: &StrategyContext) -> Box<dyn Strategy> {
        Box::new(FakeStrategy::missing_extensions("Php", &["intl"]))
    }

    fn options(release: Option<&str>, list: bool) -> CommandOptions {
        CommandOptions {
            release: release.map(String::from),
            list,
            ..Default::default()
        }
    }

    #[test]
    fn rollback_without_arguments_goes_to_previous_release() {
        let fixture = Fixture::new(RecordingShell::new(), options(None, false), Value::Null);

        let outcome = fixture.run(&RollbackTask, &Choose(1)).unwrap();

        assert_eq!(outcome.status, StepStatus::Succeeded);
        assert_eq!(fixture.releases.get_current_release(HANDLE), Some(15));
        assert_eq!(
            fixture.remote.commands(),
            vec!["ln -sfn '/srv/blog/releases/15' '/srv/blog/current'"]
        );
    }

    #[test]
    fn rollback_to_named_release() {
        let fixture = Fixture::new(RecordingShell::new(), options(Some("10"), false), Value::Null);

        fixture.run(&RollbackTask, &Choose(1)).unwrap();

        assert_eq!(fixture.releases.get_current_release(HANDLE), Some(10));
    }

    #[test]
    fn rollback_to_unknown_release_changes_nothing() {
        let fixture = Fixture::new(RecordingShell::new(), options(Some("12"), false), Value::Null);

        let outcome = fixture.run(&RollbackTask, &Choose(1)).unwrap();

        assert_eq!(outcome.status, StepStatus::Unchanged);
        assert_eq!(fixture.releases.get_current_release(HANDLE), Some(20));
        assert!(fixture.remote.commands().is_empty());
    }

    #[test]
    fn rollback_list_uses_prompt_position() {
        let fixture = Fixture::new(RecordingShell::new(), options(None, true), Value::Null);

        fixture.run(&RollbackTask, &Choose(3)).unwrap();

        assert_eq!(fixture.releases.get_current_release(HANDLE), Some(10));
    }

    #[test]
    fn rollback_without_history_is_unchanged() {
        let fixture = Fixture::new(RecordingShell::new(), options(None, false), Value::Null);
        fixture.releases.sync(HANDLE, ReleaseHistory::default());

        let outcome = fixture.run(&RollbackTask, &Choose(1)).unwrap();

        assert_eq!(outcome.status, StepStatus::Unchanged);
        assert!(outcome.message.unwrap().contains("no releases have yet been deployed"));
    }

    #[test]
    fn rollback_restores_history_when_symlink_fails() {
        let fixture = Fixture::new(RecordingShell::failing_on("ln -sfn"), options(None, false), Value::Null);

        let err = fixture.run(&RollbackTask, &Choose(1)).unwrap_err();

        assert_eq!(err.code, ErrorCode::RemoteCommandFailed);
        assert_eq!(fixture.releases.get_current_release(HANDLE), Some(20));
    }

    #[test]
    fn current_release_reports_history() {
        let fixture = Fixture::new(RecordingShell::new(), CommandOptions::default(), Value::Null);

        let outcome = fixture.run(&CurrentReleaseTask, &Choose(1)).unwrap();

        assert_eq!(outcome.status, StepStatus::Succeeded);
        let data = outcome.data.unwrap();
        assert_eq!(data["current"], json!(20));
        assert_eq!(data["previous"], json!(15));
        assert_eq!(data["releases"], json!([20, 15, 10]));
    }

    #[test]
    fn dependencies_pass_when_every_applicable_strategy_passes() {
        let mut fixture = Fixture::new(
            RecordingShell::new(),
            CommandOptions::default(),
            json!({"strategies": {"dependencies": ["Node", "Php"]}}),
        );
        fixture
            .strategies
            .register(Family::Dependencies, "Node", passing_node);

        let outcome = fixture.run(&DependenciesTask { update: false }, &Choose(1)).unwrap();

        assert_eq!(outcome.status, StepStatus::Succeeded);
        assert_eq!(outcome.data.unwrap()["results"], json!({"Node": true, "Php": null}));
    }

    #[test]
    fn dependencies_fail_when_a_strategy_fails() {
        let mut fixture = Fixture::new(
            RecordingShell::new(),
            CommandOptions::default(),
            json!({"strategies": {"dependencies": ["Node", "Php"]}}),
        );
        fixture
            .strategies
            .register(Family::Dependencies, "Node", passing_node);
        fixture
            .strategies
            .register(Family::Dependencies, "Php", failing_php);

        let outcome = fixture.run(&DependenciesTask { update: true }, &Choose(1)).unwrap();

        assert_eq!(outcome.status, StepStatus::Failed);
        assert!(outcome.message.unwrap().contains("Php"));
    }

    #[test]
    fn dependencies_without_applicable_strategy_are_unchanged() {
        let fixture = Fixture::new(RecordingShell::new(), CommandOptions::default(), Value::Null);

        let outcome = fixture.run(&DependenciesTask { update: false }, &Choose(1)).unwrap();

        assert_eq!(outcome.status, StepStatus::Unchanged);
    }

    #[test]
    fn check_reports_missing_scm_and_extensions() {
        let mut fixture = Fixture::new(
            RecordingShell::failing_on("command -v git"),
            CommandOptions::default(),
            json!({"strategies": {"check": ["Node", "Php"]}}),
        );
        fixture.strategies.register(Family::Check, "Node", passing_node);
        fixture.strategies.register(Family::Check, "Php", php_without_intl);

        let outcome = fixture.run(&CheckTask, &Choose(1)).unwrap();

        assert_eq!(outcome.status, StepStatus::Failed);
        let message = outcome.message.unwrap();
        assert!(message.contains("git binary"));
        assert!(message.contains("intl"));
        assert_eq!(outcome.data.unwrap()["extensions"], json!(["intl"]));
    }

    #[test]
    fn check_passes_on_ready_server() {
        let mut fixture = Fixture::new(
            RecordingShell::new().respond("command -v git", "/usr/bin/git"),
            CommandOptions::default(),
            json!({"strategies": {"check": "Node"}}),
        );
        fixture.strategies.register(Family::Check, "Node", passing_node);

        let outcome = fixture.run(&CheckTask, &Choose(1)).unwrap();

        assert_eq!(outcome.status, StepStatus::Succeeded);
    }

    #[test]
    fn command_task_stops_at_first_failure() {
        let fixture = Fixture::new(RecordingShell::failing_on("migrate"), CommandOptions::default(), Value::Null);
        let task = CommandTask {
            commands: vec!["php artisan migrate".into(), "php artisan cache:clear".into()],
        };

        let outcome = fixture.run(&task, &Choose(1)).unwrap();

        assert_eq!(outcome.status, StepStatus::Failed);
        assert_eq!(
            fixture.remote.commands(),
            vec!["cd '/srv/blog/releases/20' && php artisan migrate"]
        );
    }
}
