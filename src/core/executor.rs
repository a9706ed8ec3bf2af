//! Task queue execution across resolved targets.
//!
//! A run binds the invoking command's options, validates credentials for
//! every target before anything touches a server, then runs each task
//! against all targets before moving to the next task. A target whose step
//! fails skips the rest of its queue; other targets carry on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::credentials::{missing_server_credentials, CredentialStore};
use crate::error::{Error, Hint, Result};
use crate::git::Scm;
use crate::hooks::{events, run_commands, HookFailureMode, Hooks};
use crate::options::CommandOptions;
use crate::queue::{run_queue, QueueMode};
use crate::release::{Prompt, ReleaseController, ReleaseHistory, SerializedPrompt};
use crate::remote::{PretendTransport, ReleaseLayout, ReleaseShell, Transport};
use crate::strategy::{ScopedRegistry, StrategyContext, StrategyRegistry};
use crate::targets::{TargetContext, TargetResolver};

/// Remote directory applications are deployed under when none is configured.
pub const DEFAULT_ROOT_DIRECTORY: &str = "/home/www";

/// One step of a queue.
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn execute(&self, context: &TaskContext<'_>) -> Result<StepOutcome>;
}

/// Options and settings bound for the duration of one run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub options: CommandOptions,
    pub config: Config,
    pub branch: String,
    pub mode: QueueMode,
    pub app_root: PathBuf,
    pub layout: ReleaseLayout,
}

/// What a task sees while running on one target.
pub struct TaskContext<'a> {
    pub target: &'a TargetContext,
    pub shell: ReleaseShell,
    pub execution: &'a ExecutionContext,
    pub releases: &'a ReleaseController,
    pub strategies: &'a StrategyRegistry,
    pub prompt: &'a dyn Prompt,
}

impl<'a> TaskContext<'a> {
    pub fn options(&self) -> &CommandOptions {
        &self.execution.options
    }

    pub fn mode(&self) -> QueueMode {
        self.execution.mode
    }

    /// Strategy factory bound to this target.
    pub fn strategy_factory(&self) -> ScopedRegistry<'a> {
        self.strategies.scoped(StrategyContext::from_config(
            self.shell.clone(),
            self.execution.app_root.clone(),
            &self.execution.config,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// Completed without changing anything.
    Unchanged,
    Failed,
    /// Not run because an earlier step failed on this target.
    Skipped,
}

/// What a task reports for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StepOutcome {
    fn new(status: StepStatus, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status,
            message: Some(message).filter(|m| !m.is_empty()),
            data: None,
        }
    }

    pub fn succeeded(message: impl Into<String>) -> Self {
        Self::new(StepStatus::Succeeded, message)
    }

    pub fn unchanged(message: impl Into<String>) -> Self {
        Self::new(StepStatus::Unchanged, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(StepStatus::Failed, message)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub task: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
}

impl StepResult {
    fn from_outcome(task: &str, outcome: StepOutcome) -> Self {
        Self {
            task: task.to_string(),
            status: outcome.status,
            message: outcome.message,
            data: outcome.data,
            warnings: Vec::new(),
            hints: Vec::new(),
        }
    }

    fn from_error(task: &str, error: &Error) -> Self {
        Self {
            hints: error.hints.clone(),
            ..Self::from_outcome(task, StepOutcome::failed(error.message.clone()))
        }
    }

    fn skipped(task: &str) -> Self {
        Self::from_outcome(task, StepOutcome::new(StepStatus::Skipped, ""))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetRunResult {
    pub target: TargetContext,
    pub steps: Vec<StepResult>,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueRunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueRunResult {
    pub targets: Vec<TargetRunResult>,
    pub summary: QueueRunSummary,
    pub parallel: bool,
    pub elapsed_secs: f64,
}

impl QueueRunResult {
    pub fn success(&self) -> bool {
        self.summary.failed == 0
    }
}

/// One target's state across the queue.
struct TargetSession {
    target: TargetContext,
    shell: Result<ReleaseShell>,
    steps: Vec<StepResult>,
    halted: bool,
}

pub struct TaskQueueExecutor {
    resolver: TargetResolver,
    scm: Arc<dyn Scm>,
    transport: Arc<dyn Transport>,
    prompt: Arc<dyn Prompt>,
    hooks: Arc<Hooks>,
    releases: Arc<ReleaseController>,
    strategies: StrategyRegistry,
    app_root: PathBuf,
    context: Option<Arc<ExecutionContext>>,
}

impl TaskQueueExecutor {
    /// Hooks are read from the resolver's configuration and re-registered
    /// whenever the resolver changes connection or stage.
    pub fn new(
        resolver: TargetResolver,
        scm: Arc<dyn Scm>,
        transport: Arc<dyn Transport>,
        prompt: Arc<dyn Prompt>,
    ) -> Self {
        let hooks = Arc::new(Hooks::from_config(resolver.config()));
        let resolver = resolver.with_events(hooks.clone());

        Self {
            resolver,
            scm,
            transport,
            prompt: Arc::new(SerializedPrompt::new(prompt)),
            hooks,
            releases: Arc::new(ReleaseController::new()),
            strategies: StrategyRegistry::with_defaults(),
            app_root: PathBuf::from("."),
            context: None,
        }
    }

    /// Local checkout holding the application's manifests.
    pub fn with_app_root(mut self, app_root: impl Into<PathBuf>) -> Self {
        self.app_root = app_root.into();
        self
    }

    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_releases(mut self, releases: Arc<ReleaseController>) -> Self {
        self.releases = releases;
        self
    }

    pub fn resolver(&self) -> &TargetResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut TargetResolver {
        &mut self.resolver
    }

    pub fn releases(&self) -> &ReleaseController {
        &self.releases
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// The bound execution context; only set while a run is in progress.
    pub fn context(&self) -> Option<&ExecutionContext> {
        self.context.as_deref()
    }

    /// Run `tasks` in order against every resolved target.
    pub fn run(&mut self, tasks: &[Box<dyn Task>], options: CommandOptions) -> Result<QueueRunResult> {
        let started = Instant::now();

        let result = self
            .bind(options)
            .and_then(|context| self.run_bound(tasks, &context));

        let elapsed = started.elapsed().as_secs_f64();
        log_status!("tasks", "Execution time: {:.4}s", elapsed);
        self.unbind();

        result.map(|mut run| {
            run.elapsed_secs = elapsed;
            run
        })
    }

    fn bind(&mut self, options: CommandOptions) -> Result<Arc<ExecutionContext>> {
        self.resolver.settings_mut().options = options.clone();
        self.resolver.disconnect();

        if let Some(on) = options.on.as_deref().filter(|on| !on.trim().is_empty()) {
            self.resolver.set_connections([on])?;
        }
        self.resolver.set_stage(options.stage.as_deref());

        let branch = CredentialStore::new(&mut self.resolver, self.scm.as_ref()).get_repository_branch();
        let config = self.resolver.config().clone();
        let layout = ReleaseLayout::new(
            config
                .get_str("root_directory")
                .unwrap_or(DEFAULT_ROOT_DIRECTORY),
            application_name(&config, &self.app_root),
        );

        let context = Arc::new(ExecutionContext {
            mode: QueueMode::from_options(&options),
            options,
            config,
            branch,
            app_root: self.app_root.clone(),
            layout,
        });
        self.context = Some(context.clone());
        Ok(context)
    }

    fn unbind(&mut self) {
        self.context = None;
    }

    /// Fail before any remote side effect when a target or the repository
    /// lacks credentials.
    fn validate_credentials(&mut self, targets: &[TargetContext]) -> Result<()> {
        for target in targets {
            let missing = missing_server_credentials(target);
            if !missing.is_empty() {
                return Err(Error::credentials_missing(target.handle.clone(), missing));
            }
        }

        let store = CredentialStore::new(&mut self.resolver, self.scm.as_ref());
        let missing = store.missing_repository_credentials();
        if !missing.is_empty() {
            return Err(Error::credentials_missing("repository", missing));
        }

        Ok(())
    }

    fn run_bound(&mut self, tasks: &[Box<dyn Task>], context: &ExecutionContext) -> Result<QueueRunResult> {
        let targets = self.resolver.resolve_targets()?;
        self.validate_credentials(&targets)?;

        let this = &*self;
        let mut sessions: Vec<TargetSession> = targets
            .into_iter()
            .map(|target| this.open_session(target, context))
            .collect();

        for (position, task) in tasks.iter().enumerate() {
            let active: Vec<usize> = (0..sessions.len())
                .filter(|&index| !sessions[index].halted)
                .collect();

            let units: Vec<_> = active
                .iter()
                .map(|&index| {
                    let session = &sessions[index];
                    move || this.run_step(task.as_ref(), session, context)
                })
                .collect();
            let results = run_queue(context.mode, units);

            for (index, result) in active.iter().zip(results) {
                let session = &mut sessions[*index];
                let step = result.unwrap_or_else(|| {
                    StepResult::from_error(
                        task.name(),
                        &Error::task_failed(task.name(), &session.target.handle, "Task panicked"),
                    )
                });

                if step.status == StepStatus::Failed {
                    session.halted = true;
                }
                session.steps.push(step);
            }

            for session in sessions.iter_mut() {
                if session.halted && session.steps.len() <= position {
                    session.steps.push(StepResult::skipped(task.name()));
                }
            }
        }

        let targets: Vec<TargetRunResult> = sessions
            .into_iter()
            .map(|session| TargetRunResult {
                success: !session.halted,
                target: session.target,
                steps: session.steps,
            })
            .collect();

        let succeeded = targets.iter().filter(|t| t.success).count();
        Ok(QueueRunResult {
            summary: QueueRunSummary {
                total: targets.len(),
                succeeded,
                failed: targets.len() - succeeded,
            },
            targets,
            parallel: context.mode.is_parallel(),
            elapsed_secs: 0.0,
        })
    }

    fn open_session(&self, target: TargetContext, context: &ExecutionContext) -> TargetSession {
        let transport: &dyn Transport = if context.options.pretend {
            &PretendTransport
        } else {
            self.transport.as_ref()
        };

        let shell = transport.connect(&target).map(|remote| {
            let layout = context.layout.clone().with_stage(target.stage.as_deref());
            let shell = ReleaseShell::new(remote, layout).with_handle(target.handle.clone());
            let history = ReleaseHistory::new(shell.list_releases(), shell.current_release());
            self.releases.sync(&target.handle, history);
            shell
        });

        if let Err(err) = &shell {
            log_status!("tasks", "[{}] Could not connect: {}", target.handle, err.message);
        }

        TargetSession {
            target,
            shell,
            steps: Vec::new(),
            halted: false,
        }
    }

    fn run_step(&self, task: &dyn Task, session: &TargetSession, context: &ExecutionContext) -> StepResult {
        let target = &session.target;
        let shell = match &session.shell {
            Ok(shell) => shell
                .clone()
                .with_release(self.releases.get_current_release(&target.handle)),
            Err(err) => return StepResult::from_error(task.name(), err),
        };

        let scope = target.hook_scope();
        let before = events::before(task.name());
        let commands = self.hooks.resolve(&scope, &before);
        if !commands.is_empty() {
            if let Err(err) = run_commands(&shell, &commands, &before, HookFailureMode::Fatal) {
                return StepResult::from_error(task.name(), &err);
            }
        }

        log_status!("tasks", "[{}] Running {}", target.handle, task.name());
        let task_context = TaskContext {
            target,
            shell: shell.clone(),
            execution: context,
            releases: &self.releases,
            strategies: &self.strategies,
            prompt: self.prompt.as_ref(),
        };

        let mut step = match task.execute(&task_context) {
            Ok(outcome) => StepResult::from_outcome(task.name(), outcome),
            Err(err) => StepResult::from_error(task.name(), &err),
        };

        if step.status != StepStatus::Failed {
            let after = events::after(task.name());
            let commands = self.hooks.resolve(&scope, &after);
            if !commands.is_empty() {
                if let Ok(hooks) = run_commands(&shell, &commands, &after, HookFailureMode::NonFatal) {
                    step.warnings.extend(
                        hooks
                            .commands
                            .iter()
                            .filter(|c| !c.success)
                            .map(|c| format!("Hook '{}' command failed: {}", after, c.command)),
                    );
                }
            }
        }

        step
    }
}

/// `application_name`, else the name of the application's directory.
pub fn application_name(config: &Config, app_root: &Path) -> String {
    if let Some(name) = config.get_str("application_name") {
        return name.to_string();
    }

    std::fs::canonicalize(app_root)
        .ok()
        .and_then(|path| path.file_name().map(|n| n.to_string_lossy().to_string()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "application".to_string())
}
