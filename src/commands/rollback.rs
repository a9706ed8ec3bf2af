use clap::Args;

use dockhand::executor::{QueueRunResult, Task};
use dockhand::tasks::{CurrentReleaseTask, RollbackTask};

use super::{run_tasks, CmdResult, GlobalArgs, TargetArgs};

#[derive(Args)]
pub struct RollbackArgs {
    /// Release to roll back to (defaults to the previous release)
    pub release: Option<String>,

    /// Choose the release from a list
    #[arg(long, conflicts_with = "release")]
    pub list: bool,

    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args)]
pub struct CurrentArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

pub fn run(args: RollbackArgs, global: &GlobalArgs) -> CmdResult<QueueRunResult> {
    let mut options = args.target.options();
    options.release = args.release;
    options.list = args.list;

    run_tasks(vec![Box::new(RollbackTask) as Box<dyn Task>], options, global)
}

pub fn current(args: CurrentArgs, global: &GlobalArgs) -> CmdResult<QueueRunResult> {
    run_tasks(vec![Box::new(CurrentReleaseTask) as Box<dyn Task>], args.target.options(), global)
}
