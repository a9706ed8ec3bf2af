use clap::Args;

use dockhand::executor::{QueueRunResult, Task};
use dockhand::tasks::DependenciesTask;

use super::{run_tasks, CmdResult, GlobalArgs, TargetArgs};

#[derive(Args)]
pub struct DependenciesArgs {
    /// Update dependencies instead of installing the locked versions
    #[arg(long)]
    pub update: bool,

    #[command(flatten)]
    pub target: TargetArgs,
}

pub fn run(args: DependenciesArgs, global: &GlobalArgs) -> CmdResult<QueueRunResult> {
    run_tasks(
        vec![Box::new(DependenciesTask { update: args.update }) as Box<dyn Task>],
        args.target.options(),
        global,
    )
}
