use clap::Args;

use dockhand::executor::{QueueRunResult, Task};
use dockhand::tasks::CheckTask;

use super::{run_tasks, CmdResult, GlobalArgs, TargetArgs};

#[derive(Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

pub fn run(args: CheckArgs, global: &GlobalArgs) -> CmdResult<QueueRunResult> {
    run_tasks(vec![Box::new(CheckTask) as Box<dyn Task>], args.target.options(), global)
}
