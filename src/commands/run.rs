use clap::Args;

use dockhand::executor::{QueueRunResult, Task};
use dockhand::tasks::CommandTask;

use super::{run_tasks, CmdResult, GlobalArgs, TargetArgs};

#[derive(Args)]
pub struct RunArgs {
    /// Commands to run in the current release, one per argument
    #[arg(required = true)]
    pub commands: Vec<String>,

    #[command(flatten)]
    pub target: TargetArgs,
}

pub fn run(args: RunArgs, global: &GlobalArgs) -> CmdResult<QueueRunResult> {
    run_tasks(
        vec![Box::new(CommandTask {
            commands: args.commands,
        }) as Box<dyn Task>],
        args.target.options(),
        global,
    )
}
