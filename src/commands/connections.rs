use clap::Args;
use serde::Serialize;

use dockhand::targets::credential_str;

use super::{load_resolver, CmdResult, GlobalArgs, TargetArgs};

#[derive(Args)]
pub struct ConnectionsArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Debug, Serialize)]
pub struct ConnectionSummary {
    pub name: String,
    pub hosts: Vec<String>,
    pub multiserver: bool,
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct ConnectionsOutput {
    pub connections: Vec<ConnectionSummary>,
    pub stages: Vec<String>,
    /// Handles a task would run on with the given flags.
    pub targets: Vec<String>,
}

pub fn run(args: ConnectionsArgs, global: &GlobalArgs) -> CmdResult<ConnectionsOutput> {
    let options = args.target.options();
    let mut resolver = load_resolver(global, options.clone())?;

    if let Some(on) = options.on.as_deref() {
        resolver.set_connections([on])?;
    }
    resolver.set_stage(options.stage.as_deref());

    let active = resolver.get_connections();
    let connections = resolver
        .get_available_connections()
        .into_iter()
        .map(|(name, declaration)| ConnectionSummary {
            hosts: declaration
                .servers
                .iter()
                .map(|server| credential_str(server, "host").unwrap_or("?").to_string())
                .collect(),
            multiserver: declaration.servers.len() > 1,
            active: active.contains(&name),
            name,
        })
        .collect();

    let targets = resolver
        .resolve_targets()
        .map(|targets| targets.into_iter().map(|t| t.handle).collect())
        .unwrap_or_default();

    Ok((
        ConnectionsOutput {
            connections,
            stages: resolver.get_available_stages(),
            targets,
        },
        0,
    ))
}
