use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{check, connections, credentials, dependencies, rollback, run};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "dockhand")]
#[command(version = VERSION)]
#[command(about = "Run deployment tasks against one or many servers")]
struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    path: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server is ready to receive the application
    Check(check::CheckArgs),
    /// Install or update the application's dependencies
    #[command(visible_alias = "deps")]
    Dependencies(dependencies::DependenciesArgs),
    /// Roll back to an earlier release
    Rollback(rollback::RollbackArgs),
    /// Display the current release of each target
    Current(rollback::CurrentArgs),
    /// Run commands in the current release
    Run(run::RunArgs),
    /// List declared connections and the targets a selection resolves to
    Connections(connections::ConnectionsArgs),
    /// Manage server and repository credentials
    Credentials(credentials::CredentialsArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let project_dir = match cli.path {
        Some(path) => path,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                let err = dockhand::Error::internal_io(e.to_string(), Some("read current directory".to_string()));
                let _ = output::print_json_result(Err(err));
                return std::process::ExitCode::from(1);
            }
        },
    };
    let global = GlobalArgs { project_dir };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    let _ = output::print_json_result(json_result);

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
