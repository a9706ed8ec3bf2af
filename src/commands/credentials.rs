use clap::{Args, Subcommand};
use serde::Serialize;

use dockhand::credentials::{missing_server_credentials, CredentialStore, RepositorySummary};
use dockhand::git::GitScm;

use super::{load_resolver, parse_kv_flags, CmdResult, GlobalArgs, TargetArgs};

#[derive(Args)]
pub struct CredentialsArgs {
    #[command(subcommand)]
    command: CredentialsCommand,
}

#[derive(Subcommand)]
enum CredentialsCommand {
    /// Store server credentials for a connection
    ///
    /// Fields are passed as `--key value` flags after `--`:
    /// `dockhand credentials set --on production -- --host example.com --username deploy`
    Set {
        #[command(flatten)]
        target: TargetArgs,

        /// Server index within the connection
        #[arg(long = "index", default_value_t = 0)]
        index: usize,

        /// Credential fields as --key value pairs
        #[arg(last = true, allow_hyphen_values = true)]
        fields: Vec<String>,
    },
    /// Store repository credentials (repository, username, password)
    Repository {
        /// Credential fields as --key value pairs
        #[arg(last = true, allow_hyphen_values = true)]
        fields: Vec<String>,
    },
    /// Show the repository settings and what each target is missing
    Show {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Debug, Serialize)]
pub struct MissingCredentials {
    pub target: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CredentialsOutput {
    Set {
        connection: String,
        server: usize,
        fields: Vec<String>,
    },
    Repository {
        fields: Vec<String>,
    },
    Show {
        repository: RepositorySummary,
        missing: Vec<MissingCredentials>,
    },
}

pub fn run(args: CredentialsArgs, global: &GlobalArgs) -> CmdResult<CredentialsOutput> {
    let scm = GitScm::new(&global.project_dir);

    match args.command {
        CredentialsCommand::Set {
            target,
            index,
            fields,
        } => {
            let credentials = parse_kv_flags(&fields)?;
            let options = target.options();
            let mut resolver = load_resolver(global, options.clone())?;

            if let Some(on) = options.on.as_deref() {
                resolver.set_connections([on])?;
            }
            let connection = resolver.get_connection().ok_or_else(|| {
                dockhand::Error::validation_missing_argument(vec!["on".to_string()])
                    .with_hint("Pick the connection to store credentials for with --on")
            })?;

            let names: Vec<String> = credentials.keys().cloned().collect();
            CredentialStore::new(&mut resolver, &scm).sync_connection_credentials(
                Some(&connection),
                credentials,
                index,
            )?;

            Ok((
                CredentialsOutput::Set {
                    connection,
                    server: index,
                    fields: names,
                },
                0,
            ))
        }
        CredentialsCommand::Repository { fields } => {
            let credentials = parse_kv_flags(&fields)?;
            let names: Vec<String> = credentials.keys().cloned().collect();
            let mut resolver = load_resolver(global, Default::default())?;

            CredentialStore::new(&mut resolver, &scm).store_repository_credentials(credentials)?;

            Ok((CredentialsOutput::Repository { fields: names }, 0))
        }
        CredentialsCommand::Show { target } => {
            let options = target.options();
            let mut resolver = load_resolver(global, options.clone())?;

            if let Some(on) = options.on.as_deref() {
                resolver.set_connections([on])?;
            }
            resolver.set_stage(options.stage.as_deref());

            let mut missing: Vec<MissingCredentials> = resolver
                .resolve_targets()?
                .iter()
                .map(|target| MissingCredentials {
                    target: target.handle.clone(),
                    fields: missing_server_credentials(target),
                })
                .filter(|missing| !missing.fields.is_empty())
                .collect();

            let store = CredentialStore::new(&mut resolver, &scm);
            let repository = store.repository_summary();
            let missing_repository = store.missing_repository_credentials();
            if !missing_repository.is_empty() {
                missing.push(MissingCredentials {
                    target: "repository".to_string(),
                    fields: missing_repository,
                });
            }

            Ok((CredentialsOutput::Show { repository, missing }, 0))
        }
    }
}
