//! Repository and connection credentials.
//!
//! Repository credentials come from the `scm` configuration, overridden by
//! values persisted in local storage. Connection credentials entered at
//! runtime are persisted per (connection, server) and mirrored into the live
//! configuration so the rest of the invocation sees them.

use crate::error::{Error, Result};
use crate::git::Scm;
use crate::targets::{credential_str, CredentialSet, TargetContext, TargetResolver};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::LazyLock;

/// Branch used when nothing else names one.
pub const DEFAULT_BRANCH: &str = "master";

/// Server fields every target needs before anything runs on it.
pub const REQUIRED_SERVER_FIELDS: [&str; 2] = ["host", "username"];

static ENDPOINT_CREDENTIALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://(.+)@").unwrap());

/// Effective repository settings, as reported by `credentials show`.
#[derive(Debug, Clone, Serialize)]
pub struct RepositorySummary {
    pub endpoint: String,
    pub branch: String,
    pub needs_credentials: bool,
}

pub struct CredentialStore<'a> {
    targets: &'a mut TargetResolver,
    scm: &'a dyn Scm,
}

impl<'a> CredentialStore<'a> {
    pub fn new(targets: &'a mut TargetResolver, scm: &'a dyn Scm) -> Self {
        Self { targets, scm }
    }

    /// `scm` configuration merged with stored `credentials`; stored values win.
    pub fn get_repository_credentials(&self) -> CredentialSet {
        let settings = self.targets.settings();
        let mut merged = settings
            .config
            .get("scm")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if let Some(Value::Object(stored)) = settings.storage.get("credentials") {
            for (key, value) in stored {
                merged.insert(key.clone(), value.clone());
            }
        }

        merged
    }

    /// Repository URL with the username and password injected, replacing any
    /// credentials already present in an https URL.
    pub fn get_repository_endpoint(&self) -> String {
        let credentials = self.get_repository_credentials();
        let repository = credential_str(&credentials, "repository")
            .unwrap_or_default()
            .to_string();
        let username = credential_str(&credentials, "username");
        let password = credential_str(&credentials, "password");

        if username.is_none() && password.is_none() {
            return repository;
        }

        let mut chain = match password {
            Some(password) => format!("{}:{}", username.unwrap_or_default(), password),
            None => username.unwrap_or_default().to_string(),
        };
        chain.push('@');

        let stripped = ENDPOINT_CREDENTIALS.replace(&repository, "https://");
        stripped.replace("https://", &format!("https://{}", chain))
    }

    /// Whether the repository is reached over https.
    pub fn needs_credentials(&self) -> bool {
        self.get_repository_endpoint().contains("https://")
    }

    /// Branch to deploy: `--branch`, then `scm.branch`, then the working
    /// copy's current branch, then `master`.
    pub fn get_repository_branch(&self) -> String {
        let settings = self.targets.settings();
        if let Some(branch) = settings.options.branch.as_deref().filter(|b| !b.is_empty()) {
            return branch.to_string();
        }

        if let Some(branch) = settings.config.get_str("scm.branch") {
            return branch.to_string();
        }

        let current = match self.scm.current_branch() {
            Ok(output) => output,
            Err(err) => {
                log_status!("scm", "Could not read the current branch: {}", err.message);
                String::new()
            }
        };

        current
            .lines()
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .unwrap_or(DEFAULT_BRANCH)
            .to_string()
    }

    /// Repository settings with any password masked.
    pub fn repository_summary(&self) -> RepositorySummary {
        let endpoint = self.get_repository_endpoint();
        let masked = match credential_str(&self.get_repository_credentials(), "password") {
            Some(password) => endpoint.replace(&format!(":{}@", password), ":***@"),
            None => endpoint,
        };

        RepositorySummary {
            endpoint: masked,
            branch: self.get_repository_branch(),
            needs_credentials: self.needs_credentials(),
        }
    }

    /// Persist repository credentials to local storage.
    pub fn store_repository_credentials(&mut self, credentials: CredentialSet) -> Result<()> {
        if credentials.is_empty() {
            return Ok(());
        }

        let mut stored = match self.targets.settings().storage.get("credentials") {
            Some(Value::Object(stored)) => stored.clone(),
            _ => CredentialSet::new(),
        };
        stored.extend(credentials);

        self.targets
            .settings_mut()
            .storage
            .set("credentials", Value::Object(stored))
    }

    /// Persist runtime credentials for a connection's server and mirror them
    /// into the live configuration.
    ///
    /// Fields whose resolved value is the `true` sentinel are defined elsewhere
    /// and are left out of storage, but still reach the configuration mirror.
    /// The connection's effective servers are always mirrored into
    /// `remote.connections.<connection>` afterwards.
    pub fn sync_connection_credentials(
        &mut self,
        connection: Option<&str>,
        credentials: CredentialSet,
        server: usize,
    ) -> Result<()> {
        let connection = match connection {
            Some(name) => name.to_string(),
            None => self.targets.get_connection().ok_or_else(|| {
                Error::validation_missing_argument(vec!["connection".to_string()])
            })?,
        };

        if !credentials.is_empty() {
            let filtered = self.filter_unsavable_credentials(&connection, server, &credentials);
            self.targets.settings_mut().storage.set(
                &format!("connections.{}.servers.{}", connection, server),
                Value::Object(filtered),
            )?;

            let handle = self.targets.get_handle(Some(&connection), Some(server), None);
            self.targets
                .settings_mut()
                .config
                .set(&format!("connections.{}", handle), Value::Object(credentials));
        }

        let servers: Vec<Value> = self
            .targets
            .get_available_connections()
            .remove(&connection)
            .map(|declaration| {
                declaration
                    .servers
                    .into_iter()
                    .map(Value::Object)
                    .collect()
            })
            .unwrap_or_default();

        self.targets.settings_mut().config.set(
            &format!("remote.connections.{}", connection),
            json!({ "servers": servers }),
        );

        Ok(())
    }

    fn filter_unsavable_credentials(
        &mut self,
        connection: &str,
        server: usize,
        credentials: &CredentialSet,
    ) -> CredentialSet {
        let defined = self
            .targets
            .get_server_credentials(Some(connection), Some(server));

        credentials
            .iter()
            .filter(|(key, _)| defined.get(key.as_str()) != Some(&Value::Bool(true)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Repository fields still needed before an https repository can be used.
    pub fn missing_repository_credentials(&self) -> Vec<String> {
        if !self.needs_credentials() {
            return Vec::new();
        }

        let credentials = self.get_repository_credentials();
        if credential_str(&credentials, "username").is_some() {
            Vec::new()
        } else {
            vec!["username".to_string()]
        }
    }
}

/// Server fields a target is missing.
pub fn missing_server_credentials(target: &TargetContext) -> Vec<String> {
    REQUIRED_SERVER_FIELDS
        .iter()
        .filter(|field| target.credential(field).is_none())
        .map(|field| field.to_string())
        .collect()
}
