//! Target resolution.
//!
//! Resolves which connection(s), server index and stage an invocation works
//! on, and derives the canonical handle (`connection/server/stage`) used to
//! key per-target state. Resolutions are cached until a setter changes one
//! of the inputs.

use crate::config::{replace_recursive, Config};
use crate::error::{Error, Result};
use crate::hooks::{EventRegistrar, HookScope};
use crate::options::CommandOptions;
use crate::storage::LocalStorage;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Credential fields for one server of a connection.
pub type CredentialSet = Map<String, Value>;

/// Separator between handle components.
pub const HANDLE_SEPARATOR: &str = "/";

/// Sources consulted while resolving targets.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub config: Config,
    pub storage: LocalStorage,
    pub options: CommandOptions,
}

/// A connection normalized to its list of servers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionDeclaration {
    pub servers: Vec<CredentialSet>,
}

/// One server of a connection, with its index in the declaration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Server {
    pub index: usize,
    pub credentials: CredentialSet,
}

/// A fully resolved (connection, server, stage) target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetContext {
    pub connection: String,
    pub server: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub handle: String,
    #[serde(skip)]
    pub credentials: CredentialSet,
    pub multiserver: bool,
}

impl TargetContext {
    pub fn hook_scope(&self) -> HookScope {
        HookScope::new(Some(&self.connection), self.stage.as_deref())
    }

    /// Credential field as a non-empty string.
    pub fn credential(&self, field: &str) -> Option<&str> {
        credential_str(&self.credentials, field)
    }
}

pub fn credential_str<'a>(credentials: &'a CredentialSet, field: &str) -> Option<&'a str> {
    credentials
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[derive(Clone, Default)]
pub struct TargetResolver {
    settings: Settings,
    events: Option<Arc<dyn EventRegistrar>>,
    connections: Option<Vec<String>>,
    connection: Option<String>,
    server: usize,
    stage: Option<String>,
    handle: Option<String>,
}

impl TargetResolver {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// Register hooks whenever the active connection or stage changes.
    pub fn with_events(mut self, events: Arc<dyn EventRegistrar>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn config(&self) -> &Config {
        &self.settings.config
    }

    pub fn options(&self) -> &CommandOptions {
        &self.settings.options
    }

    // ------------------------------------------------------------------------
    // Handle
    // ------------------------------------------------------------------------

    /// Canonical handle for a target. Omitted components resolve to the
    /// active connection, server and stage; only that default handle is cached.
    pub fn get_handle(
        &mut self,
        connection: Option<&str>,
        server: Option<usize>,
        stage: Option<&str>,
    ) -> String {
        let uses_defaults = connection.is_none() && server.is_none() && stage.is_none();
        if uses_defaults {
            if let Some(handle) = &self.handle {
                return handle.clone();
            }
        }

        let connection = match connection {
            Some(name) => Some(name.to_string()),
            None => self.get_connection(),
        };
        let server = server.unwrap_or(self.server);
        let stage = stage.map(String::from).or_else(|| self.stage.clone());

        let multiserver = connection
            .as_deref()
            .is_some_and(|name| self.is_multiserver(name));

        let mut parts: Vec<String> = Vec::new();
        if let Some(connection) = connection.filter(|c| !c.is_empty()) {
            parts.push(connection);
        }
        if multiserver {
            parts.push(server.to_string());
        }
        if let Some(stage) = stage.filter(|s| !s.is_empty()) {
            parts.push(stage);
        }

        let handle = parts.join(HANDLE_SEPARATOR);
        if uses_defaults {
            self.handle = Some(handle.clone());
        }
        handle
    }

    /// Whether the connection declares more than one server. The `--server`
    /// filter does not affect the answer.
    pub fn is_multiserver(&self, connection: &str) -> bool {
        self.get_available_connections()
            .get(connection)
            .is_some_and(|declaration| declaration.servers.len() > 1)
    }

    // ------------------------------------------------------------------------
    // Server and stage
    // ------------------------------------------------------------------------

    pub fn get_server(&self) -> usize {
        self.server
    }

    pub fn get_stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    pub fn set_stage(&mut self, stage: Option<&str>) {
        let stage = stage.filter(|s| !s.is_empty()).map(String::from);
        if stage == self.stage {
            return;
        }

        self.stage = stage;
        self.handle = None;

        if self.stage.is_some() {
            self.register_events();
        }
    }

    /// Configured stage names.
    pub fn get_available_stages(&self) -> Vec<String> {
        self.settings.config.string_list("stages.stages")
    }

    /// Stages a task fans out to: the active stage, else `stages.default`.
    /// `all` expands to every configured stage. Without either, a single
    /// stage-less pass.
    pub fn get_stages(&self) -> Vec<Option<String>> {
        let requested = match &self.stage {
            Some(stage) => vec![stage.clone()],
            None => self.settings.config.string_list("stages.default"),
        };

        let stages = if requested.iter().any(|s| s == "all") {
            self.get_available_stages()
        } else {
            requested
        };

        if stages.is_empty() {
            vec![None]
        } else {
            stages.into_iter().map(Some).collect()
        }
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    /// All declared connections, merged from `remote.connections`, then
    /// `connections`, then stored credentials. Later sources win field by field.
    pub fn get_available_connections(&self) -> BTreeMap<String, ConnectionDeclaration> {
        let sources = [
            self.settings.config.get("remote.connections"),
            self.settings.config.get("connections"),
            self.settings.storage.get("connections"),
        ];

        let mut merged = Value::Object(Map::new());
        for source in sources.into_iter().flatten() {
            replace_recursive(&mut merged, normalize_connections(source));
        }

        let Value::Object(merged) = merged else {
            return BTreeMap::new();
        };

        merged
            .into_iter()
            .map(|(name, declaration)| {
                let servers = declaration
                    .get("servers")
                    .and_then(Value::as_array)
                    .map(|servers| {
                        servers
                            .iter()
                            .map(|server| server.as_object().cloned().unwrap_or_default())
                            .collect()
                    })
                    .unwrap_or_default();
                (name, ConnectionDeclaration { servers })
            })
            .collect()
    }

    pub fn is_valid_connection(&self, connection: &str) -> bool {
        self.get_available_connections()
            .get(connection)
            .is_some_and(|declaration| !declaration.servers.is_empty())
    }

    /// Active connections: the selection made with `set_connections`, else
    /// the configured `default` connections that exist, else `remote.default`.
    pub fn get_connections(&mut self) -> Vec<String> {
        if let Some(connections) = &self.connections {
            return connections.clone();
        }

        let mut connections: Vec<String> = self
            .settings
            .config
            .string_list("default")
            .into_iter()
            .filter(|name| self.is_valid_connection(name))
            .collect();

        if connections.is_empty() {
            if let Some(fallback) = self.settings.config.get_str("remote.default") {
                connections.push(fallback.to_string());
            }
        }

        self.connections = Some(connections.clone());
        connections
    }

    /// Select connections by name. Comma separated entries are split. Names
    /// that aren't declared are dropped; if none remain this fails and names
    /// every rejected input.
    pub fn set_connections<I, S>(&mut self, names: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requested: Vec<String> = names
            .into_iter()
            .flat_map(|name| {
                name.as_ref()
                    .split(',')
                    .map(|part| part.trim().to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|name| !name.is_empty())
            .collect();

        let (valid, rejected): (Vec<String>, Vec<String>) = requested
            .into_iter()
            .partition(|name| self.is_valid_connection(name));

        if valid.is_empty() {
            let available = self.get_available_connections().into_keys().collect();
            return Err(Error::connection_invalid(rejected, available));
        }

        if !rejected.is_empty() {
            log_status!("connections", "Ignoring unknown connection(s): {}", rejected.join(", "));
        }

        let mut selected: Vec<String> = Vec::new();
        for name in valid {
            if !selected.contains(&name) {
                selected.push(name);
            }
        }

        self.connections = Some(selected.clone());
        self.connection = None;
        self.handle = None;
        Ok(selected)
    }

    pub fn get_connection(&mut self) -> Option<String> {
        if let Some(connection) = &self.connection {
            return Some(connection.clone());
        }

        let connection = self.get_connections().into_iter().next()?;
        self.connection = Some(connection.clone());
        Some(connection)
    }

    /// Activate one connection and server. Ignored for unknown connections
    /// and when nothing changes.
    pub fn set_connection(&mut self, connection: &str, server: usize) {
        if !self.is_valid_connection(connection) {
            return;
        }
        if self.connection.as_deref() == Some(connection) && self.server == server {
            return;
        }

        self.connection = Some(connection.to_string());
        self.server = server;
        self.handle = None;
        self.register_events();
    }

    /// Servers of a connection, restricted by the `--server` filter.
    /// Original indices are preserved.
    pub fn get_connection_credentials(&mut self, connection: Option<&str>) -> Vec<Server> {
        let connection = match connection {
            Some(name) => Some(name.to_string()),
            None => self.get_connection(),
        };
        let Some(connection) = connection else {
            return Vec::new();
        };

        let servers = self
            .get_available_connections()
            .remove(&connection)
            .map(|declaration| declaration.servers)
            .unwrap_or_default();
        let filter = self.settings.options.server_filter();

        servers
            .into_iter()
            .enumerate()
            .filter(|(index, _)| filter.as_ref().map_or(true, |only| only.contains(index)))
            .map(|(index, credentials)| Server { index, credentials })
            .collect()
    }

    pub fn get_server_credentials(
        &mut self,
        connection: Option<&str>,
        server: Option<usize>,
    ) -> CredentialSet {
        let server = server.unwrap_or(self.server);
        self.get_connection_credentials(connection)
            .into_iter()
            .find(|candidate| candidate.index == server)
            .map(|candidate| candidate.credentials)
            .unwrap_or_default()
    }

    /// Forget the active connection and the connection selection. The handle
    /// cache is left alone.
    pub fn disconnect(&mut self) {
        self.connection = None;
        self.connections = None;
    }

    // ------------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------------

    /// Every (connection, server, stage) target of the active selection.
    pub fn resolve_targets(&mut self) -> Result<Vec<TargetContext>> {
        let connections = self.get_connections();
        let available = self.get_available_connections();

        let valid: Vec<&String> = connections
            .iter()
            .filter(|name| available.get(*name).is_some_and(|d| !d.servers.is_empty()))
            .collect();

        if valid.is_empty() {
            return Err(Error::connection_invalid(
                connections.clone(),
                available.keys().cloned().collect(),
            ));
        }

        let stages = self.get_stages();
        let mut targets = Vec::new();

        for connection in valid.iter().copied() {
            let multiserver = self.is_multiserver(connection);

            for server in self.get_connection_credentials(Some(connection)) {
                for stage in &stages {
                    let mut scoped = self.clone();
                    scoped.handle = None;
                    scoped.set_connection(connection, server.index);
                    scoped.set_stage(stage.as_deref());

                    targets.push(TargetContext {
                        connection: connection.clone(),
                        server: server.index,
                        stage: stage.clone(),
                        handle: scoped.get_handle(Some(connection), Some(server.index), stage.as_deref()),
                        credentials: server.credentials.clone(),
                        multiserver,
                    });
                }
            }
        }

        if targets.is_empty() {
            let filter = self.settings.options.server.clone().unwrap_or_default();
            return Err(Error::validation_invalid_argument(
                "server",
                format!("No server of {} matches '{}'", valid_names(&valid), filter),
                Some(filter),
                None,
            )
            .with_hint("Server indices start at 0; run `dockhand connections` to list them"));
        }

        Ok(targets)
    }

    fn register_events(&self) {
        if let Some(events) = &self.events {
            events.register_configured_events(&HookScope::new(
                self.connection.as_deref(),
                self.stage.as_deref(),
            ));
        }
    }
}

/// Normalize every declaration of a `connections` map to `{servers: [...]}`.
fn normalize_connections(source: &Value) -> Value {
    let Value::Object(connections) = source else {
        return Value::Object(Map::new());
    };

    let normalized: Map<String, Value> = connections
        .iter()
        .filter(|(_, declaration)| declaration.is_object())
        .map(|(name, declaration)| {
            let servers = match declaration.get("servers") {
                Some(Value::Array(servers)) => servers.clone(),
                Some(Value::Object(indexed)) => indexed_servers(indexed),
                _ => vec![declaration.clone()],
            };
            let mut shaped = Map::new();
            shaped.insert("servers".to_string(), Value::Array(servers));
            (name.clone(), Value::Object(shaped))
        })
        .collect();

    Value::Object(normalized)
}

/// Servers stored under numeric keys, placed at their index.
fn indexed_servers(indexed: &Map<String, Value>) -> Vec<Value> {
    let mut servers: Vec<Value> = Vec::new();
    for (key, server) in indexed {
        let Ok(index) = key.parse::<usize>() else {
            continue;
        };
        if servers.len() <= index {
            servers.resize(index + 1, Value::Object(Map::new()));
        }
        servers[index] = server.clone();
    }
    servers
}

fn valid_names(names: &[&String]) -> String {
    names.iter().map(|n| n.as_str()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn resolver(config: Value) -> TargetResolver {
        TargetResolver::new(Settings {
            config: Config::new(config),
            ..Default::default()
        })
    }

    fn fixture() -> TargetResolver {
        resolver(json!({
            "default": ["production"],
            "connections": {
                "production": {"host": "prod.example.com", "username": "deploy"},
                "staging": {"servers": [
                    {"host": "a.example.com", "username": "deploy"},
                    {"host": "b.example.com", "username": "deploy"}
                ]}
            },
            "stages": {"stages": ["blue", "green"]}
        }))
    }

    #[derive(Default)]
    struct RecordingRegistrar {
        scopes: Mutex<Vec<HookScope>>,
    }

    impl EventRegistrar for RecordingRegistrar {
        fn register_configured_events(&self, scope: &HookScope) {
            self.scopes.lock().unwrap().push(scope.clone());
        }
    }

    #[test]
    fn multiserver_iff_more_than_one_server() {
        let targets = fixture();
        assert!(!targets.is_multiserver("production"));
        assert!(targets.is_multiserver("staging"));
        assert!(!targets.is_multiserver("missing"));
    }

    #[test]
    fn multiserver_ignores_server_filter() {
        let mut targets = fixture();
        targets.settings_mut().options.server = Some("1".to_string());
        assert!(targets.is_multiserver("staging"));
        assert_eq!(targets.get_connection_credentials(Some("staging")).len(), 1);
    }

    #[test]
    fn handle_omits_server_for_single_server_connections() {
        let mut targets = fixture();
        assert_eq!(targets.get_handle(None, None, None), "production");
        assert_eq!(targets.get_handle(Some("staging"), Some(1), None), "staging/1");
        assert_eq!(
            targets.get_handle(Some("staging"), Some(0), Some("blue")),
            "staging/0/blue"
        );
        assert_eq!(
            targets.get_handle(Some("production"), Some(0), Some("blue")),
            "production/blue"
        );
    }

    #[test]
    fn handle_is_cached_until_a_setter_changes_inputs() {
        let mut targets = fixture();
        let first = targets.get_handle(None, None, None);
        assert_eq!(first, targets.get_handle(None, None, None));

        // Explicit components don't replace the cached default.
        targets.get_handle(Some("staging"), Some(1), None);
        assert_eq!(targets.get_handle(None, None, None), first);

        targets.set_stage(Some("blue"));
        assert_eq!(targets.get_handle(None, None, None), "production/blue");

        targets.set_connection("staging", 1);
        assert_eq!(targets.get_handle(None, None, None), "staging/1/blue");
    }

    #[test]
    fn set_connections_filters_invalid_names() {
        let mut targets = fixture();
        let selected = targets.set_connections(["staging", "bogus"]).unwrap();
        assert_eq!(selected, vec!["staging"]);
        assert_eq!(targets.get_connections(), vec!["staging"]);
        assert_eq!(targets.get_connection().as_deref(), Some("staging"));
    }

    #[test]
    fn set_connections_splits_comma_separated_text() {
        let mut targets = fixture();
        let selected = targets.set_connections(["staging, production"]).unwrap();
        assert_eq!(selected, vec!["staging", "production"]);
    }

    #[test]
    fn set_connections_fails_naming_rejected_inputs() {
        let mut targets = fixture();
        let err = targets.set_connections(["bogus"]).unwrap_err();
        assert_eq!(err.code.as_str(), "connection.invalid");
        assert!(err.message.contains("bogus"));
        assert_eq!(err.details["rejected"], json!(["bogus"]));
        assert_eq!(targets.get_connections(), vec!["production"]);
    }

    #[test]
    fn get_connections_falls_back_to_remote_default() {
        let mut targets = resolver(json!({
            "default": ["missing"],
            "remote": {
                "default": "production",
                "connections": {"production": {"host": "prod.example.com"}}
            }
        }));
        assert_eq!(targets.get_connections(), vec!["production"]);
    }

    #[test]
    fn available_connections_merge_sources_field_by_field() {
        let mut storage = LocalStorage::in_memory();
        storage
            .set("connections.production.servers.0.c", json!(3))
            .unwrap();

        let targets = TargetResolver::new(Settings {
            config: Config::new(json!({
                "remote": {"connections": {"production": {"a": 1, "b": 1}}},
                "connections": {"production": {"b": 2, "c": 2}}
            })),
            storage,
            options: CommandOptions::default(),
        });

        let available = targets.get_available_connections();
        let server = &available["production"].servers[0];
        assert_eq!(Value::Object(server.clone()), json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn connection_credentials_keep_original_indices_under_filter() {
        let mut targets = fixture();
        targets.settings_mut().options.server = Some("1".to_string());

        let servers = targets.get_connection_credentials(Some("staging"));
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].index, 1);
        assert_eq!(servers[0].credentials["host"], json!("b.example.com"));

        let server = targets.get_server_credentials(Some("staging"), Some(1));
        assert_eq!(server["host"], json!("b.example.com"));
        assert!(targets.get_server_credentials(Some("staging"), Some(0)).is_empty());
    }

    #[test]
    fn setters_request_hook_registration() {
        let registrar = Arc::new(RecordingRegistrar::default());
        let mut targets = fixture().with_events(registrar.clone());

        targets.set_connection("staging", 1);
        targets.set_connection("staging", 1);
        targets.set_connection("bogus", 0);
        targets.set_stage(Some("blue"));
        targets.set_stage(None);

        let scopes = registrar.scopes.lock().unwrap();
        assert_eq!(
            *scopes,
            vec![
                HookScope::new(Some("staging"), None),
                HookScope::new(Some("staging"), Some("blue")),
            ]
        );
    }

    #[test]
    fn disconnect_clears_selection_but_keeps_handle() {
        let mut targets = fixture();
        targets.set_connections(["staging"]).unwrap();
        let handle = targets.get_handle(None, None, None);

        targets.disconnect();
        assert_eq!(targets.get_connections(), vec!["production"]);
        assert_eq!(targets.get_handle(None, None, None), handle);
    }

    #[test]
    fn resolve_targets_fans_out_servers_and_stages() {
        let mut targets = fixture();
        targets.set_connections(["staging"]).unwrap();
        targets.settings_mut().config.set("stages.default", json!("all"));

        let resolved = targets.resolve_targets().unwrap();
        let handles: Vec<&str> = resolved.iter().map(|t| t.handle.as_str()).collect();
        assert_eq!(
            handles,
            vec!["staging/0/blue", "staging/0/green", "staging/1/blue", "staging/1/green"]
        );
        assert!(resolved.iter().all(|t| t.multiserver));
        assert_eq!(resolved[2].credential("host"), Some("b.example.com"));
    }

    #[test]
    fn resolve_targets_without_connections_fails() {
        let mut targets = resolver(json!({}));
        let err = targets.resolve_targets().unwrap_err();
        assert_eq!(err.code.as_str(), "connection.invalid");
    }

    #[test]
    fn resolve_targets_with_unmatched_server_filter_fails() {
        let mut targets = fixture();
        targets.set_connections(["staging"]).unwrap();
        targets.settings_mut().options.server = Some("5".to_string());

        let err = targets.resolve_targets().unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert_eq!(err.details["field"], "server");
        assert!(err.message.contains("'5'"));
    }
}
