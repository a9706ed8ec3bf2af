//! Pluggable per-runtime strategies.
//!
//! A strategy belongs to a [`Family`] (checks or dependency management) and is
//! built by name through a [`StrategyFactory`]. The built-in runtimes are
//! Node (npm), PHP (composer) and Ruby (bundler). [`PolyglotStrategy`] fans an
//! operation out to several of them and aggregates the results.

pub mod check;
pub mod dependencies;
pub mod managers;
pub mod polyglot;

pub use check::{CheckStrategy, Runtime};
pub use dependencies::DependenciesStrategy;
pub use managers::PackageManager;
pub use polyglot::{PolyglotStrategy, StrategyOutcome};

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::Config;
use crate::remote::ReleaseShell;

/// Child strategies used when a family is configured as `Polyglot`.
pub const DEFAULT_POLYGLOT: [&str; 3] = ["Node", "Php", "Ruby"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Check,
    Dependencies,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Check => "check",
            Family::Dependencies => "dependencies",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase a strategy belongs to, for ordering by an outer scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Check,
    Install,
}

/// Pass/fail operations a strategy can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Manager,
    Language,
    Install,
    Update,
}

impl Operation {
    pub fn invoke(self, strategy: &dyn Strategy) -> bool {
        match self {
            Operation::Manager => strategy.manager(),
            Operation::Language => strategy.language(),
            Operation::Install => strategy.install(),
            Operation::Update => strategy.update(),
        }
    }
}

/// Operations that list what a target is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inventory {
    Extensions,
    Drivers,
}

impl Inventory {
    pub fn invoke(self, strategy: &dyn Strategy) -> Vec<String> {
        match self {
            Inventory::Extensions => strategy.extensions(),
            Inventory::Drivers => strategy.drivers(),
        }
    }
}

/// A runtime-specific unit of checks or dependency management.
///
/// Operations a variant doesn't support report success (or nothing missing).
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn family(&self) -> Family;

    /// Whether the strategy applies to this application and target.
    fn is_executable(&self) -> bool;

    fn role(&self) -> Role {
        Role::Check
    }

    /// Safe to run concurrently against independent targets.
    fn parallelizable(&self) -> bool {
        false
    }

    fn manager(&self) -> bool {
        true
    }

    fn language(&self) -> bool {
        true
    }

    fn extensions(&self) -> Vec<String> {
        Vec::new()
    }

    fn drivers(&self) -> Vec<String> {
        Vec::new()
    }

    fn install(&self) -> bool {
        true
    }

    fn update(&self) -> bool {
        true
    }
}

/// Builds strategies by family and name. `None` when the combination is
/// unknown or doesn't apply.
pub trait StrategyFactory: Send + Sync {
    fn build(&self, family: Family, name: &str) -> Option<Box<dyn Strategy>>;
}

/// What a strategy needs to know about the application and target.
#[derive(Clone)]
pub struct StrategyContext {
    pub shell: ReleaseShell,
    /// Local checkout holding the manifests (`package.json`, `composer.json`, ...).
    pub app_root: PathBuf,
    pub shared_dependencies: bool,
    pub database_driver: Option<String>,
}

impl StrategyContext {
    pub fn from_config(shell: ReleaseShell, app_root: PathBuf, config: &Config) -> Self {
        Self {
            shell,
            app_root,
            shared_dependencies: config.get_bool("strategies.options.shared_dependencies", false),
            database_driver: config.get_str("database.driver").map(String::from),
        }
    }
}

pub type StrategyConstructor = fn(&StrategyContext) -> Box<dyn Strategy>;

/// Constructors keyed by (family, name). Names match case-insensitively.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    constructors: HashMap<(Family, String), (String, StrategyConstructor)>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Node, PHP and Ruby strategies of both families.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Family::Check, "Node", CheckStrategy::node);
        registry.register(Family::Check, "Php", CheckStrategy::php);
        registry.register(Family::Check, "Ruby", CheckStrategy::ruby);
        registry.register(Family::Dependencies, "Node", DependenciesStrategy::node);
        registry.register(Family::Dependencies, "Php", DependenciesStrategy::php);
        registry.register(Family::Dependencies, "Ruby", DependenciesStrategy::ruby);
        registry
    }

    pub fn register(&mut self, family: Family, name: &str, constructor: StrategyConstructor) {
        self.constructors
            .insert((family, name.to_lowercase()), (name.to_string(), constructor));
    }

    /// Registered names for a family, sorted.
    pub fn names(&self, family: Family) -> Vec<String> {
        let mut names: Vec<String> = self
            .constructors
            .iter()
            .filter(|((f, _), _)| *f == family)
            .map(|(_, (name, _))| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Bind the registry to a target.
    pub fn scoped(&self, context: StrategyContext) -> ScopedRegistry<'_> {
        ScopedRegistry {
            registry: self,
            context,
        }
    }
}

/// A registry bound to one target's [`StrategyContext`].
pub struct ScopedRegistry<'a> {
    registry: &'a StrategyRegistry,
    context: StrategyContext,
}

impl StrategyFactory for ScopedRegistry<'_> {
    fn build(&self, family: Family, name: &str) -> Option<Box<dyn Strategy>> {
        let (_, constructor) = self
            .registry
            .constructors
            .get(&(family, name.to_lowercase()))?;

        let strategy = constructor(&self.context);
        if !strategy.is_executable() {
            log_status!("strategy", "Skipping {} {} (not applicable)", name, family);
            return None;
        }
        Some(strategy)
    }
}

/// Child strategy names configured for a family under `strategies.<family>`.
/// The value may name one strategy, list several, or be `Polyglot`.
pub fn configured_strategies(config: &Config, family: Family) -> Vec<String> {
    let configured = config.string_list(&format!("strategies.{}", family.as_str()));
    let polyglot = || config.string_list("strategies.polyglot");

    let names: Vec<String> = if configured.is_empty()
        || configured.iter().any(|name| name.eq_ignore_ascii_case("polyglot"))
    {
        let children = polyglot();
        if children.is_empty() {
            DEFAULT_POLYGLOT.iter().map(|s| s.to_string()).collect()
        } else {
            children
        }
    } else {
        configured
    };

    let mut unique: Vec<String> = Vec::new();
    for name in names {
        if !unique.iter().any(|seen| seen.eq_ignore_ascii_case(&name)) {
            unique.push(name);
        }
    }
    unique
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::RecordingShell;
    use crate::remote::ReleaseLayout;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn configured_strategies_defaults_to_polyglot_children() {
        let config = Config::default();
        assert_eq!(
            configured_strategies(&config, Family::Dependencies),
            vec!["Node", "Php", "Ruby"]
        );

        let config = Config::new(json!({"strategies": {
            "check": "Polyglot",
            "polyglot": ["Php", "php", "Node"],
            "dependencies": "Ruby"
        }}));
        assert_eq!(configured_strategies(&config, Family::Check), vec!["Php", "Node"]);
        assert_eq!(configured_strategies(&config, Family::Dependencies), vec!["Ruby"]);
    }

    #[test]
    fn registry_lists_names_per_family() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.names(Family::Check), vec!["Node", "Php", "Ruby"]);
    }

    #[test]
    fn scoped_registry_skips_strategies_without_manifest() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();

        let remote = Arc::new(RecordingShell::new().respond("command -v", "/usr/bin/tool\n"));
        let shell = ReleaseShell::new(remote, ReleaseLayout::new("/srv", "blog"));
        let context = StrategyContext::from_config(shell, dir.path().to_path_buf(), &Config::default());

        let registry = StrategyRegistry::with_defaults();
        let factory = registry.scoped(context);

        assert!(factory.build(Family::Dependencies, "node").is_some());
        assert!(factory.build(Family::Dependencies, "Php").is_none());
        assert!(factory.build(Family::Check, "Unknown").is_none());
    }
}
