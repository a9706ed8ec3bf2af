//! Server requirement checks per runtime.
//!
//! Each check compares what the application declares (engine constraints,
//! required PHP extensions, database driver) with what the target provides.

use semver::{Version, VersionReq};
use serde_json::Value;

use super::managers::{PackageManager, BUNDLER, COMPOSER, NPM};
use super::{Family, Role, Strategy, StrategyContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Node,
    Php,
    Ruby,
}

impl Runtime {
    /// Command printing the runtime version on the target.
    fn version_command(&self) -> &'static str {
        match self {
            Runtime::Node => "node --version",
            Runtime::Php => "php -r 'echo PHP_VERSION;'",
            Runtime::Ruby => "ruby -e 'print RUBY_VERSION'",
        }
    }
}

pub struct CheckStrategy {
    name: String,
    runtime: Runtime,
    manager: PackageManager,
    context: StrategyContext,
}

impl CheckStrategy {
    pub fn new(
        name: impl Into<String>,
        runtime: Runtime,
        manager: PackageManager,
        context: StrategyContext,
    ) -> Self {
        Self {
            name: name.into(),
            runtime,
            manager,
            context,
        }
    }

    pub fn node(context: &StrategyContext) -> Box<dyn Strategy> {
        Box::new(Self::new("Node", Runtime::Node, NPM, context.clone()))
    }

    pub fn php(context: &StrategyContext) -> Box<dyn Strategy> {
        Box::new(Self::new("Php", Runtime::Php, COMPOSER, context.clone()))
    }

    pub fn ruby(context: &StrategyContext) -> Box<dyn Strategy> {
        Box::new(Self::new("Ruby", Runtime::Ruby, BUNDLER, context.clone()))
    }

    /// Version constraint the application declares, if any.
    pub fn required_version(&self) -> Option<String> {
        let app_root = &self.context.app_root;
        let constraint = match self.runtime {
            Runtime::Node => self
                .manager
                .manifest_json(app_root)?
                .pointer("/engines/node")?
                .as_str()?
                .to_string(),
            Runtime::Php => self
                .manager
                .manifest_json(app_root)?
                .pointer("/require/php")?
                .as_str()?
                .to_string(),
            Runtime::Ruby => std::fs::read_to_string(app_root.join(".ruby-version"))
                .ok()?
                .trim()
                .trim_start_matches("ruby-")
                .to_string(),
        };

        Some(constraint).filter(|c| !c.trim().is_empty())
    }

    /// Runtime version installed on the target.
    pub fn current_version(&self) -> Option<Version> {
        let output = self.context.shell.run(self.runtime.version_command());
        if !output.success {
            return None;
        }
        parse_version(&output.stdout)
    }

    /// PHP modules loaded on the target, lowercased.
    fn loaded_php_modules(&self) -> Vec<String> {
        let output = self.context.shell.run("php -m");
        if !output.success {
            return Vec::new();
        }

        output
            .stdout
            .lines()
            .map(|line| line.trim().to_lowercase())
            .filter(|line| !line.is_empty() && !line.starts_with('['))
            .collect()
    }

    /// `ext-*` requirements declared in `composer.json`.
    fn required_php_extensions(&self) -> Vec<String> {
        let Some(Value::Object(require)) = self
            .manager
            .manifest_json(&self.context.app_root)
            .and_then(|manifest| manifest.get("require").cloned())
        else {
            return Vec::new();
        };

        require
            .keys()
            .filter_map(|key| key.strip_prefix("ext-"))
            .map(|ext| ext.to_lowercase())
            .collect()
    }
}

impl Strategy for CheckStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> Family {
        Family::Check
    }

    fn is_executable(&self) -> bool {
        self.manager.has_manifest(&self.context.app_root)
    }

    fn role(&self) -> Role {
        Role::Check
    }

    fn parallelizable(&self) -> bool {
        true
    }

    fn manager(&self) -> bool {
        self.manager.is_available(&self.context.shell)
    }

    fn language(&self) -> bool {
        let Some(required) = self.required_version() else {
            return true;
        };
        let Some(current) = self.current_version() else {
            log_status!("check", "{} is not installed on the target", self.name);
            return false;
        };

        match satisfies(&required, &current) {
            Some(result) => result,
            None => {
                log_status!(
                    "check",
                    "Unrecognized {} version constraint '{}', skipping",
                    self.name,
                    required
                );
                true
            }
        }
    }

    fn extensions(&self) -> Vec<String> {
        if self.runtime != Runtime::Php {
            return Vec::new();
        }

        let required = self.required_php_extensions();
        if required.is_empty() {
            return Vec::new();
        }

        let loaded = self.loaded_php_modules();
        required
            .into_iter()
            .filter(|ext| !loaded.contains(ext))
            .collect()
    }

    fn drivers(&self) -> Vec<String> {
        if self.runtime != Runtime::Php {
            return Vec::new();
        }
        let Some(driver) = self.context.database_driver.as_deref() else {
            return Vec::new();
        };

        let extension = format!("pdo_{}", driver.to_lowercase());
        if self.loaded_php_modules().contains(&extension) {
            Vec::new()
        } else {
            vec![extension]
        }
    }
}

/// Parse the first version number in `raw`, padding missing components.
pub fn parse_version(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches('v');
    let numeric: String = raw
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let mut parts: Vec<u64> = numeric
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    parts.resize(3, 0);

    Some(Version::new(parts[0], parts[1], parts[2]))
}

/// Whether `version` meets `constraint`. Alternatives may be separated by
/// `||`; constraints within an alternative by spaces or commas. `None` when
/// the constraint can't be parsed.
pub fn satisfies(constraint: &str, version: &Version) -> Option<bool> {
    let mut any = false;

    for alternative in constraint.split("||").flat_map(|part| part.split('|')) {
        let alternative = alternative.trim();
        if alternative.is_empty() {
            continue;
        }

        let normalized = alternative
            .replace(", ", ",")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(", ");
        let requirement = VersionReq::parse(&normalized).ok()?;
        any |= requirement.matches(version);
    }

    Some(any)
}
