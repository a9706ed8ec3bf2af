use std::path::Path;

use serde_json::Value;

use crate::remote::ReleaseShell;

/// A runtime's package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageManager {
    pub binary: &'static str,
    /// File in the application root that declares dependencies.
    pub manifest: &'static str,
    /// Folder dependencies are installed into, relative to the release.
    pub dependencies_folder: Option<&'static str>,
    install_args: &'static str,
    update_args: &'static str,
}

pub const NPM: PackageManager = PackageManager {
    binary: "npm",
    manifest: "package.json",
    dependencies_folder: Some("node_modules"),
    install_args: "install",
    update_args: "update",
};

pub const COMPOSER: PackageManager = PackageManager {
    binary: "composer",
    manifest: "composer.json",
    dependencies_folder: Some("vendor"),
    install_args: "install --no-interaction --no-dev --prefer-dist",
    update_args: "update --no-interaction --no-dev --prefer-dist",
};

pub const BUNDLER: PackageManager = PackageManager {
    binary: "bundle",
    manifest: "Gemfile",
    dependencies_folder: Some("vendor/bundle"),
    install_args: "install --path vendor/bundle",
    update_args: "update",
};

impl PackageManager {
    pub fn has_manifest(&self, app_root: &Path) -> bool {
        app_root.join(self.manifest).is_file()
    }

    pub fn manifest_contents(&self, app_root: &Path) -> Option<String> {
        std::fs::read_to_string(app_root.join(self.manifest)).ok()
    }

    /// Manifest parsed as JSON, for managers whose manifest is JSON.
    pub fn manifest_json(&self, app_root: &Path) -> Option<Value> {
        serde_json::from_str(&self.manifest_contents(app_root)?).ok()
    }

    /// Whether the binary is installed on the target.
    pub fn is_available(&self, shell: &ReleaseShell) -> bool {
        shell.which(self.binary).is_some()
    }

    /// The application declares dependencies and the target can install them.
    pub fn is_executable(&self, shell: &ReleaseShell, app_root: &Path) -> bool {
        self.has_manifest(app_root) && self.is_available(shell)
    }

    pub fn install_command(&self) -> String {
        format!("{} {}", self.binary, self.install_args)
    }

    pub fn update_command(&self) -> String {
        format!("{} {}", self.binary, self.update_args)
    }

    /// Run a manager command inside the current release.
    pub fn run_for_current_release(&self, shell: &ReleaseShell, command: &str) -> bool {
        let output = shell.run_for_current_release(command);
        if !output.success {
            log_status!("dependencies", "'{}' failed: {}", command, output.error_text());
        }
        output.success
    }
}
