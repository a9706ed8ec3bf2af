use super::managers::{PackageManager, BUNDLER, COMPOSER, NPM};
use super::{Family, Role, Strategy, StrategyContext};

/// Installs and updates an application's dependencies with one package
/// manager, inside the current release.
pub struct DependenciesStrategy {
    name: String,
    manager: PackageManager,
    context: StrategyContext,
}

impl DependenciesStrategy {
    pub fn new(name: impl Into<String>, manager: PackageManager, context: StrategyContext) -> Self {
        Self {
            name: name.into(),
            manager,
            context,
        }
    }

    pub fn node(context: &StrategyContext) -> Box<dyn Strategy> {
        Box::new(Self::new("Node", NPM, context.clone()))
    }

    pub fn php(context: &StrategyContext) -> Box<dyn Strategy> {
        Box::new(Self::new("Php", COMPOSER, context.clone()))
    }

    pub fn ruby(context: &StrategyContext) -> Box<dyn Strategy> {
        Box::new(Self::new("Ruby", BUNDLER, context.clone()))
    }

    /// Keep the dependencies folder in `shared/` when sharing is enabled.
    /// A failed share is logged; the install runs in the release either way.
    fn share_dependencies_folder(&self) {
        if !self.context.shared_dependencies {
            return;
        }
        let Some(folder) = self.manager.dependencies_folder.filter(|f| !f.is_empty()) else {
            return;
        };

        if let Err(err) = self.context.shell.share(folder) {
            log_status!("dependencies", "Could not share {}: {}", folder, err.message);
        }
    }
}

impl Strategy for DependenciesStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> Family {
        Family::Dependencies
    }

    fn is_executable(&self) -> bool {
        self.manager
            .is_executable(&self.context.shell, &self.context.app_root)
    }

    fn role(&self) -> Role {
        Role::Install
    }

    fn parallelizable(&self) -> bool {
        true
    }

    fn install(&self) -> bool {
        self.share_dependencies_folder();
        self.manager
            .run_for_current_release(&self.context.shell, &self.manager.install_command())
    }

    fn update(&self) -> bool {
        self.manager
            .run_for_current_release(&self.context.shell, &self.manager.update_command())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::RecordingShell;
    use crate::remote::{ReleaseLayout, ReleaseShell};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn strategy(remote: Arc<RecordingShell>, shared: bool) -> DependenciesStrategy {
        let shell = ReleaseShell::new(remote, ReleaseLayout::new("/srv", "blog")).with_release(Some(7));
        DependenciesStrategy::new(
            "Node",
            NPM,
            StrategyContext {
                shell,
                app_root: PathBuf::from("."),
                shared_dependencies: shared,
                database_driver: None,
            },
        )
    }

    fn shares(commands: &[String]) -> usize {
        commands.iter().filter(|c| c.contains("ln -s")).count()
    }

    #[test]
    fn install_shares_folder_once_before_installing() {
        let remote = Arc::new(RecordingShell::new());
        assert!(strategy(remote.clone(), true).install());

        let commands = remote.commands();
        assert_eq!(shares(&commands), 1);
        assert_eq!(commands.len(), 2);
        assert!(commands[0].contains("/srv/blog/shared/node_modules"));
        assert_eq!(commands[1], "cd '/srv/blog/releases/7' && npm install");
    }

    #[test]
    fn install_without_shared_dependencies_never_shares() {
        let remote = Arc::new(RecordingShell::new());
        assert!(strategy(remote.clone(), false).install());

        let commands = remote.commands();
        assert_eq!(shares(&commands), 0);
        assert_eq!(commands, vec!["cd '/srv/blog/releases/7' && npm install"]);
    }

    #[test]
    fn update_never_shares() {
        let remote = Arc::new(RecordingShell::new());
        assert!(strategy(remote.clone(), true).update());

        let commands = remote.commands();
        assert_eq!(shares(&commands), 0);
        assert_eq!(commands, vec!["cd '/srv/blog/releases/7' && npm update"]);
    }

    #[test]
    fn install_fails_when_manager_fails() {
        let remote = Arc::new(RecordingShell::failing_on("npm install"));
        assert!(!strategy(remote, false).install());
    }

    #[test]
    fn install_still_runs_when_sharing_fails() {
        let remote = Arc::new(RecordingShell::failing_on("ln -s"));
        assert!(strategy(remote.clone(), true).install());

        let commands = remote.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1], "cd '/srv/blog/releases/7' && npm install");
    }

    #[test]
    fn declares_install_role_and_parallelizable() {
        let strategy = strategy(Arc::new(RecordingShell::new()), false);
        assert_eq!(strategy.role(), Role::Install);
        assert!(strategy.parallelizable());
        assert_eq!(strategy.family(), Family::Dependencies);
    }
}
