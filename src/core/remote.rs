//! Remote command execution scoped to an application's release layout.
//!
//! A [`RemoteShell`] runs one command on one target. [`ReleaseShell`] wraps it
//! with knowledge of the remote layout (`releases/<id>`, `current`, `shared/`)
//! so tasks and strategies can work relative to the current release.

use crate::error::{Error, RemoteCommandFailedDetails, Result};
use crate::paths;
use crate::targets::TargetContext;
use crate::utils::shell;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            exit_code: 0,
        }
    }

    pub fn failed(stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            exit_code,
        }
    }

    /// Stderr when present, otherwise stdout.
    pub fn error_text(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// Runs commands on a single target.
pub trait RemoteShell: Send + Sync {
    fn run(&self, command: &str) -> CommandOutput;
}

/// Opens a shell for a resolved target.
pub trait Transport: Send + Sync {
    fn connect(&self, target: &TargetContext) -> Result<Arc<dyn RemoteShell>>;
}

/// Logs commands instead of running them.
#[derive(Debug, Clone)]
pub struct PretendShell {
    handle: String,
}

impl PretendShell {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
        }
    }
}

impl RemoteShell for PretendShell {
    fn run(&self, command: &str) -> CommandOutput {
        log_status!("pretend", "[{}] $ {}", self.handle, command);
        CommandOutput::ok("")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PretendTransport;

impl Transport for PretendTransport {
    fn connect(&self, target: &TargetContext) -> Result<Arc<dyn RemoteShell>> {
        Ok(Arc::new(PretendShell::new(target.handle.clone())))
    }
}

/// Where an application lives on its targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLayout {
    pub root: String,
    pub application: String,
    pub stage: Option<String>,
}

impl ReleaseLayout {
    pub fn new(root: impl Into<String>, application: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            application: application.into(),
            stage: None,
        }
    }

    /// Stages get their own folder under the application.
    pub fn with_stage(mut self, stage: Option<&str>) -> Self {
        self.stage = stage.map(str::to_string);
        self
    }

    pub fn app_dir(&self) -> String {
        paths::remote_app(&self.root, &self.application, self.stage.as_deref())
    }
}

/// A target's shell, aware of the release being worked on.
#[derive(Clone)]
pub struct ReleaseShell {
    shell: Arc<dyn RemoteShell>,
    layout: ReleaseLayout,
    release: Option<u64>,
    handle: String,
}

impl ReleaseShell {
    pub fn new(shell: Arc<dyn RemoteShell>, layout: ReleaseLayout) -> Self {
        Self {
            shell,
            layout,
            release: None,
            handle: String::new(),
        }
    }

    /// Work against a specific release instead of the `current` symlink.
    pub fn with_release(mut self, release: Option<u64>) -> Self {
        self.release = release;
        self
    }

    /// Label used in error details.
    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = handle.into();
        self
    }

    pub fn layout(&self) -> &ReleaseLayout {
        &self.layout
    }

    pub fn release(&self) -> Option<u64> {
        self.release
    }

    pub fn run(&self, command: &str) -> CommandOutput {
        self.shell.run(command)
    }

    /// Like [`run`](Self::run), but a failed command becomes an error.
    pub fn run_checked(&self, command: &str) -> Result<CommandOutput> {
        let output = self.run(command);
        if output.success {
            return Ok(output);
        }

        Err(Error::remote_command_failed(RemoteCommandFailedDetails {
            command: command.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            handle: self.handle.clone(),
        })
        .with_retryable(output.exit_code == 255))
    }

    /// Directory of the release being worked on, or the `current` symlink.
    pub fn release_path(&self) -> String {
        match self.release {
            Some(release) => paths::remote_release(&self.layout.app_dir(), release),
            None => paths::remote_current(&self.layout.app_dir()),
        }
    }

    pub fn run_for_current_release(&self, command: &str) -> CommandOutput {
        self.run(&format!(
            "cd {} && {}",
            shell::quote_path(&self.release_path()),
            command
        ))
    }

    /// Move `path` into `shared/` (keeping an existing shared copy) and
    /// symlink it back into the release.
    pub fn share(&self, path: &str) -> Result<()> {
        let path = path.trim_matches('/');
        let shared = format!(
            "{}/{}",
            paths::remote_shared(&self.layout.app_dir()),
            path
        );
        let release_file = format!("{}/{}", self.release_path(), path);

        let shared_q = shell::quote_path(&shared);
        let release_q = shell::quote_path(&release_file);
        let command = format!(
            "mkdir -p \"$(dirname {shared})\" && \
             if [ ! -e {shared} ] && [ -e {release} ]; then mv {release} {shared}; fi && \
             mkdir -p {shared} && rm -rf {release} && ln -s {shared} {release}",
            shared = shared_q,
            release = release_q
        );

        self.run_checked(&command)?;
        log_status!("share", "Shared {} -> {}", release_file, shared);
        Ok(())
    }

    /// Resolve a binary on the target.
    pub fn which(&self, binary: &str) -> Option<String> {
        let output = self.run(&format!("command -v {}", shell::quote_arg(binary)));
        let path = output.stdout.lines().next().unwrap_or("").trim();
        if output.success && !path.is_empty() {
            Some(path.to_string())
        } else {
            None
        }
    }

    /// Release ids present in `releases/`, oldest first.
    pub fn list_releases(&self) -> Vec<u64> {
        let releases = paths::remote_releases(&self.layout.app_dir());
        let output = self.run(&format!("ls -1 {}", shell::quote_path(&releases)));
        if !output.success {
            return Vec::new();
        }

        let mut ids: Vec<u64> = output
            .stdout
            .lines()
            .filter_map(|line| line.trim().trim_end_matches('/').parse().ok())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Release the `current` symlink points at.
    pub fn current_release(&self) -> Option<u64> {
        let current = paths::remote_current(&self.layout.app_dir());
        let output = self.run(&format!("readlink {}", shell::quote_path(&current)));
        if !output.success {
            return None;
        }

        output
            .stdout
            .trim()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .and_then(|id| id.parse().ok())
    }

    /// Point the `current` symlink at `release`.
    pub fn activate(&self, release: u64) -> Result<()> {
        let app = self.layout.app_dir();
        let target = paths::remote_release(&app, release);
        let current = paths::remote_current(&app);
        self.run_checked(&format!(
            "ln -sfn {} {}",
            shell::quote_path(&target),
            shell::quote_path(&current)
        ))?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingShell;
    use super::*;

    fn release_shell(remote: Arc<RecordingShell>, release: Option<u64>) -> ReleaseShell {
        ReleaseShell::new(remote, ReleaseLayout::new("/srv/www", "blog")).with_release(release)
    }

    #[test]
    fn run_for_current_release_changes_into_release() {
        let remote = Arc::new(RecordingShell::new());
        release_shell(remote.clone(), Some(20240102030405)).run_for_current_release("npm install");
        release_shell(remote.clone(), None).run_for_current_release("ls");

        let commands = remote.commands();
        assert_eq!(
            commands[0],
            "cd '/srv/www/blog/releases/20240102030405' && npm install"
        );
        assert_eq!(commands[1], "cd '/srv/www/blog/current' && ls");
    }

    #[test]
    fn share_links_shared_folder_into_release() {
        let remote = Arc::new(RecordingShell::new());
        release_shell(remote.clone(), Some(1)).share("node_modules").unwrap();

        let commands = remote.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains(
            "ln -s '/srv/www/blog/shared/node_modules' '/srv/www/blog/releases/1/node_modules'"
        ));
    }

    #[test]
    fn share_failure_is_an_error() {
        let remote = Arc::new(RecordingShell::failing_on("ln -s"));
        let err = release_shell(remote, Some(1))
            .with_handle("production")
            .share("vendor")
            .unwrap_err();
        assert_eq!(err.code.as_str(), "remote.command_failed");
        assert_eq!(err.details["handle"], "production");
    }

    #[test]
    fn staged_layout_keeps_releases_and_shared_per_stage() {
        let remote = Arc::new(RecordingShell::new());
        let layout = ReleaseLayout::new("/srv/www", "blog").with_stage(Some("staging"));
        let shell = ReleaseShell::new(remote.clone(), layout).with_release(Some(3));

        shell.list_releases();
        shell.share("vendor").unwrap();
        shell.activate(3).unwrap();

        let commands = remote.commands();
        assert_eq!(commands[0], "ls -1 '/srv/www/blog/staging/releases'");
        assert!(commands[1].contains(
            "ln -s '/srv/www/blog/staging/shared/vendor' '/srv/www/blog/staging/releases/3/vendor'"
        ));
        assert_eq!(
            commands[2],
            "ln -sfn '/srv/www/blog/staging/releases/3' '/srv/www/blog/staging/current'"
        );
    }

    #[test]
    fn list_releases_parses_and_sorts_ids() {
        let remote = Arc::new(
            RecordingShell::new().respond("ls -1", "20240103000000\n20240101000000/\nnotes.txt\n"),
        );
        assert_eq!(
            release_shell(remote, None).list_releases(),
            vec![20240101000000, 20240103000000]
        );
    }

    #[test]
    fn current_release_reads_symlink_target() {
        let remote = Arc::new(
            RecordingShell::new().respond("readlink", "/srv/www/blog/releases/20240103000000\n"),
        );
        assert_eq!(release_shell(remote, None).current_release(), Some(20240103000000));

        let missing = Arc::new(RecordingShell::failing_on("readlink"));
        assert_eq!(release_shell(missing, None).current_release(), None);
    }

    #[test]
    fn which_returns_first_line_on_success() {
        let remote = Arc::new(
            RecordingShell::new()
                .respond("command -v npm", "/usr/bin/npm\n")
                .fail("command -v bundle"),
        );
        let shell = release_shell(remote, None);
        assert_eq!(shell.which("npm"), Some("/usr/bin/npm".to_string()));
        assert_eq!(shell.which("bundle"), None);
    }
}
