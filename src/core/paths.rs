use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file names, in lookup order.
pub const PROJECT_CONFIG_FILES: [&str; 2] = [".dockhand.json", ".dockhand.toml"];

/// Base dockhand config directory (universal ~/.config/dockhand/ on all platforms)
pub fn dockhand() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("dockhand"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("dockhand"))
    }
}

/// Local storage directory
pub fn storage_dir() -> Result<PathBuf> {
    Ok(dockhand()?.join("storage"))
}

/// Local storage file for an application
pub fn storage(application: &str) -> Result<PathBuf> {
    Ok(storage_dir()?.join(format!("{}.json", application)))
}

/// First project configuration file found in `dir`.
pub fn project_config(dir: &Path) -> Option<PathBuf> {
    PROJECT_CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

// ============================================================================
// Remote layout
// ============================================================================

/// `<root>/<application>`, or `<root>/<application>/<stage>` when staged.
pub fn remote_app(root: &str, application: &str, stage: Option<&str>) -> String {
    let app = join_remote(root, application);
    match stage.filter(|s| !s.is_empty()) {
        Some(stage) => join_remote(&app, stage),
        None => app,
    }
}

/// `<app>/releases`
pub fn remote_releases(app: &str) -> String {
    join_remote(app, "releases")
}

/// `<app>/releases/<release>`
pub fn remote_release(app: &str, release: u64) -> String {
    join_remote(&remote_releases(app), &release.to_string())
}

/// `<app>/current`
pub fn remote_current(app: &str) -> String {
    join_remote(app, "current")
}

/// `<app>/shared`
pub fn remote_shared(app: &str) -> String {
    join_remote(app, "shared")
}

fn join_remote(base: &str, segment: &str) -> String {
    let segment = segment.trim_matches('/');
    if base.is_empty() {
        return segment.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), segment)
}
