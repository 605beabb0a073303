//! Centralised logloom directory resolution.
//!
//! When `LOGLOOM_HOME` is set, it replaces the platform-native data
//! directory. An explicit `--output` directory always wins.
//!
//! Priority for the library root:
//!   1. `--output <dir>/libraries` (when the flag is given)
//!   2. `LOGLOOM_HOME/libraries`
//!   3. `dirs::data_local_dir().map(|d| d.join("logloom/libraries"))`

use std::path::{Path, PathBuf};

/// Return the `LOGLOOM_HOME` path when set and non-empty, otherwise the
/// platform-native fallback.
fn resolve_home(dirs_fallback: Option<PathBuf>) -> Option<PathBuf> {
    if let Ok(home) = std::env::var("LOGLOOM_HOME")
        && !home.is_empty()
    {
        return Some(PathBuf::from(home));
    }
    dirs_fallback
}

/// The logloom user-level base directory.
pub fn user_dir() -> Option<PathBuf> {
    resolve_home(dirs::data_local_dir().map(|d| d.join("logloom")))
}

/// Resolve the directory holding per-library database files.
///
/// # Errors
///
/// Fails when no `--output` was given and no user directory can be resolved.
pub fn library_root(output: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(out) = output {
        return Ok(out.join("libraries"));
    }
    user_dir()
        .map(|d| d.join("libraries"))
        .ok_or_else(|| anyhow::anyhow!("no library directory: pass --output or set LOGLOOM_HOME"))
}

/// Resolve the reports directory for a run.
pub fn reports_dir(output: &Path) -> PathBuf {
    output.join("reports")
}
