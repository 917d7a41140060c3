use std::{env, io, path::PathBuf};

use anyhow::{Context, Result};

/// Resolves the directory holding the database and logs, creating it when missing.
pub fn create_application_default_path() -> Result<PathBuf> {
    let path = state_home()?.join("playtally");

    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}

#[cfg(windows)]
fn state_home() -> Result<PathBuf> {
    env::var("APPDATA")
        .map(PathBuf::from)
        .context("APPDATA should be present on Windows")
}

/// Follows XDG, with the usual fallback to ~/.local/state.
#[cfg(not(windows))]
fn state_home() -> Result<PathBuf> {
    if let Ok(state) = env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(state));
    }
    let home = env::var("HOME").context("Couldn't find neither XDG_STATE_HOME nor HOME")?;
    Ok(PathBuf::from(home).join(".local/state"))
}
