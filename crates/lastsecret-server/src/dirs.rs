use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Resolve the platform data directory for LastSecret files
/// (`lastsecret.db`, `lastsecret.key`), e.g. `~/.local/share/lastsecret/`.
pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "lastsecret")
        .context("could not determine platform data directory")?;

    let path = dirs.data_dir().to_owned();
    std::fs::create_dir_all(&path).context("create platform data dir")?;
    Ok(path)
}
