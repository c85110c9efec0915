//! Where autocast keeps its files.
//!
//! Everything lives under XDG base directories scoped to `autocast`:
//! settings in the config home, the log in the state home.

use std::path::PathBuf;

use anyhow::{Context, Result};
use xdg::BaseDirectories;

const APP_NAME: &str = "autocast";

/// File name of the CLI log inside [`state_dir`].
pub const LOG_FILE_NAME: &str = "autocast.log";

fn base_dirs() -> BaseDirectories {
    BaseDirectories::with_prefix(APP_NAME)
}

/// `~/.config/autocast/` (or `$XDG_CONFIG_HOME/autocast/`).
///
/// Not created here; the config file is optional and saving creates it.
pub fn config_dir() -> Result<PathBuf> {
    base_dirs()
        .get_config_home()
        .context("Could not determine config directory (HOME not set?)")
}

/// `~/.local/state/autocast/`, created on first use.
pub fn state_dir() -> Result<PathBuf> {
    let dir = base_dirs()
        .get_state_home()
        .context("Could not determine state directory (HOME not set?)")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
    Ok(dir)
}

pub fn log_path() -> Result<PathBuf> {
    Ok(state_dir()?.join(LOG_FILE_NAME))
}
