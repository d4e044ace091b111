//! Resolution of the application's home directory.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

/// Resolve the home directory to an absolute path.
///
/// - `None` → `<user home>/<default_subdir>`
/// - `~` and `~/rest` → expanded against the user home
/// - relative paths → joined with the current working directory
///
/// With `create`, the directory is created when missing.
pub fn resolve_home_dir(
    configured: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf> {
    let path = match configured.as_deref().map(str::trim) {
        None | Some("") => user_home()?.join(default_subdir),
        Some("~") => user_home()?,
        Some(p) => match p.strip_prefix("~/").or_else(|| p.strip_prefix("~\\")) {
            Some(rest) => user_home()?.join(rest),
            None => PathBuf::from(p),
        },
    };

    let path = if path.is_relative() {
        std::env::current_dir()
            .context("Cannot read the current directory")?
            .join(path)
    } else {
        path
    };

    if create {
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Cannot create home_dir {}", path.display()))?;
    }
    Ok(path)
}

fn user_home() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| anyhow!("Failed to find the user home directory"))
}
