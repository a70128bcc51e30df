pub mod launcher;
pub mod lock;

use anyhow::{Context, Result};
use std::path::PathBuf;
use which::which;

/// Finds the shell used to run command templates.
pub fn find_shell_executable() -> Result<PathBuf> {
    which("sh").context("sh executable not found in PATH. Command templates cannot be run without a POSIX shell.")
}
