// backrest/src/utils/launcher.rs
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::Local;
use nix::unistd::setsid;
use tracing::info;

use crate::config::Stanza;
use crate::errors::Result;

/// What a detached archive-pull successor needs. It re-reads the configuration
/// itself; nothing else crosses the process boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessorRequest {
    pub config_path: PathBuf,
    pub stanza: String,
    pub log_path: PathBuf,
}

impl SuccessorRequest {
    pub fn new(config_path: &Path, stanza: &Stanza, log_root: &Path) -> Self {
        let log_path = log_root.join("log").join(format!(
            "{}-archive-{}.log",
            stanza.name(),
            Local::now().format("%Y%m%d")
        ));
        SuccessorRequest {
            config_path: config_path.to_path_buf(),
            stanza: stanza.name().to_string(),
            log_path,
        }
    }
}

/// Starts an archive-pull process that outlives the caller.
pub trait Launcher {
    fn spawn_archive_pull(&self, request: &SuccessorRequest) -> Result<()>;
}

/// Re-executes the current binary as `archive-pull` in its own session.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn spawn_archive_pull(&self, request: &SuccessorRequest) -> Result<()> {
        let exe = std::env::current_exe()?;

        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.log_path)?;
        let stderr = stdout.try_clone()?;

        let mut command = Command::new(exe);
        command
            .arg("--config")
            .arg(&request.config_path)
            .arg("--stanza")
            .arg(&request.stanza)
            .arg("archive-pull")
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        // SAFETY: setsid is async-signal-safe and touches no state of the parent.
        unsafe {
            command.pre_exec(|| setsid().map(|_| ()).map_err(io::Error::from));
        }

        // The child is not waited on; the caller exits right after.
        let child = command.spawn()?;
        info!(
            pid = child.id(),
            log = %request.log_path.display(),
            "spawned detached archive-pull"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor_request_paths() {
        let stanza = Stanza::new("main").unwrap();
        let request = SuccessorRequest::new(
            Path::new("/etc/backrest.conf"),
            &stanza,
            Path::new("/var/archive"),
        );
        assert_eq!(request.config_path, PathBuf::from("/etc/backrest.conf"));
        assert_eq!(request.stanza, "main");
        assert!(request.log_path.starts_with("/var/archive/log"));
        let file_name = request.log_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.starts_with("main-archive-"), "{}", file_name);
        assert!(file_name.ends_with(".log"), "{}", file_name);
    }
}
