// backrest/src/engine/command.rs
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Engine, EngineConfig, RetentionPolicy};
use crate::utils::find_shell_executable;

/// Engine that delegates each operation to an operator-supplied hook from the
/// `command` section (`archive-push`, `archive-pull`, `backup`, `expire`).
///
/// Hooks run through `sh -c`. Arguments arrive as `BACKREST_*` environment
/// variables and the whole engine configuration as JSON in
/// `BACKREST_ENGINE_CONFIG`. An `archive-pull` hook prints how many segments are
/// still queued.
#[derive(Debug)]
pub struct CommandEngine {
    shell: PathBuf,
    config: Option<EngineConfig>,
}

impl CommandEngine {
    pub fn new() -> Result<Self> {
        Ok(Self::with_shell(find_shell_executable()?))
    }

    pub fn with_shell(shell: PathBuf) -> Self {
        CommandEngine {
            shell,
            config: None,
        }
    }

    async fn run_hook(&self, operation: &'static str, vars: &[(&str, String)]) -> Result<String> {
        let config = self
            .config
            .as_ref()
            .context("engine used before it was initialized")?;
        let template = config.commands.hook(operation).with_context(|| {
            format!(
                "no '{}' command configured in the command section",
                operation
            )
        })?;
        let config_json =
            serde_json::to_string(config).context("Failed to serialize engine configuration")?;

        debug!(operation, template, "running engine hook");
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(template)
            .env("BACKREST_ENGINE_CONFIG", config_json)
            .env("BACKREST_STANZA", &config.stanza)
            .env("BACKREST_OPERATION", operation)
            .envs(vars.iter().map(|(key, value)| (*key, value.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .with_context(|| format!("Failed to execute {} hook: {}", operation, template))?;

        if !output.status.success() {
            bail!("{} hook exited with {}", operation, output.status);
        }
        String::from_utf8(output.stdout)
            .with_context(|| format!("{} hook wrote non UTF-8 output", operation))
    }
}

fn flag(value: bool) -> String {
    let flag = if value { "y" } else { "n" };
    flag.to_string()
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

impl Engine for CommandEngine {
    async fn init(&mut self, config: EngineConfig) -> Result<()> {
        if config.backup_path.trim().is_empty() {
            bail!("engine requires a backup path");
        }
        self.config = Some(config);
        Ok(())
    }

    async fn push(&mut self, db_path: Option<&str>, segment: &Path) -> Result<()> {
        self.run_hook(
            "archive-push",
            &[
                ("BACKREST_FILE", segment.display().to_string()),
                ("BACKREST_DB_PATH", db_path.unwrap_or_default().to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn pull_batch(&mut self, archive_dir: &Path, compress_async: bool) -> Result<bool> {
        let stdout = self
            .run_hook(
                "archive-pull",
                &[
                    ("BACKREST_ARCHIVE_DIR", archive_dir.display().to_string()),
                    ("BACKREST_COMPRESS_ASYNC", flag(compress_async)),
                ],
            )
            .await?;
        let remaining = match stdout.trim() {
            "" => 0,
            count => count
                .parse::<u64>()
                .with_context(|| format!("archive-pull hook printed '{}', expected a count", count))?,
        };
        debug!(remaining, "archive-pull batch finished");
        Ok(remaining > 0)
    }

    async fn run_backup(&mut self, stanza_path: &str, start_fast: bool) -> Result<()> {
        self.run_hook(
            "backup",
            &[
                ("BACKREST_DB_PATH", stanza_path.to_string()),
                ("BACKREST_START_FAST", flag(start_fast)),
            ],
        )
        .await?;
        info!(stanza_path, "backup hook completed");
        Ok(())
    }

    async fn expire(&mut self, policy: &RetentionPolicy) -> Result<()> {
        self.run_hook(
            "expire",
            &[
                ("BACKREST_CLUSTER_PATH", policy.cluster_path.display().to_string()),
                ("BACKREST_FULL_RETENTION", opt(&policy.full_retention)),
                (
                    "BACKREST_DIFFERENTIAL_RETENTION",
                    opt(&policy.differential_retention),
                ),
                (
                    "BACKREST_ARCHIVE_RETENTION_TYPE",
                    opt(&policy.archive_retention_type),
                ),
                ("BACKREST_ARCHIVE_RETENTION", opt(&policy.archive_retention)),
            ],
        )
        .await?;
        Ok(())
    }
}
