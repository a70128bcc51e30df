//! Seam to the backup engine: file copy, compression, checksums, manifests and
//! pruning all live behind [`Engine`]. The dispatcher only resolves parameters
//! and sequences calls.

pub mod command;

pub use command::CommandEngine;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cli::BackupType;

/// External command templates, already macro-expanded by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandSet {
    pub checksum: Option<String>,
    pub compress: Option<String>,
    pub decompress: Option<String>,
    pub manifest: Option<String>,
    pub psql: Option<String>,
    pub archive_push: Option<String>,
    pub archive_pull: Option<String>,
    pub backup: Option<String>,
    pub expire: Option<String>,
}

impl CommandSet {
    pub fn hook(&self, operation: &str) -> Option<&str> {
        match operation {
            "archive-push" => self.archive_push.as_deref(),
            "archive-pull" => self.archive_pull.as_deref(),
            "backup" => self.backup.as_deref(),
            "expire" => self.expire.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSettings {
    pub backup_type: BackupType,
    pub hardlink: bool,
    pub archive_required: bool,
    pub thread_max: i64,
    pub thread_timeout: Option<i64>,
    pub no_start_stop: bool,
    pub force: bool,
    pub lock_path: PathBuf,
}

/// Everything the engine is initialized with before any operation runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    pub stanza: String,
    pub backup_user: Option<String>,
    pub backup_host: Option<String>,
    pub backup_path: String,
    pub db_user: Option<String>,
    pub db_host: Option<String>,
    pub compress: bool,
    pub checksum: bool,
    pub commands: CommandSet,
    pub backup: Option<BackupSettings>,
}

/// Parameters handed verbatim to the pruning algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    pub cluster_path: PathBuf,
    pub full_retention: Option<i64>,
    pub differential_retention: Option<i64>,
    pub archive_retention_type: Option<String>,
    pub archive_retention: Option<i64>,
}

#[allow(async_fn_in_trait)]
pub trait Engine {
    async fn init(&mut self, config: EngineConfig) -> anyhow::Result<()>;

    async fn push(&mut self, db_path: Option<&str>, segment: &Path) -> anyhow::Result<()>;

    /// Transfers one batch of queued segments. Returns true while more remain.
    async fn pull_batch(&mut self, archive_dir: &Path, compress_async: bool) -> anyhow::Result<bool>;

    async fn run_backup(&mut self, stanza_path: &str, start_fast: bool) -> anyhow::Result<()>;

    async fn expire(&mut self, policy: &RetentionPolicy) -> anyhow::Result<()>;
}
