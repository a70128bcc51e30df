//! backup and expire. Both must run on the backup host itself.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::cli::{BackupType, Operation};
use crate::config::{Resolver, Section};
use crate::dispatch::{Outcome, RunContext, State, Step};
use crate::engine::{BackupSettings, CommandSet, Engine, EngineConfig, RetentionPolicy};
use crate::errors::{AppError, Result};
use crate::utils::lock::{LockOutcome, ProcessLock, acquire_exclusive, operation_lock_path};

fn ensure_on_backup_host(resolver: &Resolver<'_>) -> Result<()> {
    if resolver.is_defined(Section::Backup, "host") {
        return Err(AppError::Invariant(
            "backup/expire operations must be performed locally on the backup server".to_string(),
        ));
    }
    Ok(())
}

/// Takes the per-operation lock under the backup path, or reports who holds it.
fn lock_operation(
    resolver: &Resolver<'_>,
    backup_path: &Path,
    operation: Operation,
) -> Result<std::result::Result<ProcessLock, Outcome>> {
    let lock_path = operation_lock_path(backup_path, operation, resolver.stanza());
    match acquire_exclusive(&lock_path)? {
        LockOutcome::Held(lock) => Ok(Ok(lock)),
        LockOutcome::AlreadyHeld => {
            warn!(
                stanza = %resolver.stanza(),
                "{} process is already running - exiting",
                operation
            );
            Ok(Err(Outcome::AlreadyRunning { lock_path }))
        }
    }
}

fn engine_config(
    resolver: &Resolver<'_>,
    backup_path: &str,
    settings: Option<BackupSettings>,
) -> Result<EngineConfig> {
    let compress = resolver.flag(Section::Backup, "compress", true)?;
    let checksum = resolver.flag(Section::Backup, "checksum", true)?;
    let start_stop = settings.as_ref().is_some_and(|s| !s.no_start_stop);

    Ok(EngineConfig {
        stanza: resolver.stanza().name().to_string(),
        backup_user: resolver.text(Section::Backup, "user")?,
        backup_host: None,
        backup_path: backup_path.to_string(),
        db_user: resolver.text(Section::Stanza, "user")?,
        db_host: resolver.text(Section::Stanza, "host")?,
        compress,
        checksum,
        commands: CommandSet {
            checksum: resolver.command("checksum", checksum)?,
            compress: resolver.command("compress", compress)?,
            decompress: resolver.command("decompress", compress)?,
            manifest: resolver.command("manifest", false)?,
            psql: resolver.command("psql", start_stop)?,
            archive_push: None,
            archive_pull: None,
            backup: resolver.command("backup", false)?,
            expire: resolver.command("expire", false)?,
        },
        backup: settings,
    })
}

pub(crate) async fn backup<E: Engine>(ctx: &RunContext<'_>, engine: &mut E) -> Result<Step> {
    let resolver = &ctx.resolver;
    ensure_on_backup_host(resolver)?;

    let backup_type = BackupType::normalize(ctx.invocation.backup_type.as_deref())?;
    let backup_path = resolver.require_text(Section::Backup, "path")?;
    let lock = match lock_operation(resolver, Path::new(&backup_path), Operation::Backup)? {
        Ok(lock) => lock,
        Err(outcome) => return Ok(Step::Done(outcome)),
    };

    let settings = BackupSettings {
        backup_type,
        hardlink: resolver.flag(Section::Backup, "hardlink", false)?,
        archive_required: resolver.flag(Section::Backup, "archive-required", true)?,
        thread_max: resolver.int_or(Section::Backup, "thread-max", 1)?,
        thread_timeout: resolver.int(Section::Backup, "thread-timeout")?,
        no_start_stop: ctx.invocation.no_start_stop,
        force: ctx.invocation.force,
        lock_path: lock.path().to_path_buf(),
    };
    let start_fast = resolver.flag(Section::Backup, "start_fast", false)?;
    let stanza_path = resolver.require_text(Section::Stanza, "path")?;

    let config = engine_config(resolver, &backup_path, Some(settings))?;
    engine
        .init(config)
        .await
        .map_err(AppError::engine("engine init"))?;

    info!(stanza = %resolver.stanza(), ?backup_type, "starting backup");
    engine
        .run_backup(&stanza_path, start_fast)
        .await
        .map_err(AppError::engine("backup"))?;

    // The backup lock stays held through expire.
    Ok(Step::Next(State::Expire(Some(lock))))
}

/// `held` is the backup lock when entered from a backup; the engine is then already initialized.
pub(crate) async fn expire<E: Engine>(
    ctx: &RunContext<'_>,
    engine: &mut E,
    held: Option<ProcessLock>,
) -> Result<Step> {
    let resolver = &ctx.resolver;
    if held.is_none() {
        ensure_on_backup_host(resolver)?;
    }
    let backup_path = resolver.require_text(Section::Backup, "path")?;

    let _lock = match held {
        Some(lock) => lock,
        None => {
            let lock = match lock_operation(resolver, Path::new(&backup_path), Operation::Expire)? {
                Ok(lock) => lock,
                Err(outcome) => return Ok(Step::Done(outcome)),
            };
            let config = engine_config(resolver, &backup_path, None)?;
            engine
                .init(config)
                .await
                .map_err(AppError::engine("engine init"))?;
            lock
        }
    };

    let policy = RetentionPolicy {
        cluster_path: cluster_path(&backup_path, resolver.stanza().name()),
        full_retention: resolver.int(Section::Retention, "full_retention")?,
        differential_retention: resolver.int(Section::Retention, "differential_retention")?,
        archive_retention_type: resolver.text(Section::Retention, "archive_retention_type")?,
        archive_retention: resolver.int(Section::Retention, "archive_retention")?,
    };

    info!(cluster = %policy.cluster_path.display(), "expiring backups");
    engine
        .expire(&policy)
        .await
        .map_err(AppError::engine("expire"))?;

    Ok(Step::Done(Outcome::Completed))
}

/// `<backup-path>/backup/<stanza>`
pub fn cluster_path(backup_path: &str, stanza: &str) -> PathBuf {
    Path::new(backup_path).join("backup").join(stanza)
}
