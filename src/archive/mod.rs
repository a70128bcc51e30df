//! archive-push and archive-pull, both of which run on the database host.
pub(crate) mod pull;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info};

use crate::config::Section;
use crate::dispatch::{Outcome, RunContext, State, Step};
use crate::engine::{CommandSet, Engine, EngineConfig};
use crate::errors::{AppError, Result};
use crate::utils::launcher::{Launcher, SuccessorRequest};
use crate::utils::lock::{LockOutcome, acquire_exclusive, archive_lock_path};

fn ensure_on_db_host(ctx: &RunContext<'_>) -> Result<()> {
    if ctx.resolver.is_defined(Section::Stanza, "host") {
        return Err(AppError::Invariant(format!(
            "stanza host cannot be set on {} - must be run on the db server",
            ctx.invocation.operation
        )));
    }
    Ok(())
}

/// `<archive-path>/lock/<stanza>-archive.stop`: while present, pushed segments are discarded.
pub fn stop_file_path(archive_root: &Path, stanza: &str) -> PathBuf {
    archive_root
        .join("lock")
        .join(format!("{}-archive.stop", stanza))
}

pub(crate) async fn push<E: Engine, L: Launcher>(
    ctx: &RunContext<'_>,
    engine: &mut E,
    launcher: &L,
) -> Result<Step> {
    let resolver = &ctx.resolver;
    let stanza = resolver.stanza();

    // A local archive section lets the db host queue segments without a backup host.
    let section = if resolver.is_defined(Section::Archive, "path") {
        Section::Archive
    } else {
        Section::Backup
    };
    let archive_local = section == Section::Archive;

    let segment = ctx
        .invocation
        .archive_file
        .as_deref()
        .ok_or_else(|| AppError::Usage("source archive file not provided".to_string()))?;

    ensure_on_db_host(ctx)?;

    let section_path = resolver.require_text(section, "path")?;
    if archive_local {
        let stop_file = stop_file_path(Path::new(&section_path), stanza.name());
        if stop_file.exists() {
            error!(
                stop_file = %stop_file.display(),
                "archive stop file exists, discarding {}",
                segment.display()
            );
            return Ok(Step::Done(Outcome::Discarded { stop_file }));
        }
    }

    // compress-async wins over compress: the pull pass compresses instead.
    let compress_async = resolver.flag(section, "compress-async", false)?;
    let compress = !compress_async && resolver.flag(section, "compress", true)?;
    let checksum = resolver.flag(section, "checksum", true)?;

    let config = EngineConfig {
        stanza: stanza.name().to_string(),
        backup_user: resolver.text(section, "user")?,
        backup_host: resolver.text(section, "host")?,
        backup_path: section_path.clone(),
        db_user: None,
        db_host: None,
        compress,
        checksum,
        commands: CommandSet {
            checksum: resolver.command("checksum", checksum)?,
            compress: resolver.command("compress", compress)?,
            decompress: resolver.command("decompress", compress)?,
            archive_push: resolver.command("archive-push", false)?,
            ..CommandSet::default()
        },
        backup: None,
    };
    engine
        .init(config)
        .await
        .map_err(AppError::engine("engine init"))?;

    info!(
        "pushing archive log {}{}",
        segment.display(),
        if archive_local { " asynchronously" } else { "" }
    );
    let db_path = resolver.text(Section::Stanza, "path")?;
    engine
        .push(db_path.as_deref(), segment)
        .await
        .map_err(AppError::engine("archive-push"))?;

    if !(archive_local && resolver.is_defined(Section::Backup, "host")) {
        return Ok(Step::Done(Outcome::Completed));
    }

    if ctx.invocation.no_fork {
        info!("no-fork set, pulling archive in the foreground");
        return Ok(Step::Next(State::ArchivePull));
    }

    // The successor logs under the backup path, like every other run for the stanza.
    let backup_path = resolver.require_text(Section::Backup, "path")?;
    let request = SuccessorRequest::new(&ctx.invocation.config_path, stanza, Path::new(&backup_path));
    launcher.spawn_archive_pull(&request)?;
    Ok(Step::Done(Outcome::HandedOff))
}

pub(crate) async fn pull<E: Engine>(
    ctx: &RunContext<'_>,
    engine: &mut E,
    interval: Duration,
) -> Result<Step> {
    let resolver = &ctx.resolver;
    let stanza = resolver.stanza();

    ensure_on_db_host(ctx)?;

    let archive_root = PathBuf::from(resolver.require_text(Section::Archive, "path")?);
    let lock_path = archive_lock_path(&archive_root, stanza);
    let _lock = match acquire_exclusive(&lock_path)? {
        LockOutcome::Held(lock) => lock,
        LockOutcome::AlreadyHeld => {
            info!(stanza = %stanza, "archive-pull process is already running - exiting");
            return Ok(Step::Done(Outcome::AlreadyRunning { lock_path }));
        }
    };

    let compress = resolver.flag(Section::Backup, "compress", true)?;
    let checksum = resolver.flag(Section::Backup, "checksum", true)?;
    let compress_async = resolver.flag(Section::Archive, "compress-async", false)?;

    let config = EngineConfig {
        stanza: stanza.name().to_string(),
        backup_user: resolver.text(Section::Backup, "user")?,
        backup_host: resolver.text(Section::Backup, "host")?,
        backup_path: resolver.require_text(Section::Backup, "path")?,
        db_user: None,
        db_host: None,
        compress,
        checksum,
        commands: CommandSet {
            checksum: resolver.command("checksum", checksum)?,
            compress: resolver.command("compress", compress)?,
            decompress: resolver.command("decompress", compress)?,
            archive_pull: resolver.command("archive-pull", false)?,
            ..CommandSet::default()
        },
        backup: None,
    };
    engine
        .init(config)
        .await
        .map_err(AppError::engine("engine init"))?;

    let archive_dir = archive_root.join("archive").join(stanza.name());
    let batches = pull::run_pull_loop(engine, &archive_dir, compress_async, interval).await?;
    info!(batches, "archive-pull finished, no more segments queued");

    Ok(Step::Done(Outcome::Completed))
}
