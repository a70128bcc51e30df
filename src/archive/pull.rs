// backrest/src/archive/pull.rs
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::engine::Engine;
use crate::errors::{AppError, Result};

/// Pause between batches while the engine reports more queued segments.
pub const PULL_INTERVAL: Duration = Duration::from_secs(5);

/// Pulls batches until the engine reports nothing left. Returns the number of batches run.
/// The caller holds the archive lock for the whole loop.
pub async fn run_pull_loop<E: Engine>(
    engine: &mut E,
    archive_dir: &Path,
    compress_async: bool,
    interval: Duration,
) -> Result<u64> {
    let mut batches = 0;
    loop {
        let more = engine
            .pull_batch(archive_dir, compress_async)
            .await
            .map_err(AppError::engine("archive-pull"))?;
        batches += 1;
        if !more {
            return Ok(batches);
        }
        debug!(batches, "archive logs were transferred, polling again");
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, RetentionPolicy};

    struct FlakyEngine {
        batches: u32,
    }

    impl Engine for FlakyEngine {
        async fn init(&mut self, _config: EngineConfig) -> anyhow::Result<()> {
            Ok(())
        }

        async fn push(&mut self, _db_path: Option<&str>, _segment: &Path) -> anyhow::Result<()> {
            Ok(())
        }

        async fn pull_batch(&mut self, _archive_dir: &Path, _compress_async: bool) -> anyhow::Result<bool> {
            self.batches += 1;
            if self.batches == 2 {
                anyhow::bail!("remote host unreachable");
            }
            Ok(true)
        }

        async fn run_backup(&mut self, _stanza_path: &str, _start_fast: bool) -> anyhow::Result<()> {
            Ok(())
        }

        async fn expire(&mut self, _policy: &RetentionPolicy) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_engine_failure_stops_loop() {
        let mut engine = FlakyEngine { batches: 0 };
        let result = run_pull_loop(&mut engine, Path::new("/archive"), true, Duration::ZERO).await;
        match result {
            Err(AppError::Engine { operation, source }) => {
                assert_eq!(operation, "archive-pull");
                assert!(source.to_string().contains("unreachable"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(engine.batches, 2);
    }
}
