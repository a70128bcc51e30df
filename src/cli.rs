// backrest/src/cli.rs
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use serde::Serialize;
use tracing::warn;

use crate::config;
use crate::errors::{AppError, Result};

/// Command-line surface of the tool.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "backrest", version, about = "PostgreSQL backup and WAL archiving")]
pub struct Cli {
    /// Configuration file
    #[arg(long, value_name = "PATH", env = "BACKREST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Stanza (database cluster) to operate on
    #[arg(long, value_name = "NAME")]
    pub stanza: Option<String>,

    /// Backup type: full, diff/differential or incr/incremental
    #[arg(long = "type", value_name = "TYPE")]
    pub backup_type: Option<String>,

    /// Pull archived segments in the foreground after a push instead of spawning a puller
    #[arg(long)]
    pub no_fork: bool,

    /// Do not start/stop backup mode on the database
    #[arg(long)]
    pub no_start_stop: bool,

    /// Force the backup even when the checks would refuse it
    #[arg(long)]
    pub force: bool,

    /// archive-push, archive-pull, backup or expire
    #[arg(value_name = "OPERATION")]
    pub operation: Option<String>,

    /// WAL segment to push (archive-push only)
    #[arg(value_name = "ARCHIVE_FILE")]
    pub archive_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ArchivePush,
    ArchivePull,
    Backup,
    Expire,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ArchivePush => "archive-push",
            Operation::ArchivePull => "archive-pull",
            Operation::Backup => "backup",
            Operation::Expire => "expire",
        }
    }
}

impl FromStr for Operation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "archive-push" => Ok(Operation::ArchivePush),
            "archive-pull" => Ok(Operation::ArchivePull),
            "backup" => Ok(Operation::Backup),
            "expire" => Ok(Operation::Expire),
            other => Err(AppError::Usage(format!(
                "invalid operation '{}' (expected archive-push, archive-pull, backup or expire)",
                other
            ))),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Differential,
    Incremental,
}

impl BackupType {
    /// Unspecified means incremental; `diff` and `incr` are accepted aliases.
    pub fn normalize(raw: Option<&str>) -> Result<Self> {
        match raw {
            None => Ok(BackupType::Incremental),
            Some("full") => Ok(BackupType::Full),
            Some("diff") | Some("differential") => Ok(BackupType::Differential),
            Some("incr") | Some("incremental") => Ok(BackupType::Incremental),
            Some(other) => Err(AppError::Usage(format!(
                "backup type must be full, differential (diff) or incremental (incr), got '{}'",
                other
            ))),
        }
    }
}

/// A validated command line. Nothing here has touched the configuration file.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub operation: Operation,
    pub config_path: PathBuf,
    pub stanza: Option<String>,
    pub backup_type: Option<String>,
    pub archive_file: Option<PathBuf>,
    pub no_fork: bool,
    pub no_start_stop: bool,
    pub force: bool,
}

impl Cli {
    pub fn validate(self) -> Result<Invocation> {
        let operation: Operation = self
            .operation
            .as_deref()
            .ok_or_else(|| AppError::Usage("an operation must be specified".to_string()))?
            .parse()?;

        if self.backup_type.is_some() && operation != Operation::Backup {
            return Err(AppError::Usage(format!(
                "--type can only be specified for backup, not {}",
                operation
            )));
        }

        if operation == Operation::ArchivePush && self.archive_file.is_none() {
            return Err(AppError::Usage(
                "source archive file not provided for archive-push".to_string(),
            ));
        }
        if operation != Operation::ArchivePush && self.archive_file.is_some() {
            warn!(operation = %operation, "ignoring extra positional argument");
        }

        Ok(Invocation {
            operation,
            config_path: config::config_path(self.config),
            stanza: self.stanza,
            backup_type: self.backup_type,
            archive_file: if operation == Operation::ArchivePush {
                self.archive_file
            } else {
                None
            },
            no_fork: self.no_fork,
            no_start_stop: self.no_start_stop,
            force: self.force,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["backrest"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_full_command_line() {
        let cli = parse(&[
            "--config=/tmp/b.conf",
            "--stanza=main",
            "--type=full",
            "backup",
        ]);
        let invocation = cli.validate().unwrap();
        assert_eq!(invocation.operation, Operation::Backup);
        assert_eq!(invocation.config_path, PathBuf::from("/tmp/b.conf"));
        assert_eq!(invocation.stanza.as_deref(), Some("main"));
        assert_eq!(invocation.backup_type.as_deref(), Some("full"));
    }

    #[test]
    fn test_archive_push_takes_file() {
        let invocation = parse(&["--stanza=main", "archive-push", "pg_xlog/000000010000000000000001"])
            .validate()
            .unwrap();
        assert_eq!(invocation.operation, Operation::ArchivePush);
        assert_eq!(
            invocation.archive_file,
            Some(PathBuf::from("pg_xlog/000000010000000000000001"))
        );
    }

    #[test]
    fn test_missing_operation_is_usage_error() {
        assert!(matches!(parse(&["--stanza=main"]).validate(), Err(AppError::Usage(_))));
    }

    #[test]
    fn test_unknown_operation_is_usage_error() {
        assert!(matches!(parse(&["restore"]).validate(), Err(AppError::Usage(_))));
    }

    #[test]
    fn test_type_outside_backup_is_usage_error() {
        let err = parse(&["--type=full", "archive-push", "seg"]).validate().unwrap_err();
        assert!(matches!(err, AppError::Usage(_)));
        assert!(err.to_string().contains("archive-push"));
        assert!(matches!(parse(&["--type=full", "expire"]).validate(), Err(AppError::Usage(_))));
    }

    #[test]
    fn test_archive_push_without_file_is_usage_error() {
        assert!(matches!(parse(&["archive-push"]).validate(), Err(AppError::Usage(_))));
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli {
            operation: Some("expire".to_string()),
            ..Cli::default()
        };
        let invocation = cli.validate().unwrap();
        assert_eq!(invocation.config_path, PathBuf::from(config::DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_backup_type_normalization() {
        assert_eq!(BackupType::normalize(None).unwrap(), BackupType::Incremental);
        assert_eq!(BackupType::normalize(Some("full")).unwrap(), BackupType::Full);
        assert_eq!(BackupType::normalize(Some("diff")).unwrap(), BackupType::Differential);
        assert_eq!(BackupType::normalize(Some("incr")).unwrap(), BackupType::Incremental);
        assert_eq!(
            BackupType::normalize(Some("differential")).unwrap(),
            BackupType::Differential
        );
        assert!(matches!(BackupType::normalize(Some("weekly")), Err(AppError::Usage(_))));
    }
}
