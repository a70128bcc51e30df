use std::path::PathBuf;

use thiserror::Error;

use crate::config::Section;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Unable to load configuration from {}: {reason}", path.display())]
    ConfigLoad { path: PathBuf, reason: String },

    #[error("Config value {section}->{key} is undefined")]
    ConfigMissing { section: Section, key: String },

    #[error("Config value {section}->{key} has invalid value '{value}'")]
    ConfigValue {
        section: Section,
        key: String,
        value: String,
    },

    #[error("Assertion failed: {0}")]
    Invariant(String),

    #[error("Unable to lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("{operation} failed: {source:#}")]
    Engine {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Wraps a collaborator failure with the operation that surfaced it.
    pub fn engine(operation: &'static str) -> impl FnOnce(anyhow::Error) -> AppError {
        move |source| AppError::Engine { operation, source }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
