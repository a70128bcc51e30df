// backrest/src/dispatch/mod.rs
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::archive::{self, pull::PULL_INTERVAL};
use crate::backup;
use crate::cli::{Invocation, Operation};
use crate::config::{Resolver, Stanza, Store};
use crate::engine::Engine;
use crate::errors::{AppError, Result};
use crate::utils::launcher::Launcher;
use crate::utils::lock::ProcessLock;

/// How a run ended. Every variant exits with success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// archive-push found the stop file and dropped the segment.
    Discarded { stop_file: PathBuf },
    /// archive-push handed pulling off to a detached successor.
    HandedOff,
    /// Another process holds the lock for this stanza and operation.
    AlreadyRunning { lock_path: PathBuf },
}

pub(crate) enum State {
    ArchivePush,
    ArchivePull,
    Backup,
    Expire(Option<ProcessLock>),
}

impl From<Operation> for State {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::ArchivePush => State::ArchivePush,
            Operation::ArchivePull => State::ArchivePull,
            Operation::Backup => State::Backup,
            Operation::Expire => State::Expire(None),
        }
    }
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::ArchivePush => Operation::ArchivePush.as_str(),
            State::ArchivePull => Operation::ArchivePull.as_str(),
            State::Backup => Operation::Backup.as_str(),
            State::Expire(_) => Operation::Expire.as_str(),
        }
    }
}

pub(crate) enum Step {
    Next(State),
    Done(Outcome),
}

/// Per-run view shared by every state.
pub struct RunContext<'a> {
    pub invocation: &'a Invocation,
    pub resolver: Resolver<'a>,
}

/// Runs one invocation through validation, the requested operation and any
/// transition (archive-push to archive-pull, backup to expire).
pub struct Dispatcher<E, L> {
    engine: E,
    launcher: L,
    pull_interval: Duration,
}

impl<E: Engine, L: Launcher> Dispatcher<E, L> {
    pub fn new(engine: E, launcher: L) -> Self {
        Dispatcher {
            engine,
            launcher,
            pull_interval: PULL_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_pull_interval(mut self, interval: Duration) -> Self {
        self.pull_interval = interval;
        self
    }

    #[cfg(test)]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[cfg(test)]
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub async fn run(&mut self, invocation: &Invocation) -> Result<Outcome> {
        let store = Store::load(&invocation.config_path)?;
        let stanza_name = invocation
            .stanza
            .as_deref()
            .ok_or_else(|| AppError::Usage("a stanza must be specified with --stanza".to_string()))?;
        let stanza = Stanza::new(stanza_name)?;

        let ctx = RunContext {
            invocation,
            resolver: Resolver::new(&store, &stanza),
        };
        info!(operation = %invocation.operation, stanza = %stanza, "starting");

        let mut state = State::from(invocation.operation);
        loop {
            let step = match state {
                State::ArchivePush => {
                    archive::push(&ctx, &mut self.engine, &self.launcher).await?
                }
                State::ArchivePull => {
                    archive::pull(&ctx, &mut self.engine, self.pull_interval).await?
                }
                State::Backup => backup::backup(&ctx, &mut self.engine).await?,
                State::Expire(held) => backup::expire(&ctx, &mut self.engine, held).await?,
            };
            match step {
                Step::Next(next) => {
                    debug!(next = next.name(), "transition");
                    state = next;
                }
                Step::Done(outcome) => return Ok(outcome),
            }
        }
    }
}
