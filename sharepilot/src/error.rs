use crate::failover::FailoverRecord;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A remote command failed, or could not be run at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{command}` on {host} {kind}: {message}")]
pub struct RemoteError {
    pub host: String,
    pub command: String,
    pub kind: RemoteErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Command ran and exited non-zero.
    Exit(Option<i32>),
    /// Command did not finish within its timeout.
    TimedOut,
    /// Command could not be started (missing binary, unreachable host).
    Spawn,
    /// Command ran but its output could not be understood.
    Parse,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorKind::Exit(Some(code)) => write!(f, "exited with status {}", code),
            RemoteErrorKind::Exit(None) => write!(f, "was killed by a signal"),
            RemoteErrorKind::TimedOut => write!(f, "timed out"),
            RemoteErrorKind::Spawn => write!(f, "could not be started"),
            RemoteErrorKind::Parse => write!(f, "returned unparseable output"),
        }
    }
}

impl RemoteError {
    pub fn new(
        host: impl Into<String>,
        command: impl Into<String>,
        kind: RemoteErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            command: command.into(),
            kind,
            message: message.into(),
        }
    }

    /// Spawn failures mean the runner itself is broken; polling will not fix them.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, RemoteErrorKind::Spawn)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, RemoteErrorKind::TimedOut)
    }
}

/// Top-level error for allocation, lifecycle and failover operations.
#[derive(Error, Debug)]
pub enum PilotError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(
        "{what} did not converge after {attempts} attempts in {elapsed:?} (last error: {})",
        .last_error.as_deref().unwrap_or("none")
    )]
    ConvergenceTimeout {
        what: String,
        attempts: u32,
        elapsed: Duration,
        last_error: Option<String>,
    },

    #[error(transparent)]
    TeardownFailed(#[from] TeardownFailedError),

    #[error(
        "Float address {} was not picked up by any surviving node within {:?} ({attempts} polls)",
        .record.float_address,
        .record.elapsed
    )]
    FailoverTimeout {
        record: Box<FailoverRecord>,
        attempts: u32,
        last_error: Option<String>,
    },
}

impl PilotError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        PilotError::InvalidRequest(msg.into())
    }
}

/// Step of the per-pair teardown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStage {
    ClearMount,
    Unmount,
    RemoveMountDir,
    DeleteExport,
    DeleteCluster,
    AwaitServiceRemoval,
    /// The pair's teardown task panicked or was cancelled.
    Worker,
}

impl fmt::Display for TeardownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TeardownStage::ClearMount => "clear mount",
            TeardownStage::Unmount => "unmount",
            TeardownStage::RemoveMountDir => "remove mount dir",
            TeardownStage::DeleteExport => "delete export",
            TeardownStage::DeleteCluster => "delete cluster",
            TeardownStage::AwaitServiceRemoval => "await service removal",
            TeardownStage::Worker => "teardown worker",
        };
        f.write_str(s)
    }
}

/// One failed teardown step. `client` and `share` are empty for cluster-level steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    pub client: String,
    pub share: String,
    pub stage: TeardownStage,
    pub attempts: u32,
    pub message: String,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.share.is_empty() {
            write!(
                f,
                "{} failed after {} attempt(s): {}",
                self.stage, self.attempts, self.message
            )
        } else {
            write!(
                f,
                "{} of share '{}' on {} failed after {} attempt(s): {}",
                self.stage, self.share, self.client, self.attempts, self.message
            )
        }
    }
}

/// Every teardown failure of a run, in pair order. Never empty.
#[derive(Error, Debug, Clone)]
pub struct TeardownFailedError {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownFailedError {
    pub fn failed_shares(&self) -> impl Iterator<Item = &str> {
        self.failures
            .iter()
            .filter(|f| !f.share.is_empty())
            .map(|f| f.share.as_str())
    }
}

impl fmt::Display for TeardownFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Teardown failed ({} problem(s))", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}

pub type Result<T, E = PilotError> = std::result::Result<T, E>;
