//! Running commands on cluster and client hosts.

pub mod ceph;
pub mod ssh;

pub use ceph::{CephNfs, Coredump, IngressSpec, ServiceStatus};
pub use ssh::{SshRunner, SshSettings};

use crate::error::RemoteError;
use crate::share::ClientRef;
use async_trait::async_trait;
use std::time::Duration;

/// Single-quotes `s` for a POSIX shell.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// A shell command line plus how to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub line: String,
    /// Run through `sudo`.
    pub elevated: bool,
    /// Use the runner's long-running timeout instead of the default one.
    pub long_running: bool,
    /// Overrides both runner timeouts.
    pub timeout: Option<Duration>,
    /// Non-zero exit is an error. When off, the exit code is returned in
    /// [`CommandOutput`] for the caller to inspect.
    pub check_exit: bool,
}

impl RemoteCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            elevated: false,
            long_running: false,
            timeout: None,
            check_exit: true,
        }
    }

    /// `sudo` + checked exit, which is how almost every cluster command runs.
    pub fn sudo(line: impl Into<String>) -> Self {
        Self::new(line).elevated()
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    pub fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn unchecked(mut self) -> Self {
        self.check_exit = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs shell commands on a named host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn exec(
        &self,
        host: &ClientRef,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, RemoteError>;
}

#[async_trait]
impl<R: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<R> {
    async fn exec(
        &self,
        host: &ClientRef,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, RemoteError> {
        (**self).exec(host, command).await
    }
}
