use super::{CommandOutput, CommandRunner, RemoteCommand, shell_quote};
use crate::error::{RemoteError, RemoteErrorKind};
use crate::share::ClientRef;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    pub user: String,
    pub identity_file: Option<PathBuf>,
    pub port: u16,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    /// Used for commands marked long-running (recursive deletes, reboots).
    pub long_running_timeout: Duration,
    /// Passed as `-o` options after the built-in ones.
    pub extra_options: Vec<String>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            identity_file: None,
            port: 22,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(600),
            long_running_timeout: Duration::from_secs(3600),
            extra_options: Vec::new(),
        }
    }
}

/// [`CommandRunner`] on top of the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshRunner {
    settings: SshSettings,
    program: String,
}

impl SshRunner {
    pub fn new(settings: SshSettings) -> Self {
        Self {
            settings,
            program: "ssh".to_string(),
        }
    }

    /// Uses a different ssh binary, e.g. a wrapper script.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }

    fn timeout_for(&self, command: &RemoteCommand) -> Duration {
        match command.timeout {
            Some(t) => t,
            None if command.long_running => self.settings.long_running_timeout,
            None => self.settings.command_timeout,
        }
    }

    fn args(&self, host: &ClientRef, command: &RemoteCommand) -> Vec<String> {
        let s = &self.settings;
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", s.connect_timeout.as_secs().max(1)),
            "-p".to_string(),
            s.port.to_string(),
        ];
        for opt in &s.extra_options {
            args.push("-o".to_string());
            args.push(opt.clone());
        }
        if let Some(key) = &s.identity_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{}", s.user, host.address));
        args.push(remote_line(command));
        args
    }
}

/// The line ssh hands to the remote shell.
fn remote_line(command: &RemoteCommand) -> String {
    if command.elevated {
        format!("sudo -n sh -c {}", shell_quote(&command.line))
    } else {
        command.line.clone()
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn exec(
        &self,
        host: &ClientRef,
        command: &RemoteCommand,
    ) -> Result<CommandOutput, RemoteError> {
        let timeout = self.timeout_for(command);
        debug!(host = %host, command = %command.line, elevated = command.elevated, "exec");

        let mut child = Command::new(&self.program);
        child
            .args(self.args(host, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, child.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(RemoteError::new(
                    &host.hostname,
                    &command.line,
                    RemoteErrorKind::Spawn,
                    format!("failed to run {}: {}", self.program, e),
                ));
            }
            Err(_) => {
                return Err(RemoteError::new(
                    &host.hostname,
                    &command.line,
                    RemoteErrorKind::TimedOut,
                    format!("no result after {:?}", timeout),
                ));
            }
        };

        let out = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        if command.check_exit && !out.success() {
            let message = if out.stderr.trim().is_empty() {
                out.stdout.trim()
            } else {
                out.stderr.trim()
            };
            return Err(RemoteError::new(
                &host.hostname,
                &command.line,
                RemoteErrorKind::Exit(out.exit_code),
                message,
            ));
        }
        Ok(out)
    }
}
