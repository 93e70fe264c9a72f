//! External command execution with timeouts.
//!
//! Every external tool the pipeline drives (spamassassin, gpg, rsync,
//! nsupdate, ssh) goes through [`CommandSpec::run`], which captures output,
//! optionally feeds stdin and kills the child when the timeout expires.

use crate::error::{ChannelError, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// A command to run once.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
    stdin: Option<Vec<u8>>,
    envs: Vec<(OsString, OsString)>,
    timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            program: program.as_ref().as_os_str().to_os_string(),
            args: Vec::new(),
            stdin: None,
            envs: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Bytes written to the child's stdin before waiting for it.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Program name for logs and errors.
    pub fn program_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    /// Run to completion, returning the output whatever the exit status.
    pub async fn run(self) -> Result<CommandOutput> {
        let program = self.program_name();
        debug!("Running {} {:?}", program, self.args);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ChannelError::Io {
            message: format!("failed to start {}: {}", program, e),
            path: None,
            source: Some(e),
        })?;

        if let (Some(input), Some(mut pipe)) = (self.stdin.as_deref(), child.stdin.take()) {
            pipe.write_all(input).await.map_err(|e| ChannelError::Io {
                message: format!("failed to write stdin of {}: {}", program, e),
                path: None,
                source: Some(e),
            })?;
            // Close stdin so the child sees EOF.
            drop(pipe);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ChannelError::Io {
                message: format!("failed to wait for {}: {}", program, e),
                path: None,
                source: Some(e),
            })?,
            Err(_) => {
                return Err(ChannelError::Timeout {
                    program,
                    after: self.timeout,
                })
            }
        };

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run and turn a non-zero exit into [`ChannelError::CommandFailed`].
    pub async fn run_checked(self) -> Result<CommandOutput> {
        self.run_accepting(&[0]).await
    }

    /// Like [`run_checked`](Self::run_checked), treating any of `codes` as success.
    pub async fn run_accepting(self, codes: &[i32]) -> Result<CommandOutput> {
        let program = self.program_name();
        let output = self.run().await?;
        if output.status.is_some_and(|code| codes.contains(&code)) {
            Ok(output)
        } else {
            Err(ChannelError::CommandFailed {
                program,
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}
