//! Remote refresh trigger over ssh.

use crate::config::{ChannelConfig, TimeoutDefaults};
use crate::error::Result;
use crate::process::CommandSpec;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Runs a command on a remote host.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn run(&self, host: &str, command: &str) -> Result<()>;
}

/// Non-interactive `ssh`.
#[derive(Debug, Clone)]
pub struct SshShell {
    binary: PathBuf,
    connect_timeout: Duration,
    timeout: Duration,
    success_codes: Vec<i32>,
}

impl SshShell {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("ssh"),
            connect_timeout: TimeoutDefaults::SSH_CONNECT,
            timeout,
            success_codes: vec![0],
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.timeouts.ssh()).with_success_codes(config.refresh_exit_codes.clone())
    }

    /// Remote exit codes accepted as a successful run. ssh passes the
    /// remote status through and uses 255 for its own failures.
    pub fn with_success_codes(mut self, codes: Vec<i32>) -> Self {
        self.success_codes = codes;
        self
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn command(&self, host: &str, command: &str) -> CommandSpec {
        CommandSpec::new(&self.binary, self.timeout)
            .args(["-o", "BatchMode=yes", "-o"])
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .arg(host)
            .arg(command)
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run(&self, host: &str, command: &str) -> Result<()> {
        self.command(host, command)
            .run_accepting(&self.success_codes)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_command_is_batch_mode() {
        let shell = SshShell::new(Duration::from_secs(30));
        let spec = format!("{:?}", shell.command("qa1.example.org", "sa-update"));
        assert!(spec.contains("\"BatchMode=yes\""));
        assert!(spec.contains("\"ConnectTimeout=10\""));
        assert!(spec.contains("\"qa1.example.org\", \"sa-update\""));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ssh_failure_propagates() {
        let shell = SshShell::new(Duration::from_secs(5)).with_binary("false");
        assert!(shell.run("qa1.example.org", "sa-update").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_up_to_date_host_is_a_success() {
        use crate::config::tests::MINIMAL;
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let stub = temp_dir.path().join("ssh");
        let script = "#!/bin/sh\ncase \"$*\" in\n  *qa-down*) exit 255 ;;\n  *) exit 1 ;;\nesac\n";
        std::fs::write(&stub, script).unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = ChannelConfig::from_yaml(MINIMAL).unwrap();
        let shell = SshShell::from_config(&config).with_binary(&stub);
        shell.run("qa1.example.org", "sa-update").await.unwrap();

        let err = shell.run("qa-down.example.org", "sa-update").await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::ChannelError::CommandFailed { status: Some(255), .. }
        ));

        let strict = SshShell::new(Duration::from_secs(5)).with_binary(&stub);
        assert!(strict.run("qa1.example.org", "sa-update").await.is_err());
    }
}
