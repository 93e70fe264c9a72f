//! Run configuration.
//!
//! The configuration is a YAML document loaded once per run. Required keys
//! must be present or loading fails before the pipeline touches anything;
//! optional keys fall back to the defaults defined here. Relative paths are
//! resolved against the directory that holds the configuration file.

use crate::error::{ChannelError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the signing passphrase.
pub const PASSPHRASE_ENV: &str = "SA_CHANNEL_GPG_PASSPHRASE";

/// Default configuration file name when none is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Default timeouts for external tools.
pub struct TimeoutDefaults;

impl TimeoutDefaults {
    pub const LINT: Duration = Duration::from_secs(120);
    pub const CLASSIFY: Duration = Duration::from_secs(60);
    pub const SIGN: Duration = Duration::from_secs(120);
    pub const SYNC: Duration = Duration::from_secs(600);
    pub const DNS: Duration = Duration::from_secs(30);
    pub const SSH: Duration = Duration::from_secs(60);
    pub const SSH_CONNECT: Duration = Duration::from_secs(10);
}

/// Process-wide configuration for one pipeline run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Build directory for `.cf`, archives, signatures and `.info` files.
    pub output_dir: PathBuf,
    /// Channel domain consumers pass to `sa-update --channel`.
    pub domain: String,
    /// Local distribution root, used when no rsync target is configured.
    pub web_root: PathBuf,
    /// Default signing identity.
    pub gpg_key: String,
    pub database: DatabaseConfig,
    pub dns: DnsConfig,

    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    #[serde(default = "default_spamassassin_bin")]
    pub spamassassin_bin: PathBuf,
    /// Only rules with this lifecycle status are published.
    #[serde(default = "default_rule_status")]
    pub rule_status: String,
    /// Restrict published rules to one engine version.
    #[serde(default)]
    pub engine_version: Option<String>,
    /// Remote sync endpoint (`host:/path`). Takes precedence over `web_root`.
    #[serde(default)]
    pub rsync_target: Option<String>,
    #[serde(default)]
    pub test_hosts: Vec<String>,
    #[serde(default)]
    pub refresh_command: Option<String>,
    /// Exit codes of the refresh command that count as success. sa-update
    /// exits 1 when the host is already current.
    #[serde(default = "default_refresh_exit_codes")]
    pub refresh_exit_codes: Vec<i32>,
    /// Labelled samples laid out as `<corpora_dir>/<channel>/{spam,ham}/`.
    #[serde(default)]
    pub corpora_dir: Option<PathBuf>,
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    #[serde(default)]
    pub gpg: GpgConfig,
    #[serde(default)]
    pub build: BuildOptions,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub policy: FailurePolicy,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Per-channel overrides keyed by channel name.
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelOverrides>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    /// Zone the announcement record lives in.
    pub zone: String,
    /// Announcement name relative to the zone.
    pub host: String,
    /// Authoritative server receiving the dynamic update.
    pub server: String,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    /// TSIG key file passed to nsupdate with `-k`.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default = "default_nsupdate_bin")]
    pub nsupdate_bin: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GpgConfig {
    #[serde(default = "default_gpg_bin")]
    pub binary: PathBuf,
    #[serde(default)]
    pub homedir: Option<PathBuf>,
    /// File holding the signing passphrase. Ignored when the environment
    /// variable is set.
    #[serde(default)]
    pub passphrase_file: Option<PathBuf>,
}

impl Default for GpgConfig {
    fn default() -> Self {
        Self {
            binary: default_gpg_bin(),
            homedir: None,
            passphrase_file: None,
        }
    }
}

/// Named run options; command-line flags can only switch these on.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildOptions {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    /// Remove target artifacts that no longer exist in the build directory.
    #[serde(default = "default_true")]
    pub mirror: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self { mirror: true }
    }
}

/// Whether announcement-stage failures abort the run.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailurePolicy {
    #[serde(default)]
    pub dns_failure_fatal: bool,
    #[serde(default)]
    pub refresh_failure_fatal: bool,
}

/// Timeouts in seconds for each external tool.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    #[serde(default = "default_lint_secs")]
    pub lint_secs: u64,
    #[serde(default = "default_classify_secs")]
    pub classify_secs: u64,
    #[serde(default = "default_sign_secs")]
    pub sign_secs: u64,
    #[serde(default = "default_sync_secs")]
    pub sync_secs: u64,
    #[serde(default = "default_dns_secs")]
    pub dns_secs: u64,
    #[serde(default = "default_ssh_secs")]
    pub ssh_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            lint_secs: default_lint_secs(),
            classify_secs: default_classify_secs(),
            sign_secs: default_sign_secs(),
            sync_secs: default_sync_secs(),
            dns_secs: default_dns_secs(),
            ssh_secs: default_ssh_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn lint(&self) -> Duration {
        Duration::from_secs(self.lint_secs)
    }

    pub fn classify(&self) -> Duration {
        Duration::from_secs(self.classify_secs)
    }

    pub fn sign(&self) -> Duration {
        Duration::from_secs(self.sign_secs)
    }

    pub fn sync(&self) -> Duration {
        Duration::from_secs(self.sync_secs)
    }

    pub fn dns(&self) -> Duration {
        Duration::from_secs(self.dns_secs)
    }

    pub fn ssh(&self) -> Duration {
        Duration::from_secs(self.ssh_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelOverrides {
    /// Signing identity for this channel instead of the global `gpg_key`.
    #[serde(default)]
    pub gpg_key: Option<String>,
    #[serde(default)]
    pub skip_validation: bool,
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_spamassassin_bin() -> PathBuf {
    PathBuf::from("spamassassin")
}

fn default_rule_status() -> String {
    "production".to_string()
}

fn default_refresh_exit_codes() -> Vec<i32> {
    vec![0, 1]
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/tmp/sa-channel.lock")
}

fn default_ttl() -> u32 {
    300
}

fn default_nsupdate_bin() -> PathBuf {
    PathBuf::from("nsupdate")
}

fn default_gpg_bin() -> PathBuf {
    PathBuf::from("gpg")
}

fn default_true() -> bool {
    true
}

fn default_lint_secs() -> u64 {
    TimeoutDefaults::LINT.as_secs()
}

fn default_classify_secs() -> u64 {
    TimeoutDefaults::CLASSIFY.as_secs()
}

fn default_sign_secs() -> u64 {
    TimeoutDefaults::SIGN.as_secs()
}

fn default_sync_secs() -> u64 {
    TimeoutDefaults::SYNC.as_secs()
}

fn default_dns_secs() -> u64 {
    TimeoutDefaults::DNS.as_secs()
}

fn default_ssh_secs() -> u64 {
    TimeoutDefaults::SSH.as_secs()
}

impl ChannelConfig {
    /// Load and check a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ChannelError::config(format!("config file not found: {}", path.display()))
            } else {
                ChannelError::config(format!("cannot read {}: {}", path.display(), e))
            }
        })?;

        let mut config = Self::from_yaml(&contents)
            .map_err(|e| ChannelError::config(format!("{}: {}", path.display(), e)))?;

        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.rebase(base);
        }
        Ok(config)
    }

    /// Parse a configuration document without touching the filesystem.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|e| ChannelError::config(format!("invalid configuration: {e}")))?;
        config.check_required()?;
        Ok(config)
    }

    fn check_required(&self) -> Result<()> {
        let required = [
            ("domain", self.domain.as_str()),
            ("gpg_key", self.gpg_key.as_str()),
            ("dns.zone", self.dns.zone.as_str()),
            ("dns.host", self.dns.host.as_str()),
            ("dns.server", self.dns.server.as_str()),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ChannelError::config(format!("required key `{key}` is empty")));
            }
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ChannelError::config("required key `output_dir` is empty"));
        }
        Ok(())
    }

    /// Resolve relative paths against `base`.
    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.output_dir);
        join(&mut self.web_root);
        join(&mut self.templates_dir);
        join(&mut self.database.path);
        join(&mut self.lock_file);
        if let Some(dir) = self.corpora_dir.as_mut() {
            join(dir);
        }
        if let Some(file) = self.log_file.as_mut() {
            join(file);
        }
        if let Some(dir) = self.gpg.homedir.as_mut() {
            join(dir);
        }
        if let Some(file) = self.gpg.passphrase_file.as_mut() {
            join(file);
        }
        if let Some(file) = self.dns.key_file.as_mut() {
            join(file);
        }
    }

    /// Signing identity for a channel, honouring per-channel overrides.
    pub fn signing_key_for(&self, channel: &str) -> &str {
        self.channels
            .get(channel)
            .and_then(|o| o.gpg_key.as_deref())
            .unwrap_or(&self.gpg_key)
    }

    pub fn skip_validation_for(&self, channel: &str) -> bool {
        self.channels
            .get(channel)
            .map(|o| o.skip_validation)
            .unwrap_or(false)
    }

    /// Command run on each test host to pull the new channel version.
    pub fn refresh_command(&self) -> String {
        self.refresh_command.clone().unwrap_or_else(|| {
            format!(
                "sa-update --channel {} --gpgkey {}",
                self.domain, self.gpg_key
            )
        })
    }

    /// Fully qualified name of the announcement TXT record.
    pub fn announcement_name(&self) -> String {
        let host = self.dns.host.trim_end_matches('.');
        let zone = self.dns.zone.trim_end_matches('.');
        if host == zone || host.ends_with(&format!(".{zone}")) {
            format!("{host}.")
        } else {
            format!("{host}.{zone}.")
        }
    }
}
