//! Detached archive signatures.

use crate::config::{ChannelConfig, PASSPHRASE_ENV};
use crate::error::{ChannelError, Result};
use crate::process::CommandSpec;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Produces and checks detached signatures.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Write an armored detached signature of `input` to `signature`,
    /// signing as `key`.
    async fn sign(&self, input: &Path, signature: &Path, key: &str) -> Result<()>;

    /// Check that `signature` is a good signature of `input` made by `key`.
    async fn verify(&self, input: &Path, signature: &Path, key: &str) -> Result<()>;
}

/// Signing passphrase. Never printed.
#[derive(Clone)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// Signs with the `gpg` binary.
#[derive(Debug)]
pub struct GpgSigner {
    binary: PathBuf,
    homedir: Option<PathBuf>,
    passphrase: Option<Passphrase>,
    timeout: Duration,
}

impl GpgSigner {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            homedir: None,
            passphrase: None,
            timeout,
        }
    }

    pub fn with_homedir(mut self, homedir: impl Into<PathBuf>) -> Self {
        self.homedir = Some(homedir.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: Passphrase) -> Self {
        self.passphrase = Some(passphrase);
        self
    }

    /// Build from configuration, reading the passphrase from the
    /// environment or the configured passphrase file.
    pub fn from_config(config: &ChannelConfig) -> Result<Self> {
        let mut signer = Self::new(&config.gpg.binary, config.timeouts.sign());
        if let Some(homedir) = &config.gpg.homedir {
            signer = signer.with_homedir(homedir);
        }
        let from_env = std::env::var(PASSPHRASE_ENV).ok();
        if let Some(passphrase) = load_passphrase(from_env, config.gpg.passphrase_file.as_deref())? {
            signer = signer.with_passphrase(passphrase);
        }
        Ok(signer)
    }

    fn command(&self) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.binary, self.timeout).arg("--batch");
        if let Some(homedir) = &self.homedir {
            spec = spec.arg("--homedir").arg(homedir);
        }
        spec
    }
}

#[async_trait]
impl Signer for GpgSigner {
    async fn sign(&self, input: &Path, signature: &Path, key: &str) -> Result<()> {
        let mut spec = self
            .command()
            .args(["--yes", "--armor", "--detach-sign", "--local-user", key])
            .arg("--output")
            .arg(signature);
        if let Some(passphrase) = &self.passphrase {
            spec = spec
                .args(["--pinentry-mode", "loopback", "--passphrase-fd", "0"])
                .stdin(format!("{}\n", passphrase.expose()));
        }
        spec.arg(input).run_checked().await?;
        debug!("Signed {} as {}", input.display(), key);
        Ok(())
    }

    async fn verify(&self, input: &Path, signature: &Path, key: &str) -> Result<()> {
        let output = self
            .command()
            .args(["--status-fd", "1", "--verify"])
            .arg(signature)
            .arg(input)
            .run_checked()
            .await?;

        if signed_by(&output.stdout, key) {
            Ok(())
        } else {
            Err(ChannelError::Other(format!(
                "{} is not signed by {}",
                input.display(),
                key
            )))
        }
    }
}

/// Whether gpg status output reports a good signature matching `key`.
///
/// `key` may be a key id or fingerprint (optionally `0x`-prefixed, short ids
/// match as a suffix), an email address (matched against the `<...>` part of
/// the signer's user id) or a complete user id.
fn signed_by(status: &str, key: &str) -> bool {
    let key = key.trim();
    if key.is_empty() {
        return false;
    }

    let hex_id = key.trim_start_matches("0x").trim_start_matches("0X");
    let is_hex = hex_id.len() >= 8 && hex_id.chars().all(|c| c.is_ascii_hexdigit());
    let email = key
        .rsplit_once('<')
        .and_then(|(_, rest)| rest.strip_suffix('>'))
        .unwrap_or(key);

    status.lines().any(|line| {
        let line = line.trim_start_matches("[GNUPG:] ");
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("GOODSIG") => {
                let Some(key_id) = fields.next() else {
                    return false;
                };
                let user_id = fields.collect::<Vec<_>>().join(" ");
                if is_hex {
                    id_matches(key_id, hex_id)
                } else if email.contains('@') {
                    user_email(&user_id).is_some_and(|e| e.eq_ignore_ascii_case(email))
                } else {
                    user_id.eq_ignore_ascii_case(key)
                }
            }
            // VALIDSIG <fpr> <date> <ts> <expire> <ver> <reserved> <pkalgo> <hashalgo> <class> <primary-fpr>
            Some("VALIDSIG") if is_hex => {
                let fields: Vec<&str> = fields.collect();
                let matched = [fields.first(), fields.get(9)]
                    .into_iter()
                    .flatten()
                    .any(|fpr| id_matches(fpr, hex_id));
                matched
            }
            _ => false,
        }
    })
}

/// Whole-token match, or suffix match for short and long key ids.
fn id_matches(token: &str, wanted: &str) -> bool {
    token.eq_ignore_ascii_case(wanted)
        || (wanted.len() < token.len()
            && token
                .to_ascii_uppercase()
                .ends_with(&wanted.to_ascii_uppercase()))
}

fn user_email(user_id: &str) -> Option<&str> {
    let start = user_id.rfind('<')?;
    let end = user_id[start..].find('>')? + start;
    Some(&user_id[start + 1..end])
}

/// Passphrase from the environment value, else from `file`, else none.
fn load_passphrase(from_env: Option<String>, file: Option<&Path>) -> Result<Option<Passphrase>> {
    if let Some(value) = from_env.filter(|v| !v.is_empty()) {
        return Ok(Some(Passphrase::new(value)));
    }
    match file {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ChannelError::io("failed to read passphrase file", path, e))?;
            Ok(Some(Passphrase::new(contents.trim_end_matches(['\r', '\n']))))
        }
        None => Ok(None),
    }
}
