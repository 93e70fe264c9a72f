//! Shared fixtures: a seeded store, a scratch configuration and fake
//! collaborators that record what the pipeline asked of them.

#![allow(dead_code)]

use async_trait::async_trait;
use sa_channel_core::announcer::{RemoteShell, TxtRecord, ZoneUpdater};
use sa_channel_core::packager::{Signer, TarBz2Archiver};
use sa_channel_core::publisher::LocalMirror;
use sa_channel_core::validator::{LintOutcome, RuleLinter, Verdict};
use sa_channel_core::{
    ChannelConfig, ChannelError, Collaborators, MiniJinjaRenderer, NewChannel, NewRule, Result,
    SqliteStore, SyncClient, SyncSummary,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TEMPLATE: &str = include_str!("../../../../templates/channel.cf.j2");

/// Scratch directories plus a configuration pointing into them.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: ChannelConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_yaml("")
    }

    /// Extra top-level YAML appended to the base configuration.
    pub fn with_yaml(extra: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let root = dir.path();
        let yaml = format!(
            "output_dir: {out}
domain: updates.example.org
web_root: {web}
gpg_key: channel@example.org
database:
  path: {db}
dns:
  zone: example.org
  host: updates
  server: ns1.example.org
lock_file: {lock}
{extra}",
            out = root.join("build").display(),
            web = root.join("web").display(),
            db = root.join("rules.db").display(),
            lock = root.join("run.lock").display(),
        );
        let config = ChannelConfig::from_yaml(&yaml).expect("test config must parse");
        Self { dir, config }
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    pub fn web_root(&self) -> &Path {
        &self.config.web_root
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.config.output_dir.join(name)
    }
}

/// In-memory store with channel `main` (three production rules plus one
/// inactive and one testing rule) and an empty channel `quiet`.
pub fn seeded_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    let main = store
        .insert_channel(&NewChannel {
            name: "main".into(),
            description: Some("Main production rules".into()),
            is_default: true,
        })
        .unwrap();
    store
        .insert_channel(&NewChannel {
            name: "quiet".into(),
            ..Default::default()
        })
        .unwrap();

    let rules = [
        NewRule::production("LOCAL_VIAGRA", "body LOCAL_VIAGRA /viagra/i", 3.5),
        NewRule::production(
            "LOCAL_CASINO",
            "header LOCAL_CASINO Subject =~ /casino/i\ndescribe LOCAL_CASINO Casino in subject",
            2.0,
        ),
        NewRule {
            author: Some("postmaster@example.org".into()),
            ..NewRule::production("LOCAL_BITCOIN", "body LOCAL_BITCOIN /bitcoin wallet/i", 1.25)
        },
        NewRule {
            active: false,
            ..NewRule::production("LOCAL_RETIRED", "body LOCAL_RETIRED /old/", 1.0)
        },
        NewRule {
            status: "testing".into(),
            ..NewRule::production("LOCAL_TRIAL", "body LOCAL_TRIAL /trial/", 1.0)
        },
    ];
    for rule in &rules {
        let id = store.insert_rule(rule).unwrap();
        store.add_rule_to_channel(main, id).unwrap();
    }
    store
}

pub fn renderer() -> MiniJinjaRenderer {
    MiniJinjaRenderer::from_source(TEMPLATE).unwrap()
}

/// Lint passes unless the rule file contains `fail_marker`.
/// Messages mentioning "viagra" classify as spam.
#[derive(Default)]
pub struct FakeLinter {
    pub fail_marker: Option<String>,
    pub linted: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RuleLinter for FakeLinter {
    async fn lint(&self, cf_path: &Path) -> Result<LintOutcome> {
        let contents = std::fs::read_to_string(cf_path)?;
        self.linted
            .lock()
            .unwrap()
            .push(cf_path.file_name().unwrap().to_string_lossy().into_owned());
        let broken = self
            .fail_marker
            .as_deref()
            .is_some_and(|marker| contents.contains(marker));
        Ok(LintOutcome {
            passed: !broken,
            diagnostics: if broken {
                "config: failed to parse line, skipping".into()
            } else {
                format!("dbg: config: read file {}", cf_path.display())
            },
        })
    }

    async fn classify(&self, _cf_path: &Path, message: &Path) -> Result<Verdict> {
        let text = std::fs::read_to_string(message)?;
        Ok(if text.to_lowercase().contains("viagra") {
            Verdict::Spam
        } else {
            Verdict::Ham
        })
    }
}

/// Writes `FAKESIG <key> <sha256>` signatures. Refuses keys listed in
/// `refuse`.
#[derive(Default)]
pub struct FakeSigner {
    pub refuse: Vec<String>,
}

impl FakeSigner {
    fn digest(path: &Path) -> Result<String> {
        Ok(hex::encode(Sha256::digest(std::fs::read(path)?)))
    }
}

#[async_trait]
impl Signer for FakeSigner {
    async fn sign(&self, input: &Path, signature: &Path, key: &str) -> Result<()> {
        if self.refuse.iter().any(|k| k == key) {
            return Err(ChannelError::CommandFailed {
                program: "gpg".into(),
                status: Some(2),
                stderr: format!("gpg: skipped \"{key}\": No secret key"),
            });
        }
        let body = format!("FAKESIG {} {}\n", key, Self::digest(input)?);
        std::fs::write(signature, body)?;
        Ok(())
    }

    async fn verify(&self, input: &Path, signature: &Path, key: &str) -> Result<()> {
        let expected = format!("FAKESIG {} {}\n", key, Self::digest(input)?);
        if std::fs::read_to_string(signature)? == expected {
            Ok(())
        } else {
            Err(ChannelError::Other("BAD signature".into()))
        }
    }
}

/// Sync client that always fails.
pub struct FailingSync;

#[async_trait]
impl SyncClient for FailingSync {
    async fn sync(&self, _source: &Path, _mirror: bool) -> Result<SyncSummary> {
        Err(ChannelError::CommandFailed {
            program: "rsync".into(),
            status: Some(12),
            stderr: "rsync error: error in rsync protocol data stream".into(),
        })
    }

    fn target(&self) -> String {
        "dist@mirror.invalid:/srv".into()
    }
}

#[derive(Default)]
pub struct RecordingZone {
    pub fail: bool,
    pub records: Arc<Mutex<Vec<TxtRecord>>>,
}

#[async_trait]
impl ZoneUpdater for RecordingZone {
    async fn replace_txt(&self, record: &TxtRecord) -> Result<()> {
        if self.fail {
            return Err(ChannelError::Announcement {
                message: "update failed: REFUSED".into(),
            });
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingShell {
    pub unreachable: Vec<String>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RemoteShell for RecordingShell {
    async fn run(&self, host: &str, _command: &str) -> Result<()> {
        self.calls.lock().unwrap().push(host.to_string());
        if self.unreachable.iter().any(|h| h == host) {
            return Err(ChannelError::Timeout {
                program: "ssh".into(),
                after: std::time::Duration::from_secs(60),
            });
        }
        Ok(())
    }
}

/// Handles onto what the fakes recorded.
#[derive(Default, Clone)]
pub struct Recorded {
    pub linted: Arc<Mutex<Vec<String>>>,
    pub records: Arc<Mutex<Vec<TxtRecord>>>,
    pub refreshed: Arc<Mutex<Vec<String>>>,
}

/// Knobs for [`fake_collaborators`].
#[derive(Default)]
pub struct Fakes {
    pub lint_fail_marker: Option<String>,
    pub refuse_keys: Vec<String>,
    pub failing_sync: bool,
    pub failing_dns: bool,
    pub unreachable_hosts: Vec<String>,
}

/// Seeded store, the bundled template, the local mirror and fakes for
/// everything that would leave the process.
pub fn fake_collaborators(env: &TestEnv, fakes: Fakes) -> (Collaborators, Recorded) {
    let recorded = Recorded::default();
    let sync: Box<dyn SyncClient> = if fakes.failing_sync {
        Box::new(FailingSync)
    } else {
        Box::new(LocalMirror::new(env.web_root()))
    };
    let parts = Collaborators {
        store: Box::new(seeded_store()),
        renderer: Box::new(renderer()),
        linter: Box::new(FakeLinter {
            fail_marker: fakes.lint_fail_marker,
            linted: recorded.linted.clone(),
        }),
        archiver: Box::new(TarBz2Archiver),
        signer: Box::new(FakeSigner {
            refuse: fakes.refuse_keys,
        }),
        sync,
        zone: Box::new(RecordingZone {
            fail: fakes.failing_dns,
            records: recorded.records.clone(),
        }),
        shell: Box::new(RecordingShell {
            unreachable: fakes.unreachable_hosts,
            calls: recorded.refreshed.clone(),
        }),
    };
    (parts, recorded)
}

/// Names of the files directly inside `dir`, sorted; empty if it is missing.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
