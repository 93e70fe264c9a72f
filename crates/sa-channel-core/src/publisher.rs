//! Artifact distribution.
//!
//! Copies the artifact files of the output directory to the distribution
//! target: a remote rsync destination when `rsync_target` is configured,
//! otherwise the local `web_root`. With `publish.mirror` set, artifacts on
//! the target that no longer exist locally are removed.

use crate::atomic::atomic_write;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::process::CommandSpec;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

/// File suffixes that make up a published artifact set.
pub const ARTIFACT_SUFFIXES: [&str; 3] = [".tar.bz2", ".tar.bz2.asc", ".info"];

/// Whether a file name belongs to a published artifact set.
///
/// Hidden files are staging leftovers and never published.
pub fn is_artifact(name: &str) -> bool {
    !name.starts_with('.') && ARTIFACT_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// What a sync changed on the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Artifacts sent to the target.
    pub transferred: usize,
    /// Stale target artifacts removed.
    pub removed: usize,
}

/// Transfers the artifact files of a directory to a distribution target.
#[async_trait]
pub trait SyncClient: Send + Sync {
    async fn sync(&self, source: &Path, mirror: bool) -> Result<SyncSummary>;

    /// Human-readable destination for logs.
    fn target(&self) -> String;
}

/// Remote target via `rsync`.
#[derive(Debug, Clone)]
pub struct RsyncClient {
    binary: PathBuf,
    target: String,
    timeout: Duration,
}

impl RsyncClient {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("rsync"),
            target: target.into(),
            timeout,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn command(&self, source: &Path, mirror: bool) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.binary, self.timeout).arg("-a");
        if mirror {
            spec = spec.arg("--delete");
        }
        spec = spec.arg("--exclude=.*");
        for suffix in ARTIFACT_SUFFIXES {
            spec = spec.arg(format!("--include=*{suffix}"));
        }
        let mut source = source.as_os_str().to_os_string();
        source.push("/");
        spec.arg("--exclude=*").arg(source).arg(&self.target)
    }
}

#[async_trait]
impl SyncClient for RsyncClient {
    async fn sync(&self, source: &Path, mirror: bool) -> Result<SyncSummary> {
        let transferred = local_artifacts(source)?.len();
        self.command(source, mirror).run_checked().await?;
        Ok(SyncSummary {
            transferred,
            removed: 0,
        })
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

/// Local target directory, mirrored in-process.
#[derive(Debug, Clone)]
pub struct LocalMirror {
    root: PathBuf,
}

impl LocalMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SyncClient for LocalMirror {
    async fn sync(&self, source: &Path, mirror: bool) -> Result<SyncSummary> {
        fs::create_dir_all(&self.root)
            .map_err(|e| ChannelError::io("failed to create web root", &self.root, e))?;

        let mut summary = SyncSummary::default();
        let local = local_artifacts(source)?;
        let mut names = BTreeSet::new();

        for path in &local {
            let Some(name) = path.file_name() else { continue };
            let target = self.root.join(name);
            let bytes = fs::read(path).map_err(|e| ChannelError::io_with_path(e, path))?;
            if fs::read(&target).ok().as_deref() != Some(bytes.as_slice()) {
                atomic_write(&target, &bytes)?;
                summary.transferred += 1;
                debug!("Published {}", target.display());
            }
            names.insert(name.to_os_string());
        }

        if mirror {
            for stale in local_artifacts(&self.root)? {
                let known = stale.file_name().is_some_and(|n| names.contains(n));
                if !known {
                    fs::remove_file(&stale).map_err(|e| ChannelError::io_with_path(e, &stale))?;
                    summary.removed += 1;
                    debug!("Removed stale {}", stale.display());
                }
            }
        }

        Ok(summary)
    }

    fn target(&self) -> String {
        self.root.display().to_string()
    }
}

/// The sync client a configuration asks for.
pub fn sync_client_for(config: &ChannelConfig) -> Box<dyn SyncClient> {
    match &config.rsync_target {
        Some(target) => Box::new(RsyncClient::new(target, config.timeouts.sync())),
        None => Box::new(LocalMirror::new(&config.web_root)),
    }
}

/// Artifact files directly inside `dir`, sorted by name.
fn local_artifacts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| ChannelError::Io {
            message: format!("failed to list {}: {}", dir.display(), e),
            path: Some(dir.to_path_buf()),
            source: e.into_io_error(),
        })?;
        let is_match = entry.file_type().is_file()
            && entry.file_name().to_str().is_some_and(is_artifact);
        if is_match {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Pushes the output directory to the distribution target.
pub struct Publisher<'a> {
    client: &'a dyn SyncClient,
    config: &'a ChannelConfig,
}

impl<'a> Publisher<'a> {
    pub fn new(client: &'a dyn SyncClient, config: &'a ChannelConfig) -> Self {
        Self { client, config }
    }

    /// Sync the output directory. Returns `None` in dry-run mode.
    pub async fn publish(&self, dry_run: bool) -> Result<Option<SyncSummary>> {
        let source = &self.config.output_dir;
        let mirror = self.config.publish.mirror;

        if dry_run {
            info!(
                "[dry-run] would publish {} to {}{}",
                source.display(),
                self.client.target(),
                if mirror { " (mirror)" } else { "" }
            );
            return Ok(None);
        }

        let summary = self
            .client
            .sync(source, mirror)
            .await
            .map_err(|e| ChannelError::Publish {
                message: format!("sync to {} failed: {}", self.client.target(), e),
            })?;
        info!(
            "Published to {}: {} transferred, {} removed",
            self.client.target(),
            summary.transferred,
            summary.removed
        );
        Ok(Some(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_is_artifact() {
        assert!(is_artifact("main.tar.bz2"));
        assert!(is_artifact("main.tar.bz2.asc"));
        assert!(is_artifact("main.info"));
        assert!(!is_artifact("main.cf"));
        assert!(!is_artifact(".main.tar.bz2.123.tmp"));
        assert!(!is_artifact(".main.info"));
    }

    #[tokio::test]
    async fn test_local_mirror_copies_and_prunes() {
        let source = TempDir::new().unwrap();
        let web = TempDir::new().unwrap();
        touch(source.path(), "main.tar.bz2", "archive");
        touch(source.path(), "main.tar.bz2.asc", "sig");
        touch(source.path(), "main.info", "info");
        touch(source.path(), "main.cf", "rules");
        touch(web.path(), "old.tar.bz2", "stale");
        touch(web.path(), "index.html", "keep me");

        let mirror = LocalMirror::new(web.path());
        let summary = mirror.sync(source.path(), true).await.unwrap();
        assert_eq!(summary, SyncSummary { transferred: 3, removed: 1 });

        assert_eq!(fs::read_to_string(web.path().join("main.info")).unwrap(), "info");
        assert!(!web.path().join("main.cf").exists());
        assert!(!web.path().join("old.tar.bz2").exists());
        assert!(web.path().join("index.html").exists());

        // Unchanged artifacts are not rewritten.
        let again = mirror.sync(source.path(), true).await.unwrap();
        assert_eq!(again, SyncSummary::default());
    }

    #[tokio::test]
    async fn test_local_mirror_without_pruning() {
        let source = TempDir::new().unwrap();
        let web = TempDir::new().unwrap();
        touch(source.path(), "main.info", "info");
        touch(web.path(), "old.info", "stale");

        let summary = LocalMirror::new(web.path()).sync(source.path(), false).await.unwrap();
        assert_eq!(summary.removed, 0);
        assert!(web.path().join("old.info").exists());
    }

    #[test]
    fn test_rsync_command_filters_artifacts() {
        let client = RsyncClient::new("dist@host:/srv/channel/", Duration::from_secs(5));
        let spec = format!("{:?}", client.command(Path::new("/build"), true));
        assert!(spec.contains("\"--delete\""));
        assert!(spec.contains("\"--include=*.tar.bz2.asc\""));
        assert!(spec.contains("\"/build/\""));
        assert!(spec.contains("\"dist@host:/srv/channel/\""));
    }

    #[tokio::test]
    async fn test_publish_dry_run_touches_nothing() {
        let output = TempDir::new().unwrap();
        let web = TempDir::new().unwrap();
        touch(output.path(), "main.info", "info");

        let mut config = crate::config::ChannelConfig::from_yaml(crate::config::tests::MINIMAL).unwrap();
        config.output_dir = output.path().to_path_buf();
        let client = LocalMirror::new(web.path());

        let publisher = Publisher::new(&client, &config);
        assert!(publisher.publish(true).await.unwrap().is_none());
        assert!(!web.path().join("main.info").exists());

        assert!(publisher.publish(false).await.unwrap().is_some());
        assert!(web.path().join("main.info").exists());
    }
}
