//! Packaging and signing.
//!
//! Each generated rule file becomes an artifact set in the output directory:
//!
//! - `<channel>.tar.bz2` holding `<channel>.cf`
//! - `<channel>.tar.bz2.asc`, an armored detached signature of the archive
//! - `<channel>.info`, see [`ArtifactInfo`]
//!
//! The archive and signature are written under staging names and only
//! renamed into place once signing succeeded, so a failed signature never
//! leaves an unsigned archive behind.

mod archive;
mod info;
mod signer;

pub use archive::{Archiver, TarBz2Archiver};
pub use info::{count_score_lines, ArtifactInfo};
pub use signer::{GpgSigner, Passphrase, Signer};

use crate::atomic::{atomic_write, staging_path};
use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::generator::GeneratedFile;
use crate::models::BuildStamp;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// A packaged and signed channel build.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub channel: String,
    pub archive: PathBuf,
    pub signature: PathBuf,
    pub info_path: PathBuf,
    pub info: ArtifactInfo,
}

/// Archives, signs and describes generated rule files.
pub struct Packager<'a> {
    archiver: &'a dyn Archiver,
    signer: &'a dyn Signer,
    config: &'a ChannelConfig,
    stamp: BuildStamp,
}

impl<'a> Packager<'a> {
    pub fn new(
        archiver: &'a dyn Archiver,
        signer: &'a dyn Signer,
        config: &'a ChannelConfig,
        stamp: BuildStamp,
    ) -> Self {
        Self {
            archiver,
            signer,
            config,
            stamp,
        }
    }

    /// Package every file.
    ///
    /// A failing channel does not stop the others; if any failed, the whole
    /// call fails with [`ChannelError::PackagingAborted`] so nothing is
    /// published.
    pub async fn package_all(&self, files: &[GeneratedFile]) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::with_capacity(files.len());
        let mut failed = Vec::new();

        for file in files {
            match self.package(file).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    error!("Packaging failed for channel '{}': {}", file.channel.name, e);
                    failed.push(file.channel.name.clone());
                }
            }
        }

        if failed.is_empty() {
            Ok(artifacts)
        } else {
            Err(ChannelError::PackagingAborted { failed })
        }
    }

    /// Package one channel.
    pub async fn package(&self, file: &GeneratedFile) -> Result<Artifact> {
        let channel = file.channel.name.as_str();
        let output_dir = &self.config.output_dir;
        let archive_path = output_dir.join(format!("{}.{}", channel, self.archiver.extension()));
        let signature_path = signature_path_for(&archive_path);
        let info_path = output_dir.join(format!("{channel}.info"));

        let bytes = self
            .archiver
            .archive(&file.file_name(), file.contents.as_bytes(), &self.stamp)
            .map_err(|e| ChannelError::Archive {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;

        let staged_archive = staging_path(&archive_path);
        let staged_signature = staging_path(&signature_path);
        let staged = StagedFiles(vec![staged_archive.clone(), staged_signature.clone()]);

        fs::write(&staged_archive, &bytes).map_err(|e| ChannelError::Archive {
            channel: channel.to_string(),
            message: format!("failed to write {}: {}", staged_archive.display(), e),
        })?;

        let key = self.config.signing_key_for(channel);
        self.signer
            .sign(&staged_archive, &staged_signature, key)
            .await
            .map_err(|e| ChannelError::Signing {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;

        promote(&staged_archive, &archive_path, channel)?;
        promote(&staged_signature, &signature_path, channel)?;
        staged.disarm();

        let info = ArtifactInfo {
            channel: channel.to_string(),
            built: self.stamp.rfc3339(),
            rules: count_score_lines(&file.contents),
            serial: self.stamp.serial,
            sha256: hex::encode(Sha256::digest(&bytes)),
        };
        atomic_write(&info_path, info.render().as_bytes())?;

        info!(
            "Packaged '{}': {} ({} bytes, {} rules), signed with {}",
            channel,
            archive_path.display(),
            bytes.len(),
            info.rules,
            key
        );

        Ok(Artifact {
            channel: channel.to_string(),
            archive: archive_path,
            signature: signature_path,
            info_path,
            info,
        })
    }
}

/// `<archive>.asc`
pub fn signature_path_for(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".asc");
    PathBuf::from(name)
}

fn promote(staged: &Path, target: &Path, channel: &str) -> Result<()> {
    fs::rename(staged, target).map_err(|e| ChannelError::Archive {
        channel: channel.to_string(),
        message: format!("failed to move {} into place: {}", target.display(), e),
    })
}

/// Removes staged files on drop unless disarmed.
struct StagedFiles(Vec<PathBuf>);

impl StagedFiles {
    fn disarm(mut self) {
        self.0.clear();
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            let _ = fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_path_for() {
        assert_eq!(
            signature_path_for(Path::new("/build/main.tar.bz2")),
            PathBuf::from("/build/main.tar.bz2.asc")
        );
    }

    #[test]
    fn test_staged_files_removed_unless_disarmed() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        drop(StagedFiles(vec![a.clone()]));
        assert!(!a.exists());

        StagedFiles(vec![b.clone()]).disarm();
        assert!(b.exists());
    }
}
