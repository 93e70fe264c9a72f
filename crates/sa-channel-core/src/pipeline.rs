//! Pipeline orchestration.
//!
//! Runs the stages strictly in order under the run lock:
//! generate, validate, package, publish, announce. A fatal error in any
//! stage stops the run before the next one starts. Dry-run mode renders and
//! validates but writes nothing and mutates nothing remote.

use crate::announcer::{AnnounceReport, Announcer, NsupdateClient, RemoteShell, SshShell, ZoneUpdater};
use crate::config::ChannelConfig;
use crate::error::{Result, Stage};
use crate::generator::{GeneratedFile, MiniJinjaRenderer, RuleFileGenerator, TemplateRenderer};
use crate::lock::RunLock;
use crate::models::{BuildStamp, ChannelSelector};
use crate::packager::{Archiver, Artifact, GpgSigner, Packager, Signer, TarBz2Archiver};
use crate::publisher::{sync_client_for, Publisher, SyncClient, SyncSummary};
use crate::store::{DataStore, SqliteStore};
use crate::validator::{RuleLinter, SpamAssassinLinter, ValidationReport, Validator};
use tracing::info;

/// Per-run switches, from the command line merged with `build.*`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub force: bool,
    pub selector: ChannelSelector,
}

impl RunOptions {
    /// Command-line flags can turn options on but never off.
    pub fn merged_with(mut self, config: &ChannelConfig) -> Self {
        self.dry_run |= config.build.dry_run;
        self.force |= config.build.force;
        self
    }
}

/// Everything one run owns: configuration, options, build stamp and the
/// run lock, released when the context is dropped.
#[derive(Debug)]
pub struct RunContext {
    pub config: ChannelConfig,
    pub options: RunOptions,
    pub stamp: BuildStamp,
    lock: RunLock,
}

impl RunContext {
    /// Take the run lock. Fails fast if another run holds it.
    pub fn new(config: ChannelConfig, options: RunOptions) -> Result<Self> {
        let lock = RunLock::acquire(&config.lock_file)?;
        let options = options.merged_with(&config);
        Ok(Self {
            config,
            options,
            stamp: BuildStamp::now(),
            lock,
        })
    }

    pub fn lock(&self) -> &RunLock {
        &self.lock
    }
}

/// The external capabilities a run drives.
pub struct Collaborators {
    pub store: Box<dyn DataStore>,
    pub renderer: Box<dyn TemplateRenderer>,
    pub linter: Box<dyn RuleLinter>,
    pub archiver: Box<dyn Archiver>,
    pub signer: Box<dyn Signer>,
    pub sync: Box<dyn SyncClient>,
    pub zone: Box<dyn ZoneUpdater>,
    pub shell: Box<dyn RemoteShell>,
}

impl Collaborators {
    /// Production implementations for a configuration. A dry run opens the
    /// rule database read-only.
    pub fn from_config(config: &ChannelConfig, dry_run: bool) -> Result<Self> {
        let store = if dry_run {
            SqliteStore::open_read_only(&config.database.path)?
        } else {
            SqliteStore::open(&config.database.path)?
        };
        Ok(Self {
            store: Box::new(store),
            renderer: Box::new(MiniJinjaRenderer::from_dir(&config.templates_dir)?),
            linter: Box::new(SpamAssassinLinter::from_config(config)),
            archiver: Box::new(TarBz2Archiver),
            signer: Box::new(GpgSigner::from_config(config)?),
            sync: sync_client_for(config),
            zone: Box::new(NsupdateClient::from_config(config)),
            shell: Box::new(SshShell::from_config(config)),
        })
    }
}

/// What a run did.
#[derive(Debug, Default)]
pub struct RunReport {
    pub files: Vec<GeneratedFile>,
    pub validations: Vec<ValidationReport>,
    pub artifacts: Vec<Artifact>,
    pub published: Option<SyncSummary>,
    pub announcement: Option<AnnounceReport>,
}

pub struct Pipeline<'a> {
    ctx: &'a RunContext,
    parts: &'a Collaborators,
}

impl<'a> Pipeline<'a> {
    pub fn new(ctx: &'a RunContext, parts: &'a Collaborators) -> Self {
        Self { ctx, parts }
    }

    pub async fn run(&self) -> Result<RunReport> {
        let config = &self.ctx.config;
        let options = &self.ctx.options;
        let mut report = RunReport::default();

        info!(
            "Starting build serial {} ({}) for {}{}{}",
            self.ctx.stamp.serial,
            self.ctx.stamp.rfc3339(),
            options.selector,
            if options.dry_run { ", dry-run" } else { "" },
            if options.force { ", force" } else { "" }
        );

        stage_banner(Stage::Generate);
        let generator =
            RuleFileGenerator::new(self.parts.store.as_ref(), self.parts.renderer.as_ref(), config);
        report.files = generator.generate(&options.selector, options.dry_run)?;
        if report.files.is_empty() {
            info!("Nothing to build");
            return Ok(report);
        }

        stage_banner(Stage::Validate);
        let validator = Validator::new(self.parts.linter.as_ref(), config, options.force);
        for file in &report.files {
            report.validations.push(validator.validate(file).await?);
        }

        if options.dry_run {
            for file in &report.files {
                info!(
                    "[dry-run] would package {} ({} rules) signed with {}",
                    file.file_name(),
                    file.rule_count,
                    config.signing_key_for(&file.channel.name)
                );
            }
        } else {
            stage_banner(Stage::Package);
            let packager = Packager::new(
                self.parts.archiver.as_ref(),
                self.parts.signer.as_ref(),
                config,
                self.ctx.stamp,
            );
            report.artifacts = packager.package_all(&report.files).await?;
        }

        stage_banner(Stage::Publish);
        report.published = Publisher::new(self.parts.sync.as_ref(), config)
            .publish(options.dry_run)
            .await?;

        stage_banner(Stage::Announce);
        report.announcement = Some(
            Announcer::new(self.parts.zone.as_ref(), self.parts.shell.as_ref(), config)
                .announce(&self.ctx.stamp, options.dry_run)
                .await?,
        );

        info!(
            "Build {} finished: {} channel(s), {} artifact set(s)",
            self.ctx.stamp.serial,
            report.files.len(),
            report.artifacts.len()
        );
        Ok(report)
    }
}

fn stage_banner(stage: Stage) {
    info!("--- {} ---", stage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::MINIMAL;

    #[test]
    fn test_options_merge_only_enables() {
        let mut config = ChannelConfig::from_yaml(MINIMAL).unwrap();
        config.build.dry_run = true;

        let merged = RunOptions::default().merged_with(&config);
        assert!(merged.dry_run);
        assert!(!merged.force);

        config.build.dry_run = false;
        let merged = RunOptions {
            force: true,
            ..Default::default()
        }
        .merged_with(&config);
        assert!(merged.force);
        assert!(!merged.dry_run);
    }

    #[test]
    fn test_context_holds_lock_until_dropped() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = ChannelConfig::from_yaml(MINIMAL).unwrap();
        config.lock_file = temp_dir.path().join("run.lock");

        let ctx = RunContext::new(config.clone(), RunOptions::default()).unwrap();
        assert!(ctx.lock().path().exists());
        assert!(RunContext::new(config.clone(), RunOptions::default()).is_err());

        drop(ctx);
        assert!(!config.lock_file.exists());
    }
}
