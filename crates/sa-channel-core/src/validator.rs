//! Rule-file validation.
//!
//! Each rendered file is staged into a private site-config directory and
//! linted by the rule engine. A lint failure is fatal unless forced. When
//! labelled corpora exist for the channel, every sample is classified and
//! the pass/fail counts are logged; corpus results never fail the run.

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::generator::GeneratedFile;
use crate::process::CommandSpec;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Result of a lint run.
#[derive(Debug, Clone)]
pub struct LintOutcome {
    pub passed: bool,
    /// Diagnostic output of the engine, kept for the log.
    pub diagnostics: String,
}

/// Classification of one sample message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Spam,
    Ham,
}

/// The rule engine, driven in diagnostic and classification mode.
#[async_trait]
pub trait RuleLinter: Send + Sync {
    /// Parse-check a staged rule file.
    async fn lint(&self, cf_path: &Path) -> Result<LintOutcome>;

    /// Classify a message with the staged rule file loaded.
    async fn classify(&self, cf_path: &Path, message: &Path) -> Result<Verdict>;
}

/// `spamassassin` binary in lint mode.
pub struct SpamAssassinLinter {
    binary: PathBuf,
    lint_timeout: Duration,
    classify_timeout: Duration,
}

impl SpamAssassinLinter {
    pub fn new(binary: impl Into<PathBuf>, lint_timeout: Duration, classify_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            lint_timeout,
            classify_timeout,
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(
            &config.spamassassin_bin,
            config.timeouts.lint(),
            config.timeouts.classify(),
        )
    }

    fn site_dir(cf_path: &Path) -> &Path {
        cf_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

#[async_trait]
impl RuleLinter for SpamAssassinLinter {
    async fn lint(&self, cf_path: &Path) -> Result<LintOutcome> {
        let output = CommandSpec::new(&self.binary, self.lint_timeout)
            .arg("--lint")
            .arg("--debug=config")
            .arg("--siteconfigpath")
            .arg(Self::site_dir(cf_path))
            .run()
            .await?;

        // With config debugging on, the engine names every file it reads;
        // no mention of ours means it never parsed it.
        let file_name = cf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let read_reported = output
            .stderr
            .lines()
            .any(|line| line.contains("read file") && line.contains(&file_name));

        Ok(LintOutcome {
            passed: output.success() && read_reported,
            diagnostics: output.stderr,
        })
    }

    async fn classify(&self, cf_path: &Path, message: &Path) -> Result<Verdict> {
        let input = std::fs::read(message).map_err(|e| ChannelError::io_with_path(e, message))?;
        let spec = CommandSpec::new(&self.binary, self.classify_timeout)
            .arg("--exit-code")
            .arg("--local")
            .arg("--siteconfigpath")
            .arg(Self::site_dir(cf_path))
            .stdin(input);
        let program = spec.program_name();
        let output = spec.run().await?;

        match output.status {
            Some(0) => Ok(Verdict::Ham),
            Some(1) => Ok(Verdict::Spam),
            status => Err(ChannelError::CommandFailed {
                program,
                status,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }
}

/// Classification results for one channel's corpora.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusSummary {
    pub spam_total: usize,
    pub spam_caught: usize,
    pub ham_total: usize,
    pub ham_passed: usize,
    /// Samples the engine could not classify.
    pub errors: usize,
}

impl CorpusSummary {
    pub fn all_passed(&self) -> bool {
        self.errors == 0 && self.spam_caught == self.spam_total && self.ham_passed == self.ham_total
    }
}

/// Validation result for one channel.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub channel: String,
    pub lint_passed: bool,
    /// Lint failed but the force override let the run continue.
    pub forced: bool,
    /// Validation disabled for this channel by configuration.
    pub skipped: bool,
    pub corpus: Option<CorpusSummary>,
}

/// Runs lint and corpus checks against generated files.
pub struct Validator<'a> {
    linter: &'a dyn RuleLinter,
    config: &'a ChannelConfig,
    force: bool,
}

impl<'a> Validator<'a> {
    pub fn new(linter: &'a dyn RuleLinter, config: &'a ChannelConfig, force: bool) -> Self {
        Self {
            linter,
            config,
            force,
        }
    }

    pub async fn validate(&self, file: &GeneratedFile) -> Result<ValidationReport> {
        let channel = file.channel.name.clone();

        if self.config.skip_validation_for(&channel) {
            info!("Validation skipped for channel '{}' by configuration", channel);
            return Ok(ValidationReport {
                channel,
                lint_passed: false,
                forced: false,
                skipped: true,
                corpus: None,
            });
        }

        let staging = tempfile::Builder::new()
            .prefix("sa-channel-lint-")
            .tempdir()
            .map_err(|e| ChannelError::Io {
                message: format!("failed to create lint staging directory: {}", e),
                path: None,
                source: Some(e),
            })?;
        let staged = staging.path().join(file.file_name());
        std::fs::write(&staged, &file.contents).map_err(|e| ChannelError::io_with_path(e, &staged))?;

        // An engine that cannot run counts as a failed lint.
        let outcome = match self.linter.lint(&staged).await {
            Ok(outcome) => outcome,
            Err(e) => LintOutcome {
                passed: false,
                diagnostics: e.to_string(),
            },
        };
        if outcome.passed {
            info!("Lint OK: {}", file.file_name());
        } else if self.force {
            warn!(
                "Lint failed for {} (continuing, force is set):\n{}",
                file.file_name(),
                outcome.diagnostics.trim()
            );
            return Ok(ValidationReport {
                channel,
                lint_passed: false,
                forced: true,
                skipped: false,
                corpus: None,
            });
        } else {
            error!(
                "Lint failed for {}:\n{}",
                file.file_name(),
                outcome.diagnostics.trim()
            );
            return Err(ChannelError::Validation {
                channel,
                message: format!("{} did not pass the rule engine lint", file.file_name()),
            });
        }

        let corpus = match self.corpus_dir(&channel) {
            Some(dir) => Some(self.run_corpus(&channel, &staged, &dir).await),
            None => None,
        };

        Ok(ValidationReport {
            channel,
            lint_passed: true,
            forced: false,
            skipped: false,
            corpus,
        })
    }

    fn corpus_dir(&self, channel: &str) -> Option<PathBuf> {
        let dir = self.config.corpora_dir.as_ref()?.join(channel);
        dir.is_dir().then_some(dir)
    }

    async fn run_corpus(&self, channel: &str, staged: &Path, dir: &Path) -> CorpusSummary {
        let mut summary = CorpusSummary::default();

        for (label, expected) in [("spam", Verdict::Spam), ("ham", Verdict::Ham)] {
            for message in sample_files(&dir.join(label)) {
                match self.linter.classify(staged, &message).await {
                    Ok(verdict) => {
                        let passed = verdict == expected;
                        match expected {
                            Verdict::Spam => {
                                summary.spam_total += 1;
                                summary.spam_caught += usize::from(passed);
                            }
                            Verdict::Ham => {
                                summary.ham_total += 1;
                                summary.ham_passed += usize::from(passed);
                            }
                        }
                        debug!(
                            "[{}] {} {}: {:?}",
                            channel,
                            if passed { "PASS" } else { "FAIL" },
                            message.display(),
                            verdict
                        );
                    }
                    Err(e) => {
                        summary.errors += 1;
                        warn!("[{}] could not classify {}: {}", channel, message.display(), e);
                    }
                }
            }
        }

        if summary.all_passed() {
            info!(
                "Corpus OK for '{}': {}/{} spam caught, {}/{} ham passed",
                channel, summary.spam_caught, summary.spam_total, summary.ham_passed, summary.ham_total
            );
        } else {
            warn!(
                "Corpus mismatches for '{}': {}/{} spam caught, {}/{} ham passed, {} errors",
                channel,
                summary.spam_caught,
                summary.spam_total,
                summary.ham_passed,
                summary.ham_total,
                summary.errors
            );
        }
        summary
    }
}

/// Regular files directly inside `dir`, sorted by name.
fn sample_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}
