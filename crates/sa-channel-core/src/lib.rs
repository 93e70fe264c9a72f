//! SA Channel Core - build and publish SpamAssassin rule update channels.
//!
//! Rules and channels live in a relational store. A run renders one rule
//! file per channel, lints it with the rule engine, packs and signs it,
//! syncs the artifacts to the distribution server and announces the new
//! serial in DNS. The command-line front end lives in `sa-channel-cli`.
//!
//! # Example
//!
//! ```rust,ignore
//! use sa_channel_core::{ChannelConfig, Collaborators, Pipeline, RunContext, RunOptions};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> sa_channel_core::Result<()> {
//!     let config = ChannelConfig::load("config.yaml")?;
//!     let ctx = RunContext::new(config, RunOptions::default())?;
//!     let parts = Collaborators::from_config(&ctx.config, ctx.options.dry_run)?;
//!
//!     let report = Pipeline::new(&ctx, &parts).run().await?;
//!     println!("Built {} channel(s)", report.files.len());
//!     Ok(())
//! }
//! ```

pub mod announcer;
pub mod config;
pub mod error;
pub mod generator;
pub mod lock;
pub mod models;
pub mod packager;
pub mod pipeline;
pub mod process;
pub mod publisher;
pub mod store;
pub mod validator;

mod atomic;

// Re-export commonly used types
pub use announcer::{
    AnnounceReport, Announcer, NsupdateClient, RefreshSummary, RemoteShell, SshShell, TxtRecord,
    ZoneUpdater,
};
pub use config::{ChannelConfig, DEFAULT_CONFIG_FILE, PASSPHRASE_ENV};
pub use error::{ChannelError, Result, Stage};
pub use generator::{
    ChannelContext, ChannelMarker, GeneratedFile, MiniJinjaRenderer, RuleFileGenerator,
    TemplateRenderer, CHANNEL_MARKER,
};
pub use lock::RunLock;
pub use models::{BuildStamp, Channel, ChannelSelector, Rule, TestStatus};
pub use packager::{
    count_score_lines, Archiver, Artifact, ArtifactInfo, GpgSigner, Packager, Signer,
    TarBz2Archiver,
};
pub use pipeline::{Collaborators, Pipeline, RunContext, RunOptions, RunReport};
pub use publisher::{LocalMirror, Publisher, RsyncClient, SyncClient, SyncSummary};
pub use store::{DataStore, NewChannel, NewRule, RuleQuery, SqliteStore};
pub use validator::{
    CorpusSummary, LintOutcome, RuleLinter, SpamAssassinLinter, ValidationReport, Validator,
    Verdict,
};
