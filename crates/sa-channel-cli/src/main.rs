//! sa-channel - build, sign, publish and announce SpamAssassin rule channels.
//!
//! Loads the configuration, takes the run lock and drives the pipeline in
//! `sa-channel-core` once. Any fatal stage failure exits with status 1.

use anyhow::{Context, Result};
use clap::Parser;
use sa_channel_core::{
    ChannelConfig, ChannelSelector, Collaborators, Pipeline, RunContext, RunOptions,
    DEFAULT_CONFIG_FILE,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sa-channel", version)]
#[command(about = "Build, sign, publish and announce SpamAssassin rule channels")]
struct Args {
    /// Configuration file
    #[arg(default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Channel name or numeric id to build (default: all channels)
    #[arg(value_name = "CHANNEL")]
    channel_arg: Option<String>,

    /// Channel name or numeric id to build
    #[arg(long, value_name = "NAME|ID", conflicts_with = "channel_arg")]
    channel: Option<String>,

    /// Render and validate only; write nothing, publish nothing
    #[arg(long)]
    dry_run: bool,

    /// Continue when a rule file fails the engine lint
    #[arg(long)]
    force: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn selector(&self) -> ChannelSelector {
        self.channel
            .as_deref()
            .or(self.channel_arg.as_deref())
            .map(ChannelSelector::parse)
            .unwrap_or_default()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ChannelConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    init_logging(args.debug, config.log_file.as_deref())?;
    info!("Using configuration {}", args.config.display());

    let options = RunOptions {
        dry_run: args.dry_run,
        force: args.force,
        selector: args.selector(),
    };

    if let Err(e) = run(config, options).await {
        error!("{} stage failed: {}", e.stage(), e);
        return Err(e.into());
    }
    Ok(())
}

async fn run(config: ChannelConfig, options: RunOptions) -> sa_channel_core::Result<()> {
    let ctx = RunContext::new(config, options)?;
    ctx.lock().release_on_signal()?;

    let parts = Collaborators::from_config(&ctx.config, ctx.options.dry_run)?;
    Pipeline::new(&ctx, &parts).run().await?;
    Ok(())
}

/// Console logging, plus an append-mode copy in `log_file` when configured.
///
/// `RUST_LOG` overrides the default level unless `--debug` is given.
fn init_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Arc::new(file)))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_from_args() {
        let args = Args::parse_from(["sa-channel"]);
        assert_eq!(args.config, PathBuf::from("config.yaml"));
        assert!(args.selector().is_all());

        let args = Args::parse_from(["sa-channel", "site.yaml", "main"]);
        assert_eq!(args.selector(), ChannelSelector::Name("main".into()));

        let args = Args::parse_from(["sa-channel", "site.yaml", "--channel", "4", "--dry-run"]);
        assert_eq!(args.selector(), ChannelSelector::Id(4));
        assert!(args.dry_run);
        assert!(!args.force);
    }

    #[test]
    fn test_positional_and_flag_channel_conflict() {
        assert!(Args::try_parse_from(["sa-channel", "site.yaml", "main", "--channel", "other"]).is_err());
    }
}
