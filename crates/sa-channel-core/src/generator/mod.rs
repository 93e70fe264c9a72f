//! Rule-file generation.
//!
//! Reads each selected channel's active rules from the [`DataStore`] and
//! renders them through a [`TemplateRenderer`] into `<output_dir>/<channel>.cf`.
//! In dry-run mode the files are rendered but not written.

mod template;

pub use template::{ChannelContext, MiniJinjaRenderer, TemplateRenderer, CHANNEL_TEMPLATE};

use crate::atomic::atomic_write;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::models::{Channel, ChannelSelector, Rule, TestStatus};
use crate::store::{DataStore, RuleQuery};
use std::path::PathBuf;
use tracing::{info, warn};

/// A rendered channel file.
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    pub channel: Channel,
    /// Destination `<output_dir>/<channel>.cf`.
    pub path: PathBuf,
    pub contents: String,
    /// Number of rules rendered into the file.
    pub rule_count: usize,
    /// False in dry-run mode.
    pub written: bool,
}

impl GeneratedFile {
    /// File name of the `.cf` file.
    pub fn file_name(&self) -> String {
        format!("{}.cf", self.channel.name)
    }
}

/// Prefix of the machine-readable header line naming a file's channel and
/// signing identity. It is a comment to the rule engine.
pub const CHANNEL_MARKER: &str = "#@sa-channel";

/// Parsed [`CHANNEL_MARKER`] line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMarker {
    pub channel: String,
    pub signing_key: String,
}

impl ChannelMarker {
    /// First marker line in `contents`, if any carries both fields.
    pub fn find(contents: &str) -> Option<Self> {
        contents.lines().find_map(|line| {
            let fields = line.trim().strip_prefix(CHANNEL_MARKER)?;
            let mut channel = None;
            let mut signing_key = None;
            for field in fields.split_whitespace() {
                match field.split_once('=') {
                    Some(("channel", v)) => channel = Some(v.to_string()),
                    Some(("signing-key", v)) => signing_key = Some(v.to_string()),
                    _ => {}
                }
            }
            Some(Self {
                channel: channel?,
                signing_key: signing_key?,
            })
        })
    }
}

/// Renders channel rule files from the data store.
pub struct RuleFileGenerator<'a> {
    store: &'a dyn DataStore,
    renderer: &'a dyn TemplateRenderer,
    config: &'a ChannelConfig,
}

impl<'a> RuleFileGenerator<'a> {
    pub fn new(
        store: &'a dyn DataStore,
        renderer: &'a dyn TemplateRenderer,
        config: &'a ChannelConfig,
    ) -> Self {
        Self {
            store,
            renderer,
            config,
        }
    }

    fn rule_query(&self) -> RuleQuery {
        RuleQuery {
            status: self.config.rule_status.clone(),
            engine_version: self.config.engine_version.clone(),
        }
    }

    /// Render every selected channel.
    ///
    /// An explicit selector that matches no channel is an error; an
    /// unfiltered run over an empty store returns no files.
    pub fn generate(&self, selector: &ChannelSelector, dry_run: bool) -> Result<Vec<GeneratedFile>> {
        let channels = self.store.channels(selector)?;
        if channels.is_empty() {
            if selector.is_all() {
                warn!("No channels found in the data store");
                return Ok(Vec::new());
            }
            return Err(ChannelError::ChannelNotFound {
                selector: selector.to_string(),
            });
        }

        let query = self.rule_query();
        let mut files = Vec::with_capacity(channels.len());
        for channel in channels {
            files.push(self.generate_channel(channel, &query, dry_run)?);
        }
        Ok(files)
    }

    fn generate_channel(
        &self,
        channel: Channel,
        query: &RuleQuery,
        dry_run: bool,
    ) -> Result<GeneratedFile> {
        check_file_name(&channel.name)?;
        info!("Generating .cf for channel '{}' (id {})", channel.name, channel.id);

        let rules = self.store.active_rules(channel.id, query)?;
        if rules.is_empty() {
            warn!(
                "Channel '{}' has no active {} rules; producing an empty file",
                channel.name, query.status
            );
        } else {
            info!("  {} active {} rules", rules.len(), query.status);
        }
        audit_rules(&channel, &rules);

        let context = ChannelContext {
            channel: &channel,
            rules: &rules,
            rule_count: rules.len(),
            signing_key: self.config.signing_key_for(&channel.name),
            domain: &self.config.domain,
            last_modified: last_modified(&channel, &rules),
        };
        let contents = self.renderer.render_channel(&context)?;
        check_marker(&channel, context.signing_key, &contents);

        let path = self.config.output_dir.join(format!("{}.cf", channel.name));
        if dry_run {
            info!(
                "  [dry-run] would write {} ({} bytes)",
                path.display(),
                contents.len()
            );
        } else {
            atomic_write(&path, contents.as_bytes())?;
            info!("  wrote {} ({} bytes)", path.display(), contents.len());
        }

        Ok(GeneratedFile {
            rule_count: rules.len(),
            channel,
            path,
            contents,
            written: !dry_run,
        })
    }
}

/// Warn about rules whose stored hash is stale or whose last test failed.
fn audit_rules(channel: &Channel, rules: &[Rule]) {
    for rule in rules {
        if !rule.hash_matches() {
            warn!(
                "Hash mismatch for rule {} in channel '{}'",
                rule.name, channel.name
            );
        }
        if rule.test_status == TestStatus::Failed {
            warn!(
                "Rule {} in channel '{}' is marked as failing its tests",
                rule.name, channel.name
            );
        }
    }
}

/// Warn when a custom template drops or garbles the channel marker.
fn check_marker(channel: &Channel, signing_key: &str, contents: &str) {
    match ChannelMarker::find(contents) {
        Some(m) if m.channel == channel.name && m.signing_key == signing_key => {}
        Some(m) => warn!(
            "Channel '{}' renders a marker for channel '{}' signed by {}",
            channel.name, m.channel, m.signing_key
        ),
        None => warn!(
            "Template output for channel '{}' has no {} line",
            channel.name, CHANNEL_MARKER
        ),
    }
}

fn last_modified(channel: &Channel, rules: &[Rule]) -> String {
    rules
        .iter()
        .map(|r| r.updated_at)
        .chain(std::iter::once(channel.updated_at))
        .max()
        .unwrap_or(channel.updated_at)
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Channel names become file names; refuse anything that could escape the
/// output directory.
fn check_file_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ChannelError::Database {
            message: format!("channel name {name:?} is not usable as a file name"),
            source: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_file_name() {
        assert!(check_file_name("main").is_ok());
        assert!(check_file_name("local-rules_v2.x").is_ok());
        assert!(check_file_name("").is_err());
        assert!(check_file_name("../etc").is_err());
        assert!(check_file_name(".hidden").is_err());
        assert!(check_file_name("a/b").is_err());
    }

    #[test]
    fn test_channel_marker_parsing() {
        let text = "# header\n#@sa-channel channel=main signing-key=0xDEADBEEF\nbody X /x/\n";
        assert_eq!(
            ChannelMarker::find(text),
            Some(ChannelMarker {
                channel: "main".into(),
                signing_key: "0xDEADBEEF".into(),
            })
        );
        assert_eq!(ChannelMarker::find("#@sa-channel channel=main\n"), None);
        assert_eq!(ChannelMarker::find("# sa-channel channel=main signing-key=k\n"), None);
    }
}
