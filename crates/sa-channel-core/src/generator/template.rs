//! Channel template rendering.

use crate::error::{ChannelError, Result};
use crate::models::{Channel, Rule};
use minijinja::{path_loader, Environment, UndefinedBehavior};
use serde::Serialize;
use std::path::Path;

/// Template file name looked up in the templates directory.
pub const CHANNEL_TEMPLATE: &str = "channel.cf.j2";

/// Values available to the channel template.
///
/// Everything here is derived from stored data so the same data always
/// renders the same text.
#[derive(Debug, Serialize)]
pub struct ChannelContext<'a> {
    pub channel: &'a Channel,
    pub rules: &'a [Rule],
    pub rule_count: usize,
    pub signing_key: &'a str,
    pub domain: &'a str,
    /// Latest modification time of the channel or any of its rules.
    pub last_modified: String,
}

/// Renders one channel into rule-configuration text.
pub trait TemplateRenderer: Send + Sync {
    fn render_channel(&self, context: &ChannelContext<'_>) -> Result<String>;
}

/// Jinja2-compatible renderer backed by minijinja.
pub struct MiniJinjaRenderer {
    env: Environment<'static>,
}

impl MiniJinjaRenderer {
    /// Load `channel.cf.j2` from `dir`.
    ///
    /// A missing or malformed template fails here, before any channel is
    /// rendered.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let template_path = dir.join(CHANNEL_TEMPLATE);
        if !template_path.is_file() {
            return Err(ChannelError::Template {
                message: format!("template {} not found", template_path.display()),
                source: None,
            });
        }

        let mut env = Self::environment();
        env.set_loader(path_loader(dir));
        env.get_template(CHANNEL_TEMPLATE).map(|_| ())?;
        Ok(Self { env })
    }

    /// Use `source` as the channel template.
    pub fn from_source(source: &str) -> Result<Self> {
        let mut env = Self::environment();
        env.add_template_owned(CHANNEL_TEMPLATE, source.to_string())?;
        Ok(Self { env })
    }

    fn environment() -> Environment<'static> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env
    }
}

impl TemplateRenderer for MiniJinjaRenderer {
    fn render_channel(&self, context: &ChannelContext<'_>) -> Result<String> {
        let template = self.env.get_template(CHANNEL_TEMPLATE)?;
        template.render(context).map_err(|e| ChannelError::Template {
            message: format!("failed to render channel {}: {}", context.channel.name, e),
            source: Some(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn channel() -> Channel {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        Channel {
            id: 1,
            name: "main".into(),
            description: None,
            is_default: true,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn context<'a>(channel: &'a Channel, rules: &'a [Rule]) -> ChannelContext<'a> {
        ChannelContext {
            channel,
            rules,
            rule_count: rules.len(),
            signing_key: "channel@example.org",
            domain: "updates.example.org",
            last_modified: "2026-01-02T03:04:05Z".into(),
        }
    }

    #[test]
    fn test_render_from_source() {
        let renderer =
            MiniJinjaRenderer::from_source("# {{ channel.name }} via {{ signing_key }}\n").unwrap();
        let channel = channel();
        let text = renderer.render_channel(&context(&channel, &[])).unwrap();
        assert_eq!(text, "# main via channel@example.org\n");
    }

    #[test]
    fn test_undefined_variable_is_template_error() {
        let renderer = MiniJinjaRenderer::from_source("{{ not_there }}").unwrap();
        let channel = channel();
        let err = renderer.render_channel(&context(&channel, &[])).unwrap_err();
        assert!(matches!(err, ChannelError::Template { .. }));
    }

    #[test]
    fn test_malformed_template_is_template_error() {
        let err = MiniJinjaRenderer::from_source("{% for rule in rules %}").err().unwrap();
        assert!(matches!(err, ChannelError::Template { .. }));
    }

    #[test]
    fn test_missing_template_dir() {
        let temp_dir = TempDir::new().unwrap();
        let err = MiniJinjaRenderer::from_dir(temp_dir.path()).err().unwrap();
        assert!(err.to_string().contains(CHANNEL_TEMPLATE));
    }

    #[test]
    fn test_from_dir_loads_template() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CHANNEL_TEMPLATE),
            "{% for rule in rules %}x{% endfor %}{{ rule_count }}\n",
        )
        .unwrap();
        let renderer = MiniJinjaRenderer::from_dir(temp_dir.path()).unwrap();
        let channel = channel();
        assert_eq!(
            renderer.render_channel(&context(&channel, &[])).unwrap(),
            "0\n"
        );
    }
}
