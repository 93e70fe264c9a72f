//! The `<channel>.info` metadata record.

use crate::error::{ChannelError, Result};
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;

static SCORE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*score[ \t]+\S+").expect("score line regex must compile"));

/// Number of lines in a rule file that carry a `score` directive.
pub fn count_score_lines(contents: &str) -> usize {
    SCORE_LINE.find_iter(contents).count()
}

/// Metadata published next to each archive.
///
/// Rendered as `key: value` lines:
///
/// ```text
/// channel: main
/// built: 2026-01-02T03:04:05Z
/// rules: 3
/// serial: 1767323045
/// sha256: 9f86d0...
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub channel: String,
    pub built: String,
    pub rules: usize,
    pub serial: i64,
    /// SHA-256 of the archive bytes.
    pub sha256: String,
}

impl ArtifactInfo {
    pub fn render(&self) -> String {
        format!(
            "channel: {}\nbuilt: {}\nrules: {}\nserial: {}\nsha256: {}\n",
            self.channel, self.built, self.rules, self.serial, self.sha256
        )
    }
}

impl FromStr for ArtifactInfo {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self> {
        let mut channel = None;
        let mut built = None;
        let mut rules = None;
        let mut serial = None;
        let mut sha256 = None;

        for line in s.lines().filter(|l| !l.trim().is_empty()) {
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| ChannelError::Other(format!("malformed info line: {line:?}")))?;
            let value = value.trim().to_string();
            match key.trim() {
                "channel" => channel = Some(value),
                "built" => built = Some(value),
                "rules" => rules = Some(parse_number(&value, "rules")?),
                "serial" => serial = Some(parse_number(&value, "serial")?),
                "sha256" => sha256 = Some(value),
                other => return Err(ChannelError::Other(format!("unknown info key: {other}"))),
            }
        }

        let missing = |key: &str| ChannelError::Other(format!("info record is missing {key}"));
        Ok(Self {
            channel: channel.ok_or_else(|| missing("channel"))?,
            built: built.ok_or_else(|| missing("built"))?,
            rules: rules.ok_or_else(|| missing("rules"))?,
            serial: serial.ok_or_else(|| missing("serial"))?,
            sha256: sha256.ok_or_else(|| missing("sha256"))?,
        })
    }
}

fn parse_number<T: FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ChannelError::Other(format!("info {key} is not a number: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_score_lines() {
        let cf = "\
# score TEST_COMMENTED 1.0
header LOCAL_A Subject =~ /a/
score LOCAL_A 1.5
  score LOCAL_B 2.0
describe LOCAL_B has a score in its text
scoreboard LOCAL_C
score
";
        assert_eq!(count_score_lines(cf), 2);
        assert_eq!(count_score_lines(""), 0);
    }

    #[test]
    fn test_render_and_parse() {
        let info = ArtifactInfo {
            channel: "main".into(),
            built: "2026-01-02T03:04:05Z".into(),
            rules: 3,
            serial: 1_767_323_045,
            sha256: "ab".repeat(32),
        };
        let text = info.render();
        assert!(text.starts_with("channel: main\nbuilt: 2026-01-02T03:04:05Z\nrules: 3\n"));
        assert_eq!(text.parse::<ArtifactInfo>().unwrap(), info);
    }

    #[test]
    fn test_parse_rejects_incomplete_record() {
        assert!("channel: main\n".parse::<ArtifactInfo>().is_err());
        assert!("channel main\n".parse::<ArtifactInfo>().is_err());
        assert!("rules: many\n".parse::<ArtifactInfo>().is_err());
    }
}
