//! Channel and rule records read from the data store.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// Outcome of the most recent rule test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Untested,
    Passed,
    Failed,
    Skipped,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Untested => "untested",
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for TestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "untested" => Ok(TestStatus::Untested),
            "passed" => Ok(TestStatus::Passed),
            "failed" => Ok(TestStatus::Failed),
            "skipped" => Ok(TestStatus::Skipped),
            other => Err(format!("unknown test status: {other}")),
        }
    }
}

impl Default for TestStatus {
    fn default() -> Self {
        TestStatus::Untested
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A scored detection directive for SpamAssassin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    pub id: i64,
    /// Rule name, e.g. `LOCAL_PHARMA_SUBJECT`.
    pub name: String,
    /// Rule definition lines (header/body/describe, ...), without the score.
    pub body: String,
    pub score: f64,
    /// SpamAssassin version the rule targets.
    pub engine_version: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active: bool,
    /// Lifecycle status (development, stable, production, ...).
    pub status: String,
    /// SHA-256 hex digest of `body` as stored.
    pub hash: String,
    pub test_status: TestStatus,
}

impl Rule {
    /// Whether the stored hash still matches the rule body.
    pub fn hash_matches(&self) -> bool {
        self.hash.eq_ignore_ascii_case(&rule_hash(&self.body))
    }
}

/// SHA-256 hex digest of a rule body.
pub fn rule_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

/// A named bundle of rules distributed together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which channels a run covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChannelSelector {
    #[default]
    All,
    Id(i64),
    Name(String),
}

impl ChannelSelector {
    /// Interpret a command-line value: digits select by id, anything else by name.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.parse::<i64>() {
            Ok(id) if !value.starts_with('+') => ChannelSelector::Id(id),
            _ => ChannelSelector::Name(value.to_string()),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, ChannelSelector::All)
    }
}

impl std::fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelSelector::All => write!(f, "all"),
            ChannelSelector::Id(id) => write!(f, "id={id}"),
            ChannelSelector::Name(name) => write!(f, "name={name}"),
        }
    }
}

/// Build time and serial shared by every artifact of one run.
///
/// The serial is the build time in Unix seconds, so later builds always
/// carry a larger serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStamp {
    pub built_at: DateTime<Utc>,
    pub serial: i64,
}

impl BuildStamp {
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// Stamp for a fixed instant, truncated to whole seconds.
    pub fn at(time: DateTime<Utc>) -> Self {
        let built_at = time.trunc_subsecs(0);
        Self {
            built_at,
            serial: built_at.timestamp(),
        }
    }

    /// `2026-01-02T03:04:05Z`
    pub fn rfc3339(&self) -> String {
        self.built_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_status_roundtrip() {
        for status in [
            TestStatus::Untested,
            TestStatus::Passed,
            TestStatus::Failed,
            TestStatus::Skipped,
        ] {
            let parsed: TestStatus = status.as_str().parse().expect("Should parse");
            assert_eq!(status, parsed);
        }
        assert!("broken".parse::<TestStatus>().is_err());
        assert_eq!("PASSED".parse::<TestStatus>(), Ok(TestStatus::Passed));
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(ChannelSelector::parse("7"), ChannelSelector::Id(7));
        assert_eq!(
            ChannelSelector::parse("main"),
            ChannelSelector::Name("main".into())
        );
        assert_eq!(
            ChannelSelector::parse("+7"),
            ChannelSelector::Name("+7".into())
        );
        assert_eq!(ChannelSelector::Id(3).to_string(), "id=3");
        assert!(ChannelSelector::default().is_all());
    }

    #[test]
    fn test_rule_hash() {
        // sha256("abc")
        assert_eq!(
            rule_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_build_stamp_truncates_and_formats() {
        use chrono::TimeZone;

        let time = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(750);
        let stamp = BuildStamp::at(time);
        assert_eq!(stamp.rfc3339(), "2026-01-02T03:04:05Z");
        assert_eq!(stamp.serial, stamp.built_at.timestamp());
        assert!(BuildStamp::now().serial > stamp.serial);
    }
}
