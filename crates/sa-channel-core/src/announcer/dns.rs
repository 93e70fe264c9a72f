//! DNS TXT announcement via dynamic update.

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::models::BuildStamp;
use crate::process::CommandSpec;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Protocol tag leading every announcement value.
pub const ANNOUNCEMENT_TAG: &str = "sa-channel/1";

/// A TXT record to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    /// Fully qualified, with trailing dot.
    pub name: String,
    pub ttl: u32,
    pub value: String,
}

impl TxtRecord {
    /// The announcement record for a build.
    pub fn announcement(config: &ChannelConfig, stamp: &BuildStamp) -> Self {
        Self {
            name: config.announcement_name(),
            ttl: config.dns.ttl,
            value: format!(
                "{} serial={} built={}",
                ANNOUNCEMENT_TAG,
                stamp.serial,
                stamp.rfc3339()
            ),
        }
    }
}

/// Replaces TXT records in a zone.
#[async_trait]
pub trait ZoneUpdater: Send + Sync {
    /// Delete every TXT record at `record.name` and add `record`, in one
    /// transaction.
    async fn replace_txt(&self, record: &TxtRecord) -> Result<()>;
}

/// `nsupdate` client, optionally authenticated with a TSIG key file.
#[derive(Debug, Clone)]
pub struct NsupdateClient {
    binary: PathBuf,
    server: String,
    zone: String,
    key_file: Option<PathBuf>,
    timeout: Duration,
}

impl NsupdateClient {
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            binary: config.dns.nsupdate_bin.clone(),
            server: config.dns.server.clone(),
            zone: config.dns.zone.trim_end_matches('.').to_string(),
            key_file: config.dns.key_file.clone(),
            timeout: config.timeouts.dns(),
        }
    }

    /// The update script fed to nsupdate on stdin.
    pub fn script(&self, record: &TxtRecord) -> String {
        format!(
            "server {server}\nzone {zone}\nupdate delete {name} TXT\nupdate add {name} {ttl} TXT \"{value}\"\nsend\n",
            server = self.server,
            zone = self.zone,
            name = record.name,
            ttl = record.ttl,
            value = escape_txt(&record.value),
        )
    }
}

#[async_trait]
impl ZoneUpdater for NsupdateClient {
    async fn replace_txt(&self, record: &TxtRecord) -> Result<()> {
        let mut spec = CommandSpec::new(&self.binary, self.timeout);
        if let Some(key_file) = &self.key_file {
            spec = spec.arg("-k").arg(key_file);
        }
        spec.stdin(self.script(record))
            .run_checked()
            .await
            .map_err(|e| ChannelError::Announcement {
                message: format!("updating {} via {} failed: {}", record.name, self.server, e),
            })?;
        Ok(())
    }
}

fn escape_txt(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::MINIMAL;
    use chrono::{TimeZone, Utc};

    fn stamp() -> BuildStamp {
        BuildStamp::at(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap())
    }

    #[test]
    fn test_announcement_record() {
        let config = ChannelConfig::from_yaml(MINIMAL).unwrap();
        let record = TxtRecord::announcement(&config, &stamp());
        assert_eq!(record.name, "updates.example.org.");
        assert_eq!(record.ttl, 300);
        assert_eq!(
            record.value,
            format!("sa-channel/1 serial={} built=2026-01-02T03:04:05Z", stamp().serial)
        );
    }

    #[test]
    fn test_nsupdate_script() {
        let config = ChannelConfig::from_yaml(MINIMAL).unwrap();
        let client = NsupdateClient::from_config(&config);
        let record = TxtRecord {
            name: "updates.example.org.".into(),
            ttl: 60,
            value: "say \"hi\"".into(),
        };
        assert_eq!(
            client.script(&record),
            "server ns1.example.org\n\
             zone example.org\n\
             update delete updates.example.org. TXT\n\
             update add updates.example.org. 60 TXT \"say \\\"hi\\\"\"\n\
             send\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nsupdate_failure_is_announcement_error() {
        let mut config = ChannelConfig::from_yaml(MINIMAL).unwrap();
        config.dns.nsupdate_bin = PathBuf::from("false");
        let client = NsupdateClient::from_config(&config);
        let err = client
            .replace_txt(&TxtRecord::announcement(&config, &stamp()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Announcement { .. }));
    }
}
