//! Build announcement.
//!
//! After a successful publish the new serial is announced in DNS, then each
//! configured test host is told to refresh from the channel. Both steps are
//! best effort unless the failure policy makes them fatal.

mod dns;
mod remote;

pub use dns::{NsupdateClient, TxtRecord, ZoneUpdater, ANNOUNCEMENT_TAG};
pub use remote::{RemoteShell, SshShell};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::models::BuildStamp;
use tracing::{info, warn};

/// Outcome of the refresh trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

/// Outcome of the announcement stage.
#[derive(Debug, Clone, Default)]
pub struct AnnounceReport {
    pub record: Option<TxtRecord>,
    /// False when the update failed non-fatally or in dry-run.
    pub dns_updated: bool,
    pub refresh: RefreshSummary,
}

pub struct Announcer<'a> {
    zone: &'a dyn ZoneUpdater,
    shell: &'a dyn RemoteShell,
    config: &'a ChannelConfig,
}

impl<'a> Announcer<'a> {
    pub fn new(zone: &'a dyn ZoneUpdater, shell: &'a dyn RemoteShell, config: &'a ChannelConfig) -> Self {
        Self { zone, shell, config }
    }

    pub async fn announce(&self, stamp: &BuildStamp, dry_run: bool) -> Result<AnnounceReport> {
        let record = TxtRecord::announcement(self.config, stamp);

        if dry_run {
            info!(
                "[dry-run] would set TXT {} {} \"{}\" via {}",
                record.name, record.ttl, record.value, self.config.dns.server
            );
            for host in &self.config.test_hosts {
                info!("[dry-run] would refresh {}", host);
            }
            return Ok(AnnounceReport {
                record: Some(record),
                ..Default::default()
            });
        }

        let dns_updated = self.update_dns(&record).await?;
        let refresh = self.trigger_refresh().await?;
        Ok(AnnounceReport {
            record: Some(record),
            dns_updated,
            refresh,
        })
    }

    async fn update_dns(&self, record: &TxtRecord) -> Result<bool> {
        match self.zone.replace_txt(record).await {
            Ok(()) => {
                info!("Announced {} TXT \"{}\"", record.name, record.value);
                Ok(true)
            }
            Err(e) if self.config.policy.dns_failure_fatal => Err(match e {
                ChannelError::Announcement { .. } => e,
                other => ChannelError::Announcement {
                    message: other.to_string(),
                },
            }),
            Err(e) => {
                warn!("DNS announcement failed, continuing: {}", e);
                Ok(false)
            }
        }
    }

    /// Refresh every test host; one failure does not skip the rest.
    async fn trigger_refresh(&self) -> Result<RefreshSummary> {
        let mut summary = RefreshSummary::default();
        if self.config.test_hosts.is_empty() {
            return Ok(summary);
        }

        let command = self.config.refresh_command();
        for host in &self.config.test_hosts {
            match self.shell.run(host, &command).await {
                Ok(()) => {
                    info!("Refreshed {}", host);
                    summary.refreshed.push(host.clone());
                }
                Err(e) => {
                    warn!("Refresh failed on {}: {}", host, e);
                    summary.failed.push(host.clone());
                }
            }
        }

        if self.config.policy.refresh_failure_fatal && !summary.failed.is_empty() {
            return Err(ChannelError::Refresh {
                host: summary.failed.join(", "),
                message: format!(
                    "{} of {} test hosts did not refresh",
                    summary.failed.len(),
                    self.config.test_hosts.len()
                ),
            });
        }
        Ok(summary)
    }
}
