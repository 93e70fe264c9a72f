//! Data store trait and query types.

use crate::error::Result;
use crate::models::{Channel, ChannelSelector, Rule};

/// Filter applied when selecting the rules of one channel.
#[derive(Debug, Clone)]
pub struct RuleQuery {
    /// Lifecycle status a rule must have to be published.
    pub status: String,
    /// Restrict to one engine version.
    pub engine_version: Option<String>,
}

impl Default for RuleQuery {
    fn default() -> Self {
        Self {
            status: "production".to_string(),
            engine_version: None,
        }
    }
}

/// Read access to channels and their rules.
///
/// All operations are synchronous to match rusqlite's API.
pub trait DataStore: Send + Sync {
    /// Channels matching the selector, ordered by name.
    fn channels(&self, selector: &ChannelSelector) -> Result<Vec<Channel>>;

    /// Active rules of a channel that match the query, ordered by rule name.
    fn active_rules(&self, channel_id: i64, query: &RuleQuery) -> Result<Vec<Rule>>;
}
