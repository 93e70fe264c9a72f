//! Rule data store.
//!
//! The pipeline only reads channels and rules; the store behind the
//! [`DataStore`] trait owns the records. [`SqliteStore`] is the bundled
//! backend and creates the `rules`, `channels` and `channel_rules` tables on
//! first open.

mod sqlite;
mod traits;

pub use sqlite::{NewChannel, NewRule, SqliteStore};
pub use traits::{DataStore, RuleQuery};
