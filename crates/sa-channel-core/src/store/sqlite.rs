//! SQLite-backed rule store.

use super::traits::{DataStore, RuleQuery};
use crate::error::{ChannelError, Result};
use crate::models::{rule_hash, Channel, ChannelSelector, Rule, TestStatus};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

const CHANNEL_COLUMNS: &str = "id, name, description, is_default, created_at, updated_at";

const RULES_FOR_CHANNEL: &str = r#"
    SELECT r.id, r.rule_name, r.rule, r.score, r.sa_version, r.author, r.description,
           r.created_at, r.updated_at, r.active, r.status, r.rule_hash, r.test_status
    FROM rules r
    JOIN channel_rules cr ON r.id = cr.rule_id
    WHERE cr.channel_id = ?1
      AND r.active = 1
      AND r.status = ?2
      AND (?3 IS NULL OR r.sa_version = ?3)
    ORDER BY r.rule_name
"#;

/// Channel to insert.
#[derive(Debug, Clone, Default)]
pub struct NewChannel {
    pub name: String,
    pub description: Option<String>,
    pub is_default: bool,
}

/// Rule to insert. The content hash is computed from `body`.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub name: String,
    pub body: String,
    pub score: f64,
    pub engine_version: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub active: bool,
    pub status: String,
    pub test_status: TestStatus,
}

impl NewRule {
    /// An active production rule with default metadata.
    pub fn production(name: &str, body: &str, score: f64) -> Self {
        Self {
            name: name.to_string(),
            body: body.to_string(),
            score,
            engine_version: "4.0.0".to_string(),
            author: None,
            description: None,
            active: true,
            status: "production".to_string(),
            test_status: TestStatus::Untested,
        }
    }
}

/// Rule store backed by a SQLite database.
///
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database at `db_path`, creating tables if they don't exist.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Self::connect(db_path.as_ref(), OpenFlags::default())?;
        let store = Self::with_connection(conn)?;
        if !store.has_schema()? {
            store.init_schema()?;
        }
        Ok(store)
    }

    /// Open the database at `db_path` without write access. The schema is
    /// never touched; an uninitialised database fails on first query.
    pub fn open_read_only(db_path: impl AsRef<Path>) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Self::connect(db_path.as_ref(), flags)?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| ChannelError::Database {
            message: format!("Failed to open in-memory database: {}", e),
            source: Some(e),
        })?;
        let store = Self::with_connection(conn)?;
        store.init_schema()?;
        Ok(store)
    }

    fn connect(db_path: &Path, flags: OpenFlags) -> Result<Connection> {
        if !db_path.exists() {
            return Err(ChannelError::Database {
                message: format!("database {} does not exist", db_path.display()),
                source: None,
            });
        }

        Connection::open_with_flags(db_path, flags).map_err(|e| ChannelError::Database {
            message: format!("Failed to open database {}: {}", db_path.display(), e),
            source: Some(e),
        })
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| ChannelError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Whether all pipeline tables are already present.
    fn has_schema(&self) -> Result<bool> {
        let conn = self.lock()?;
        let found: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('rules', 'channels', 'channel_rules')",
                [],
                |row| row.get(0),
            )
            .map_err(|e| ChannelError::Database {
                message: format!("Failed to inspect schema: {}", e),
                source: Some(e),
            })?;
        Ok(found == 3)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| ChannelError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_name TEXT NOT NULL,
                rule TEXT NOT NULL,
                score REAL NOT NULL DEFAULT 1.0,
                sa_version TEXT NOT NULL,
                author TEXT,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                status TEXT NOT NULL DEFAULT 'development',
                rule_hash TEXT NOT NULL,
                test_status TEXT NOT NULL DEFAULT 'untested',
                UNIQUE (rule_name, sa_version)
            );

            CREATE TABLE IF NOT EXISTS channels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS channel_rules (
                channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
                rule_id INTEGER NOT NULL REFERENCES rules(id) ON DELETE CASCADE,
                added_at TEXT NOT NULL,
                PRIMARY KEY (channel_id, rule_id)
            );

            CREATE INDEX IF NOT EXISTS idx_rules_active_status
                ON rules(active, status);
            "#,
        )
        .map_err(|e| ChannelError::Database {
            message: format!("Failed to initialize schema: {}", e),
            source: Some(e),
        })?;

        Ok(())
    }

    /// Insert a channel and return its id.
    pub fn insert_channel(&self, channel: &NewChannel) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO channels (name, description, is_default, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![channel.name, channel.description, channel.is_default, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a rule and return its id.
    pub fn insert_rule(&self, rule: &NewRule) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO rules (rule_name, rule, score, sa_version, author, description,
                               created_at, updated_at, active, status, rule_hash, test_status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                rule.name,
                rule.body,
                rule.score,
                rule.engine_version,
                rule.author,
                rule.description,
                now,
                rule.active,
                rule.status,
                rule_hash(&rule.body),
                rule.test_status.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Add a rule to a channel. Adding an existing member is a no-op.
    pub fn add_rule_to_channel(&self, channel_id: i64, rule_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO channel_rules (channel_id, rule_id, added_at) VALUES (?1, ?2, ?3)",
            params![channel_id, rule_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Delete a channel; its memberships go with it.
    pub fn remove_channel(&self, channel_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM channels WHERE id = ?1", params![channel_id])?;
        Ok(removed > 0)
    }

    /// Delete a rule; its memberships go with it.
    pub fn remove_rule(&self, rule_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM rules WHERE id = ?1", params![rule_id])?;
        Ok(removed > 0)
    }

    /// Number of channel memberships, across all channels.
    pub fn membership_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM channel_rules", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }
}

impl DataStore for SqliteStore {
    fn channels(&self, selector: &ChannelSelector) -> Result<Vec<Channel>> {
        let conn = self.lock()?;

        let channels = match selector {
            ChannelSelector::All => {
                let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY name");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], channel_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            ChannelSelector::Id(id) => {
                let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![id], channel_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            ChannelSelector::Name(name) => {
                let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE name = ?1");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![name], channel_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };

        debug!("Selected {} channel(s) for {}", channels.len(), selector);
        Ok(channels)
    }

    fn active_rules(&self, channel_id: i64, query: &RuleQuery) -> Result<Vec<Rule>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(RULES_FOR_CHANNEL)?;
        let rows = stmt.query_map(
            params![channel_id, query.status, query.engine_version],
            rule_from_row,
        )?;
        let rules = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        is_default: row.get(3)?,
        created_at: timestamp(row, 4)?,
        updated_at: timestamp(row, 5)?,
    })
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<Rule> {
    let test_status: String = row.get(12)?;
    let test_status = test_status
        .parse::<TestStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, Type::Text, e.into()))?;

    Ok(Rule {
        id: row.get(0)?,
        name: row.get(1)?,
        body: row.get(2)?,
        score: row.get(3)?,
        engine_version: row.get(4)?,
        author: row.get(5)?,
        description: row.get(6)?,
        created_at: timestamp(row, 7)?,
        updated_at: timestamp(row, 8)?,
        active: row.get(9)?,
        status: row.get(10)?,
        hash: row.get(11)?,
        test_status,
    })
}

/// Formats SQLite itself writes (`datetime('now')`, `CURRENT_TIMESTAMP`),
/// read as UTC.
const SQLITE_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    parse_timestamp(&value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    let value = value.trim();
    let rfc3339 = match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => return Ok(dt.with_timezone(&Utc)),
        Err(e) => e,
    };
    SQLITE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or(rfc3339)
}
