//! Error types for the channel pipeline.
//!
//! Every variant maps onto one pipeline stage so failures can be logged with
//! the stage they came from and the caller can decide whether they are fatal.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Lock,
    Generate,
    Validate,
    Package,
    Publish,
    Announce,
    Refresh,
    Other,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Lock => "lock",
            Stage::Generate => "generate",
            Stage::Validate => "validate",
            Stage::Package => "package",
            Stage::Publish => "publish",
            Stage::Announce => "announce",
            Stage::Refresh => "refresh",
            Stage::Other => "other",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the channel pipeline.
#[derive(Debug, Error)]
pub enum ChannelError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Build already running: lock file {path:?} is held{}", .holder.map(|pid| format!(" by pid {pid}")).unwrap_or_default())]
    LockContention { path: PathBuf, holder: Option<u32> },

    // Data access errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Channel not found: {selector}")]
    ChannelNotFound { selector: String },

    // Rendering errors
    #[error("Template error: {message}")]
    Template {
        message: String,
        #[source]
        source: Option<minijinja::Error>,
    },

    // Validation errors
    #[error("Validation failed for channel {channel}: {message}")]
    Validation { channel: String, message: String },

    // Packaging errors
    #[error("Archive creation failed for channel {channel}: {message}")]
    Archive { channel: String, message: String },

    #[error("Signing failed for channel {channel}: {message}")]
    Signing { channel: String, message: String },

    #[error("Packaging failed for {} channel(s): {}", .failed.len(), .failed.join(", "))]
    PackagingAborted { failed: Vec<String> },

    // Distribution errors
    #[error("Publish failed: {message}")]
    Publish { message: String },

    #[error("DNS announcement failed: {message}")]
    Announcement { message: String },

    #[error("Refresh trigger failed on {host}: {message}")]
    Refresh { host: String, message: String },

    // External process errors
    #[error("{program} exited with {}: {stderr}", .status.map(|c| format!("status {c}")).unwrap_or_else(|| "a signal".to_string()))]
    CommandFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {after:?}")]
    Timeout { program: String, after: Duration },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for ChannelError {
    fn from(err: rusqlite::Error) -> Self {
        ChannelError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<minijinja::Error> for ChannelError {
    fn from(err: minijinja::Error) -> Self {
        ChannelError::Template {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ChannelError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ChannelError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create an IO error with a description and path context.
    pub fn io(message: impl Into<String>, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        ChannelError::Io {
            message: format!("{}: {}", message.into(), err),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ChannelError::Config {
            message: message.into(),
        }
    }

    /// The pipeline stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            ChannelError::Config { .. } => Stage::Config,
            ChannelError::LockContention { .. } => Stage::Lock,
            ChannelError::Database { .. }
            | ChannelError::ChannelNotFound { .. }
            | ChannelError::Template { .. } => Stage::Generate,
            ChannelError::Validation { .. } => Stage::Validate,
            ChannelError::Archive { .. }
            | ChannelError::Signing { .. }
            | ChannelError::PackagingAborted { .. } => Stage::Package,
            ChannelError::Publish { .. } => Stage::Publish,
            ChannelError::Announcement { .. } => Stage::Announce,
            ChannelError::Refresh { .. } => Stage::Refresh,
            _ => Stage::Other,
        }
    }
}
