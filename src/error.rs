use thiserror::Error;

/// Failures of the local ledger database.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create data dir: {0}")]
    DataDir(#[from] std::io::Error),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration v{version}: {source}")]
    Migration {
        version: i32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("ledger serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("ledger store lock poisoned")]
    Poisoned,
}

/// Failures talking to the order feeds. All of these are transient from the
/// poller's point of view.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("cannot reach order service at {0}")]
    Unreachable(String),

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("invalid order service URL: {0}")]
    InvalidUrl(String),

    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    #[error("invalid JSON from order service: {0}")]
    Body(String),

    #[error("network error communicating with {url}: {detail}")]
    Network { url: String, detail: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("notification session has stopped")]
    Closed,
}
