//! Common error types for geoseed

use thiserror::Error;

/// Common result type for geoseed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the seeding pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input file or invalid parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Store schema does not carry the columns the pipeline owns
    #[error("Schema mismatch: {0}")]
    Schema(String),

    /// Geometry could not be parsed or normalized
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Raster could not be opened or read
    #[error("Raster error: {0}")]
    Raster(String),

    /// Progress ledger unreadable or unwritable
    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl Error {
    /// True for store contention errors worth retrying with backoff.
    ///
    /// SQLite reports writer contention as `database is locked` or
    /// `database table is locked` (SQLITE_BUSY / SQLITE_LOCKED).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::PoolTimedOut) => true,
            Error::Database(sqlx::Error::Io(_)) => true,
            Error::Database(db_err) => {
                let msg = db_err.to_string();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(format!("JSON: {}", err))
    }
}
