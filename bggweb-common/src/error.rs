//! Error type shared by the bggweb crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of storage, configuration and lookups
#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable or invalid config file
    #[error("Config error: {0}")]
    Config(String),

    /// No job or game with the requested id
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stored job row that no longer decodes
    #[error("Corrupt stored record: {0}")]
    Corrupt(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the underlying SQLite error is a lock/busy condition
    pub fn is_lock_error(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            Error::Database(db_err) => {
                let text = db_err.to_string();
                text.contains("database is locked") || text.contains("database table is locked")
            }
            _ => false,
        }
    }
}
