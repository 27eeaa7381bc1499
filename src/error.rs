// =====================================================
// MIGRATION ERROR TAXONOMY
// =====================================================

use serde::{Deserialize, Serialize};
use sqlx::error::DatabaseError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MigrationError>;

#[derive(Debug, Error)]
pub enum MigrationError {
    /// Source or target unreachable. Aborts the run.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Metadata is readable but the statement was refused.
    #[error("insufficient privilege: {0}")]
    Privilege(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("row insert failed: {0}")]
    RowInsert(String),

    #[error("verification mismatch: {0}")]
    VerificationMismatch(String),

    #[error("no columns discovered for {schema}.{table}")]
    NoColumnsDiscovered { schema: String, table: String },

    #[error("query failed: {0}")]
    Query(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("migration cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Privilege,
    NotFound,
    RowInsert,
    VerificationMismatch,
    NoColumnsDiscovered,
    Query,
    Timeout,
    Cancelled,
    Config,
    Unsupported,
}

impl MigrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::Privilege(_) => ErrorKind::Privilege,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RowInsert(_) => ErrorKind::RowInsert,
            Self::VerificationMismatch(_) => ErrorKind::VerificationMismatch,
            Self::NoColumnsDiscovered { .. } => ErrorKind::NoColumnsDiscovered,
            Self::Query(_) => ErrorKind::Query,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Re-labels a failed INSERT as a row failure; transport errors stay fatal.
    pub fn into_row_error(self) -> Self {
        match self {
            Self::Connection(_) | Self::RowInsert(_) => self,
            other => Self::RowInsert(other.to_string()),
        }
    }

    /// Maps a SQLSTATE (PostgreSQL, PostgREST payloads) to a taxonomy entry.
    pub fn from_sqlstate(code: &str, message: &str) -> Self {
        let message = message.to_string();
        match code {
            "42501" => Self::Privilege(message),
            "3F000" | "42P01" | "42883" | "3D000" | "PGRST202" => Self::NotFound(message),
            c if c.starts_with("08") || c == "28P01" || c == "28000" => Self::Connection(message),
            "57014" => Self::Query(format!("statement cancelled: {}", message)),
            _ => Self::Query(message),
        }
    }

    /// Maps a MySQL server error number to a taxonomy entry.
    pub fn from_mysql_errno(number: u16, message: &str) -> Self {
        let message = message.to_string();
        match number {
            1044 | 1142 | 1143 | 1227 | 1370 => Self::Privilege(message),
            1049 | 1146 | 1305 => Self::NotFound(message),
            1045 | 1040 | 1129 | 2002 | 2003 | 2006 | 2013 => Self::Connection(message),
            _ => Self::Query(message),
        }
    }

    /// Classifies free-form error text returned by the raw SQL RPC.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("permission denied") || lower.contains("access denied") {
            Self::Privilege(message.to_string())
        } else if lower.contains("does not exist") || lower.contains("could not find") {
            Self::NotFound(message.to_string())
        } else {
            Self::Query(message.to_string())
        }
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                if let Some(mysql) = db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
                    return Self::from_mysql_errno(mysql.number(), mysql.message());
                }
                let code = db.code().map(|c| c.to_string()).unwrap_or_default();
                Self::from_sqlstate(&code, db.message())
            }
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::Io(e) => Self::Connection(e.to_string()),
            sqlx::Error::Tls(e) => Self::Connection(e.to_string()),
            sqlx::Error::PoolTimedOut => {
                Self::Connection("timed out waiting for a pooled connection".to_string())
            }
            sqlx::Error::PoolClosed => Self::Connection("connection pool closed".to_string()),
            sqlx::Error::WorkerCrashed => Self::Connection("connection worker crashed".to_string()),
            sqlx::Error::Configuration(e) => Self::Config(e.to_string()),
            other => Self::Query(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for MigrationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_timeout() {
            Self::Query(format!("request timed out: {}", err))
        } else if err.is_decode() {
            Self::Query(format!("unexpected response body: {}", err))
        } else {
            Self::Query(err.to_string())
        }
    }
}

impl From<config::ConfigError> for MigrationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
