use std::path::PathBuf;

use thiserror::Error;

mod classify;
mod translate;

pub use classify::classify;
pub use translate::{translate, translate_open};

/// MySQL-compatible error codes used by the wire error shape.
pub mod codes {
    pub const ER_DB_CREATE_EXISTS: u16 = 1007;
    pub const ER_BAD_DB_ERROR: u16 = 1049;
    pub const ER_BAD_FIELD_ERROR: u16 = 1054;
    pub const ER_DUP_ENTRY: u16 = 1062;
    pub const ER_PARSE_ERROR: u16 = 1064;
    pub const ER_EMPTY_QUERY: u16 = 1065;
    pub const ER_UNKNOWN_ERROR: u16 = 1105;
    pub const ER_NO_SUCH_TABLE: u16 = 1146;
    pub const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
    pub const ER_LOCK_DEADLOCK: u16 = 1213;
    pub const ER_QUERY_INTERRUPTED: u16 = 1317;
    pub const CR_SERVER_GONE_ERROR: u16 = 2006;
}

/// Whether an error is worth another attempt after backing off and reopening the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient storage contention (lock held, manifest read only, deadlock).
    Retryable,
    /// Everything else: syntax, missing objects, constraint violations, misuse.
    Terminal,
}

impl ErrorClass {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Retryable)
    }
}

/// The conventional `{code, sql_state, message}` error shape used at every driver boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Error {code} ({sql_state}): {message}")]
pub struct WireError {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

impl WireError {
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            sql_state: sql_state_for(code).to_string(),
            message: message.into(),
        }
    }
}

fn sql_state_for(code: u16) -> &'static str {
    match code {
        codes::ER_BAD_DB_ERROR | codes::ER_PARSE_ERROR | codes::ER_EMPTY_QUERY => "42000",
        codes::ER_BAD_FIELD_ERROR => "42S22",
        codes::ER_DUP_ENTRY => "23000",
        codes::ER_NO_SUCH_TABLE => "42S02",
        codes::ER_LOCK_WAIT_TIMEOUT | codes::ER_LOCK_DEADLOCK => "40001",
        codes::ER_QUERY_INTERRUPTED => "70100",
        codes::CR_SERVER_GONE_ERROR => "08S01",
        _ => "HY000",
    }
}

/// The one error type returned across the driver surface.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("failed to open database directory {}: {source}", path.display())]
    OpenError {
        path: PathBuf,
        #[source]
        source: WireError,
        class: ErrorClass,
    },

    #[error("{source}")]
    QueryError {
        #[source]
        source: WireError,
        class: ErrorClass,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("connector is closed")]
    Closed,

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),
}

impl DriverError {
    /// Retry classification attached when the error was first observed.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            DriverError::OpenError { class, .. } | DriverError::QueryError { class, .. } => *class,
            _ => ErrorClass::Terminal,
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// Borrow the translated engine error, when this error came from the engine.
    #[must_use]
    pub fn wire(&self) -> Option<&WireError> {
        match self {
            DriverError::OpenError { source, .. } | DriverError::QueryError { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    /// Render any driver error in the wire shape so protocol-level callers see one error type.
    #[must_use]
    pub fn to_wire(&self) -> WireError {
        match self {
            DriverError::OpenError { source, .. } | DriverError::QueryError { source, .. } => {
                source.clone()
            }
            DriverError::Cancelled => {
                WireError::new(codes::ER_QUERY_INTERRUPTED, "Query execution was interrupted")
            }
            DriverError::Closed => WireError::new(codes::CR_SERVER_GONE_ERROR, self.to_string()),
            DriverError::ConfigError(_)
            | DriverError::ExecutionError(_)
            | DriverError::Unimplemented(_) => {
                WireError::new(codes::ER_UNKNOWN_ERROR, self.to_string())
            }
        }
    }
}

impl From<WireError> for DriverError {
    fn from(source: WireError) -> Self {
        let class = classify(None, &source);
        DriverError::QueryError { source, class }
    }
}
