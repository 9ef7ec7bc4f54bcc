use std::path::Path;

use super::{DriverError, WireError, classify, codes};
use crate::engine::EngineError;

/// Translate a raw engine error into the driver's error type, classifying it on the way.
///
/// Errors the engine already reported in the wire shape pass through unchanged.
#[must_use]
pub fn translate(err: EngineError) -> DriverError {
    match err {
        EngineError::Cancelled => DriverError::Cancelled,
        EngineError::Closed => DriverError::Closed,
        other => {
            let source = to_wire(&other);
            let class = classify(Some(&other), &source);
            DriverError::QueryError { source, class }
        }
    }
}

/// Translate a failure raised while constructing an engine for `path`.
#[must_use]
pub fn translate_open(path: &Path, err: EngineError) -> DriverError {
    match err {
        EngineError::Cancelled => DriverError::Cancelled,
        other => {
            let source = to_wire(&other);
            let class = classify(Some(&other), &source);
            DriverError::OpenError {
                path: path.to_path_buf(),
                source,
                class,
            }
        }
    }
}

fn to_wire(err: &EngineError) -> WireError {
    match err {
        EngineError::Wire(wire) => wire.clone(),
        EngineError::DatabaseNotFound(name) => {
            WireError::new(codes::ER_BAD_DB_ERROR, format!("Unknown database '{name}'"))
        }
        EngineError::Syntax(message) => WireError::new(codes::ER_PARSE_ERROR, message.clone()),
        #[cfg(feature = "sqlite")]
        EngineError::Sqlite(sqlite_err) => sqlite_to_wire(sqlite_err),
        EngineError::Other(message) => WireError::new(code_from_message(message), message.clone()),
        EngineError::StorageLocked(_)
        | EngineError::DirectoryNotFound(_)
        | EngineError::NotADirectory(_)
        | EngineError::Io(_)
        | EngineError::Closed
        | EngineError::Cancelled => WireError::new(codes::ER_UNKNOWN_ERROR, err.to_string()),
    }
}

fn code_from_message(message: &str) -> u16 {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("no such table") || lowered.contains("table not found") {
        codes::ER_NO_SUCH_TABLE
    } else if lowered.contains("no such column") {
        codes::ER_BAD_FIELD_ERROR
    } else if lowered.contains("syntax error") {
        codes::ER_PARSE_ERROR
    } else if lowered.contains("unique constraint failed") || lowered.contains("duplicate entry")
    {
        codes::ER_DUP_ENTRY
    } else {
        codes::ER_UNKNOWN_ERROR
    }
}

#[cfg(feature = "sqlite")]
fn sqlite_to_wire(err: &rusqlite::Error) -> WireError {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            let message = err.to_string();
            let code = match failure.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    codes::ER_LOCK_WAIT_TIMEOUT
                }
                rusqlite::ErrorCode::OperationInterrupted => codes::ER_QUERY_INTERRUPTED,
                _ => code_from_message(&message),
            };
            WireError::new(code, message)
        }
        rusqlite::Error::SqlInputError { error, msg, .. }
            if matches!(
                error.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) =>
        {
            WireError::new(codes::ER_LOCK_WAIT_TIMEOUT, msg.clone())
        }
        rusqlite::Error::SqlInputError { msg, .. } => match code_from_message(msg) {
            codes::ER_UNKNOWN_ERROR => {
                WireError::new(codes::ER_PARSE_ERROR, format!("syntax error: {msg}"))
            }
            code => WireError::new(code, msg.clone()),
        },
        other => WireError::new(codes::ER_UNKNOWN_ERROR, other.to_string()),
    }
}
