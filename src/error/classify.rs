//! Retry classification for engine failures.
//!
//! Retry decisions are made here once, where the engine error is first seen. Everything
//! downstream switches on the [`ErrorClass`] produced here.

use std::sync::LazyLock;

use regex::Regex;

use super::{ErrorClass, WireError, codes};
use crate::engine::EngineError;

static MANIFEST_READ_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)cannot update manifest.*read only").expect("manifest pattern is valid")
});

const CONTENTION_SIGNATURES: &[&str] = &[
    "database is read only",
    "locked by another process",
    "deadlock",
    "resource temporarily unavailable",
];

/// Label an engine failure as retryable storage contention or terminal.
///
/// Both the raw engine error (when available) and its translated form are checked, since
/// some signatures only survive on one side of translation.
#[must_use]
pub fn classify(raw: Option<&EngineError>, translated: &WireError) -> ErrorClass {
    if let Some(raw) = raw
        && (raw.is_storage_locked() || matches_contention(&raw.to_string()))
    {
        return ErrorClass::Retryable;
    }
    if translated.code == codes::ER_LOCK_DEADLOCK || matches_contention(&translated.message) {
        return ErrorClass::Retryable;
    }
    ErrorClass::Terminal
}

fn matches_contention(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    CONTENTION_SIGNATURES
        .iter()
        .any(|signature| lowered.contains(signature))
        || MANIFEST_READ_ONLY.is_match(&lowered)
}
