//! Error kinds surfaced by a run.
//!
//! Per-source and per-event problems (`SourceUnreadable`, `MalformedSequence`)
//! are logged and recovered from where they happen. `ConfigInvalid` and
//! `NoDataLoaded` abort the run before any output is written.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowError {
    /// An input source could not be opened or decoded.
    SourceUnreadable { path: String, reason: String },
    /// The run configuration is missing, unparseable or incomplete.
    ConfigInvalid(String),
    /// No records were recovered from any source.
    NoDataLoaded,
    /// A RETURN arrived on a thread with no pending CALL.
    MalformedSequence {
        thread_id: u32,
        timestamp: u64,
        name: String,
    },
}

impl fmt::Display for ShowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShowError::SourceUnreadable { path, reason } => {
                write!(f, "cannot read source {path}: {reason}")
            }
            ShowError::ConfigInvalid(msg) => write!(f, "invalid configuration: {msg}"),
            ShowError::NoDataLoaded => write!(f, "no records were loaded from any source"),
            ShowError::MalformedSequence {
                thread_id,
                timestamp,
                name,
            } => write!(
                f,
                "RETURN '{name}' at {timestamp} on thread {thread_id} has no pending CALL"
            ),
        }
    }
}

impl std::error::Error for ShowError {}
