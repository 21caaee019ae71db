mod graph;
mod raw;
mod types;

pub use graph::TraceGraph;
pub use raw::{RawEvent, RawFile, RawFrame, RawFunction, RawObject, RawTask, RawTrace};
pub use types::*;

/// Errors raised while loading or querying a trace
#[derive(Debug, Clone, thiserror::Error)]
pub enum TraceError {
    #[error("Invalid trace format: {0}")]
    InvalidFormat(String),

    #[error("{table} {index} referenced by {referrer} is out of range (table has {len} entries)")]
    UnknownReference {
        table: &'static str,
        index: usize,
        referrer: String,
        len: usize,
    },

    #[error("Task {task} names creator {creator}, which is not an earlier task")]
    InvalidCreator { task: TaskId, creator: TaskId },

    #[error("{table} id {index} is out of range (table has {len} entries)")]
    OutOfRange {
        table: &'static str,
        index: usize,
        len: usize,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for TraceError {
    fn from(err: serde_json::Error) -> Self {
        TraceError::InvalidFormat(err.to_string())
    }
}

/// Result type for trace operations
pub type TraceResult<T> = Result<T, TraceError>;

/// Look up `index` in a table, reporting who asked on failure
pub(crate) fn checked<'a, T>(
    items: &'a [T],
    table: &'static str,
    index: usize,
    referrer: impl FnOnce() -> String,
) -> TraceResult<&'a T> {
    items.get(index).ok_or_else(|| TraceError::UnknownReference {
        table,
        index,
        referrer: referrer(),
        len: items.len(),
    })
}
