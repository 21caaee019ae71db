use serde::Deserialize;

use super::{EventKind, TaskId, VectorClock};

/// The trace exactly as stored on disk
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrace {
    pub tasks: Vec<RawTask>,

    #[serde(default)]
    pub objects: Vec<RawObject>,

    #[serde(default)]
    pub files: Vec<RawFile>,

    #[serde(default)]
    pub functions: Vec<RawFunction>,

    pub events: Vec<RawEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTask {
    pub created_by: TaskId,
    pub first_step: usize,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawObject {
    pub created_by: TaskId,
    pub created_at: usize,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFile {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFunction {
    pub name: String,
}

/// `(file_index, function_index, line, column)`
pub type RawFrame = (usize, usize, u32, u32);

/// `(task_id, backtrace_or_null, kind, clock_or_null)`
pub type RawEvent = (TaskId, Option<Vec<RawFrame>>, EventKind, Option<VectorClock>);

impl RawTrace {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
