use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

pub type TaskId = usize;
pub type ObjectId = usize;
pub type EventId = usize;

/// A schedulable unit: a thread or a future
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,

    /// Task that spawned this one (the root names itself)
    pub created_by: TaskId,

    pub name: Option<String>,

    /// Event where the task started running
    pub first_step: EventId,

    /// Event where the task terminated, or the last event of the trace
    pub last_step: EventId,

    /// `TaskCreated` event that announced this task, if any
    pub created_at: Option<EventId>,

    /// Only known once a `TaskCreated` event names this task
    pub is_future: bool,

    pub children: Vec<TaskId>,

    /// Events owned by this task, in log order
    pub events: Vec<EventId>,

    /// Scheduler decisions taken while this task was alive but not runnable
    pub blocked_at: Vec<EventId>,
}

impl Task {
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", name, self.id),
            None if self.is_future => format!("future {}", self.id),
            None => format!("thread {}", self.id),
        }
    }

    pub fn is_alive_at(&self, event: EventId) -> bool {
        self.first_step <= event && event <= self.last_step
    }
}

/// A synchronization primitive observed by one or more tasks
#[derive(Debug, Clone, Serialize)]
pub struct Object {
    pub id: ObjectId,
    pub created_by: TaskId,
    pub created_at: EventId,
    pub name: Option<String>,
    pub kind: Option<String>,

    /// Tasks that interacted with the object. Only ever grows.
    pub seen_by: BTreeSet<TaskId>,

    /// Closing event, or the last event of the trace
    pub last_event: EventId,
}

impl Object {
    pub fn display_name(&self) -> String {
        let kind = self.kind.as_deref().unwrap_or("object");
        match &self.name {
            Some(name) => format!("{} {} ({})", kind, name, self.id),
            None => format!("{} {}", kind, self.id),
        }
    }
}

/// A resolved backtrace frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub path: Arc<str>,
    pub function: Arc<str>,
    pub line: u32,
    pub column: u32,
}

/// Event kinds, one variant per trace label.
///
/// Bare labels deserialize from a plain string (`"Tick"`), payload variants
/// from a single-key object (`{"TaskCreated": [3, true]}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    SemaphoreCreated(ObjectId),
    SemaphoreClosed(ObjectId),
    SemaphoreAcquireFast(ObjectId, usize),
    SemaphoreAcquireBlocked(ObjectId, usize),
    /// Object, permits, task that got unblocked
    SemaphoreAcquireUnblocked(ObjectId, usize, TaskId),
    /// Object, permits, whether the attempt succeeded
    SemaphoreTryAcquire(ObjectId, usize, bool),
    SemaphoreRelease(ObjectId, usize),
    /// New task, whether it is a future
    TaskCreated(TaskId, bool),
    TaskTerminated,
    Tick,
    Random,
    /// Tasks runnable at this decision point
    Schedule(Vec<TaskId>),
}

impl EventKind {
    pub fn category(&self) -> Category {
        match self {
            EventKind::SemaphoreCreated(_)
            | EventKind::SemaphoreClosed(_)
            | EventKind::SemaphoreAcquireFast(..)
            | EventKind::SemaphoreAcquireBlocked(..)
            | EventKind::SemaphoreAcquireUnblocked(..)
            | EventKind::SemaphoreTryAcquire(..)
            | EventKind::SemaphoreRelease(..) => Category::Semaphore,
            EventKind::TaskCreated(..) | EventKind::TaskTerminated => Category::Task,
            EventKind::Tick => Category::Tick,
            EventKind::Random => Category::Random,
            EventKind::Schedule(_) => Category::Schedule,
        }
    }

    /// The object this event touches, for semaphore events
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            EventKind::SemaphoreCreated(obj)
            | EventKind::SemaphoreClosed(obj)
            | EventKind::SemaphoreAcquireFast(obj, _)
            | EventKind::SemaphoreAcquireBlocked(obj, _)
            | EventKind::SemaphoreAcquireUnblocked(obj, _, _)
            | EventKind::SemaphoreTryAcquire(obj, _, _)
            | EventKind::SemaphoreRelease(obj, _) => Some(*obj),
            _ => None,
        }
    }

    /// Trace label of the kind
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::SemaphoreCreated(_) => "SemaphoreCreated",
            EventKind::SemaphoreClosed(_) => "SemaphoreClosed",
            EventKind::SemaphoreAcquireFast(..) => "SemaphoreAcquireFast",
            EventKind::SemaphoreAcquireBlocked(..) => "SemaphoreAcquireBlocked",
            EventKind::SemaphoreAcquireUnblocked(..) => "SemaphoreAcquireUnblocked",
            EventKind::SemaphoreTryAcquire(..) => "SemaphoreTryAcquire",
            EventKind::SemaphoreRelease(..) => "SemaphoreRelease",
            EventKind::TaskCreated(..) => "TaskCreated",
            EventKind::TaskTerminated => "TaskTerminated",
            EventKind::Tick => "Tick",
            EventKind::Random => "Random",
            EventKind::Schedule(_) => "Schedule",
        }
    }
}

/// Coarse event groups toggled by the built-in category filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Schedule,
    Tick,
    Semaphore,
    Task,
    Random,
}

impl Category {
    pub const COUNT: usize = 5;

    pub const ALL: [Category; Category::COUNT] = [
        Category::Schedule,
        Category::Tick,
        Category::Semaphore,
        Category::Task,
        Category::Random,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Schedule => "schedule",
            Category::Tick => "tick",
            Category::Semaphore => "semaphore",
            Category::Task => "task",
            Category::Random => "random",
        }
    }

    pub fn from_name(name: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Position in [`Category::ALL`], used to index count arrays
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn enabled_by_default(self) -> bool {
        matches!(self, Category::Semaphore | Category::Task | Category::Random)
    }
}

/// Causal vector clock, one counter per task id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(pub Vec<u32>);

impl VectorClock {
    pub fn get(&self, task: TaskId) -> u32 {
        self.0.get(task).copied().unwrap_or(0)
    }

    /// `self <= other` component-wise. Missing components count as zero.
    pub fn le(&self, other: &VectorClock) -> bool {
        let len = self.0.len().max(other.0.len());
        (0..len).all(|i| self.get(i) <= other.get(i))
    }

    /// Strict happens-before: `self <= other` and the clocks differ
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        self.le(other) && !other.le(self)
    }
}

/// One trace record
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Position in the original log
    pub id: EventId,

    /// Owning task
    pub task: TaskId,

    pub backtrace: Option<Vec<Frame>>,

    pub kind: EventKind,

    pub clock: Option<VectorClock>,

    pub category: Category,

    /// Rejected by the current filter chain
    pub filtered: bool,

    /// Dense position among kept events. Filtered events share the slot of
    /// the last kept event before them.
    pub kept_index: usize,
}

impl Event {
    /// Short human-readable label
    pub fn describe(&self) -> String {
        match &self.kind {
            EventKind::SemaphoreCreated(obj) => format!("create object {}", obj),
            EventKind::SemaphoreClosed(obj) => format!("close object {}", obj),
            EventKind::SemaphoreAcquireFast(obj, n) => {
                format!("acquire {} from object {}", n, obj)
            }
            EventKind::SemaphoreAcquireBlocked(obj, n) => {
                format!("block acquiring {} from object {}", n, obj)
            }
            EventKind::SemaphoreAcquireUnblocked(obj, n, task) => {
                format!("unblock task {} acquiring {} from object {}", task, n, obj)
            }
            EventKind::SemaphoreTryAcquire(obj, n, ok) => format!(
                "try acquire {} from object {} ({})",
                n,
                obj,
                if *ok { "ok" } else { "failed" }
            ),
            EventKind::SemaphoreRelease(obj, n) => format!("release {} to object {}", n, obj),
            EventKind::TaskCreated(task, true) => format!("spawn future {}", task),
            EventKind::TaskCreated(task, false) => format!("spawn thread {}", task),
            EventKind::TaskTerminated => "terminate".to_string(),
            EventKind::Tick => "tick".to_string(),
            EventKind::Random => "random".to_string(),
            EventKind::Schedule(runnable) => format!("schedule {:?}", runnable),
        }
    }

    /// Innermost frame of the backtrace
    pub fn top_frame(&self) -> Option<&Frame> {
        self.backtrace.as_ref().and_then(|frames| frames.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_deserializes_bare_label() {
        let kind: EventKind = serde_json::from_str(r#""Tick""#).unwrap();
        assert_eq!(kind, EventKind::Tick);
        assert_eq!(kind.category(), Category::Tick);
    }

    #[test]
    fn test_kind_deserializes_payload() {
        let kind: EventKind = serde_json::from_str(r#"{"TaskCreated": [3, true]}"#).unwrap();
        assert_eq!(kind, EventKind::TaskCreated(3, true));

        let kind: EventKind =
            serde_json::from_str(r#"{"SemaphoreAcquireUnblocked": [1, 2, 4]}"#).unwrap();
        assert_eq!(kind.object(), Some(1));

        let kind: EventKind = serde_json::from_str(r#"{"Schedule": [0, 2]}"#).unwrap();
        assert_eq!(kind, EventKind::Schedule(vec![0, 2]));
    }

    #[test]
    fn test_kind_rejects_unknown_label() {
        assert!(serde_json::from_str::<EventKind>(r#""Yield""#).is_err());
        assert!(serde_json::from_str::<EventKind>(r#"{"Sleep": 3}"#).is_err());
    }

    #[test]
    fn test_category_defaults() {
        let enabled: Vec<_> = Category::ALL
            .into_iter()
            .filter(|c| c.enabled_by_default())
            .collect();
        assert_eq!(
            enabled,
            vec![Category::Semaphore, Category::Task, Category::Random]
        );
        assert_eq!(Category::from_name("tick"), Some(Category::Tick));
        assert_eq!(Category::from_name("ticks"), None);
    }

    #[test]
    fn test_vector_clock_order() {
        let a = VectorClock(vec![1, 0]);
        let b = VectorClock(vec![1, 2]);
        let c = VectorClock(vec![0, 3, 1]);

        assert!(a.happens_before(&b));
        assert!(!b.happens_before(&a));
        assert!(!a.happens_before(&a));
        // concurrent
        assert!(!a.happens_before(&c));
        assert!(!c.happens_before(&a));
    }
}
