//! Reconstructs tasks, synchronization objects and their relationships from
//! a schedule trace, and indexes each task's events for level-of-detail
//! queries over the events that survive the current filters.

pub mod context;
pub mod filter;
pub mod hierarchy;
pub mod trace;
pub mod zoom;

pub use context::Context;
pub use filter::{Filter, FilterChain, FilterConfig, FilterError, FilterResult};
pub use hierarchy::{EntryKind, Hierarchy, HierarchyEntry};
pub use trace::{
    Category, Event, EventId, EventKind, Object, ObjectId, Task, TaskId, TraceError, TraceGraph,
    TraceResult,
};
pub use zoom::{ZoomIndex, ZoomNode};
