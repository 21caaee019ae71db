use std::ops::RangeInclusive;
use std::path::Path;

use crate::filter::{FilterChain, FilterResult};
use crate::hierarchy::Hierarchy;
use crate::trace::{
    Event, EventId, Object, ObjectId, RawTrace, Task, TaskId, TraceError, TraceGraph, TraceResult,
};
use crate::zoom::{ZoomIndex, ZoomNode};

/// Everything derived from one trace.
///
/// Filter rebuilds replace the kept indices and the zoom index in one
/// `&mut self` call, so readers never see the two out of sync.
#[derive(Debug, Clone)]
pub struct Context {
    graph: TraceGraph,
    hierarchy: Hierarchy,
    filter_result: FilterResult,
    zoom: ZoomIndex,
}

impl Context {
    /// Load a trace from its JSON bytes, filtered with the default chain
    pub fn load(bytes: &[u8]) -> TraceResult<Self> {
        Self::load_with(bytes, &mut FilterChain::default())
    }

    pub fn load_with(bytes: &[u8], chain: &mut FilterChain) -> TraceResult<Self> {
        let raw = RawTrace::from_slice(bytes)?;
        Self::from_raw(raw, chain)
    }

    pub fn load_file(path: impl AsRef<Path>, chain: &mut FilterChain) -> TraceResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| TraceError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
        log::info!("Loading trace {} ({} bytes)", path.display(), bytes.len());
        Self::load_with(&bytes, chain)
    }

    pub fn from_raw(raw: RawTrace, chain: &mut FilterChain) -> TraceResult<Self> {
        let mut graph = TraceGraph::build(raw)?;
        let hierarchy = Hierarchy::build(&graph);
        let filter_result = chain.apply(&mut graph);
        let zoom = ZoomIndex::build(&graph, filter_result.kept_count);

        log::info!(
            "Loaded trace: {} tasks, {} objects, {} events, {} rows",
            graph.tasks.len(),
            graph.objects.len(),
            graph.events.len(),
            hierarchy.len()
        );

        Ok(Self {
            graph,
            hierarchy,
            filter_result,
            zoom,
        })
    }

    pub fn graph(&self) -> &TraceGraph {
        &self.graph
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Open/close state lives in the hierarchy and does not touch the zoom index
    pub fn hierarchy_mut(&mut self) -> &mut Hierarchy {
        &mut self.hierarchy
    }

    pub fn zoom_index(&self) -> &ZoomIndex {
        &self.zoom
    }

    pub fn filter_result(&self) -> &FilterResult {
        &self.filter_result
    }

    pub fn get_event(&self, id: EventId) -> TraceResult<&Event> {
        self.graph.event(id)
    }

    pub fn get_task(&self, id: TaskId) -> TraceResult<&Task> {
        self.graph.task(id)
    }

    pub fn get_object(&self, id: ObjectId) -> TraceResult<&Object> {
        self.graph.object(id)
    }

    /// Re-run `chain` over every event and rebuild the zoom index
    pub fn rebuild_filters(&mut self, chain: &mut FilterChain) -> FilterResult {
        let result = chain.apply(&mut self.graph);
        self.zoom = ZoomIndex::build(&self.graph, result.kept_count);
        self.filter_result = result.clone();
        result
    }

    /// Zoom query against a hierarchy row. Object rows have nothing to query.
    pub fn zoom_query(
        &self,
        row: usize,
        range: RangeInclusive<usize>,
        max_depth: usize,
    ) -> TraceResult<Vec<&ZoomNode>> {
        match self.hierarchy.get(row)?.task() {
            Some(task) => self.zoom_query_task(task, range, max_depth),
            None => Ok(Vec::new()),
        }
    }

    pub fn zoom_query_task(
        &self,
        task: TaskId,
        range: RangeInclusive<usize>,
        max_depth: usize,
    ) -> TraceResult<Vec<&ZoomNode>> {
        self.graph.task(task)?;
        Ok(self.zoom.trees_covering(task, &range, max_depth))
    }

    /// Whether `a` causally precedes `b`; `None` when either has no clock
    pub fn causally_precedes(&self, a: EventId, b: EventId) -> TraceResult<Option<bool>> {
        let (a, b) = (self.get_event(a)?, self.get_event(b)?);
        Ok(match (&a.clock, &b.clock) {
            (Some(ca), Some(cb)) => Some(ca.happens_before(cb)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::trace::Category;

    const TRACE: &str = r#"{
        "tasks": [
            {"created_by": 0, "first_step": 0, "name": "main"},
            {"created_by": 0, "first_step": 2},
            {"created_by": 0, "first_step": 3}
        ],
        "objects": [{"created_by": 0, "created_at": 1, "kind": "BatchSemaphore"}],
        "events": [
            [0, null, {"Schedule": [0]}, [1, 0, 0]],
            [0, null, {"SemaphoreCreated": 0}, [2, 0, 0]],
            [0, null, {"TaskCreated": [1, true]}, [3, 0, 0]],
            [0, null, {"TaskCreated": [2, false]}, [4, 0, 0]],
            [1, null, {"SemaphoreAcquireFast": [0, 1]}, [3, 1, 0]],
            [2, null, {"SemaphoreAcquireBlocked": [0, 1]}, [4, 0, 1]],
            [1, null, {"SemaphoreRelease": [0, 1]}, [3, 2, 0]],
            [1, null, "TaskTerminated", [3, 3, 0]],
            [0, null, "Tick", null]
        ]
    }"#;

    #[test]
    fn test_load_and_lookup() {
        let ctx = Context::load(TRACE.as_bytes()).unwrap();

        assert_eq!(ctx.get_task(0).unwrap().name.as_deref(), Some("main"));
        assert_eq!(ctx.get_task(1).unwrap().last_step, 7);
        assert!(ctx.get_task(3).is_err());
        assert!(ctx.get_object(1).is_err());
        assert!(ctx.get_event(9).is_err());

        // schedule and tick are hidden by default
        assert_eq!(ctx.filter_result().kept_count, 7);
        assert!(ctx.get_event(0).unwrap().filtered);

        // the semaphore is shared by three tasks, so it has a row under main
        assert_eq!(ctx.hierarchy().len(), 4);
        assert!(ctx.hierarchy().row_of_object(0).is_some());
    }

    #[test]
    fn test_rebuild_refreshes_zoom() {
        let mut ctx = Context::load(TRACE.as_bytes()).unwrap();
        let before = ctx.zoom_query_task(0, 0..=100, 0).unwrap()[0].count;
        assert_eq!(before, 3);

        let mut chain = FilterChain::default();
        chain.set_category(Category::Schedule, true);
        chain.set_category(Category::Tick, true);
        let result = ctx.rebuild_filters(&mut chain);
        assert_eq!(result.kept_count, 9);
        assert_eq!(ctx.filter_result(), &result);
        assert_eq!(ctx.zoom_index().top_size(), 16);
        assert_eq!(ctx.zoom_query_task(0, 0..=100, 0).unwrap()[0].count, 5);

        chain.add(Filter::custom("not main", |_, e| e.task != 0));
        ctx.rebuild_filters(&mut chain);
        assert!(ctx.zoom_query_task(0, 0..=100, 10).unwrap().is_empty());
    }

    #[test]
    fn test_zoom_query_by_row() {
        let ctx = Context::load(TRACE.as_bytes()).unwrap();
        let hierarchy = ctx.hierarchy();

        let row = hierarchy.row_of_task(1).unwrap();
        let nodes = ctx.zoom_query(row, 0..=100, 0).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].count, 3);

        let object_row = hierarchy.row_of_object(0).unwrap();
        assert!(ctx.zoom_query(object_row, 0..=100, 0).unwrap().is_empty());
        assert!(matches!(
            ctx.zoom_query(42, 0..=100, 0),
            Err(TraceError::OutOfRange { table: "row", .. })
        ));
        assert!(ctx.zoom_query_task(7, 0..=100, 0).is_err());
    }

    #[test]
    fn test_causal_order() {
        let ctx = Context::load(TRACE.as_bytes()).unwrap();

        assert_eq!(ctx.causally_precedes(2, 4).unwrap(), Some(true));
        assert_eq!(ctx.causally_precedes(4, 2).unwrap(), Some(false));
        // task 1 and task 2 never synchronize
        assert_eq!(ctx.causally_precedes(4, 5).unwrap(), Some(false));
        assert_eq!(ctx.causally_precedes(5, 4).unwrap(), Some(false));
        assert_eq!(ctx.causally_precedes(0, 8).unwrap(), None);
        assert!(ctx.causally_precedes(0, 99).is_err());
    }

    #[test]
    fn test_malformed_trace_fails_whole_load() {
        let err = Context::load(br#"{"tasks": [], "events": "nope"}"#).unwrap_err();
        assert!(matches!(err, TraceError::InvalidFormat(_)));

        let err = Context::load(
            br#"{"tasks": [{"created_by": 0, "first_step": 0}], "events": [[0, null, {"Spawn": 1}, null]]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, TraceError::InvalidFormat(_)));
    }
}
