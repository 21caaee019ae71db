mod render;

pub use render::{TreeElement, render_tree};

use serde::Serialize;

use crate::trace::{EventId, ObjectId, TaskId, TraceError, TraceGraph, TraceResult};

/// Entries deeper than this start collapsed
pub const OPEN_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum EntryKind {
    Task(TaskId),
    Object(ObjectId),
}

/// One row of the display tree
#[derive(Debug, Clone, Serialize)]
pub struct HierarchyEntry {
    pub kind: EntryKind,
    pub name: String,

    /// Row of the parent entry, `None` for the root
    pub parent: Option<usize>,
    pub children: Vec<usize>,

    pub depth: usize,
    pub open: bool,
    pub visible: bool,

    /// Pre-order position, equal to the row index
    pub flat_index: usize,

    /// Position among visible rows. Hidden rows share the index of their
    /// closest visible ancestor.
    pub visible_index: usize,

    pub first_event: EventId,
    pub last_event: EventId,
    pub created_at: Option<EventId>,
    pub created_by: TaskId,
}

impl HierarchyEntry {
    pub fn task(&self) -> Option<TaskId> {
        match self.kind {
            EntryKind::Task(id) => Some(id),
            EntryKind::Object(_) => None,
        }
    }
}

/// Display tree of tasks with shared objects attached under them
#[derive(Debug, Clone)]
pub struct Hierarchy {
    entries: Vec<HierarchyEntry>,
    task_rows: Vec<usize>,
    object_rows: Vec<Option<usize>>,
}

impl Hierarchy {
    pub fn build(graph: &TraceGraph) -> Self {
        let attached = attach_objects(graph);

        let mut entries: Vec<HierarchyEntry> = Vec::new();
        let mut task_rows = vec![0; graph.tasks.len()];
        let mut object_rows = vec![None; graph.objects.len()];

        // (entry, parent row, depth), children pushed in reverse to pop in order
        let mut stack = vec![(EntryKind::Task(0), None, 0usize)];
        while let Some((kind, parent, depth)) = stack.pop() {
            let row = entries.len();
            let entry = match kind {
                EntryKind::Task(id) => {
                    let task = &graph.tasks[id];
                    task_rows[id] = row;
                    let children = task
                        .children
                        .iter()
                        .map(|&child| EntryKind::Task(child))
                        .chain(attached[id].iter().map(|&obj| EntryKind::Object(obj)));
                    let children: Vec<_> = children.collect();
                    for child in children.into_iter().rev() {
                        stack.push((child, Some(row), depth + 1));
                    }
                    HierarchyEntry {
                        kind,
                        name: task.display_name(),
                        parent,
                        children: Vec::new(),
                        depth,
                        open: depth < OPEN_DEPTH,
                        visible: true,
                        flat_index: row,
                        visible_index: 0,
                        first_event: task.first_step,
                        last_event: task.last_step,
                        created_at: task.created_at,
                        created_by: task.created_by,
                    }
                }
                EntryKind::Object(id) => {
                    let object = &graph.objects[id];
                    object_rows[id] = Some(row);
                    HierarchyEntry {
                        kind,
                        name: object.display_name(),
                        parent,
                        children: Vec::new(),
                        depth,
                        open: depth < OPEN_DEPTH,
                        visible: true,
                        flat_index: row,
                        visible_index: 0,
                        first_event: object.created_at,
                        last_event: object.last_event,
                        created_at: Some(object.created_at),
                        created_by: object.created_by,
                    }
                }
            };
            if let Some(parent) = parent {
                entries[parent].children.push(row);
            }
            entries.push(entry);
        }

        let mut hierarchy = Self {
            entries,
            task_rows,
            object_rows,
        };
        hierarchy.relayout();

        log::debug!(
            "Built hierarchy: {} rows, {} objects attached",
            hierarchy.entries.len(),
            hierarchy.object_rows.iter().flatten().count()
        );
        hierarchy
    }

    /// Recompute visibility and visible indices for the whole tree
    fn relayout(&mut self) {
        let mut visible_count = 0;
        for row in 0..self.entries.len() {
            let visible = match self.entries[row].parent {
                Some(parent) => self.entries[parent].visible && self.entries[parent].open,
                None => true,
            };
            if visible {
                visible_count += 1;
            }
            let entry = &mut self.entries[row];
            entry.visible = visible;
            // the root is always visible, so the count is at least one here
            entry.visible_index = visible_count - 1;
        }
    }

    pub fn entries(&self) -> &[HierarchyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, row: usize) -> TraceResult<&HierarchyEntry> {
        self.entries.get(row).ok_or(TraceError::OutOfRange {
            table: "row",
            index: row,
            len: self.entries.len(),
        })
    }

    pub fn visible_rows(&self) -> impl Iterator<Item = &HierarchyEntry> {
        self.entries.iter().filter(|e| e.visible)
    }

    pub fn visible_count(&self) -> usize {
        self.visible_rows().count()
    }

    pub fn row_of_task(&self, task: TaskId) -> Option<usize> {
        self.task_rows.get(task).copied()
    }

    /// `None` for objects seen by fewer than two tasks
    pub fn row_of_object(&self, object: ObjectId) -> Option<usize> {
        self.object_rows.get(object).copied().flatten()
    }

    /// Rows from the root down to `row`, both included
    pub fn path(&self, row: usize) -> TraceResult<Vec<usize>> {
        let mut current = self.get(row)?;
        let mut path = vec![row];
        while let Some(parent) = current.parent {
            path.push(parent);
            current = &self.entries[parent];
        }
        path.reverse();
        Ok(path)
    }

    pub fn set_open(&mut self, row: usize, open: bool) -> TraceResult<()> {
        self.get(row)?;
        if self.entries[row].open != open {
            log::debug!("{} row {}", if open { "Opening" } else { "Closing" }, row);
            self.entries[row].open = open;
            self.relayout();
        }
        Ok(())
    }

    /// Flip the open state of `row`, returning the new state
    pub fn toggle(&mut self, row: usize) -> TraceResult<bool> {
        let open = !self.get(row)?.open;
        self.set_open(row, open)?;
        Ok(open)
    }

    pub fn expand_all(&mut self) {
        for entry in &mut self.entries {
            entry.open = true;
        }
        self.relayout();
    }

    /// Close every row but the root
    pub fn collapse_all(&mut self) {
        for entry in self.entries.iter_mut().skip(1) {
            entry.open = false;
        }
        self.relayout();
    }
}

/// Objects to show under each task.
///
/// An object goes under the deepest task shared by the creator's path and the
/// paths of all observers. Objects seen by a single task are left out.
fn attach_objects(graph: &TraceGraph) -> Vec<Vec<ObjectId>> {
    // created_by < id, so every creator path exists before its children
    let mut paths: Vec<Vec<TaskId>> = Vec::with_capacity(graph.tasks.len());
    for task in &graph.tasks {
        let path = if task.id == 0 {
            vec![0]
        } else {
            let mut path = paths[task.created_by].clone();
            path.push(task.id);
            path
        };
        paths.push(path);
    }

    let mut attached = vec![Vec::new(); graph.tasks.len()];
    for object in &graph.objects {
        if object.seen_by.len() < 2 {
            continue;
        }

        let candidate = &paths[object.created_by];
        let mut len = candidate.len();
        for &observer in &object.seen_by {
            let shared = candidate[..len]
                .iter()
                .zip(&paths[observer])
                .take_while(|(a, b)| a == b)
                .count();
            len = len.min(shared);
        }

        // every path starts at the root, so at least the root is shared
        let parent = candidate[len.max(1) - 1];
        attached[parent].push(object.id);
    }
    attached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::RawTrace;

    fn graph(json: &str) -> TraceGraph {
        TraceGraph::build(RawTrace::from_slice(json.as_bytes()).unwrap()).unwrap()
    }

    /// Chain 0 -> 1 -> 2 -> 3 -> 4, plus 5 under 1 and 6 under 0
    fn deep_graph() -> TraceGraph {
        graph(
            r#"{
                "tasks": [
                    {"created_by": 0, "first_step": 0},
                    {"created_by": 0, "first_step": 0},
                    {"created_by": 1, "first_step": 0},
                    {"created_by": 2, "first_step": 0},
                    {"created_by": 3, "first_step": 0},
                    {"created_by": 1, "first_step": 0},
                    {"created_by": 0, "first_step": 0}
                ],
                "objects": [
                    {"created_by": 2, "created_at": 0},
                    {"created_by": 0, "created_at": 0},
                    {"created_by": 4, "created_at": 0}
                ],
                "events": [
                    [2, null, {"SemaphoreCreated": 0}, null],
                    [4, null, {"SemaphoreAcquireFast": [0, 1]}, null],
                    [5, null, {"SemaphoreAcquireFast": [0, 1]}, null],
                    [0, null, {"SemaphoreCreated": 1}, null],
                    [4, null, {"SemaphoreCreated": 2}, null],
                    [3, null, {"SemaphoreAcquireFast": [2, 1]}, null]
                ]
            }"#,
        )
    }

    #[test]
    fn test_preorder_layout() {
        let hierarchy = Hierarchy::build(&deep_graph());
        let kinds: Vec<_> = hierarchy.entries().iter().map(|e| e.kind).collect();

        assert_eq!(
            kinds,
            vec![
                EntryKind::Task(0),
                EntryKind::Task(1),
                EntryKind::Task(2),
                EntryKind::Task(3),
                EntryKind::Task(4),
                EntryKind::Object(2),
                EntryKind::Task(5),
                EntryKind::Object(0),
                EntryKind::Task(6),
            ]
        );
        for (row, entry) in hierarchy.entries().iter().enumerate() {
            assert_eq!(entry.flat_index, row);
        }
        assert_eq!(hierarchy.row_of_task(4), Some(4));
        assert_eq!(hierarchy.path(4).unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_objects_attach_to_common_ancestor() {
        let hierarchy = Hierarchy::build(&deep_graph());

        // object 0 seen by 2, 4 and 5: common ancestor of 0/1/2 and 0/1/5 is 1
        let row = hierarchy.row_of_object(0).unwrap();
        let parent = hierarchy.entries()[row].parent.unwrap();
        assert_eq!(hierarchy.entries()[parent].kind, EntryKind::Task(1));

        // object 2 seen by 4 and 3: lands under 3
        let row = hierarchy.row_of_object(2).unwrap();
        let parent = hierarchy.entries()[row].parent.unwrap();
        assert_eq!(hierarchy.entries()[parent].kind, EntryKind::Task(3));

        // object 1 is only seen by its creator
        assert_eq!(hierarchy.row_of_object(1), None);
    }

    #[test]
    fn test_deep_rows_start_hidden() {
        let hierarchy = Hierarchy::build(&deep_graph());

        for entry in hierarchy.entries() {
            assert_eq!(entry.visible, entry.depth <= OPEN_DEPTH, "row {}", entry.flat_index);
        }
        // task 4 and object 2 at depth 4 share the visible index of task 3
        let task3 = hierarchy.entries()[3].visible_index;
        assert_eq!(hierarchy.entries()[4].visible_index, task3);
        assert_eq!(hierarchy.entries()[5].visible_index, task3);
        assert_eq!(hierarchy.entries()[6].visible_index, task3 + 1);
    }

    #[test]
    fn test_visible_index_monotonic_after_toggles() {
        let mut hierarchy = Hierarchy::build(&deep_graph());

        let check = |h: &Hierarchy| {
            let indices: Vec<_> = h.entries().iter().map(|e| e.visible_index).collect();
            assert!(indices.windows(2).all(|w| w[0] <= w[1]), "{:?}", indices);
            assert_eq!(indices.last().copied(), Some(h.visible_count() - 1));
        };

        check(&hierarchy);
        assert!(!hierarchy.toggle(1).unwrap());
        check(&hierarchy);
        assert!(!hierarchy.entries()[2].visible);
        assert_eq!(hierarchy.entries()[7].visible_index, hierarchy.entries()[1].visible_index);

        hierarchy.expand_all();
        check(&hierarchy);
        assert_eq!(hierarchy.visible_count(), hierarchy.len());

        hierarchy.collapse_all();
        check(&hierarchy);
        // root plus its direct children
        assert_eq!(hierarchy.visible_count(), 3);

        assert!(hierarchy.toggle(42).is_err());
    }
}
