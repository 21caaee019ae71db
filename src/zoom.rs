use serde::Serialize;
use std::ops::{Range, RangeInclusive};

use crate::trace::{Event, EventId, TaskId, TraceGraph};

/// A node of a per-task interval tree over kept-index space
#[derive(Debug, Clone, Serialize)]
pub struct ZoomNode {
    /// Inclusive kept-index range covered by this node
    pub min_id: usize,
    pub max_id: usize,

    pub depth: usize,

    /// Whether a visual boundary sits on each side: the outer edge of the
    /// task, or a switch between an occupied and an empty range
    pub border_left: bool,
    pub border_right: bool,

    /// First and last event of the task inside the range
    pub min_event: EventId,
    pub max_event: EventId,

    /// Some kept event inside the range, `None` when all are filtered
    pub kept: Option<EventId>,

    /// Kept events inside the range
    pub count: usize,

    #[serde(skip)]
    pub left: Option<Box<ZoomNode>>,
    #[serde(skip)]
    pub right: Option<Box<ZoomNode>>,
}

impl ZoomNode {
    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    pub fn children(&self) -> impl Iterator<Item = &ZoomNode> {
        self.left.iter().chain(self.right.iter()).map(|child| &**child)
    }

    pub fn span(&self) -> usize {
        self.max_id - self.min_id + 1
    }

    /// Coarsest nodes covering `range`, descending at most to `max_depth`.
    /// Nodes without kept events are never returned.
    pub fn trees_covering(&self, range: &RangeInclusive<usize>, max_depth: usize) -> Vec<&ZoomNode> {
        let mut out = Vec::new();
        if !range.is_empty() {
            self.collect(range, max_depth, &mut out);
        }
        out
    }

    fn collect<'a>(
        &'a self,
        range: &RangeInclusive<usize>,
        max_depth: usize,
        out: &mut Vec<&'a ZoomNode>,
    ) {
        if self.max_id < *range.start() || self.min_id > *range.end() {
            return;
        }
        if self.depth < max_depth && !self.is_leaf() {
            for child in self.children() {
                child.collect(range, max_depth, out);
            }
            return;
        }
        if self.count > 0 && self.kept.is_some() {
            out.push(self);
        }
    }
}

/// Builds one task's tree out of its event list.
///
/// `task_events` is sorted by event id, so kept indices along it never
/// decrease and split points can be found by binary search.
struct TreeBuilder<'a> {
    events: &'a [Event],
    task_events: &'a [EventId],
}

impl TreeBuilder<'_> {
    fn kept_index(&self, entry: usize) -> usize {
        self.events[self.task_events[entry]].kept_index
    }

    fn root(&self, top_size: usize) -> Option<ZoomNode> {
        if self.task_events.is_empty() {
            return None;
        }
        let last = self.task_events.len() - 1;
        Some(self.node(
            0..self.task_events.len(),
            self.kept_index(0),
            self.kept_index(last),
            top_size,
            0,
            (true, true),
        ))
    }

    /// Build the node covering `[min_id, max_id]` holding `entries`, which
    /// must be non-empty
    fn node(
        &self,
        entries: Range<usize>,
        min_id: usize,
        max_id: usize,
        target: usize,
        depth: usize,
        (border_left, border_right): (bool, bool),
    ) -> ZoomNode {
        let min_event = self.task_events[entries.start];
        let max_event = self.task_events[entries.end - 1];

        let (left, right) = if entries.len() > 1 && target >= 2 {
            self.split(entries.clone(), min_id, max_id, target, depth, (border_left, border_right))
        } else {
            (None, None)
        };

        let (count, kept) = if left.is_none() && right.is_none() {
            let mut kept_events = self.task_events[entries]
                .iter()
                .copied()
                .filter(|&e| !self.events[e].filtered);
            let kept = kept_events.next();
            (kept.map_or(0, |_| 1 + kept_events.count()), kept)
        } else {
            let children = left.iter().chain(right.iter());
            let count = children.clone().map(|c| c.count).sum();
            let kept = children.filter_map(|c| c.kept).next();
            (count, kept)
        };

        ZoomNode {
            min_id,
            max_id,
            depth,
            border_left,
            border_right,
            min_event,
            max_event,
            kept,
            count,
            left: left.map(Box::new),
            right: right.map(Box::new),
        }
    }

    /// Divide a node: the left child takes `target / 2` indices from
    /// `min_id`, the right child the rest of the node's range.
    fn split(
        &self,
        entries: Range<usize>,
        min_id: usize,
        max_id: usize,
        target: usize,
        depth: usize,
        (border_left, border_right): (bool, bool),
    ) -> (Option<ZoomNode>, Option<ZoomNode>) {
        let half = target / 2;
        let right_min = min_id + half;
        let has_right_range = right_min <= max_id;
        let left_max = if has_right_range { right_min - 1 } else { max_id };

        let split = entries.start
            + self.task_events[entries.clone()]
                .partition_point(|&e| self.events[e].kept_index < right_min);
        let left_entries = entries.start..split;
        let right_entries = split..entries.end;

        match (left_entries.is_empty(), right_entries.is_empty()) {
            (false, false) => (
                Some(self.node(left_entries, min_id, left_max, half, depth + 1, (border_left, false))),
                Some(self.node(
                    right_entries,
                    right_min,
                    max_id,
                    target - half,
                    depth + 1,
                    (false, border_right),
                )),
            ),
            (false, true) => {
                // an empty right range next to events is a boundary
                let right_border = has_right_range || border_right;
                (
                    Some(self.node(
                        left_entries,
                        min_id,
                        left_max,
                        half,
                        depth + 1,
                        (border_left, right_border),
                    )),
                    None,
                )
            }
            (true, false) => (
                None,
                Some(self.node(
                    right_entries,
                    right_min,
                    max_id,
                    target - half,
                    depth + 1,
                    (true, border_right),
                )),
            ),
            (true, true) => (None, None),
        }
    }
}

/// Level-of-detail index: one zoom tree per task
#[derive(Debug, Clone, Default)]
pub struct ZoomIndex {
    top_size: usize,
    trees: Vec<Option<ZoomNode>>,
    level_spans: Vec<usize>,
}

impl ZoomIndex {
    /// Build trees for every task from the current kept indices
    pub fn build(graph: &TraceGraph, kept_count: usize) -> Self {
        let top_size = kept_count.max(1).next_power_of_two();

        let trees: Vec<Option<ZoomNode>> = graph
            .tasks
            .iter()
            .map(|task| {
                TreeBuilder {
                    events: &graph.events,
                    task_events: &task.events,
                }
                .root(top_size)
            })
            .collect();

        let max_depth = trees.iter().flatten().map(tree_depth).max().unwrap_or(0);
        let level_spans = (0..=max_depth).map(|d| (top_size >> d).max(1)).collect();

        log::debug!(
            "Built zoom index: {} trees, top size {}, {} levels",
            trees.iter().flatten().count(),
            top_size,
            max_depth + 1
        );

        Self {
            top_size,
            trees,
            level_spans,
        }
    }

    /// Smallest power of two holding every kept event
    pub fn top_size(&self) -> usize {
        self.top_size
    }

    /// Nominal index span of a node at each depth
    pub fn level_spans(&self) -> &[usize] {
        &self.level_spans
    }

    /// `None` for tasks without events
    pub fn tree(&self, task: TaskId) -> Option<&ZoomNode> {
        self.trees.get(task).and_then(Option::as_ref)
    }

    /// Nodes of `task`'s tree covering `range`; empty when the task has no events
    pub fn trees_covering(
        &self,
        task: TaskId,
        range: &RangeInclusive<usize>,
        max_depth: usize,
    ) -> Vec<&ZoomNode> {
        self.tree(task)
            .map(|tree| tree.trees_covering(range, max_depth))
            .unwrap_or_default()
    }

    /// Deepest level whose nodes are still at least `min_node_px` wide when
    /// one kept index takes `px_per_index` pixels
    pub fn depth_for_density(&self, px_per_index: f64, min_node_px: f64) -> usize {
        self.level_spans
            .iter()
            .take_while(|&&span| span as f64 * px_per_index >= min_node_px)
            .count()
            .saturating_sub(1)
    }
}

fn tree_depth(node: &ZoomNode) -> usize {
    node.children()
        .map(tree_depth)
        .max()
        .unwrap_or(node.depth)
}
