mod config;
mod expr;

pub use config::FilterConfig;
pub use expr::{Clause, FilterExpr, Matcher, parse_expr};

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::trace::{Category, Event, TraceGraph};

/// Errors raised while building filters
#[derive(Debug, Clone, thiserror::Error)]
pub enum FilterError {
    #[error("Invalid filter expression '{0}': {1}")]
    InvalidExpression(String, String),

    #[error("Unknown filter key '{0}'")]
    UnknownKey(String),

    #[error("Invalid value '{value}' for key '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("Operator '~' is not supported for key '{0}'")]
    UnsupportedContains(String),

    #[error("Invalid filter config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type FilterFn = dyn Fn(&TraceGraph, &Event) -> bool + Send + Sync;

pub const CATEGORY_FILTER_TITLE: &str = "Categories";

/// What a filter checks. Returning `true` keeps the event.
#[derive(Clone)]
pub enum Predicate {
    /// Per-category checkboxes, indexed by [`Category::index`]
    Categories([bool; Category::COUNT]),
    Expr(FilterExpr),
    Custom(Arc<FilterFn>),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Categories(enabled) => f.debug_tuple("Categories").field(enabled).finish(),
            Predicate::Expr(expr) => f.debug_tuple("Expr").field(&expr.text).finish(),
            Predicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Predicate {
    fn accepts(&self, graph: &TraceGraph, event: &Event) -> bool {
        match self {
            Predicate::Categories(enabled) => enabled[event.category.index()],
            Predicate::Expr(expr) => expr.matches(event),
            Predicate::Custom(f) => f(graph, event),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub title: String,
    pub enabled: bool,
    builtin: bool,
    predicate: Predicate,
    /// Events this filter was the first to reject on the last rebuild
    pub rejected: usize,
}

impl Filter {
    pub fn new(title: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            title: title.into(),
            enabled: true,
            builtin: false,
            predicate,
            rejected: 0,
        }
    }

    /// Filter keeping the events that match `text`
    pub fn from_expr(text: &str) -> Result<Self, FilterError> {
        let expr = parse_expr(text)?;
        Ok(Self::new(expr.text.clone(), Predicate::Expr(expr)))
    }

    pub fn custom<F>(title: impl Into<String>, f: F) -> Self
    where
        F: Fn(&TraceGraph, &Event) -> bool + Send + Sync + 'static,
    {
        Self::new(title, Predicate::Custom(Arc::new(f)))
    }

    fn categories() -> Self {
        let mut enabled = [false; Category::COUNT];
        for category in Category::ALL {
            enabled[category.index()] = category.enabled_by_default();
        }
        Self {
            builtin: true,
            ..Self::new(CATEGORY_FILTER_TITLE, Predicate::Categories(enabled))
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn accepts(&self, graph: &TraceGraph, event: &Event) -> bool {
        self.predicate.accepts(graph, event)
    }
}

/// Counts produced by one rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterResult {
    pub kept_count: usize,
    /// Kept events per category
    pub per_category_counts: BTreeMap<Category, usize>,
    /// All events per category, filtered or not
    pub per_category_totals: BTreeMap<Category, usize>,
}

/// Ordered filters. An event is kept iff every enabled filter accepts it.
#[derive(Debug, Clone)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl Default for FilterChain {
    fn default() -> Self {
        Self {
            filters: vec![Filter::categories()],
        }
    }
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Append a user filter. A user filter with the same title already in
    /// the chain makes this a no-op returning `false`.
    pub fn add(&mut self, filter: Filter) -> bool {
        let duplicate = self
            .filters
            .iter()
            .any(|f| !f.builtin && f.title == filter.title);
        if duplicate {
            log::debug!("Filter '{}' already in chain", filter.title);
            return false;
        }
        self.filters.push(filter);
        true
    }

    pub fn add_expr(&mut self, text: &str) -> Result<bool, FilterError> {
        Ok(self.add(Filter::from_expr(text)?))
    }

    /// Remove the user filter named `title`. Built-ins stay.
    pub fn remove(&mut self, title: &str) -> bool {
        let before = self.filters.len();
        self.filters.retain(|f| f.builtin || f.title != title);
        before != self.filters.len()
    }

    /// Enable or disable every filter named `title`, returning whether any matched
    pub fn set_enabled(&mut self, title: &str, enabled: bool) -> bool {
        let mut found = false;
        for filter in self.filters.iter_mut().filter(|f| f.title == title) {
            filter.enabled = enabled;
            found = true;
        }
        found
    }

    pub fn set_category(&mut self, category: Category, enabled: bool) {
        for filter in &mut self.filters {
            if let (true, Predicate::Categories(flags)) = (filter.builtin, &mut filter.predicate) {
                flags[category.index()] = enabled;
            }
        }
    }

    pub fn category_enabled(&self, category: Category) -> bool {
        self.filters.iter().all(|f| match (&f.predicate, f.builtin) {
            (Predicate::Categories(flags), true) => flags[category.index()],
            _ => true,
        })
    }

    /// Index of the first enabled filter rejecting `event`
    fn first_rejecting(&self, graph: &TraceGraph, event: &Event) -> Option<usize> {
        self.filters
            .iter()
            .position(|f| f.enabled && !f.accepts(graph, event))
    }

    /// Recompute `filtered` and `kept_index` on every event.
    ///
    /// Kept events are numbered densely in log order. A filtered event gets
    /// the index of the last kept event before it, or 0.
    pub fn apply(&mut self, graph: &mut TraceGraph) -> FilterResult {
        let snapshot: &TraceGraph = graph;
        let verdicts: Vec<Option<usize>> = snapshot
            .events
            .iter()
            .map(|event| self.first_rejecting(snapshot, event))
            .collect();

        for filter in &mut self.filters {
            filter.rejected = 0;
        }

        let mut result = FilterResult::default();
        for category in Category::ALL {
            result.per_category_counts.insert(category, 0);
            result.per_category_totals.insert(category, 0);
        }

        let mut kept: usize = 0;
        for (event, verdict) in graph.events.iter_mut().zip(verdicts) {
            *result.per_category_totals.entry(event.category).or_default() += 1;
            match verdict {
                Some(filter) => {
                    self.filters[filter].rejected += 1;
                    event.filtered = true;
                    event.kept_index = kept.saturating_sub(1);
                }
                None => {
                    event.filtered = false;
                    event.kept_index = kept;
                    kept += 1;
                    *result.per_category_counts.entry(event.category).or_default() += 1;
                }
            }
        }
        result.kept_count = kept;

        log::info!(
            "Filter chain ({} filters) kept {} of {} events",
            self.filters.len(),
            kept,
            graph.events.len()
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::RawTrace;

    /// One task cycling through every category
    fn graph() -> TraceGraph {
        let events: Vec<String> = (0..10)
            .map(|i| {
                let kind = match i % 5 {
                    0 => r#"{"Schedule": [0]}"#,
                    1 => r#""Tick""#,
                    2 => r#"{"SemaphoreAcquireFast": [0, 1]}"#,
                    3 => r#""Random""#,
                    _ => r#"{"TaskCreated": [1, false]}"#,
                };
                format!("[0, null, {}, null]", kind)
            })
            .collect();
        let json = format!(
            r#"{{
                "tasks": [{{"created_by": 0, "first_step": 0}}, {{"created_by": 0, "first_step": 4}}],
                "objects": [{{"created_by": 0, "created_at": 0}}],
                "events": [{}]
            }}"#,
            events.join(",")
        );
        TraceGraph::build(RawTrace::from_slice(json.as_bytes()).unwrap()).unwrap()
    }

    fn kept_indices(graph: &TraceGraph) -> Vec<Option<usize>> {
        graph
            .events
            .iter()
            .map(|e| (!e.filtered).then_some(e.kept_index))
            .collect()
    }

    #[test]
    fn test_default_chain_hides_schedule_and_tick() {
        let mut graph = graph();
        let mut chain = FilterChain::default();
        let result = chain.apply(&mut graph);

        assert_eq!(result.kept_count, 6);
        assert_eq!(result.per_category_counts[&Category::Schedule], 0);
        assert_eq!(result.per_category_counts[&Category::Semaphore], 2);
        assert_eq!(result.per_category_totals[&Category::Tick], 2);
        assert_eq!(chain.filters()[0].rejected, 4);

        assert_eq!(
            kept_indices(&graph),
            vec![None, None, Some(0), Some(1), Some(2), None, None, Some(3), Some(4), Some(5)]
        );
        // filtered events sit in the slot of the previous kept event
        assert_eq!(graph.events[0].kept_index, 0);
        assert_eq!(graph.events[5].kept_index, 2);
    }

    #[test]
    fn test_kept_indices_are_dense() {
        let mut graph = graph();
        let mut chain = FilterChain::default();
        chain.set_category(Category::Tick, true);
        chain.add_expr("!kind=Random").unwrap();
        let result = chain.apply(&mut graph);

        let kept: Vec<usize> = kept_indices(&graph).into_iter().flatten().collect();
        assert_eq!(kept, (0..result.kept_count).collect::<Vec<_>>());
        for event in &graph.events {
            let before = graph.events[..event.id].iter().filter(|e| !e.filtered).count();
            if !event.filtered {
                assert_eq!(event.kept_index, before);
            }
        }
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let mut graph = graph();
        let mut chain = FilterChain::default();
        chain.add_expr("task=0").unwrap();

        let first = chain.apply(&mut graph);
        let first_indices = kept_indices(&graph);
        let second = chain.apply(&mut graph);

        assert_eq!(first, second);
        assert_eq!(first_indices, kept_indices(&graph));
    }

    #[test]
    fn test_disable_enable_round_trip() {
        let mut graph = graph();
        let mut chain = FilterChain::default();
        chain.add(Filter::custom("even", |_, e| e.id % 2 == 0));

        let original = chain.apply(&mut graph);
        let original_indices = kept_indices(&graph);

        assert!(chain.set_enabled("even", false));
        let relaxed = chain.apply(&mut graph);
        assert!(relaxed.kept_count > original.kept_count);

        assert!(chain.set_enabled("even", true));
        assert_eq!(chain.apply(&mut graph), original);
        assert_eq!(kept_indices(&graph), original_indices);
    }

    #[test]
    fn test_add_and_remove_user_filters() {
        let mut chain = FilterChain::default();

        assert!(chain.add_expr("task=1").unwrap());
        assert!(!chain.add_expr("task=1").unwrap());
        // a user filter may share a built-in's title
        assert!(chain.add(Filter::custom(CATEGORY_FILTER_TITLE, |_, _| true)));
        assert_eq!(chain.filters().len(), 3);

        assert!(chain.remove(CATEGORY_FILTER_TITLE));
        assert!(chain.filters()[0].is_builtin());
        assert!(!chain.remove(CATEGORY_FILTER_TITLE));
        assert!(chain.remove("task=1"));
        assert_eq!(chain.filters().len(), 1);

        assert!(chain.add_expr("task=").is_err());
    }

    #[test]
    fn test_everything_filtered() {
        let mut graph = graph();
        let mut chain = FilterChain::default();
        chain.add(Filter::custom("none", |_, _| false));
        let result = chain.apply(&mut graph);

        assert_eq!(result.kept_count, 0);
        assert!(graph.events.iter().all(|e| e.filtered && e.kept_index == 0));
        // the category filter rejects first where it applies
        assert_eq!(chain.filters()[0].rejected, 4);
        assert_eq!(chain.filters()[1].rejected, 6);
    }

    #[test]
    fn test_category_toggles() {
        let mut chain = FilterChain::default();
        assert!(!chain.category_enabled(Category::Tick));
        chain.set_category(Category::Tick, true);
        assert!(chain.category_enabled(Category::Tick));

        chain.set_enabled(CATEGORY_FILTER_TITLE, false);
        let mut graph = graph();
        assert_eq!(chain.apply(&mut graph).kept_count, 10);
    }
}
