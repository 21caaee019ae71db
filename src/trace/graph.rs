use std::collections::BTreeSet;
use std::sync::Arc;

use super::{
    Event, EventId, EventKind, Frame, Object, ObjectId, RawTrace, Task, TaskId, TraceError,
    TraceResult, checked,
};

/// Cross-linked tasks, objects and events of one trace
#[derive(Debug, Clone)]
pub struct TraceGraph {
    pub tasks: Vec<Task>,
    pub objects: Vec<Object>,
    pub events: Vec<Event>,
}

impl TraceGraph {
    /// Build the graph from a raw trace.
    ///
    /// Tasks are built first, then objects, then events in log order: events
    /// dereference both earlier tables. Any dangling id fails the whole build.
    pub fn build(raw: RawTrace) -> TraceResult<Self> {
        let end = raw.events.len().saturating_sub(1);
        let mut tasks = build_tasks(&raw, end)?;
        let mut objects = build_objects(&raw, end)?;
        let files: Vec<Arc<str>> = raw.files.into_iter().map(|f| f.path.into()).collect();
        let functions: Vec<Arc<str>> = raw.functions.into_iter().map(|f| f.name.into()).collect();

        let task_count = tasks.len();
        let object_count = objects.len();
        let mut events = Vec::with_capacity(raw.events.len());

        for (id, (task, backtrace, kind, clock)) in raw.events.into_iter().enumerate() {
            let referrer = || format!("event {}", id);
            checked(&tasks, "task", task, referrer)?;

            let backtrace = backtrace
                .map(|frames| {
                    frames
                        .into_iter()
                        .map(|(file, function, line, column)| -> TraceResult<Frame> {
                            Ok(Frame {
                                path: checked(&files, "file", file, referrer)?.clone(),
                                function: checked(&functions, "function", function, referrer)?
                                    .clone(),
                                line,
                                column,
                            })
                        })
                        .collect::<TraceResult<Vec<_>>>()
                })
                .transpose()?;

            if let Some(obj) = kind.object() {
                let object = objects
                    .get_mut(obj)
                    .ok_or_else(|| unknown("object", obj, id, object_count))?;
                object.seen_by.insert(task);
                match &kind {
                    EventKind::SemaphoreCreated(_) => object.created_at = id,
                    EventKind::SemaphoreClosed(_) => object.last_event = id,
                    _ => {}
                }
            }

            match &kind {
                EventKind::TaskCreated(new_task, is_future) => {
                    let created = tasks
                        .get_mut(*new_task)
                        .ok_or_else(|| unknown("task", *new_task, id, task_count))?;
                    created.created_at = Some(id);
                    created.is_future = *is_future;
                }
                EventKind::TaskTerminated => {
                    tasks[task].last_step = id;
                }
                EventKind::SemaphoreAcquireUnblocked(_, _, unblocked) => {
                    checked(&tasks, "task", *unblocked, referrer)?;
                }
                EventKind::Schedule(decision) => {
                    for runnable_task in decision {
                        checked(&tasks, "task", *runnable_task, referrer)?;
                    }
                    for t in tasks.iter_mut() {
                        if t.is_alive_at(id) && !decision.contains(&t.id) {
                            t.blocked_at.push(id);
                        }
                    }
                }
                _ => {}
            }

            tasks[task].events.push(id);

            events.push(Event {
                id,
                task,
                backtrace,
                category: kind.category(),
                kind,
                clock,
                filtered: false,
                kept_index: id,
            });
        }

        log::debug!(
            "Built trace graph: {} tasks, {} objects, {} events",
            tasks.len(),
            objects.len(),
            events.len()
        );

        Ok(Self {
            tasks,
            objects,
            events,
        })
    }

    pub fn task(&self, id: TaskId) -> TraceResult<&Task> {
        self.tasks.get(id).ok_or(TraceError::OutOfRange {
            table: "task",
            index: id,
            len: self.tasks.len(),
        })
    }

    pub fn object(&self, id: ObjectId) -> TraceResult<&Object> {
        self.objects.get(id).ok_or(TraceError::OutOfRange {
            table: "object",
            index: id,
            len: self.objects.len(),
        })
    }

    pub fn event(&self, id: EventId) -> TraceResult<&Event> {
        self.events.get(id).ok_or(TraceError::OutOfRange {
            table: "event",
            index: id,
            len: self.events.len(),
        })
    }

    /// Task ids from the root down to `id`, both included
    pub fn task_path(&self, id: TaskId) -> TraceResult<Vec<TaskId>> {
        let mut path = vec![id];
        let mut current = self.task(id)?;
        while current.id != 0 {
            current = self.task(current.created_by)?;
            path.push(current.id);
        }
        path.reverse();
        Ok(path)
    }

    /// Tasks alive at `event` that the scheduler could not pick
    pub fn blocked_tasks_at(&self, event: EventId) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.blocked_at.binary_search(&event).is_ok())
            .map(|t| t.id)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn unknown(table: &'static str, index: usize, event: EventId, len: usize) -> TraceError {
    TraceError::UnknownReference {
        table,
        index,
        referrer: format!("event {}", event),
        len,
    }
}

fn build_tasks(raw: &RawTrace, end: EventId) -> TraceResult<Vec<Task>> {
    let step_limit = raw.events.len().max(1);
    let mut tasks: Vec<Task> = Vec::with_capacity(raw.tasks.len());

    for (id, raw_task) in raw.tasks.iter().enumerate() {
        let valid_creator = if id == 0 {
            raw_task.created_by == 0
        } else {
            raw_task.created_by < id
        };
        if !valid_creator {
            return Err(TraceError::InvalidCreator {
                task: id,
                creator: raw_task.created_by,
            });
        }
        if raw_task.first_step >= step_limit {
            return Err(TraceError::UnknownReference {
                table: "event",
                index: raw_task.first_step,
                referrer: format!("task {}", id),
                len: raw.events.len(),
            });
        }

        if id != 0 {
            tasks[raw_task.created_by].children.push(id);
        }
        tasks.push(Task {
            id,
            created_by: raw_task.created_by,
            name: raw_task.name.clone(),
            first_step: raw_task.first_step,
            last_step: end,
            created_at: None,
            is_future: false,
            children: Vec::new(),
            events: Vec::new(),
            blocked_at: Vec::new(),
        });
    }

    if tasks.is_empty() {
        return Err(TraceError::InvalidFormat("trace has no root task".to_string()));
    }

    Ok(tasks)
}

fn build_objects(raw: &RawTrace, end: EventId) -> TraceResult<Vec<Object>> {
    let step_limit = raw.events.len().max(1);
    raw.objects
        .iter()
        .enumerate()
        .map(|(id, raw_object)| -> TraceResult<Object> {
            checked(&raw.tasks, "task", raw_object.created_by, || {
                format!("object {}", id)
            })?;
            if raw_object.created_at >= step_limit {
                return Err(TraceError::UnknownReference {
                    table: "event",
                    index: raw_object.created_at,
                    referrer: format!("object {}", id),
                    len: raw.events.len(),
                });
            }
            Ok(Object {
                id,
                created_by: raw_object.created_by,
                created_at: raw_object.created_at,
                name: raw_object.name.clone(),
                kind: raw_object.kind.clone(),
                seen_by: BTreeSet::new(),
                last_event: end,
            })
        })
        .collect()
}
