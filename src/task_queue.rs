//! Task queue: a `Vec<Task>` behind one `Mutex` plus an index cursor. The
//! only externally observable property is exclusivity — each task is
//! handed to exactly one worker — so any MPMC-style structure underneath
//! would do.

use std::sync::Mutex;

use crate::error::{Result, SyncError};
use crate::table::Relation;

/// Enumerate all non-system, non-extension ordinary relations
/// (`relkind='r'`), largest first by on-disk page count, so long tables
/// are picked up early and parallelism does not tail off at the end.
pub fn relations_from_postgres_catalog(
    client: &mut postgres::Client,
    table_filter: Option<&str>,
) -> Result<Vec<Relation>> {
    let rows = if let Some(table) = table_filter {
        let relation: Relation = table.parse().unwrap();
        client
            .query(
                "SELECT n.nspname, c.relname
                 FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace
                 WHERE c.relkind = 'r' AND n.nspname = $1 AND c.relname = $2",
                &[&relation.schema.as_deref().unwrap_or("public"), &relation.name],
            )
            .map_err(|e| SyncError::Query(e.to_string()))?
    } else {
        client
            .query(
                "SELECT n.nspname, c.relname
                 FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace
                 WHERE c.relkind = 'r'
                   AND n.nspname NOT IN ('pg_catalog', 'information_schema')
                   AND n.nspname NOT LIKE 'pg\\_%'
                 ORDER BY c.relpages DESC",
                &[],
            )
            .map_err(|e| SyncError::Query(e.to_string()))?
    };
    Ok(rows
        .iter()
        .map(|row| Relation::qualified(row.get::<_, String>(0), row.get::<_, String>(1)))
        .collect())
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: i64,
    pub relation: Relation,
    pub rows_copied: u64,
    pub complete: bool,
}

impl Task {
    pub fn new(id: i64, relation: Relation) -> Self {
        Task {
            id,
            relation,
            rows_copied: 0,
            complete: false,
        }
    }
}

/// Handed to a worker by `TaskQueue::pop`; the worker reports back through
/// `TaskQueue::mark_complete` when done. Exactly one worker owns a task
/// between dequeue and completion.
pub struct TaskHandle {
    pub id: i64,
    pub relation: Relation,
}

struct Inner {
    tasks: Vec<Task>,
    next_index: usize,
}

pub struct TaskQueue {
    inner: Mutex<Inner>,
}

impl TaskQueue {
    pub fn new(relations: Vec<Relation>) -> Self {
        let tasks = relations
            .into_iter()
            .enumerate()
            .map(|(i, relation)| Task::new(i as i64, relation))
            .collect();
        TaskQueue {
            inner: Mutex::new(Inner { tasks, next_index: 0 }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically remove and return the head task, or `None` if the queue
    /// is drained.
    pub fn pop(&self) -> Option<TaskHandle> {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.next_index;
        if idx >= inner.tasks.len() {
            return None;
        }
        inner.next_index += 1;
        let task = &inner.tasks[idx];
        Some(TaskHandle {
            id: task.id,
            relation: task.relation.clone(),
        })
    }

    pub fn mark_complete(&self, id: i64, rows_copied: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(task) = inner.tasks.iter_mut().find(|t| t.id == id) {
            task.rows_copied = rows_copied;
            task.complete = true;
        }
    }

    /// Snapshot of all tasks for final reporting.
    pub fn snapshot(&self) -> Vec<Task> {
        self.inner.lock().unwrap().tasks.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relations(n: usize) -> Vec<Relation> {
        (0..n).map(|i| Relation::bare(format!("t{i}"))).collect()
    }

    #[test]
    fn pop_drains_in_order_then_returns_none() {
        let q = TaskQueue::new(relations(3));
        assert_eq!(q.pop().unwrap().id, 0);
        assert_eq!(q.pop().unwrap().id, 1);
        assert_eq!(q.pop().unwrap().id, 2);
        assert!(q.pop().is_none());
    }

    #[test]
    fn concurrent_pops_never_hand_out_the_same_task() {
        use std::sync::Arc;
        use std::thread;

        let q = Arc::new(TaskQueue::new(relations(200)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(handle) = q.pop() {
                    seen.push(handle.id);
                }
                seen
            }));
        }
        let mut all_ids: Vec<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all_ids.sort_unstable();
        let expected: Vec<i64> = (0..200).collect();
        assert_eq!(all_ids, expected);
    }

    #[test]
    fn mark_complete_records_row_count() {
        let q = TaskQueue::new(relations(1));
        let handle = q.pop().unwrap();
        q.mark_complete(handle.id, 42);
        let snap = q.snapshot();
        assert!(snap[0].complete);
        assert_eq!(snap[0].rows_copied, 42);
    }
}
