//! Status sink the core emits structured progress on.

use std::time::Duration;

/// One event emitted as the run progresses. The CLI's default sink logs
/// these via `tracing`; tests can supply an in-memory sink to assert on.
#[derive(Clone, Debug)]
pub enum StatusEvent {
    TaskStarted { task_id: i64, relation: String },
    TaskCompleted { task_id: i64, relation: String, rows_copied: u64 },
    TaskFailed { task_id: i64, relation: String, error: String },
    ReplicationSlotCreated { slot_name: String, consistent_point: String },
    ReplicationSlotReused { slot_name: String },
    StandbyStatusSent { write_lsn: String, flush_lsn: String },
    JournalEntryWritten { relation: String },
    FullSyncComplete,
    RunComplete(Report),
}

pub trait StatusSink: Send + Sync {
    fn emit(&self, event: StatusEvent);
}

/// Default sink: routes every event through `tracing`.
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn emit(&self, event: StatusEvent) {
        match event {
            StatusEvent::TaskStarted { task_id, relation } => {
                tracing::info!(task_id, relation = %relation, "task started");
            }
            StatusEvent::TaskCompleted { task_id, relation, rows_copied } => {
                tracing::info!(task_id, relation = %relation, rows_copied, "task completed");
            }
            StatusEvent::TaskFailed { task_id, relation, error } => {
                tracing::warn!(task_id, relation = %relation, error = %error, "task failed");
            }
            StatusEvent::ReplicationSlotCreated { slot_name, consistent_point } => {
                tracing::info!(slot_name = %slot_name, consistent_point = %consistent_point, "replication slot created");
            }
            StatusEvent::ReplicationSlotReused { slot_name } => {
                tracing::warn!(slot_name = %slot_name, "reusing existing replication slot, no snapshot bound");
            }
            StatusEvent::StandbyStatusSent { write_lsn, flush_lsn } => {
                tracing::debug!(write_lsn = %write_lsn, flush_lsn = %flush_lsn, "standby status sent");
            }
            StatusEvent::JournalEntryWritten { relation } => {
                tracing::debug!(relation = %relation, "journal entry written");
            }
            StatusEvent::FullSyncComplete => {
                tracing::info!("full sync complete, decoder continues tailing until signal or fatal error");
            }
            StatusEvent::RunComplete(report) => {
                tracing::info!(
                    rows_by_worker = report.total_worker_rows(),
                    rows_by_task = report.total_task_rows(),
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    had_errors = report.had_errors,
                    "job migrate row {} task row {}",
                    report.total_worker_rows(),
                    report.total_task_rows(),
                );
            }
        }
    }
}

/// Final report produced by the orchestrator at join time.
#[derive(Clone, Debug, Default)]
pub struct Report {
    pub rows_by_worker: Vec<(usize, u64, bool)>,
    pub rows_by_task: Vec<(i64, String, u64)>,
    pub elapsed: Duration,
    pub had_errors: bool,
}

impl Report {
    pub fn total_worker_rows(&self) -> u64 {
        self.rows_by_worker.iter().map(|(_, rows, _)| rows).sum()
    }

    pub fn total_task_rows(&self) -> u64 {
        self.rows_by_task.iter().map(|(_, _, rows)| rows).sum()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "job migrate row {} task row {}",
            self.total_worker_rows(),
            self.total_task_rows()
        )
    }
}
