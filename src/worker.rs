//! Worker pool. Each of the N workers owns its own origin and destination
//! sessions for its whole lifetime and drains the shared task queue until
//! empty or until it hits an error, at which point it marks itself failed
//! and stops — no retry within the copy phase.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::config::{RunConfig, SourceKind};
use crate::snapshot::SnapshotHandle;
use crate::status::{StatusEvent, StatusSink};
use crate::table::Relation;
use crate::task_queue::TaskQueue;
use crate::version::PgVersion;
use crate::wire::mysql_session::MySqlSession;
use crate::wire::pg_session::{OrdinarySession, SessionPurpose};

/// Per-worker outcome, aggregated by the orchestrator after join.
pub struct WorkerResult {
    pub worker_id: usize,
    pub rows_copied: u64,
    pub all_ok: bool,
}

pub struct WorkerContext {
    pub worker_id: usize,
    pub config: RunConfig,
    pub snapshot: Arc<SnapshotHandle>,
    pub task_queue: Arc<TaskQueue>,
    pub dst_is_greenplum: bool,
    pub dst_version: Option<PgVersion>,
    pub sink: Arc<dyn StatusSink>,
}

/// Run one worker's whole loop to completion. Intended to be invoked
/// inside `std::thread::spawn`.
pub fn run_worker(ctx: WorkerContext) -> WorkerResult {
    match run_worker_inner(&ctx) {
        Ok(rows) => WorkerResult {
            worker_id: ctx.worker_id,
            rows_copied: rows,
            all_ok: true,
        },
        Err(e) => {
            ctx.sink.emit(StatusEvent::TaskFailed {
                task_id: -1,
                relation: String::new(),
                error: e.to_string(),
            });
            WorkerResult {
                worker_id: ctx.worker_id,
                rows_copied: 0,
                all_ok: false,
            }
        }
    }
}

fn run_worker_inner(ctx: &WorkerContext) -> crate::error::Result<u64> {
    let mut total_rows = 0u64;

    match ctx.config.source_kind {
        SourceKind::Postgres => {
            let mut origin = OrdinarySession::connect(&ctx.config.source, SessionPurpose::Copy)?;
            origin.apply_common_setup(false)?;
            let mut destination = OrdinarySession::connect(&ctx.config.destination, SessionPurpose::Copy)?;
            destination.apply_common_setup(ctx.dst_is_greenplum)?;

            while let Some(handle) = ctx.task_queue.pop() {
                ctx.sink.emit(StatusEvent::TaskStarted {
                    task_id: handle.id,
                    relation: handle.relation.to_string(),
                });
                match copy_one_pg_table(&mut origin, &mut destination, &handle.relation, &ctx.snapshot) {
                    Ok(rows) => {
                        ctx.task_queue.mark_complete(handle.id, rows);
                        total_rows += rows;
                        ctx.sink.emit(StatusEvent::TaskCompleted {
                            task_id: handle.id,
                            relation: handle.relation.to_string(),
                            rows_copied: rows,
                        });
                    }
                    Err(e) => {
                        ctx.sink.emit(StatusEvent::TaskFailed {
                            task_id: handle.id,
                            relation: handle.relation.to_string(),
                            error: e.to_string(),
                        });
                        return Err(e);
                    }
                }
            }
        }
        SourceKind::MySql => {
            let mut origin = MySqlSession::connect(&ctx.config.source)?;
            let mut destination = OrdinarySession::connect(&ctx.config.destination, SessionPurpose::Copy)?;
            destination.apply_common_setup(ctx.dst_is_greenplum)?;
            destination.apply_destination_copy_setup(true)?;

            while let Some(handle) = ctx.task_queue.pop() {
                ctx.sink.emit(StatusEvent::TaskStarted {
                    task_id: handle.id,
                    relation: handle.relation.to_string(),
                });
                match copy_one_mysql_table(&mut origin, &mut destination, &handle.relation) {
                    Ok(rows) => {
                        ctx.task_queue.mark_complete(handle.id, rows);
                        total_rows += rows;
                        ctx.sink.emit(StatusEvent::TaskCompleted {
                            task_id: handle.id,
                            relation: handle.relation.to_string(),
                            rows_copied: rows,
                        });
                    }
                    Err(e) => {
                        ctx.sink.emit(StatusEvent::TaskFailed {
                            task_id: handle.id,
                            relation: handle.relation.to_string(),
                            error: e.to_string(),
                        });
                        return Err(e);
                    }
                }
            }
        }
    }

    Ok(total_rows)
}

fn copy_one_pg_table(
    origin: &mut OrdinarySession,
    destination: &mut OrdinarySession,
    relation: &Relation,
    snapshot: &SnapshotHandle,
) -> crate::error::Result<u64> {
    origin.begin_repeatable_read_readonly(snapshot.snapshot_name())?;
    destination.begin_read_committed()?;
    destination.apply_destination_copy_setup(false)?;

    let copy_out_sql = format!("COPY {} TO stdout", relation.quoted());
    let copy_in_sql = format!("COPY {} FROM stdin", relation.quoted());

    let result = relay_copy(origin, destination, &copy_out_sql, &copy_in_sql);

    match result {
        Ok(chunks) => {
            destination.commit()?;
            origin.rollback()?;
            Ok(chunks)
        }
        Err(e) => {
            let _ = destination.rollback();
            let _ = origin.rollback();
            Err(e)
        }
    }
}

/// Relay raw `COPY ... TO stdout` chunks straight into `COPY ... FROM
/// stdin`, one `PQgetCopyData`-sized chunk at a time, with no whole-table
/// buffering in between. Chunk count approximates rows copied (spec §4.4
/// step 6 / §9: the PG path counts transfer chunks, not rows).
fn relay_copy(
    origin: &mut OrdinarySession,
    destination: &mut OrdinarySession,
    copy_out_sql: &str,
    copy_in_sql: &str,
) -> crate::error::Result<u64> {
    let mut reader = origin.start_copy_out(copy_out_sql)?;
    let mut writer = destination.start_copy_in(copy_in_sql)?;

    let mut chunks = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| crate::error::SyncError::Query(e.to_string()))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .map_err(|e| crate::error::SyncError::Query(e.to_string()))?;
        chunks += 1;
    }
    writer.finish().map_err(|e| crate::error::SyncError::Query(e.to_string()))?;
    Ok(chunks)
}

fn copy_one_mysql_table(
    origin: &mut MySqlSession,
    destination: &mut OrdinarySession,
    relation: &Relation,
) -> crate::error::Result<u64> {
    destination.begin_read_committed()?;

    let rows = origin.copy_rows_formatted(relation)?;
    let copy_in_sql = format!(
        "COPY {} FROM stdin WITH (FORMAT csv, DELIMITER '|', QUOTE '''')",
        relation.quoted()
    );
    let result = destination.copy_in_rows(&copy_in_sql, rows.into_iter());

    match result {
        Ok(count) => {
            destination.commit()?;
            Ok(count)
        }
        Err(e) => {
            let _ = destination.rollback();
            Err(e)
        }
    }
}
