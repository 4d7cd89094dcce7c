//! Orchestrator: lifecycle, signal handling, aggregate counters, final
//! report. Ctrl-C wiring goes through the `ctrlc` crate; the copy workers
//! and the decoder thread are each spawned and joined independently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use postgres::NoTls;

use crate::config::{RunConfig, SourceKind, DEFAULT_KEEPALIVE_INTERVAL_SECS, JOURNAL_TABLE};
use crate::decoder_thread::{self, DecoderThreadConfig};
use crate::error::{Result, SyncError};
use crate::replication::Lsn;
use crate::snapshot::{self, SnapshotHandle};
use crate::status::{Report, StatusEvent, StatusSink};
use crate::table::Relation;
use crate::task_queue::{relations_from_postgres_catalog, TaskQueue};
use crate::version;
use crate::wire::mysql_session::MySqlSession;
use crate::worker::{self, WorkerContext};

/// Run one full migration to completion. Returns the final `Report`;
/// `Report::had_errors` tells the caller whether any worker failed — the
/// run itself still returns `Ok` even when a worker failed.
pub fn run(config: RunConfig, sink: Arc<dyn StatusSink>) -> Result<Report> {
    let started = Instant::now();

    let mut source_client = postgres::Client::connect(&config.source.to_conninfo("_main"), NoTls)
        .map_err(|e| SyncError::Connection { purpose: "source validation", source: anyhow::anyhow!(e) })?;
    let mut destination_client = postgres::Client::connect(&config.destination.to_conninfo("_main"), NoTls)
        .map_err(|e| SyncError::Connection { purpose: "destination validation", source: anyhow::anyhow!(e) })?;

    let src_version = match config.source_kind {
        SourceKind::Postgres => Some(version::detect_pg_version(&mut source_client)?),
        SourceKind::MySql => None,
    };
    let dst_version = version::detect_pg_version(&mut destination_client)?;
    let dst_is_greenplum = version::detect_is_greenplum(&mut destination_client)?;

    let (snapshot_handle, _snapshot_keepalive) =
        snapshot::establish(config.source_kind, src_version, &mut source_client, &config.source)?;
    emit_snapshot_status(&sink, &snapshot_handle);
    let snapshot_handle = Arc::new(snapshot_handle);
    // `_snapshot_keepalive` holds open whichever session exported the
    // snapshot; it must outlive every worker's `SET TRANSACTION SNAPSHOT`,
    // so it stays bound in this function's scope until after the workers
    // (and the decoder, which never binds to it) are joined below.

    let relations = discover_relations(&config, &mut source_client)?;
    let task_queue = Arc::new(TaskQueue::new(relations));

    ensure_journal_table_reachable(&config)?;

    let time_to_abort = Arc::new(AtomicBool::new(false));
    let full_sync_complete = Arc::new(AtomicBool::new(false));
    install_sigint_handler(Arc::clone(&time_to_abort))?;

    let decoder_handle = if snapshot_handle.replication_enabled() {
        let start_lsn = match &*snapshot_handle {
            SnapshotHandle::LogicalSlot { consistent_point, .. } => *consistent_point,
            _ => Lsn::ZERO,
        };
        let decoder_cfg = DecoderThreadConfig {
            source: config.source.clone(),
            local: config.local.clone(),
            start_lsn,
            keepalive_interval: std::time::Duration::from_secs(DEFAULT_KEEPALIVE_INTERVAL_SECS),
            time_to_abort: Arc::clone(&time_to_abort),
            sink: Arc::clone(&sink),
        };
        Some(std::thread::spawn(move || decoder_thread::run(decoder_cfg)))
    } else {
        None
    };

    let mut worker_handles = Vec::with_capacity(config.worker_count);
    for worker_id in 0..config.worker_count {
        let ctx = WorkerContext {
            worker_id,
            config: config.clone(),
            snapshot: Arc::clone(&snapshot_handle),
            task_queue: Arc::clone(&task_queue),
            dst_is_greenplum,
            dst_version: Some(dst_version),
            sink: Arc::clone(&sink),
        };
        worker_handles.push(std::thread::spawn(move || worker::run_worker(ctx)));
    }

    let mut rows_by_worker = Vec::new();
    let mut had_errors = false;
    for handle in worker_handles {
        let result = handle.join().map_err(|_| SyncError::Query("worker thread panicked".into()))?;
        had_errors |= !result.all_ok;
        rows_by_worker.push((result.worker_id, result.rows_copied, result.all_ok));
    }

    full_sync_complete.store(true, Ordering::Relaxed);
    sink.emit(StatusEvent::FullSyncComplete);

    if let Some(handle) = decoder_handle {
        // The decoder keeps tailing the source indefinitely once the bulk
        // copy settles; it only winds down on SIGINT (`time_to_abort`) or
        // a fatal decoder-protocol error, never because the copy phase
        // finished.
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                had_errors = true;
                sink.emit(StatusEvent::TaskFailed {
                    task_id: -1,
                    relation: "decoder".into(),
                    error: e.to_string(),
                });
            }
            Err(_) => had_errors = true,
        }
    }

    let rows_by_task = task_queue
        .snapshot()
        .into_iter()
        .filter(|t| t.complete)
        .map(|t| (t.id, t.relation.to_string(), t.rows_copied))
        .collect();

    let report = Report {
        rows_by_worker,
        rows_by_task,
        elapsed: started.elapsed(),
        had_errors,
    };
    sink.emit(StatusEvent::RunComplete(report.clone()));
    Ok(report)
}

fn emit_snapshot_status(sink: &Arc<dyn StatusSink>, handle: &SnapshotHandle) {
    match handle {
        SnapshotHandle::LogicalSlot { slot_name, consistent_point, .. } => {
            sink.emit(StatusEvent::ReplicationSlotCreated {
                slot_name: slot_name.clone(),
                consistent_point: consistent_point.to_pg_string(),
            });
        }
        SnapshotHandle::ReusedSlotNoSnapshot { slot_name } => {
            sink.emit(StatusEvent::ReplicationSlotReused { slot_name: slot_name.clone() });
        }
        SnapshotHandle::ExportedSnapshot { .. } | SnapshotHandle::None => {}
    }
}

fn discover_relations(config: &RunConfig, source_client: &mut postgres::Client) -> Result<Vec<Relation>> {
    match config.source_kind {
        SourceKind::Postgres => relations_from_postgres_catalog(source_client, config.table_filter.as_deref()),
        SourceKind::MySql => {
            let mut session = MySqlSession::connect(&config.source)?;
            let all = session.list_base_tables()?;
            match &config.table_filter {
                Some(table) => Ok(all.into_iter().filter(|r| r.name == *table).collect()),
                None => Ok(all),
            }
        }
    }
}

fn ensure_journal_table_reachable(config: &RunConfig) -> Result<()> {
    let mut client = postgres::Client::connect(&config.local.to_conninfo("_main"), NoTls)
        .map_err(|e| SyncError::Connection { purpose: "local bookkeeping", source: anyhow::anyhow!(e) })?;
    client
        .simple_query(&format!("CREATE TABLE IF NOT EXISTS {JOURNAL_TABLE}(id bigserial, sql text)"))
        .map_err(|e| SyncError::Query(e.to_string()))?;
    Ok(())
}

fn install_sigint_handler(time_to_abort: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        time_to_abort.store(true, Ordering::Relaxed);
    })
    .map_err(|e| SyncError::Configuration(format!("failed to install SIGINT handler: {e}")))
}
