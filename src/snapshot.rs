//! Snapshot coordinator. Picks a strategy based on source flavor and
//! server version, and publishes `{snapshot_handle, slot_name}` before any
//! worker starts.

use postgres::NoTls;

use crate::config::{ConnectionDescriptor, SourceKind, REPLICATION_SLOT_NAME};
use crate::error::{Result, SyncError};
use crate::replication::{self, Lsn};
use crate::version::PgVersion;

/// What workers bind to in order to observe a consistent view of the
/// source.
#[derive(Clone, Debug)]
pub enum SnapshotHandle {
    /// PG ≥ 9.4: a freshly created replication slot with its exported
    /// snapshot. Replication tailing is enabled.
    LogicalSlot {
        slot_name: String,
        consistent_point: Lsn,
        snapshot_name: String,
    },
    /// PG 9.2–9.4: `pg_export_snapshot()` only; no replication tail.
    ExportedSnapshot { snapshot_name: String },
    /// A replication slot already existed; reused without a fresh
    /// snapshot. Changes already applied before the slot was created may
    /// be re-applied once tailing resumes.
    ReusedSlotNoSnapshot { slot_name: String },
    /// MySQL source, or PG < 9.2: no consistency mechanism at all.
    None,
}

impl SnapshotHandle {
    pub fn snapshot_name(&self) -> Option<&str> {
        match self {
            SnapshotHandle::LogicalSlot { snapshot_name, .. } => Some(snapshot_name),
            SnapshotHandle::ExportedSnapshot { snapshot_name } => Some(snapshot_name),
            SnapshotHandle::ReusedSlotNoSnapshot { .. } | SnapshotHandle::None => None,
        }
    }

    pub fn slot_name(&self) -> Option<&str> {
        match self {
            SnapshotHandle::LogicalSlot { slot_name, .. } => Some(slot_name),
            SnapshotHandle::ReusedSlotNoSnapshot { slot_name } => Some(slot_name),
            SnapshotHandle::ExportedSnapshot { .. } | SnapshotHandle::None => None,
        }
    }

    pub fn replication_enabled(&self) -> bool {
        matches!(
            self,
            SnapshotHandle::LogicalSlot { .. } | SnapshotHandle::ReusedSlotNoSnapshot { .. }
        )
    }
}

/// An exported snapshot is only usable for the lifetime of the session (and,
/// for `pg_export_snapshot()`, the transaction) that exported it — closing
/// that connection, or letting its transaction commit, invalidates the name
/// before a worker can `SET TRANSACTION SNAPSHOT` against it. The caller
/// must keep whichever variant this returns alive for as long as the handle
/// itself is in use (spec §3: shared state's `snapshot_handle` lives for the
/// entire run).
pub enum SnapshotKeepAlive {
    /// The replication-mode connection that issued `CREATE_REPLICATION_SLOT`;
    /// its exported snapshot dies the moment this connection closes or runs
    /// another command.
    Replication(libpq::Connection),
    /// An ordinary session sitting inside the open `BEGIN` that called
    /// `pg_export_snapshot()`; the snapshot dies at `COMMIT`/`ROLLBACK`.
    Exporting(postgres::Client),
    None,
}

/// Establish the run's snapshot strategy. `ordinary_client` is a plain
/// session used only for the slot-existence catalog lookup; any session
/// that must outlive this call (to keep an exported snapshot valid) is
/// opened fresh and returned in the `SnapshotKeepAlive`.
pub fn establish(
    source_kind: SourceKind,
    src_version: Option<PgVersion>,
    ordinary_client: &mut postgres::Client,
    source_descriptor: &ConnectionDescriptor,
) -> Result<(SnapshotHandle, SnapshotKeepAlive)> {
    if source_kind == SourceKind::MySql {
        return Ok((SnapshotHandle::None, SnapshotKeepAlive::None));
    }

    let version = src_version.ok_or_else(|| {
        SyncError::Configuration("postgres source version not detected before snapshot setup".into())
    })?;

    if version.supports_logical_decoding() {
        if replication::slot_exists(ordinary_client, REPLICATION_SLOT_NAME)? {
            return Ok((
                SnapshotHandle::ReusedSlotNoSnapshot {
                    slot_name: REPLICATION_SLOT_NAME.to_string(),
                },
                SnapshotKeepAlive::None,
            ));
        }

        let mut repl_conn = replication::connect_replication(source_descriptor, "_main")?;
        let (consistent_point, snapshot_name) =
            replication::create_slot(&mut repl_conn, REPLICATION_SLOT_NAME)?;
        return Ok((
            SnapshotHandle::LogicalSlot {
                slot_name: REPLICATION_SLOT_NAME.to_string(),
                consistent_point,
                snapshot_name,
            },
            SnapshotKeepAlive::Replication(repl_conn),
        ));
    }

    if version.supports_exported_snapshot() {
        let mut export_client = postgres::Client::connect(&source_descriptor.to_conninfo("_snapshot"), NoTls)
            .map_err(|e| SyncError::Connection { purpose: "snapshot export", source: anyhow::anyhow!(e) })?;
        export_client
            .simple_query("BEGIN")
            .map_err(|e| SyncError::Query(e.to_string()))?;
        let snapshot_name = replication::export_snapshot(&mut export_client)?;
        return Ok((
            SnapshotHandle::ExportedSnapshot { snapshot_name },
            SnapshotKeepAlive::Exporting(export_client),
        ));
    }

    Ok((SnapshotHandle::None, SnapshotKeepAlive::None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_slot_enables_replication_and_reports_snapshot() {
        let handle = SnapshotHandle::LogicalSlot {
            slot_name: "s".into(),
            consistent_point: Lsn(1),
            snapshot_name: "snap".into(),
        };
        assert!(handle.replication_enabled());
        assert_eq!(handle.snapshot_name(), Some("snap"));
        assert_eq!(handle.slot_name(), Some("s"));
    }

    #[test]
    fn reused_slot_has_no_snapshot_but_enables_replication() {
        let handle = SnapshotHandle::ReusedSlotNoSnapshot { slot_name: "s".into() };
        assert!(handle.replication_enabled());
        assert_eq!(handle.snapshot_name(), None);
    }

    #[test]
    fn exported_snapshot_disables_replication() {
        let handle = SnapshotHandle::ExportedSnapshot { snapshot_name: "snap".into() };
        assert!(!handle.replication_enabled());
        assert_eq!(handle.snapshot_name(), Some("snap"));
    }

    #[test]
    fn none_has_neither() {
        let handle = SnapshotHandle::None;
        assert!(!handle.replication_enabled());
        assert_eq!(handle.snapshot_name(), None);
        assert_eq!(handle.slot_name(), None);
    }
}
