//! Replication slot lifecycle: `CREATE_REPLICATION_SLOT ... LOGICAL
//! <plugin>`, `DROP_REPLICATION_SLOT`, and slot-existence checks, issued as
//! replication protocol commands over a connection opened with
//! `replication=database`. These commands only run over a replication-mode
//! session, so this module talks to `libpq::Connection` directly rather
//! than a regular `postgres::Client`.

use crate::config::{ConnectionDescriptor, DECODING_PLUGIN_NAME};
use crate::error::{Result, SyncError};
use crate::replication::message::Lsn;

/// Open a replication-mode connection against `descriptor`.
pub fn connect_replication(descriptor: &ConnectionDescriptor, app_suffix: &str) -> Result<libpq::Connection> {
    let conninfo = format!("{} replication=database", descriptor.to_conninfo(app_suffix));
    libpq::Connection::new(&conninfo).map_err(|e| SyncError::Connection {
        purpose: "replication",
        source: anyhow::anyhow!(e),
    })
}

/// `IDENTIFY_SYSTEM`: returns the server's current WAL position, used as a
/// fallback start LSN when no slot needs creating.
pub fn identify_system(conn: &mut libpq::Connection) -> Result<Lsn> {
    let res = conn.exec("IDENTIFY_SYSTEM");
    if res.status() != libpq::Status::TuplesOk {
        return Err(SyncError::Protocol(format!(
            "IDENTIFY_SYSTEM failed: {}",
            conn.error_message().unwrap_or_default()
        )));
    }
    let xlogpos = res
        .value(0, 2)
        .ok_or_else(|| SyncError::Protocol("IDENTIFY_SYSTEM: missing xlogpos column".into()))?;
    Lsn::from_pg_string(&xlogpos)
        .ok_or_else(|| SyncError::Protocol(format!("IDENTIFY_SYSTEM: unparseable LSN {xlogpos}")))
}

/// `true` if a slot named `slot_name` already exists on the source
/// (`pg_replication_slots` catalog, queried over an ordinary session).
pub fn slot_exists(client: &mut postgres::Client, slot_name: &str) -> Result<bool> {
    let row = client
        .query_one(
            "SELECT count(*) FROM pg_replication_slots WHERE slot_name = $1",
            &[&slot_name],
        )
        .map_err(|e| SyncError::Query(e.to_string()))?;
    let count: i64 = row.get(0);
    Ok(count > 0)
}

/// `CREATE_REPLICATION_SLOT "<name>" LOGICAL "ali_decoding"` — atomically
/// allocates the slot and an exported snapshot bound to its consistent
/// point. Returns `(consistent_point, snapshot_name)`.
pub fn create_slot(conn: &mut libpq::Connection, slot_name: &str) -> Result<(Lsn, String)> {
    let query = format!(
        "CREATE_REPLICATION_SLOT \"{}\" LOGICAL \"{}\"",
        slot_name, DECODING_PLUGIN_NAME
    );
    let res = conn.exec(&query);
    if res.status() != libpq::Status::TuplesOk {
        return Err(SyncError::Protocol(format!(
            "CREATE_REPLICATION_SLOT failed: {}",
            conn.error_message().unwrap_or_default()
        )));
    }
    let consistent_point = res
        .value(0, 1)
        .ok_or_else(|| SyncError::Protocol("CREATE_REPLICATION_SLOT: missing consistent_point".into()))?;
    let snapshot_name = res
        .value(0, 2)
        .ok_or_else(|| SyncError::Protocol("CREATE_REPLICATION_SLOT: missing snapshot_name".into()))?;
    let lsn = Lsn::from_pg_string(&consistent_point).ok_or_else(|| {
        SyncError::Protocol(format!("CREATE_REPLICATION_SLOT: unparseable LSN {consistent_point}"))
    })?;
    Ok((lsn, snapshot_name))
}

pub fn drop_slot(conn: &mut libpq::Connection, slot_name: &str) -> Result<()> {
    let query = format!("DROP_REPLICATION_SLOT \"{}\"", slot_name);
    let res = conn.exec(&query);
    if res.status() != libpq::Status::CommandOk {
        return Err(SyncError::Protocol(format!(
            "DROP_REPLICATION_SLOT failed: {}",
            conn.error_message().unwrap_or_default()
        )));
    }
    Ok(())
}

/// The pre-9.2 fallback path has no slot at all: PG 9.2–9.4 uses a plain
/// `pg_export_snapshot()` transaction instead.
pub fn export_snapshot(client: &mut postgres::Client) -> Result<String> {
    let row = client
        .query_one("SELECT pg_export_snapshot()", &[])
        .map_err(|e| SyncError::Query(e.to_string()))?;
    Ok(row.get(0))
}
