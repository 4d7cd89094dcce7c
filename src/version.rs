//! Source/destination server version and flavor detection. The orchestrator
//! queries each side's `server_version_num` independently and threads the
//! results through `RunConfig`-adjacent structs (spec §3 shared state:
//! `src_version`, `dst_version` are distinct fields) rather than stashing
//! them behind a single shared global, since a source and a destination
//! connection are live at once and may be on different major versions.

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgVersion {
    pub major: u32,
    pub minor: u32,
}

impl PgVersion {
    pub fn as_num(&self) -> u32 {
        self.major * 10000 + self.minor * 100
    }

    pub fn supports_logical_decoding(&self) -> bool {
        self.as_num() >= 90400
    }

    pub fn supports_exported_snapshot(&self) -> bool {
        self.as_num() >= 90200
    }
}

pub fn detect_pg_version(client: &mut postgres::Client) -> Result<PgVersion> {
    let row = client
        .query_one("SHOW server_version_num", &[])
        .map_err(|e| SyncError::Query(e.to_string()))?;
    let version_num: i32 = row
        .get::<_, String>(0)
        .parse()
        .map_err(|e| SyncError::Query(format!("unparseable server_version_num: {e}")))?;
    Ok(PgVersion {
        major: (version_num / 10000) as u32,
        minor: ((version_num / 100) % 100) as u32,
    })
}

/// `select version()` contains "Greenplum" on a Greenplum destination or
/// source. Greenplum skips a couple of the per-session tweaks that are
/// only meaningful on upstream Postgres, such as disabling synchronized
/// seqscans.
pub fn detect_is_greenplum(client: &mut postgres::Client) -> Result<bool> {
    let row = client
        .query_one("select version()", &[])
        .map_err(|e| SyncError::Query(e.to_string()))?;
    let version_string: String = row.get(0);
    Ok(version_string.contains("Greenplum"))
}
