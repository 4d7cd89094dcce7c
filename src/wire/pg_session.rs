//! Ordinary (non-replication) PostgreSQL session: a single long-lived
//! `postgres::Client` that knows the per-session setup sequence a worker
//! or the main thread needs before it starts issuing queries.

use std::io::{Read, Write};

use postgres::{Client, NoTls};

use crate::config::ConnectionDescriptor;
use crate::error::{Result, SyncError};

/// A purpose tag appended to `application_name`.
#[derive(Clone, Copy, Debug)]
pub enum SessionPurpose {
    Main,
    Copy,
    Decoding,
}

impl SessionPurpose {
    fn suffix(self) -> &'static str {
        match self {
            SessionPurpose::Main => "_main",
            SessionPurpose::Copy => "_copy",
            SessionPurpose::Decoding => "_decoding",
        }
    }
}

pub struct OrdinarySession {
    pub client: Client,
}

impl OrdinarySession {
    pub fn connect(descriptor: &ConnectionDescriptor, purpose: SessionPurpose) -> Result<Self> {
        let conninfo = descriptor.to_conninfo(purpose.suffix());
        let client = Client::connect(&conninfo, NoTls).map_err(|e| SyncError::Connection {
            purpose: "ordinary session",
            source: anyhow::anyhow!(e),
        })?;
        Ok(OrdinarySession { client })
    }

    /// Per-session setup, run once after connecting.
    pub fn apply_common_setup(&mut self, is_greenplum: bool) -> Result<()> {
        self.exec("SET client_encoding = 'UTF8'")?;
        self.exec("SET datestyle = 'ISO'")?;
        self.exec("SET intervalstyle = 'postgres'")?;
        self.exec("SET extra_float_digits = 3")?;
        self.exec("SET statement_timeout = 0")?;
        self.exec("SET lock_timeout = 0")?;
        if !is_greenplum {
            self.exec("SET synchronize_seqscans = off")?;
        }
        Ok(())
    }

    /// Additional destination bulk-copy setup.
    pub fn apply_destination_copy_setup(&mut self, source_is_mysql: bool) -> Result<()> {
        self.exec("SET session_replication_role = 'replica'")?;
        if source_is_mysql {
            self.exec("SET standard_conforming_strings = off")?;
            self.exec("SET backslash_quote = on")?;
        }
        Ok(())
    }

    pub fn exec(&mut self, statement: &str) -> Result<()> {
        self.client
            .simple_query(statement)
            .map(|_| ())
            .map_err(|e| SyncError::Query(format!("{statement}: {e}")))
    }

    pub fn begin_repeatable_read_readonly(&mut self, snapshot_name: Option<&str>) -> Result<()> {
        self.exec("BEGIN TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")?;
        if let Some(name) = snapshot_name {
            self.exec(&format!("SET TRANSACTION SNAPSHOT '{name}'"))?;
        }
        Ok(())
    }

    pub fn begin_read_committed(&mut self) -> Result<()> {
        self.exec("BEGIN TRANSACTION ISOLATION LEVEL READ COMMITTED")
    }

    pub fn commit(&mut self) -> Result<()> {
        self.exec("COMMIT")
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.exec("ROLLBACK")
    }

    /// `COPY <relation> TO stdout`: relay raw chunks into the supplied
    /// sink, returning a chunk count that approximates rows copied.
    pub fn copy_out_into(&mut self, query: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut reader = self
            .client
            .copy_out(query)
            .map_err(|e| SyncError::Query(format!("{query}: {e}")))?;
        let mut chunks = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).map_err(|e| SyncError::Query(e.to_string()))?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).map_err(|e| SyncError::Query(e.to_string()))?;
            chunks += 1;
        }
        Ok(chunks)
    }

    /// `COPY <relation> FROM stdin`: relay everything `source` yields,
    /// chunk by chunk.
    pub fn copy_in_from(&mut self, query: &str, source: &mut dyn Read) -> Result<u64> {
        let mut writer = self
            .client
            .copy_in(query)
            .map_err(|e| SyncError::Query(format!("{query}: {e}")))?;
        let mut chunks = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = source.read(&mut buf).map_err(|e| SyncError::Query(e.to_string()))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .map_err(|e| SyncError::Query(e.to_string()))?;
            chunks += 1;
        }
        writer.finish().map_err(|e| SyncError::Query(e.to_string()))?;
        Ok(chunks)
    }

    /// Start a `COPY ... TO stdout` on this session, returning a reader
    /// that `relay_copy` drains directly into a destination's `COPY ...
    /// FROM stdin` writer, one chunk at a time, with no whole-table
    /// buffering in between.
    pub fn start_copy_out(&mut self, query: &str) -> Result<postgres::CopyOutReader<'_>> {
        self.client.copy_out(query).map_err(|e| SyncError::Query(format!("{query}: {e}")))
    }

    pub fn start_copy_in(&mut self, query: &str) -> Result<postgres::CopyInWriter<'_>> {
        self.client.copy_in(query).map_err(|e| SyncError::Query(format!("{query}: {e}")))
    }

    /// Feed pre-formatted rows, one write per row, into a `COPY FROM
    /// stdin` stream.
    pub fn copy_in_rows<I: Iterator<Item = String>>(&mut self, query: &str, rows: I) -> Result<u64> {
        let mut writer = self
            .client
            .copy_in(query)
            .map_err(|e| SyncError::Query(format!("{query}: {e}")))?;
        let mut count = 0u64;
        for row in rows {
            writer
                .write_all(row.as_bytes())
                .map_err(|e| SyncError::Query(e.to_string()))?;
            count += 1;
        }
        writer.finish().map_err(|e| SyncError::Query(e.to_string()))?;
        Ok(count)
    }
}
