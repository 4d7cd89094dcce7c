//! Decoder thread: the single long-lived consumer of the logical stream.
//! Connects, streams, decodes, renders, journals; reconnects on stream
//! interruption with a five-second backoff instead of giving up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::applier::{self, Journal};
use crate::config::{ConnectionDescriptor, REPLICATION_SLOT_NAME};
use crate::decode::decode_change_record;
use crate::error::Result;
use crate::replication::message::Lsn;
use crate::replication::{LogicalReplicationStream, ReplicationMessage, StreamEvent};
use crate::status::{StatusEvent, StatusSink};
use crate::wire::pg_session::{OrdinarySession, SessionPurpose};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct DecoderThreadConfig {
    pub source: ConnectionDescriptor,
    pub local: ConnectionDescriptor,
    pub start_lsn: Lsn,
    pub keepalive_interval: Duration,
    pub time_to_abort: Arc<AtomicBool>,
    pub sink: Arc<dyn StatusSink>,
}

/// Run the decoder loop until the abort latch is set or a fatal decoder
/// protocol error occurs.
pub fn run(cfg: DecoderThreadConfig) -> Result<()> {
    let mut journal = open_journal(&cfg.local)?;
    // Resume point across reconnects; `run_session` advances this as it
    // flushes.
    let mut recv_pos = cfg.start_lsn;

    while !cfg.time_to_abort.load(Ordering::Relaxed) {
        match run_session(&cfg, &mut journal, &mut recv_pos) {
            Ok(()) => return Ok(()),
            Err(crate::error::SyncError::StreamInterrupted(msg)) => {
                cfg.sink.emit(StatusEvent::TaskFailed {
                    task_id: -1,
                    relation: "decoder".into(),
                    error: format!("stream interrupted, reconnecting in 5s: {msg}"),
                });
                std::thread::sleep(RECONNECT_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn open_journal(local: &ConnectionDescriptor) -> Result<Journal> {
    let session = OrdinarySession::connect(local, SessionPurpose::Main)?;
    Journal::open(session.client)
}

fn run_session(cfg: &DecoderThreadConfig, journal: &mut Journal, recv_pos: &mut Lsn) -> Result<()> {
    let conninfo = cfg.source.to_conninfo("_decoding");
    let mut stream = LogicalReplicationStream::connect(
        &conninfo,
        REPLICATION_SLOT_NAME,
        *recv_pos,
        cfg.keepalive_interval,
    )?;
    stream.start()?;

    loop {
        if cfg.time_to_abort.load(Ordering::Relaxed) {
            return Ok(());
        }

        match stream.read_message()? {
            StreamEvent::Data(ReplicationMessage::XLogData(xlog)) => {
                let record = decode_change_record(&xlog.data)?;
                let sql = applier::render(&record);
                journal.write(&sql)?;
                cfg.sink.emit(StatusEvent::JournalEntryWritten {
                    relation: record_relation_label(&record),
                });
                stream.acknowledge_flush(xlog.wal_end);
                *recv_pos = stream.flush_lsn;
                if stream.feedback_due(false, true) {
                    stream.send_feedback(false)?;
                    cfg.sink.emit(StatusEvent::StandbyStatusSent {
                        write_lsn: stream.recv_lsn.to_pg_string(),
                        flush_lsn: stream.flush_lsn.to_pg_string(),
                    });
                }
            }
            StreamEvent::Data(ReplicationMessage::PrimaryKeepAlive(ka)) => {
                if stream.feedback_due(ka.reply_requested, false) {
                    stream.send_feedback(ka.reply_requested)?;
                    cfg.sink.emit(StatusEvent::StandbyStatusSent {
                        write_lsn: stream.recv_lsn.to_pg_string(),
                        flush_lsn: stream.flush_lsn.to_pg_string(),
                    });
                }
            }
            StreamEvent::Data(ReplicationMessage::Unknown(_, _)) => {}
            StreamEvent::Idle => {
                if stream.feedback_due(false, false) {
                    stream.send_feedback(false)?;
                    cfg.sink.emit(StatusEvent::StandbyStatusSent {
                        write_lsn: stream.recv_lsn.to_pg_string(),
                        flush_lsn: stream.flush_lsn.to_pg_string(),
                    });
                }
            }
        }
    }
}

fn record_relation_label(record: &crate::decode::ChangeRecord) -> String {
    use crate::decode::ChangeRecord::*;
    match record {
        Insert { schema, relation, .. } | Update { schema, relation, .. } | Delete { schema, relation, .. } => {
            format!("{schema}.{relation}")
        }
        Begin { .. } | Commit { .. } => String::new(),
    }
}
