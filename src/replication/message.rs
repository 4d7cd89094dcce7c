//! Replication protocol framing: `Lsn`/`XLogData`/`PrimaryKeepAlive`
//! message shapes, plus the client→server standby-status encoder.

use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds between the Postgres epoch (2000-01-01) and the Unix epoch.
const PG_EPOCH_OFFSET_SECS: u64 = 946_684_800;

#[derive(Debug, PartialEq)]
pub enum ReplicationMessage {
    XLogData(XLogData),
    PrimaryKeepAlive(PrimaryKeepAlive),
    Unknown(u8, Vec<u8>),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn from_u64(val: u64) -> Self {
        Lsn(val)
    }

    /// Parse a Postgres LSN string (e.g., "0/16B6C50").
    pub fn from_pg_string(s: &str) -> Option<Self> {
        let mut parts = s.split('/');
        let hi = u64::from_str_radix(parts.next()?, 16).ok()?;
        let lo = u64::from_str_radix(parts.next()?, 16).ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Lsn((hi << 32) | lo))
    }

    pub fn to_pg_string(&self) -> String {
        format!("{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_pg_string())
    }
}

impl From<u64> for Lsn {
    fn from(val: u64) -> Self {
        Lsn(val)
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> Self {
        lsn.0
    }
}

#[derive(Debug, PartialEq)]
pub struct XLogData {
    pub wal_start: Lsn,
    pub wal_end: Lsn,
    pub send_time: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, PartialEq)]
pub struct PrimaryKeepAlive {
    pub wal_end: Lsn,
    pub send_time: u64,
    pub reply_requested: bool,
}

impl ReplicationMessage {
    /// Parse one CopyBoth frame from its leading one-byte type tag.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.is_empty() {
            return None;
        }
        match buf[0] {
            b'w' => XLogData::parse(&buf[1..]).map(ReplicationMessage::XLogData),
            b'k' => PrimaryKeepAlive::parse(&buf[1..]).map(ReplicationMessage::PrimaryKeepAlive),
            other => Some(ReplicationMessage::Unknown(other, buf[1..].to_vec())),
        }
    }
}

fn read_i64(buf: &[u8]) -> u64 {
    let hi = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64;
    let lo = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as u64;
    (hi << 32) | lo
}

impl XLogData {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 24 {
            return None;
        }
        Some(XLogData {
            wal_start: Lsn(read_i64(&buf[0..8])),
            wal_end: Lsn(read_i64(&buf[8..16])),
            send_time: read_i64(&buf[16..24]),
            data: buf[24..].to_vec(),
        })
    }
}

impl PrimaryKeepAlive {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 17 {
            return None;
        }
        Some(PrimaryKeepAlive {
            wal_end: Lsn(read_i64(&buf[0..8])),
            send_time: read_i64(&buf[8..16]),
            reply_requested: buf[16] != 0,
        })
    }
}

/// Client→server standby status update (`'r'` frame):
/// `int64 write_lsn; int64 flush_lsn; int64 apply_lsn; int64 sendTime; uint8 replyRequested`.
pub struct StandbyStatusUpdate {
    pub write_lsn: Lsn,
    pub flush_lsn: Lsn,
    pub apply_lsn: Lsn,
    pub reply_requested: bool,
}

impl StandbyStatusUpdate {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 8 * 4 + 1);
        buf.push(b'r');
        buf.extend_from_slice(&self.write_lsn.0.to_be_bytes());
        buf.extend_from_slice(&self.flush_lsn.0.to_be_bytes());
        buf.extend_from_slice(&self.apply_lsn.0.to_be_bytes());
        buf.extend_from_slice(&pg_now_micros().to_be_bytes());
        buf.push(self.reply_requested as u8);
        buf
    }
}

/// Current time in microseconds since the Postgres epoch (2000-01-01 UTC):
/// the Unix-epoch value shifted back by 946684800 seconds.
pub fn pg_now_micros() -> u64 {
    let unix_micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    unix_micros.saturating_sub(PG_EPOCH_OFFSET_SECS * 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_xlogdata_lsn() {
        let mut buf = vec![b'w'];
        buf.extend_from_slice(&0x000000010000000A_u64.to_be_bytes());
        buf.extend_from_slice(&0x000000010000000B_u64.to_be_bytes());
        buf.extend_from_slice(&0x0000018D4FDFB000_u64.to_be_bytes());
        buf.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        match ReplicationMessage::parse(&buf) {
            Some(ReplicationMessage::XLogData(xlog)) => {
                assert_eq!(xlog.wal_start, Lsn(0x000000010000000A));
                assert_eq!(xlog.wal_end, Lsn(0x000000010000000B));
                assert_eq!(xlog.send_time, 0x0000018D4FDFB000);
                assert_eq!(xlog.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn parses_keepalive_with_reply_requested() {
        let mut buf = vec![b'k'];
        buf.extend_from_slice(&42u64.to_be_bytes());
        buf.extend_from_slice(&7u64.to_be_bytes());
        buf.push(1);

        match ReplicationMessage::parse(&buf) {
            Some(ReplicationMessage::PrimaryKeepAlive(ka)) => {
                assert_eq!(ka.wal_end, Lsn(42));
                assert_eq!(ka.send_time, 7);
                assert!(ka.reply_requested);
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn lsn_string_round_trips() {
        let lsn = Lsn::from_pg_string("1/16B6C50").unwrap();
        assert_eq!(lsn.to_pg_string(), "1/16B6C50");
    }

    #[test]
    fn unknown_tag_is_preserved_not_dropped() {
        let buf = vec![b'x', 1, 2, 3];
        match ReplicationMessage::parse(&buf) {
            Some(ReplicationMessage::Unknown(tag, payload)) => {
                assert_eq!(tag, b'x');
                assert_eq!(payload, vec![1, 2, 3]);
            }
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    #[test]
    fn standby_status_update_encodes_big_endian_lsns() {
        let update = StandbyStatusUpdate {
            write_lsn: Lsn(10),
            flush_lsn: Lsn(9),
            apply_lsn: Lsn(8),
            reply_requested: false,
        };
        let buf = update.encode();
        assert_eq!(buf[0], b'r');
        assert_eq!(read_i64(&buf[1..9]), 10);
        assert_eq!(read_i64(&buf[9..17]), 9);
        assert_eq!(read_i64(&buf[17..25]), 8);
        assert_eq!(buf[33], 0);
        assert_eq!(buf.len(), 34);
    }
}
