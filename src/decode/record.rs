//! Binary change-record decoder for the `ali_decoding` output plugin wire
//! format: a tagged enum plus a small `Cursor`-style reader with
//! `Result`-returning steps, in the `postgres-protocol` message-decoding
//! style.

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeRecord {
    Begin {
        final_lsn: u64,
        commit_time: i64,
        xid: u32,
    },
    Commit {
        commit_lsn: u64,
        end_lsn: u64,
        commit_time: i64,
    },
    Insert {
        schema: String,
        relation: String,
        columns: Vec<ColumnMeta>,
        key_columns: Option<Vec<String>>,
        new_tuple: Tuple,
    },
    Update {
        schema: String,
        relation: String,
        columns: Vec<ColumnMeta>,
        key_columns: Option<Vec<String>>,
        old_tuple: Option<Tuple>,
        new_tuple: Tuple,
    },
    Delete {
        schema: String,
        relation: String,
        columns: Vec<ColumnMeta>,
        key_columns: Option<Vec<String>>,
        old_tuple: Option<Tuple>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    /// `None` for a dropped or system column (zero-length name on the wire);
    /// also `None` when the stream never advertised type names.
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    /// TOASTed value that wasn't modified by this change; no replacement
    /// content is available, only the fact that it is unchanged.
    UnchangedToast,
    Binary(Vec<u8>),
    /// `typsend`-encoded binary representation.
    SendRecv(Vec<u8>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tuple {
    pub values: Vec<AttributeValue>,
}

/// Cursor over a decoded `XLogData` payload.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(SyncError::Protocol(format!(
                "truncated change record: wanted {n} bytes, had {}",
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// A NUL-terminated byte string whose on-wire length *includes* the
    /// trailing NUL.
    fn nul_terminated_str(&mut self, len_including_nul: usize) -> Result<String> {
        if len_including_nul == 0 {
            return Ok(String::new());
        }
        let bytes = self.take(len_including_nul)?;
        let without_nul = bytes
            .split_last()
            .map(|(_, rest)| rest)
            .unwrap_or(bytes);
        String::from_utf8(without_nul.to_vec())
            .map_err(|e| SyncError::Protocol(format!("non-UTF8 identifier: {e}")))
    }
}

/// Decode one `XLogData` payload into a `ChangeRecord`.
pub fn decode_change_record(payload: &[u8]) -> Result<ChangeRecord> {
    let mut r = Reader::new(payload);
    let kind = r.byte()?;
    match kind {
        b'B' => {
            let _flags = r.i32()?;
            let final_lsn = r.i64()? as u64;
            let commit_time = r.i64()?;
            let xid = r.i32()? as u32;
            Ok(ChangeRecord::Begin {
                final_lsn,
                commit_time,
                xid,
            })
        }
        b'C' => {
            let _flags = r.i32()?;
            let commit_lsn = r.i64()? as u64;
            let end_lsn = r.i64()? as u64;
            let commit_time = r.i64()?;
            Ok(ChangeRecord::Commit {
                commit_lsn,
                end_lsn,
                commit_time,
            })
        }
        b'I' => {
            let (schema, relation, columns, key_columns) = decode_relation_section(&mut r)?;
            expect_tag(&mut r, b'N')?;
            let new_tuple = decode_tuple(&mut r, &columns)?;
            Ok(ChangeRecord::Insert {
                schema,
                relation,
                columns,
                key_columns,
                new_tuple,
            })
        }
        b'U' => {
            let (schema, relation, columns, key_columns) = decode_relation_section(&mut r)?;
            let old_tuple = match r.byte()? {
                b'K' => Some(decode_tuple(&mut r, &columns)?),
                b'N' => {
                    let new_tuple = decode_tuple(&mut r, &columns)?;
                    return Ok(ChangeRecord::Update {
                        schema,
                        relation,
                        columns,
                        key_columns,
                        old_tuple: None,
                        new_tuple,
                    });
                }
                other => return Err(unexpected_tag(other, "'K' or 'N'")),
            };
            expect_tag(&mut r, b'N')?;
            let new_tuple = decode_tuple(&mut r, &columns)?;
            Ok(ChangeRecord::Update {
                schema,
                relation,
                columns,
                key_columns,
                old_tuple,
                new_tuple,
            })
        }
        b'D' => {
            let (schema, relation, columns, key_columns) = decode_relation_section(&mut r)?;
            let old_tuple = match r.byte()? {
                b'K' => Some(decode_tuple(&mut r, &columns)?),
                b'E' => None,
                other => return Err(unexpected_tag(other, "'K' or 'E'")),
            };
            Ok(ChangeRecord::Delete {
                schema,
                relation,
                columns,
                key_columns,
                old_tuple,
            })
        }
        other => Err(SyncError::Protocol(format!(
            "unknown change record action byte {other:#x}"
        ))),
    }
}

fn expect_tag(r: &mut Reader<'_>, expected: u8) -> Result<()> {
    let got = r.byte()?;
    if got != expected {
        return Err(unexpected_tag(got, &format!("{:?}", expected as char)));
    }
    Ok(())
}

fn unexpected_tag(got: u8, expected: &str) -> SyncError {
    SyncError::Protocol(format!(
        "unexpected sub-record tag {got:#x} ({:?}), expected {expected}",
        got as char
    ))
}

/// `write_rel` + optional `write_colum_info`: schema/relation names, then
/// `'C'` column metadata (if present) terminated by `'M'`/`'P'` key section.
fn decode_relation_section(
    r: &mut Reader<'_>,
) -> Result<(String, String, Vec<ColumnMeta>, Option<Vec<String>>)> {
    let nsp_len = r.i16()? as usize;
    let schema = r.nul_terminated_str(nsp_len)?;
    let rel_len = r.i16()? as usize;
    let relation = r.nul_terminated_str(rel_len)?;

    if r.remaining() == 0 {
        return Ok((schema, relation, Vec::new(), None));
    }

    match r.byte()? {
        b'C' => {
            let (columns, key_columns) = decode_column_info(r)?;
            Ok((schema, relation, columns, key_columns))
        }
        other => Err(unexpected_tag(other, "'C'")),
    }
}

fn decode_column_info(r: &mut Reader<'_>) -> Result<(Vec<ColumnMeta>, Option<Vec<String>>)> {
    let natt = r.i16()? as usize;
    let mut columns = Vec::with_capacity(natt);
    for _ in 0..natt {
        let name_len = r.i16()? as usize;
        if name_len == 0 {
            // dropped/system column: no name, no type, regardless of
            // whether the stream otherwise advertises type names.
            columns.push(ColumnMeta {
                name: String::new(),
                type_name: None,
            });
            continue;
        }
        let name = r.nul_terminated_str(name_len)?;
        // A type-name length field only follows when the stream advertises
        // typenames; peek the next tag to tell a key-section marker from a
        // genuine length prefix is not possible without protocol state, so
        // the caller is expected to configure this decoder's expectation
        // up front. This client always runs against a stream configured
        // with `output_type_as_name = true` (see `replication::slot`),
        // so a length prefix always follows here.
        let type_len = r.i16()? as usize;
        let type_name = if type_len == 0 {
            None
        } else {
            Some(r.nul_terminated_str(type_len)?)
        };
        columns.push(ColumnMeta { name, type_name });
    }

    let key_columns = match r.byte()? {
        b'P' => None,
        b'M' => {
            let nkey = r.i16()? as usize;
            let mut keys = Vec::with_capacity(nkey);
            for _ in 0..nkey {
                let len = r.i16()? as usize;
                keys.push(r.nul_terminated_str(len)?);
            }
            Some(keys)
        }
        other => return Err(unexpected_tag(other, "'P' or 'M'")),
    };

    Ok((columns, key_columns))
}

fn decode_tuple(r: &mut Reader<'_>, columns: &[ColumnMeta]) -> Result<Tuple> {
    expect_tag(r, b'T')?;
    let natt = r.i32()? as usize;
    if !columns.is_empty() && natt != columns.len() {
        return Err(SyncError::Protocol(format!(
            "tuple attribute count {natt} does not match column metadata count {}",
            columns.len()
        )));
    }
    let mut values = Vec::with_capacity(natt);
    for _ in 0..natt {
        let value = match r.byte()? {
            b'n' => AttributeValue::Null,
            b'u' => AttributeValue::UnchangedToast,
            b'b' => {
                let len = r.i32()? as usize;
                AttributeValue::Binary(r.take(len)?.to_vec())
            }
            b's' => {
                let len = r.i32()? as usize;
                AttributeValue::SendRecv(r.take(len)?.to_vec())
            }
            b't' => {
                let len = r.i32()? as usize;
                AttributeValue::Text(r.nul_terminated_str(len)?)
            }
            other => return Err(unexpected_tag(other, "'n', 'u', 'b', 's', or 't'")),
        };
        values.push(value);
    }
    Ok(Tuple { values })
}

/// Re-encode a decoded record back into the plugin's wire format. Only
/// used by tests to exercise the decoder against known-good bytes; there
/// is no production call site.
pub fn encode_change_record(record: &ChangeRecord) -> Vec<u8> {
    let mut buf = Vec::new();
    match record {
        ChangeRecord::Begin { final_lsn, commit_time, xid } => {
            buf.push(b'B');
            buf.extend_from_slice(&0i32.to_be_bytes());
            buf.extend_from_slice(&final_lsn.to_be_bytes());
            buf.extend_from_slice(&commit_time.to_be_bytes());
            buf.extend_from_slice(&(*xid as i32).to_be_bytes());
        }
        ChangeRecord::Commit { commit_lsn, end_lsn, commit_time } => {
            buf.push(b'C');
            buf.extend_from_slice(&0i32.to_be_bytes());
            buf.extend_from_slice(&commit_lsn.to_be_bytes());
            buf.extend_from_slice(&end_lsn.to_be_bytes());
            buf.extend_from_slice(&commit_time.to_be_bytes());
        }
        ChangeRecord::Insert { schema, relation, columns, key_columns, new_tuple } => {
            buf.push(b'I');
            encode_relation_section(&mut buf, schema, relation, columns, key_columns.as_deref());
            buf.push(b'N');
            encode_tuple(&mut buf, new_tuple);
        }
        ChangeRecord::Update { schema, relation, columns, key_columns, old_tuple, new_tuple } => {
            buf.push(b'U');
            encode_relation_section(&mut buf, schema, relation, columns, key_columns.as_deref());
            match old_tuple {
                Some(old) => {
                    buf.push(b'K');
                    encode_tuple(&mut buf, old);
                }
                None => {}
            }
            buf.push(b'N');
            encode_tuple(&mut buf, new_tuple);
        }
        ChangeRecord::Delete { schema, relation, columns, key_columns, old_tuple } => {
            buf.push(b'D');
            encode_relation_section(&mut buf, schema, relation, columns, key_columns.as_deref());
            match old_tuple {
                Some(old) => {
                    buf.push(b'K');
                    encode_tuple(&mut buf, old);
                }
                None => buf.push(b'E'),
            }
        }
    }
    buf
}

fn push_nul_terminated(buf: &mut Vec<u8>, s: &str) {
    let len = (s.len() + 1) as i16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

fn encode_relation_section(
    buf: &mut Vec<u8>,
    schema: &str,
    relation: &str,
    columns: &[ColumnMeta],
    key_columns: Option<&[String]>,
) {
    push_nul_terminated(buf, schema);
    push_nul_terminated(buf, relation);
    if columns.is_empty() && key_columns.is_none() {
        return;
    }
    buf.push(b'C');
    buf.extend_from_slice(&(columns.len() as i16).to_be_bytes());
    for col in columns {
        if col.name.is_empty() {
            buf.extend_from_slice(&0i16.to_be_bytes());
            continue;
        }
        push_nul_terminated(buf, &col.name);
        match &col.type_name {
            Some(ty) => push_nul_terminated(buf, ty),
            None => buf.extend_from_slice(&0i16.to_be_bytes()),
        }
    }
    match key_columns {
        None => buf.push(b'P'),
        Some(names) => {
            buf.push(b'M');
            buf.extend_from_slice(&(names.len() as i16).to_be_bytes());
            for name in names {
                push_nul_terminated(buf, name);
            }
        }
    }
}

fn encode_tuple(buf: &mut Vec<u8>, tuple: &Tuple) {
    buf.push(b'T');
    buf.extend_from_slice(&(tuple.values.len() as i32).to_be_bytes());
    for value in &tuple.values {
        match value {
            AttributeValue::Null => buf.push(b'n'),
            AttributeValue::UnchangedToast => buf.push(b'u'),
            AttributeValue::Binary(bytes) => {
                buf.push(b'b');
                buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                buf.extend_from_slice(bytes);
            }
            AttributeValue::SendRecv(bytes) => {
                buf.push(b's');
                buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                buf.extend_from_slice(bytes);
            }
            AttributeValue::Text(s) => {
                buf.push(b't');
                push_nul_terminated(buf, s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: &str) -> ColumnMeta {
        ColumnMeta {
            name: name.to_string(),
            type_name: Some(ty.to_string()),
        }
    }

    fn push_str_field(buf: &mut Vec<u8>, s: &str) {
        let with_nul_len = (s.len() + 1) as i16;
        buf.extend_from_slice(&with_nul_len.to_be_bytes());
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
    }

    #[test]
    fn decodes_begin() {
        let mut buf = vec![b'B'];
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(&123u64.to_be_bytes());
        buf.extend_from_slice(&456i64.to_be_bytes());
        buf.extend_from_slice(&789i32.to_be_bytes());

        match decode_change_record(&buf).unwrap() {
            ChangeRecord::Begin { final_lsn, commit_time, xid } => {
                assert_eq!(final_lsn, 123);
                assert_eq!(commit_time, 456);
                assert_eq!(xid, 789);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_commit() {
        let mut buf = vec![b'C'];
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(&10u64.to_be_bytes());
        buf.extend_from_slice(&20u64.to_be_bytes());
        buf.extend_from_slice(&30i64.to_be_bytes());

        match decode_change_record(&buf).unwrap() {
            ChangeRecord::Commit { commit_lsn, end_lsn, commit_time } => {
                assert_eq!(commit_lsn, 10);
                assert_eq!(end_lsn, 20);
                assert_eq!(commit_time, 30);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    fn insert_payload() -> Vec<u8> {
        let mut buf = vec![b'I'];
        push_str_field(&mut buf, "public");
        push_str_field(&mut buf, "accounts");
        buf.push(b'C');
        buf.extend_from_slice(&2i16.to_be_bytes());
        push_str_field(&mut buf, "id");
        push_str_field(&mut buf, "int4");
        push_str_field(&mut buf, "name");
        push_str_field(&mut buf, "text");
        buf.push(b'M');
        buf.extend_from_slice(&1i16.to_be_bytes());
        push_str_field(&mut buf, "id");
        buf.push(b'N');
        buf.push(b'T');
        buf.extend_from_slice(&2i32.to_be_bytes());
        buf.push(b'b');
        buf.extend_from_slice(&4i32.to_be_bytes());
        buf.extend_from_slice(&1i32.to_be_bytes());
        buf.push(b't');
        let text = "alice\0";
        buf.extend_from_slice(&(text.len() as i32).to_be_bytes());
        buf.extend_from_slice(text.as_bytes());
        buf
    }

    #[test]
    fn decodes_insert_with_column_metadata_and_key() {
        match decode_change_record(&insert_payload()).unwrap() {
            ChangeRecord::Insert { schema, relation, columns, key_columns, new_tuple } => {
                assert_eq!(schema, "public");
                assert_eq!(relation, "accounts");
                assert_eq!(columns.len(), 2);
                assert_eq!(columns[0].name, "id");
                assert_eq!(columns[0].type_name.as_deref(), Some("int4"));
                assert_eq!(key_columns, Some(vec!["id".to_string()]));
                assert_eq!(new_tuple.values.len(), 2);
                assert!(matches!(new_tuple.values[0], AttributeValue::Binary(_)));
                assert!(matches!(new_tuple.values[1], AttributeValue::Text(ref s) if s == "alice"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_delete_with_empty_old_tuple() {
        let mut buf = vec![b'D'];
        push_str_field(&mut buf, "public");
        push_str_field(&mut buf, "accounts");
        buf.push(b'C');
        buf.extend_from_slice(&0i16.to_be_bytes());
        buf.push(b'P');
        buf.push(b'E');

        match decode_change_record(&buf).unwrap() {
            ChangeRecord::Delete { old_tuple, key_columns, .. } => {
                assert!(old_tuple.is_none());
                assert_eq!(key_columns, None);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn dropped_column_has_no_name_or_type() {
        let mut buf = vec![b'C'];
        buf.extend_from_slice(&1i16.to_be_bytes());
        buf.extend_from_slice(&0i16.to_be_bytes());
        buf.push(b'P');
        let mut r = Reader::new(&buf[1..]);
        let (columns, key_columns) = decode_column_info(&mut r).unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "");
        assert_eq!(columns[0].type_name, None);
        assert_eq!(key_columns, None);
    }

    #[test]
    fn rejects_truncated_record_without_panicking() {
        let buf = vec![b'I', 0, 1];
        assert!(decode_change_record(&buf).is_err());
    }

    #[test]
    fn round_trips_insert_through_encode_decode() {
        let original = decode_change_record(&insert_payload()).unwrap();
        let re_encoded = encode_change_record(&original);
        let re_decoded = decode_change_record(&re_encoded).unwrap();
        assert_eq!(original, re_decoded);
    }

    #[test]
    fn round_trips_begin_and_commit() {
        let begin = ChangeRecord::Begin { final_lsn: 111, commit_time: 222, xid: 333 };
        assert_eq!(decode_change_record(&encode_change_record(&begin)).unwrap(), begin);

        let commit = ChangeRecord::Commit { commit_lsn: 1, end_lsn: 2, commit_time: 3 };
        assert_eq!(decode_change_record(&encode_change_record(&commit)).unwrap(), commit);
    }

    #[test]
    fn round_trips_update_with_key_tuple() {
        let update = ChangeRecord::Update {
            schema: "public".to_string(),
            relation: "accounts".to_string(),
            columns: vec![col("id", "integer"), col("name", "text")],
            key_columns: Some(vec!["id".to_string()]),
            old_tuple: Some(Tuple {
                values: vec![AttributeValue::Text("1".to_string()), AttributeValue::Null],
            }),
            new_tuple: Tuple {
                values: vec![
                    AttributeValue::Text("1".to_string()),
                    AttributeValue::Text("carol".to_string()),
                ],
            },
        };
        assert_eq!(decode_change_record(&encode_change_record(&update)).unwrap(), update);
    }

    #[test]
    fn round_trips_delete_with_no_key_info() {
        let delete = ChangeRecord::Delete {
            schema: "public".to_string(),
            relation: "accounts".to_string(),
            columns: vec![col("id", "integer")],
            key_columns: None,
            old_tuple: None,
        };
        assert_eq!(decode_change_record(&encode_change_record(&delete)).unwrap(), delete);
    }

    #[test]
    fn rejects_tuple_attribute_count_mismatch() {
        let mut buf = vec![b'I'];
        push_str_field(&mut buf, "public");
        push_str_field(&mut buf, "accounts");
        buf.push(b'C');
        buf.extend_from_slice(&1i16.to_be_bytes());
        push_str_field(&mut buf, "id");
        push_str_field(&mut buf, "int4");
        buf.push(b'P');
        buf.push(b'N');
        buf.push(b'T');
        buf.extend_from_slice(&2i32.to_be_bytes());
        buf.push(b'n');
        buf.push(b'n');
        assert!(decode_change_record(&buf).is_err());
    }
}
