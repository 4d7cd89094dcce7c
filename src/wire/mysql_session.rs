//! MySQL source session, built on the `mysql` sync crate's own
//! `QueryResult`/`Row` API. Each worker thread owns exactly one source
//! session for its lifetime, so a blocking, thread-owned connection fits
//! better here than an async connection pool would.

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Row, Value};

use crate::config::ConnectionDescriptor;
use crate::error::{Result, SyncError};
use crate::table::Relation;
use crate::typemap::{map_column_type, quote_value, NULL_TOKEN};

pub struct MySqlSession {
    pub conn: Conn,
}

impl MySqlSession {
    pub fn connect(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(descriptor.host.clone()))
            .tcp_port(descriptor.port)
            .db_name(Some(descriptor.database.clone()))
            .user(Some(descriptor.user.clone()))
            .pass(descriptor.password.clone())
            .into();
        let conn = Conn::new(opts).map_err(|e| SyncError::Connection {
            purpose: "mysql source",
            source: anyhow::anyhow!(e),
        })?;
        Ok(MySqlSession { conn })
    }

    /// `SHOW FULL TABLES WHERE table_type='BASE TABLE'`.
    pub fn list_base_tables(&mut self) -> Result<Vec<Relation>> {
        let rows: Vec<Row> = self
            .conn
            .query("SHOW FULL TABLES WHERE Table_type = 'BASE TABLE'")
            .map_err(|e| SyncError::Query(e.to_string()))?;
        rows.into_iter()
            .map(|mut row| {
                let name: String = row
                    .take(0)
                    .ok_or_else(|| SyncError::Query("SHOW FULL TABLES: missing table name".into()))?;
                Ok(Relation::bare(name))
            })
            .collect()
    }

    /// `SELECT * FROM <relation>`, rendering each row as a `|`-delimited
    /// line ready for `COPY ... FROM stdin`.
    pub fn copy_rows_formatted(&mut self, relation: &Relation) -> Result<Vec<String>> {
        let query = format!("SELECT * FROM `{}`", relation.name);
        let mut result = self
            .conn
            .query_iter(&query)
            .map_err(|e| SyncError::Query(e.to_string()))?;
        let columns = result.columns();
        let families: Vec<_> = columns
            .as_ref()
            .iter()
            .map(|c| map_column_type(c.column_type()))
            .collect::<Result<Vec<_>>>()?;
        drop(columns);

        let mut lines = Vec::new();
        for row in result {
            let row: Row = row.map_err(|e| SyncError::Query(e.to_string()))?;
            let mut fields = Vec::with_capacity(families.len());
            for (i, family) in families.iter().enumerate() {
                let value = row.as_ref(i).cloned().unwrap_or(Value::NULL);
                fields.push(render_value(&value, *family));
            }
            lines.push(format!("{}\n", fields.join("|")));
        }
        Ok(lines)
    }
}

fn render_value(value: &Value, family: crate::typemap::TypeFamily) -> String {
    match value {
        Value::NULL => NULL_TOKEN.to_string(),
        other => quote_value(&mysql_value_to_text(other), family),
    }
}

fn mysql_value_to_text(value: &Value) -> String {
    match value {
        Value::NULL => String::new(),
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Double(d) => d.to_string(),
        Value::Date(y, mo, d, h, mi, s, micro) => {
            if *h == 0 && *mi == 0 && *s == 0 && *micro == 0 {
                format!("{y:04}-{mo:02}-{d:02}")
            } else {
                format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}.{micro:06}")
            }
        }
        Value::Time(neg, d, h, mi, s, micro) => {
            let sign = if *neg { "-" } else { "" };
            format!("{sign}{:02}:{mi:02}:{s:02}.{micro:06}", *d as u64 * 24 + *h as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typemap::TypeFamily;

    #[test]
    fn renders_null_as_empty_token() {
        assert_eq!(render_value(&Value::NULL, TypeFamily::Text), "");
    }

    #[test]
    fn renders_quoted_text_with_escaping() {
        let v = Value::Bytes(b"o'brien".to_vec());
        assert_eq!(render_value(&v, TypeFamily::Text), "'o''brien'");
    }

    #[test]
    fn renders_unquoted_numeric() {
        let v = Value::Int(42);
        assert_eq!(render_value(&v, TypeFamily::Int4), "42");
    }

    #[test]
    fn renders_date_without_time_component() {
        let v = Value::Date(2024, 1, 1, 0, 0, 0, 0);
        assert_eq!(mysql_value_to_text(&v), "2024-01-01");
    }
}
