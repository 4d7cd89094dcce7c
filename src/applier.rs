//! Change applier: renders decoded records into destination SQL and stages
//! it in the local journal table.
//!
//! The UPDATE/DELETE WHERE clause is assembled here from the key tuple
//! (falling back to all columns when no replica identity key is known) so
//! that journaled UPDATE/DELETE statements are actually scoped to a row
//! instead of an empty, table-wide clause.

use postgres::Statement;

use crate::config::JOURNAL_TABLE;
use crate::decode::{AttributeValue, ChangeRecord, ColumnMeta, Tuple};
use crate::error::{Result, SyncError};
use crate::table::quote_ident;

/// The local bookkeeping table and its named prepared statement. The
/// statement is named so it survives across iterations instead of being
/// re-prepared for every record.
pub struct Journal {
    client: postgres::Client,
    insert_sqls: Statement,
}

impl Journal {
    pub fn open(mut client: postgres::Client) -> Result<Self> {
        client
            .simple_query(&format!(
                "CREATE TABLE IF NOT EXISTS {JOURNAL_TABLE}(id bigserial, sql text)"
            ))
            .map_err(|e| SyncError::Query(e.to_string()))?;
        let insert_sqls = client
            .prepare(&format!("INSERT INTO {JOURNAL_TABLE}(sql) VALUES ($1)"))
            .map_err(|e| SyncError::Query(format!("prepare insert_sqls: {e}")))?;
        Ok(Journal { client, insert_sqls })
    }

    pub fn write(&mut self, sql: &str) -> Result<()> {
        self.client
            .execute(&self.insert_sqls, &[&sql])
            .map(|_| ())
            .map_err(|e| SyncError::Query(format!("insert_sqls: {e}")))
    }
}

/// Render one decoded record as a single SQL statement. BEGIN/COMMIT get
/// their own statements too, so every record produces exactly one line in
/// the journal.
pub fn render(record: &ChangeRecord) -> String {
    match record {
        ChangeRecord::Begin { .. } => "begin;".to_string(),
        ChangeRecord::Commit { .. } => "commit;".to_string(),
        ChangeRecord::Insert {
            schema,
            relation,
            columns,
            new_tuple,
            ..
        } => render_insert(schema, relation, columns, new_tuple),
        ChangeRecord::Update {
            schema,
            relation,
            columns,
            key_columns,
            old_tuple,
            new_tuple,
        } => render_update(schema, relation, columns, key_columns.as_deref(), old_tuple.as_ref(), new_tuple),
        ChangeRecord::Delete {
            schema,
            relation,
            columns,
            key_columns,
            old_tuple,
        } => render_delete(schema, relation, columns, key_columns.as_deref(), old_tuple.as_ref()),
    }
}

fn qualified(schema: &str, relation: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(relation))
}

fn render_insert(schema: &str, relation: &str, columns: &[ColumnMeta], tuple: &Tuple) -> String {
    let mut col_names = Vec::new();
    let mut values = Vec::new();
    for (col, val) in columns.iter().zip(&tuple.values) {
        // dropped-column slots carry an empty name and are excluded.
        if col.name.is_empty() {
            continue;
        }
        col_names.push(quote_ident(&col.name));
        values.push(render_value(val, col.type_name.as_deref()));
    }
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        qualified(schema, relation),
        col_names.join(", "),
        values.join(", ")
    )
}

fn render_update(
    schema: &str,
    relation: &str,
    columns: &[ColumnMeta],
    key_columns: Option<&[String]>,
    old_tuple: Option<&Tuple>,
    new_tuple: &Tuple,
) -> String {
    let mut assignments = Vec::new();
    for (col, val) in columns.iter().zip(&new_tuple.values) {
        if col.name.is_empty() {
            continue;
        }
        assignments.push(format!(
            "{} = {}",
            quote_ident(&col.name),
            render_value(val, col.type_name.as_deref())
        ));
    }
    let header = format!(
        "UPDATE {} SET {}",
        qualified(schema, relation),
        assignments.join(", ")
    );
    match render_where(columns, key_columns, old_tuple) {
        Some(clause) => format!("{header} WHERE {clause};"),
        None => format!("{header};"),
    }
}

fn render_delete(
    schema: &str,
    relation: &str,
    columns: &[ColumnMeta],
    key_columns: Option<&[String]>,
    old_tuple: Option<&Tuple>,
) -> String {
    let header = format!("DELETE FROM {}", qualified(schema, relation));
    match render_where(columns, key_columns, old_tuple) {
        Some(clause) => format!("{header} WHERE {clause};"),
        None => format!("{header};"),
    }
}

/// Assemble `<key_col>=<quoted_key_val> AND ...` from the key tuple.
/// Returns `None` when no key/old tuple is available at all — the caller
/// still emits the bare statement so the journal records something rather
/// than silently dropping the change.
fn render_where(columns: &[ColumnMeta], key_columns: Option<&[String]>, old_tuple: Option<&Tuple>) -> Option<String> {
    let old_tuple = old_tuple?;
    let key_names: Vec<&str> = match key_columns {
        Some(names) if !names.is_empty() => names.iter().map(String::as_str).collect(),
        _ => columns.iter().filter(|c| !c.name.is_empty()).map(|c| c.name.as_str()).collect(),
    };
    if key_names.is_empty() {
        return None;
    }
    let mut clauses = Vec::new();
    for name in key_names {
        let idx = columns.iter().position(|c| c.name == name)?;
        let value = old_tuple.values.get(idx)?;
        let type_name = columns[idx].type_name.as_deref();
        match value {
            AttributeValue::Null => clauses.push(format!("{} IS NULL", quote_ident(name))),
            _ => clauses.push(format!("{} = {}", quote_ident(name), render_value(value, type_name))),
        }
    }
    Some(clauses.join(" AND "))
}

/// smallint, integer, bigint, oid, real, double precision, and numeric
/// render unquoted; everything else is quoted.
fn is_unquoted_type(type_name: Option<&str>) -> bool {
    matches!(
        type_name,
        Some("smallint")
            | Some("integer")
            | Some("bigint")
            | Some("oid")
            | Some("real")
            | Some("double precision")
            | Some("numeric")
    )
}

fn render_value(value: &AttributeValue, type_name: Option<&str>) -> String {
    match value {
        AttributeValue::Null | AttributeValue::UnchangedToast => "null".to_string(),
        AttributeValue::Text(s) => {
            if is_unquoted_type(type_name) {
                s.clone()
            } else {
                format!("'{}'", s.replace('\'', "''"))
            }
        }
        AttributeValue::Binary(bytes) | AttributeValue::SendRecv(bytes) => {
            format!("'\\x{}'", hex::encode(bytes))
        }
    }
}

mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
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

    #[test]
    fn renders_begin_and_commit() {
        assert_eq!(render(&ChangeRecord::Begin { final_lsn: 1, commit_time: 2, xid: 3 }), "begin;");
        assert_eq!(render(&ChangeRecord::Commit { commit_lsn: 1, end_lsn: 2, commit_time: 3 }), "commit;");
    }

    #[test]
    fn renders_insert_with_quoting_by_escape_list() {
        let columns = vec![col("id", "integer"), col("name", "text")];
        let tuple = Tuple {
            values: vec![
                AttributeValue::Text("1".to_string()),
                AttributeValue::Text("o'brien".to_string()),
            ],
        };
        let sql = render_insert("public", "accounts", &columns, &tuple);
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"accounts\" (\"id\", \"name\") VALUES (1, 'o''brien');"
        );
    }

    #[test]
    fn renders_insert_skipping_dropped_column_slots() {
        let columns = vec![
            ColumnMeta { name: String::new(), type_name: None },
            col("name", "text"),
        ];
        let tuple = Tuple {
            values: vec![AttributeValue::Null, AttributeValue::Text("bob".to_string())],
        };
        let sql = render_insert("public", "accounts", &columns, &tuple);
        assert_eq!(sql, "INSERT INTO \"public\".\"accounts\" (\"name\") VALUES ('bob');");
    }

    #[test]
    fn renders_update_where_clause_from_key_tuple() {
        let columns = vec![col("id", "integer"), col("name", "text")];
        let key_columns = vec!["id".to_string()];
        let old_tuple = Tuple {
            values: vec![AttributeValue::Text("1".to_string()), AttributeValue::Null],
        };
        let new_tuple = Tuple {
            values: vec![
                AttributeValue::Text("1".to_string()),
                AttributeValue::Text("carol".to_string()),
            ],
        };
        let sql = render_update("public", "accounts", &columns, Some(&key_columns), Some(&old_tuple), &new_tuple);
        assert_eq!(
            sql,
            "UPDATE \"public\".\"accounts\" SET \"id\" = 1, \"name\" = 'carol' WHERE \"id\" = 1;"
        );
    }

    #[test]
    fn renders_delete_where_clause_with_null_key_value() {
        let columns = vec![col("id", "integer")];
        let key_columns = vec!["id".to_string()];
        let old_tuple = Tuple { values: vec![AttributeValue::Null] };
        let sql = render_delete("public", "accounts", &columns, Some(&key_columns), Some(&old_tuple));
        assert_eq!(sql, "DELETE FROM \"public\".\"accounts\" WHERE \"id\" IS NULL;");
    }

    #[test]
    fn renders_bare_statement_when_no_key_or_old_tuple_available() {
        let columns = vec![col("id", "integer")];
        let sql = render_delete("public", "accounts", &columns, None, None);
        assert_eq!(sql, "DELETE FROM \"public\".\"accounts\";");
    }

    #[test]
    fn falls_back_to_all_columns_when_no_replica_identity_key() {
        let columns = vec![col("a", "integer"), col("b", "integer")];
        let old_tuple = Tuple {
            values: vec![AttributeValue::Text("1".to_string()), AttributeValue::Text("2".to_string())],
        };
        let sql = render_delete("public", "t", &columns, None, Some(&old_tuple));
        assert_eq!(sql, "DELETE FROM \"public\".\"t\" WHERE \"a\" = 1 AND \"b\" = 2;");
    }
}
