//! Journal writes land in the `sync_sqls` table.

mod common;

use pgxfer::applier::{self, Journal};
use pgxfer::decode::{AttributeValue, ChangeRecord, ColumnMeta, Tuple};

#[test]
#[ignore = "requires a live Postgres instance; set PGXFER_TEST_DB_URL"]
fn journal_persists_rendered_sql_in_order() {
    let db = common::setup_test_db();
    let mut journal = Journal::open(db.client()).unwrap();

    let insert = ChangeRecord::Insert {
        schema: "public".to_string(),
        relation: "accounts".to_string(),
        columns: vec![
            ColumnMeta { name: "id".to_string(), type_name: Some("integer".to_string()) },
            ColumnMeta { name: "name".to_string(), type_name: Some("text".to_string()) },
        ],
        key_columns: Some(vec!["id".to_string()]),
        new_tuple: Tuple {
            values: vec![AttributeValue::Text("1".to_string()), AttributeValue::Text("ada".to_string())],
        },
    };
    journal.write(&applier::render(&insert)).unwrap();
    journal.write("commit;").unwrap();

    let mut verify = db.client();
    let rows = verify.query("SELECT sql FROM sync_sqls ORDER BY id", &[]).unwrap();
    let statements: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
    assert_eq!(
        statements,
        vec![
            "INSERT INTO \"public\".\"accounts\" (\"id\", \"name\") VALUES (1, 'ada');".to_string(),
            "commit;".to_string(),
        ]
    );
}
