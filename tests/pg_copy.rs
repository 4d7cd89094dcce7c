//! End-to-end PG-to-PG bulk copy between two ephemeral databases, using
//! the public `OrdinarySession` surface the same way
//! `worker::copy_one_pg_table` does internally.

mod common;

use std::io::Cursor;

use pgxfer::wire::pg_session::{OrdinarySession, SessionPurpose};
use pgxfer::ConnectionDescriptor;

fn descriptor_for(url: &str) -> ConnectionDescriptor {
    let without_scheme = url.trim_start_matches("postgres://");
    let (userinfo, rest) = without_scheme.split_once('@').unwrap();
    let (host, database) = rest.split_once('/').unwrap();
    let (user, _) = userinfo.split_once(':').unwrap_or((userinfo, ""));
    ConnectionDescriptor::new(host.to_string(), 5432, database.to_string(), user.to_string())
}

#[test]
#[ignore = "requires a live Postgres instance; set PGXFER_TEST_DB_URL"]
fn copies_rows_between_two_databases_via_copy_stream() {
    let origin_db = common::setup_test_db();
    let dest_db = common::setup_test_db();

    let mut origin_admin = origin_db.client();
    origin_admin
        .simple_query("INSERT INTO accounts (id, name) VALUES (1, 'ada'), (2, 'grace')")
        .unwrap();

    let mut origin = OrdinarySession::connect(&descriptor_for(&origin_db.url), SessionPurpose::Copy).unwrap();
    let mut destination = OrdinarySession::connect(&descriptor_for(&dest_db.url), SessionPurpose::Copy).unwrap();

    origin.begin_repeatable_read_readonly(None).unwrap();
    destination.begin_read_committed().unwrap();

    let mut buffer = Vec::new();
    origin.copy_out_into("COPY accounts TO stdout", &mut buffer).unwrap();
    let rows = destination
        .copy_in_from("COPY accounts FROM stdin", &mut Cursor::new(buffer))
        .unwrap();
    assert!(rows > 0);

    destination.commit().unwrap();
    origin.rollback().unwrap();

    let mut verify = dest_db.client();
    let row = verify.query_one("SELECT count(*) FROM accounts", &[]).unwrap();
    let count: i64 = row.get(0);
    assert_eq!(count, 2);
}
