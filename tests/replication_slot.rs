//! Replication slot lifecycle against a live source: create, detect reuse,
//! drop. Serialized with `#[serial]` since every test in this file fights
//! over the same fixed slot name (`rds_logical_sync_slot`, spec §6).

mod common;

use serial_test::serial;

use pgxfer::config::REPLICATION_SLOT_NAME;
use pgxfer::replication;
use pgxfer::ConnectionDescriptor;

fn descriptor_for(url: &str) -> ConnectionDescriptor {
    let without_scheme = url.trim_start_matches("postgres://");
    let (userinfo, rest) = without_scheme.split_once('@').unwrap();
    let (host, database) = rest.split_once('/').unwrap();
    let (user, _) = userinfo.split_once(':').unwrap_or((userinfo, ""));
    ConnectionDescriptor::new(host.to_string(), 5432, database.to_string(), user.to_string())
}

#[test]
#[serial]
#[ignore = "requires a live Postgres instance with the ali_decoding plugin installed; set PGXFER_TEST_DB_URL"]
fn create_slot_then_detect_existing_then_drop() {
    let db = common::setup_test_db();
    let descriptor = descriptor_for(&db.url);

    let mut ordinary = db.client();
    assert!(!replication::slot_exists(&mut ordinary, REPLICATION_SLOT_NAME).unwrap());

    let mut repl_conn = replication::connect_replication(&descriptor, "_main").unwrap();
    let (consistent_point, snapshot_name) =
        replication::create_slot(&mut repl_conn, REPLICATION_SLOT_NAME).unwrap();
    assert!(consistent_point.to_pg_string().contains('/'));
    assert!(!snapshot_name.is_empty());

    assert!(replication::slot_exists(&mut ordinary, REPLICATION_SLOT_NAME).unwrap());

    replication::drop_slot(&mut repl_conn, REPLICATION_SLOT_NAME).unwrap();
    assert!(!replication::slot_exists(&mut ordinary, REPLICATION_SLOT_NAME).unwrap());
}
