use std::sync::{Arc, Mutex};
use std::time::Duration;

use joinery_common::Error;
use joinery_db::connection;
use joinery_db::{Catalog, Migration, MigrationLedger, MigrationRunner};
use rusqlite::Connection;

/// Records which bodies ran, and in what order.
#[derive(Clone, Default)]
struct Journal {
    runs: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    /// A migration that executes `sql` and notes its own name in the journal.
    fn migration(&self, name: &'static str, sql: &'static str) -> Migration {
        let runs = Arc::clone(&self.runs);
        Migration::code(name, move |conn| {
            runs.lock().unwrap().push(name.to_string());
            conn.execute_batch(sql)
        })
    }

    fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }

    fn count(&self, name: &str) -> usize {
        self.runs().iter().filter(|n| *n == name).count()
    }
}

fn runner(migrations: Vec<Migration>) -> MigrationRunner {
    MigrationRunner::new(Catalog::new(migrations).unwrap())
}

fn applied(conn: &Connection) -> Vec<String> {
    MigrationLedger::default().applied_names(conn).unwrap()
}

fn schema_dump(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare(
            "SELECT type || ' ' || name || ' ' || coalesce(sql, '') FROM sqlite_master
             WHERE name <> 'sqlite_sequence' ORDER BY type, name",
        )
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap()
}

fn column_names(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
        .unwrap();
    stmt.query_map([table], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap()
}

fn table_exists(conn: &Connection, table: &str) -> bool {
    conn.query_row(
        "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get(0),
    )
    .unwrap()
}

const CREATE_A: &str = "CREATE TABLE a(id INTEGER PRIMARY KEY)";
const ALTER_A: &str = "ALTER TABLE a ADD COLUMN label TEXT";
const CREATE_C: &str = "CREATE TABLE c(id INTEGER PRIMARY KEY)";

#[test]
fn second_run_executes_no_bodies_and_changes_nothing() {
    let journal = Journal::default();
    let r = runner(vec![
        journal.migration("001_a", CREATE_A),
        journal.migration("002_b", ALTER_A),
        journal.migration("003_c", CREATE_C),
    ]);
    let mut conn = Connection::open_in_memory().unwrap();

    let first = r.run(&mut conn).unwrap();
    assert_eq!(first.applied, vec!["001_a", "002_b", "003_c"]);
    let ledger_after_first = MigrationLedger::default().list_applied(&conn).unwrap();
    let schema_after_first = schema_dump(&conn);

    let second = r.run(&mut conn).unwrap();
    assert!(second.is_noop());
    assert_eq!(second.skipped, 3);
    assert_eq!(journal.runs().len(), 3);
    assert_eq!(
        MigrationLedger::default().list_applied(&conn).unwrap(),
        ledger_after_first
    );
    assert_eq!(schema_dump(&conn), schema_after_first);
}

#[test]
fn declared_order_is_load_bearing() {
    let mut fresh = Connection::open_in_memory().unwrap();
    runner(vec![
        Migration::sql("001_a", CREATE_A),
        Migration::sql("002_b", ALTER_A),
        Migration::sql("003_c", CREATE_C),
    ])
    .run(&mut fresh)
    .unwrap();
    assert_eq!(applied(&fresh), vec!["001_a", "002_b", "003_c"]);

    let mut reordered = Connection::open_in_memory().unwrap();
    let err = runner(vec![
        Migration::sql("002_b", ALTER_A),
        Migration::sql("001_a", CREATE_A),
        Migration::sql("003_c", CREATE_C),
    ])
    .run(&mut reordered)
    .unwrap_err();

    assert_eq!(err.migration_name(), Some("002_b"));
    assert!(applied(&reordered).is_empty());
    assert!(!table_exists(&reordered, "a"));
}

#[test]
fn resumes_from_partially_applied_ledger() {
    let mut conn = Connection::open_in_memory().unwrap();
    runner(vec![Migration::sql("001_a", CREATE_A)])
        .run(&mut conn)
        .unwrap();

    let journal = Journal::default();
    let report = runner(vec![
        journal.migration("001_a", CREATE_A),
        journal.migration("002_b", ALTER_A),
        journal.migration("003_c", CREATE_C),
    ])
    .run(&mut conn)
    .unwrap();

    assert_eq!(report.applied, vec!["002_b", "003_c"]);
    assert_eq!(journal.runs(), vec!["002_b", "003_c"]);
    assert_eq!(applied(&conn), vec!["001_a", "002_b", "003_c"]);
}

#[test]
fn failure_halts_the_run_and_keeps_earlier_migrations() {
    let journal = Journal::default();
    let catalog = || {
        vec![
            journal.migration("001_a", CREATE_A),
            journal.migration("002_broken", "ALTER TABLE nowhere ADD COLUMN x TEXT"),
            journal.migration("003_c", CREATE_C),
        ]
    };
    let mut conn = Connection::open_in_memory().unwrap();

    let err = runner(catalog()).run(&mut conn).unwrap_err();
    match &err {
        Error::Migration { name, reason } => {
            assert_eq!(name, "002_broken");
            assert!(reason.contains("nowhere"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(applied(&conn), vec!["001_a"]);
    assert_eq!(journal.count("003_c"), 0);
    assert!(!table_exists(&conn, "c"));

    // Retrying with B still broken: A is not re-run, B fails again, C still untouched.
    assert!(runner(catalog()).run(&mut conn).is_err());
    assert_eq!(journal.count("001_a"), 1);
    assert_eq!(journal.count("002_broken"), 2);
    assert_eq!(journal.count("003_c"), 0);

    // Once B is fixed the run picks up where it stopped.
    let fixed = runner(vec![
        journal.migration("001_a", CREATE_A),
        journal.migration("002_broken", ALTER_A),
        journal.migration("003_c", CREATE_C),
    ]);
    let report = fixed.run(&mut conn).unwrap();
    assert_eq!(report.applied, vec!["002_broken", "003_c"]);
    assert_eq!(journal.count("001_a"), 1);
}

#[test]
fn skip_is_by_name_only() {
    let mut conn = Connection::open_in_memory().unwrap();
    runner(vec![Migration::sql("001_a", CREATE_A)])
        .run(&mut conn)
        .unwrap();

    let journal = Journal::default();
    let edited = runner(vec![journal.migration(
        "001_a",
        "CREATE TABLE a_edited(id INTEGER PRIMARY KEY)",
    )]);
    let report = edited.run(&mut conn).unwrap();

    assert!(report.is_noop());
    assert!(journal.runs().is_empty());
    assert!(!table_exists(&conn, "a_edited"));
}

#[test]
fn create_then_alter_scenario() {
    let r = runner(vec![
        Migration::sql("001_create_t", "CREATE TABLE t(id INTEGER PRIMARY KEY)"),
        Migration::sql("002_add_col", "ALTER TABLE t ADD COLUMN v TEXT"),
    ]);
    let mut conn = Connection::open_in_memory().unwrap();

    r.run(&mut conn).unwrap();
    assert_eq!(applied(&conn), vec!["001_create_t", "002_add_col"]);
    assert_eq!(column_names(&conn, "t"), vec!["id", "v"]);

    let schema = schema_dump(&conn);
    let again = r.run(&mut conn).unwrap();
    assert!(again.is_noop());
    assert_eq!(applied(&conn), vec!["001_create_t", "002_add_col"]);
    assert_eq!(column_names(&conn, "t"), vec!["id", "v"]);
    assert_eq!(schema_dump(&conn), schema);
}

#[test]
fn ledger_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.db");
    let timeout = Duration::from_millis(500);

    {
        let mut conn = connection::open(&path, timeout).unwrap();
        runner(vec![Migration::sql("001_a", CREATE_A)])
            .run(&mut conn)
            .unwrap();
    }

    let journal = Journal::default();
    let mut conn = connection::open(&path, timeout).unwrap();
    let report = runner(vec![
        journal.migration("001_a", CREATE_A),
        journal.migration("002_b", ALTER_A),
    ])
    .run(&mut conn)
    .unwrap();

    assert_eq!(report.applied, vec!["002_b"]);
    assert_eq!(journal.runs(), vec!["002_b"]);
    assert_eq!(column_names(&conn, "a"), vec!["id", "label"]);
}

#[test]
fn custom_ledger_table_is_respected() {
    let mut conn = Connection::open_in_memory().unwrap();
    let ledger = MigrationLedger::new("catalog_migrations").unwrap();
    let r = runner(vec![Migration::sql("001_a", CREATE_A)]).with_ledger(ledger.clone());

    r.run(&mut conn).unwrap();

    assert_eq!(ledger.applied_names(&conn).unwrap(), vec!["001_a"]);
    assert!(!table_exists(&conn, "schema_migrations"));
    assert!(r.run(&mut conn).unwrap().is_noop());
}

#[test]
fn sequence_ids_follow_application_order() {
    let mut conn = Connection::open_in_memory().unwrap();
    runner(vec![
        Migration::sql("001_a", CREATE_A),
        Migration::sql("002_b", ALTER_A),
    ])
    .run(&mut conn)
    .unwrap();
    runner(vec![
        Migration::sql("001_a", CREATE_A),
        Migration::sql("002_b", ALTER_A),
        Migration::sql("003_c", CREATE_C),
    ])
    .run(&mut conn)
    .unwrap();

    let records = MigrationLedger::default().list_applied(&conn).unwrap();
    let ids: Vec<i64> = records.iter().map(|r| r.sequence_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(records.windows(2).all(|w| w[0].applied_at <= w[1].applied_at));
}

#[test]
fn locked_database_is_reported_before_any_body_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.db");

    let mut conn = connection::open(&path, Duration::ZERO).unwrap();
    runner(vec![Migration::sql("001_a", CREATE_A)])
        .run(&mut conn)
        .unwrap();

    let holder = connection::open(&path, Duration::ZERO).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE").unwrap();

    let journal = Journal::default();
    let err = runner(vec![
        journal.migration("001_a", CREATE_A),
        journal.migration("002_b", ALTER_A),
    ])
    .run(&mut conn)
    .unwrap_err();

    match &err {
        Error::Database(reason) => assert!(reason.contains("002_b"), "{reason}"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(journal.runs().is_empty());

    holder.execute_batch("ROLLBACK").unwrap();
    assert_eq!(applied(&conn), vec!["001_a"]);
    assert_eq!(column_names(&conn, "a"), vec!["id"]);
}
