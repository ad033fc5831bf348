//! Live handle-lifecycle tests against a real driver manager.
//!
//! These verify the teardown ordering guarantees end to end: a connection's
//! native handle outlives its statements, an environment outlives its
//! connections, and forced/unforced disconnect behave as documented. They
//! need a configured data source and skip themselves when ODBC_TEST_DSN is
//! not set.

use odbc_runtime::{diag, Connection, Environment, OdbcError, Value};

mod helpers;
use helpers::env::get_test_dsn;

fn test_dsn() -> Option<String> {
    let dsn = get_test_dsn();
    if dsn.is_none() {
        eprintln!("skipping live test: ODBC_TEST_DSN not set");
    }
    dsn
}

#[test]
fn test_statement_teardown_order_under_shared_environment() {
    let Some(dsn) = test_dsn() else { return };

    let env = Environment::new().expect("allocate environment");
    let mut conn = env.connect(&dsn, None, None).expect("connect");
    assert_eq!(env.connection_count(), 1);

    let mut s1 = conn.execute_direct("SELECT 1").expect("execute s1");
    let mut s2 = conn.execute_direct("SELECT 2").expect("execute s2");
    assert_eq!(conn.statement_count(), 2);

    s1.finalize();
    assert!(conn.is_connected(), "dropping one statement must not disconnect");
    assert_eq!(conn.statement_count(), 1);

    s2.finalize();
    assert_eq!(conn.statement_count(), 0);

    assert_eq!(conn.disconnect(false).expect("disconnect"), true);
    assert!(!conn.is_connected());
    assert_eq!(env.connection_count(), 0);
}

#[test]
fn test_unforced_disconnect_blocked_by_open_statement() {
    let Some(dsn) = test_dsn() else { return };

    let mut conn = Connection::new();
    conn.connect(&dsn, None, None).expect("connect");
    let mut stmt = conn.execute_direct("SELECT 1").expect("execute");

    assert_eq!(
        conn.disconnect(false).expect("unforced disconnect"),
        false,
        "open statement must block the disconnect"
    );
    assert!(conn.is_connected());

    assert_eq!(conn.disconnect(true).expect("forced disconnect"), true);
    assert!(!conn.is_connected());

    // the forced disconnect finalized the statement out from under us
    let err = stmt.fetch().unwrap_err();
    assert!(matches!(err, OdbcError::StaleStatement));
    stmt.finalize(); // no-op, already released
}

#[test]
fn test_finalize_twice_is_noop() {
    let Some(dsn) = test_dsn() else { return };

    let mut conn = Connection::new();
    conn.connect(&dsn, None, None).expect("connect");
    let mut stmt = conn.execute_direct("SELECT 1").expect("execute");
    stmt.finalize();
    stmt.finalize();
    assert_eq!(conn.statement_count(), 0);
    conn.disconnect(true).expect("disconnect");
}

#[test]
fn test_connection_survives_environment_wrapper_drop() {
    let Some(dsn) = test_dsn() else { return };

    let mut conn = {
        let env = Environment::new().expect("allocate environment");
        env.connect(&dsn, None, None).expect("connect")
        // env wrapper drops here; the native handle must stay alive
    };
    let mut stmt = conn.execute_direct("SELECT 1").expect("execute after env drop");
    let row = stmt.fetch().expect("fetch").expect("one row");
    assert!(!row.is_empty());
    stmt.finalize();
    conn.disconnect(true).expect("disconnect");
}

#[test]
fn test_fetch_returns_typed_values_and_none_at_end() {
    let Some(dsn) = test_dsn() else { return };

    let mut conn = Connection::new();
    conn.connect(&dsn, None, None).expect("connect");
    let mut stmt = conn.execute_direct("SELECT 1").expect("execute");
    assert!(stmt.num_cols() >= 1);

    let row = stmt.fetch().expect("fetch").expect("one row");
    match &row[0] {
        Value::Int(v) => assert_eq!(*v, 1),
        Value::BigInt(v) => assert_eq!(*v, 1),
        Value::Double(v) => assert_eq!(*v, 1.0),
        Value::Text(s) => assert_eq!(s.trim(), "1"),
        other => panic!("unexpected value shape: {other:?}"),
    }
    assert!(stmt.fetch().expect("fetch past end").is_none());

    stmt.finalize();
    conn.disconnect(true).expect("disconnect");
}

#[test]
fn test_failing_call_populates_last_error_slot() {
    let Some(dsn) = test_dsn() else { return };

    let mut conn = Connection::new();
    conn.connect(&dsn, None, None).expect("connect");
    diag::clear_diagnostics();

    let err = conn
        .execute_direct("SELECT * FROM table_that_does_not_exist_odbc_runtime")
        .unwrap_err();
    assert!(!err.records().is_empty());

    let staged = diag::last_error().expect("last-error slot populated");
    assert_eq!(staged, err.records().to_vec());
    assert!(diag::last_warning().is_none());

    conn.disconnect(true).expect("disconnect");
}

#[test]
fn test_prepared_roundtrip_with_parameters() {
    let Some(dsn) = test_dsn() else { return };

    let mut conn = Connection::new();
    conn.connect(&dsn, None, None).expect("connect");

    let mut stmt = conn.prepare("SELECT ?").expect("prepare");
    // parameter count mismatch is rejected before touching the driver
    let err = stmt.execute(&[]).unwrap_err();
    assert!(matches!(err, OdbcError::ValidationError(_)));

    stmt.execute(&[Value::Int(7)]).expect("execute");
    let row = stmt.fetch().expect("fetch").expect("one row");
    assert_eq!(row[0].as_i64(), Some(7));

    stmt.finalize();
    conn.disconnect(true).expect("disconnect");
}
