//! Safe handle-lifetime runtime over the ODBC driver manager.
//!
//! The driver manager owns querying, transport and storage; this crate owns
//! the part it cannot: releasing the environment / connection / statement
//! handle graph in strict child-before-parent order while wrappers drop in
//! arbitrary order, converting between UTF-8 and the wide-character ODBC
//! ABI, and surfacing the diagnostic-record chain as typed errors.
//!
//! Handles are single-threaded by design (`!Send`); the only cross-handle
//! state is the last-error/last-warning diagnostic slots in [`diag`].

pub mod codec;
pub mod diag;
pub mod engine;
mod error;
mod handles;
#[cfg(feature = "installer")]
pub mod installer;
pub mod value;

pub use engine::{
    ColumnDescriptor, Concurrency, Connection, ConnectionPooling, CursorType, DataSource,
    DriverDescription, Environment, FetchDirection, IndexScope, InfoKind, InfoValue,
    IsolationLevel, ParamDescriptor, ParamIo, PoolingMatch, RowIdScope, SpecialColumns, Statement,
    Transaction, TransactionState,
};
pub use diag::DiagRecord;
pub use error::{OdbcError, Result};
pub use value::{SqlDate, SqlTime, SqlTimestamp, Value};

/// Connect by data-source name with an implicitly-created environment.
pub fn connect(dsn: &str, user: Option<&str>, password: Option<&str>) -> Result<Connection> {
    let mut conn = Connection::new();
    conn.connect(dsn, user, password)?;
    Ok(conn)
}

/// Connect with a full `KEY=value;` connection string and an
/// implicitly-created environment.
pub fn driver_connect(connection_string: &str) -> Result<Connection> {
    let mut conn = Connection::new();
    conn.driver_connect(connection_string)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_without_environment_is_inert() {
        let conn = Connection::new();
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_value_roundtrip_through_public_api() {
        let v: Value = SqlTimestamp::new(2024, 6, 1, 12, 0, 0, 0).into();
        assert_eq!(v.type_name(), "timestamp");
    }

    #[test]
    fn test_driver_connect_rejects_empty_string() {
        let result = driver_connect("");
        assert!(matches!(result, Err(OdbcError::ValidationError(_))));
    }
}
