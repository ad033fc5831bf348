use crate::diag::DiagRecord;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum OdbcError {
    /// A native ODBC call returned a failure status. Carries the complete
    /// drained diagnostic chain, first record first.
    #[error("{function} failed: {}", format_chain(.records))]
    Diagnostics {
        function: &'static str,
        records: Vec<DiagRecord>,
    },

    #[error("Already connected")]
    AlreadyConnected,

    #[error("No connection")]
    NotConnected,

    #[error("Stale statement handle")]
    StaleStatement,

    #[error("No result set available")]
    NoResultSet,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

fn format_chain(records: &[DiagRecord]) -> String {
    let parts: Vec<String> = records.iter().map(|r| r.to_string()).collect();
    parts.join("\n")
}

impl OdbcError {
    /// SQLSTATE of the first diagnostic record, `"00000"` otherwise.
    pub fn sqlstate(&self) -> &str {
        match self {
            OdbcError::Diagnostics { records, .. } => records
                .first()
                .map(|r| r.sqlstate.as_str())
                .unwrap_or("00000"),
            _ => "00000",
        }
    }

    /// Native error code of the first diagnostic record, `0` otherwise.
    pub fn native_code(&self) -> i32 {
        match self {
            OdbcError::Diagnostics { records, .. } => {
                records.first().map(|r| r.native_code).unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn records(&self) -> &[DiagRecord] {
        match self {
            OdbcError::Diagnostics { records, .. } => records,
            _ => &[],
        }
    }

    /// Returns true if this is a connection-related error (class 08 SQLSTATE
    /// or a local connection-state failure).
    pub fn is_connection_error(&self) -> bool {
        match self {
            OdbcError::AlreadyConnected | OdbcError::NotConnected => true,
            OdbcError::Diagnostics { records, .. } => records
                .first()
                .map(|r| r.sqlstate.starts_with("08"))
                .unwrap_or(false),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OdbcError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_error() -> OdbcError {
        OdbcError::Diagnostics {
            function: "SQLConnectW",
            records: vec![
                DiagRecord::driver("08001", -4, "Unable to establish connection"),
                DiagRecord::driver("01000", 0, "General warning"),
            ],
        }
    }

    #[test]
    fn test_diagnostics_accessors() {
        let err = chain_error();
        assert_eq!(err.sqlstate(), "08001");
        assert_eq!(err.native_code(), -4);
        assert_eq!(err.records().len(), 2);
    }

    #[test]
    fn test_diagnostics_display_contains_function_and_records() {
        let text = chain_error().to_string();
        assert!(text.contains("SQLConnectW failed"));
        assert!(text.contains("08001 (-4) Unable to establish connection"));
        assert!(text.contains("01000 (0) General warning"));
    }

    #[test]
    fn test_non_diagnostics_defaults() {
        let err = OdbcError::NotConnected;
        assert_eq!(err.sqlstate(), "00000");
        assert_eq!(err.native_code(), 0);
        assert!(err.records().is_empty());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(chain_error().is_connection_error());
        assert!(OdbcError::AlreadyConnected.is_connection_error());
        assert!(OdbcError::NotConnected.is_connection_error());

        let query_err = OdbcError::Diagnostics {
            function: "SQLExecDirectW",
            records: vec![DiagRecord::driver("42S02", 208, "Table not found")],
        };
        assert!(!query_err.is_connection_error());
        assert!(!OdbcError::StaleStatement.is_connection_error());
    }

    #[test]
    fn test_error_variants_display() {
        assert_eq!(OdbcError::AlreadyConnected.to_string(), "Already connected");
        assert_eq!(OdbcError::NotConnected.to_string(), "No connection");
        assert_eq!(
            OdbcError::StaleStatement.to_string(),
            "Stale statement handle"
        );
        assert_eq!(
            OdbcError::ValidationError("bad input".to_string()).to_string(),
            "Validation error: bad input"
        );
        assert!(OdbcError::UnsupportedFeature("file DSNs".to_string())
            .to_string()
            .contains("file DSNs"));
    }
}
