//! Helper functions for reading environment variables in tests

/// Load .env when the test-helpers feature is enabled, then read
/// ODBC_TEST_DSN. Returns None if not set (tests should skip).
pub fn get_test_dsn() -> Option<String> {
    #[cfg(feature = "test-helpers")]
    let _ = dotenvy::dotenv();
    std::env::var("ODBC_TEST_DSN").ok().filter(|s| !s.is_empty())
}

/// Full connection string for driver-connect tests, if configured.
#[allow(dead_code)]
pub fn get_test_connection_string() -> Option<String> {
    #[cfg(feature = "test-helpers")]
    let _ = dotenvy::dotenv();
    std::env::var("ODBC_TEST_CONNECTION_STRING")
        .ok()
        .filter(|s| !s.is_empty())
}
