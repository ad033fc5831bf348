//! `SQLGetInfo` access.
//!
//! The info-type space is a flat enumeration in the ODBC standard; the codes
//! carried here are the ones with stable, driver-independent meaning. The
//! shape of each answer (text vs 16-bit vs 32-bit) is fixed per code.

use crate::codec;
use crate::diag;
use crate::engine::connection::Connection;
use crate::error::Result;
use odbc_sys::{Handle, HandleType, Pointer};

mod ffi {
    use odbc_sys::{HDbc, Pointer, SqlReturn};

    extern "system" {
        pub fn SQLGetInfoW(
            hdbc: HDbc,
            info_type: u16,
            info_value: Pointer,
            buffer_length: i16,
            string_length: *mut i16,
        ) -> SqlReturn;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum InfoKind {
    MaxDriverConnections = 0,
    MaxConcurrentActivities = 1,
    DataSourceName = 2,
    DriverName = 6,
    DriverVer = 7,
    OdbcVer = 10,
    ServerName = 13,
    SearchPatternEscape = 14,
    DatabaseName = 16,
    DbmsName = 17,
    DbmsVer = 18,
    AccessibleTables = 19,
    AccessibleProcedures = 20,
    DataSourceReadOnly = 25,
    DefaultTxnIsolation = 26,
    IdentifierCase = 28,
    IdentifierQuoteChar = 29,
    MaxColumnNameLen = 30,
    MaxCursorNameLen = 31,
    MaxSchemaNameLen = 32,
    MaxCatalogNameLen = 34,
    MaxTableNameLen = 35,
    TxnCapable = 46,
    UserName = 47,
    TxnIsolationOption = 72,
    GetDataExtensions = 81,
    SpecialCharacters = 94,
    MaxStatementLen = 105,
    MaxUserNameLen = 107,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfoShape {
    Text,
    Small,
    Word,
}

impl InfoKind {
    fn shape(self) -> InfoShape {
        use InfoKind::*;
        match self {
            DataSourceName | DriverName | DriverVer | OdbcVer | ServerName
            | SearchPatternEscape | DatabaseName | DbmsName | DbmsVer | AccessibleTables
            | AccessibleProcedures | DataSourceReadOnly | IdentifierQuoteChar
            | SpecialCharacters | UserName => InfoShape::Text,
            MaxDriverConnections | MaxConcurrentActivities | IdentifierCase
            | MaxColumnNameLen | MaxCursorNameLen | MaxSchemaNameLen | MaxCatalogNameLen
            | MaxTableNameLen | TxnCapable | MaxUserNameLen => InfoShape::Small,
            DefaultTxnIsolation | TxnIsolationOption | GetDataExtensions | MaxStatementLen => {
                InfoShape::Word
            }
        }
    }
}

/// One `SQLGetInfo` answer, shaped per info type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InfoValue {
    Text(String),
    Small(u16),
    Word(u32),
}

impl Connection {
    /// Driver/data-source property, shaped according to the info type.
    pub fn get_info(&self, kind: InfoKind) -> Result<InfoValue> {
        match kind.shape() {
            InfoShape::Text => self.get_info_string(kind).map(InfoValue::Text),
            InfoShape::Small => self.get_info_u16(kind).map(InfoValue::Small),
            InfoShape::Word => self.get_info_u32(kind).map(InfoValue::Word),
        }
    }

    pub fn get_info_string(&self, kind: InfoKind) -> Result<String> {
        let hdbc = self.raw()?;
        let mut buf = [0u16; 512];
        let mut len: i16 = 0;
        let ret = unsafe {
            ffi::SQLGetInfoW(
                hdbc,
                kind as u16,
                buf.as_mut_ptr() as Pointer,
                (buf.len() * 2) as i16,
                &mut len,
            )
        };
        unsafe { diag::check_success(HandleType::Dbc, hdbc as Handle, ret, "SQLGetInfoW") }?;
        Ok(codec::string_from_wide_nts(&buf))
    }

    pub fn get_info_u16(&self, kind: InfoKind) -> Result<u16> {
        let hdbc = self.raw()?;
        let mut value: u16 = 0;
        let ret = unsafe {
            ffi::SQLGetInfoW(
                hdbc,
                kind as u16,
                &mut value as *mut u16 as Pointer,
                std::mem::size_of::<u16>() as i16,
                std::ptr::null_mut(),
            )
        };
        unsafe { diag::check_success(HandleType::Dbc, hdbc as Handle, ret, "SQLGetInfoW") }?;
        Ok(value)
    }

    pub fn get_info_u32(&self, kind: InfoKind) -> Result<u32> {
        let hdbc = self.raw()?;
        let mut value: u32 = 0;
        let ret = unsafe {
            ffi::SQLGetInfoW(
                hdbc,
                kind as u16,
                &mut value as *mut u32 as Pointer,
                std::mem::size_of::<u32>() as i16,
                std::ptr::null_mut(),
            )
        };
        unsafe { diag::check_success(HandleType::Dbc, hdbc as Handle, ret, "SQLGetInfoW") }?;
        Ok(value)
    }

    pub fn dbms_name(&self) -> Result<String> {
        self.get_info_string(InfoKind::DbmsName)
    }

    pub fn dbms_version(&self) -> Result<String> {
        self.get_info_string(InfoKind::DbmsVer)
    }

    pub fn driver_name(&self) -> Result<String> {
        self.get_info_string(InfoKind::DriverName)
    }

    pub fn driver_version(&self) -> Result<String> {
        self.get_info_string(InfoKind::DriverVer)
    }

    pub fn data_source_name(&self) -> Result<String> {
        self.get_info_string(InfoKind::DataSourceName)
    }

    pub fn database_name(&self) -> Result<String> {
        self.get_info_string(InfoKind::DatabaseName)
    }

    pub fn server_name(&self) -> Result<String> {
        self.get_info_string(InfoKind::ServerName)
    }

    pub fn user_name(&self) -> Result<String> {
        self.get_info_string(InfoKind::UserName)
    }

    pub fn identifier_quote_char(&self) -> Result<String> {
        self.get_info_string(InfoKind::IdentifierQuoteChar)
    }

    /// Whether the data source supports transactions at all.
    pub fn supports_transactions(&self) -> Result<bool> {
        // SQL_TC_NONE is 0
        Ok(self.get_info_u16(InfoKind::TxnCapable)? != 0)
    }

    pub fn is_read_only(&self) -> Result<bool> {
        Ok(self.get_info_string(InfoKind::DataSourceReadOnly)? == "Y")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OdbcError;

    #[test]
    fn test_info_kind_codes_match_odbc() {
        assert_eq!(InfoKind::DataSourceName as u16, 2);
        assert_eq!(InfoKind::DriverName as u16, 6);
        assert_eq!(InfoKind::DbmsName as u16, 17);
        assert_eq!(InfoKind::TxnCapable as u16, 46);
        assert_eq!(InfoKind::SpecialCharacters as u16, 94);
    }

    #[test]
    fn test_info_shapes() {
        assert_eq!(InfoKind::DbmsName.shape(), InfoShape::Text);
        assert_eq!(InfoKind::TxnCapable.shape(), InfoShape::Small);
        assert_eq!(InfoKind::DefaultTxnIsolation.shape(), InfoShape::Word);
    }

    #[test]
    fn test_get_info_requires_connection() {
        let conn = Connection::new();
        assert!(matches!(
            conn.get_info(InfoKind::DbmsName),
            Err(OdbcError::NotConnected)
        ));
        assert!(matches!(conn.dbms_name(), Err(OdbcError::NotConnected)));
    }

    #[test]
    #[ignore] // needs a driver manager and ODBC_TEST_DSN
    fn test_get_info_answers_are_shaped() {
        let dsn = std::env::var("ODBC_TEST_DSN").expect("ODBC_TEST_DSN not set");
        let mut conn = Connection::new();
        conn.connect(&dsn, None, None).expect("connect");
        match conn.get_info(InfoKind::DbmsName).expect("SQLGetInfo") {
            InfoValue::Text(name) => assert!(!name.is_empty()),
            other => panic!("expected text answer, got {other:?}"),
        }
        conn.disconnect(true).expect("disconnect");
    }
}
