//! Catalog functions.
//!
//! Each call allocates a statement under the connection, issues the
//! corresponding driver-manager catalog entry point, and hands back the
//! executed [`Statement`] positioned before the first row of the standard
//! ODBC result-set shape for that function.

use crate::codec;
use crate::diag;
use crate::engine::connection::Connection;
use crate::engine::statement::Statement;
use crate::error::Result;
use odbc_sys::{Handle, HandleType, SqlDataType};

const SQL_NTS: i16 = -3;

/// Uniqueness filter for [`Connection::indexes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexScope {
    UniqueOnly,
    All,
}

/// Row-identifier class for [`Connection::special_columns`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialColumns {
    BestRowId,
    RowVersion,
}

/// Minimum cursor scope the returned row identifier must keep its meaning
/// for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowIdScope {
    CurrentRow,
    Transaction,
    Session,
}

/// Driver-manager catalog entry points. Declared here against the linked
/// driver manager; shapes follow the ODBC 3 wide ABI.
mod ffi {
    use odbc_sys::{HStmt, SqlDataType, SqlReturn, WChar};

    extern "system" {
        pub fn SQLTablesW(
            hstmt: HStmt,
            catalog_name: *const WChar,
            name_length_1: i16,
            schema_name: *const WChar,
            name_length_2: i16,
            table_name: *const WChar,
            name_length_3: i16,
            table_type: *const WChar,
            name_length_4: i16,
        ) -> SqlReturn;

        pub fn SQLColumnsW(
            hstmt: HStmt,
            catalog_name: *const WChar,
            name_length_1: i16,
            schema_name: *const WChar,
            name_length_2: i16,
            table_name: *const WChar,
            name_length_3: i16,
            column_name: *const WChar,
            name_length_4: i16,
        ) -> SqlReturn;

        pub fn SQLPrimaryKeysW(
            hstmt: HStmt,
            catalog_name: *const WChar,
            name_length_1: i16,
            schema_name: *const WChar,
            name_length_2: i16,
            table_name: *const WChar,
            name_length_3: i16,
        ) -> SqlReturn;

        pub fn SQLStatisticsW(
            hstmt: HStmt,
            catalog_name: *const WChar,
            name_length_1: i16,
            schema_name: *const WChar,
            name_length_2: i16,
            table_name: *const WChar,
            name_length_3: i16,
            unique: u16,
            reserved: u16,
        ) -> SqlReturn;

        pub fn SQLForeignKeysW(
            hstmt: HStmt,
            pk_catalog_name: *const WChar,
            name_length_1: i16,
            pk_schema_name: *const WChar,
            name_length_2: i16,
            pk_table_name: *const WChar,
            name_length_3: i16,
            fk_catalog_name: *const WChar,
            name_length_4: i16,
            fk_schema_name: *const WChar,
            name_length_5: i16,
            fk_table_name: *const WChar,
            name_length_6: i16,
        ) -> SqlReturn;

        pub fn SQLTablePrivilegesW(
            hstmt: HStmt,
            catalog_name: *const WChar,
            name_length_1: i16,
            schema_name: *const WChar,
            name_length_2: i16,
            table_name: *const WChar,
            name_length_3: i16,
        ) -> SqlReturn;

        pub fn SQLProceduresW(
            hstmt: HStmt,
            catalog_name: *const WChar,
            name_length_1: i16,
            schema_name: *const WChar,
            name_length_2: i16,
            proc_name: *const WChar,
            name_length_3: i16,
        ) -> SqlReturn;

        pub fn SQLProcedureColumnsW(
            hstmt: HStmt,
            catalog_name: *const WChar,
            name_length_1: i16,
            schema_name: *const WChar,
            name_length_2: i16,
            proc_name: *const WChar,
            name_length_3: i16,
            column_name: *const WChar,
            name_length_4: i16,
        ) -> SqlReturn;

        pub fn SQLSpecialColumnsW(
            hstmt: HStmt,
            identifier_type: i16,
            catalog_name: *const WChar,
            name_length_1: i16,
            schema_name: *const WChar,
            name_length_2: i16,
            table_name: *const WChar,
            name_length_3: i16,
            scope: i16,
            nullable: i16,
        ) -> SqlReturn;

        pub fn SQLGetTypeInfoW(hstmt: HStmt, data_type: SqlDataType) -> SqlReturn;
    }
}

/// Optional wide argument: `None` passes a null filter to the driver.
struct WideArg(Option<Vec<u16>>);

impl WideArg {
    fn new(s: Option<&str>) -> Self {
        Self(s.map(codec::wide_nts))
    }

    fn ptr(&self) -> *const u16 {
        match &self.0 {
            Some(v) => v.as_ptr(),
            None => std::ptr::null(),
        }
    }

    fn len(&self) -> i16 {
        match &self.0 {
            Some(_) => SQL_NTS,
            None => 0,
        }
    }
}

impl Connection {
    /// Tables matching the given filters; `table_type` is a comma-separated
    /// list like `"TABLE,VIEW"`.
    pub fn tables(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> Result<Statement> {
        let mut stmt = self.statement()?;
        let hstmt = stmt.raw()?;
        let (c, s, t, ty) = (
            WideArg::new(catalog),
            WideArg::new(schema),
            WideArg::new(table),
            WideArg::new(table_type),
        );
        let ret = unsafe {
            ffi::SQLTablesW(
                hstmt,
                c.ptr(),
                c.len(),
                s.ptr(),
                s.len(),
                t.ptr(),
                t.len(),
                ty.ptr(),
                ty.len(),
            )
        };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLTablesW") }?;
        stmt.describe_columns()?;
        Ok(stmt)
    }

    /// Columns of the matching tables.
    pub fn columns(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
    ) -> Result<Statement> {
        let mut stmt = self.statement()?;
        let hstmt = stmt.raw()?;
        let (c, s, t, col) = (
            WideArg::new(catalog),
            WideArg::new(schema),
            WideArg::new(table),
            WideArg::new(column),
        );
        let ret = unsafe {
            ffi::SQLColumnsW(
                hstmt,
                c.ptr(),
                c.len(),
                s.ptr(),
                s.len(),
                t.ptr(),
                t.len(),
                col.ptr(),
                col.len(),
            )
        };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLColumnsW") }?;
        stmt.describe_columns()?;
        Ok(stmt)
    }

    /// Primary-key columns of `table`.
    pub fn primary_keys(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Statement> {
        let mut stmt = self.statement()?;
        let hstmt = stmt.raw()?;
        let (c, s, t) = (
            WideArg::new(catalog),
            WideArg::new(schema),
            WideArg::new(Some(table)),
        );
        let ret = unsafe {
            ffi::SQLPrimaryKeysW(hstmt, c.ptr(), c.len(), s.ptr(), s.len(), t.ptr(), t.len())
        };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLPrimaryKeysW") }?;
        stmt.describe_columns()?;
        Ok(stmt)
    }

    /// Index statistics for `table`.
    pub fn indexes(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
        scope: IndexScope,
    ) -> Result<Statement> {
        let mut stmt = self.statement()?;
        let hstmt = stmt.raw()?;
        let (c, s, t) = (
            WideArg::new(catalog),
            WideArg::new(schema),
            WideArg::new(Some(table)),
        );
        let unique = match scope {
            IndexScope::UniqueOnly => 0, // SQL_INDEX_UNIQUE
            IndexScope::All => 1,        // SQL_INDEX_ALL
        };
        let ret = unsafe {
            ffi::SQLStatisticsW(
                hstmt,
                c.ptr(),
                c.len(),
                s.ptr(),
                s.len(),
                t.ptr(),
                t.len(),
                unique,
                0, // SQL_QUICK
            )
        };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLStatisticsW") }?;
        stmt.describe_columns()?;
        Ok(stmt)
    }

    /// Foreign-key relationships between `pk_table` and `fk_table`; either
    /// side may be omitted for the one-sided forms.
    pub fn foreign_keys(
        &self,
        pk_table: Option<&str>,
        fk_table: Option<&str>,
    ) -> Result<Statement> {
        let mut stmt = self.statement()?;
        let hstmt = stmt.raw()?;
        let (pk, fk) = (WideArg::new(pk_table), WideArg::new(fk_table));
        let none = WideArg::new(None);
        let ret = unsafe {
            ffi::SQLForeignKeysW(
                hstmt,
                none.ptr(),
                none.len(),
                none.ptr(),
                none.len(),
                pk.ptr(),
                pk.len(),
                none.ptr(),
                none.len(),
                none.ptr(),
                none.len(),
                fk.ptr(),
                fk.len(),
            )
        };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLForeignKeysW") }?;
        stmt.describe_columns()?;
        Ok(stmt)
    }

    /// Privileges defined on the matching tables.
    pub fn table_privileges(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Statement> {
        let mut stmt = self.statement()?;
        let hstmt = stmt.raw()?;
        let (c, s, t) = (
            WideArg::new(catalog),
            WideArg::new(schema),
            WideArg::new(Some(table)),
        );
        let ret = unsafe {
            ffi::SQLTablePrivilegesW(hstmt, c.ptr(), c.len(), s.ptr(), s.len(), t.ptr(), t.len())
        };
        unsafe {
            diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLTablePrivilegesW")
        }?;
        stmt.describe_columns()?;
        Ok(stmt)
    }

    /// Stored procedures matching `procedure`.
    pub fn procedures(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        procedure: Option<&str>,
    ) -> Result<Statement> {
        let mut stmt = self.statement()?;
        let hstmt = stmt.raw()?;
        let (c, s, p) = (
            WideArg::new(catalog),
            WideArg::new(schema),
            WideArg::new(procedure),
        );
        let ret = unsafe {
            ffi::SQLProceduresW(hstmt, c.ptr(), c.len(), s.ptr(), s.len(), p.ptr(), p.len())
        };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLProceduresW") }?;
        stmt.describe_columns()?;
        Ok(stmt)
    }

    /// Parameter and result columns of the matching procedures.
    pub fn procedure_columns(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        procedure: Option<&str>,
        column: Option<&str>,
    ) -> Result<Statement> {
        let mut stmt = self.statement()?;
        let hstmt = stmt.raw()?;
        let (c, s, p, col) = (
            WideArg::new(catalog),
            WideArg::new(schema),
            WideArg::new(procedure),
            WideArg::new(column),
        );
        let ret = unsafe {
            ffi::SQLProcedureColumnsW(
                hstmt,
                c.ptr(),
                c.len(),
                s.ptr(),
                s.len(),
                p.ptr(),
                p.len(),
                col.ptr(),
                col.len(),
            )
        };
        unsafe {
            diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLProcedureColumnsW")
        }?;
        stmt.describe_columns()?;
        Ok(stmt)
    }

    /// Optimal row-identifier or automatically-updated columns of `table`.
    pub fn special_columns(
        &self,
        kind: SpecialColumns,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
        scope: RowIdScope,
        include_nullable: bool,
    ) -> Result<Statement> {
        let mut stmt = self.statement()?;
        let hstmt = stmt.raw()?;
        let (c, s, t) = (
            WideArg::new(catalog),
            WideArg::new(schema),
            WideArg::new(Some(table)),
        );
        let identifier_type = match kind {
            SpecialColumns::BestRowId => 1,  // SQL_BEST_ROWID
            SpecialColumns::RowVersion => 2, // SQL_ROWVER
        };
        let scope = match scope {
            RowIdScope::CurrentRow => 0,  // SQL_SCOPE_CURROW
            RowIdScope::Transaction => 1, // SQL_SCOPE_TRANSACTION
            RowIdScope::Session => 2,     // SQL_SCOPE_SESSION
        };
        let ret = unsafe {
            ffi::SQLSpecialColumnsW(
                hstmt,
                identifier_type,
                c.ptr(),
                c.len(),
                s.ptr(),
                s.len(),
                t.ptr(),
                t.len(),
                scope,
                i16::from(include_nullable),
            )
        };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLSpecialColumnsW") }?;
        stmt.describe_columns()?;
        Ok(stmt)
    }

    /// Type information for one SQL type, or every type the driver knows.
    pub fn type_info(&self, sql_type: Option<SqlDataType>) -> Result<Statement> {
        let mut stmt = self.statement()?;
        let hstmt = stmt.raw()?;
        let ty = sql_type.unwrap_or(SqlDataType(0)); // SQL_ALL_TYPES
        let ret = unsafe { ffi::SQLGetTypeInfoW(hstmt, ty) };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLGetTypeInfoW") }?;
        stmt.describe_columns()?;
        Ok(stmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OdbcError;

    #[test]
    fn test_catalog_calls_require_connection() {
        let conn = Connection::new();
        assert!(matches!(
            conn.tables(None, None, None, None),
            Err(OdbcError::NotConnected)
        ));
        assert!(matches!(
            conn.primary_keys(None, None, "t"),
            Err(OdbcError::NotConnected)
        ));
        assert!(matches!(conn.type_info(None), Err(OdbcError::NotConnected)));
    }

    #[test]
    fn test_wide_arg_null_and_present() {
        let absent = WideArg::new(None);
        assert!(absent.ptr().is_null());
        assert_eq!(absent.len(), 0);

        let present = WideArg::new(Some("dbo"));
        assert!(!present.ptr().is_null());
        assert_eq!(present.len(), SQL_NTS);
    }

    #[test]
    #[ignore] // needs a driver manager and ODBC_TEST_DSN
    fn test_tables_returns_standard_result_shape() {
        let dsn = std::env::var("ODBC_TEST_DSN").expect("ODBC_TEST_DSN not set");
        let mut conn = Connection::new();
        conn.connect(&dsn, None, None).expect("connect");
        let mut stmt = conn
            .tables(None, None, None, Some("TABLE"))
            .expect("SQLTables");
        // TABLE_CAT, TABLE_SCHEM, TABLE_NAME, TABLE_TYPE, REMARKS
        assert!(stmt.num_cols() >= 5);
        while let Some(row) = stmt.fetch().expect("fetch") {
            assert_eq!(row.len(), stmt.num_cols());
        }
        stmt.finalize();
        conn.disconnect(true).expect("disconnect");
    }
}
