use crate::codec;
use crate::diag::{self, Outcome};
use crate::engine::connection::Connection;
use crate::error::{OdbcError, Result};
use crate::handles::{finalize_stmt, next_handle_id, StmtInner};
use crate::value::{SqlDate, SqlTime, SqlTimestamp, Value};
use odbc_sys::{
    CDataType, FetchOrientation, HStmt, Handle, HandleType, Len, ParamType, Pointer,
    SQLAllocHandle, SQLBindParameter, SQLCancel, SQLDescribeColW, SQLDescribeParam, SQLExecDirectW,
    SQLExecute, SQLFetch, SQLFetchScroll, SQLFreeStmt, SQLGetData, SQLGetStmtAttrW, SQLMoreResults,
    SQLNumParams, SQLNumResultCols, SQLPrepareW, SQLRowCount, SQLSetStmtAttrW, SqlDataType,
    StatementAttribute, ULen,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr::null_mut;
use std::rc::Rc;

const SQL_NTS: i32 = -3;
const SQL_NTS_SMALL: i16 = -3;
const SQL_NULL_DATA: Len = -1;
const TEXT_CHUNK_UNITS: usize = 1024;
const BINARY_CHUNK_BYTES: usize = 2048;

/// Cursor-name entry points, declared against the linked driver manager.
mod ffi {
    use odbc_sys::{HStmt, SqlReturn, WChar};

    extern "system" {
        pub fn SQLGetCursorNameW(
            hstmt: HStmt,
            cursor_name: *mut WChar,
            buffer_length: i16,
            name_length: *mut i16,
        ) -> SqlReturn;

        pub fn SQLSetCursorNameW(
            hstmt: HStmt,
            cursor_name: *const WChar,
            name_length: i16,
        ) -> SqlReturn;
    }
}

/// Description of one result-set column.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: SqlDataType,
    pub size: usize,
    pub decimal_digits: i16,
    pub nullable: Option<bool>,
}

/// Parameter direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamIo {
    Input,
    Output,
    InputOutput,
}

impl ParamIo {
    fn as_sys(self) -> ParamType {
        match self {
            ParamIo::Input => ParamType::Input,
            ParamIo::Output => ParamType::Output,
            ParamIo::InputOutput => ParamType::InputOutput,
        }
    }
}

/// Description of one parameter marker, as reported by the driver or
/// overridden by the caller.
#[derive(Debug, Clone)]
pub struct ParamDescriptor {
    pub sql_type: SqlDataType,
    pub size: usize,
    pub decimal_digits: i16,
    pub nullable: Option<bool>,
    pub io: ParamIo,
    /// Buffer size reserved for output parameters, in characters/bytes.
    pub output_size: usize,
}

impl ParamDescriptor {
    fn fallback() -> Self {
        // drivers without SQLDescribeParam get a permissive text default
        Self {
            sql_type: SqlDataType(12), // VARCHAR
            size: 0,
            decimal_digits: 0,
            nullable: None,
            io: ParamIo::Input,
            output_size: 256,
        }
    }
}

/// Scroll target for [`Statement::fetch_scroll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDirection {
    Next,
    First,
    Last,
    Prior,
    Absolute(isize),
    Relative(isize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorType {
    ForwardOnly,
    KeysetDriven,
    Dynamic,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    ReadOnly,
    Lock,
    RowVersion,
    Values,
}

/// Stable storage for one bound parameter. Buffers must outlive execution,
/// so they live here until the next bind or finalize.
enum ParamBuf {
    None,
    I32(Box<i32>),
    I64(Box<i64>),
    F64(Box<f64>),
    Wide(Vec<u16>),
    Bytes(Vec<u8>),
    Date(Box<odbc_sys::Date>),
    Time(Box<odbc_sys::Time>),
    Timestamp(Box<odbc_sys::Timestamp>),
}

struct ParamBinding {
    buf: ParamBuf,
    indicator: Box<Len>,
}

/// Owner of one native ODBC statement handle.
///
/// Finalize explicitly with [`Statement::finalize`]; dropping a statement
/// that still holds a native handle force-releases it and logs a warning.
pub struct Statement {
    inner: Rc<RefCell<StmtInner>>,
    cols: Vec<ColumnDescriptor>,
    param_descs: Vec<ParamDescriptor>,
    bindings: Vec<ParamBinding>,
    has_result: bool,
    fallback_fetch: bool,
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("cols", &self.cols)
            .field("param_descs", &self.param_descs)
            .field("bindings_len", &self.bindings.len())
            .field("has_result", &self.has_result)
            .field("fallback_fetch", &self.fallback_fetch)
            .finish()
    }
}

impl Statement {
    pub(crate) fn alloc(conn: &Connection) -> Result<Self> {
        let hdbc = conn.raw()?;
        let mut out: Handle = null_mut();
        let ret = unsafe { SQLAllocHandle(HandleType::Stmt, hdbc as Handle, &mut out) };
        unsafe { diag::check_success(HandleType::Dbc, hdbc as Handle, ret, "SQLAllocHandle") }?;

        let slot = next_handle_id();
        let inner = Rc::new(RefCell::new(StmtInner {
            hstmt: Some(out as HStmt),
            slot: Some(slot),
            dbc: Rc::clone(conn.inner()),
        }));
        conn.inner()
            .borrow_mut()
            .stmts
            .link(slot, Rc::downgrade(&inner));
        Ok(Self {
            inner,
            cols: Vec::new(),
            param_descs: Vec::new(),
            bindings: Vec::new(),
            has_result: false,
            fallback_fetch: false,
        })
    }

    pub(crate) fn raw(&self) -> Result<HStmt> {
        self.inner.borrow().require_hstmt()
    }

    fn invalidate_metadata(&mut self) {
        self.cols.clear();
        self.has_result = false;
    }

    // -- preparation and execution -----------------------------------------

    /// Prepare `sql`, rebuilding parameter descriptors from the driver.
    pub fn prepare(&mut self, sql: &str) -> Result<()> {
        let hstmt = self.raw()?;
        self.invalidate_metadata();
        self.bindings.clear();
        let wsql = codec::wide_nts(sql);
        let ret = unsafe { SQLPrepareW(hstmt, wsql.as_ptr(), SQL_NTS) };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLPrepareW") }?;
        self.param_descs = self.describe_params(hstmt)?;
        Ok(())
    }

    fn describe_params(&self, hstmt: HStmt) -> Result<Vec<ParamDescriptor>> {
        let mut count: i16 = 0;
        let ret = unsafe { SQLNumParams(hstmt, &mut count) };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLNumParams") }?;
        let mut descs = Vec::with_capacity(count.max(0) as usize);
        for i in 1..=count.max(0) as u16 {
            let mut sql_type = SqlDataType(0);
            let mut size: ULen = 0;
            let mut digits: i16 = 0;
            let mut nullable = odbc_sys::Nullability::UNKNOWN;
            let ret = unsafe {
                SQLDescribeParam(hstmt, i, &mut sql_type, &mut size, &mut digits, &mut nullable)
            };
            let described =
                unsafe { diag::check(HandleType::Stmt, hstmt as Handle, ret, "SQLDescribeParam") };
            match described {
                Ok(Outcome::Success) | Ok(Outcome::Info) => descs.push(ParamDescriptor {
                    sql_type,
                    size: size as usize,
                    decimal_digits: digits,
                    nullable: nullability_flag(nullable),
                    io: ParamIo::Input,
                    output_size: 256,
                }),
                // many drivers cannot describe parameters; fall back
                _ => descs.push(ParamDescriptor::fallback()),
            }
        }
        Ok(descs)
    }

    /// Execute the prepared statement with `params` bound positionally.
    pub fn execute(&mut self, params: &[Value]) -> Result<()> {
        let hstmt = self.raw()?;
        if params.len() != self.param_descs.len() {
            return Err(diag::local_error(OdbcError::ValidationError(format!(
                "statement expects {} parameters, got {}",
                self.param_descs.len(),
                params.len()
            ))));
        }
        self.close_cursor_quietly(hstmt);
        if let Err(err) = self.bind_params(hstmt, params) {
            // a failed bind aborts the whole execute
            unsafe {
                SQLFreeStmt(hstmt, odbc_sys::FreeStmtOption::ResetParams);
            }
            self.bindings.clear();
            return Err(err);
        }
        let ret = unsafe { SQLExecute(hstmt) };
        // NO_DATA is a successful empty DML statement
        unsafe { diag::check(HandleType::Stmt, hstmt as Handle, ret, "SQLExecute") }?;
        self.invalidate_metadata();
        self.describe_columns()?;
        Ok(())
    }

    /// One-shot `SQLExecDirect` without a prepare round trip.
    pub fn execute_direct(&mut self, sql: &str) -> Result<()> {
        let hstmt = self.raw()?;
        self.close_cursor_quietly(hstmt);
        self.invalidate_metadata();
        self.bindings.clear();
        self.param_descs.clear();
        let wsql = codec::wide_nts(sql);
        let ret = unsafe { SQLExecDirectW(hstmt, wsql.as_ptr(), SQL_NTS) };
        unsafe { diag::check(HandleType::Stmt, hstmt as Handle, ret, "SQLExecDirectW") }?;
        self.describe_columns()?;
        Ok(())
    }

    fn close_cursor_quietly(&mut self, hstmt: HStmt) {
        if self.has_result {
            unsafe {
                SQLFreeStmt(hstmt, odbc_sys::FreeStmtOption::Close);
            }
            self.has_result = false;
        }
    }

    fn bind_params(&mut self, hstmt: HStmt, params: &[Value]) -> Result<()> {
        self.bindings.clear();
        for (i, value) in params.iter().enumerate() {
            let desc = self.param_descs[i].clone();
            let binding = bind_one_param(hstmt, (i + 1) as u16, value, &desc)?;
            self.bindings.push(binding);
        }
        Ok(())
    }

    // -- result-set metadata ------------------------------------------------

    pub(crate) fn describe_columns(&mut self) -> Result<()> {
        let hstmt = self.raw()?;
        let mut count: i16 = 0;
        let ret = unsafe { SQLNumResultCols(hstmt, &mut count) };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLNumResultCols") }?;
        self.cols.clear();
        for i in 1..=count.max(0) as u16 {
            let mut name = [0u16; 256];
            let mut name_len: i16 = 0;
            let mut sql_type = SqlDataType(0);
            let mut size: ULen = 0;
            let mut digits: i16 = 0;
            let mut nullable = odbc_sys::Nullability::UNKNOWN;
            let ret = unsafe {
                SQLDescribeColW(
                    hstmt,
                    i,
                    name.as_mut_ptr(),
                    name.len() as i16,
                    &mut name_len,
                    &mut sql_type,
                    &mut size,
                    &mut digits,
                    &mut nullable,
                )
            };
            unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLDescribeColW") }?;
            self.cols.push(ColumnDescriptor {
                name: codec::string_from_wide_nts(&name),
                sql_type,
                size: size as usize,
                decimal_digits: digits,
                nullable: nullability_flag(nullable),
            });
        }
        self.has_result = !self.cols.is_empty();
        Ok(())
    }

    pub fn num_cols(&self) -> usize {
        self.cols.len()
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.cols
    }

    pub fn column(&self, index: usize) -> Result<&ColumnDescriptor> {
        self.cols.get(index).ok_or_else(|| {
            OdbcError::ValidationError(format!("column index {index} out of range"))
        })
    }

    pub fn num_params(&self) -> usize {
        self.param_descs.len()
    }

    pub fn param_descriptor(&self, index: usize) -> Result<&ParamDescriptor> {
        self.param_descs.get(index).ok_or_else(|| {
            OdbcError::ValidationError(format!("parameter index {index} out of range"))
        })
    }

    /// Override the driver-reported SQL type for one parameter marker.
    pub fn set_param_type(
        &mut self,
        index: usize,
        sql_type: SqlDataType,
        size: usize,
        decimal_digits: i16,
    ) -> Result<()> {
        let desc = self.param_desc_mut(index)?;
        desc.sql_type = sql_type;
        desc.size = size;
        desc.decimal_digits = decimal_digits;
        Ok(())
    }

    pub fn set_param_io(&mut self, index: usize, io: ParamIo) -> Result<()> {
        self.param_desc_mut(index)?.io = io;
        Ok(())
    }

    pub fn set_param_output_size(&mut self, index: usize, size: usize) -> Result<()> {
        self.param_desc_mut(index)?.output_size = size;
        Ok(())
    }

    fn param_desc_mut(&mut self, index: usize) -> Result<&mut ParamDescriptor> {
        self.param_descs.get_mut(index).ok_or_else(|| {
            OdbcError::ValidationError(format!("parameter index {index} out of range"))
        })
    }

    /// Value written back into an output parameter's buffer by the last
    /// execute.
    pub fn param_output_value(&self, index: usize) -> Result<Value> {
        let desc = self.param_descriptor(index)?;
        if desc.io == ParamIo::Input {
            return Err(OdbcError::ValidationError(format!(
                "parameter {index} is not an output parameter"
            )));
        }
        let binding = self.bindings.get(index).ok_or_else(|| {
            OdbcError::ValidationError(format!("parameter {index} has not been bound"))
        })?;
        if *binding.indicator == SQL_NULL_DATA {
            return Ok(Value::Null);
        }
        Ok(match &binding.buf {
            ParamBuf::None => Value::Null,
            ParamBuf::I32(v) => Value::Int(**v),
            ParamBuf::I64(v) => Value::BigInt(**v),
            ParamBuf::F64(v) => Value::Double(**v),
            ParamBuf::Wide(buf) => Value::Text(codec::string_from_wide_nts(buf)),
            ParamBuf::Bytes(buf) => {
                let n = (*binding.indicator).max(0) as usize;
                Value::Bytes(buf[..n.min(buf.len())].to_vec())
            }
            ParamBuf::Date(d) => Value::Date(SqlDate::from(**d)),
            ParamBuf::Time(t) => Value::Time(SqlTime::from(**t)),
            ParamBuf::Timestamp(ts) => Value::Timestamp(SqlTimestamp::from(**ts)),
        })
    }

    // -- fetching -----------------------------------------------------------

    /// Next row, or `None` at the end of the result set.
    pub fn fetch(&mut self) -> Result<Option<Vec<Value>>> {
        let hstmt = self.raw()?;
        if !self.has_result {
            return Err(diag::local_error(OdbcError::NoResultSet));
        }
        let ret = unsafe { SQLFetch(hstmt) };
        match unsafe { diag::check(HandleType::Stmt, hstmt as Handle, ret, "SQLFetch") }? {
            Outcome::NoData => Ok(None),
            Outcome::Success | Outcome::Info => Ok(Some(self.read_row(hstmt)?)),
        }
    }

    /// Scrolled fetch. Driver managers that reject `SQLFetchScroll` with
    /// IM001/HYC00 are downgraded to plain forward fetch for the rest of
    /// this statement's life (compatibility shim; only `Next` can be
    /// served that way).
    pub fn fetch_scroll(&mut self, direction: FetchDirection) -> Result<Option<Vec<Value>>> {
        if self.fallback_fetch {
            return match direction {
                FetchDirection::Next => self.fetch(),
                _ => Err(diag::local_error(OdbcError::UnsupportedFeature(
                    "driver supports forward-only fetch".to_string(),
                ))),
            };
        }
        let hstmt = self.raw()?;
        if !self.has_result {
            return Err(diag::local_error(OdbcError::NoResultSet));
        }
        let (orientation, offset) = match direction {
            FetchDirection::Next => (FetchOrientation::Next, 0),
            FetchDirection::First => (FetchOrientation::First, 0),
            FetchDirection::Last => (FetchOrientation::Last, 0),
            FetchDirection::Prior => (FetchOrientation::Prior, 0),
            FetchDirection::Absolute(n) => (FetchOrientation::Absolute, n),
            FetchDirection::Relative(n) => (FetchOrientation::Relative, n),
        };
        let ret = unsafe { SQLFetchScroll(hstmt, orientation, offset as Len) };
        match unsafe { diag::check(HandleType::Stmt, hstmt as Handle, ret, "SQLFetchScroll") } {
            Ok(Outcome::NoData) => Ok(None),
            Ok(_) => Ok(Some(self.read_row(hstmt)?)),
            Err(err)
                if direction == FetchDirection::Next
                    && matches!(err.sqlstate(), "IM001" | "HYC00") =>
            {
                log::debug!("SQLFetchScroll unsupported; downgrading to SQLFetch");
                self.fallback_fetch = true;
                self.fetch()
            }
            Err(err) => Err(err),
        }
    }

    /// True once a scroll request has been downgraded to plain fetch.
    pub fn used_fallback_fetch(&self) -> bool {
        self.fallback_fetch
    }

    /// Next row keyed by column name. Duplicate names get a `#n` suffix;
    /// the connection's `uppercase_identifiers` flag controls key casing.
    pub fn fetch_hash(&mut self) -> Result<Option<HashMap<String, Value>>> {
        let keys = self.hash_keys();
        Ok(self.fetch()?.map(|row| {
            keys.into_iter().zip(row).collect()
        }))
    }

    fn hash_keys(&self) -> Vec<String> {
        let upc = self.inner.borrow().dbc.borrow().uppercase_identifiers;
        hash_keys_for(&self.cols, upc)
    }

    /// Up to `n` rows.
    pub fn fetch_many(&mut self, n: usize) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while rows.len() < n {
            match self.fetch()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Every remaining row.
    pub fn fetch_all(&mut self) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Advance to the next result set of a batch, rebuilding column
    /// metadata. `Ok(false)` when no more result sets remain.
    pub fn more_results(&mut self) -> Result<bool> {
        let hstmt = self.raw()?;
        let ret = unsafe { SQLMoreResults(hstmt) };
        match unsafe { diag::check(HandleType::Stmt, hstmt as Handle, ret, "SQLMoreResults") }? {
            Outcome::NoData => Ok(false),
            Outcome::Success | Outcome::Info => {
                self.invalidate_metadata();
                self.describe_columns()?;
                Ok(true)
            }
        }
    }

    /// Rows affected by the last statement, where the driver can tell.
    pub fn row_count(&self) -> Result<i64> {
        let hstmt = self.raw()?;
        let mut count: Len = 0;
        let ret = unsafe { SQLRowCount(hstmt, &mut count) };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLRowCount") }?;
        Ok(count as i64)
    }

    fn read_row(&self, hstmt: HStmt) -> Result<Vec<Value>> {
        let (native_time, utc) = {
            let s = self.inner.borrow();
            let d = s.dbc.borrow();
            (d.use_native_time, d.use_utc_time)
        };
        let mut row = Vec::with_capacity(self.cols.len());
        for (i, col) in self.cols.iter().enumerate() {
            let raw = read_cell(hstmt, (i + 1) as u16, col.sql_type)?;
            row.push(materialize(raw, native_time, utc));
        }
        Ok(row)
    }

    // -- cursor and statement attributes ------------------------------------

    pub fn cursor_name(&self) -> Result<String> {
        let hstmt = self.raw()?;
        let mut name = [0u16; 256];
        let mut len: i16 = 0;
        let ret = unsafe {
            ffi::SQLGetCursorNameW(hstmt, name.as_mut_ptr(), name.len() as i16, &mut len)
        };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLGetCursorNameW") }?;
        Ok(codec::string_from_wide_nts(&name))
    }

    pub fn set_cursor_name(&self, name: &str) -> Result<()> {
        let hstmt = self.raw()?;
        let wname = codec::wide_nts(name);
        let ret = unsafe { ffi::SQLSetCursorNameW(hstmt, wname.as_ptr(), SQL_NTS_SMALL) };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLSetCursorNameW") }
    }

    fn set_attr_usize(
        &self,
        attr: StatementAttribute,
        value: usize,
        function: &'static str,
    ) -> Result<()> {
        let hstmt = self.raw()?;
        let ret = unsafe { SQLSetStmtAttrW(hstmt, attr, value as Pointer, 0) };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, function) }
    }

    fn get_attr_usize(&self, attr: StatementAttribute, function: &'static str) -> Result<usize> {
        let hstmt = self.raw()?;
        let mut value: usize = 0;
        let ret = unsafe {
            SQLGetStmtAttrW(
                hstmt,
                attr,
                &mut value as *mut usize as Pointer,
                0,
                null_mut(),
            )
        };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, function) }?;
        Ok(value)
    }

    pub fn set_query_timeout(&self, secs: usize) -> Result<()> {
        self.set_attr_usize(
            StatementAttribute::QueryTimeout,
            secs,
            "SQLSetStmtAttrW(QUERY_TIMEOUT)",
        )
    }

    pub fn query_timeout(&self) -> Result<usize> {
        self.get_attr_usize(
            StatementAttribute::QueryTimeout,
            "SQLGetStmtAttrW(QUERY_TIMEOUT)",
        )
    }

    pub fn set_max_rows(&self, n: usize) -> Result<()> {
        self.set_attr_usize(StatementAttribute::MaxRows, n, "SQLSetStmtAttrW(MAX_ROWS)")
    }

    pub fn max_rows(&self) -> Result<usize> {
        self.get_attr_usize(StatementAttribute::MaxRows, "SQLGetStmtAttrW(MAX_ROWS)")
    }

    pub fn set_max_length(&self, n: usize) -> Result<()> {
        self.set_attr_usize(
            StatementAttribute::MaxLength,
            n,
            "SQLSetStmtAttrW(MAX_LENGTH)",
        )
    }

    pub fn max_length(&self) -> Result<usize> {
        self.get_attr_usize(StatementAttribute::MaxLength, "SQLGetStmtAttrW(MAX_LENGTH)")
    }

    pub fn set_noscan(&self, on: bool) -> Result<()> {
        self.set_attr_usize(
            StatementAttribute::NoScan,
            usize::from(on),
            "SQLSetStmtAttrW(NOSCAN)",
        )
    }

    pub fn set_cursor_type(&self, cursor: CursorType) -> Result<()> {
        let value = match cursor {
            CursorType::ForwardOnly => 0usize,
            CursorType::KeysetDriven => 1,
            CursorType::Dynamic => 2,
            CursorType::Static => 3,
        };
        self.set_attr_usize(
            StatementAttribute::CursorType,
            value,
            "SQLSetStmtAttrW(CURSOR_TYPE)",
        )
    }

    pub fn set_concurrency(&self, concurrency: Concurrency) -> Result<()> {
        let value = match concurrency {
            Concurrency::ReadOnly => 1usize,
            Concurrency::Lock => 2,
            Concurrency::RowVersion => 3,
            Concurrency::Values => 4,
        };
        self.set_attr_usize(
            StatementAttribute::Concurrency,
            value,
            "SQLSetStmtAttrW(CONCURRENCY)",
        )
    }

    // -- lifecycle ----------------------------------------------------------

    /// Close the open cursor, keeping the handle for re-execution.
    pub fn close(&mut self) -> Result<()> {
        let hstmt = self.raw()?;
        unsafe {
            SQLFreeStmt(hstmt, odbc_sys::FreeStmtOption::Close);
        }
        self.invalidate_metadata();
        Ok(())
    }

    /// Cancel in-flight work on this statement.
    pub fn cancel(&self) -> Result<()> {
        let hstmt = self.raw()?;
        let ret = unsafe { SQLCancel(hstmt) };
        unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLCancel") }
    }

    /// Release the native handle and unlink from the connection. A second
    /// call is a no-op; any later use reads as a stale statement.
    pub fn finalize(&mut self) {
        finalize_stmt(&self.inner, false);
        self.invalidate_metadata();
        self.param_descs.clear();
        self.bindings.clear();
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        finalize_stmt(&self.inner, true);
    }
}

fn nullability_flag(n: odbc_sys::Nullability) -> Option<bool> {
    if n == odbc_sys::Nullability::NULLABLE {
        Some(true)
    } else if n == odbc_sys::Nullability::NO_NULLS {
        Some(false)
    } else {
        None
    }
}

/// C-side shape a SQL type is transferred as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellShape {
    Int,
    BigInt,
    Double,
    Date,
    Time,
    Timestamp,
    Binary,
    Text,
}

fn cell_shape(sql_type: SqlDataType) -> CellShape {
    match sql_type.0 {
        4 | 5 | -6 | -7 => CellShape::Int,            // INTEGER, SMALLINT, TINYINT, BIT
        -5 => CellShape::BigInt,                      // BIGINT
        2 | 3 | 6 | 7 | 8 => CellShape::Double,       // NUMERIC, DECIMAL, FLOAT, REAL, DOUBLE
        9 | 91 => CellShape::Date,
        10 | 92 => CellShape::Time,
        11 | 93 => CellShape::Timestamp,
        -2 | -3 | -4 => CellShape::Binary,            // BINARY, VARBINARY, LONGVARBINARY
        _ => CellShape::Text,
    }
}

fn read_cell(hstmt: HStmt, col: u16, sql_type: SqlDataType) -> Result<Value> {
    unsafe {
        match cell_shape(sql_type) {
            CellShape::Int => {
                let mut v: i32 = 0;
                let mut ind: Len = 0;
                let ret = SQLGetData(
                    hstmt,
                    col,
                    CDataType::SLong,
                    &mut v as *mut i32 as Pointer,
                    std::mem::size_of::<i32>() as Len,
                    &mut ind,
                );
                diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLGetData")?;
                Ok(if ind == SQL_NULL_DATA {
                    Value::Null
                } else {
                    Value::Int(v)
                })
            }
            CellShape::BigInt => {
                let mut v: i64 = 0;
                let mut ind: Len = 0;
                let ret = SQLGetData(
                    hstmt,
                    col,
                    CDataType::SBigInt,
                    &mut v as *mut i64 as Pointer,
                    std::mem::size_of::<i64>() as Len,
                    &mut ind,
                );
                diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLGetData")?;
                Ok(if ind == SQL_NULL_DATA {
                    Value::Null
                } else {
                    Value::BigInt(v)
                })
            }
            CellShape::Double => {
                let mut v: f64 = 0.0;
                let mut ind: Len = 0;
                let ret = SQLGetData(
                    hstmt,
                    col,
                    CDataType::Double,
                    &mut v as *mut f64 as Pointer,
                    std::mem::size_of::<f64>() as Len,
                    &mut ind,
                );
                diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLGetData")?;
                Ok(if ind == SQL_NULL_DATA {
                    Value::Null
                } else {
                    Value::Double(v)
                })
            }
            CellShape::Date => {
                let mut v = odbc_sys::Date {
                    year: 0,
                    month: 0,
                    day: 0,
                };
                let mut ind: Len = 0;
                let ret = SQLGetData(
                    hstmt,
                    col,
                    CDataType::TypeDate,
                    &mut v as *mut odbc_sys::Date as Pointer,
                    std::mem::size_of::<odbc_sys::Date>() as Len,
                    &mut ind,
                );
                diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLGetData")?;
                Ok(if ind == SQL_NULL_DATA {
                    Value::Null
                } else {
                    Value::Date(SqlDate::from(v))
                })
            }
            CellShape::Time => {
                let mut v = odbc_sys::Time {
                    hour: 0,
                    minute: 0,
                    second: 0,
                };
                let mut ind: Len = 0;
                let ret = SQLGetData(
                    hstmt,
                    col,
                    CDataType::TypeTime,
                    &mut v as *mut odbc_sys::Time as Pointer,
                    std::mem::size_of::<odbc_sys::Time>() as Len,
                    &mut ind,
                );
                diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLGetData")?;
                Ok(if ind == SQL_NULL_DATA {
                    Value::Null
                } else {
                    Value::Time(SqlTime::from(v))
                })
            }
            CellShape::Timestamp => {
                let mut v = odbc_sys::Timestamp {
                    year: 0,
                    month: 0,
                    day: 0,
                    hour: 0,
                    minute: 0,
                    second: 0,
                    fraction: 0,
                };
                let mut ind: Len = 0;
                let ret = SQLGetData(
                    hstmt,
                    col,
                    CDataType::TypeTimestamp,
                    &mut v as *mut odbc_sys::Timestamp as Pointer,
                    std::mem::size_of::<odbc_sys::Timestamp>() as Len,
                    &mut ind,
                );
                diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLGetData")?;
                Ok(if ind == SQL_NULL_DATA {
                    Value::Null
                } else {
                    Value::Timestamp(SqlTimestamp::from(v))
                })
            }
            CellShape::Binary => read_binary_cell(hstmt, col),
            CellShape::Text => read_text_cell(hstmt, col),
        }
    }
}

/// Long data arrives in chunks; keep calling `SQLGetData` until the driver
/// reports completion.
unsafe fn read_text_cell(hstmt: HStmt, col: u16) -> Result<Value> {
    let mut acc: Vec<u16> = Vec::new();
    let mut buf = [0u16; TEXT_CHUNK_UNITS];
    loop {
        let mut ind: Len = 0;
        let ret = SQLGetData(
            hstmt,
            col,
            CDataType::WChar,
            buf.as_mut_ptr() as Pointer,
            (buf.len() * 2) as Len,
            &mut ind,
        );
        match diag::check(HandleType::Stmt, hstmt as Handle, ret, "SQLGetData")? {
            Outcome::NoData => break,
            Outcome::Success => {
                if ind == SQL_NULL_DATA {
                    return Ok(Value::Null);
                }
                let units = ((ind.max(0) as usize) / 2).min(buf.len());
                acc.extend_from_slice(&buf[..codec::wide_len(&buf[..units])]);
                break;
            }
            Outcome::Info => {
                if ind == SQL_NULL_DATA {
                    return Ok(Value::Null);
                }
                // truncated chunk: the last unit is the terminator
                acc.extend_from_slice(&buf[..buf.len() - 1]);
            }
        }
    }
    Ok(Value::Text(codec::string_from_wide(&acc)))
}

unsafe fn read_binary_cell(hstmt: HStmt, col: u16) -> Result<Value> {
    let mut acc: Vec<u8> = Vec::new();
    let mut buf = [0u8; BINARY_CHUNK_BYTES];
    loop {
        let mut ind: Len = 0;
        let ret = SQLGetData(
            hstmt,
            col,
            CDataType::Binary,
            buf.as_mut_ptr() as Pointer,
            buf.len() as Len,
            &mut ind,
        );
        match diag::check(HandleType::Stmt, hstmt as Handle, ret, "SQLGetData")? {
            Outcome::NoData => break,
            Outcome::Success => {
                if ind == SQL_NULL_DATA {
                    return Ok(Value::Null);
                }
                let n = (ind.max(0) as usize).min(buf.len());
                acc.extend_from_slice(&buf[..n]);
                break;
            }
            Outcome::Info => {
                if ind == SQL_NULL_DATA {
                    return Ok(Value::Null);
                }
                acc.extend_from_slice(&buf);
            }
        }
    }
    Ok(Value::Bytes(acc))
}

fn hash_keys_for(cols: &[ColumnDescriptor], uppercase: bool) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    cols.iter()
        .map(|c| {
            let base = if uppercase {
                c.name.to_uppercase()
            } else {
                c.name.clone()
            };
            let n = seen.entry(base.clone()).or_insert(0);
            *n += 1;
            if *n == 1 {
                base
            } else {
                format!("{base}#{}", *n - 1)
            }
        })
        .collect()
}

/// Apply the connection's date/time materialization flags.
fn materialize(value: Value, native_time: bool, utc: bool) -> Value {
    if native_time {
        return value;
    }
    match value {
        Value::Date(d) => Value::Text(d.to_string()),
        Value::Time(t) => Value::Text(t.to_string()),
        Value::Timestamp(ts) => Value::Text(ts.format_iso(utc)),
        other => other,
    }
}

fn bind_one_param(
    hstmt: HStmt,
    number: u16,
    value: &Value,
    desc: &ParamDescriptor,
) -> Result<ParamBinding> {
    let mut indicator: Box<Len> = Box::new(0);
    let (c_type, sql_type, column_size, digits, buf, value_ptr, buf_len): (
        CDataType,
        SqlDataType,
        ULen,
        i16,
        ParamBuf,
        Pointer,
        Len,
    ) = match value {
        Value::Null => {
            *indicator = SQL_NULL_DATA;
            if desc.io != ParamIo::Input {
                // reserve an output buffer sized by the descriptor
                let mut wide = vec![0u16; desc.output_size.max(1) + 1];
                let ptr = wide.as_mut_ptr() as Pointer;
                let len = (wide.len() * 2) as Len;
                (
                    CDataType::WChar,
                    desc.sql_type,
                    desc.size.max(desc.output_size) as ULen,
                    desc.decimal_digits,
                    ParamBuf::Wide(wide),
                    ptr,
                    len,
                )
            } else {
                (
                    CDataType::WChar,
                    desc.sql_type,
                    desc.size.max(1) as ULen,
                    desc.decimal_digits,
                    ParamBuf::None,
                    null_mut(),
                    0,
                )
            }
        }
        Value::Int(v) => {
            let mut b = Box::new(*v);
            let ptr = &mut *b as *mut i32 as Pointer;
            (
                CDataType::SLong,
                SqlDataType(4),
                size_or(desc, 10),
                0,
                ParamBuf::I32(b),
                ptr,
                std::mem::size_of::<i32>() as Len,
            )
        }
        Value::BigInt(v) => {
            let mut b = Box::new(*v);
            let ptr = &mut *b as *mut i64 as Pointer;
            (
                CDataType::SBigInt,
                SqlDataType(-5),
                size_or(desc, 19),
                0,
                ParamBuf::I64(b),
                ptr,
                std::mem::size_of::<i64>() as Len,
            )
        }
        Value::Double(v) => {
            let mut b = Box::new(*v);
            let ptr = &mut *b as *mut f64 as Pointer;
            (
                CDataType::Double,
                SqlDataType(8),
                size_or(desc, 15),
                desc.decimal_digits,
                ParamBuf::F64(b),
                ptr,
                std::mem::size_of::<f64>() as Len,
            )
        }
        Value::Text(s) => {
            let chars = s.chars().count();
            let mut wide = codec::wide_nts(s);
            if desc.io != ParamIo::Input && wide.len() < desc.output_size + 1 {
                wide.resize(desc.output_size + 1, 0);
            }
            *indicator = SQL_NTS as Len;
            let ptr = wide.as_mut_ptr() as Pointer;
            let len = (wide.len() * 2) as Len;
            (
                CDataType::WChar,
                textual_sql_type(desc.sql_type),
                size_or(desc, chars.max(1)),
                0,
                ParamBuf::Wide(wide),
                ptr,
                len,
            )
        }
        Value::Bytes(bytes) => {
            let mut owned = bytes.clone();
            if desc.io != ParamIo::Input && owned.len() < desc.output_size {
                owned.resize(desc.output_size, 0);
            }
            *indicator = bytes.len() as Len;
            let ptr = owned.as_mut_ptr() as Pointer;
            let len = owned.len() as Len;
            (
                CDataType::Binary,
                SqlDataType(-3), // VARBINARY
                size_or(desc, bytes.len().max(1)),
                0,
                ParamBuf::Bytes(owned),
                ptr,
                len,
            )
        }
        Value::Date(d) => {
            let mut b = Box::new(odbc_sys::Date::from(*d));
            let ptr = &mut *b as *mut odbc_sys::Date as Pointer;
            (
                CDataType::TypeDate,
                SqlDataType(91),
                size_or(desc, 10),
                0,
                ParamBuf::Date(b),
                ptr,
                std::mem::size_of::<odbc_sys::Date>() as Len,
            )
        }
        Value::Time(t) => {
            let mut b = Box::new(odbc_sys::Time::from(*t));
            let ptr = &mut *b as *mut odbc_sys::Time as Pointer;
            (
                CDataType::TypeTime,
                SqlDataType(92),
                size_or(desc, 8),
                0,
                ParamBuf::Time(b),
                ptr,
                std::mem::size_of::<odbc_sys::Time>() as Len,
            )
        }
        Value::Timestamp(ts) => {
            let mut b = Box::new(odbc_sys::Timestamp::from(*ts));
            let ptr = &mut *b as *mut odbc_sys::Timestamp as Pointer;
            (
                CDataType::TypeTimestamp,
                SqlDataType(93),
                size_or(desc, 29),
                9,
                ParamBuf::Timestamp(b),
                ptr,
                std::mem::size_of::<odbc_sys::Timestamp>() as Len,
            )
        }
    };

    let ret = unsafe {
        SQLBindParameter(
            hstmt,
            number,
            desc.io.as_sys(),
            c_type,
            sql_type,
            column_size,
            digits,
            value_ptr,
            buf_len,
            &mut *indicator,
        )
    };
    unsafe { diag::check_success(HandleType::Stmt, hstmt as Handle, ret, "SQLBindParameter") }?;
    Ok(ParamBinding { buf, indicator })
}

fn size_or(desc: &ParamDescriptor, derived: usize) -> ULen {
    if desc.size > 0 {
        desc.size as ULen
    } else {
        derived as ULen
    }
}

/// Keep driver-reported textual types; anything else binds text as wide
/// varchar.
fn textual_sql_type(reported: SqlDataType) -> SqlDataType {
    match reported.0 {
        1 | 12 | -1 | -8 | -9 | -10 => reported,
        _ => SqlDataType(-9), // WVARCHAR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_shape_mapping() {
        assert_eq!(cell_shape(SqlDataType(4)), CellShape::Int);
        assert_eq!(cell_shape(SqlDataType(5)), CellShape::Int);
        assert_eq!(cell_shape(SqlDataType(-5)), CellShape::BigInt);
        assert_eq!(cell_shape(SqlDataType(3)), CellShape::Double);
        assert_eq!(cell_shape(SqlDataType(8)), CellShape::Double);
        assert_eq!(cell_shape(SqlDataType(91)), CellShape::Date);
        assert_eq!(cell_shape(SqlDataType(92)), CellShape::Time);
        assert_eq!(cell_shape(SqlDataType(93)), CellShape::Timestamp);
        assert_eq!(cell_shape(SqlDataType(-4)), CellShape::Binary);
        assert_eq!(cell_shape(SqlDataType(12)), CellShape::Text);
        assert_eq!(cell_shape(SqlDataType(0)), CellShape::Text);
    }

    #[test]
    fn test_materialize_respects_time_flags() {
        let ts = Value::Timestamp(SqlTimestamp::new(2024, 1, 2, 3, 4, 5, 0));
        assert_eq!(materialize(ts.clone(), true, false), ts);
        assert_eq!(
            materialize(ts.clone(), false, false),
            Value::Text("2024-01-02 03:04:05".to_string())
        );
        assert_eq!(
            materialize(ts, false, true),
            Value::Text("2024-01-02 03:04:05Z".to_string())
        );
        // non-temporal values pass through untouched
        assert_eq!(materialize(Value::Int(1), false, true), Value::Int(1));
    }

    #[test]
    fn test_textual_sql_type_passthrough_and_default() {
        assert_eq!(textual_sql_type(SqlDataType(1)).0, 1);
        assert_eq!(textual_sql_type(SqlDataType(-10)).0, -10);
        assert_eq!(textual_sql_type(SqlDataType(4)).0, -9);
    }

    #[test]
    fn test_param_descriptor_fallback_is_permissive_text() {
        let d = ParamDescriptor::fallback();
        assert_eq!(d.sql_type.0, 12);
        assert_eq!(d.io, ParamIo::Input);
        assert!(d.output_size > 0);
    }

    #[test]
    fn test_hash_keys_dedup_and_case() {
        let col = |name: &str| ColumnDescriptor {
            name: name.to_string(),
            sql_type: SqlDataType(12),
            size: 0,
            decimal_digits: 0,
            nullable: None,
        };
        let cols = vec![col("id"), col("name"), col("id")];
        assert_eq!(hash_keys_for(&cols, false), vec!["id", "name", "id#1"]);
        assert_eq!(hash_keys_for(&cols, true), vec!["ID", "NAME", "ID#1"]);
    }

    #[test]
    fn test_param_io_mapping() {
        assert_eq!(ParamIo::Input.as_sys(), ParamType::Input);
        assert_eq!(ParamIo::Output.as_sys(), ParamType::Output);
        assert_eq!(ParamIo::InputOutput.as_sys(), ParamType::InputOutput);
    }
}
