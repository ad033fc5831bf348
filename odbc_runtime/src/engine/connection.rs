use crate::codec;
use crate::diag;
use crate::engine::environment::{alloc_henv, Environment};
use crate::engine::statement::Statement;
use crate::engine::transaction::IsolationLevel;
use crate::error::{OdbcError, Result};
use crate::handles::{
    detach_from_env, finalize_all_stmts, next_handle_id, reap_dbc, reap_env, ChildSet, DbcInner,
    EnvInner, EnvLink,
};
use crate::value::Value;
use odbc_sys::{
    CompletionType, ConnectionAttribute, DriverConnectOption, HDbc, Handle, HandleType, Pointer,
    SQLAllocHandle, SQLDisconnect, SQLDriverConnectW, SQLConnectW, SQLEndTran, SQLFreeHandle,
    SQLGetConnectAttrW, SQLSetConnectAttrW, SqlReturn,
};
use std::cell::RefCell;
use std::ptr::null_mut;
use std::rc::Rc;
use zeroize::Zeroizing;

const SQL_NTS: i16 = -3;

/// Owner of one native ODBC connection handle.
///
/// Construction is cheap and does not touch the driver manager; the native
/// handle exists only between a successful `connect`/`driver_connect` and
/// `disconnect`. A `Connection` built without an explicit [`Environment`]
/// allocates a private one on first connect.
pub struct Connection {
    inner: Rc<RefCell<DbcInner>>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// Unconnected, with no environment yet.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(DbcInner::new())),
        }
    }

    /// Unconnected, linked under `env`.
    pub fn with_environment(env: &Environment) -> Self {
        let conn = Self::new();
        let slot = next_handle_id();
        env.inner().borrow_mut().dbcs.link(slot, ());
        conn.inner.borrow_mut().env = Some(EnvLink {
            env: Rc::clone(env.inner()),
            slot,
        });
        conn
    }

    pub(crate) fn inner(&self) -> &Rc<RefCell<DbcInner>> {
        &self.inner
    }

    pub(crate) fn raw(&self) -> Result<HDbc> {
        self.inner.borrow().require_hdbc()
    }

    /// Environment link, creating a private environment when none was
    /// supplied at construction time.
    fn ensure_env(&self) -> Result<Rc<RefCell<EnvInner>>> {
        if let Some(link) = &self.inner.borrow().env {
            return Ok(Rc::clone(&link.env));
        }
        let henv = alloc_henv()?;
        let env = Rc::new(RefCell::new(EnvInner {
            henv: Some(henv),
            dbcs: ChildSet::default(),
            // private environment: no user wrapper will ever clear this
            live: false,
        }));
        let slot = next_handle_id();
        env.borrow_mut().dbcs.link(slot, ());
        self.inner.borrow_mut().env = Some(EnvLink {
            env: Rc::clone(&env),
            slot,
        });
        Ok(env)
    }

    fn alloc_hdbc(&self) -> Result<HDbc> {
        let env = self.ensure_env()?;
        let henv = env
            .borrow()
            .henv
            .ok_or_else(|| OdbcError::InternalError("environment already released".to_string()))?;
        let mut out: Handle = null_mut();
        let ret = unsafe { SQLAllocHandle(HandleType::Dbc, henv as Handle, &mut out) };
        unsafe { diag::check_success(HandleType::Env, henv as Handle, ret, "SQLAllocHandle") }?;
        Ok(out as HDbc)
    }

    /// Connect by data-source name. Fails with "Already connected" on a
    /// connection that already holds a native handle; a native failure
    /// releases the partially-allocated handle and leaves the wrapper
    /// unconnected.
    pub fn connect(&mut self, dsn: &str, user: Option<&str>, password: Option<&str>) -> Result<()> {
        self.connect_inner(dsn, user, password, None)
    }

    /// Like [`connect`](Self::connect) with a login timeout in seconds.
    pub fn connect_with_timeout(
        &mut self,
        dsn: &str,
        user: Option<&str>,
        password: Option<&str>,
        timeout_secs: u32,
    ) -> Result<()> {
        self.connect_inner(dsn, user, password, Some(timeout_secs))
    }

    fn connect_inner(
        &mut self,
        dsn: &str,
        user: Option<&str>,
        password: Option<&str>,
        login_timeout: Option<u32>,
    ) -> Result<()> {
        if self.is_connected() {
            return Err(diag::local_error(OdbcError::AlreadyConnected));
        }
        let hdbc = self.alloc_hdbc()?;
        if let Some(secs) = login_timeout {
            let ret = unsafe {
                SQLSetConnectAttrW(
                    hdbc,
                    ConnectionAttribute::LoginTimeout,
                    secs as usize as Pointer,
                    0,
                )
            };
            if let Err(err) =
                unsafe { diag::check_success(HandleType::Dbc, hdbc as Handle, ret, "SQLSetConnectAttrW") }
            {
                unsafe { crate::handles::drop_handle(hdbc as Handle, HandleType::Dbc) };
                return Err(err);
            }
        }

        let wdsn = Zeroizing::new(codec::wide_nts(dsn));
        let wuser = user.map(|u| Zeroizing::new(codec::wide_nts(u)));
        let wpass = password.map(|p| Zeroizing::new(codec::wide_nts(p)));
        let (user_ptr, user_len) = match &wuser {
            Some(w) => (w.as_ptr(), SQL_NTS),
            None => (null_mut() as *const u16, 0),
        };
        let (pass_ptr, pass_len) = match &wpass {
            Some(w) => (w.as_ptr(), SQL_NTS),
            None => (null_mut() as *const u16, 0),
        };
        let ret = unsafe {
            SQLConnectW(
                hdbc,
                wdsn.as_ptr(),
                SQL_NTS,
                user_ptr,
                user_len,
                pass_ptr,
                pass_len,
            )
        };
        if let Err(err) =
            unsafe { diag::check_success(HandleType::Dbc, hdbc as Handle, ret, "SQLConnectW") }
        {
            unsafe { crate::handles::drop_handle(hdbc as Handle, HandleType::Dbc) };
            return Err(err);
        }
        self.inner.borrow_mut().hdbc = Some(hdbc);
        log::debug!("connected to DSN {dsn:?}");
        Ok(())
    }

    /// Connect with a full `KEY=value;` connection string, no prompting.
    /// Returns the completed connection string reported by the driver.
    pub fn driver_connect(&mut self, connection_string: &str) -> Result<String> {
        if connection_string.is_empty() {
            return Err(diag::local_error(OdbcError::ValidationError(
                "Connection string is empty".to_string(),
            )));
        }
        if self.is_connected() {
            return Err(diag::local_error(OdbcError::AlreadyConnected));
        }
        let hdbc = self.alloc_hdbc()?;
        let wstr = Zeroizing::new(codec::wide_nts(connection_string));
        let mut completed = [0u16; 1024];
        let mut completed_len: i16 = 0;
        let ret = unsafe {
            SQLDriverConnectW(
                hdbc,
                null_mut(),
                wstr.as_ptr(),
                SQL_NTS,
                completed.as_mut_ptr(),
                completed.len() as i16,
                &mut completed_len,
                DriverConnectOption::NoPrompt,
            )
        };
        if let Err(err) =
            unsafe { diag::check_success(HandleType::Dbc, hdbc as Handle, ret, "SQLDriverConnectW") }
        {
            unsafe { crate::handles::drop_handle(hdbc as Handle, HandleType::Dbc) };
            return Err(err);
        }
        self.inner.borrow_mut().hdbc = Some(hdbc);
        Ok(codec::string_from_wide_nts(&completed))
    }

    pub fn is_connected(&self) -> bool {
        self.inner.borrow().hdbc.is_some()
    }

    /// Number of live statements under this connection.
    pub fn statement_count(&self) -> usize {
        self.inner.borrow().stmts.len()
    }

    /// Force-finalize every statement still open under this connection.
    /// Their wrappers read as stale afterwards.
    pub fn drop_all_statements(&self) {
        finalize_all_stmts(&self.inner);
    }

    /// Disconnect and release the native handle.
    ///
    /// Without `force`, open statements block the disconnect: nothing is
    /// released and `Ok(false)` comes back. With `force`, all statements
    /// are finalized first. Returns `Ok(true)` once the wrapper no longer
    /// holds a native handle (including when it never did).
    pub fn disconnect(&mut self, force: bool) -> Result<bool> {
        if force {
            self.drop_all_statements();
        }
        if !self.is_connected() {
            return Ok(true);
        }
        if !self.inner.borrow().stmts.is_empty() {
            return Ok(false);
        }
        let hdbc = {
            let mut d = self.inner.borrow_mut();
            d.hdbc.take().expect("checked by is_connected")
        };
        unsafe {
            match SQLDisconnect(hdbc) {
                SqlReturn::SUCCESS | SqlReturn::SUCCESS_WITH_INFO => {}
                other => log::warn!("SQLDisconnect returned {}", other.0),
            }
            let ret = SQLFreeHandle(HandleType::Dbc, hdbc as Handle);
            diag::check_success(HandleType::Dbc, hdbc as Handle, ret, "SQLFreeHandle")?;
        }
        let env = detach_from_env(&mut self.inner.borrow_mut());
        if let Some(env) = env {
            reap_env(&env);
        }
        Ok(true)
    }

    // -- materialization toggles -------------------------------------------

    /// When set (the default), date/time columns come back as structured
    /// wrapper values; otherwise they are rendered as ISO-8601 text.
    pub fn set_use_native_time(&self, on: bool) {
        self.inner.borrow_mut().use_native_time = on;
    }

    pub fn use_native_time(&self) -> bool {
        self.inner.borrow().use_native_time
    }

    /// Mark textual timestamp renderings as UTC.
    pub fn set_use_utc_time(&self, on: bool) {
        self.inner.borrow_mut().use_utc_time = on;
    }

    pub fn use_utc_time(&self) -> bool {
        self.inner.borrow().use_utc_time
    }

    /// Upper-case column names in hash-keyed fetches.
    pub fn set_uppercase_identifiers(&self, on: bool) {
        self.inner.borrow_mut().uppercase_identifiers = on;
    }

    pub fn uppercase_identifiers(&self) -> bool {
        self.inner.borrow().uppercase_identifiers
    }

    // -- connection attributes ---------------------------------------------

    fn set_attr_usize(
        &self,
        attr: ConnectionAttribute,
        value: usize,
        function: &'static str,
    ) -> Result<()> {
        let hdbc = self.raw()?;
        let ret = unsafe { SQLSetConnectAttrW(hdbc, attr, value as Pointer, 0) };
        unsafe { diag::check_success(HandleType::Dbc, hdbc as Handle, ret, function) }
    }

    fn get_attr_usize(&self, attr: ConnectionAttribute, function: &'static str) -> Result<usize> {
        let hdbc = self.raw()?;
        let mut value: usize = 0;
        let ret = unsafe {
            SQLGetConnectAttrW(
                hdbc,
                attr,
                &mut value as *mut usize as Pointer,
                0,
                null_mut(),
            )
        };
        unsafe { diag::check_success(HandleType::Dbc, hdbc as Handle, ret, function) }?;
        Ok(value)
    }

    pub fn set_autocommit(&self, on: bool) -> Result<()> {
        self.set_attr_usize(
            ConnectionAttribute::AutoCommit,
            usize::from(on),
            "SQLSetConnectAttrW(AUTOCOMMIT)",
        )
    }

    pub fn autocommit(&self) -> Result<bool> {
        Ok(self.get_attr_usize(
            ConnectionAttribute::AutoCommit,
            "SQLGetConnectAttrW(AUTOCOMMIT)",
        )? != 0)
    }

    pub fn set_connection_timeout(&self, secs: u32) -> Result<()> {
        self.set_attr_usize(
            ConnectionAttribute::ConnectionTimeout,
            secs as usize,
            "SQLSetConnectAttrW(CONNECTION_TIMEOUT)",
        )
    }

    pub fn connection_timeout(&self) -> Result<u32> {
        Ok(self.get_attr_usize(
            ConnectionAttribute::ConnectionTimeout,
            "SQLGetConnectAttrW(CONNECTION_TIMEOUT)",
        )? as u32)
    }

    /// Switch the connection's current catalog (database).
    pub fn set_current_catalog(&self, catalog: &str) -> Result<()> {
        let hdbc = self.raw()?;
        let wide = codec::wide_nts(catalog);
        let byte_len = (codec::wide_len(&wide) * 2) as i32;
        let ret = unsafe {
            SQLSetConnectAttrW(
                hdbc,
                ConnectionAttribute::CurrentCatalog,
                wide.as_ptr() as Pointer,
                byte_len,
            )
        };
        unsafe {
            diag::check_success(
                HandleType::Dbc,
                hdbc as Handle,
                ret,
                "SQLSetConnectAttrW(CURRENT_CATALOG)",
            )
        }
    }

    pub fn current_catalog(&self) -> Result<String> {
        let hdbc = self.raw()?;
        let mut buf = [0u16; 512];
        let ret = unsafe {
            SQLGetConnectAttrW(
                hdbc,
                ConnectionAttribute::CurrentCatalog,
                buf.as_mut_ptr() as Pointer,
                (buf.len() * 2) as i32,
                null_mut(),
            )
        };
        unsafe {
            diag::check_success(
                HandleType::Dbc,
                hdbc as Handle,
                ret,
                "SQLGetConnectAttrW(CURRENT_CATALOG)",
            )
        }?;
        Ok(codec::string_from_wide_nts(&buf))
    }

    pub fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        self.set_attr_usize(
            ConnectionAttribute::TxnIsolation,
            level.mask() as usize,
            "SQLSetConnectAttrW(TXN_ISOLATION)",
        )
    }

    /// Driver's probe for a dead connection; not all drivers support it.
    pub fn is_dead(&self) -> Result<bool> {
        Ok(self.get_attr_usize(
            ConnectionAttribute::ConnectionDead,
            "SQLGetConnectAttrW(CONNECTION_DEAD)",
        )? != 0)
    }

    // -- transactions -------------------------------------------------------

    pub fn commit(&self) -> Result<()> {
        self.end_tran(CompletionType::Commit, "SQLEndTran(COMMIT)")
    }

    pub fn rollback(&self) -> Result<()> {
        self.end_tran(CompletionType::Rollback, "SQLEndTran(ROLLBACK)")
    }

    fn end_tran(&self, completion: CompletionType, function: &'static str) -> Result<()> {
        let hdbc = self.raw()?;
        let ret = unsafe { SQLEndTran(HandleType::Dbc, hdbc as Handle, completion) };
        unsafe { diag::check_success(HandleType::Dbc, hdbc as Handle, ret, function) }
    }

    // -- statements ---------------------------------------------------------

    /// A fresh statement handle under this connection.
    pub fn statement(&self) -> Result<Statement> {
        Statement::alloc(self)
    }

    /// Prepare `sql` for later execution.
    pub fn prepare(&self, sql: &str) -> Result<Statement> {
        let mut stmt = self.statement()?;
        stmt.prepare(sql)?;
        Ok(stmt)
    }

    /// Prepare and execute `sql` with `params` bound positionally.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<Statement> {
        let mut stmt = self.prepare(sql)?;
        stmt.execute(params)?;
        Ok(stmt)
    }

    /// One-shot execution without a prepare round trip.
    pub fn execute_direct(&self, sql: &str) -> Result<Statement> {
        let mut stmt = self.statement()?;
        stmt.execute_direct(sql)?;
        Ok(stmt)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.borrow_mut().live = false;
        reap_dbc(&self.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_connection_is_unconnected() {
        let conn = Connection::new();
        assert!(!conn.is_connected());
        assert_eq!(conn.statement_count(), 0);
    }

    #[test]
    fn test_flag_toggles() {
        let conn = Connection::new();
        assert!(conn.use_native_time());
        conn.set_use_native_time(false);
        assert!(!conn.use_native_time());

        assert!(!conn.use_utc_time());
        conn.set_use_utc_time(true);
        assert!(conn.use_utc_time());

        assert!(!conn.uppercase_identifiers());
        conn.set_uppercase_identifiers(true);
        assert!(conn.uppercase_identifiers());
    }

    #[test]
    fn test_disconnect_when_never_connected() {
        let mut conn = Connection::new();
        assert_eq!(conn.disconnect(false).unwrap(), true);
        assert_eq!(conn.disconnect(true).unwrap(), true);
    }

    #[test]
    fn test_attribute_calls_require_connection() {
        let conn = Connection::new();
        assert!(matches!(conn.autocommit(), Err(OdbcError::NotConnected)));
        assert!(matches!(
            conn.set_autocommit(true),
            Err(OdbcError::NotConnected)
        ));
        assert!(matches!(conn.commit(), Err(OdbcError::NotConnected)));
        assert!(matches!(conn.statement(), Err(OdbcError::NotConnected)));
    }

    #[test]
    fn test_empty_driver_connect_string_is_rejected() {
        let mut conn = Connection::new();
        let result = conn.driver_connect("");
        assert!(matches!(result, Err(OdbcError::ValidationError(_))));
    }

    #[test]
    #[ignore] // needs a driver manager and ODBC_TEST_DSN
    fn test_connect_twice_reports_already_connected() {
        let dsn = std::env::var("ODBC_TEST_DSN").expect("ODBC_TEST_DSN not set");
        let mut conn = Connection::new();
        conn.connect(&dsn, None, None).expect("first connect");
        let err = conn.connect(&dsn, None, None).unwrap_err();
        assert!(matches!(err, OdbcError::AlreadyConnected));
        conn.disconnect(true).expect("disconnect");
    }
}
