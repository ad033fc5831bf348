use crate::codec;
use crate::diag::{self, Outcome};
use crate::engine::connection::Connection;
use crate::error::{OdbcError, Result};
use crate::handles::{reap_env, EnvInner};
use odbc_sys::{
    EnvironmentAttribute, FetchOrientation, HEnv, Handle, HandleType, Pointer, SQLAllocHandle,
    SQLDataSourcesW, SQLDriversW, SQLGetEnvAttr, SQLSetEnvAttr, SqlReturn,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr::null_mut;
use std::rc::Rc;

const ODBC_VERSION_3: isize = 3;

/// One entry from the driver manager's data-source registry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataSource {
    pub name: String,
    pub description: String,
}

/// One installed driver and its attribute list.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriverDescription {
    pub name: String,
    pub attributes: HashMap<String, String>,
}

/// Process-level connection-pooling scheme, configured before any
/// environment is allocated. Pooling itself lives entirely in the driver
/// manager; this is a pass-through attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPooling {
    Off,
    OnePerDriver,
    OnePerEnvironment,
    DriverAware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingMatch {
    Strict,
    Relaxed,
}

/// Owner of one native ODBC environment handle.
///
/// Connections created from it keep the native handle alive; the handle is
/// released when the wrapper is gone and the last connection has unlinked.
pub struct Environment {
    inner: Rc<RefCell<EnvInner>>,
}

/// Allocate a native environment handle and request ODBC 3 behavior.
pub(crate) fn alloc_henv() -> Result<HEnv> {
    let mut out: Handle = null_mut();
    let ret = unsafe { SQLAllocHandle(HandleType::Env, null_mut(), &mut out) };
    if ret != SqlReturn::SUCCESS && ret != SqlReturn::SUCCESS_WITH_INFO {
        // no handle to drain diagnostics from
        return Err(diag::local_error(OdbcError::InternalError(
            "Cannot allocate environment handle".to_string(),
        )));
    }
    let ret = unsafe {
        SQLSetEnvAttr(
            out as HEnv,
            EnvironmentAttribute::OdbcVersion,
            ODBC_VERSION_3 as Pointer,
            0,
        )
    };
    if let Err(err) = unsafe { diag::check_success(HandleType::Env, out, ret, "SQLSetEnvAttr") } {
        unsafe { crate::handles::drop_handle(out, HandleType::Env) };
        return Err(err);
    }
    Ok(out as HEnv)
}

impl Environment {
    /// Allocate an environment handle and request ODBC 3 behavior.
    pub fn new() -> Result<Self> {
        let henv = alloc_henv()?;
        Ok(Self {
            inner: Rc::new(RefCell::new(EnvInner::new(henv))),
        })
    }

    pub(crate) fn inner(&self) -> &Rc<RefCell<EnvInner>> {
        &self.inner
    }

    pub(crate) fn raw(&self) -> Result<HEnv> {
        self.inner
            .borrow()
            .henv
            .ok_or_else(|| OdbcError::InternalError("environment already released".to_string()))
    }

    /// Number of connections currently linked under this environment.
    pub fn connection_count(&self) -> usize {
        self.inner.borrow().dbcs.len()
    }

    /// Convenience: an unconnected [`Connection`] linked under this
    /// environment.
    pub fn connection(&self) -> Connection {
        Connection::with_environment(self)
    }

    /// Connect by data-source name.
    pub fn connect(
        &self,
        dsn: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Connection> {
        let mut conn = self.connection();
        conn.connect(dsn, user, password)?;
        Ok(conn)
    }

    /// Connect with a full `KEY=value;` connection string.
    pub fn driver_connect(&self, connection_string: &str) -> Result<Connection> {
        let mut conn = self.connection();
        conn.driver_connect(connection_string)?;
        Ok(conn)
    }

    /// ODBC version the driver manager settled on.
    pub fn odbc_version(&self) -> Result<u32> {
        let henv = self.raw()?;
        let mut value: u32 = 0;
        let ret = unsafe {
            SQLGetEnvAttr(
                henv,
                EnvironmentAttribute::OdbcVersion,
                &mut value as *mut u32 as Pointer,
                0,
                null_mut(),
            )
        };
        unsafe { diag::check_success(HandleType::Env, henv as Handle, ret, "SQLGetEnvAttr") }?;
        Ok(value)
    }

    /// Configure process-level connection pooling. Must run before the
    /// first environment is allocated to take effect; the driver manager
    /// owns every aspect of the pooling behavior.
    pub fn set_connection_pooling(scheme: ConnectionPooling) -> Result<()> {
        let value = match scheme {
            ConnectionPooling::Off => odbc_sys::AttrConnectionPooling::Off,
            ConnectionPooling::OnePerDriver => odbc_sys::AttrConnectionPooling::OnePerDriver,
            ConnectionPooling::OnePerEnvironment => odbc_sys::AttrConnectionPooling::OnePerHenv,
            ConnectionPooling::DriverAware => odbc_sys::AttrConnectionPooling::DriverAware,
        };
        let ret = unsafe {
            SQLSetEnvAttr(
                null_mut(),
                EnvironmentAttribute::ConnectionPooling,
                value as usize as Pointer,
                0,
            )
        };
        unsafe { diag::check_success(HandleType::Env, null_mut(), ret, "SQLSetEnvAttr") }
    }

    /// Pooling match policy for this environment.
    pub fn set_pooling_match(&self, policy: PoolingMatch) -> Result<()> {
        let henv = self.raw()?;
        let value = match policy {
            PoolingMatch::Strict => odbc_sys::AttrCpMatch::Strict,
            PoolingMatch::Relaxed => odbc_sys::AttrCpMatch::Relaxed,
        };
        let ret = unsafe {
            SQLSetEnvAttr(
                henv,
                EnvironmentAttribute::CpMatch,
                value as usize as Pointer,
                0,
            )
        };
        unsafe { diag::check_success(HandleType::Env, henv as Handle, ret, "SQLSetEnvAttr") }
    }

    /// Enumerate configured data sources.
    pub fn data_sources(&self) -> Result<Vec<DataSource>> {
        let henv = self.raw()?;
        let mut out = Vec::new();
        let mut name = [0u16; 256];
        let mut description = [0u16; 1024];
        let mut direction = FetchOrientation::First;
        loop {
            let mut name_len: i16 = 0;
            let mut desc_len: i16 = 0;
            let ret = unsafe {
                SQLDataSourcesW(
                    henv,
                    direction,
                    name.as_mut_ptr(),
                    name.len() as i16,
                    &mut name_len,
                    description.as_mut_ptr(),
                    description.len() as i16,
                    &mut desc_len,
                )
            };
            match unsafe { diag::check(HandleType::Env, henv as Handle, ret, "SQLDataSourcesW") }? {
                Outcome::NoData => break,
                Outcome::Success | Outcome::Info => {
                    out.push(DataSource {
                        name: codec::string_from_wide_nts(&name),
                        description: codec::string_from_wide_nts(&description),
                    });
                }
            }
            direction = FetchOrientation::Next;
        }
        Ok(out)
    }

    /// Enumerate installed drivers with their attribute lists.
    pub fn drivers(&self) -> Result<Vec<DriverDescription>> {
        let henv = self.raw()?;
        let mut out = Vec::new();
        let mut name = [0u16; 256];
        let mut attrs = [0u16; 2048];
        let mut direction = FetchOrientation::First;
        loop {
            let mut name_len: i16 = 0;
            let mut attrs_len: i16 = 0;
            let ret = unsafe {
                SQLDriversW(
                    henv,
                    direction,
                    name.as_mut_ptr(),
                    name.len() as i16,
                    &mut name_len,
                    attrs.as_mut_ptr(),
                    attrs.len() as i16,
                    &mut attrs_len,
                )
            };
            match unsafe { diag::check(HandleType::Env, henv as Handle, ret, "SQLDriversW") }? {
                Outcome::NoData => break,
                Outcome::Success | Outcome::Info => {
                    let span = (attrs_len.max(0) as usize).min(attrs.len());
                    out.push(DriverDescription {
                        name: codec::string_from_wide_nts(&name),
                        attributes: parse_attribute_list(&attrs[..span]),
                    });
                }
            }
            direction = FetchOrientation::Next;
        }
        Ok(out)
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.inner.borrow_mut().live = false;
        reap_env(&self.inner);
    }
}

/// Split a driver attribute list (`key=value` pairs separated by NUL units,
/// terminated by a double NUL) into a map.
fn parse_attribute_list(units: &[u16]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for chunk in units.split(|&u| u == 0) {
        if chunk.is_empty() {
            continue;
        }
        let entry = codec::string_from_wide(chunk);
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                map.insert(key.to_string(), value.to_string());
            }
            _ => {
                log::debug!("skipping malformed driver attribute entry: {entry:?}");
            }
        }
    }
    map
}
