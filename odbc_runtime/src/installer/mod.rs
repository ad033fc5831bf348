//! ODBC installer (DSN configuration) entry points.
//!
//! The installer library is optional at runtime and never linked: it is
//! resolved with `libloading`, first from the `ODBC_RUNTIME_INST`
//! environment variable, then through the documented SONAME fallback order
//! covering unixODBC and iODBC. Entry points missing from the resolved
//! library surface as [`OdbcError::UnsupportedFeature`], mirroring the
//! weak-symbol behavior of statically-built installations.

use crate::codec;
use crate::diag::{self, DiagRecord};
use crate::error::{OdbcError, Result};
use lazy_static::lazy_static;
use libloading::Library;
use std::ffi::c_void;
use std::sync::Mutex;

const INSTALLER_LIB_ENV: &str = "ODBC_RUNTIME_INST";
const FALLBACK_SONAMES: [&str; 4] = [
    "libodbcinst.so.1",
    "libodbcinst.so",
    "libiodbcinst.so.2",
    "libiodbcinst.so",
];

const ODBC_ADD_DSN: u16 = 1;
const ODBC_CONFIG_DSN: u16 = 2;
const ODBC_REMOVE_DSN: u16 = 3;
const ODBC_ADD_SYS_DSN: u16 = 4;
const ODBC_CONFIG_SYS_DSN: u16 = 5;
const ODBC_REMOVE_SYS_DSN: u16 = 6;

const RET_SUCCESS: i16 = 0;
const RET_SUCCESS_WITH_INFO: i16 = 1;
const RET_NO_DATA: i16 = 100;
const MAX_INSTALLER_ERRORS: u16 = 8;

type ConfigDataSourceW =
    unsafe extern "system" fn(*mut c_void, u16, *const u16, *const u16) -> i32;
type InstallerErrorW = unsafe extern "system" fn(u16, *mut u32, *mut u16, u16, *mut u16) -> i16;
type WriteFileDsnW =
    unsafe extern "system" fn(*const u16, *const u16, *const u16, *const u16) -> i32;
type ReadFileDsnW =
    unsafe extern "system" fn(*const u16, *const u16, *const u16, *mut u16, u16, *mut u16) -> i32;

struct InstallerLib {
    // keeps the shared object mapped for as long as the fn pointers live
    _lib: Library,
    config_data_source: Option<ConfigDataSourceW>,
    installer_error: Option<InstallerErrorW>,
    write_file_dsn: Option<WriteFileDsnW>,
    read_file_dsn: Option<ReadFileDsnW>,
}

impl InstallerLib {
    fn load() -> Result<Self> {
        let lib = open_library()?;
        let config_data_source = symbol::<ConfigDataSourceW>(&lib, b"SQLConfigDataSourceW\0");
        let installer_error = symbol::<InstallerErrorW>(&lib, b"SQLInstallerErrorW\0");
        let write_file_dsn = symbol::<WriteFileDsnW>(&lib, b"SQLWriteFileDSNW\0");
        let read_file_dsn = symbol::<ReadFileDsnW>(&lib, b"SQLReadFileDSNW\0");
        Ok(Self {
            _lib: lib,
            config_data_source,
            installer_error,
            write_file_dsn,
            read_file_dsn,
        })
    }

    /// Drain the installer's own error queue into the diagnostic channel
    /// and build the failure for `function`.
    fn failure(&self, function: &'static str) -> OdbcError {
        let mut records = Vec::new();
        if let Some(error_fn) = self.installer_error {
            let mut message = [0u16; 512];
            for i in 1..=MAX_INSTALLER_ERRORS {
                let mut code: u32 = 0;
                let mut len: u16 = 0;
                let ret = unsafe {
                    error_fn(
                        i,
                        &mut code,
                        message.as_mut_ptr(),
                        message.len() as u16,
                        &mut len,
                    )
                };
                match ret {
                    RET_SUCCESS | RET_SUCCESS_WITH_INFO => {
                        records.push(DiagRecord::installer(
                            code,
                            &codec::string_from_wide_nts(&message),
                        ));
                    }
                    RET_NO_DATA => break,
                    _ => {
                        records
                            .push(DiagRecord::internal("Error reading installer error message"));
                        break;
                    }
                }
            }
        }
        if records.is_empty() {
            records.push(DiagRecord::internal("DSN configuration error"));
        }
        diag::stage_error(records.clone());
        OdbcError::Diagnostics { function, records }
    }
}

fn open_library() -> Result<Library> {
    if let Ok(name) = std::env::var(INSTALLER_LIB_ENV) {
        match unsafe { Library::new(&name) } {
            Ok(lib) => return Ok(lib),
            Err(err) => {
                log::warn!("${INSTALLER_LIB_ENV} ({name}) not loaded: {err}");
            }
        }
    }
    for name in FALLBACK_SONAMES {
        if let Ok(lib) = unsafe { Library::new(name) } {
            log::debug!("loaded ODBC installer library {name}");
            return Ok(lib);
        }
    }
    Err(diag::local_error(OdbcError::UnsupportedFeature(
        "no ODBC installer library found".to_string(),
    )))
}

fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Option<T> {
    unsafe { lib.get::<T>(name).ok().map(|s| *s) }
}

lazy_static! {
    static ref INSTALLER: Mutex<Option<InstallerLib>> = Mutex::new(None);
}

fn with_installer<T>(f: impl FnOnce(&InstallerLib) -> Result<T>) -> Result<T> {
    let mut guard = INSTALLER.lock().expect("installer lock poisoned");
    if guard.is_none() {
        *guard = Some(InstallerLib::load()?);
    }
    f(guard.as_ref().expect("loaded above"))
}

fn missing(entry_point: &str) -> OdbcError {
    diag::local_error(OdbcError::UnsupportedFeature(format!(
        "ODBC installer entry point {entry_point} is not available"
    )))
}

/// `key=value` attribute pairs, NUL-separated and double-NUL terminated as
/// the installer API requires.
fn attribute_units(attributes: &[(&str, &str)]) -> Vec<u16> {
    let mut units = Vec::new();
    for (key, value) in attributes {
        let entry = format!("{key}={value}");
        units.extend_from_slice(&codec::wide_nts(&entry));
    }
    units.push(0);
    units
}

fn config_request(request: u16, driver: &str, attributes: &[(&str, &str)]) -> Result<()> {
    with_installer(|inst| {
        let config = inst
            .config_data_source
            .ok_or_else(|| missing("SQLConfigDataSourceW"))?;
        let wdriver = codec::wide_nts(driver);
        let wattrs = attribute_units(attributes);
        let ok = unsafe {
            config(
                std::ptr::null_mut(),
                request,
                wdriver.as_ptr(),
                wattrs.as_ptr(),
            )
        };
        if ok != 0 {
            Ok(())
        } else {
            Err(inst.failure("SQLConfigDataSourceW"))
        }
    })
}

/// Register a data source for `driver`; `attributes` must include `DSN`.
pub fn add_dsn(driver: &str, attributes: &[(&str, &str)], system: bool) -> Result<()> {
    config_request(
        if system { ODBC_ADD_SYS_DSN } else { ODBC_ADD_DSN },
        driver,
        attributes,
    )
}

/// Reconfigure an existing data source.
pub fn config_dsn(driver: &str, attributes: &[(&str, &str)], system: bool) -> Result<()> {
    config_request(
        if system {
            ODBC_CONFIG_SYS_DSN
        } else {
            ODBC_CONFIG_DSN
        },
        driver,
        attributes,
    )
}

/// Remove a data source.
pub fn remove_dsn(driver: &str, attributes: &[(&str, &str)], system: bool) -> Result<()> {
    config_request(
        if system {
            ODBC_REMOVE_SYS_DSN
        } else {
            ODBC_REMOVE_DSN
        },
        driver,
        attributes,
    )
}

/// Write one key into a file DSN; `value: None` deletes the key.
pub fn write_file_dsn(
    filename: &str,
    application: &str,
    key: &str,
    value: Option<&str>,
) -> Result<()> {
    with_installer(|inst| {
        let write = inst
            .write_file_dsn
            .ok_or_else(|| missing("SQLWriteFileDSNW"))?;
        let wfile = codec::wide_nts(filename);
        let wapp = codec::wide_nts(application);
        let wkey = codec::wide_nts(key);
        let wvalue = value.map(codec::wide_nts);
        let ok = unsafe {
            write(
                wfile.as_ptr(),
                wapp.as_ptr(),
                wkey.as_ptr(),
                wvalue
                    .as_ref()
                    .map(|v| v.as_ptr())
                    .unwrap_or(std::ptr::null()),
            )
        };
        if ok != 0 {
            Ok(())
        } else {
            Err(inst.failure("SQLWriteFileDSNW"))
        }
    })
}

/// Read one key from a file DSN.
pub fn read_file_dsn(filename: &str, application: &str, key: &str) -> Result<String> {
    with_installer(|inst| {
        let read = inst
            .read_file_dsn
            .ok_or_else(|| missing("SQLReadFileDSNW"))?;
        let wfile = codec::wide_nts(filename);
        let wapp = codec::wide_nts(application);
        let wkey = codec::wide_nts(key);
        let mut out = [0u16; 1024];
        let mut len: u16 = 0;
        let ok = unsafe {
            read(
                wfile.as_ptr(),
                wapp.as_ptr(),
                wkey.as_ptr(),
                out.as_mut_ptr(),
                out.len() as u16,
                &mut len,
            )
        };
        if ok != 0 {
            Ok(codec::string_from_wide_nts(&out))
        } else {
            Err(inst.failure("SQLReadFileDSNW"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_codes_match_odbcinst() {
        assert_eq!(ODBC_ADD_DSN, 1);
        assert_eq!(ODBC_CONFIG_DSN, 2);
        assert_eq!(ODBC_REMOVE_DSN, 3);
        assert_eq!(ODBC_ADD_SYS_DSN, 4);
        assert_eq!(ODBC_CONFIG_SYS_DSN, 5);
        assert_eq!(ODBC_REMOVE_SYS_DSN, 6);
    }

    #[test]
    fn test_attribute_units_are_double_nul_terminated() {
        let units = attribute_units(&[("DSN", "test"), ("Database", "db")]);
        let text: Vec<String> = units
            .split(|&u| u == 0)
            .filter(|c| !c.is_empty())
            .map(crate::codec::string_from_wide)
            .collect();
        assert_eq!(text, vec!["DSN=test", "Database=db"]);
        // entry terminators plus the final list terminator
        assert_eq!(units.iter().filter(|&&u| u == 0).count(), 3);
        assert_eq!(units.last(), Some(&0));
    }

    #[test]
    fn test_attribute_units_empty_list() {
        // still a valid (empty) double-NUL terminated list
        assert_eq!(attribute_units(&[]), vec![0]);
    }

    #[test]
    #[ignore] // needs an installer library on the host
    fn test_read_missing_file_dsn_reports_installer_error() {
        let err = read_file_dsn("/nonexistent/path.dsn", "ODBC", "DRIVER").unwrap_err();
        assert!(!err.records().is_empty());
    }
}
