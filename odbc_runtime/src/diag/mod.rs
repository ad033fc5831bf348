//! Diagnostic-record retrieval and staging.
//!
//! Every native call goes through [`check`], which drains the ODBC
//! diagnostic chain on anything other than plain success. Failures come
//! back to the caller as [`crate::OdbcError::Diagnostics`]; in addition the
//! most recent chains are staged in module-wide "last error" / "last
//! warning" slots for callers that want to inspect them after the fact.
//!
//! The slots are last-call-wins across every handle in the process. They
//! exist for parity with the historical ODBC calling convention; read them
//! immediately after the call you care about, before touching any other
//! handle.

use crate::codec;
use crate::error::{OdbcError, Result};
use lazy_static::lazy_static;
use odbc_sys::{Handle, HandleType, SQLGetDiagRecW, SqlReturn};
use std::fmt;
use std::sync::Mutex;

const MAX_MESSAGE_LEN: usize = 1024;
const INTERNAL_TAG: &str = "[odbc_runtime]";

/// One (SQLSTATE, native code, message) triple from the driver manager, or
/// an internally generated stand-in.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiagRecord {
    pub sqlstate: String,
    pub native_code: i32,
    pub message: String,
}

impl DiagRecord {
    pub fn driver(sqlstate: &str, native_code: i32, message: &str) -> Self {
        Self {
            sqlstate: sqlstate.to_string(),
            native_code,
            message: message.to_string(),
        }
    }

    /// Record originating in this crate rather than the driver. Tagged so
    /// callers can tell the two apart.
    pub fn internal(message: &str) -> Self {
        Self {
            sqlstate: "INTERN".to_string(),
            native_code: 0,
            message: format!("{INTERNAL_TAG}{message}"),
        }
    }

    /// Record reported by the ODBC installer library.
    pub fn installer(code: u32, message: &str) -> Self {
        Self {
            sqlstate: "INSTALLER".to_string(),
            native_code: code as i32,
            message: message.to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.sqlstate == "INTERN"
    }
}

impl fmt::Display for DiagRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) {}", self.sqlstate, self.native_code, self.message)
    }
}

lazy_static! {
    static ref LAST_ERROR: Mutex<Option<Vec<DiagRecord>>> = Mutex::new(None);
    static ref LAST_WARNING: Mutex<Option<Vec<DiagRecord>>> = Mutex::new(None);
}

/// Chain staged by the most recent failing call, if any.
pub fn last_error() -> Option<Vec<DiagRecord>> {
    LAST_ERROR.lock().expect("diag slot poisoned").clone()
}

/// Chain staged by the most recent success-with-info call, if any.
pub fn last_warning() -> Option<Vec<DiagRecord>> {
    LAST_WARNING.lock().expect("diag slot poisoned").clone()
}

/// Reset both slots.
pub fn clear_diagnostics() {
    *LAST_ERROR.lock().expect("diag slot poisoned") = None;
    *LAST_WARNING.lock().expect("diag slot poisoned") = None;
}

pub(crate) fn stage_error(records: Vec<DiagRecord>) {
    *LAST_ERROR.lock().expect("diag slot poisoned") = Some(records);
}

fn stage_warning(records: Option<Vec<DiagRecord>>) {
    *LAST_WARNING.lock().expect("diag slot poisoned") = records;
}

/// Stage a local (non-native) failure in the error slot and hand the error
/// back, so constructor-level guards behave like native failures.
pub(crate) fn local_error(err: OdbcError) -> OdbcError {
    stage_error(vec![DiagRecord::internal(&err.to_string())]);
    err
}

/// Disposition of a native call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Info,
    NoData,
}

/// Map a native return code to a `Result`, draining and staging the
/// diagnostic chain as required.
///
/// # Safety
///
/// `handle` must be a valid handle of `handle_type` (or a null handle for
/// calls diagnosed on the environment).
pub(crate) unsafe fn check(
    handle_type: HandleType,
    handle: Handle,
    ret: SqlReturn,
    function: &'static str,
) -> Result<Outcome> {
    match ret {
        SqlReturn::SUCCESS => {
            stage_warning(None);
            Ok(Outcome::Success)
        }
        SqlReturn::SUCCESS_WITH_INFO => {
            let records = drain(handle_type, handle);
            for r in &records {
                log::warn!("{function}: {r}");
            }
            stage_warning(if records.is_empty() {
                None
            } else {
                Some(records)
            });
            Ok(Outcome::Info)
        }
        SqlReturn::NO_DATA => Ok(Outcome::NoData),
        SqlReturn::INVALID_HANDLE => {
            let records = vec![DiagRecord::internal("Invalid handle")];
            stage_error(records.clone());
            Err(OdbcError::Diagnostics { function, records })
        }
        SqlReturn::ERROR => {
            let mut records = drain(handle_type, handle);
            if records.is_empty() {
                // the driver had nothing to say; compatibility shim for
                // managers whose diagnostic chain comes up dry
                records.push(DiagRecord::internal("No data found"));
            }
            stage_error(records.clone());
            Err(OdbcError::Diagnostics { function, records })
        }
        other => {
            let records = vec![DiagRecord::internal(&format!(
                "Unknown error {}",
                other.0
            ))];
            stage_error(records.clone());
            Err(OdbcError::Diagnostics { function, records })
        }
    }
}

/// Like [`check`] but treats `NO_DATA` as a failure, for calls where "no
/// data" is not a meaningful answer.
pub(crate) unsafe fn check_success(
    handle_type: HandleType,
    handle: Handle,
    ret: SqlReturn,
    function: &'static str,
) -> Result<()> {
    match check(handle_type, handle, ret, function)? {
        Outcome::Success | Outcome::Info => Ok(()),
        Outcome::NoData => {
            let records = vec![DiagRecord::internal("No data found")];
            stage_error(records.clone());
            Err(OdbcError::Diagnostics { function, records })
        }
    }
}

/// Drain every record the handle currently carries, in order.
pub(crate) unsafe fn drain(handle_type: HandleType, handle: Handle) -> Vec<DiagRecord> {
    let mut records = Vec::new();
    let mut state = [0u16; 6];
    let mut message = [0u16; MAX_MESSAGE_LEN];
    let mut rec_number: i16 = 1;
    loop {
        let mut native_error: i32 = 0;
        let mut text_len: i16 = 0;
        let ret = SQLGetDiagRecW(
            handle_type,
            handle,
            rec_number,
            state.as_mut_ptr(),
            &mut native_error,
            message.as_mut_ptr(),
            MAX_MESSAGE_LEN as i16,
            &mut text_len,
        );
        match ret {
            SqlReturn::SUCCESS | SqlReturn::SUCCESS_WITH_INFO => {
                let sqlstate = codec::string_from_wide_nts(&state);
                let len = (text_len.max(0) as usize).min(MAX_MESSAGE_LEN);
                let msg = codec::string_from_wide(&message[..codec::wide_len(&message[..len])]);
                records.push(DiagRecord {
                    sqlstate,
                    native_code: native_error,
                    message: msg,
                });
                rec_number += 1;
            }
            _ => break,
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_record_display() {
        let r = DiagRecord::driver("42S02", 208, "Invalid object name 'nope'");
        assert_eq!(r.to_string(), "42S02 (208) Invalid object name 'nope'");
    }

    #[test]
    fn test_internal_record_is_tagged() {
        let r = DiagRecord::internal("No data found");
        assert!(r.is_internal());
        assert_eq!(r.to_string(), "INTERN (0) [odbc_runtime]No data found");
    }

    #[test]
    fn test_installer_record_display() {
        let r = DiagRecord::installer(11, "Invalid keyword-value pairs");
        assert_eq!(r.to_string(), "INSTALLER (11) Invalid keyword-value pairs");
        assert!(!r.is_internal());
    }

    #[test]
    #[serial]
    fn test_stage_error_leaves_warning_untouched() {
        clear_diagnostics();
        stage_warning(Some(vec![DiagRecord::driver("01000", 0, "warn")]));
        stage_error(vec![DiagRecord::driver("08S01", -1, "link failure")]);

        let err = last_error().expect("error slot set");
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].sqlstate, "08S01");
        let warn = last_warning().expect("warning slot untouched");
        assert_eq!(warn[0].sqlstate, "01000");
    }

    #[test]
    #[serial]
    fn test_slots_are_last_call_wins() {
        clear_diagnostics();
        stage_error(vec![DiagRecord::driver("08001", 1, "first")]);
        stage_error(vec![DiagRecord::driver("HY000", 2, "second")]);
        let err = last_error().expect("error slot set");
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].message, "second");
    }

    #[test]
    #[serial]
    fn test_clear_diagnostics_resets_both_slots() {
        stage_error(vec![DiagRecord::internal("x")]);
        stage_warning(Some(vec![DiagRecord::internal("y")]));
        clear_diagnostics();
        assert!(last_error().is_none());
        assert!(last_warning().is_none());
    }

    #[test]
    #[serial]
    fn test_local_error_stages_internal_record() {
        clear_diagnostics();
        let err = local_error(OdbcError::AlreadyConnected);
        assert!(matches!(err, OdbcError::AlreadyConnected));
        let staged = last_error().expect("error slot set");
        assert!(staged[0].is_internal());
        assert!(staged[0].message.contains("Already connected"));
    }
}
