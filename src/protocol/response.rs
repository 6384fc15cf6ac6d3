//! Uniform response type for every protocol-client operation
//!
//! Failures are values, never errors thrown across the handler boundary:
//! callers branch on `status` alone and read `err_msg` only for reporting.

use serde_json::Value;

/// Remote status code signalling that the session identifiers are no longer
/// valid and a re-login is required.
pub const SESSION_EXPIRED_CODE: i64 = 111;

/// Result of one remote call: status 0 is success, anything else failure.
#[derive(Debug, Clone)]
pub struct ProtocolResponse {
    pub status: i32,
    pub data: Value,
    pub err_msg: String,
}

impl ProtocolResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: 0,
            data,
            err_msg: String::new(),
        }
    }

    pub fn error(err_msg: impl Into<String>) -> Self {
        Self {
            status: -1,
            data: Value::Null,
            err_msg: err_msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}
