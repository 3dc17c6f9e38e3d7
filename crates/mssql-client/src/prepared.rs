//! Statements prepared server-side with `sp_prepare`.
//!
//! A handle is only valid on the session that created it. Resetting the
//! connection releases every handle on the server, so handles carry the
//! session they belong to and are refused once it is gone.

use std::sync::atomic::{AtomicU64, Ordering};

use mssql_types::SqlValue;

use crate::response::{OutputParameter, ResponseHandler};

static SESSIONS: AtomicU64 = AtomicU64::new(1);

/// A fresh session identity, distinct across all clients of the process.
pub(crate) fn next_session() -> u64 {
    SESSIONS.fetch_add(1, Ordering::Relaxed)
}

/// A statement prepared by [`Client::prepare`](crate::Client::prepare).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedHandle {
    pub(crate) handle: i32,
    pub(crate) session: u64,
    pub(crate) sql: String,
    pub(crate) names: Vec<String>,
}

impl PreparedHandle {
    /// Server-side statement handle.
    #[must_use]
    pub fn handle(&self) -> i32 {
        self.handle
    }

    /// Statement text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter names in declaration order.
    #[must_use]
    pub fn param_names(&self) -> &[String] {
        &self.names
    }
}

/// Keeps the handle `sp_prepare` returns through its output parameter.
#[derive(Debug, Default)]
pub(crate) struct HandleCapture {
    pub(crate) handle: Option<i32>,
}

impl ResponseHandler for HandleCapture {
    fn on_return_value(&mut self, param: OutputParameter) {
        if let SqlValue::Int(handle) = param.value {
            self.handle.get_or_insert(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_unique() {
        let a = next_session();
        let b = next_session();
        assert_ne!(a, b);
    }

    #[test]
    fn capture_keeps_the_first_int() {
        let mut capture = HandleCapture::default();
        capture.on_return_value(OutputParameter {
            ordinal: 0,
            name: String::new(),
            value: SqlValue::Null,
        });
        assert_eq!(capture.handle, None);
        for value in [7, 9] {
            capture.on_return_value(OutputParameter {
                ordinal: 0,
                name: String::new(),
                value: SqlValue::Int(value),
            });
        }
        assert_eq!(capture.handle, Some(7));
    }
}
