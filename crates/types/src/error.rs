//! Structured service errors.
//!
//! A `ServiceError` is the unit a node reports on failure and the unit a
//! gateway renders to its clients. The provisioner forwards node errors
//! verbatim and only mints its own for not-found, timeout and internal
//! failures.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// An error code: numeric code, HTTP-like status and a message template.
///
/// `%s` placeholders in the template are filled in order by
/// [`ServiceError::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    pub code: u32,
    pub http_status: u16,
    pub template: &'static str,
}

impl ErrorCode {
    pub const SERVICE_UNAVAILABLE: Self = Self::new(30100, 503, "Service unavailable");
    pub const NOT_FOUND: Self = Self::new(30300, 404, "%s not found");
    pub const BAD_MESSAGE: Self = Self::new(30400, 400, "Bad serialized data object: %s");
    pub const INTERNAL_ERROR: Self = Self::new(30500, 500, "Internal Error");
    pub const NODE_TIMEOUT: Self = Self::new(30600, 500, "Node operation timed out");

    pub const fn new(code: u32, http_status: u16, template: &'static str) -> Self {
        Self {
            code,
            http_status,
            template,
        }
    }
}

/// Error structure carried by failed replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub struct ServiceError {
    pub code: u32,
    pub status: u16,
    pub description: String,
}

impl ServiceError {
    /// Build an error from a code, substituting `args` into the template.
    pub fn new(code: ErrorCode, args: &[&str]) -> Self {
        let mut description = String::with_capacity(code.template.len());
        let mut args = args.iter();
        let mut rest = code.template;
        while let Some(pos) = rest.find("%s") {
            description.push_str(&rest[..pos]);
            description.push_str(args.next().copied().unwrap_or(""));
            rest = &rest[pos + 2..];
        }
        description.push_str(rest);

        Self {
            code: code.code,
            status: code.http_status,
            description,
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorCode::NOT_FOUND, &[what])
    }

    pub fn internal() -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, &[])
    }

    pub fn timeout() -> Self {
        Self::new(ErrorCode::NODE_TIMEOUT, &[])
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.code
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error Code: {}, Error Message: {}", self.code, self.description)
    }
}
