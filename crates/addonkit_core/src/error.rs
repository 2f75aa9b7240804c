//! Library-level error type.
//!
//! # Responsibility
//! - Collapse host statuses, type mismatches, conversion failures and
//!   surfaced JS exceptions into one `AddonError`.
//!
//! # Invariants
//! - `Display` output is what gets thrown into JavaScript, so it must stay
//!   single-line and free of Rust debug formatting.

use crate::status::{Status, StatusError};
use crate::types::JsType;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type AddonResult<T> = Result<T, AddonError>;

#[derive(Debug, Clone, PartialEq)]
pub enum AddonError {
    /// A Node-API call returned a non-`napi_ok` status.
    Status(StatusError),
    TypeMismatch { expected: JsType, actual: JsType },
    /// serde conversion between Rust and JS values failed.
    Conversion(String),
    InvalidArg(String),
    /// A JS exception surfaced to Rust, carrying its string form.
    Exception(String),
    Panic(String),
}

impl AddonError {
    pub fn invalid_arg(message: impl Into<String>) -> Self {
        Self::InvalidArg(message.into())
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(message.into())
    }

    /// Returns the failing status for status errors.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Status(err) => Some(err.status),
            _ => None,
        }
    }
}

impl Display for AddonError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(err) => write!(f, "{err}"),
            Self::TypeMismatch { expected, actual } => {
                write!(f, "expected {expected} value, got {actual}")
            }
            Self::Conversion(message) => write!(f, "value conversion failed: {message}"),
            Self::InvalidArg(message) => write!(f, "invalid argument: {message}"),
            Self::Exception(message) => write!(f, "{message}"),
            Self::Panic(message) => write!(f, "panic recover: {message}"),
        }
    }
}

impl Error for AddonError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Status(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StatusError> for AddonError {
    fn from(value: StatusError) -> Self {
        Self::Status(value)
    }
}

impl From<Status> for AddonError {
    fn from(value: Status) -> Self {
        Self::Status(StatusError::new(value))
    }
}

impl From<serde_json::Error> for AddonError {
    fn from(value: serde_json::Error) -> Self {
        Self::Conversion(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::AddonError;
    use crate::status::Status;
    use crate::types::JsType;

    #[test]
    fn status_conversion_keeps_code() {
        let err: AddonError = Status::ObjectExpected.into();
        assert_eq!(err.status(), Some(Status::ObjectExpected));
        assert_eq!(err.to_string(), "napi_status error: napi_object_expected");
    }

    #[test]
    fn type_mismatch_names_both_sides() {
        let err = AddonError::TypeMismatch {
            expected: JsType::String,
            actual: JsType::Number,
        };
        assert_eq!(err.to_string(), "expected string value, got number");
        assert_eq!(err.status(), None);
    }

    #[test]
    fn panic_message_uses_recover_prefix() {
        let err = AddonError::Panic("boom".to_string());
        assert_eq!(err.to_string(), "panic recover: boom");
    }
}
