//! Node-API status codes.
//!
//! # Responsibility
//! - Mirror every `napi_status` value with its canonical `napi_*` name.
//! - Convert raw integer statuses coming over the C ABI.
//!
//! # Invariants
//! - `Status::from_raw(s.as_raw()) == s` for every known status.
//! - Unknown codes are preserved, never folded into `GenericFailure`.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Integral status code returned by every Node-API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    InvalidArg,
    ObjectExpected,
    StringExpected,
    NameExpected,
    FunctionExpected,
    NumberExpected,
    BooleanExpected,
    ArrayExpected,
    GenericFailure,
    PendingException,
    Cancelled,
    EscapeCalledTwice,
    HandleScopeMismatch,
    CallbackScopeMismatch,
    QueueFull,
    Closing,
    BigintExpected,
    DateExpected,
    ArraybufferExpected,
    DetachableArraybufferExpected,
    WouldDeadlock,
    NoExternalBuffersAllowed,
    CannotRunJs,
    /// Code outside the table known to this crate.
    Unknown(i32),
}

impl Status {
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::InvalidArg,
            2 => Self::ObjectExpected,
            3 => Self::StringExpected,
            4 => Self::NameExpected,
            5 => Self::FunctionExpected,
            6 => Self::NumberExpected,
            7 => Self::BooleanExpected,
            8 => Self::ArrayExpected,
            9 => Self::GenericFailure,
            10 => Self::PendingException,
            11 => Self::Cancelled,
            12 => Self::EscapeCalledTwice,
            13 => Self::HandleScopeMismatch,
            14 => Self::CallbackScopeMismatch,
            15 => Self::QueueFull,
            16 => Self::Closing,
            17 => Self::BigintExpected,
            18 => Self::DateExpected,
            19 => Self::ArraybufferExpected,
            20 => Self::DetachableArraybufferExpected,
            21 => Self::WouldDeadlock,
            22 => Self::NoExternalBuffersAllowed,
            23 => Self::CannotRunJs,
            other => Self::Unknown(other),
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::InvalidArg => 1,
            Self::ObjectExpected => 2,
            Self::StringExpected => 3,
            Self::NameExpected => 4,
            Self::FunctionExpected => 5,
            Self::NumberExpected => 6,
            Self::BooleanExpected => 7,
            Self::ArrayExpected => 8,
            Self::GenericFailure => 9,
            Self::PendingException => 10,
            Self::Cancelled => 11,
            Self::EscapeCalledTwice => 12,
            Self::HandleScopeMismatch => 13,
            Self::CallbackScopeMismatch => 14,
            Self::QueueFull => 15,
            Self::Closing => 16,
            Self::BigintExpected => 17,
            Self::DateExpected => 18,
            Self::ArraybufferExpected => 19,
            Self::DetachableArraybufferExpected => 20,
            Self::WouldDeadlock => 21,
            Self::NoExternalBuffersAllowed => 22,
            Self::CannotRunJs => 23,
            Self::Unknown(code) => code,
        }
    }

    /// Canonical C identifier of this status.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "napi_ok",
            Self::InvalidArg => "napi_invalid_arg",
            Self::ObjectExpected => "napi_object_expected",
            Self::StringExpected => "napi_string_expected",
            Self::NameExpected => "napi_name_expected",
            Self::FunctionExpected => "napi_function_expected",
            Self::NumberExpected => "napi_number_expected",
            Self::BooleanExpected => "napi_boolean_expected",
            Self::ArrayExpected => "napi_array_expected",
            Self::GenericFailure => "napi_generic_failure",
            Self::PendingException => "napi_pending_exception",
            Self::Cancelled => "napi_cancelled",
            Self::EscapeCalledTwice => "napi_escape_called_twice",
            Self::HandleScopeMismatch => "napi_handle_scope_mismatch",
            Self::CallbackScopeMismatch => "napi_callback_scope_mismatch",
            Self::QueueFull => "napi_queue_full",
            Self::Closing => "napi_closing",
            Self::BigintExpected => "napi_bigint_expected",
            Self::DateExpected => "napi_date_expected",
            Self::ArraybufferExpected => "napi_arraybuffer_expected",
            Self::DetachableArraybufferExpected => "napi_detachable_arraybuffer_expected",
            Self::WouldDeadlock => "napi_would_deadlock",
            Self::NoExternalBuffersAllowed => "napi_no_external_buffers_allowed",
            Self::CannotRunJs => "napi_cannot_run_js",
            Self::Unknown(_) => "napi_status_unknown",
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Converts a raw status into `Ok(())` or the failing status.
    pub fn check(self) -> Result<(), Status> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "napi_status_unknown({code})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Failed Node-API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusError {
    pub status: Status,
    /// Engine message from `napi_get_last_error_info`, when one was captured.
    pub message: Option<String>,
}

impl StatusError {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            message: None,
        }
    }

    pub fn with_message(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

impl Display for StatusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "napi_status error: {} ({message})", self.status),
            None => write!(f, "napi_status error: {}", self.status),
        }
    }
}

impl Error for StatusError {}

impl From<Status> for StatusError {
    fn from(value: Status) -> Self {
        Self::new(value)
    }
}

/// Extended information about the last failed Node-API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedErrorInfo {
    pub message: Option<String>,
    pub status: Status,
    pub engine_error_code: u32,
}

#[cfg(test)]
mod tests {
    use super::{Status, StatusError};

    #[test]
    fn raw_codes_round_trip() {
        for code in 0..=23 {
            let status = Status::from_raw(code);
            assert!(!matches!(status, Status::Unknown(_)), "code {code}");
            assert_eq!(status.as_raw(), code);
        }
    }

    #[test]
    fn unknown_code_is_preserved() {
        let status = Status::from_raw(99);
        assert_eq!(status, Status::Unknown(99));
        assert_eq!(status.as_raw(), 99);
        assert_eq!(status.to_string(), "napi_status_unknown(99)");
    }

    #[test]
    fn check_maps_ok_to_unit() {
        assert_eq!(Status::Ok.check(), Ok(()));
        assert_eq!(Status::QueueFull.check(), Err(Status::QueueFull));
    }

    #[test]
    fn status_error_uses_canonical_name() {
        let err = StatusError::new(Status::StringExpected);
        assert_eq!(err.to_string(), "napi_status error: napi_string_expected");
        let err = StatusError::with_message(Status::InvalidArg, "Invalid argument");
        assert_eq!(
            err.to_string(),
            "napi_status error: napi_invalid_arg (Invalid argument)"
        );
    }
}
