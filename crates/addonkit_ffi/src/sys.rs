//! Raw Node-API surface.
//!
//! # Responsibility
//! - Re-export the `napi-sys` declarations `NodeHost` and the trampolines
//!   call, so the rest of the crate names them through `crate::sys`.
//!
//! # Invariants
//! - Symbols resolve against the Node process at load time; nothing here
//!   links a library of its own.
//! - Only Node-API versions up to `TARGET_NAPI_VERSION` are enabled.

pub use napi_sys::*;
