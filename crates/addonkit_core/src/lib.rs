//! Safe Rust layer for writing Node-API addons.
//! This crate is host-agnostic: every engine call goes through [`host::Host`].

pub mod class;
pub mod config;
pub mod convert;
pub mod env;
pub mod error;
pub mod host;
pub mod logging;
pub mod module;
pub mod runtime;
pub mod status;
pub mod types;
pub mod value;

pub use class::{class_instance, define_class, ClassAccessor, ClassMethod, JsClass, StaticMethod};
pub use config::{AddonConfig, ConfigError};
pub use convert::{from_js, js_to_json, json_to_js, to_js};
pub use env::Env;
pub use error::{AddonError, AddonResult};
pub use host::{Host, HostResult, MemoryHost, RawValue};
pub use logging::{default_log_level, init_logging, logging_status};
pub use module::{initialize_module, register, ModuleInstance, ModuleRegistry, TARGET_NAPI_VERSION};
pub use runtime::{spawn_task, AsyncTask, Task, ThreadsafeFunction};
pub use status::{ExtendedErrorInfo, Status, StatusError};
pub use types::{
    CallMode, JsType, NodeVersion, PropertyAttributes, ReleaseMode, TypedArrayKind, ValueKind,
};
pub use value::{
    callback, CallContext, Callback, IntoJsNumber, JsArray, JsArrayBuffer, JsBigInt, JsBoolean,
    JsBuffer, JsDataView, JsDate, JsDeferred, JsError, JsExternal, JsFunction, JsNumber,
    JsObject, JsPromise, JsReference, JsString, JsSymbol, JsTypedArray, JsValue, Property,
    TypedValue,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
