//! Node-API binding layer for addonkit addons.
//!
//! # Responsibility
//! - Declare the Node-API C surface (`sys`) and implement
//!   `addonkit_core::Host` over it (`NodeHost`).
//! - Emit the exported module entry symbols through [`addon_module!`].
//!
//! # Invariants
//! - Exported functions must not panic across the FFI boundary.
//! - The exports handle given by the loader is always the one returned.
//!
//! # See also
//! - `addonkit_core::module` for the host-agnostic entry logic.

pub mod host;
pub mod sys;
mod trampoline;

pub use host::NodeHost;

use addonkit_core::logging::{panic_message, sanitize_message, MAX_PANIC_PAYLOAD_CHARS};
use addonkit_core::{AddonError, Host, RawValue};
use log::error;
use std::panic::{catch_unwind, AssertUnwindSafe};

#[doc(hidden)]
pub mod __private {
    pub use addonkit_core::{initialize_module, ModuleRegistry, TARGET_NAPI_VERSION};
    pub use once_cell::sync::Lazy;
}

/// Shared body of the generated `initializeModule`.
///
/// # FFI contract
/// - Sync call on the JS thread, once per environment.
/// - Never unwinds; a panic becomes a pending JS `Error`.
/// - Returns `exports` unchanged (null inputs are passed straight back).
///
/// # Safety
/// `env` and `exports` must be the handles Node passed to the module
/// registration function.
#[doc(hidden)]
pub unsafe fn run_entry(
    env: sys::napi_env,
    exports: sys::napi_value,
    init: impl FnOnce(&dyn Host, RawValue) -> RawValue,
) -> sys::napi_value {
    if env.is_null() || exports.is_null() {
        error!("event=module_init module=ffi status=error reason=null_handle");
        return exports;
    }
    let host = NodeHost::from_raw(env);
    let outcome = catch_unwind(AssertUnwindSafe(|| init(&host, RawValue::from_ptr(exports))));
    match outcome {
        Ok(returned) => returned.as_ptr(),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                "event=panic_recovered module=ffi status=error site=entry payload={}",
                sanitize_message(&message, MAX_PANIC_PAYLOAD_CHARS)
            );
            trampoline::throw_unless_pending(&host, &AddonError::Panic(message));
            exports
        }
    }
}

/// Emits the module entry symbols of an addon `cdylib`.
///
/// `addon_module!()` initialises from the process-wide registry filled by
/// `addonkit_core::register`. `addon_module!(path::to::register)` runs the
/// named function `fn(&Env<'_>, &JsObject<'_>) -> AddonResult<()>` instead.
///
/// Generated symbols:
/// - `initializeModule(env, exports) -> exports`
/// - `napi_register_module_v1`, the name Node's loader looks up
/// - `node_api_module_get_api_version_v1`, reporting `TARGET_NAPI_VERSION`
#[macro_export]
macro_rules! addon_module {
    (@symbols |$host:ident, $exports:ident| $body:block) => {
        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn initializeModule(
            env: $crate::sys::napi_env,
            exports: $crate::sys::napi_value,
        ) -> $crate::sys::napi_value {
            $crate::run_entry(env, exports, |$host, $exports| $body)
        }

        #[no_mangle]
        pub unsafe extern "C" fn napi_register_module_v1(
            env: $crate::sys::napi_env,
            exports: $crate::sys::napi_value,
        ) -> $crate::sys::napi_value {
            initializeModule(env, exports)
        }

        #[no_mangle]
        pub extern "C" fn node_api_module_get_api_version_v1() -> i32 {
            $crate::__private::TARGET_NAPI_VERSION
        }
    };
    () => {
        $crate::addon_module!(@symbols |host, exports| {
            $crate::__private::initialize_module(host, exports)
        });
    };
    ($register:path) => {
        static ADDONKIT_MODULE_REGISTRY: $crate::__private::Lazy<$crate::__private::ModuleRegistry> =
            $crate::__private::Lazy::new(|| {
                let registry = $crate::__private::ModuleRegistry::new();
                registry.register($register);
                registry
            });

        $crate::addon_module!(@symbols |host, exports| {
            ADDONKIT_MODULE_REGISTRY.initialize(host, exports)
        });
    };
}
