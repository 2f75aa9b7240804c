//! Module entry logic shared by every addon.
//!
//! # Responsibility
//! - Collect registration callbacks that populate `exports`.
//! - Run them once per environment when the loader initialises the module.
//!
//! # Invariants
//! - Callbacks run in registration order; the first failure stops the rest.
//! - No error or panic escapes `initialize`; failures become a pending JS
//!   exception and the original exports handle is still returned.
//!
//! # See also
//! - `addonkit_ffi::addon_module!` for the exported C symbols.

use crate::config::AddonConfig;
use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::host::{Host, RawValue};
use crate::logging::{panic_message, sanitize_message, MAX_PANIC_PAYLOAD_CHARS};
use crate::types::NodeVersion;
use crate::value::{JsObject, TypedValue};
use log::{error, info, warn};
use once_cell::sync::Lazy;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Node-API version addons built with this crate target.
pub const TARGET_NAPI_VERSION: i32 = 8;

type RegisterFn = Arc<dyn for<'a> Fn(&Env<'a>, &JsObject<'a>) -> AddonResult<()> + Send + Sync>;

static GLOBAL_REGISTRY: Lazy<ModuleRegistry> = Lazy::new(ModuleRegistry::new);

/// Per-environment metadata recorded at initialisation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleInstance {
    pub id: Uuid,
    pub napi_version: u32,
    pub node_version: Option<NodeVersion>,
}

/// Ordered list of callbacks that fill in `exports`.
#[derive(Default)]
pub struct ModuleRegistry {
    callbacks: Mutex<Vec<RegisterFn>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, callback: F)
    where
        F: for<'a> Fn(&Env<'a>, &JsObject<'a>) -> AddonResult<()> + Send + Sync + 'static,
    {
        self.lock().push(Arc::new(callback));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RegisterFn>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry logic behind `initializeModule`; always returns `exports`.
    pub fn initialize(&self, host: &dyn Host, exports: RawValue) -> RawValue {
        apply_config();
        let env = Env::new(host);
        let instance = match record_instance(&env) {
            Ok(instance) => instance,
            Err(err) => {
                error!("event=module_init module=module status=error stage=instance error={err}");
                env.throw_addon_error(&err);
                return exports;
            }
        };

        // Snapshot so callbacks may register further callbacks.
        let callbacks: Vec<RegisterFn> = self.lock().clone();
        let target = JsObject::from_value_unchecked(env.value(exports));
        for (index, callback) in callbacks.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(&env, &target)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(
                        "event=panic_recovered module=module status=error callback={} payload={}",
                        index,
                        sanitize_message(&message, MAX_PANIC_PAYLOAD_CHARS)
                    );
                    AddonError::Panic(message)
                }
            };
            error!(
                "event=module_init module=module status=error callback={} skipped={} error={}",
                index,
                callbacks.len() - index - 1,
                failure
            );
            env.throw_addon_error(&failure);
            return exports;
        }

        info!(
            "event=module_init module=module status=ok callbacks={} instance={} napi_version={}",
            callbacks.len(),
            instance.id,
            instance.napi_version
        );
        exports
    }
}

/// Adds `callback` to the process-wide registry.
pub fn register<F>(callback: F)
where
    F: for<'a> Fn(&Env<'a>, &JsObject<'a>) -> AddonResult<()> + Send + Sync + 'static,
{
    GLOBAL_REGISTRY.register(callback);
}

/// Initialises the module from the process-wide registry.
pub fn initialize_module(host: &dyn Host, exports: RawValue) -> RawValue {
    GLOBAL_REGISTRY.initialize(host, exports)
}

pub fn global_registry() -> &'static ModuleRegistry {
    &GLOBAL_REGISTRY
}

fn apply_config() {
    match AddonConfig::from_env() {
        Ok(config) => {
            if let Err(err) = config.apply_logging() {
                warn!("event=logging_init module=module status=error error={err}");
            }
        }
        Err(err) => warn!("event=config_load module=module status=error error={err}"),
    }
}

fn record_instance(env: &Env<'_>) -> AddonResult<ModuleInstance> {
    let instance = ModuleInstance {
        id: Uuid::new_v4(),
        napi_version: env.napi_version()?,
        node_version: env.node_version().ok(),
    };
    env.set_module_instance(instance.clone())?;
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::ModuleRegistry;
    use crate::env::Env;
    use crate::host::{Host, MemoryHost};
    use crate::value::JsString;

    #[test]
    fn empty_registry_returns_exports_untouched() {
        let host = MemoryHost::new();
        let exports = host.create_object().expect("exports");
        let registry = ModuleRegistry::new();
        assert!(registry.is_empty());

        let returned = registry.initialize(&host, exports);
        assert_eq!(returned, exports);
        let env = Env::new(&host);
        assert!(env.value(exports).cast::<crate::value::JsObject>().keys().expect("keys").is_empty());
        assert!(!host.is_exception_pending().expect("pending"));
    }

    #[test]
    fn records_module_instance() {
        let host = MemoryHost::new();
        let exports = host.create_object().expect("exports");
        let registry = ModuleRegistry::new();
        registry.register(|env, exports| exports.set("name", JsString::new(*env, "demo")?));
        registry.initialize(&host, exports);

        let env = Env::new(&host);
        let instance = env
            .module_instance()
            .expect("slot")
            .expect("instance recorded");
        assert_eq!(instance.napi_version, 9);
        assert_eq!(
            instance.node_version.as_ref().map(|version| version.major),
            Some(20)
        );
    }
}
