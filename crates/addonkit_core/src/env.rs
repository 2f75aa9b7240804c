//! Environment handle passed to every native callback.
//!
//! # Responsibility
//! - Bind value wrappers to the host they were created on.
//! - Translate host statuses into `AddonError`, surfacing pending JS
//!   exceptions as `AddonError::Exception`.
//! - Own the per-environment instance slot (module metadata plus one
//!   user-defined value).
//!
//! # Invariants
//! - `Env` is `Copy` and never outlives the host borrow `'h`.
//! - A pending exception is taken at most once by `check`.

use crate::error::{AddonError, AddonResult};
use crate::host::{Host, HostResult, RawValue};
use crate::module::ModuleInstance;
use crate::status::{ExtendedErrorInfo, Status, StatusError};
use crate::types::NodeVersion;
use crate::value::{JsBoolean, JsObject, JsValue, TypedValue};
use log::error;
use std::any::Any;
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

#[derive(Clone, Copy)]
pub struct Env<'h> {
    host: &'h dyn Host,
}

#[derive(Default)]
struct InstanceSlot {
    module: RefCell<Option<Rc<ModuleInstance>>>,
    user: RefCell<Option<Rc<dyn Any>>>,
}

impl Debug for Env<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env").finish_non_exhaustive()
    }
}

impl<'h> Env<'h> {
    pub fn new(host: &'h dyn Host) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &'h dyn Host {
        self.host
    }

    pub(crate) fn value(&self, raw: RawValue) -> JsValue<'h> {
        JsValue::new(*self, raw)
    }

    /// Maps a host result into the library error model.
    pub(crate) fn check<T>(&self, result: HostResult<T>) -> AddonResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(Status::PendingException) => Err(self.exception_error()),
            Err(status) => {
                let message = self
                    .host
                    .get_last_error_info()
                    .ok()
                    .filter(|info| info.status == status)
                    .and_then(|info| info.message);
                Err(AddonError::Status(StatusError { status, message }))
            }
        }
    }

    pub fn global(&self) -> AddonResult<JsObject<'h>> {
        let raw = self.check(self.host.get_global())?;
        Ok(JsObject::from_value_unchecked(self.value(raw)))
    }

    pub fn undefined(&self) -> AddonResult<JsValue<'h>> {
        let raw = self.check(self.host.get_undefined())?;
        Ok(self.value(raw))
    }

    pub fn null(&self) -> AddonResult<JsValue<'h>> {
        let raw = self.check(self.host.get_null())?;
        Ok(self.value(raw))
    }

    pub fn boolean(&self, value: bool) -> AddonResult<JsBoolean<'h>> {
        JsBoolean::new(*self, value)
    }

    /// Highest Node-API version the running host supports.
    pub fn napi_version(&self) -> AddonResult<u32> {
        self.check(self.host.get_version())
    }

    pub fn node_version(&self) -> AddonResult<NodeVersion> {
        self.check(self.host.get_node_version())
    }

    pub fn strict_equals(
        &self,
        lhs: impl Into<JsValue<'h>>,
        rhs: impl Into<JsValue<'h>>,
    ) -> AddonResult<bool> {
        self.check(
            self.host
                .strict_equals(lhs.into().raw(), rhs.into().raw()),
        )
    }

    pub fn last_error_info(&self) -> AddonResult<ExtendedErrorInfo> {
        self.check(self.host.get_last_error_info())
    }

    pub fn throw_value(&self, value: impl Into<JsValue<'h>>) -> AddonResult<()> {
        self.check(self.host.throw(value.into().raw()))
    }

    /// Throws `Error(message)`; an empty `code` throws without a code.
    pub fn throw_error(&self, code: &str, message: &str) -> AddonResult<()> {
        self.check(self.host.throw_error(non_empty(code), message))
    }

    pub fn throw_type_error(&self, code: &str, message: &str) -> AddonResult<()> {
        self.check(self.host.throw_type_error(non_empty(code), message))
    }

    pub fn throw_range_error(&self, code: &str, message: &str) -> AddonResult<()> {
        self.check(self.host.throw_range_error(non_empty(code), message))
    }

    pub fn is_exception_pending(&self) -> AddonResult<bool> {
        self.check(self.host.is_exception_pending())
    }

    /// Clears and returns the pending exception, if any.
    pub fn take_exception(&self) -> AddonResult<Option<JsValue<'h>>> {
        let pending = self
            .host
            .is_exception_pending()
            .map_err(AddonError::from)?;
        if !pending {
            return Ok(None);
        }
        let raw = self
            .host
            .get_and_clear_last_exception()
            .map_err(AddonError::from)?;
        Ok(Some(self.value(raw)))
    }

    pub(crate) fn exception_error(&self) -> AddonError {
        match self.take_exception() {
            Ok(Some(exception)) => AddonError::Exception(describe_exception(self.host, exception.raw())),
            Ok(None) => AddonError::from(Status::PendingException),
            Err(err) => err,
        }
    }

    /// Throws `err` as a JS `Error` unless an exception is already pending.
    pub(crate) fn throw_addon_error(&self, err: &AddonError) {
        if matches!(self.host.is_exception_pending(), Ok(true)) {
            return;
        }
        if let Err(status) = self.host.throw_error(None, &err.to_string()) {
            error!("event=throw_failed module=env status=error napi_status={status} error={err}");
        }
    }

    /// Opens a handle scope around `f` and always closes it.
    pub fn with_handle_scope<R>(
        &self,
        f: impl FnOnce(Env<'h>) -> AddonResult<R>,
    ) -> AddonResult<R> {
        let scope = self.check(self.host.open_handle_scope())?;
        let result = f(*self);
        let closed = self.check(self.host.close_handle_scope(scope));
        let value = result?;
        closed?;
        Ok(value)
    }

    fn instance_slot(&self) -> AddonResult<Rc<InstanceSlot>> {
        if let Some(existing) = self.check(self.host.get_instance_data())? {
            return existing.downcast::<InstanceSlot>().map_err(|_| {
                AddonError::invalid_arg("instance data was set outside this library")
            });
        }
        let slot = Rc::new(InstanceSlot::default());
        self.check(self.host.set_instance_data(slot.clone()))?;
        Ok(slot)
    }

    /// Stores one value per environment, replacing the previous one.
    pub fn set_instance_data<T: 'static>(&self, data: T) -> AddonResult<()> {
        let slot = self.instance_slot()?;
        slot.user.replace(Some(Rc::new(data)));
        Ok(())
    }

    /// Returns the stored value when it has type `T`.
    pub fn instance_data<T: 'static>(&self) -> AddonResult<Option<Rc<T>>> {
        let slot = self.instance_slot()?;
        let stored = slot.user.borrow().clone();
        match stored {
            Some(data) => data
                .downcast::<T>()
                .map(Some)
                .map_err(|_| AddonError::invalid_arg("instance data has a different type")),
            None => Ok(None),
        }
    }

    pub(crate) fn set_module_instance(&self, instance: ModuleInstance) -> AddonResult<()> {
        let slot = self.instance_slot()?;
        slot.module.replace(Some(Rc::new(instance)));
        Ok(())
    }

    /// Metadata recorded when the module was initialised on this environment.
    pub fn module_instance(&self) -> AddonResult<Option<Rc<ModuleInstance>>> {
        let slot = self.instance_slot()?;
        let instance = slot.module.borrow().clone();
        Ok(instance)
    }
}

fn non_empty(code: &str) -> Option<&str> {
    (!code.is_empty()).then_some(code)
}

fn describe_exception(host: &dyn Host, exception: RawValue) -> String {
    if matches!(host.is_error(exception), Ok(true)) {
        let message = host
            .get_named_property(exception, "message")
            .and_then(|message| host.get_value_string_utf8(message));
        if let Ok(message) = message {
            return message;
        }
    }
    host.coerce_to_string(exception)
        .and_then(|text| host.get_value_string_utf8(text))
        .unwrap_or_else(|_| "unknown JavaScript exception".to_string())
}

#[cfg(test)]
mod tests {
    use super::Env;
    use crate::error::AddonError;
    use crate::host::{Host, MemoryHost};
    use crate::status::Status;

    #[test]
    fn status_errors_carry_engine_message() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let number = host.create_int32(1).expect("number");
        let err = env
            .check(host.get_value_string_utf8(number))
            .expect_err("not a string");
        assert_eq!(err.status(), Some(Status::StringExpected));
        assert_eq!(
            err.to_string(),
            "napi_status error: napi_string_expected (A string was expected)"
        );
    }

    #[test]
    fn pending_exception_becomes_exception_error() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        env.throw_error("E_CODE", "went wrong").expect("throw");
        let err = env.check::<()>(Err(Status::PendingException)).expect_err("pending");
        assert_eq!(err, AddonError::Exception("went wrong".to_string()));
        assert!(!env.is_exception_pending().expect("pending flag"));
    }

    #[test]
    fn instance_data_is_type_checked() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        assert!(env.instance_data::<u32>().expect("empty").is_none());
        env.set_instance_data(41_u32).expect("set");
        assert_eq!(*env.instance_data::<u32>().expect("get").expect("some"), 41);
        assert!(env.instance_data::<String>().is_err());
    }

    #[test]
    fn handle_scope_closes_after_error() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let result: Result<(), _> =
            env.with_handle_scope(|_| Err(AddonError::invalid_arg("inside scope")));
        assert!(result.is_err());
        env.with_handle_scope(|_| Ok(())).expect("balanced scopes");
    }
}
