//! C-ABI entry points that Node calls back into.
//!
//! # Responsibility
//! - Carry boxed Rust closures through the `void* data` slots of Node-API
//!   and rebuild a `NodeHost` around the `napi_env` of each callback.
//! - Free every box from the matching finalizer.
//!
//! # Invariants
//! - No panic unwinds out of an `extern "C"` function; panics become a
//!   pending JS exception or a log line when JS cannot run.
//! - A box handed to Node is reclaimed exactly once: by its finalizer, or by
//!   the caller when the Node-API call that would have owned it failed.

use crate::host::{to_napi, to_raw, NodeHost};
use crate::sys::{self, napi_async_work, napi_callback_info, napi_env, napi_status, napi_value};
use addonkit_core::host::{
    AsyncComplete, AsyncExecute, RawCallFrame, RawCallback, RawTsfnCallJs, RawTsfnFinalize,
    TsfnPayload,
};
use addonkit_core::logging::{panic_message, sanitize_message, MAX_PANIC_PAYLOAD_CHARS};
use addonkit_core::{AddonError, Host, Status};
use log::{error, warn};
use std::any::Any;
use std::os::raw::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

/// Closure set stored behind the `data` pointer of a function or property.
pub(crate) enum CallbackData {
    Method(RawCallback),
    Accessor {
        getter: Option<RawCallback>,
        setter: Option<RawCallback>,
    },
}

impl CallbackData {
    fn method(&self) -> Option<&RawCallback> {
        match self {
            Self::Method(callback) => Some(callback),
            Self::Accessor { .. } => None,
        }
    }

    fn getter(&self) -> Option<&RawCallback> {
        match self {
            Self::Accessor { getter, .. } => getter.as_ref(),
            Self::Method(_) => None,
        }
    }

    fn setter(&self) -> Option<&RawCallback> {
        match self {
            Self::Accessor { setter, .. } => setter.as_ref(),
            Self::Method(_) => None,
        }
    }
}

pub(crate) unsafe extern "C" fn method_trampoline(
    env: napi_env,
    info: napi_callback_info,
) -> napi_value {
    invoke(env, info, CallbackData::method)
}

pub(crate) unsafe extern "C" fn getter_trampoline(
    env: napi_env,
    info: napi_callback_info,
) -> napi_value {
    invoke(env, info, CallbackData::getter)
}

pub(crate) unsafe extern "C" fn setter_trampoline(
    env: napi_env,
    info: napi_callback_info,
) -> napi_value {
    invoke(env, info, CallbackData::setter)
}

unsafe fn invoke(
    env: napi_env,
    info: napi_callback_info,
    select: fn(&CallbackData) -> Option<&RawCallback>,
) -> napi_value {
    let host = NodeHost::from_raw(env);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let (frame, data) = read_frame(env, info)?;
        if data.is_null() {
            return Err(Status::InvalidArg);
        }
        let data = &*(data as *const CallbackData);
        // Cloned so the closure outlives a finalizer triggered re-entrantly.
        let Some(callback) = select(data).cloned() else {
            return Ok(None);
        };
        Ok(callback(&host, &frame))
    }));
    match outcome {
        Ok(Ok(Some(value))) => to_napi(value),
        Ok(Ok(None)) => ptr::null_mut(),
        Ok(Err(status)) => {
            error!("event=callback_frame module=trampoline status=error napi_status={status}");
            throw_unless_pending(&host, &AddonError::Status(status.into()));
            ptr::null_mut()
        }
        Err(payload) => {
            throw_unless_pending(&host, &recovered(payload.as_ref(), "callback"));
            ptr::null_mut()
        }
    }
}

unsafe fn read_frame(
    env: napi_env,
    info: napi_callback_info,
) -> Result<(RawCallFrame, *mut c_void), Status> {
    let mut argc = 0usize;
    check(sys::napi_get_cb_info(
        env,
        info,
        &mut argc,
        ptr::null_mut(),
        ptr::null_mut(),
        ptr::null_mut(),
    ))?;
    let mut argv: Vec<napi_value> = vec![ptr::null_mut(); argc];
    let mut this = ptr::null_mut();
    let mut data = ptr::null_mut();
    check(sys::napi_get_cb_info(
        env,
        info,
        &mut argc,
        argv.as_mut_ptr(),
        &mut this,
        &mut data,
    ))?;
    argv.truncate(argc);
    let mut new_target = ptr::null_mut();
    check(sys::napi_get_new_target(env, info, &mut new_target))?;
    let frame = RawCallFrame {
        this: to_raw(this),
        args: argv.into_iter().map(to_raw).collect(),
        new_target: (!new_target.is_null()).then(|| to_raw(new_target)),
    };
    Ok((frame, data))
}

fn check(status: napi_status) -> Result<(), Status> {
    Status::from_raw(status).check()
}

fn recovered(payload: &(dyn Any + Send), site: &str) -> AddonError {
    let message = panic_message(payload);
    error!(
        "event=panic_recovered module=trampoline status=error site={} payload={}",
        site,
        sanitize_message(&message, MAX_PANIC_PAYLOAD_CHARS)
    );
    AddonError::Panic(message)
}

pub(crate) fn throw_unless_pending(host: &dyn Host, err: &AddonError) {
    if matches!(host.is_exception_pending(), Ok(true)) {
        return;
    }
    if let Err(status) = host.throw_error(None, &err.to_string()) {
        error!("event=throw_failed module=trampoline status=error napi_status={status} error={err}");
    }
}

/// Finalizer dropping a `Box<T>` passed as `data`.
pub(crate) unsafe extern "C" fn finalize_box<T>(
    _env: napi_env,
    data: *mut c_void,
    _hint: *mut c_void,
) {
    if data.is_null() {
        return;
    }
    let boxed = Box::from_raw(data as *mut T);
    if let Err(payload) = catch_unwind(AssertUnwindSafe(move || drop(boxed))) {
        recovered(payload.as_ref(), "finalize");
    }
}

/// Finalizer for external array buffers; `hint` carries the byte length.
pub(crate) unsafe extern "C" fn finalize_bytes(
    _env: napi_env,
    data: *mut c_void,
    hint: *mut c_void,
) {
    if data.is_null() {
        return;
    }
    let length = hint as usize;
    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
        data as *mut u8,
        length,
    )));
}

/// State of one async work item, shared by both of its callbacks.
pub(crate) struct AsyncWorkData {
    pub(crate) execute: Option<AsyncExecute>,
    pub(crate) complete: Option<AsyncComplete>,
    pub(crate) work: napi_async_work,
}

pub(crate) unsafe extern "C" fn async_execute(_env: napi_env, data: *mut c_void) {
    if data.is_null() {
        return;
    }
    let data = &mut *(data as *mut AsyncWorkData);
    if let Some(execute) = data.execute.take() {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(execute)) {
            recovered(payload.as_ref(), "async_execute");
        }
    }
}

pub(crate) unsafe extern "C" fn async_complete(
    env: napi_env,
    status: napi_status,
    data: *mut c_void,
) {
    if data.is_null() {
        return;
    }
    let mut data = Box::from_raw(data as *mut AsyncWorkData);
    let host = NodeHost::from_raw(env);
    if let Some(complete) = data.complete.take() {
        let status = Status::from_raw(status);
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| complete(&host, status))) {
            throw_unless_pending(&host, &recovered(payload.as_ref(), "async_complete"));
        }
    }
    let deleted = Status::from_raw(sys::napi_delete_async_work(env, data.work));
    if !deleted.is_ok() {
        warn!("event=async_work_delete module=trampoline status=error napi_status={deleted}");
    }
}

/// Context of a thread-safe function, owned by Node until its finalizer.
pub(crate) struct TsfnContext {
    pub(crate) call_js: RawTsfnCallJs,
    pub(crate) finalize: Option<RawTsfnFinalize>,
}

pub(crate) unsafe extern "C" fn tsfn_call_js(
    env: napi_env,
    js_callback: napi_value,
    context: *mut c_void,
    data: *mut c_void,
) {
    if data.is_null() {
        return;
    }
    let payload = *Box::from_raw(data as *mut TsfnPayload);
    // A null env means the function is being torn down; the payload is dropped.
    if env.is_null() || context.is_null() {
        return;
    }
    let context = &*(context as *const TsfnContext);
    let host = NodeHost::from_raw(env);
    let function = (!js_callback.is_null()).then(|| to_raw(js_callback));
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| {
        (context.call_js)(&host, function, payload)
    })) {
        throw_unless_pending(&host, &recovered(payload.as_ref(), "threadsafe_call"));
    }
}

pub(crate) unsafe extern "C" fn tsfn_finalize(
    env: napi_env,
    data: *mut c_void,
    _hint: *mut c_void,
) {
    if data.is_null() {
        return;
    }
    let mut context = Box::from_raw(data as *mut TsfnContext);
    let Some(finalize) = context.finalize.take() else {
        return;
    };
    if env.is_null() {
        return;
    }
    let host = NodeHost::from_raw(env);
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| finalize(&host))) {
        recovered(payload.as_ref(), "threadsafe_finalize");
    }
}
