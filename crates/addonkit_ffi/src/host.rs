//! `Host` implementation over a live `napi_env`.
//!
//! # Responsibility
//! - Translate every `Host` operation into the matching Node-API call.
//! - Hand Rust data (closures, wrapped objects, external bytes) to Node as
//!   boxed pointers with finalizers that drop them.
//!
//! # Invariants
//! - A `NodeHost` is only used on the JS thread that owns its `env`, for the
//!   duration of the native call it was built for.
//! - Status codes are passed through unchanged; nothing is retried.
//!
//! # See also
//! - `trampoline` for the callbacks Node invokes.

use crate::sys::{
    self, napi_env, napi_property_descriptor, napi_status, napi_threadsafe_function, napi_value,
};
use crate::trampoline::{
    async_complete, async_execute, finalize_box, finalize_bytes, getter_trampoline,
    method_trampoline, setter_trampoline, tsfn_call_js, tsfn_finalize, AsyncWorkData,
    CallbackData, TsfnContext,
};
use addonkit_core::host::{
    AsyncComplete, AsyncExecute, DataViewInfo, NativeObject, RawAsyncWork, RawCallback,
    RawDeferred, RawHandleScope, RawProperty, RawPropertyValue, RawRef, RawThreadsafeFunction,
    RawTsfnCallJs, RawTsfnFinalize, TsfnPayload, TypedArrayInfo,
};
use addonkit_core::status::ExtendedErrorInfo;
use addonkit_core::{
    CallMode, Host, HostResult, NodeVersion, RawValue, ReleaseMode, Status, TypedArrayKind,
    ValueKind,
};
use log::warn;
use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::Arc;

pub(crate) fn to_raw(value: napi_value) -> RawValue {
    RawValue::from_ptr(value)
}

pub(crate) fn to_napi(value: RawValue) -> napi_value {
    value.as_ptr()
}

fn check(status: napi_status) -> HostResult<()> {
    Status::from_raw(status).check()
}

/// Runs a Node-API call writing one out-parameter.
unsafe fn out<T>(call: impl FnOnce(*mut T) -> napi_status) -> HostResult<T> {
    let mut slot = MaybeUninit::<T>::uninit();
    check(call(slot.as_mut_ptr()))?;
    Ok(slot.assume_init())
}

fn c_string(value: &str) -> HostResult<CString> {
    CString::new(value).map_err(|_| Status::InvalidArg)
}

fn optional_c_string(value: Option<&str>) -> HostResult<Option<CString>> {
    value.map(c_string).transpose()
}

fn c_ptr(value: &Option<CString>) -> *const c_char {
    value.as_ref().map_or(ptr::null(), |value| value.as_ptr())
}

fn null_or(value: Option<RawValue>) -> napi_value {
    value.map_or(ptr::null_mut(), to_napi)
}

/// Node-API environment of the current native call.
pub struct NodeHost {
    env: napi_env,
}

impl NodeHost {
    /// # Safety
    /// `env` must be the environment Node passed to the running callback.
    pub unsafe fn from_raw(env: napi_env) -> Self {
        Self { env }
    }

    pub fn raw_env(&self) -> napi_env {
        self.env
    }

    fn bool_query(
        &self,
        value: RawValue,
        query: unsafe extern "C" fn(napi_env, napi_value, *mut bool) -> napi_status,
    ) -> HostResult<bool> {
        unsafe { out(|result| query(self.env, to_napi(value), result)) }
    }

    fn key_query(
        &self,
        object: RawValue,
        key: RawValue,
        query: unsafe extern "C" fn(napi_env, napi_value, napi_value, *mut bool) -> napi_status,
    ) -> HostResult<bool> {
        unsafe { out(|result| query(self.env, to_napi(object), to_napi(key), result)) }
    }

    fn string(&self, value: &str) -> HostResult<napi_value> {
        unsafe {
            out(|result| {
                sys::napi_create_string_utf8(
                    self.env,
                    value.as_ptr() as *const c_char,
                    value.len() as _,
                    result,
                )
            })
        }
    }

    /// Attaches `data` to `object`; it is dropped when `object` is collected.
    fn attach<T>(&self, object: napi_value, data: Box<T>) -> HostResult<()> {
        let data = Box::into_raw(data);
        let status = unsafe {
            sys::napi_add_finalizer(
                self.env,
                object,
                data as *mut c_void,
                Some(finalize_box::<T>),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if let Err(status) = check(status) {
            // `object` may still call into `data`, so it is leaked, not freed.
            warn!("event=finalizer_attach module=host status=error napi_status={status}");
            return Err(status);
        }
        Ok(())
    }

    /// Builds descriptors for `properties`; returned boxes own the closures.
    fn descriptors(
        &self,
        properties: Vec<RawProperty>,
    ) -> HostResult<(Vec<napi_property_descriptor>, Vec<Box<CallbackData>>)> {
        let mut descriptors = Vec::with_capacity(properties.len());
        let mut owned = Vec::new();
        for property in properties {
            let name = self.string(&property.name)?;
            let attributes = property.attributes.bits() as i32;
            let mut descriptor = napi_property_descriptor {
                utf8name: ptr::null(),
                name,
                method: None,
                getter: None,
                setter: None,
                value: ptr::null_mut(),
                attributes,
                data: ptr::null_mut(),
            };
            let data = match property.value {
                RawPropertyValue::Value(value) => {
                    descriptor.value = to_napi(value);
                    None
                }
                RawPropertyValue::Method(callback) => {
                    descriptor.method = Some(method_trampoline);
                    Some(CallbackData::Method(callback))
                }
                RawPropertyValue::Accessor { getter, setter } => {
                    if getter.is_some() {
                        descriptor.getter = Some(getter_trampoline);
                    }
                    if setter.is_some() {
                        descriptor.setter = Some(setter_trampoline);
                    }
                    Some(CallbackData::Accessor { getter, setter })
                }
            };
            if let Some(data) = data {
                let mut data = Box::new(data);
                descriptor.data = &mut *data as *mut CallbackData as *mut c_void;
                owned.push(data);
            }
            descriptors.push(descriptor);
        }
        Ok((descriptors, owned))
    }

    fn string_buffer<T: Copy + Default>(
        &self,
        value: RawValue,
        read: unsafe extern "C" fn(napi_env, napi_value, *mut T, usize, *mut usize) -> napi_status,
    ) -> HostResult<Vec<T>> {
        let length = unsafe {
            out(|result| read(self.env, to_napi(value), ptr::null_mut(), 0, result))?
        };
        let mut buffer = vec![T::default(); length + 1];
        let written = unsafe {
            out(|result| {
                read(
                    self.env,
                    to_napi(value),
                    buffer.as_mut_ptr(),
                    buffer.len(),
                    result,
                )
            })?
        };
        buffer.truncate(written);
        Ok(buffer)
    }

    fn byte_view(
        &self,
        value: RawValue,
        info: unsafe extern "C" fn(napi_env, napi_value, *mut *mut c_void, *mut usize) -> napi_status,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> HostResult<()> {
        let mut data = ptr::null_mut();
        let mut length = 0usize;
        check(unsafe { info(self.env, to_napi(value), &mut data, &mut length) })?;
        if data.is_null() || length == 0 {
            f(&mut []);
        } else {
            f(unsafe { std::slice::from_raw_parts_mut(data as *mut u8, length) });
        }
        Ok(())
    }

    fn error_value(
        &self,
        code: Option<RawValue>,
        message: RawValue,
        create: unsafe extern "C" fn(napi_env, napi_value, napi_value, *mut napi_value) -> napi_status,
    ) -> HostResult<RawValue> {
        unsafe { out(|result| create(self.env, null_or(code), to_napi(message), result)) }
            .map(to_raw)
    }

    fn throw_with(
        &self,
        code: Option<&str>,
        message: &str,
        throw: unsafe extern "C" fn(napi_env, *const c_char, *const c_char) -> napi_status,
    ) -> HostResult<()> {
        let code = optional_c_string(code.filter(|code| !code.is_empty()))?;
        let message = c_string(message)?;
        check(unsafe { throw(self.env, c_ptr(&code), message.as_ptr()) })
    }
}

impl Host for NodeHost {
    fn get_undefined(&self) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_get_undefined(self.env, result)) }.map(to_raw)
    }

    fn get_null(&self) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_get_null(self.env, result)) }.map(to_raw)
    }

    fn get_global(&self) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_get_global(self.env, result)) }.map(to_raw)
    }

    fn get_boolean(&self, value: bool) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_get_boolean(self.env, value, result)) }.map(to_raw)
    }

    fn type_of(&self, value: RawValue) -> HostResult<ValueKind> {
        let raw = unsafe { out(|result| sys::napi_typeof(self.env, to_napi(value), result))? };
        ValueKind::from_raw(raw).ok_or(Status::InvalidArg)
    }

    fn is_array(&self, value: RawValue) -> HostResult<bool> {
        self.bool_query(value, sys::napi_is_array)
    }

    fn is_arraybuffer(&self, value: RawValue) -> HostResult<bool> {
        self.bool_query(value, sys::napi_is_arraybuffer)
    }

    fn is_buffer(&self, value: RawValue) -> HostResult<bool> {
        self.bool_query(value, sys::napi_is_buffer)
    }

    fn is_date(&self, value: RawValue) -> HostResult<bool> {
        self.bool_query(value, sys::napi_is_date)
    }

    fn is_dataview(&self, value: RawValue) -> HostResult<bool> {
        self.bool_query(value, sys::napi_is_dataview)
    }

    fn is_typedarray(&self, value: RawValue) -> HostResult<bool> {
        self.bool_query(value, sys::napi_is_typedarray)
    }

    fn is_promise(&self, value: RawValue) -> HostResult<bool> {
        self.bool_query(value, sys::napi_is_promise)
    }

    fn is_error(&self, value: RawValue) -> HostResult<bool> {
        self.bool_query(value, sys::napi_is_error)
    }

    fn strict_equals(&self, lhs: RawValue, rhs: RawValue) -> HostResult<bool> {
        self.key_query(lhs, rhs, sys::napi_strict_equals)
    }

    fn instance_of(&self, object: RawValue, constructor: RawValue) -> HostResult<bool> {
        self.key_query(object, constructor, sys::napi_instanceof)
    }

    fn create_double(&self, value: f64) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_create_double(self.env, value, result)) }.map(to_raw)
    }

    fn create_int32(&self, value: i32) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_create_int32(self.env, value, result)) }.map(to_raw)
    }

    fn create_uint32(&self, value: u32) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_create_uint32(self.env, value, result)) }.map(to_raw)
    }

    fn create_int64(&self, value: i64) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_create_int64(self.env, value, result)) }.map(to_raw)
    }

    fn get_value_double(&self, value: RawValue) -> HostResult<f64> {
        unsafe { out(|result| sys::napi_get_value_double(self.env, to_napi(value), result)) }
    }

    fn get_value_int32(&self, value: RawValue) -> HostResult<i32> {
        unsafe { out(|result| sys::napi_get_value_int32(self.env, to_napi(value), result)) }
    }

    fn get_value_uint32(&self, value: RawValue) -> HostResult<u32> {
        unsafe { out(|result| sys::napi_get_value_uint32(self.env, to_napi(value), result)) }
    }

    fn get_value_int64(&self, value: RawValue) -> HostResult<i64> {
        unsafe { out(|result| sys::napi_get_value_int64(self.env, to_napi(value), result)) }
    }

    fn get_value_bool(&self, value: RawValue) -> HostResult<bool> {
        self.bool_query(value, sys::napi_get_value_bool)
    }

    fn create_bigint_int64(&self, value: i64) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_create_bigint_int64(self.env, value, result)) }
            .map(to_raw)
    }

    fn create_bigint_uint64(&self, value: u64) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_create_bigint_uint64(self.env, value, result)) }
            .map(to_raw)
    }

    fn get_value_bigint_int64(&self, value: RawValue) -> HostResult<(i64, bool)> {
        let mut lossless = false;
        let number = unsafe {
            out(|result| {
                sys::napi_get_value_bigint_int64(self.env, to_napi(value), result, &mut lossless)
            })?
        };
        Ok((number, lossless))
    }

    fn get_value_bigint_uint64(&self, value: RawValue) -> HostResult<(u64, bool)> {
        let mut lossless = false;
        let number = unsafe {
            out(|result| {
                sys::napi_get_value_bigint_uint64(self.env, to_napi(value), result, &mut lossless)
            })?
        };
        Ok((number, lossless))
    }

    fn create_string_utf8(&self, value: &str) -> HostResult<RawValue> {
        self.string(value).map(to_raw)
    }

    fn create_string_utf16(&self, value: &[u16]) -> HostResult<RawValue> {
        unsafe {
            out(|result| {
                sys::napi_create_string_utf16(self.env, value.as_ptr(), value.len() as _, result)
            })
        }
        .map(to_raw)
    }

    fn get_value_string_utf8(&self, value: RawValue) -> HostResult<String> {
        let bytes = self.string_buffer::<c_char>(value, sys::napi_get_value_string_utf8)?;
        let bytes: Vec<u8> = bytes.into_iter().map(|byte| byte as u8).collect();
        String::from_utf8(bytes).map_err(|_| Status::StringExpected)
    }

    fn get_value_string_utf16(&self, value: RawValue) -> HostResult<Vec<u16>> {
        self.string_buffer::<u16>(value, sys::napi_get_value_string_utf16)
    }

    fn create_symbol(&self, description: Option<RawValue>) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_create_symbol(self.env, null_or(description), result)) }
            .map(to_raw)
    }

    fn coerce_to_string(&self, value: RawValue) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_coerce_to_string(self.env, to_napi(value), result)) }
            .map(to_raw)
    }

    fn create_object(&self) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_create_object(self.env, result)) }.map(to_raw)
    }

    fn get_property(&self, object: RawValue, key: RawValue) -> HostResult<RawValue> {
        unsafe {
            out(|result| sys::napi_get_property(self.env, to_napi(object), to_napi(key), result))
        }
        .map(to_raw)
    }

    fn set_property(&self, object: RawValue, key: RawValue, value: RawValue) -> HostResult<()> {
        check(unsafe {
            sys::napi_set_property(self.env, to_napi(object), to_napi(key), to_napi(value))
        })
    }

    fn has_property(&self, object: RawValue, key: RawValue) -> HostResult<bool> {
        self.key_query(object, key, sys::napi_has_property)
    }

    fn has_own_property(&self, object: RawValue, key: RawValue) -> HostResult<bool> {
        self.key_query(object, key, sys::napi_has_own_property)
    }

    fn delete_property(&self, object: RawValue, key: RawValue) -> HostResult<bool> {
        self.key_query(object, key, sys::napi_delete_property)
    }

    fn get_named_property(&self, object: RawValue, name: &str) -> HostResult<RawValue> {
        let name = c_string(name)?;
        unsafe {
            out(|result| {
                sys::napi_get_named_property(self.env, to_napi(object), name.as_ptr(), result)
            })
        }
        .map(to_raw)
    }

    fn set_named_property(
        &self,
        object: RawValue,
        name: &str,
        value: RawValue,
    ) -> HostResult<()> {
        let name = c_string(name)?;
        check(unsafe {
            sys::napi_set_named_property(self.env, to_napi(object), name.as_ptr(), to_napi(value))
        })
    }

    fn has_named_property(&self, object: RawValue, name: &str) -> HostResult<bool> {
        let name = c_string(name)?;
        unsafe {
            out(|result| {
                sys::napi_has_named_property(self.env, to_napi(object), name.as_ptr(), result)
            })
        }
    }

    fn get_property_names(&self, object: RawValue) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_get_property_names(self.env, to_napi(object), result)) }
            .map(to_raw)
    }

    fn object_freeze(&self, object: RawValue) -> HostResult<()> {
        check(unsafe { sys::napi_object_freeze(self.env, to_napi(object)) })
    }

    fn object_seal(&self, object: RawValue) -> HostResult<()> {
        check(unsafe { sys::napi_object_seal(self.env, to_napi(object)) })
    }

    fn define_properties(&self, object: RawValue, properties: Vec<RawProperty>) -> HostResult<()> {
        let (descriptors, owned) = self.descriptors(properties)?;
        check(unsafe {
            sys::napi_define_properties(
                self.env,
                to_napi(object),
                descriptors.len(),
                descriptors.as_ptr(),
            )
        })?;
        if owned.is_empty() {
            return Ok(());
        }
        self.attach(to_napi(object), Box::new(owned))
    }

    fn create_array(&self) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_create_array(self.env, result)) }.map(to_raw)
    }

    fn create_array_with_length(&self, length: usize) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_create_array_with_length(self.env, length, result)) }
            .map(to_raw)
    }

    fn get_array_length(&self, array: RawValue) -> HostResult<u32> {
        unsafe { out(|result| sys::napi_get_array_length(self.env, to_napi(array), result)) }
    }

    fn get_element(&self, object: RawValue, index: u32) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_get_element(self.env, to_napi(object), index, result)) }
            .map(to_raw)
    }

    fn set_element(&self, object: RawValue, index: u32, value: RawValue) -> HostResult<()> {
        check(unsafe { sys::napi_set_element(self.env, to_napi(object), index, to_napi(value)) })
    }

    fn has_element(&self, object: RawValue, index: u32) -> HostResult<bool> {
        unsafe { out(|result| sys::napi_has_element(self.env, to_napi(object), index, result)) }
    }

    fn delete_element(&self, object: RawValue, index: u32) -> HostResult<bool> {
        unsafe {
            out(|result| sys::napi_delete_element(self.env, to_napi(object), index, result))
        }
    }

    fn create_function(&self, name: &str, callback: RawCallback) -> HostResult<RawValue> {
        let mut data = Box::new(CallbackData::Method(callback));
        let data_ptr = &mut *data as *mut CallbackData as *mut c_void;
        let function = unsafe {
            out(|result| {
                sys::napi_create_function(
                    self.env,
                    name.as_ptr() as *const c_char,
                    name.len() as _,
                    Some(method_trampoline),
                    data_ptr,
                    result,
                )
            })?
        };
        self.attach(function, data)?;
        Ok(to_raw(function))
    }

    fn call_function(
        &self,
        receiver: RawValue,
        function: RawValue,
        args: &[RawValue],
    ) -> HostResult<RawValue> {
        let argv: Vec<napi_value> = args.iter().copied().map(to_napi).collect();
        unsafe {
            out(|result| {
                sys::napi_call_function(
                    self.env,
                    to_napi(receiver),
                    to_napi(function),
                    argv.len(),
                    argv.as_ptr(),
                    result,
                )
            })
        }
        .map(to_raw)
    }

    fn new_instance(&self, constructor: RawValue, args: &[RawValue]) -> HostResult<RawValue> {
        let argv: Vec<napi_value> = args.iter().copied().map(to_napi).collect();
        unsafe {
            out(|result| {
                sys::napi_new_instance(
                    self.env,
                    to_napi(constructor),
                    argv.len(),
                    argv.as_ptr(),
                    result,
                )
            })
        }
        .map(to_raw)
    }

    fn define_class(
        &self,
        name: &str,
        constructor: RawCallback,
        properties: Vec<RawProperty>,
    ) -> HostResult<RawValue> {
        let (descriptors, mut owned) = self.descriptors(properties)?;
        let mut data = Box::new(CallbackData::Method(constructor));
        let data_ptr = &mut *data as *mut CallbackData as *mut c_void;
        let class = unsafe {
            out(|result| {
                sys::napi_define_class(
                    self.env,
                    name.as_ptr() as *const c_char,
                    name.len() as _,
                    Some(method_trampoline),
                    data_ptr,
                    descriptors.len(),
                    descriptors.as_ptr(),
                    result,
                )
            })?
        };
        owned.push(data);
        self.attach(class, Box::new(owned))?;
        Ok(to_raw(class))
    }

    fn create_error(&self, code: Option<RawValue>, message: RawValue) -> HostResult<RawValue> {
        self.error_value(code, message, sys::napi_create_error)
    }

    fn create_type_error(
        &self,
        code: Option<RawValue>,
        message: RawValue,
    ) -> HostResult<RawValue> {
        self.error_value(code, message, sys::napi_create_type_error)
    }

    fn create_range_error(
        &self,
        code: Option<RawValue>,
        message: RawValue,
    ) -> HostResult<RawValue> {
        self.error_value(code, message, sys::napi_create_range_error)
    }

    fn throw(&self, error: RawValue) -> HostResult<()> {
        check(unsafe { sys::napi_throw(self.env, to_napi(error)) })
    }

    fn throw_error(&self, code: Option<&str>, message: &str) -> HostResult<()> {
        self.throw_with(code, message, sys::napi_throw_error)
    }

    fn throw_type_error(&self, code: Option<&str>, message: &str) -> HostResult<()> {
        self.throw_with(code, message, sys::napi_throw_type_error)
    }

    fn throw_range_error(&self, code: Option<&str>, message: &str) -> HostResult<()> {
        self.throw_with(code, message, sys::napi_throw_range_error)
    }

    fn is_exception_pending(&self) -> HostResult<bool> {
        unsafe { out(|result| sys::napi_is_exception_pending(self.env, result)) }
    }

    fn get_and_clear_last_exception(&self) -> HostResult<RawValue> {
        let value =
            unsafe { out(|result| sys::napi_get_and_clear_last_exception(self.env, result))? };
        if value.is_null() {
            return self.get_undefined();
        }
        Ok(to_raw(value))
    }

    fn get_last_error_info(&self) -> HostResult<ExtendedErrorInfo> {
        let info = unsafe { out(|result| sys::napi_get_last_error_info(self.env, result))? };
        if info.is_null() {
            return Err(Status::GenericFailure);
        }
        let info = unsafe { &*info };
        let message = (!info.error_message.is_null()).then(|| {
            unsafe { CStr::from_ptr(info.error_message) }
                .to_string_lossy()
                .into_owned()
        });
        Ok(ExtendedErrorInfo {
            message,
            status: Status::from_raw(info.error_code),
            engine_error_code: info.engine_error_code,
        })
    }

    fn create_buffer(&self, length: usize) -> HostResult<RawValue> {
        let mut data = ptr::null_mut();
        unsafe { out(|result| sys::napi_create_buffer(self.env, length, &mut data, result)) }
            .map(to_raw)
    }

    fn create_buffer_copy(&self, data: &[u8]) -> HostResult<RawValue> {
        let mut copied = ptr::null_mut();
        unsafe {
            out(|result| {
                sys::napi_create_buffer_copy(
                    self.env,
                    data.len(),
                    data.as_ptr() as *const c_void,
                    &mut copied,
                    result,
                )
            })
        }
        .map(to_raw)
    }

    fn buffer_data(&self, buffer: RawValue, f: &mut dyn FnMut(&mut [u8])) -> HostResult<()> {
        self.byte_view(buffer, sys::napi_get_buffer_info, f)
    }

    fn create_arraybuffer(&self, length: usize) -> HostResult<RawValue> {
        let mut data = ptr::null_mut();
        unsafe { out(|result| sys::napi_create_arraybuffer(self.env, length, &mut data, result)) }
            .map(to_raw)
    }

    fn create_external_arraybuffer(&self, data: &mut Vec<u8>) -> HostResult<RawValue> {
        let bytes = std::mem::take(data).into_boxed_slice();
        let length = bytes.len();
        let bytes_ptr = Box::into_raw(bytes) as *mut u8;
        let created = unsafe {
            out(|result| {
                sys::napi_create_external_arraybuffer(
                    self.env,
                    bytes_ptr as *mut c_void,
                    length,
                    Some(finalize_bytes),
                    length as *mut c_void,
                    result,
                )
            })
        };
        match created {
            Ok(value) => Ok(to_raw(value)),
            Err(status) => {
                let bytes = unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(bytes_ptr, length)) };
                *data = bytes.into_vec();
                Err(status)
            }
        }
    }

    fn arraybuffer_data(
        &self,
        arraybuffer: RawValue,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> HostResult<()> {
        self.byte_view(arraybuffer, sys::napi_get_arraybuffer_info, f)
    }

    fn detach_arraybuffer(&self, arraybuffer: RawValue) -> HostResult<()> {
        check(unsafe { sys::napi_detach_arraybuffer(self.env, to_napi(arraybuffer)) })
    }

    fn is_detached_arraybuffer(&self, arraybuffer: RawValue) -> HostResult<bool> {
        self.bool_query(arraybuffer, sys::napi_is_detached_arraybuffer)
    }

    fn create_typedarray(
        &self,
        kind: TypedArrayKind,
        length: usize,
        arraybuffer: RawValue,
        byte_offset: usize,
    ) -> HostResult<RawValue> {
        unsafe {
            out(|result| {
                sys::napi_create_typedarray(
                    self.env,
                    kind.as_raw(),
                    length,
                    to_napi(arraybuffer),
                    byte_offset,
                    result,
                )
            })
        }
        .map(to_raw)
    }

    fn get_typedarray_info(&self, typedarray: RawValue) -> HostResult<TypedArrayInfo> {
        let mut kind = 0;
        let mut length = 0usize;
        let mut data = ptr::null_mut();
        let mut arraybuffer = ptr::null_mut();
        let mut byte_offset = 0usize;
        check(unsafe {
            sys::napi_get_typedarray_info(
                self.env,
                to_napi(typedarray),
                &mut kind,
                &mut length,
                &mut data,
                &mut arraybuffer,
                &mut byte_offset,
            )
        })?;
        Ok(TypedArrayInfo {
            kind: TypedArrayKind::from_raw(kind).ok_or(Status::InvalidArg)?,
            length,
            arraybuffer: to_raw(arraybuffer),
            byte_offset,
        })
    }

    fn create_dataview(
        &self,
        byte_length: usize,
        arraybuffer: RawValue,
        byte_offset: usize,
    ) -> HostResult<RawValue> {
        unsafe {
            out(|result| {
                sys::napi_create_dataview(
                    self.env,
                    byte_length,
                    to_napi(arraybuffer),
                    byte_offset,
                    result,
                )
            })
        }
        .map(to_raw)
    }

    fn get_dataview_info(&self, dataview: RawValue) -> HostResult<DataViewInfo> {
        let mut byte_length = 0usize;
        let mut data = ptr::null_mut();
        let mut arraybuffer = ptr::null_mut();
        let mut byte_offset = 0usize;
        check(unsafe {
            sys::napi_get_dataview_info(
                self.env,
                to_napi(dataview),
                &mut byte_length,
                &mut data,
                &mut arraybuffer,
                &mut byte_offset,
            )
        })?;
        Ok(DataViewInfo {
            byte_length,
            arraybuffer: to_raw(arraybuffer),
            byte_offset,
        })
    }

    fn create_date(&self, epoch_ms: f64) -> HostResult<RawValue> {
        unsafe { out(|result| sys::napi_create_date(self.env, epoch_ms, result)) }.map(to_raw)
    }

    fn get_date_value(&self, date: RawValue) -> HostResult<f64> {
        unsafe { out(|result| sys::napi_get_date_value(self.env, to_napi(date), result)) }
    }

    fn create_promise(&self) -> HostResult<(RawDeferred, RawValue)> {
        let mut deferred = ptr::null_mut();
        let promise =
            unsafe { out(|result| sys::napi_create_promise(self.env, &mut deferred, result))? };
        Ok((RawDeferred::from_ptr(deferred), to_raw(promise)))
    }

    fn resolve_deferred(&self, deferred: RawDeferred, value: RawValue) -> HostResult<()> {
        check(unsafe { sys::napi_resolve_deferred(self.env, deferred.as_ptr(), to_napi(value)) })
    }

    fn reject_deferred(&self, deferred: RawDeferred, value: RawValue) -> HostResult<()> {
        check(unsafe { sys::napi_reject_deferred(self.env, deferred.as_ptr(), to_napi(value)) })
    }

    fn create_external(&self, data: NativeObject) -> HostResult<RawValue> {
        let data = Box::into_raw(Box::new(data));
        let created = unsafe {
            out(|result| {
                sys::napi_create_external(
                    self.env,
                    data as *mut c_void,
                    Some(finalize_box::<NativeObject>),
                    ptr::null_mut(),
                    result,
                )
            })
        };
        if created.is_err() {
            drop(unsafe { Box::from_raw(data) });
        }
        created.map(to_raw)
    }

    fn get_value_external(&self, value: RawValue) -> HostResult<NativeObject> {
        let data = unsafe { out(|result| sys::napi_get_value_external(self.env, to_napi(value), result))? };
        native_at(data)
    }

    fn wrap(&self, object: RawValue, data: NativeObject) -> HostResult<()> {
        let data = Box::into_raw(Box::new(data));
        let status = unsafe {
            sys::napi_wrap(
                self.env,
                to_napi(object),
                data as *mut c_void,
                Some(finalize_box::<NativeObject>),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if let Err(status) = check(status) {
            drop(unsafe { Box::from_raw(data) });
            return Err(status);
        }
        Ok(())
    }

    fn unwrap(&self, object: RawValue) -> HostResult<NativeObject> {
        let data = unsafe { out(|result| sys::napi_unwrap(self.env, to_napi(object), result))? };
        native_at(data)
    }

    fn remove_wrap(&self, object: RawValue) -> HostResult<NativeObject> {
        let data =
            unsafe { out(|result| sys::napi_remove_wrap(self.env, to_napi(object), result))? };
        if data.is_null() {
            return Err(Status::InvalidArg);
        }
        // The finalizer no longer runs once the wrap is removed.
        Ok(*unsafe { Box::from_raw(data as *mut NativeObject) })
    }

    fn set_instance_data(&self, data: NativeObject) -> HostResult<()> {
        let previous = unsafe { out(|result| sys::napi_get_instance_data(self.env, result))? };
        let data = Box::into_raw(Box::new(data));
        let status = unsafe {
            sys::napi_set_instance_data(
                self.env,
                data as *mut c_void,
                Some(finalize_box::<NativeObject>),
                ptr::null_mut(),
            )
        };
        if let Err(status) = check(status) {
            drop(unsafe { Box::from_raw(data) });
            return Err(status);
        }
        // Node does not finalize overwritten instance data.
        if !previous.is_null() {
            drop(unsafe { Box::from_raw(previous as *mut NativeObject) });
        }
        Ok(())
    }

    fn get_instance_data(&self) -> HostResult<Option<NativeObject>> {
        let data = unsafe { out(|result| sys::napi_get_instance_data(self.env, result))? };
        if data.is_null() {
            return Ok(None);
        }
        native_at(data).map(Some)
    }

    fn create_reference(&self, value: RawValue, initial_refcount: u32) -> HostResult<RawRef> {
        unsafe {
            out(|result| {
                sys::napi_create_reference(self.env, to_napi(value), initial_refcount, result)
            })
        }
        .map(RawRef::from_ptr)
    }

    fn delete_reference(&self, reference: RawRef) -> HostResult<()> {
        check(unsafe { sys::napi_delete_reference(self.env, reference.as_ptr()) })
    }

    fn reference_ref(&self, reference: RawRef) -> HostResult<u32> {
        unsafe { out(|result| sys::napi_reference_ref(self.env, reference.as_ptr(), result)) }
    }

    fn reference_unref(&self, reference: RawRef) -> HostResult<u32> {
        unsafe { out(|result| sys::napi_reference_unref(self.env, reference.as_ptr(), result)) }
    }

    fn get_reference_value(&self, reference: RawRef) -> HostResult<Option<RawValue>> {
        let value = unsafe {
            out(|result| sys::napi_get_reference_value(self.env, reference.as_ptr(), result))?
        };
        Ok((!value.is_null()).then(|| to_raw(value)))
    }

    fn open_handle_scope(&self) -> HostResult<RawHandleScope> {
        unsafe { out(|result| sys::napi_open_handle_scope(self.env, result)) }
            .map(RawHandleScope::from_ptr)
    }

    fn close_handle_scope(&self, scope: RawHandleScope) -> HostResult<()> {
        check(unsafe { sys::napi_close_handle_scope(self.env, scope.as_ptr()) })
    }

    fn get_version(&self) -> HostResult<u32> {
        unsafe { out(|result| sys::napi_get_version(self.env, result)) }
    }

    fn get_node_version(&self) -> HostResult<NodeVersion> {
        let version = unsafe { out(|result| sys::napi_get_node_version(self.env, result))? };
        if version.is_null() {
            return Err(Status::GenericFailure);
        }
        let version = unsafe { &*version };
        let release = if version.release.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(version.release) }
                .to_string_lossy()
                .into_owned()
        };
        Ok(NodeVersion {
            major: version.major,
            minor: version.minor,
            patch: version.patch,
            release,
        })
    }

    fn create_async_work(
        &self,
        name: &str,
        execute: AsyncExecute,
        complete: AsyncComplete,
    ) -> HostResult<RawAsyncWork> {
        let resource_name = self.string(name)?;
        let data = Box::into_raw(Box::new(AsyncWorkData {
            execute: Some(execute),
            complete: Some(complete),
            work: ptr::null_mut(),
        }));
        let created = unsafe {
            out(|result| {
                sys::napi_create_async_work(
                    self.env,
                    ptr::null_mut(),
                    resource_name,
                    Some(async_execute),
                    Some(async_complete),
                    data as *mut c_void,
                    result,
                )
            })
        };
        match created {
            Ok(work) => {
                unsafe { (*data).work = work };
                Ok(RawAsyncWork::from_ptr(work))
            }
            Err(status) => {
                drop(unsafe { Box::from_raw(data) });
                Err(status)
            }
        }
    }

    fn queue_async_work(&self, work: RawAsyncWork) -> HostResult<()> {
        check(unsafe { sys::napi_queue_async_work(self.env, work.as_ptr()) })
    }

    fn cancel_async_work(&self, work: RawAsyncWork) -> HostResult<()> {
        check(unsafe { sys::napi_cancel_async_work(self.env, work.as_ptr()) })
    }

    fn create_threadsafe_function(
        &self,
        function: Option<RawValue>,
        name: &str,
        max_queue_size: usize,
        initial_thread_count: usize,
        call_js: RawTsfnCallJs,
        finalize: Option<RawTsfnFinalize>,
    ) -> HostResult<Arc<dyn RawThreadsafeFunction>> {
        let resource_name = self.string(name)?;
        let context = Box::into_raw(Box::new(TsfnContext { call_js, finalize }));
        let created = unsafe {
            out(|result| {
                sys::napi_create_threadsafe_function(
                    self.env,
                    null_or(function),
                    ptr::null_mut(),
                    resource_name,
                    max_queue_size,
                    initial_thread_count,
                    context as *mut c_void,
                    Some(tsfn_finalize),
                    context as *mut c_void,
                    Some(tsfn_call_js),
                    result,
                )
            })
        };
        match created {
            Ok(raw) => Ok(Arc::new(NodeThreadsafeFunction { raw })),
            Err(status) => {
                drop(unsafe { Box::from_raw(context) });
                Err(status)
            }
        }
    }

    fn ref_threadsafe_function(&self, function: &dyn RawThreadsafeFunction) -> HostResult<()> {
        check(unsafe {
            sys::napi_ref_threadsafe_function(self.env, function.handle() as napi_threadsafe_function)
        })
    }

    fn unref_threadsafe_function(
        &self,
        function: &dyn RawThreadsafeFunction,
    ) -> HostResult<()> {
        check(unsafe {
            sys::napi_unref_threadsafe_function(
                self.env,
                function.handle() as napi_threadsafe_function,
            )
        })
    }
}

fn native_at(data: *mut c_void) -> HostResult<NativeObject> {
    if data.is_null() {
        return Err(Status::InvalidArg);
    }
    Ok(unsafe { &*(data as *const NativeObject) }.clone())
}

/// Thread-side handle of a `napi_threadsafe_function`.
struct NodeThreadsafeFunction {
    raw: napi_threadsafe_function,
}

// Node-API documents the call/acquire/release entry points as callable from
// any thread.
unsafe impl Send for NodeThreadsafeFunction {}
unsafe impl Sync for NodeThreadsafeFunction {}

impl RawThreadsafeFunction for NodeThreadsafeFunction {
    fn call(&self, payload: TsfnPayload, mode: CallMode) -> HostResult<()> {
        let data = Box::into_raw(Box::new(payload));
        let status =
            unsafe { sys::napi_call_threadsafe_function(self.raw, data as *mut c_void, mode.as_raw()) };
        if let Err(status) = check(status) {
            drop(unsafe { Box::from_raw(data) });
            return Err(status);
        }
        Ok(())
    }

    fn acquire(&self) -> HostResult<()> {
        check(unsafe { sys::napi_acquire_threadsafe_function(self.raw) })
    }

    fn release(&self, mode: ReleaseMode) -> HostResult<()> {
        check(unsafe { sys::napi_release_threadsafe_function(self.raw, mode.as_raw()) })
    }

    fn handle(&self) -> usize {
        self.raw as usize
    }
}
