//! Host seam between the safe value layer and a Node-API implementation.
//!
//! # Responsibility
//! - List every primitive Node-API operation the library relies on, over
//!   opaque `Copy` handles.
//! - Keep ownership rules of attached Rust data (callbacks, wrapped objects,
//!   external buffers) explicit: the host owns them once handed over and
//!   drops them from its finalizers.
//!
//! # Invariants
//! - Handles are only meaningful for the host that produced them.
//! - Methods never unwind; failures are reported as `Status`.
//! - Callbacks may re-enter the host, so implementations must not hold
//!   internal borrows while invoking them.
//!
//! # See also
//! - `memory` for the in-process implementation used by tests.

use crate::status::{ExtendedErrorInfo, Status};
use crate::types::{CallMode, NodeVersion, PropertyAttributes, ReleaseMode, TypedArrayKind, ValueKind};
use std::any::Any;
use std::rc::Rc;
use std::sync::Arc;

pub mod memory;

pub use memory::{MemoryHost, PromiseState};

pub type HostResult<T> = Result<T, Status>;

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(usize);

        impl $name {
            pub fn from_usize(raw: usize) -> Self {
                Self(raw)
            }

            pub fn as_usize(self) -> usize {
                self.0
            }

            pub fn from_ptr<T>(ptr: *mut T) -> Self {
                Self(ptr as usize)
            }

            pub fn as_ptr<T>(self) -> *mut T {
                self.0 as *mut T
            }
        }
    };
}

raw_handle!(
    /// Opaque JS value handle (`napi_value`).
    RawValue
);
raw_handle!(
    /// Resolver half of a promise (`napi_deferred`).
    RawDeferred
);
raw_handle!(
    /// Persistent reference (`napi_ref`).
    RawRef
);
raw_handle!(
    /// Queued background work item (`napi_async_work`).
    RawAsyncWork
);
raw_handle!(
    /// Handle scope (`napi_handle_scope`).
    RawHandleScope
);

/// Rust data attached to a JS object (wrap, external, instance data).
pub type NativeObject = Rc<dyn Any>;

/// Receiver, arguments and `new.target` of one native call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCallFrame {
    pub this: RawValue,
    pub args: Vec<RawValue>,
    /// Set only when invoked as a constructor.
    pub new_target: Option<RawValue>,
}

/// Native function body. `None` means "an exception is pending" or
/// "return undefined"; hosts treat both as no return value.
pub type RawCallback = Rc<dyn Fn(&dyn Host, &RawCallFrame) -> Option<RawValue>>;

pub enum RawPropertyValue {
    Method(RawCallback),
    Accessor {
        getter: Option<RawCallback>,
        /// Receives the assigned value as its only argument.
        setter: Option<RawCallback>,
    },
    Value(RawValue),
}

/// One entry of `napi_define_properties` / `napi_define_class`.
pub struct RawProperty {
    pub name: String,
    pub value: RawPropertyValue,
    pub attributes: PropertyAttributes,
}

/// Layout of a typed array over its backing `ArrayBuffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedArrayInfo {
    pub kind: TypedArrayKind,
    /// Element count.
    pub length: usize,
    pub arraybuffer: RawValue,
    pub byte_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataViewInfo {
    pub byte_length: usize,
    pub arraybuffer: RawValue,
    pub byte_offset: usize,
}

/// Runs on a worker thread; must not touch JS.
pub type AsyncExecute = Box<dyn FnOnce() + Send>;
/// Runs on the JS thread with `Ok` or `Cancelled`. The host releases the
/// work item after this returns.
pub type AsyncComplete = Box<dyn FnOnce(&dyn Host, Status)>;

pub type TsfnPayload = Box<dyn Any + Send>;
/// Runs on the JS thread for every queued payload.
pub type RawTsfnCallJs = Box<dyn Fn(&dyn Host, Option<RawValue>, TsfnPayload)>;
/// Runs on the JS thread once the function is torn down.
pub type RawTsfnFinalize = Box<dyn FnOnce(&dyn Host)>;

/// Thread-side handle of a thread-safe function.
pub trait RawThreadsafeFunction: Send + Sync {
    fn call(&self, payload: TsfnPayload, mode: CallMode) -> HostResult<()>;
    fn acquire(&self) -> HostResult<()>;
    fn release(&self, mode: ReleaseMode) -> HostResult<()>;
    /// Host-specific identity used by `ref`/`unref`.
    fn handle(&self) -> usize;
}

/// Node-API primitive operations over one environment.
pub trait Host {
    // Singletons.
    fn get_undefined(&self) -> HostResult<RawValue>;
    fn get_null(&self) -> HostResult<RawValue>;
    fn get_global(&self) -> HostResult<RawValue>;
    fn get_boolean(&self, value: bool) -> HostResult<RawValue>;

    // Type checks.
    fn type_of(&self, value: RawValue) -> HostResult<ValueKind>;
    fn is_array(&self, value: RawValue) -> HostResult<bool>;
    fn is_arraybuffer(&self, value: RawValue) -> HostResult<bool>;
    fn is_buffer(&self, value: RawValue) -> HostResult<bool>;
    fn is_date(&self, value: RawValue) -> HostResult<bool>;
    fn is_dataview(&self, value: RawValue) -> HostResult<bool>;
    fn is_typedarray(&self, value: RawValue) -> HostResult<bool>;
    fn is_promise(&self, value: RawValue) -> HostResult<bool>;
    fn is_error(&self, value: RawValue) -> HostResult<bool>;
    fn strict_equals(&self, lhs: RawValue, rhs: RawValue) -> HostResult<bool>;
    fn instance_of(&self, object: RawValue, constructor: RawValue) -> HostResult<bool>;

    // Numbers, booleans, strings, symbols.
    fn create_double(&self, value: f64) -> HostResult<RawValue>;
    fn create_int32(&self, value: i32) -> HostResult<RawValue>;
    fn create_uint32(&self, value: u32) -> HostResult<RawValue>;
    fn create_int64(&self, value: i64) -> HostResult<RawValue>;
    fn get_value_double(&self, value: RawValue) -> HostResult<f64>;
    fn get_value_int32(&self, value: RawValue) -> HostResult<i32>;
    fn get_value_uint32(&self, value: RawValue) -> HostResult<u32>;
    fn get_value_int64(&self, value: RawValue) -> HostResult<i64>;
    fn get_value_bool(&self, value: RawValue) -> HostResult<bool>;
    fn create_bigint_int64(&self, value: i64) -> HostResult<RawValue>;
    fn create_bigint_uint64(&self, value: u64) -> HostResult<RawValue>;
    /// Returns the value and whether it was represented losslessly.
    fn get_value_bigint_int64(&self, value: RawValue) -> HostResult<(i64, bool)>;
    fn get_value_bigint_uint64(&self, value: RawValue) -> HostResult<(u64, bool)>;
    fn create_string_utf8(&self, value: &str) -> HostResult<RawValue>;
    fn create_string_utf16(&self, value: &[u16]) -> HostResult<RawValue>;
    fn get_value_string_utf8(&self, value: RawValue) -> HostResult<String>;
    fn get_value_string_utf16(&self, value: RawValue) -> HostResult<Vec<u16>>;
    fn create_symbol(&self, description: Option<RawValue>) -> HostResult<RawValue>;
    fn coerce_to_string(&self, value: RawValue) -> HostResult<RawValue>;

    // Objects.
    fn create_object(&self) -> HostResult<RawValue>;
    fn get_property(&self, object: RawValue, key: RawValue) -> HostResult<RawValue>;
    fn set_property(&self, object: RawValue, key: RawValue, value: RawValue) -> HostResult<()>;
    fn has_property(&self, object: RawValue, key: RawValue) -> HostResult<bool>;
    fn has_own_property(&self, object: RawValue, key: RawValue) -> HostResult<bool>;
    fn delete_property(&self, object: RawValue, key: RawValue) -> HostResult<bool>;
    fn get_named_property(&self, object: RawValue, name: &str) -> HostResult<RawValue>;
    fn set_named_property(&self, object: RawValue, name: &str, value: RawValue)
        -> HostResult<()>;
    fn has_named_property(&self, object: RawValue, name: &str) -> HostResult<bool>;
    /// Enumerable string keys, own and inherited, as a JS array.
    fn get_property_names(&self, object: RawValue) -> HostResult<RawValue>;
    fn object_freeze(&self, object: RawValue) -> HostResult<()>;
    fn object_seal(&self, object: RawValue) -> HostResult<()>;
    fn define_properties(&self, object: RawValue, properties: Vec<RawProperty>)
        -> HostResult<()>;

    // Arrays.
    fn create_array(&self) -> HostResult<RawValue>;
    fn create_array_with_length(&self, length: usize) -> HostResult<RawValue>;
    fn get_array_length(&self, array: RawValue) -> HostResult<u32>;
    fn get_element(&self, object: RawValue, index: u32) -> HostResult<RawValue>;
    fn set_element(&self, object: RawValue, index: u32, value: RawValue) -> HostResult<()>;
    fn has_element(&self, object: RawValue, index: u32) -> HostResult<bool>;
    fn delete_element(&self, object: RawValue, index: u32) -> HostResult<bool>;

    // Functions and classes.
    fn create_function(&self, name: &str, callback: RawCallback) -> HostResult<RawValue>;
    fn call_function(
        &self,
        receiver: RawValue,
        function: RawValue,
        args: &[RawValue],
    ) -> HostResult<RawValue>;
    fn new_instance(&self, constructor: RawValue, args: &[RawValue]) -> HostResult<RawValue>;
    fn define_class(
        &self,
        name: &str,
        constructor: RawCallback,
        properties: Vec<RawProperty>,
    ) -> HostResult<RawValue>;

    // Errors and exceptions.
    fn create_error(&self, code: Option<RawValue>, message: RawValue) -> HostResult<RawValue>;
    fn create_type_error(&self, code: Option<RawValue>, message: RawValue)
        -> HostResult<RawValue>;
    fn create_range_error(&self, code: Option<RawValue>, message: RawValue)
        -> HostResult<RawValue>;
    fn throw(&self, error: RawValue) -> HostResult<()>;
    fn throw_error(&self, code: Option<&str>, message: &str) -> HostResult<()>;
    fn throw_type_error(&self, code: Option<&str>, message: &str) -> HostResult<()>;
    fn throw_range_error(&self, code: Option<&str>, message: &str) -> HostResult<()>;
    fn is_exception_pending(&self) -> HostResult<bool>;
    /// Clears the pending exception; returns `undefined` when none is pending.
    fn get_and_clear_last_exception(&self) -> HostResult<RawValue>;
    fn get_last_error_info(&self) -> HostResult<ExtendedErrorInfo>;

    // Buffers.
    fn create_buffer(&self, length: usize) -> HostResult<RawValue>;
    fn create_buffer_copy(&self, data: &[u8]) -> HostResult<RawValue>;
    fn buffer_data(&self, buffer: RawValue, f: &mut dyn FnMut(&mut [u8])) -> HostResult<()>;
    fn create_arraybuffer(&self, length: usize) -> HostResult<RawValue>;
    /// Takes the bytes out of `data` on success; on failure they stay put.
    /// Taken bytes are dropped when the buffer is collected.
    fn create_external_arraybuffer(&self, data: &mut Vec<u8>) -> HostResult<RawValue>;
    fn arraybuffer_data(
        &self,
        arraybuffer: RawValue,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> HostResult<()>;
    fn detach_arraybuffer(&self, arraybuffer: RawValue) -> HostResult<()>;
    fn is_detached_arraybuffer(&self, arraybuffer: RawValue) -> HostResult<bool>;
    fn create_typedarray(
        &self,
        kind: TypedArrayKind,
        length: usize,
        arraybuffer: RawValue,
        byte_offset: usize,
    ) -> HostResult<RawValue>;
    fn get_typedarray_info(&self, typedarray: RawValue) -> HostResult<TypedArrayInfo>;
    fn create_dataview(
        &self,
        byte_length: usize,
        arraybuffer: RawValue,
        byte_offset: usize,
    ) -> HostResult<RawValue>;
    fn get_dataview_info(&self, dataview: RawValue) -> HostResult<DataViewInfo>;

    // Dates.
    fn create_date(&self, epoch_ms: f64) -> HostResult<RawValue>;
    fn get_date_value(&self, date: RawValue) -> HostResult<f64>;

    // Promises.
    fn create_promise(&self) -> HostResult<(RawDeferred, RawValue)>;
    fn resolve_deferred(&self, deferred: RawDeferred, value: RawValue) -> HostResult<()>;
    fn reject_deferred(&self, deferred: RawDeferred, value: RawValue) -> HostResult<()>;

    // Native data attached to JS values.
    fn create_external(&self, data: NativeObject) -> HostResult<RawValue>;
    fn get_value_external(&self, value: RawValue) -> HostResult<NativeObject>;
    fn wrap(&self, object: RawValue, data: NativeObject) -> HostResult<()>;
    fn unwrap(&self, object: RawValue) -> HostResult<NativeObject>;
    fn remove_wrap(&self, object: RawValue) -> HostResult<NativeObject>;
    fn set_instance_data(&self, data: NativeObject) -> HostResult<()>;
    fn get_instance_data(&self) -> HostResult<Option<NativeObject>>;

    // References and scopes.
    fn create_reference(&self, value: RawValue, initial_refcount: u32) -> HostResult<RawRef>;
    fn delete_reference(&self, reference: RawRef) -> HostResult<()>;
    fn reference_ref(&self, reference: RawRef) -> HostResult<u32>;
    fn reference_unref(&self, reference: RawRef) -> HostResult<u32>;
    /// `None` once a weak reference's target has been collected.
    fn get_reference_value(&self, reference: RawRef) -> HostResult<Option<RawValue>>;
    fn open_handle_scope(&self) -> HostResult<RawHandleScope>;
    fn close_handle_scope(&self, scope: RawHandleScope) -> HostResult<()>;

    // Versions.
    fn get_version(&self) -> HostResult<u32>;
    fn get_node_version(&self) -> HostResult<NodeVersion>;

    // Async work.
    fn create_async_work(
        &self,
        name: &str,
        execute: AsyncExecute,
        complete: AsyncComplete,
    ) -> HostResult<RawAsyncWork>;
    fn queue_async_work(&self, work: RawAsyncWork) -> HostResult<()>;
    /// Fails with `GenericFailure` once execution has started.
    fn cancel_async_work(&self, work: RawAsyncWork) -> HostResult<()>;

    // Thread-safe functions.
    fn create_threadsafe_function(
        &self,
        function: Option<RawValue>,
        name: &str,
        max_queue_size: usize,
        initial_thread_count: usize,
        call_js: RawTsfnCallJs,
        finalize: Option<RawTsfnFinalize>,
    ) -> HostResult<Arc<dyn RawThreadsafeFunction>>;
    fn ref_threadsafe_function(&self, function: &dyn RawThreadsafeFunction) -> HostResult<()>;
    fn unref_threadsafe_function(&self, function: &dyn RawThreadsafeFunction)
        -> HostResult<()>;
}
