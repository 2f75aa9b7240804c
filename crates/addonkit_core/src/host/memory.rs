//! In-process `Host` implementation.
//!
//! # Responsibility
//! - Model enough of a JS engine to exercise every library path without a
//!   Node process: ordered object properties, prototypes, accessors, arrays
//!   with holes, buffers, promises, exceptions, references, async work and
//!   thread-safe function queues.
//! - Mirror Node-API status and exception behaviour where callers can
//!   observe it (`napi_pending_exception` after a thrown `RangeError`,
//!   `napi_queue_full`, `napi_closing`, ...).
//!
//! # Invariants
//! - Values are never freed before the host is dropped; `collect` only
//!   simulates collection for weak references and wrap finalizers.
//! - No `RefCell` borrow is held while user callbacks run.
//! - Background work executes on a real worker thread; completions and
//!   thread-safe calls only run inside `run_until_idle`.

use super::{
    AsyncComplete, AsyncExecute, DataViewInfo, Host, HostResult, NativeObject, RawAsyncWork,
    RawCallFrame, RawCallback, RawDeferred, RawHandleScope, RawProperty, RawPropertyValue,
    RawRef, RawThreadsafeFunction, RawTsfnCallJs, RawTsfnFinalize, RawValue, TsfnPayload,
    TypedArrayInfo,
};
use crate::status::{ExtendedErrorInfo, Status};
use crate::types::{
    CallMode, NodeVersion, PropertyAttributes, ReleaseMode, TypedArrayKind, ValueKind,
};
use chrono::{DateTime, SecondsFormat};
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex};

const DEFAULT_NAPI_VERSION: u32 = 9;
const DISPLAY_DEPTH: usize = 8;

/// Settlement state of a promise created by `create_promise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled(RawValue),
    Rejected(RawValue),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PropKey {
    Str(String),
    Symbol(RawValue),
}

enum PropSlot {
    Data(RawValue),
    Accessor {
        getter: Option<RawCallback>,
        setter: Option<RawCallback>,
    },
}

struct Property {
    slot: PropSlot,
    attributes: PropertyAttributes,
}

struct ArrayBufferData {
    bytes: Rc<RefCell<Vec<u8>>>,
    detached: bool,
}

/// Array elements keyed by index. Holes take no space, so `new Array(n)`
/// is cheap for any `n`.
#[derive(Default)]
struct ArrayItems {
    length: usize,
    present: BTreeMap<usize, RawValue>,
}

impl ArrayItems {
    fn with_length(length: usize) -> Self {
        Self {
            length,
            present: BTreeMap::new(),
        }
    }

    fn from_values(values: Vec<RawValue>) -> Self {
        Self {
            length: values.len(),
            present: values.into_iter().enumerate().collect(),
        }
    }

    fn len(&self) -> usize {
        self.length
    }

    fn get(&self, index: usize) -> Option<RawValue> {
        self.present.get(&index).copied()
    }

    fn set(&mut self, index: usize, value: RawValue) {
        self.length = self.length.max(index + 1);
        self.present.insert(index, value);
    }

    fn clear(&mut self, index: usize) {
        self.present.remove(&index);
    }

    fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.present.keys().copied()
    }
}

enum ObjectKind {
    Plain,
    Array(ArrayItems),
    Function {
        name: String,
        callback: RawCallback,
    },
    Error,
    Date(f64),
    Promise(PromiseState),
    ArrayBuffer(ArrayBufferData),
    TypedArray {
        kind: TypedArrayKind,
        buffer: RawValue,
        byte_offset: usize,
        length: usize,
        node_buffer: bool,
    },
    DataView {
        buffer: RawValue,
        byte_offset: usize,
        byte_length: usize,
    },
}

struct ObjectData {
    kind: ObjectKind,
    props: IndexMap<PropKey, Property>,
    proto: Option<RawValue>,
    wrapped: Option<NativeObject>,
    frozen: bool,
    sealed: bool,
}

impl ObjectData {
    fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            props: IndexMap::new(),
            proto: None,
            wrapped: None,
            frozen: false,
            sealed: false,
        }
    }
}

enum Slot {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    Symbol(Option<String>),
    External(NativeObject),
    Object(ObjectData),
}

struct RefEntry {
    value: RawValue,
    count: u32,
}

#[derive(Default)]
struct State {
    slots: Vec<Slot>,
    pending: Option<RawValue>,
    deferreds: HashMap<usize, RawValue>,
    references: HashMap<usize, RefEntry>,
    collected: HashSet<RawValue>,
    scopes: Vec<usize>,
    instance_data: Option<NativeObject>,
}

impl State {
    fn alloc(&mut self, slot: Slot) -> RawValue {
        self.slots.push(slot);
        RawValue::from_usize(self.slots.len())
    }

    fn get(&self, raw: RawValue) -> Option<&Slot> {
        raw.as_usize()
            .checked_sub(1)
            .and_then(|index| self.slots.get(index))
    }

    fn get_mut(&mut self, raw: RawValue) -> Option<&mut Slot> {
        raw.as_usize()
            .checked_sub(1)
            .and_then(|index| self.slots.get_mut(index))
    }

    fn object(&self, raw: RawValue) -> Option<&ObjectData> {
        match self.get(raw) {
            Some(Slot::Object(object)) => Some(object),
            _ => None,
        }
    }

    fn object_mut(&mut self, raw: RawValue) -> Option<&mut ObjectData> {
        match self.get_mut(raw) {
            Some(Slot::Object(object)) => Some(object),
            _ => None,
        }
    }

    fn alloc_object(&mut self, kind: ObjectKind) -> RawValue {
        self.alloc(Slot::Object(ObjectData::new(kind)))
    }
}

enum Lookup {
    Value(RawValue),
    Number(f64),
    Getter(Option<RawCallback>),
    Missing,
}

struct WorkItem {
    name: String,
    execute: Option<AsyncExecute>,
    complete: Option<AsyncComplete>,
    queued: bool,
}

#[derive(Default)]
struct WorkQueue {
    items: HashMap<usize, WorkItem>,
    queue: VecDeque<usize>,
    cancelled: VecDeque<usize>,
}

struct TsfnQueue {
    items: VecDeque<TsfnPayload>,
    threads: usize,
    closing: bool,
}

struct TsfnShared {
    id: usize,
    max_queue_size: usize,
    queue: Mutex<TsfnQueue>,
    space: Condvar,
}

impl RawThreadsafeFunction for TsfnShared {
    fn call(&self, payload: TsfnPayload, mode: CallMode) -> HostResult<()> {
        let mut queue = self.queue.lock().map_err(|_| Status::GenericFailure)?;
        loop {
            if queue.closing {
                return Err(Status::Closing);
            }
            if self.max_queue_size == 0 || queue.items.len() < self.max_queue_size {
                break;
            }
            match mode {
                CallMode::NonBlocking => return Err(Status::QueueFull),
                CallMode::Blocking => {
                    queue = self
                        .space
                        .wait(queue)
                        .map_err(|_| Status::GenericFailure)?;
                }
            }
        }
        queue.items.push_back(payload);
        Ok(())
    }

    fn acquire(&self) -> HostResult<()> {
        let mut queue = self.queue.lock().map_err(|_| Status::GenericFailure)?;
        if queue.closing {
            return Err(Status::Closing);
        }
        queue.threads += 1;
        Ok(())
    }

    fn release(&self, mode: ReleaseMode) -> HostResult<()> {
        let mut queue = self.queue.lock().map_err(|_| Status::GenericFailure)?;
        if queue.threads == 0 {
            return Err(Status::InvalidArg);
        }
        queue.threads -= 1;
        if mode == ReleaseMode::Abort {
            queue.closing = true;
            queue.items.clear();
        }
        if queue.threads == 0 {
            queue.closing = true;
        }
        self.space.notify_all();
        Ok(())
    }

    fn handle(&self) -> usize {
        self.id
    }
}

type SharedCallJs = Rc<dyn Fn(&dyn Host, Option<RawValue>, TsfnPayload)>;

struct TsfnLocal {
    shared: Arc<TsfnShared>,
    function: Option<RawValue>,
    call_js: SharedCallJs,
    finalize: Option<RawTsfnFinalize>,
    referenced: bool,
}

/// Single-threaded in-memory JS environment.
pub struct MemoryHost {
    state: RefCell<State>,
    last_error: Cell<Status>,
    next_id: Cell<usize>,
    napi_version: u32,
    node_version: NodeVersion,
    external_buffers: Cell<bool>,
    works: RefCell<WorkQueue>,
    tsfns: RefCell<BTreeMap<usize, TsfnLocal>>,
    uncaught: RefCell<Vec<RawValue>>,
    undefined: RawValue,
    null: RawValue,
    true_value: RawValue,
    false_value: RawValue,
    global: RawValue,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        let mut state = State::default();
        let undefined = state.alloc(Slot::Undefined);
        let null = state.alloc(Slot::Null);
        let true_value = state.alloc(Slot::Boolean(true));
        let false_value = state.alloc(Slot::Boolean(false));
        let global = state.alloc_object(ObjectKind::Plain);
        Self {
            state: RefCell::new(state),
            last_error: Cell::new(Status::Ok),
            next_id: Cell::new(1),
            napi_version: DEFAULT_NAPI_VERSION,
            node_version: NodeVersion {
                major: 20,
                minor: 11,
                patch: 1,
                release: "node".to_string(),
            },
            external_buffers: Cell::new(true),
            works: RefCell::new(WorkQueue::default()),
            tsfns: RefCell::new(BTreeMap::new()),
            uncaught: RefCell::new(Vec::new()),
            undefined,
            null,
            true_value,
            false_value,
            global,
        }
    }

    pub fn with_napi_version(mut self, version: u32) -> Self {
        self.napi_version = version;
        self
    }

    pub fn with_node_version(mut self, version: NodeVersion) -> Self {
        self.node_version = version;
        self
    }

    /// Simulates runtimes (Electron) that refuse external array buffers.
    pub fn set_external_buffers_allowed(&self, allowed: bool) {
        self.external_buffers.set(allowed);
    }

    pub fn promise_state(&self, promise: RawValue) -> Option<PromiseState> {
        match self.state.borrow().object(promise).map(|object| &object.kind) {
            Some(ObjectKind::Promise(state)) => Some(*state),
            _ => None,
        }
    }

    /// Exceptions left pending by completions and thread-safe calls.
    pub fn take_uncaught_exceptions(&self) -> Vec<RawValue> {
        std::mem::take(&mut *self.uncaught.borrow_mut())
    }

    pub fn pending_async_work(&self) -> usize {
        let works = self.works.borrow();
        works.queue.len() + works.cancelled.len()
    }

    pub fn live_threadsafe_functions(&self) -> usize {
        self.tsfns.borrow().len()
    }

    pub fn is_threadsafe_function_referenced(&self, handle: usize) -> Option<bool> {
        self.tsfns.borrow().get(&handle).map(|local| local.referenced)
    }

    /// Simulates garbage collection of `value`.
    ///
    /// Returns `false` while a strong reference keeps the value alive. A
    /// collected object drops its wrapped native data and weak references
    /// to it start returning `None`.
    pub fn collect(&self, value: RawValue) -> bool {
        let released = {
            let mut state = self.state.borrow_mut();
            let strong = state
                .references
                .values()
                .any(|entry| entry.value == value && entry.count > 0);
            if strong {
                return false;
            }
            state.collected.insert(value);
            state.object_mut(value).and_then(|object| object.wrapped.take())
        };
        drop(released);
        true
    }

    /// Runs queued async work, cancelled completions and thread-safe calls
    /// until nothing is left to dispatch. Returns the number of dispatched
    /// callbacks.
    pub fn run_until_idle(&self) -> usize {
        let mut dispatched = 0;
        loop {
            let mut progressed = false;
            while let Some(complete) = self.next_cancelled() {
                complete(self, Status::Cancelled);
                self.settle_uncaught();
                dispatched += 1;
                progressed = true;
            }
            if let Some((name, execute, complete)) = self.next_work() {
                let status = match execute {
                    Some(execute) => run_on_worker(name, execute),
                    None => Status::Ok,
                };
                if let Some(complete) = complete {
                    complete(self, status);
                    self.settle_uncaught();
                }
                dispatched += 1;
                progressed = true;
            }
            let calls = self.drain_threadsafe_functions();
            if calls > 0 {
                dispatched += calls;
                progressed = true;
            }
            if !progressed {
                return dispatched;
            }
        }
    }

    fn next_cancelled(&self) -> Option<AsyncComplete> {
        let mut works = self.works.borrow_mut();
        let id = works.cancelled.pop_front()?;
        works.items.remove(&id).and_then(|item| item.complete)
    }

    fn next_work(&self) -> Option<(String, Option<AsyncExecute>, Option<AsyncComplete>)> {
        let mut works = self.works.borrow_mut();
        let id = works.queue.pop_front()?;
        let item = works.items.remove(&id)?;
        Some((item.name, item.execute, item.complete))
    }

    fn drain_threadsafe_functions(&self) -> usize {
        let ids: Vec<usize> = self.tsfns.borrow().keys().copied().collect();
        let mut dispatched = 0;
        for id in ids {
            loop {
                let (shared, call_js, function) = {
                    let tsfns = self.tsfns.borrow();
                    let Some(local) = tsfns.get(&id) else {
                        break;
                    };
                    (local.shared.clone(), local.call_js.clone(), local.function)
                };
                let (item, finished) = {
                    let Ok(mut queue) = shared.queue.lock() else {
                        break;
                    };
                    let item = queue.items.pop_front();
                    shared.space.notify_all();
                    (item, queue.closing && queue.items.is_empty())
                };
                match item {
                    Some(payload) => {
                        call_js(self, function, payload);
                        self.settle_uncaught();
                        dispatched += 1;
                    }
                    None => {
                        if finished {
                            let local = self.tsfns.borrow_mut().remove(&id);
                            if let Some(finalize) = local.and_then(|local| local.finalize) {
                                finalize(self);
                                self.settle_uncaught();
                            }
                        }
                        break;
                    }
                }
            }
        }
        dispatched
    }

    fn settle_uncaught(&self) {
        let pending = self.state.borrow_mut().pending.take();
        if let Some(exception) = pending {
            self.uncaught.borrow_mut().push(exception);
        }
    }

    fn next_handle(&self) -> usize {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn err<T>(&self, status: Status) -> HostResult<T> {
        self.last_error.set(status);
        Err(status)
    }

    fn alloc(&self, slot: Slot) -> RawValue {
        self.state.borrow_mut().alloc(slot)
    }

    fn alloc_object(&self, kind: ObjectKind) -> RawValue {
        self.state.borrow_mut().alloc_object(kind)
    }

    fn require_object(&self, raw: RawValue) -> HostResult<()> {
        let state = self.state.borrow();
        match state.get(raw) {
            Some(Slot::Object(_)) => Ok(()),
            Some(_) => self.err(Status::ObjectExpected),
            None => self.err(Status::InvalidArg),
        }
    }

    fn with_object_kind<R>(
        &self,
        raw: RawValue,
        missing: Status,
        f: impl FnOnce(&ObjectKind) -> Option<R>,
    ) -> HostResult<R> {
        let result = {
            let state = self.state.borrow();
            state.object(raw).and_then(|object| f(&object.kind))
        };
        match result {
            Some(value) => Ok(value),
            None => self.err(missing),
        }
    }

    fn object_flag(&self, raw: RawValue, f: impl FnOnce(&ObjectKind) -> bool) -> HostResult<bool> {
        let state = self.state.borrow();
        match state.get(raw) {
            Some(Slot::Object(object)) => Ok(f(&object.kind)),
            Some(_) => Ok(false),
            None => self.err(Status::InvalidArg),
        }
    }

    fn property_key(&self, key: RawValue) -> HostResult<PropKey> {
        let state = self.state.borrow();
        match state.get(key) {
            Some(Slot::String(name)) => Ok(PropKey::Str(name.clone())),
            Some(Slot::Symbol(_)) => Ok(PropKey::Symbol(key)),
            Some(Slot::Number(number)) => Ok(PropKey::Str(number_to_string(*number))),
            Some(_) => self.err(Status::NameExpected),
            None => self.err(Status::InvalidArg),
        }
    }

    fn lookup(&self, object: RawValue, key: &PropKey) -> HostResult<Lookup> {
        let state = self.state.borrow();
        if state.object(object).is_none() {
            return self.err(Status::ObjectExpected);
        }
        let mut current = Some(object);
        while let Some(raw) = current {
            let Some(data) = state.object(raw) else {
                break;
            };
            if let (ObjectKind::Array(items), PropKey::Str(name)) = (&data.kind, key) {
                if name == "length" {
                    return Ok(Lookup::Number(items.len() as f64));
                }
                if let Some(index) = array_index(name) {
                    return Ok(match items.get(index) {
                        Some(value) => Lookup::Value(value),
                        None => Lookup::Missing,
                    });
                }
            }
            if let Some(property) = data.props.get(key) {
                return Ok(match &property.slot {
                    PropSlot::Data(value) => Lookup::Value(*value),
                    PropSlot::Accessor { getter, .. } => Lookup::Getter(getter.clone()),
                });
            }
            current = data.proto;
        }
        Ok(Lookup::Missing)
    }

    fn get_by_key(&self, object: RawValue, key: &PropKey) -> HostResult<RawValue> {
        match self.lookup(object, key)? {
            Lookup::Value(value) => Ok(value),
            Lookup::Number(number) => self.create_double(number),
            Lookup::Getter(Some(getter)) => self.invoke(&getter, object, Vec::new(), None),
            Lookup::Getter(None) | Lookup::Missing => Ok(self.undefined),
        }
    }

    fn has_by_key(&self, object: RawValue, key: &PropKey) -> HostResult<bool> {
        Ok(!matches!(self.lookup(object, key)?, Lookup::Missing))
    }

    fn set_by_key(&self, object: RawValue, key: PropKey, value: RawValue) -> HostResult<()> {
        let setter = {
            let mut state = self.state.borrow_mut();
            if state.object(object).is_none() {
                return self.err(Status::ObjectExpected);
            }
            match find_setter(&state, object, &key) {
                Some(setter) => setter,
                None => {
                    if let Some(data) = state.object_mut(object) {
                        assign(data, key, value);
                    }
                    return Ok(());
                }
            }
        };
        if let Some(setter) = setter {
            self.invoke(&setter, object, vec![value], None)?;
        }
        Ok(())
    }

    fn delete_by_key(&self, object: RawValue, key: &PropKey) -> HostResult<bool> {
        let mut state = self.state.borrow_mut();
        let Some(data) = state.object_mut(object) else {
            return self.err(Status::ObjectExpected);
        };
        if data.frozen || data.sealed {
            return Ok(false);
        }
        if let (ObjectKind::Array(items), PropKey::Str(name)) = (&mut data.kind, key) {
            if let Some(index) = array_index(name) {
                items.clear(index);
                return Ok(true);
            }
        }
        match data.props.get(key) {
            Some(property) if !property.attributes.contains(PropertyAttributes::CONFIGURABLE) => {
                Ok(false)
            }
            Some(_) => {
                data.props.shift_remove(key);
                Ok(true)
            }
            None => Ok(true),
        }
    }

    fn invoke(
        &self,
        callback: &RawCallback,
        this: RawValue,
        args: Vec<RawValue>,
        new_target: Option<RawValue>,
    ) -> HostResult<RawValue> {
        let frame = RawCallFrame {
            this,
            args,
            new_target,
        };
        let result = callback(self, &frame);
        if self.state.borrow().pending.is_some() {
            return self.err(Status::PendingException);
        }
        Ok(result.unwrap_or(self.undefined))
    }

    fn function_callback(&self, function: RawValue) -> HostResult<RawCallback> {
        self.with_object_kind(function, Status::FunctionExpected, |kind| match kind {
            ObjectKind::Function { callback, .. } => Some(callback.clone()),
            _ => None,
        })
    }

    fn string_value(&self, raw: RawValue) -> HostResult<String> {
        match self.state.borrow().get(raw) {
            Some(Slot::String(value)) => Ok(value.clone()),
            Some(_) => self.err(Status::StringExpected),
            None => self.err(Status::InvalidArg),
        }
    }

    fn number_value(&self, raw: RawValue) -> HostResult<f64> {
        match self.state.borrow().get(raw) {
            Some(Slot::Number(value)) => Ok(*value),
            Some(_) => self.err(Status::NumberExpected),
            None => self.err(Status::InvalidArg),
        }
    }

    fn bigint_value(&self, raw: RawValue) -> HostResult<i128> {
        match self.state.borrow().get(raw) {
            Some(Slot::BigInt(value)) => Ok(*value),
            Some(_) => self.err(Status::BigintExpected),
            None => self.err(Status::InvalidArg),
        }
    }

    fn make_error(
        &self,
        name: &str,
        code: Option<RawValue>,
        message: RawValue,
    ) -> HostResult<RawValue> {
        self.string_value(message)?;
        if let Some(code) = code {
            self.string_value(code)?;
        }
        let hidden = PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE;
        let name = self.create_string_utf8(name)?;
        let mut state = self.state.borrow_mut();
        let error = state.alloc_object(ObjectKind::Error);
        if let Some(data) = state.object_mut(error) {
            insert_data(data, "message", message, hidden);
            insert_data(data, "name", name, hidden);
            if let Some(code) = code {
                insert_data(data, "code", code, PropertyAttributes::DEFAULT_JSPROPERTY);
            }
        }
        Ok(error)
    }

    fn throw_new(
        &self,
        name: &str,
        code: Option<&str>,
        message: &str,
    ) -> HostResult<()> {
        let code = match code {
            Some(code) => Some(self.create_string_utf8(code)?),
            None => None,
        };
        let message = self.create_string_utf8(message)?;
        let error = self.make_error(name, code, message)?;
        self.throw(error)
    }

    /// Throws a `RangeError` the way the engine does for invalid views and
    /// reports `napi_pending_exception`.
    fn range_failure<T>(&self, code: &str, message: &str) -> HostResult<T> {
        self.throw_range_error(Some(code), message)?;
        self.err(Status::PendingException)
    }

    fn arraybuffer_len(&self, arraybuffer: RawValue) -> HostResult<usize> {
        self.with_object_kind(arraybuffer, Status::InvalidArg, |kind| match kind {
            ObjectKind::ArrayBuffer(data) => Some(data.bytes.borrow().len()),
            _ => None,
        })
    }

    fn arraybuffer_bytes(&self, arraybuffer: RawValue) -> Option<Rc<RefCell<Vec<u8>>>> {
        match self.state.borrow().object(arraybuffer).map(|object| &object.kind) {
            Some(ObjectKind::ArrayBuffer(data)) => Some(data.bytes.clone()),
            _ => None,
        }
    }

    fn display(&self, raw: RawValue, depth: usize) -> HostResult<String> {
        let state = self.state.borrow();
        let Some(slot) = state.get(raw) else {
            return self.err(Status::InvalidArg);
        };
        let text = match slot {
            Slot::Undefined => "undefined".to_string(),
            Slot::Null => "null".to_string(),
            Slot::Boolean(value) => value.to_string(),
            Slot::Number(value) => number_to_string(*value),
            Slot::BigInt(value) => value.to_string(),
            Slot::String(value) => value.clone(),
            Slot::Symbol(_) => {
                drop(state);
                self.throw_new(
                    "TypeError",
                    None,
                    "Cannot convert a Symbol value to a string",
                )?;
                return self.err(Status::PendingException);
            }
            Slot::External(_) => "[object Object]".to_string(),
            Slot::Object(object) => match &object.kind {
                ObjectKind::Plain => "[object Object]".to_string(),
                ObjectKind::Function { name, .. } => {
                    format!("function {name}() {{ [native code] }}")
                }
                ObjectKind::Date(ms) => date_to_string(*ms),
                ObjectKind::Promise(_) => "[object Promise]".to_string(),
                ObjectKind::ArrayBuffer(_) => "[object ArrayBuffer]".to_string(),
                ObjectKind::DataView { .. } => "[object DataView]".to_string(),
                ObjectKind::TypedArray { kind, .. } => format!("[object {}]", kind.js_name()),
                ObjectKind::Error => {
                    let field = |name: &str| match object.props.get(&PropKey::Str(name.to_string()))
                    {
                        Some(Property {
                            slot: PropSlot::Data(value),
                            ..
                        }) => match state.get(*value) {
                            Some(Slot::String(text)) => text.clone(),
                            _ => String::new(),
                        },
                        _ => String::new(),
                    };
                    let name = field("name");
                    let message = field("message");
                    if message.is_empty() {
                        name
                    } else {
                        format!("{name}: {message}")
                    }
                }
                ObjectKind::Array(items) => {
                    if depth == 0 {
                        return Ok(String::new());
                    }
                    let items: Vec<Option<RawValue>> =
                        (0..items.len()).map(|index| items.get(index)).collect();
                    drop(state);
                    let mut parts = Vec::with_capacity(items.len());
                    for item in items {
                        let nullish = match item {
                            Some(value) => matches!(
                                self.state.borrow().get(value),
                                Some(Slot::Undefined) | Some(Slot::Null)
                            ),
                            None => true,
                        };
                        parts.push(match item {
                            Some(value) if !nullish => self.display(value, depth - 1)?,
                            _ => String::new(),
                        });
                    }
                    return Ok(parts.join(","));
                }
            },
        };
        Ok(text)
    }
}

fn run_on_worker(name: String, execute: AsyncExecute) -> Status {
    match std::thread::Builder::new().name(name).spawn(execute) {
        Ok(handle) => match handle.join() {
            Ok(()) => Status::Ok,
            Err(_) => Status::GenericFailure,
        },
        Err(_) => Status::GenericFailure,
    }
}

fn array_index(key: &str) -> Option<usize> {
    let index = key.parse::<u32>().ok().filter(|index| *index != u32::MAX)?;
    (index.to_string() == key).then_some(index as usize)
}

fn find_setter(state: &State, object: RawValue, key: &PropKey) -> Option<Option<RawCallback>> {
    let mut current = Some(object);
    while let Some(raw) = current {
        let data = state.object(raw)?;
        if let Some(property) = data.props.get(key) {
            return match &property.slot {
                PropSlot::Accessor { setter, .. } => Some(setter.clone()),
                PropSlot::Data(_) => None,
            };
        }
        current = data.proto;
    }
    None
}

fn assign(data: &mut ObjectData, key: PropKey, value: RawValue) {
    if data.frozen {
        return;
    }
    if let (ObjectKind::Array(items), PropKey::Str(name)) = (&mut data.kind, &key) {
        if let Some(index) = array_index(name) {
            if index >= items.len() && data.sealed {
                return;
            }
            items.set(index, value);
            return;
        }
    }
    if let Some(property) = data.props.get_mut(&key) {
        if property.attributes.contains(PropertyAttributes::WRITABLE) {
            property.slot = PropSlot::Data(value);
        }
        return;
    }
    if data.sealed {
        return;
    }
    data.props.insert(
        key,
        Property {
            slot: PropSlot::Data(value),
            attributes: PropertyAttributes::DEFAULT_JSPROPERTY,
        },
    );
}

fn insert_data(data: &mut ObjectData, name: &str, value: RawValue, attributes: PropertyAttributes) {
    data.props.insert(
        PropKey::Str(name.to_string()),
        Property {
            slot: PropSlot::Data(value),
            attributes,
        },
    );
}

fn number_to_string(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e21 {
        return format!("{}", value as i128);
    }
    format!("{value}")
}

fn date_to_string(ms: f64) -> String {
    if !ms.is_finite() {
        return "Invalid Date".to_string();
    }
    match DateTime::from_timestamp_millis(ms as i64) {
        Some(date) => date.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => "Invalid Date".to_string(),
    }
}

fn engine_message(status: Status) -> Option<&'static str> {
    Some(match status {
        Status::Ok => return None,
        Status::InvalidArg => "Invalid argument",
        Status::ObjectExpected => "An object was expected",
        Status::StringExpected => "A string was expected",
        Status::NameExpected => "A string or symbol was expected",
        Status::FunctionExpected => "A function was expected",
        Status::NumberExpected => "A number was expected",
        Status::BooleanExpected => "A boolean was expected",
        Status::ArrayExpected => "An array was expected",
        Status::GenericFailure => "Unknown failure",
        Status::PendingException => "An exception is pending",
        Status::Cancelled => "The async work item was cancelled",
        Status::EscapeCalledTwice => "napi_escape_handle already called on scope",
        Status::HandleScopeMismatch => "Invalid handle scope usage",
        Status::CallbackScopeMismatch => "Invalid callback scope usage",
        Status::QueueFull => "Thread-safe function queue is full",
        Status::Closing => "Thread-safe function handle is closing",
        Status::BigintExpected => "A bigint was expected",
        Status::DateExpected => "A date was expected",
        Status::ArraybufferExpected => "An arraybuffer was expected",
        Status::DetachableArraybufferExpected => "A detachable arraybuffer was expected",
        Status::WouldDeadlock => "Main thread would deadlock",
        Status::NoExternalBuffersAllowed => "External buffers are not allowed",
        Status::CannotRunJs => "Cannot run JavaScript",
        Status::Unknown(_) => return None,
    })
}

/// ECMAScript `ToInt32` / `ToUint32` truncation.
fn wrap_to_u32(value: f64) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    value.trunc().rem_euclid(4_294_967_296.0) as u32
}

impl Host for MemoryHost {
    fn get_undefined(&self) -> HostResult<RawValue> {
        Ok(self.undefined)
    }

    fn get_null(&self) -> HostResult<RawValue> {
        Ok(self.null)
    }

    fn get_global(&self) -> HostResult<RawValue> {
        Ok(self.global)
    }

    fn get_boolean(&self, value: bool) -> HostResult<RawValue> {
        Ok(if value {
            self.true_value
        } else {
            self.false_value
        })
    }

    fn type_of(&self, value: RawValue) -> HostResult<ValueKind> {
        let state = self.state.borrow();
        let kind = match state.get(value) {
            Some(Slot::Undefined) => ValueKind::Undefined,
            Some(Slot::Null) => ValueKind::Null,
            Some(Slot::Boolean(_)) => ValueKind::Boolean,
            Some(Slot::Number(_)) => ValueKind::Number,
            Some(Slot::BigInt(_)) => ValueKind::BigInt,
            Some(Slot::String(_)) => ValueKind::String,
            Some(Slot::Symbol(_)) => ValueKind::Symbol,
            Some(Slot::External(_)) => ValueKind::External,
            Some(Slot::Object(object)) => match object.kind {
                ObjectKind::Function { .. } => ValueKind::Function,
                _ => ValueKind::Object,
            },
            None => return self.err(Status::InvalidArg),
        };
        Ok(kind)
    }

    fn is_array(&self, value: RawValue) -> HostResult<bool> {
        self.object_flag(value, |kind| matches!(kind, ObjectKind::Array(_)))
    }

    fn is_arraybuffer(&self, value: RawValue) -> HostResult<bool> {
        self.object_flag(value, |kind| matches!(kind, ObjectKind::ArrayBuffer(_)))
    }

    fn is_buffer(&self, value: RawValue) -> HostResult<bool> {
        self.object_flag(value, |kind| {
            matches!(
                kind,
                ObjectKind::TypedArray {
                    node_buffer: true,
                    ..
                }
            )
        })
    }

    fn is_date(&self, value: RawValue) -> HostResult<bool> {
        self.object_flag(value, |kind| matches!(kind, ObjectKind::Date(_)))
    }

    fn is_dataview(&self, value: RawValue) -> HostResult<bool> {
        self.object_flag(value, |kind| matches!(kind, ObjectKind::DataView { .. }))
    }

    fn is_typedarray(&self, value: RawValue) -> HostResult<bool> {
        self.object_flag(value, |kind| matches!(kind, ObjectKind::TypedArray { .. }))
    }

    fn is_promise(&self, value: RawValue) -> HostResult<bool> {
        self.object_flag(value, |kind| matches!(kind, ObjectKind::Promise(_)))
    }

    fn is_error(&self, value: RawValue) -> HostResult<bool> {
        self.object_flag(value, |kind| matches!(kind, ObjectKind::Error))
    }

    fn strict_equals(&self, lhs: RawValue, rhs: RawValue) -> HostResult<bool> {
        let state = self.state.borrow();
        let (Some(left), Some(right)) = (state.get(lhs), state.get(rhs)) else {
            return self.err(Status::InvalidArg);
        };
        Ok(match (left, right) {
            (Slot::Undefined, Slot::Undefined) | (Slot::Null, Slot::Null) => true,
            (Slot::Boolean(a), Slot::Boolean(b)) => a == b,
            (Slot::Number(a), Slot::Number(b)) => a == b,
            (Slot::BigInt(a), Slot::BigInt(b)) => a == b,
            (Slot::String(a), Slot::String(b)) => a == b,
            _ => lhs == rhs,
        })
    }

    fn instance_of(&self, object: RawValue, constructor: RawValue) -> HostResult<bool> {
        self.function_callback(constructor)?;
        let prototype = match self.lookup(constructor, &PropKey::Str("prototype".to_string()))? {
            Lookup::Value(prototype) => prototype,
            _ => return Ok(false),
        };
        let state = self.state.borrow();
        let mut current = state.object(object).and_then(|data| data.proto);
        while let Some(raw) = current {
            if raw == prototype {
                return Ok(true);
            }
            current = state.object(raw).and_then(|data| data.proto);
        }
        Ok(false)
    }

    fn create_double(&self, value: f64) -> HostResult<RawValue> {
        Ok(self.alloc(Slot::Number(value)))
    }

    fn create_int32(&self, value: i32) -> HostResult<RawValue> {
        self.create_double(f64::from(value))
    }

    fn create_uint32(&self, value: u32) -> HostResult<RawValue> {
        self.create_double(f64::from(value))
    }

    fn create_int64(&self, value: i64) -> HostResult<RawValue> {
        self.create_double(value as f64)
    }

    fn get_value_double(&self, value: RawValue) -> HostResult<f64> {
        self.number_value(value)
    }

    fn get_value_int32(&self, value: RawValue) -> HostResult<i32> {
        Ok(wrap_to_u32(self.number_value(value)?) as i32)
    }

    fn get_value_uint32(&self, value: RawValue) -> HostResult<u32> {
        Ok(wrap_to_u32(self.number_value(value)?))
    }

    fn get_value_int64(&self, value: RawValue) -> HostResult<i64> {
        let number = self.number_value(value)?;
        if !number.is_finite() {
            return Ok(0);
        }
        Ok(number as i64)
    }

    fn get_value_bool(&self, value: RawValue) -> HostResult<bool> {
        match self.state.borrow().get(value) {
            Some(Slot::Boolean(flag)) => Ok(*flag),
            Some(_) => self.err(Status::BooleanExpected),
            None => self.err(Status::InvalidArg),
        }
    }

    fn create_bigint_int64(&self, value: i64) -> HostResult<RawValue> {
        Ok(self.alloc(Slot::BigInt(i128::from(value))))
    }

    fn create_bigint_uint64(&self, value: u64) -> HostResult<RawValue> {
        Ok(self.alloc(Slot::BigInt(i128::from(value))))
    }

    fn get_value_bigint_int64(&self, value: RawValue) -> HostResult<(i64, bool)> {
        let big = self.bigint_value(value)?;
        Ok((big as i64, i64::try_from(big).is_ok()))
    }

    fn get_value_bigint_uint64(&self, value: RawValue) -> HostResult<(u64, bool)> {
        let big = self.bigint_value(value)?;
        Ok((big as u64, u64::try_from(big).is_ok()))
    }

    fn create_string_utf8(&self, value: &str) -> HostResult<RawValue> {
        Ok(self.alloc(Slot::String(value.to_string())))
    }

    fn create_string_utf16(&self, value: &[u16]) -> HostResult<RawValue> {
        Ok(self.alloc(Slot::String(String::from_utf16_lossy(value))))
    }

    fn get_value_string_utf8(&self, value: RawValue) -> HostResult<String> {
        self.string_value(value)
    }

    fn get_value_string_utf16(&self, value: RawValue) -> HostResult<Vec<u16>> {
        Ok(self.string_value(value)?.encode_utf16().collect())
    }

    fn create_symbol(&self, description: Option<RawValue>) -> HostResult<RawValue> {
        let description = match description {
            Some(description) => Some(self.string_value(description)?),
            None => None,
        };
        Ok(self.alloc(Slot::Symbol(description)))
    }

    fn coerce_to_string(&self, value: RawValue) -> HostResult<RawValue> {
        let text = self.display(value, DISPLAY_DEPTH)?;
        self.create_string_utf8(&text)
    }

    fn create_object(&self) -> HostResult<RawValue> {
        Ok(self.alloc_object(ObjectKind::Plain))
    }

    fn get_property(&self, object: RawValue, key: RawValue) -> HostResult<RawValue> {
        let key = self.property_key(key)?;
        self.get_by_key(object, &key)
    }

    fn set_property(&self, object: RawValue, key: RawValue, value: RawValue) -> HostResult<()> {
        let key = self.property_key(key)?;
        self.set_by_key(object, key, value)
    }

    fn has_property(&self, object: RawValue, key: RawValue) -> HostResult<bool> {
        let key = self.property_key(key)?;
        self.has_by_key(object, &key)
    }

    fn has_own_property(&self, object: RawValue, key: RawValue) -> HostResult<bool> {
        let key = match self.state.borrow().get(key) {
            Some(Slot::String(name)) => PropKey::Str(name.clone()),
            Some(Slot::Symbol(_)) => PropKey::Symbol(key),
            Some(_) => return self.err(Status::NameExpected),
            None => return self.err(Status::InvalidArg),
        };
        let state = self.state.borrow();
        let Some(data) = state.object(object) else {
            return self.err(Status::ObjectExpected);
        };
        if let (ObjectKind::Array(items), PropKey::Str(name)) = (&data.kind, &key) {
            if name == "length" {
                return Ok(true);
            }
            if let Some(index) = array_index(name) {
                return Ok(items.get(index).is_some());
            }
        }
        Ok(data.props.contains_key(&key))
    }

    fn delete_property(&self, object: RawValue, key: RawValue) -> HostResult<bool> {
        let key = self.property_key(key)?;
        self.delete_by_key(object, &key)
    }

    fn get_named_property(&self, object: RawValue, name: &str) -> HostResult<RawValue> {
        self.get_by_key(object, &PropKey::Str(name.to_string()))
    }

    fn set_named_property(&self, object: RawValue, name: &str, value: RawValue) -> HostResult<()> {
        self.set_by_key(object, PropKey::Str(name.to_string()), value)
    }

    fn has_named_property(&self, object: RawValue, name: &str) -> HostResult<bool> {
        self.has_by_key(object, &PropKey::Str(name.to_string()))
    }

    fn get_property_names(&self, object: RawValue) -> HostResult<RawValue> {
        let names = {
            let state = self.state.borrow();
            if state.object(object).is_none() {
                return self.err(Status::ObjectExpected);
            }
            let mut names: Vec<String> = Vec::new();
            let mut seen = HashSet::new();
            let mut current = Some(object);
            while let Some(raw) = current {
                let Some(data) = state.object(raw) else {
                    break;
                };
                if let ObjectKind::Array(items) = &data.kind {
                    for index in items.indices() {
                        let name = index.to_string();
                        if seen.insert(name.clone()) {
                            names.push(name);
                        }
                    }
                }
                for (key, property) in &data.props {
                    if let PropKey::Str(name) = key {
                        if seen.insert(name.clone())
                            && property.attributes.contains(PropertyAttributes::ENUMERABLE)
                        {
                            names.push(name.clone());
                        }
                    }
                }
                current = data.proto;
            }
            names
        };
        let mut items = Vec::with_capacity(names.len());
        for name in names {
            items.push(self.create_string_utf8(&name)?);
        }
        Ok(self.alloc_object(ObjectKind::Array(ArrayItems::from_values(items))))
    }

    fn object_freeze(&self, object: RawValue) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        let Some(data) = state.object_mut(object) else {
            return self.err(Status::ObjectExpected);
        };
        data.frozen = true;
        data.sealed = true;
        Ok(())
    }

    fn object_seal(&self, object: RawValue) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        let Some(data) = state.object_mut(object) else {
            return self.err(Status::ObjectExpected);
        };
        data.sealed = true;
        Ok(())
    }

    fn define_properties(&self, object: RawValue, properties: Vec<RawProperty>) -> HostResult<()> {
        self.require_object(object)?;
        for property in properties {
            if property.name.is_empty() {
                return self.err(Status::NameExpected);
            }
            let slot = match property.value {
                RawPropertyValue::Method(callback) => {
                    PropSlot::Data(self.create_function(&property.name, callback)?)
                }
                RawPropertyValue::Accessor { getter, setter } => {
                    PropSlot::Accessor { getter, setter }
                }
                RawPropertyValue::Value(value) => PropSlot::Data(value),
            };
            let mut state = self.state.borrow_mut();
            if let Some(data) = state.object_mut(object) {
                data.props.insert(
                    PropKey::Str(property.name),
                    Property {
                        slot,
                        attributes: property.attributes,
                    },
                );
            }
        }
        Ok(())
    }

    fn create_array(&self) -> HostResult<RawValue> {
        Ok(self.alloc_object(ObjectKind::Array(ArrayItems::default())))
    }

    fn create_array_with_length(&self, length: usize) -> HostResult<RawValue> {
        Ok(self.alloc_object(ObjectKind::Array(ArrayItems::with_length(length))))
    }

    fn get_array_length(&self, array: RawValue) -> HostResult<u32> {
        self.with_object_kind(array, Status::ArrayExpected, |kind| match kind {
            ObjectKind::Array(items) => u32::try_from(items.len()).ok(),
            _ => None,
        })
    }

    fn get_element(&self, object: RawValue, index: u32) -> HostResult<RawValue> {
        self.get_by_key(object, &PropKey::Str(index.to_string()))
    }

    fn set_element(&self, object: RawValue, index: u32, value: RawValue) -> HostResult<()> {
        self.set_by_key(object, PropKey::Str(index.to_string()), value)
    }

    fn has_element(&self, object: RawValue, index: u32) -> HostResult<bool> {
        self.has_by_key(object, &PropKey::Str(index.to_string()))
    }

    fn delete_element(&self, object: RawValue, index: u32) -> HostResult<bool> {
        self.delete_by_key(object, &PropKey::Str(index.to_string()))
    }

    fn create_function(&self, name: &str, callback: RawCallback) -> HostResult<RawValue> {
        Ok(self.alloc_object(ObjectKind::Function {
            name: name.to_string(),
            callback,
        }))
    }

    fn call_function(
        &self,
        receiver: RawValue,
        function: RawValue,
        args: &[RawValue],
    ) -> HostResult<RawValue> {
        if self.state.borrow().pending.is_some() {
            return self.err(Status::PendingException);
        }
        let callback = self.function_callback(function)?;
        self.invoke(&callback, receiver, args.to_vec(), None)
    }

    fn new_instance(&self, constructor: RawValue, args: &[RawValue]) -> HostResult<RawValue> {
        if self.state.borrow().pending.is_some() {
            return self.err(Status::PendingException);
        }
        let callback = self.function_callback(constructor)?;
        let prototype = match self.lookup(constructor, &PropKey::Str("prototype".to_string()))? {
            Lookup::Value(prototype) if self.state.borrow().object(prototype).is_some() => {
                Some(prototype)
            }
            _ => None,
        };
        let instance = {
            let mut state = self.state.borrow_mut();
            let instance = state.alloc_object(ObjectKind::Plain);
            if let Some(data) = state.object_mut(instance) {
                data.proto = prototype;
            }
            instance
        };
        let result = self.invoke(&callback, instance, args.to_vec(), Some(constructor))?;
        if self.state.borrow().object(result).is_some() {
            Ok(result)
        } else {
            Ok(instance)
        }
    }

    fn define_class(
        &self,
        name: &str,
        constructor: RawCallback,
        properties: Vec<RawProperty>,
    ) -> HostResult<RawValue> {
        let class = self.create_function(name, constructor)?;
        let prototype = self.create_object()?;
        let hidden = PropertyAttributes::WRITABLE | PropertyAttributes::CONFIGURABLE;
        {
            let mut state = self.state.borrow_mut();
            if let Some(data) = state.object_mut(class) {
                insert_data(data, "prototype", prototype, PropertyAttributes::DEFAULT);
            }
            if let Some(data) = state.object_mut(prototype) {
                insert_data(data, "constructor", class, hidden);
            }
        }
        let (statics, members): (Vec<_>, Vec<_>) = properties
            .into_iter()
            .partition(|property| property.attributes.contains(PropertyAttributes::STATIC));
        self.define_properties(class, statics)?;
        self.define_properties(prototype, members)?;
        Ok(class)
    }

    fn create_error(&self, code: Option<RawValue>, message: RawValue) -> HostResult<RawValue> {
        self.make_error("Error", code, message)
    }

    fn create_type_error(
        &self,
        code: Option<RawValue>,
        message: RawValue,
    ) -> HostResult<RawValue> {
        self.make_error("TypeError", code, message)
    }

    fn create_range_error(
        &self,
        code: Option<RawValue>,
        message: RawValue,
    ) -> HostResult<RawValue> {
        self.make_error("RangeError", code, message)
    }

    fn throw(&self, error: RawValue) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        if state.get(error).is_none() {
            return self.err(Status::InvalidArg);
        }
        if state.pending.is_some() {
            return self.err(Status::PendingException);
        }
        state.pending = Some(error);
        Ok(())
    }

    fn throw_error(&self, code: Option<&str>, message: &str) -> HostResult<()> {
        self.throw_new("Error", code, message)
    }

    fn throw_type_error(&self, code: Option<&str>, message: &str) -> HostResult<()> {
        self.throw_new("TypeError", code, message)
    }

    fn throw_range_error(&self, code: Option<&str>, message: &str) -> HostResult<()> {
        self.throw_new("RangeError", code, message)
    }

    fn is_exception_pending(&self) -> HostResult<bool> {
        Ok(self.state.borrow().pending.is_some())
    }

    fn get_and_clear_last_exception(&self) -> HostResult<RawValue> {
        Ok(self.state.borrow_mut().pending.take().unwrap_or(self.undefined))
    }

    fn get_last_error_info(&self) -> HostResult<ExtendedErrorInfo> {
        let status = self.last_error.get();
        Ok(ExtendedErrorInfo {
            message: engine_message(status).map(str::to_string),
            status,
            engine_error_code: 0,
        })
    }

    fn create_buffer(&self, length: usize) -> HostResult<RawValue> {
        self.create_buffer_copy(&vec![0; length])
    }

    fn create_buffer_copy(&self, data: &[u8]) -> HostResult<RawValue> {
        let mut state = self.state.borrow_mut();
        let buffer = state.alloc_object(ObjectKind::ArrayBuffer(ArrayBufferData {
            bytes: Rc::new(RefCell::new(data.to_vec())),
            detached: false,
        }));
        Ok(state.alloc_object(ObjectKind::TypedArray {
            kind: TypedArrayKind::Uint8,
            buffer,
            byte_offset: 0,
            length: data.len(),
            node_buffer: true,
        }))
    }

    fn buffer_data(&self, buffer: RawValue, f: &mut dyn FnMut(&mut [u8])) -> HostResult<()> {
        let (arraybuffer, offset, length) =
            self.with_object_kind(buffer, Status::InvalidArg, |kind| match kind {
                ObjectKind::TypedArray {
                    buffer,
                    byte_offset,
                    length,
                    node_buffer: true,
                    ..
                } => Some((*buffer, *byte_offset, *length)),
                _ => None,
            })?;
        let Some(bytes) = self.arraybuffer_bytes(arraybuffer) else {
            return self.err(Status::InvalidArg);
        };
        let mut bytes = bytes.borrow_mut();
        match bytes.get_mut(offset..offset + length) {
            Some(window) => f(window),
            None => f(&mut []),
        }
        Ok(())
    }

    fn create_arraybuffer(&self, length: usize) -> HostResult<RawValue> {
        Ok(self.alloc_object(ObjectKind::ArrayBuffer(ArrayBufferData {
            bytes: Rc::new(RefCell::new(vec![0; length])),
            detached: false,
        })))
    }

    fn create_external_arraybuffer(&self, data: &mut Vec<u8>) -> HostResult<RawValue> {
        if !self.external_buffers.get() {
            return self.err(Status::NoExternalBuffersAllowed);
        }
        Ok(self.alloc_object(ObjectKind::ArrayBuffer(ArrayBufferData {
            bytes: Rc::new(RefCell::new(std::mem::take(data))),
            detached: false,
        })))
    }

    fn arraybuffer_data(
        &self,
        arraybuffer: RawValue,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> HostResult<()> {
        let Some(bytes) = self.arraybuffer_bytes(arraybuffer) else {
            return self.err(Status::InvalidArg);
        };
        f(&mut bytes.borrow_mut());
        Ok(())
    }

    fn detach_arraybuffer(&self, arraybuffer: RawValue) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        match state.object_mut(arraybuffer).map(|object| &mut object.kind) {
            Some(ObjectKind::ArrayBuffer(data)) => {
                data.detached = true;
                data.bytes.borrow_mut().clear();
                Ok(())
            }
            _ => self.err(Status::ArraybufferExpected),
        }
    }

    fn is_detached_arraybuffer(&self, arraybuffer: RawValue) -> HostResult<bool> {
        self.object_flag(arraybuffer, |kind| {
            matches!(kind, ObjectKind::ArrayBuffer(data) if data.detached)
        })
    }

    fn create_typedarray(
        &self,
        kind: TypedArrayKind,
        length: usize,
        arraybuffer: RawValue,
        byte_offset: usize,
    ) -> HostResult<RawValue> {
        let available = self.arraybuffer_len(arraybuffer)?;
        let element_size = kind.element_size();
        if byte_offset % element_size != 0 {
            let message = format!(
                "start offset of {} should be a multiple of {}",
                kind.js_name(),
                element_size
            );
            return self.range_failure("ERR_NAPI_INVALID_TYPEDARRAY_ALIGNMENT", &message);
        }
        let end = length
            .checked_mul(element_size)
            .and_then(|bytes| bytes.checked_add(byte_offset));
        if !matches!(end, Some(end) if end <= available) {
            return self.range_failure(
                "ERR_NAPI_INVALID_TYPEDARRAY_LENGTH",
                "Invalid typed array length",
            );
        }
        Ok(self.alloc_object(ObjectKind::TypedArray {
            kind,
            buffer: arraybuffer,
            byte_offset,
            length,
            node_buffer: false,
        }))
    }

    fn get_typedarray_info(&self, typedarray: RawValue) -> HostResult<TypedArrayInfo> {
        self.with_object_kind(typedarray, Status::InvalidArg, |kind| match kind {
            ObjectKind::TypedArray {
                kind,
                buffer,
                byte_offset,
                length,
                ..
            } => Some(TypedArrayInfo {
                kind: *kind,
                length: *length,
                arraybuffer: *buffer,
                byte_offset: *byte_offset,
            }),
            _ => None,
        })
    }

    fn create_dataview(
        &self,
        byte_length: usize,
        arraybuffer: RawValue,
        byte_offset: usize,
    ) -> HostResult<RawValue> {
        let available = self.arraybuffer_len(arraybuffer)?;
        if !matches!(byte_offset.checked_add(byte_length), Some(end) if end <= available) {
            return self.range_failure(
                "ERR_NAPI_INVALID_DATAVIEW_ARGS",
                "byte_offset + byte_length should be less than or equal to the size in bytes of the array passed in",
            );
        }
        Ok(self.alloc_object(ObjectKind::DataView {
            buffer: arraybuffer,
            byte_offset,
            byte_length,
        }))
    }

    fn get_dataview_info(&self, dataview: RawValue) -> HostResult<DataViewInfo> {
        self.with_object_kind(dataview, Status::InvalidArg, |kind| match kind {
            ObjectKind::DataView {
                buffer,
                byte_offset,
                byte_length,
            } => Some(DataViewInfo {
                byte_length: *byte_length,
                arraybuffer: *buffer,
                byte_offset: *byte_offset,
            }),
            _ => None,
        })
    }

    fn create_date(&self, epoch_ms: f64) -> HostResult<RawValue> {
        Ok(self.alloc_object(ObjectKind::Date(epoch_ms)))
    }

    fn get_date_value(&self, date: RawValue) -> HostResult<f64> {
        self.with_object_kind(date, Status::DateExpected, |kind| match kind {
            ObjectKind::Date(ms) => Some(*ms),
            _ => None,
        })
    }

    fn create_promise(&self) -> HostResult<(RawDeferred, RawValue)> {
        let id = self.next_handle();
        let mut state = self.state.borrow_mut();
        let promise = state.alloc_object(ObjectKind::Promise(PromiseState::Pending));
        state.deferreds.insert(id, promise);
        Ok((RawDeferred::from_usize(id), promise))
    }

    fn resolve_deferred(&self, deferred: RawDeferred, value: RawValue) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        let Some(promise) = state.deferreds.remove(&deferred.as_usize()) else {
            return self.err(Status::InvalidArg);
        };
        if let Some(data) = state.object_mut(promise) {
            data.kind = ObjectKind::Promise(PromiseState::Fulfilled(value));
        }
        Ok(())
    }

    fn reject_deferred(&self, deferred: RawDeferred, value: RawValue) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        let Some(promise) = state.deferreds.remove(&deferred.as_usize()) else {
            return self.err(Status::InvalidArg);
        };
        if let Some(data) = state.object_mut(promise) {
            data.kind = ObjectKind::Promise(PromiseState::Rejected(value));
        }
        Ok(())
    }

    fn create_external(&self, data: NativeObject) -> HostResult<RawValue> {
        Ok(self.alloc(Slot::External(data)))
    }

    fn get_value_external(&self, value: RawValue) -> HostResult<NativeObject> {
        match self.state.borrow().get(value) {
            Some(Slot::External(data)) => Ok(data.clone()),
            _ => self.err(Status::InvalidArg),
        }
    }

    fn wrap(&self, object: RawValue, data: NativeObject) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        let Some(target) = state.object_mut(object) else {
            return self.err(Status::ObjectExpected);
        };
        if target.wrapped.is_some() {
            return self.err(Status::InvalidArg);
        }
        target.wrapped = Some(data);
        Ok(())
    }

    fn unwrap(&self, object: RawValue) -> HostResult<NativeObject> {
        let state = self.state.borrow();
        match state.object(object).and_then(|target| target.wrapped.clone()) {
            Some(data) => Ok(data),
            None => self.err(Status::InvalidArg),
        }
    }

    fn remove_wrap(&self, object: RawValue) -> HostResult<NativeObject> {
        let mut state = self.state.borrow_mut();
        match state.object_mut(object).and_then(|target| target.wrapped.take()) {
            Some(data) => Ok(data),
            None => self.err(Status::InvalidArg),
        }
    }

    fn set_instance_data(&self, data: NativeObject) -> HostResult<()> {
        let previous = self.state.borrow_mut().instance_data.replace(data);
        drop(previous);
        Ok(())
    }

    fn get_instance_data(&self) -> HostResult<Option<NativeObject>> {
        Ok(self.state.borrow().instance_data.clone())
    }

    fn create_reference(&self, value: RawValue, initial_refcount: u32) -> HostResult<RawRef> {
        let referenceable = matches!(
            self.state.borrow().get(value),
            Some(Slot::Object(_)) | Some(Slot::External(_)) | Some(Slot::Symbol(_))
        );
        if !referenceable {
            return self.err(Status::InvalidArg);
        }
        let id = self.next_handle();
        self.state.borrow_mut().references.insert(
            id,
            RefEntry {
                value,
                count: initial_refcount,
            },
        );
        Ok(RawRef::from_usize(id))
    }

    fn delete_reference(&self, reference: RawRef) -> HostResult<()> {
        match self.state.borrow_mut().references.remove(&reference.as_usize()) {
            Some(_) => Ok(()),
            None => self.err(Status::InvalidArg),
        }
    }

    fn reference_ref(&self, reference: RawRef) -> HostResult<u32> {
        let mut state = self.state.borrow_mut();
        let Some(entry) = state.references.get_mut(&reference.as_usize()) else {
            return self.err(Status::InvalidArg);
        };
        entry.count += 1;
        Ok(entry.count)
    }

    fn reference_unref(&self, reference: RawRef) -> HostResult<u32> {
        let mut state = self.state.borrow_mut();
        let Some(entry) = state.references.get_mut(&reference.as_usize()) else {
            return self.err(Status::InvalidArg);
        };
        if entry.count == 0 {
            return self.err(Status::GenericFailure);
        }
        entry.count -= 1;
        Ok(entry.count)
    }

    fn get_reference_value(&self, reference: RawRef) -> HostResult<Option<RawValue>> {
        let state = self.state.borrow();
        let Some(entry) = state.references.get(&reference.as_usize()) else {
            return self.err(Status::InvalidArg);
        };
        if state.collected.contains(&entry.value) {
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    fn open_handle_scope(&self) -> HostResult<RawHandleScope> {
        let id = self.next_handle();
        self.state.borrow_mut().scopes.push(id);
        Ok(RawHandleScope::from_usize(id))
    }

    fn close_handle_scope(&self, scope: RawHandleScope) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        if state.scopes.last() != Some(&scope.as_usize()) {
            return self.err(Status::HandleScopeMismatch);
        }
        state.scopes.pop();
        Ok(())
    }

    fn get_version(&self) -> HostResult<u32> {
        Ok(self.napi_version)
    }

    fn get_node_version(&self) -> HostResult<NodeVersion> {
        Ok(self.node_version.clone())
    }

    fn create_async_work(
        &self,
        name: &str,
        execute: AsyncExecute,
        complete: AsyncComplete,
    ) -> HostResult<RawAsyncWork> {
        let id = self.next_handle();
        self.works.borrow_mut().items.insert(
            id,
            WorkItem {
                name: name.to_string(),
                execute: Some(execute),
                complete: Some(complete),
                queued: false,
            },
        );
        Ok(RawAsyncWork::from_usize(id))
    }

    fn queue_async_work(&self, work: RawAsyncWork) -> HostResult<()> {
        let mut works = self.works.borrow_mut();
        let id = work.as_usize();
        match works.items.get_mut(&id) {
            Some(item) if !item.queued => item.queued = true,
            _ => return self.err(Status::InvalidArg),
        }
        works.queue.push_back(id);
        Ok(())
    }

    fn cancel_async_work(&self, work: RawAsyncWork) -> HostResult<()> {
        let mut works = self.works.borrow_mut();
        let id = work.as_usize();
        let Some(position) = works.queue.iter().position(|queued| *queued == id) else {
            return self.err(Status::GenericFailure);
        };
        works.queue.remove(position);
        works.cancelled.push_back(id);
        Ok(())
    }

    fn create_threadsafe_function(
        &self,
        function: Option<RawValue>,
        _name: &str,
        max_queue_size: usize,
        initial_thread_count: usize,
        call_js: RawTsfnCallJs,
        finalize: Option<RawTsfnFinalize>,
    ) -> HostResult<Arc<dyn RawThreadsafeFunction>> {
        if initial_thread_count == 0 {
            return self.err(Status::InvalidArg);
        }
        if let Some(function) = function {
            self.function_callback(function)?;
        }
        let id = self.next_handle();
        let shared = Arc::new(TsfnShared {
            id,
            max_queue_size,
            queue: Mutex::new(TsfnQueue {
                items: VecDeque::new(),
                threads: initial_thread_count,
                closing: false,
            }),
            space: Condvar::new(),
        });
        self.tsfns.borrow_mut().insert(
            id,
            TsfnLocal {
                shared: shared.clone(),
                function,
                call_js: Rc::from(call_js),
                finalize,
                referenced: true,
            },
        );
        Ok(shared)
    }

    fn ref_threadsafe_function(&self, function: &dyn RawThreadsafeFunction) -> HostResult<()> {
        match self.tsfns.borrow_mut().get_mut(&function.handle()) {
            Some(local) => {
                local.referenced = true;
                Ok(())
            }
            None => self.err(Status::InvalidArg),
        }
    }

    fn unref_threadsafe_function(&self, function: &dyn RawThreadsafeFunction) -> HostResult<()> {
        match self.tsfns.borrow_mut().get_mut(&function.handle()) {
            Some(local) => {
                local.referenced = false;
                Ok(())
            }
            None => self.err(Status::InvalidArg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryHost, PromiseState};
    use crate::host::{Host, RawCallFrame, RawCallback, RawProperty, RawPropertyValue, RawValue};
    use crate::status::Status;
    use crate::types::{PropertyAttributes, TypedArrayKind, ValueKind};
    use std::rc::Rc;

    #[test]
    fn int32_reads_wrap_and_int64_saturates() {
        let host = MemoryHost::new();
        let big = host.create_double(4_294_967_297.5).expect("number");
        assert_eq!(host.get_value_int32(big).expect("int32"), 1);
        let huge = host.create_double(1e300).expect("number");
        assert_eq!(host.get_value_int64(huge).expect("int64"), i64::MAX);
        let nan = host.create_double(f64::NAN).expect("number");
        assert_eq!(host.get_value_int64(nan).expect("int64"), 0);
        assert_eq!(host.get_value_uint32(nan).expect("uint32"), 0);
    }

    #[test]
    fn properties_keep_insertion_order_and_skip_hidden_ones() {
        let host = MemoryHost::new();
        let object = host.create_object().expect("object");
        for name in ["b", "a", "c"] {
            let value = host.create_string_utf8(name).expect("string");
            host.set_named_property(object, name, value).expect("set");
        }
        let hidden = host.create_int32(1).expect("int");
        host.define_properties(
            object,
            vec![RawProperty {
                name: "secret".to_string(),
                value: RawPropertyValue::Value(hidden),
                attributes: PropertyAttributes::WRITABLE,
            }],
        )
        .expect("define");

        let names = host.get_property_names(object).expect("names");
        let mut collected = Vec::new();
        for index in 0..host.get_array_length(names).expect("len") {
            let name = host.get_element(names, index).expect("element");
            collected.push(host.get_value_string_utf8(name).expect("string"));
        }
        assert_eq!(collected, vec!["b", "a", "c"]);
    }

    #[test]
    fn typed_array_misalignment_throws_range_error() {
        let host = MemoryHost::new();
        let buffer = host.create_arraybuffer(16).expect("arraybuffer");
        let err = host
            .create_typedarray(TypedArrayKind::Int32, 2, buffer, 2)
            .expect_err("misaligned");
        assert_eq!(err, Status::PendingException);
        let exception = host.get_and_clear_last_exception().expect("exception");
        let text = host.coerce_to_string(exception).expect("string");
        assert_eq!(
            host.get_value_string_utf8(text).expect("utf8"),
            "RangeError: start offset of Int32Array should be a multiple of 4"
        );
    }

    #[test]
    fn accessors_run_callbacks_with_receiver() {
        let host = MemoryHost::new();
        let object = host.create_object().expect("object");
        let getter: RawCallback =
            Rc::new(|host: &dyn Host, _frame: &RawCallFrame| {
                host.create_string_utf8("computed").ok()
            });
        host.define_properties(
            object,
            vec![RawProperty {
                name: "value".to_string(),
                value: RawPropertyValue::Accessor {
                    getter: Some(getter),
                    setter: None,
                },
                attributes: PropertyAttributes::DEFAULT,
            }],
        )
        .expect("define");
        let value = host.get_named_property(object, "value").expect("get");
        assert_eq!(host.get_value_string_utf8(value).expect("utf8"), "computed");
    }

    #[test]
    fn deferred_settles_once() {
        let host = MemoryHost::new();
        let (deferred, promise) = host.create_promise().expect("promise");
        let value = host.create_int32(7).expect("int");
        host.resolve_deferred(deferred, value).expect("resolve");
        assert_eq!(host.promise_state(promise), Some(PromiseState::Fulfilled(value)));
        assert_eq!(
            host.reject_deferred(deferred, value),
            Err(Status::InvalidArg)
        );
        let info = host.get_last_error_info().expect("info");
        assert_eq!(info.message.as_deref(), Some("Invalid argument"));
    }

    #[test]
    fn functions_report_typeof_function() {
        let host = MemoryHost::new();
        let callback: RawCallback = Rc::new(|_host: &dyn Host, _frame: &RawCallFrame| -> Option<RawValue> { None });
        let function = host.create_function("noop", callback).expect("function");
        assert_eq!(host.type_of(function).expect("typeof"), ValueKind::Function);
        let global = host.get_global().expect("global");
        let result = host.call_function(global, function, &[]).expect("call");
        assert_eq!(host.type_of(result).expect("typeof"), ValueKind::Undefined);
    }
}
