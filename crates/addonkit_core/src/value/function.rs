//! JS functions backed by Rust closures.
//!
//! # Responsibility
//! - Expose call frames to native code as `CallContext`.
//! - Convert callback outcomes into JS semantics: `Err` and panics are
//!   thrown as `Error`, a returned `Error` object is thrown as-is.
//! - Call JS functions from Rust, surfacing thrown exceptions as
//!   `AddonError::Exception`.
//!
//! # Invariants
//! - No panic crosses a callback boundary.
//! - A callback never throws twice: an exception left pending by native
//!   code wins over the returned error.

use super::{JsObject, JsValue, TypedValue};
use crate::convert::{from_json_value, js_to_json, to_js};
use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::host::{Host, RawCallFrame, RawCallback, RawValue};
use crate::logging::{panic_message, sanitize_message, MAX_PANIC_PAYLOAD_CHARS};
use crate::types::{JsType, ValueKind};
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

js_value_type!(
    /// Callable JS value.
    JsFunction,
    JsType::Function,
    |value| super::kind_is(value, ValueKind::Function)
);
object_like!(JsFunction);

/// Native function body shared between JS functions, methods and accessors.
pub type Callback = Rc<dyn for<'a> Fn(&CallContext<'a>) -> AddonResult<JsValue<'a>>>;

/// Boxes a closure as a [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: for<'a> Fn(&CallContext<'a>) -> AddonResult<JsValue<'a>> + 'static,
{
    Rc::new(f)
}

/// Receiver and arguments of one native call.
pub struct CallContext<'h> {
    env: Env<'h>,
    this: JsValue<'h>,
    args: Vec<JsValue<'h>>,
    new_target: Option<JsValue<'h>>,
    undefined: JsValue<'h>,
}

impl<'h> CallContext<'h> {
    pub(crate) fn from_frame(env: Env<'h>, frame: &RawCallFrame) -> AddonResult<Self> {
        Ok(Self {
            env,
            this: env.value(frame.this),
            args: frame.args.iter().map(|raw| env.value(*raw)).collect(),
            new_target: frame.new_target.map(|raw| env.value(raw)),
            undefined: env.undefined()?,
        })
    }

    pub fn env(&self) -> Env<'h> {
        self.env
    }

    pub fn this(&self) -> JsValue<'h> {
        self.this
    }

    pub fn this_object(&self) -> AddonResult<JsObject<'h>> {
        self.this.downcast()
    }

    pub fn argc(&self) -> usize {
        self.args.len()
    }

    /// Missing arguments read as `undefined`.
    pub fn arg(&self, index: usize) -> JsValue<'h> {
        self.args.get(index).copied().unwrap_or(self.undefined)
    }

    pub fn arg_as<T: TypedValue<'h>>(&self, index: usize) -> AddonResult<T> {
        self.arg(index).downcast()
    }

    pub fn args(&self) -> &[JsValue<'h>] {
        &self.args
    }

    pub fn new_target(&self) -> Option<JsValue<'h>> {
        self.new_target
    }

    pub fn is_construct_call(&self) -> bool {
        self.new_target.is_some()
    }
}

pub(crate) fn into_raw_callback(f: Callback) -> RawCallback {
    Rc::new(
        move |host: &dyn Host, frame: &RawCallFrame| -> Option<RawValue> {
            dispatch(Env::new(host), frame, &*f)
        },
    )
}

fn dispatch(
    env: Env<'_>,
    frame: &RawCallFrame,
    f: &dyn for<'a> Fn(&CallContext<'a>) -> AddonResult<JsValue<'a>>,
) -> Option<RawValue> {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        match CallContext::from_frame(env, frame) {
            Ok(ctx) => f(&ctx),
            Err(err) => Err(err),
        }
    }));
    match outcome {
        Ok(Ok(value)) => {
            if matches!(value.js_type(), Ok(JsType::Error)) {
                if let Err(err) = env.throw_value(value) {
                    env.throw_addon_error(&err);
                }
                return None;
            }
            Some(value.raw())
        }
        Ok(Err(err)) => {
            debug!("event=callback_failed module=function status=error error={err}");
            env.throw_addon_error(&err);
            None
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                "event=panic_recovered module=function status=error payload={}",
                sanitize_message(&message, MAX_PANIC_PAYLOAD_CHARS)
            );
            env.throw_addon_error(&AddonError::Panic(message));
            None
        }
    }
}

impl<'h> JsFunction<'h> {
    /// Creates a JS function running `f` on every call.
    pub fn new<F>(env: Env<'h>, name: &str, f: F) -> AddonResult<Self>
    where
        F: for<'a> Fn(&CallContext<'a>) -> AddonResult<JsValue<'a>> + 'static,
    {
        Self::from_callback(env, name, callback(f))
    }

    pub fn from_callback(env: Env<'h>, name: &str, f: Callback) -> AddonResult<Self> {
        let raw = env.check(env.host().create_function(name, into_raw_callback(f)))?;
        Ok(Self(env.value(raw)))
    }

    /// Binds a plain Rust function through serde.
    ///
    /// Arguments are deserialized as one JS array, so `A` is usually a tuple
    /// matching the positional arguments; a count mismatch is a conversion
    /// error.
    pub fn typed<A, R, F>(env: Env<'h>, name: &str, f: F) -> AddonResult<Self>
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> AddonResult<R> + 'static,
    {
        Self::new(env, name, move |ctx| {
            let mut args = Vec::with_capacity(ctx.argc());
            for arg in ctx.args() {
                args.push(js_to_json(*arg)?);
            }
            let parsed: A = from_json_value(serde_json::Value::Array(args))?;
            let output = f(parsed)?;
            to_js(ctx.env(), &output)
        })
    }

    /// Calls with the global object as `this`.
    pub fn call(&self, args: &[JsValue<'h>]) -> AddonResult<JsValue<'h>> {
        let global = self.env().global()?;
        self.call_with_this(global, args)
    }

    pub fn call_with_this(
        &self,
        this: impl Into<JsValue<'h>>,
        args: &[JsValue<'h>],
    ) -> AddonResult<JsValue<'h>> {
        let env = self.env();
        let raw_args: Vec<RawValue> = args.iter().map(JsValue::raw).collect();
        let raw = env.check(
            env.host()
                .call_function(this.into().raw(), self.raw(), &raw_args),
        )?;
        Ok(env.value(raw))
    }

    /// `new f(...args)`.
    pub fn construct(&self, args: &[JsValue<'h>]) -> AddonResult<JsObject<'h>> {
        let env = self.env();
        let raw_args: Vec<RawValue> = args.iter().map(JsValue::raw).collect();
        let raw = env.check(env.host().new_instance(self.raw(), &raw_args))?;
        Ok(JsObject::from_value_unchecked(env.value(raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::JsFunction;
    use crate::env::Env;
    use crate::error::AddonError;
    use crate::host::MemoryHost;
    use crate::value::{JsError, JsNumber, JsString};

    #[test]
    fn missing_arguments_read_as_undefined() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let probe = JsFunction::new(env, "probe", |ctx| {
            let missing = ctx.arg(3).is_undefined()?;
            ctx.env().boolean(missing).map(Into::into)
        })
        .expect("function");
        let result = probe.call(&[]).expect("call");
        assert!(result.strict_equals(env.boolean(true).expect("true")).expect("eq"));
    }

    #[test]
    fn errors_and_panics_become_exceptions() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let failing = JsFunction::new(env, "failing", |_ctx| {
            Err(AddonError::invalid_arg("bad input"))
        })
        .expect("function");
        assert_eq!(
            failing.call(&[]).expect_err("throws"),
            AddonError::Exception("invalid argument: bad input".to_string())
        );

        let panicking = JsFunction::new(env, "panicking", |_ctx| panic!("boom"))
        .expect("function");
        assert_eq!(
            panicking.call(&[]).expect_err("throws"),
            AddonError::Exception("panic recover: boom".to_string())
        );
        assert!(!env.is_exception_pending().expect("pending"));
    }

    #[test]
    fn returned_error_object_is_thrown() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let rejecting = JsFunction::new(env, "rejecting", |ctx| {
            JsError::type_error(ctx.env(), "wrong type").map(Into::into)
        })
        .expect("function");
        assert_eq!(
            rejecting.call(&[]).expect_err("throws"),
            AddonError::Exception("wrong type".to_string())
        );
    }

    #[test]
    fn typed_functions_use_serde_for_arguments() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let add = JsFunction::typed(env, "add", |(a, b): (i64, i64)| Ok(a + b)).expect("typed");
        let args = [
            JsNumber::from_i32(env, 2).expect("n").into(),
            JsNumber::from_i32(env, 40).expect("n").into(),
        ];
        let sum: JsNumber = add.call(&args).expect("call").downcast().expect("number");
        assert_eq!(sum.to_i64().expect("i64"), 42);

        let err = add
            .call(&[JsString::new(env, "x").expect("s").into()])
            .expect_err("arity mismatch");
        assert!(matches!(err, AddonError::Exception(message) if message.starts_with("value conversion failed")));
    }

    #[test]
    fn construct_passes_new_target() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let ctor = JsFunction::new(env, "Point", |ctx| {
            let this = ctx.this_object()?;
            this.set("constructed", ctx.env().boolean(ctx.is_construct_call())?)?;
            Ok(this.into())
        })
        .expect("function");
        let instance = ctor.construct(&[]).expect("construct");
        let flag = instance.get("constructed").expect("flag");
        assert!(flag.strict_equals(env.boolean(true).expect("true")).expect("eq"));
    }
}
