//! Rust types exposed as JS classes.
//!
//! # Responsibility
//! - Turn a `JsClass` implementation into a JS constructor with prototype
//!   methods, accessors and static methods.
//! - Keep the native instance wrapped inside its JS object.
//!
//! # Invariants
//! - Each JS instance owns exactly one `Rc<RefCell<T>>`, released when the
//!   object is finalized.
//! - Methods invoked on foreign receivers fail with `TypeMismatch` instead
//!   of touching unrelated native data.

use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::types::{JsType, PropertyAttributes};
use crate::value::{callback, into_raw_callback, CallContext, Callback, JsFunction, JsValue, Property};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cell::RefCell;
use std::rc::Rc;

static CLASS_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("valid class name regex"));

type MethodBody<T> = Rc<dyn for<'a> Fn(&mut T, &CallContext<'a>) -> AddonResult<JsValue<'a>>>;
type GetterBody<T> = Rc<dyn for<'a> Fn(&T, Env<'a>) -> AddonResult<JsValue<'a>>>;
type SetterBody<T> = Rc<dyn for<'a> Fn(&mut T, JsValue<'a>) -> AddonResult<()>>;

/// A Rust type constructible from JavaScript with `new`.
pub trait JsClass: Sized + 'static {
    /// Constructor name; must be a valid JS identifier.
    const NAME: &'static str;

    fn construct(ctx: &CallContext<'_>) -> AddonResult<Self>;

    fn methods() -> Vec<ClassMethod<Self>> {
        Vec::new()
    }

    fn accessors() -> Vec<ClassAccessor<Self>> {
        Vec::new()
    }

    fn static_methods() -> Vec<StaticMethod> {
        Vec::new()
    }
}

/// Prototype method receiving the unwrapped instance.
pub struct ClassMethod<T> {
    name: String,
    body: MethodBody<T>,
}

impl<T: 'static> ClassMethod<T> {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&mut T, &CallContext<'a>) -> AddonResult<JsValue<'a>> + 'static,
    {
        Self {
            name: name.into(),
            body: Rc::new(f),
        }
    }
}

/// Prototype accessor; read-only unless a setter is added.
pub struct ClassAccessor<T> {
    name: String,
    getter: GetterBody<T>,
    setter: Option<SetterBody<T>>,
}

impl<T: 'static> ClassAccessor<T> {
    pub fn new<F>(name: impl Into<String>, getter: F) -> Self
    where
        F: for<'a> Fn(&T, Env<'a>) -> AddonResult<JsValue<'a>> + 'static,
    {
        Self {
            name: name.into(),
            getter: Rc::new(getter),
            setter: None,
        }
    }

    pub fn with_setter<F>(mut self, setter: F) -> Self
    where
        F: for<'a> Fn(&mut T, JsValue<'a>) -> AddonResult<()> + 'static,
    {
        self.setter = Some(Rc::new(setter));
        self
    }
}

/// Method defined on the constructor itself.
pub struct StaticMethod {
    name: String,
    body: Callback,
}

impl StaticMethod {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&CallContext<'a>) -> AddonResult<JsValue<'a>> + 'static,
    {
        Self {
            name: name.into(),
            body: callback(f),
        }
    }
}

/// Defines the JS constructor for `T`.
///
/// # Errors
/// - `T::NAME` is not a JS identifier.
/// - A member has an empty name.
pub fn define_class<T: JsClass>(env: Env<'_>) -> AddonResult<JsFunction<'_>> {
    if !CLASS_NAME_RE.is_match(T::NAME) {
        return Err(AddonError::invalid_arg(format!(
            "class name `{}` is not a valid JavaScript identifier",
            T::NAME
        )));
    }

    let constructor = callback(|ctx| {
        if !ctx.is_construct_call() {
            return Err(AddonError::invalid_arg(format!(
                "class constructor {} cannot be invoked without 'new'",
                T::NAME
            )));
        }
        let instance = T::construct(ctx)?;
        let this = ctx.this_object()?;
        let env = ctx.env();
        env.check(
            env.host()
                .wrap(this.raw(), Rc::new(RefCell::new(instance))),
        )?;
        Ok(this.into())
    });

    let mut properties = Vec::new();
    for method in T::methods() {
        let body = method.body;
        properties.push(Property::method(method.name, move |ctx| {
            let cell = class_instance::<T>(ctx.this())?;
            let mut instance = cell.try_borrow_mut().map_err(|_| busy::<T>())?;
            body(&mut *instance, ctx)
        }));
    }
    for accessor in T::accessors() {
        let getter = accessor.getter;
        let mut property = Property::getter(accessor.name, move |ctx| {
            let cell = class_instance::<T>(ctx.this())?;
            let instance = cell.try_borrow().map_err(|_| busy::<T>())?;
            getter(&*instance, ctx.env())
        })
        .with_attributes(PropertyAttributes::CONFIGURABLE);
        if let Some(setter) = accessor.setter {
            property = property.with_setter(move |ctx, value| {
                let cell = class_instance::<T>(ctx.this())?;
                let mut instance = cell.try_borrow_mut().map_err(|_| busy::<T>())?;
                setter(&mut *instance, value)
            });
        }
        properties.push(property);
    }
    for method in T::static_methods() {
        let body = method.body;
        properties.push(
            Property::method(method.name, move |ctx| body(ctx))
                .with_attributes(PropertyAttributes::DEFAULT_METHOD | PropertyAttributes::STATIC),
        );
    }

    if let Some(unnamed) = properties.iter().find(|property| property.name().is_empty()) {
        return Err(AddonError::invalid_arg(format!(
            "class {} has a member with an empty name ({:?})",
            T::NAME,
            unnamed.name()
        )));
    }

    let raw = env.check(env.host().define_class(
        T::NAME,
        into_raw_callback(constructor),
        properties.into_iter().map(Property::into_raw).collect(),
    ))?;
    Ok(env.value(raw).cast())
}

/// Native instance wrapped in `value` by the constructor of `T`.
pub fn class_instance<'h, T: JsClass>(value: impl Into<JsValue<'h>>) -> AddonResult<Rc<RefCell<T>>> {
    let value = value.into();
    let wrapped = value
        .env()
        .host()
        .unwrap(value.raw())
        .ok()
        .and_then(|native| native.downcast::<RefCell<T>>().ok());
    match wrapped {
        Some(instance) => Ok(instance),
        None => Err(AddonError::TypeMismatch {
            expected: JsType::Object,
            actual: value.js_type()?,
        }),
    }
}

fn busy<T: JsClass>() -> AddonError {
    AddonError::invalid_arg(format!("{} instance is already in use", T::NAME))
}

#[cfg(test)]
mod tests {
    use super::{class_instance, define_class, ClassAccessor, ClassMethod, JsClass, StaticMethod};
    use crate::env::Env;
    use crate::error::{AddonError, AddonResult};
    use crate::host::MemoryHost;
    use crate::value::{CallContext, JsFunction, JsNumber, JsObject};

    struct Counter {
        count: i64,
    }

    impl JsClass for Counter {
        const NAME: &'static str = "Counter";

        fn construct(ctx: &CallContext<'_>) -> AddonResult<Self> {
            let start = if ctx.arg(0).is_undefined()? {
                0
            } else {
                ctx.arg_as::<JsNumber>(0)?.to_i64()?
            };
            Ok(Self { count: start })
        }

        fn methods() -> Vec<ClassMethod<Self>> {
            vec![ClassMethod::new("increment", |counter: &mut Counter, ctx| {
                counter.count += 1;
                JsNumber::from_i64(ctx.env(), counter.count).map(Into::into)
            })]
        }

        fn accessors() -> Vec<ClassAccessor<Self>> {
            vec![
                ClassAccessor::new("value", |counter: &Counter, env| {
                    JsNumber::from_i64(env, counter.count).map(Into::into)
                })
                .with_setter(|counter: &mut Counter, value| {
                    counter.count = value.downcast::<JsNumber>()?.to_i64()?;
                    Ok(())
                }),
            ]
        }

        fn static_methods() -> Vec<StaticMethod> {
            vec![StaticMethod::new("zero", |ctx| {
                JsNumber::from_i32(ctx.env(), 0).map(Into::into)
            })]
        }
    }

    struct BadName;

    impl JsClass for BadName {
        const NAME: &'static str = "not a name";

        fn construct(_ctx: &CallContext<'_>) -> AddonResult<Self> {
            Ok(Self)
        }
    }

    #[test]
    fn constructs_and_dispatches_methods() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let class = define_class::<Counter>(env).expect("class");
        let start = JsNumber::from_i32(env, 5).expect("n");
        let instance = class.construct(&[start.into()]).expect("instance");

        let increment: JsFunction = instance.get_as("increment").expect("method");
        let value: JsNumber = increment
            .call_with_this(instance, &[])
            .expect("call")
            .downcast()
            .expect("number");
        assert_eq!(value.to_i64().expect("i64"), 6);
        assert_eq!(class_instance::<Counter>(instance).expect("native").borrow().count, 6);

        instance
            .set("value", JsNumber::from_i32(env, 40).expect("n"))
            .expect("setter");
        let read: JsNumber = instance.get_as("value").expect("getter");
        assert_eq!(read.to_i64().expect("i64"), 40);

        let zero: JsNumber = class
            .as_object()
            .get_as::<JsFunction>("zero")
            .expect("static")
            .call(&[])
            .expect("call")
            .downcast()
            .expect("number");
        assert_eq!(zero.to_i64().expect("i64"), 0);
    }

    #[test]
    fn foreign_receiver_is_a_type_mismatch() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let class = define_class::<Counter>(env).expect("class");
        let instance = class.construct(&[]).expect("instance");
        let increment: JsFunction = instance.get_as("increment").expect("method");

        let stranger = JsObject::new(env).expect("object");
        let err = increment.call_with_this(stranger, &[]).expect_err("foreign this");
        assert_eq!(
            err,
            AddonError::Exception("expected object value, got object".to_string())
        );
        assert!(class_instance::<Counter>(stranger).is_err());
    }

    #[test]
    fn calling_without_new_throws() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let class = define_class::<Counter>(env).expect("class");
        let err = class.call(&[]).expect_err("needs new");
        assert!(err.to_string().contains("without 'new'"));
    }

    #[test]
    fn invalid_class_name_is_rejected() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        assert!(matches!(
            define_class::<BadName>(env),
            Err(AddonError::InvalidArg(_))
        ));
    }
}
