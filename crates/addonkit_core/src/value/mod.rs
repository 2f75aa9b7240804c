//! Typed wrappers over JS value handles.
//!
//! # Responsibility
//! - Provide `JsValue` plus one `Copy` wrapper per JS type, each bound to
//!   the `Env` it came from.
//! - Classify values with the library's subtype precedence.
//!
//! # Invariants
//! - `downcast` checks the JS type; `cast` never checks or coerces.
//! - Wrappers never own the underlying JS value.

use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::host::RawValue;
use crate::types::{JsType, SubtypeFlags, ValueKind};
use std::fmt::{Debug, Formatter};

macro_rules! js_value_type {
    ($(#[$meta:meta])* $name:ident, $expected:expr, |$value:ident| $check:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy)]
        pub struct $name<'h>(pub(crate) $crate::value::JsValue<'h>);

        impl<'h> $crate::value::TypedValue<'h> for $name<'h> {
            const EXPECTED: $crate::types::JsType = $expected;

            fn from_value_unchecked(value: $crate::value::JsValue<'h>) -> Self {
                Self(value)
            }

            fn value(&self) -> $crate::value::JsValue<'h> {
                self.0
            }

            fn matches(
                $value: &$crate::value::JsValue<'h>,
            ) -> $crate::error::AddonResult<bool> {
                $check
            }
        }

        impl<'h> From<$name<'h>> for $crate::value::JsValue<'h> {
            fn from(value: $name<'h>) -> Self {
                value.0
            }
        }

        impl serde::Serialize for $name<'_> {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serde::Serialize::serialize(&self.0, serializer)
            }
        }

        impl std::fmt::Debug for $name<'_> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&self.0.raw())
                    .finish()
            }
        }

        impl<'h> $name<'h> {
            pub fn env(&self) -> $crate::env::Env<'h> {
                self.0.env()
            }

            pub fn raw(&self) -> $crate::host::RawValue {
                self.0.raw()
            }

            pub fn as_value(&self) -> $crate::value::JsValue<'h> {
                self.0
            }
        }
    };
}

/// Adds `as_object` to wrappers of object subtypes.
macro_rules! object_like {
    ($name:ident) => {
        impl<'h> $name<'h> {
            pub fn as_object(&self) -> $crate::value::JsObject<'h> {
                <$crate::value::JsObject<'h> as $crate::value::TypedValue<'h>>::from_value_unchecked(
                    self.0,
                )
            }
        }
    };
}

mod array;
mod arraybuffer;
mod boolean;
mod buffer;
mod dataview;
mod date;
mod external;
mod function;
mod jserror;
mod number;
mod object;
mod promise;
mod reference;
mod string;
mod symbol;
mod typedarray;

pub use array::JsArray;
pub use arraybuffer::JsArrayBuffer;
pub use boolean::JsBoolean;
pub use buffer::JsBuffer;
pub use dataview::JsDataView;
pub use date::JsDate;
pub use external::JsExternal;
pub use function::{callback, CallContext, Callback, JsFunction};
pub(crate) use array::reserve_hint;
pub(crate) use function::into_raw_callback;
pub use jserror::JsError;
pub use number::{IntoJsNumber, JsBigInt, JsNumber};
pub use object::{JsObject, Property};
pub use promise::{JsDeferred, JsPromise};
pub use reference::JsReference;
pub use string::JsString;
pub use symbol::JsSymbol;
pub use typedarray::JsTypedArray;

/// Common surface of every value wrapper.
pub trait TypedValue<'h>: Copy + Into<JsValue<'h>> {
    /// Type reported in `TypeMismatch` errors.
    const EXPECTED: JsType;

    fn from_value_unchecked(value: JsValue<'h>) -> Self;

    fn value(&self) -> JsValue<'h>;

    fn matches(value: &JsValue<'h>) -> AddonResult<bool>;
}

/// Any JS value.
#[derive(Clone, Copy)]
pub struct JsValue<'h> {
    env: Env<'h>,
    raw: RawValue,
}

impl Debug for JsValue<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("JsValue").field(&self.raw).finish()
    }
}

impl<'h> TypedValue<'h> for JsValue<'h> {
    const EXPECTED: JsType = JsType::Unknown;

    fn from_value_unchecked(value: JsValue<'h>) -> Self {
        value
    }

    fn value(&self) -> JsValue<'h> {
        *self
    }

    fn matches(_value: &JsValue<'h>) -> AddonResult<bool> {
        Ok(true)
    }
}

impl<'h> JsValue<'h> {
    pub fn new(env: Env<'h>, raw: RawValue) -> Self {
        Self { env, raw }
    }

    pub fn env(&self) -> Env<'h> {
        self.env
    }

    pub fn raw(&self) -> RawValue {
        self.raw
    }

    /// Raw `typeof` result.
    pub fn kind(&self) -> AddonResult<ValueKind> {
        self.env.check(self.env.host().type_of(self.raw))
    }

    /// Refined classification: object subtypes before `typeof`.
    pub fn js_type(&self) -> AddonResult<JsType> {
        let kind = self.kind()?;
        if kind != ValueKind::Object {
            return Ok(JsType::classify(SubtypeFlags::default(), Some(kind)));
        }
        let host = self.env.host();
        let raw = self.raw;
        let flags = SubtypeFlags {
            typed_array: self.env.check(host.is_typedarray(raw))?,
            promise: self.env.check(host.is_promise(raw))?,
            data_view: self.env.check(host.is_dataview(raw))?,
            buffer: self.env.check(host.is_buffer(raw))?,
            date: self.env.check(host.is_date(raw))?,
            array: self.env.check(host.is_array(raw))?,
            array_buffer: self.env.check(host.is_arraybuffer(raw))?,
            error: self.env.check(host.is_error(raw))?,
        };
        Ok(JsType::classify(flags, Some(kind)))
    }

    pub fn is_undefined(&self) -> AddonResult<bool> {
        Ok(self.kind()? == ValueKind::Undefined)
    }

    pub fn is_null(&self) -> AddonResult<bool> {
        Ok(self.kind()? == ValueKind::Null)
    }

    pub fn is_nullish(&self) -> AddonResult<bool> {
        Ok(matches!(self.kind()?, ValueKind::Undefined | ValueKind::Null))
    }

    /// Reinterprets the handle without any check.
    pub fn cast<T: TypedValue<'h>>(self) -> T {
        T::from_value_unchecked(self)
    }

    pub fn downcast<T: TypedValue<'h>>(self) -> AddonResult<T> {
        if T::matches(&self)? {
            return Ok(T::from_value_unchecked(self));
        }
        Err(AddonError::TypeMismatch {
            expected: T::EXPECTED,
            actual: self.js_type()?,
        })
    }

    /// JS `String(value)`.
    pub fn coerce_to_string(&self) -> AddonResult<String> {
        let text = self.env.check(self.env.host().coerce_to_string(self.raw))?;
        self.env.check(self.env.host().get_value_string_utf8(text))
    }

    pub fn strict_equals(&self, other: impl Into<JsValue<'h>>) -> AddonResult<bool> {
        self.env.strict_equals(*self, other)
    }
}

pub(crate) fn kind_is(value: &JsValue<'_>, kind: ValueKind) -> AddonResult<bool> {
    Ok(value.kind()? == kind)
}

#[cfg(test)]
mod tests {
    use super::{JsNumber, JsString, JsValue};
    use crate::env::Env;
    use crate::error::AddonError;
    use crate::host::{Host, MemoryHost};
    use crate::types::{JsType, TypedArrayKind};

    #[test]
    fn buffer_classifies_before_typed_array() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let buffer = JsValue::new(env, host.create_buffer(4).expect("buffer"));
        assert_eq!(buffer.js_type().expect("type"), JsType::Buffer);

        let arraybuffer = host.create_arraybuffer(8).expect("arraybuffer");
        let view = host
            .create_typedarray(TypedArrayKind::Uint8, 8, arraybuffer, 0)
            .expect("view");
        assert_eq!(
            JsValue::new(env, view).js_type().expect("type"),
            JsType::TypedArray
        );
    }

    #[test]
    fn downcast_reports_both_types() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let number = JsNumber::from_f64(env, 1.5).expect("number");
        let err = number
            .as_value()
            .downcast::<JsString>()
            .expect_err("number is not a string");
        assert_eq!(
            err,
            AddonError::TypeMismatch {
                expected: JsType::String,
                actual: JsType::Number,
            }
        );
        assert!(number.as_value().downcast::<JsNumber>().is_ok());
    }

    #[test]
    fn cast_skips_checks() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let number = JsNumber::from_f64(env, 2.0).expect("number");
        let unchecked: JsString = number.as_value().cast();
        assert!(unchecked.to_string_utf8().is_err());
    }
}
