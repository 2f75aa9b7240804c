//! `serde::Serializer` that builds JS values directly in an `Env`.

use super::MAX_SAFE_INTEGER;
use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::host::RawValue;
use crate::types::JsType;
use crate::value::{
    JsArray, JsBigInt, JsBoolean, JsBuffer, JsDate, JsNumber, JsObject, JsString, JsValue,
};
use serde::ser::{self, Serialize};
use std::cell::Cell;

/// Newtype name carrying epoch milliseconds that become a `Date`.
pub(crate) const DATE_TOKEN: &str = "$addonkit::private::Date";
/// Unit-struct name announcing a handle parked in `HANDOFF`.
const HANDLE_TOKEN: &str = "$addonkit::private::Handle";

thread_local! {
    static ACTIVE: Cell<usize> = const { Cell::new(0) };
    static HANDOFF: Cell<Option<RawValue>> = const { Cell::new(None) };
}

struct ActiveGuard;

impl ActiveGuard {
    fn enter() -> Self {
        ACTIVE.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Whether a [`to_js`] call is running on this thread.
pub(crate) fn serializing_to_js() -> bool {
    ACTIVE.with(|depth| depth.get() > 0)
}

pub(crate) fn embed_handle<S: ser::Serializer>(
    raw: RawValue,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    HANDOFF.with(|slot| slot.set(Some(raw)));
    serializer.serialize_unit_struct(HANDLE_TOKEN)
}

/// Converts any `Serialize` value into a JS value owned by `env`.
///
/// Integers outside `±MAX_SAFE_INTEGER` become `BigInt`, byte slices
/// serialized as bytes become `Buffer`s, enums use serde's externally
/// tagged shape, and `None`/`()` become `null`.
pub fn to_js<'h, T>(env: Env<'h>, value: &T) -> AddonResult<JsValue<'h>>
where
    T: Serialize + ?Sized,
{
    let _active = ActiveGuard::enter();
    value.serialize(JsSerializer { env })
}

impl ser::Error for AddonError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        AddonError::Conversion(msg.to_string())
    }
}

#[derive(Clone, Copy)]
struct JsSerializer<'h> {
    env: Env<'h>,
}

impl<'h> ser::Serializer for JsSerializer<'h> {
    type Ok = JsValue<'h>;
    type Error = AddonError;
    type SerializeSeq = ArrayBuilder<'h>;
    type SerializeTuple = ArrayBuilder<'h>;
    type SerializeTupleStruct = ArrayBuilder<'h>;
    type SerializeTupleVariant = Tagged<ArrayBuilder<'h>>;
    type SerializeMap = ObjectBuilder<'h>;
    type SerializeStruct = ObjectBuilder<'h>;
    type SerializeStructVariant = Tagged<ObjectBuilder<'h>>;

    fn serialize_bool(self, v: bool) -> AddonResult<JsValue<'h>> {
        JsBoolean::new(self.env, v).map(Into::into)
    }

    fn serialize_i8(self, v: i8) -> AddonResult<JsValue<'h>> {
        self.serialize_i32(v.into())
    }

    fn serialize_i16(self, v: i16) -> AddonResult<JsValue<'h>> {
        self.serialize_i32(v.into())
    }

    fn serialize_i32(self, v: i32) -> AddonResult<JsValue<'h>> {
        JsNumber::from_i32(self.env, v).map(Into::into)
    }

    fn serialize_i64(self, v: i64) -> AddonResult<JsValue<'h>> {
        if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&v) {
            JsNumber::from_i64(self.env, v).map(Into::into)
        } else {
            JsBigInt::from_i64(self.env, v).map(Into::into)
        }
    }

    fn serialize_i128(self, v: i128) -> AddonResult<JsValue<'h>> {
        if let Ok(signed) = i64::try_from(v) {
            self.serialize_i64(signed)
        } else if let Ok(unsigned) = u64::try_from(v) {
            self.serialize_u64(unsigned)
        } else {
            Err(AddonError::conversion(format!("{v} does not fit in 64 bits")))
        }
    }

    fn serialize_u8(self, v: u8) -> AddonResult<JsValue<'h>> {
        self.serialize_u32(v.into())
    }

    fn serialize_u16(self, v: u16) -> AddonResult<JsValue<'h>> {
        self.serialize_u32(v.into())
    }

    fn serialize_u32(self, v: u32) -> AddonResult<JsValue<'h>> {
        JsNumber::from_u32(self.env, v).map(Into::into)
    }

    fn serialize_u64(self, v: u64) -> AddonResult<JsValue<'h>> {
        match i64::try_from(v) {
            Ok(small) if small <= MAX_SAFE_INTEGER => {
                JsNumber::from_i64(self.env, small).map(Into::into)
            }
            _ => JsBigInt::from_u64(self.env, v).map(Into::into),
        }
    }

    fn serialize_u128(self, v: u128) -> AddonResult<JsValue<'h>> {
        let narrow = u64::try_from(v)
            .map_err(|_| AddonError::conversion(format!("{v} does not fit in 64 bits")))?;
        self.serialize_u64(narrow)
    }

    fn serialize_f32(self, v: f32) -> AddonResult<JsValue<'h>> {
        self.serialize_f64(v.into())
    }

    fn serialize_f64(self, v: f64) -> AddonResult<JsValue<'h>> {
        JsNumber::from_f64(self.env, v).map(Into::into)
    }

    fn serialize_char(self, v: char) -> AddonResult<JsValue<'h>> {
        let mut utf8 = [0_u8; 4];
        self.serialize_str(v.encode_utf8(&mut utf8))
    }

    fn serialize_str(self, v: &str) -> AddonResult<JsValue<'h>> {
        JsString::new(self.env, v).map(Into::into)
    }

    fn serialize_bytes(self, v: &[u8]) -> AddonResult<JsValue<'h>> {
        JsBuffer::from_bytes(self.env, v).map(Into::into)
    }

    fn serialize_none(self) -> AddonResult<JsValue<'h>> {
        self.env.null()
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> AddonResult<JsValue<'h>> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> AddonResult<JsValue<'h>> {
        self.env.null()
    }

    fn serialize_unit_struct(self, name: &'static str) -> AddonResult<JsValue<'h>> {
        if name != HANDLE_TOKEN {
            return self.env.null();
        }
        HANDOFF
            .with(Cell::take)
            .map(|raw| self.env.value(raw))
            .ok_or_else(|| AddonError::conversion("embedded JS value went missing"))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> AddonResult<JsValue<'h>> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        value: &T,
    ) -> AddonResult<JsValue<'h>> {
        let inner = value.serialize(self)?;
        if name != DATE_TOKEN {
            return Ok(inner);
        }
        let epoch_ms = inner.downcast::<JsNumber>()?.to_f64()?;
        JsDate::from_epoch_ms(self.env, epoch_ms).map(Into::into)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> AddonResult<JsValue<'h>> {
        tag(self.env, variant, value.serialize(self)?)
    }

    fn serialize_seq(self, _len: Option<usize>) -> AddonResult<ArrayBuilder<'h>> {
        ArrayBuilder::new(self.env)
    }

    fn serialize_tuple(self, _len: usize) -> AddonResult<ArrayBuilder<'h>> {
        ArrayBuilder::new(self.env)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> AddonResult<ArrayBuilder<'h>> {
        ArrayBuilder::new(self.env)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> AddonResult<Tagged<ArrayBuilder<'h>>> {
        Ok(Tagged {
            variant,
            inner: ArrayBuilder::new(self.env)?,
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> AddonResult<ObjectBuilder<'h>> {
        ObjectBuilder::new(self.env)
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> AddonResult<ObjectBuilder<'h>> {
        ObjectBuilder::new(self.env)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> AddonResult<Tagged<ObjectBuilder<'h>>> {
        Ok(Tagged {
            variant,
            inner: ObjectBuilder::new(self.env)?,
        })
    }
}

/// `{ [variant]: value }`, serde's externally tagged enum shape.
fn tag<'h>(env: Env<'h>, variant: &str, value: JsValue<'h>) -> AddonResult<JsValue<'h>> {
    let object = JsObject::new(env)?;
    object.set(variant, value)?;
    Ok(object.into())
}

struct ArrayBuilder<'h> {
    array: JsArray<'h>,
    next: u32,
}

impl<'h> ArrayBuilder<'h> {
    fn new(env: Env<'h>) -> AddonResult<Self> {
        Ok(Self {
            array: JsArray::new(env)?,
            next: 0,
        })
    }

    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> AddonResult<()> {
        let item = value.serialize(JsSerializer {
            env: self.array.env(),
        })?;
        self.array.set(self.next, item)?;
        self.next = self
            .next
            .checked_add(1)
            .ok_or_else(|| AddonError::conversion("sequence longer than u32::MAX"))?;
        Ok(())
    }

    fn finish(self) -> JsValue<'h> {
        self.array.into()
    }
}

impl<'h> ser::SerializeSeq for ArrayBuilder<'h> {
    type Ok = JsValue<'h>;
    type Error = AddonError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> AddonResult<()> {
        self.push(value)
    }

    fn end(self) -> AddonResult<JsValue<'h>> {
        Ok(self.finish())
    }
}

impl<'h> ser::SerializeTuple for ArrayBuilder<'h> {
    type Ok = JsValue<'h>;
    type Error = AddonError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> AddonResult<()> {
        self.push(value)
    }

    fn end(self) -> AddonResult<JsValue<'h>> {
        Ok(self.finish())
    }
}

impl<'h> ser::SerializeTupleStruct for ArrayBuilder<'h> {
    type Ok = JsValue<'h>;
    type Error = AddonError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> AddonResult<()> {
        self.push(value)
    }

    fn end(self) -> AddonResult<JsValue<'h>> {
        Ok(self.finish())
    }
}

struct ObjectBuilder<'h> {
    object: JsObject<'h>,
    key: Option<String>,
}

impl<'h> ObjectBuilder<'h> {
    fn new(env: Env<'h>) -> AddonResult<Self> {
        Ok(Self {
            object: JsObject::new(env)?,
            key: None,
        })
    }

    fn field<T: ?Sized + Serialize>(&mut self, key: &str, value: &T) -> AddonResult<()> {
        let value = value.serialize(JsSerializer {
            env: self.object.env(),
        })?;
        self.object.set(key, value)
    }

    fn finish(self) -> JsValue<'h> {
        self.object.into()
    }
}

impl<'h> ser::SerializeMap for ObjectBuilder<'h> {
    type Ok = JsValue<'h>;
    type Error = AddonError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> AddonResult<()> {
        let key = key.serialize(JsSerializer {
            env: self.object.env(),
        })?;
        self.key = Some(match key.js_type()? {
            JsType::String | JsType::Number | JsType::BigInt | JsType::Boolean => {
                key.coerce_to_string()?
            }
            other => {
                return Err(AddonError::conversion(format!(
                    "map key must be a string or number, got {other}"
                )))
            }
        });
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> AddonResult<()> {
        let key = self
            .key
            .take()
            .ok_or_else(|| AddonError::conversion("map value without a key"))?;
        self.field(&key, value)
    }

    fn end(self) -> AddonResult<JsValue<'h>> {
        Ok(self.finish())
    }
}

impl<'h> ser::SerializeStruct for ObjectBuilder<'h> {
    type Ok = JsValue<'h>;
    type Error = AddonError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> AddonResult<()> {
        self.field(key, value)
    }

    fn end(self) -> AddonResult<JsValue<'h>> {
        Ok(self.finish())
    }
}

struct Tagged<B> {
    variant: &'static str,
    inner: B,
}

impl<'h> ser::SerializeTupleVariant for Tagged<ArrayBuilder<'h>> {
    type Ok = JsValue<'h>;
    type Error = AddonError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> AddonResult<()> {
        self.inner.push(value)
    }

    fn end(self) -> AddonResult<JsValue<'h>> {
        let env = self.inner.array.env();
        tag(env, self.variant, self.inner.finish())
    }
}

impl<'h> ser::SerializeStructVariant for Tagged<ObjectBuilder<'h>> {
    type Ok = JsValue<'h>;
    type Error = AddonError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> AddonResult<()> {
        self.inner.field(key, value)
    }

    fn end(self) -> AddonResult<JsValue<'h>> {
        let env = self.inner.object.env();
        tag(env, self.variant, self.inner.finish())
    }
}
