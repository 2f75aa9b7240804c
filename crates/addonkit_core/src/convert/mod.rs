//! serde bridge between Rust data and JS values.
//!
//! # Responsibility
//! - `to_js`: any `Serialize` value straight to a JS value, promoting
//!   integers past the safe-integer range to `BigInt`. Fields marked with
//!   [`js_date`] become `Date`s and embedded JS handles pass through as-is.
//! - `from_js`: any JS value a JSON-like shape can express to a
//!   `DeserializeOwned` type.
//!
//! # Invariants
//! - Functions, symbols and externals never convert silently.
//! - Nesting deeper than `MAX_DEPTH` is an error, which also stops cycles.
//! - Arrays longer than `MAX_ARRAY_LENGTH` are refused before any element
//!   is read; JS reports sparse lengths it never allocated.

use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::types::{JsType, TypedArrayKind};
use crate::value::{
    reserve_hint, JsArray, JsArrayBuffer, JsBigInt, JsBoolean, JsBuffer, JsDataView, JsDate,
    JsNumber, JsObject, JsString, JsTypedArray, JsValue, TypedValue,
};
use chrono::SecondsFormat;
use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};

pub mod js_date;
mod ser;

pub use ser::to_js;

/// `Number.MAX_SAFE_INTEGER`.
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;
/// Longest array `from_js` and `js_to_json` will read.
pub const MAX_ARRAY_LENGTH: u32 = 1 << 24;
const MAX_DEPTH: usize = 64;

/// Inside [`to_js`] the handle itself is embedded. Any other serializer
/// receives the value's JSON shape.
impl Serialize for JsValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if ser::serializing_to_js() {
            return ser::embed_handle(self.raw(), serializer);
        }
        js_to_json(*self)
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

pub fn from_js<T: DeserializeOwned>(value: JsValue<'_>) -> AddonResult<T> {
    from_json_value(js_to_json(value)?)
}

pub fn from_json_value<T: DeserializeOwned>(json: Value) -> AddonResult<T> {
    serde_json::from_value(json).map_err(AddonError::from)
}

pub fn json_to_js<'h>(env: Env<'h>, json: &Value) -> AddonResult<JsValue<'h>> {
    match json {
        Value::Null => env.null(),
        Value::Bool(flag) => JsBoolean::new(env, *flag).map(Into::into),
        Value::Number(number) => number_to_js(env, number),
        Value::String(text) => JsString::new(env, text).map(Into::into),
        Value::Array(items) => {
            let array = JsArray::with_length(env, items.len())?;
            for (index, item) in items.iter().enumerate() {
                let index = u32::try_from(index)
                    .map_err(|_| AddonError::conversion("array longer than u32::MAX"))?;
                array.set(index, json_to_js(env, item)?)?;
            }
            Ok(array.into())
        }
        Value::Object(fields) => {
            let object = JsObject::new(env)?;
            for (key, field) in fields {
                object.set(key, json_to_js(env, field)?)?;
            }
            Ok(object.into())
        }
    }
}

fn number_to_js<'h>(env: Env<'h>, number: &Number) -> AddonResult<JsValue<'h>> {
    if let Some(value) = number.as_i64() {
        if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&value) {
            return JsNumber::from_i64(env, value).map(Into::into);
        }
        return JsBigInt::from_i64(env, value).map(Into::into);
    }
    if let Some(value) = number.as_u64() {
        return JsBigInt::from_u64(env, value).map(Into::into);
    }
    let value = number
        .as_f64()
        .ok_or_else(|| AddonError::conversion(format!("unrepresentable number {number}")))?;
    JsNumber::from_f64(env, value).map(Into::into)
}

/// Reads `value` into a JSON tree.
pub fn js_to_json(value: JsValue<'_>) -> AddonResult<Value> {
    to_json_at(value, 0)
}

fn to_json_at(value: JsValue<'_>, depth: usize) -> AddonResult<Value> {
    if depth > MAX_DEPTH {
        return Err(AddonError::conversion(format!(
            "value nested deeper than {MAX_DEPTH} levels"
        )));
    }
    match value.js_type()? {
        JsType::Undefined | JsType::Null => Ok(Value::Null),
        JsType::Boolean => Ok(Value::Bool(value.cast::<JsBoolean>().get()?)),
        JsType::Number => Ok(number_to_json(value.cast::<JsNumber>().to_f64()?)),
        JsType::BigInt => bigint_to_json(value.cast::<JsBigInt>()),
        JsType::String => Ok(Value::String(value.cast::<JsString>().to_string_utf8()?)),
        JsType::Date => {
            let date = value.cast::<JsDate>().to_datetime()?;
            Ok(Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true)))
        }
        JsType::Buffer => Ok(bytes_to_json(&value.cast::<JsBuffer>().to_vec()?)),
        JsType::ArrayBuffer => Ok(bytes_to_json(&value.cast::<JsArrayBuffer>().to_vec()?)),
        JsType::DataView => Ok(bytes_to_json(&value.cast::<JsDataView>().to_bytes()?)),
        JsType::TypedArray => {
            let typed = value.cast::<JsTypedArray>();
            typed_elements_to_json(typed.kind()?, &typed.to_bytes()?)
        }
        JsType::Array => {
            let array = value.cast::<JsArray>();
            let length = array.len()?;
            if length > MAX_ARRAY_LENGTH {
                return Err(AddonError::conversion(format!(
                    "array length {length} exceeds {MAX_ARRAY_LENGTH}"
                )));
            }
            let mut items = Vec::with_capacity(reserve_hint(length));
            for index in 0..length {
                items.push(to_json_at(array.get(index)?, depth + 1)?);
            }
            Ok(Value::Array(items))
        }
        JsType::Error => {
            let object = value.cast::<JsObject>();
            let mut fields = Map::new();
            fields.insert("name".to_string(), Value::String(object.get("name")?.coerce_to_string()?));
            fields.insert(
                "message".to_string(),
                Value::String(object.get("message")?.coerce_to_string()?),
            );
            Ok(Value::Object(fields))
        }
        JsType::Object | JsType::Promise => {
            let mut fields = Map::new();
            for (key, field) in value.cast::<JsObject>().entries()? {
                fields.insert(key, to_json_at(field, depth + 1)?);
            }
            Ok(Value::Object(fields))
        }
        other @ (JsType::Function | JsType::Symbol | JsType::External | JsType::Unknown) => Err(
            AddonError::conversion(format!("cannot convert {other} to a Rust value")),
        ),
    }
}

fn number_to_json(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER as f64 {
        return Value::Number(Number::from(value as i64));
    }
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn bigint_to_json(value: JsBigInt<'_>) -> AddonResult<Value> {
    let (signed, lossless) = value.get_i64()?;
    if lossless {
        return Ok(Value::Number(Number::from(signed)));
    }
    let (unsigned, lossless) = value.get_u64()?;
    if lossless {
        return Ok(Value::Number(Number::from(unsigned)));
    }
    Err(AddonError::conversion("bigint does not fit in 64 bits"))
}

fn bytes_to_json(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|byte| Value::from(*byte)).collect())
}

fn typed_elements_to_json(kind: TypedArrayKind, bytes: &[u8]) -> AddonResult<Value> {
    let size = kind.element_size();
    let mut items = Vec::with_capacity(bytes.len() / size);
    for chunk in bytes.chunks_exact(size) {
        let item = match kind {
            TypedArrayKind::Int8 => Value::from(chunk[0] as i8),
            TypedArrayKind::Uint8 | TypedArrayKind::Uint8Clamped => Value::from(chunk[0]),
            TypedArrayKind::Int16 => Value::from(i16::from_le_bytes(le(chunk)?)),
            TypedArrayKind::Uint16 => Value::from(u16::from_le_bytes(le(chunk)?)),
            TypedArrayKind::Int32 => Value::from(i32::from_le_bytes(le(chunk)?)),
            TypedArrayKind::Uint32 => Value::from(u32::from_le_bytes(le(chunk)?)),
            TypedArrayKind::Float32 => number_to_json(f64::from(f32::from_le_bytes(le(chunk)?))),
            TypedArrayKind::Float64 => number_to_json(f64::from_le_bytes(le(chunk)?)),
            TypedArrayKind::BigInt64 => Value::from(i64::from_le_bytes(le(chunk)?)),
            TypedArrayKind::BigUint64 => Value::from(u64::from_le_bytes(le(chunk)?)),
        };
        items.push(item);
    }
    Ok(Value::Array(items))
}

fn le<const N: usize>(chunk: &[u8]) -> AddonResult<[u8; N]> {
    chunk
        .try_into()
        .map_err(|_| AddonError::conversion("typed array element has the wrong width"))
}

#[cfg(test)]
mod tests {
    use super::{from_js, js_to_json, to_js, MAX_SAFE_INTEGER};
    use crate::env::Env;
    use crate::error::AddonError;
    use crate::host::MemoryHost;
    use crate::types::{JsType, TypedArrayKind};
    use crate::value::{JsArray, JsDate, JsFunction, JsObject, JsTypedArray};
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Profile {
        name: String,
        tags: Vec<String>,
        score: Option<f64>,
    }

    #[test]
    fn struct_survives_conversion() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let profile = Profile {
            name: "ada".to_string(),
            tags: vec!["math".to_string()],
            score: None,
        };
        let js = to_js(env, &profile).expect("to js");
        assert_eq!(js.js_type().expect("type"), JsType::Object);
        let back: Profile = from_js(js).expect("from js");
        assert_eq!(back, profile);
    }

    #[test]
    fn large_integers_become_bigint() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let safe = to_js(env, &MAX_SAFE_INTEGER).expect("safe");
        assert_eq!(safe.js_type().expect("type"), JsType::Number);
        let unsafe_int = to_js(env, &(MAX_SAFE_INTEGER + 1)).expect("big");
        assert_eq!(unsafe_int.js_type().expect("type"), JsType::BigInt);
        let huge = to_js(env, &u64::MAX).expect("huge");
        assert_eq!(from_js::<u64>(huge).expect("u64"), u64::MAX);
    }

    #[test]
    fn dates_and_typed_arrays_have_json_shapes() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let moment = Utc
            .with_ymd_and_hms(2023, 5, 1, 8, 0, 0)
            .single()
            .expect("valid date");
        let date = JsDate::from_datetime(env, moment).expect("date");
        assert_eq!(
            js_to_json(date.into()).expect("json"),
            json!("2023-05-01T08:00:00.000Z")
        );

        let bytes: Vec<u8> = [-2_i16, 300].iter().flat_map(|v| v.to_le_bytes()).collect();
        let view = JsTypedArray::from_bytes(env, TypedArrayKind::Int16, &bytes).expect("view");
        assert_eq!(js_to_json(view.into()).expect("json"), json!([-2, 300]));
    }

    #[test]
    fn functions_and_cycles_are_rejected() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let function = JsFunction::new(env, "noop", |ctx| ctx.env().undefined()).expect("fn");
        assert!(matches!(
            js_to_json(function.into()),
            Err(AddonError::Conversion(_))
        ));

        let cyclic = JsObject::new(env).expect("object");
        cyclic.set("self", cyclic).expect("set");
        let err = js_to_json(cyclic.into()).expect_err("cycle");
        assert!(err.to_string().contains("nested deeper than 64"));
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Meeting {
        title: String,
        #[serde(with = "crate::convert::js_date")]
        starts_at: DateTime<Utc>,
    }

    #[test]
    fn marked_dates_become_js_dates_and_read_back() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let meeting = Meeting {
            title: "standup".to_string(),
            starts_at: Utc
                .with_ymd_and_hms(2024, 2, 29, 12, 30, 0)
                .single()
                .expect("valid date"),
        };

        let js = to_js(env, &meeting).expect("to js");
        let object: JsObject = js.downcast().expect("object");
        let starts_at = object.get("starts_at").expect("field");
        assert_eq!(starts_at.js_type().expect("type"), JsType::Date);

        let back: Meeting = from_js(js).expect("from js");
        assert_eq!(back, meeting);
        assert_eq!(
            serde_json::to_value(&meeting).expect("json")["starts_at"],
            json!("2024-02-29T12:30:00.000Z")
        );
    }

    #[derive(Serialize)]
    struct Hooks<'h> {
        label: &'static str,
        on_ready: JsFunction<'h>,
    }

    #[test]
    fn embedded_handles_pass_through_unchanged() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let on_ready = JsFunction::new(env, "ready", |ctx| ctx.env().undefined()).expect("fn");
        let hooks = Hooks {
            label: "boot",
            on_ready,
        };

        let object: JsObject = to_js(env, &hooks).expect("to js").downcast().expect("object");
        let embedded = object.get("on_ready").expect("field");
        assert!(embedded.strict_equals(on_ready).expect("compare"));
        assert_eq!(
            object.get("label").expect("label").coerce_to_string().expect("text"),
            "boot"
        );
        assert!(serde_json::to_value(&hooks).is_err());
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    enum Shape {
        Circle { radius: f64 },
        Pair(i32, i32),
        Empty,
    }

    #[test]
    fn enums_keep_the_externally_tagged_shape() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let shapes = vec![Shape::Circle { radius: 1.5 }, Shape::Pair(2, 3), Shape::Empty];
        let js = to_js(env, &shapes).expect("to js");
        assert_eq!(
            js_to_json(js).expect("json"),
            json!([{"Circle": {"radius": 1.5}}, {"Pair": [2, 3]}, "Empty"])
        );
        let back: Vec<Shape> = from_js(js).expect("from js");
        assert_eq!(back, shapes);
    }

    #[test]
    fn oversized_sparse_arrays_are_refused() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let sparse = JsArray::with_length(env, u32::MAX as usize).expect("sparse array");
        let err = from_js::<Vec<Option<i32>>>(sparse.into()).expect_err("too long");
        assert!(matches!(err, AddonError::Conversion(_)));
        assert!(err.to_string().contains("exceeds"));
    }
}
