//! Shared enums and flag sets of the Node-API surface.
//!
//! Numeric values match `node_api_types.h` so the FFI layer can convert with
//! plain integer casts.

use std::fmt::{Display, Formatter};
use std::ops::{BitOr, BitOrAssign};

/// Raw `typeof` classification (`napi_valuetype`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Symbol,
    Object,
    Function,
    External,
    BigInt,
}

impl ValueKind {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Self::Undefined,
            1 => Self::Null,
            2 => Self::Boolean,
            3 => Self::Number,
            4 => Self::String,
            5 => Self::Symbol,
            6 => Self::Object,
            7 => Self::Function,
            8 => Self::External,
            9 => Self::BigInt,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::Undefined => 0,
            Self::Null => 1,
            Self::Boolean => 2,
            Self::Number => 3,
            Self::String => 4,
            Self::Symbol => 5,
            Self::Object => 6,
            Self::Function => 7,
            Self::External => 8,
            Self::BigInt => 9,
        }
    }
}

/// Refined value classification used across the library.
///
/// Object subtypes take precedence over the plain `typeof` result, in the
/// order the variants of [`JsType::classify`] are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsType {
    Unknown,
    Undefined,
    Null,
    Boolean,
    Number,
    BigInt,
    String,
    Symbol,
    Object,
    Function,
    External,
    TypedArray,
    Promise,
    DataView,
    Buffer,
    Date,
    Array,
    ArrayBuffer,
    Error,
}

/// Object subtype probe results feeding [`JsType::classify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubtypeFlags {
    pub typed_array: bool,
    pub promise: bool,
    pub data_view: bool,
    pub buffer: bool,
    pub date: bool,
    pub array: bool,
    pub array_buffer: bool,
    pub error: bool,
}

impl JsType {
    /// Combines subtype probes with `typeof`.
    ///
    /// A Node `Buffer` is also a `Uint8Array`, so the buffer probe is checked
    /// before the typed-array probe.
    pub fn classify(flags: SubtypeFlags, kind: Option<ValueKind>) -> Self {
        if flags.buffer {
            return Self::Buffer;
        }
        if flags.typed_array {
            return Self::TypedArray;
        }
        if flags.promise {
            return Self::Promise;
        }
        if flags.data_view {
            return Self::DataView;
        }
        if flags.date {
            return Self::Date;
        }
        if flags.array {
            return Self::Array;
        }
        if flags.array_buffer {
            return Self::ArrayBuffer;
        }
        if flags.error {
            return Self::Error;
        }
        match kind {
            Some(ValueKind::Undefined) => Self::Undefined,
            Some(ValueKind::Null) => Self::Null,
            Some(ValueKind::Boolean) => Self::Boolean,
            Some(ValueKind::Number) => Self::Number,
            Some(ValueKind::String) => Self::String,
            Some(ValueKind::Symbol) => Self::Symbol,
            Some(ValueKind::Object) => Self::Object,
            Some(ValueKind::Function) => Self::Function,
            Some(ValueKind::External) => Self::External,
            Some(ValueKind::BigInt) => Self::BigInt,
            None => Self::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::BigInt => "bigint",
            Self::String => "string",
            Self::Symbol => "symbol",
            Self::Object => "object",
            Self::Function => "function",
            Self::External => "external",
            Self::TypedArray => "typedarray",
            Self::Promise => "promise",
            Self::DataView => "dataview",
            Self::Buffer => "buffer",
            Self::Date => "date",
            Self::Array => "array",
            Self::ArrayBuffer => "arraybuffer",
            Self::Error => "error",
        }
    }

    /// Whether this classification is some kind of JS object.
    pub fn is_object_like(self) -> bool {
        !matches!(
            self,
            Self::Unknown
                | Self::Undefined
                | Self::Null
                | Self::Boolean
                | Self::Number
                | Self::BigInt
                | Self::String
                | Self::Symbol
        )
    }
}

impl Display for JsType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Element type of a typed array (`napi_typedarray_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    BigInt64,
    BigUint64,
}

impl TypedArrayKind {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Self::Int8,
            1 => Self::Uint8,
            2 => Self::Uint8Clamped,
            3 => Self::Int16,
            4 => Self::Uint16,
            5 => Self::Int32,
            6 => Self::Uint32,
            7 => Self::Float32,
            8 => Self::Float64,
            9 => Self::BigInt64,
            10 => Self::BigUint64,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::Int8 => 0,
            Self::Uint8 => 1,
            Self::Uint8Clamped => 2,
            Self::Int16 => 3,
            Self::Uint16 => 4,
            Self::Int32 => 5,
            Self::Uint32 => 6,
            Self::Float32 => 7,
            Self::Float64 => 8,
            Self::BigInt64 => 9,
            Self::BigUint64 => 10,
        }
    }

    /// Size in bytes of one element.
    pub fn element_size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Uint8Clamped => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 | Self::BigInt64 | Self::BigUint64 => 8,
        }
    }

    /// JS constructor name, used in range error messages.
    pub fn js_name(self) -> &'static str {
        match self {
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
            Self::BigInt64 => "BigInt64Array",
            Self::BigUint64 => "BigUint64Array",
        }
    }
}

/// Property attribute flags (`napi_property_attributes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PropertyAttributes(u32);

impl PropertyAttributes {
    pub const DEFAULT: Self = Self(0);
    pub const WRITABLE: Self = Self(1);
    pub const ENUMERABLE: Self = Self(1 << 1);
    pub const CONFIGURABLE: Self = Self(1 << 2);
    /// Class-level (constructor) property instead of a prototype property.
    pub const STATIC: Self = Self(1 << 10);
    pub const DEFAULT_METHOD: Self = Self(1 | (1 << 2));
    pub const DEFAULT_JSPROPERTY: Self = Self(1 | (1 << 1) | (1 << 2));

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PropertyAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PropertyAttributes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Runtime version reported by `napi_get_node_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub release: String,
}

impl Display for NodeVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} v{}.{}.{}",
            self.release, self.major, self.minor, self.patch
        )
    }
}

/// Queueing behaviour of a thread-safe function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    NonBlocking,
    Blocking,
}

impl CallMode {
    pub fn as_raw(self) -> i32 {
        match self {
            Self::NonBlocking => 0,
            Self::Blocking => 1,
        }
    }
}

/// How a thread releases its slot on a thread-safe function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    Release,
    /// Close the function immediately; queued items are dropped.
    Abort,
}

impl ReleaseMode {
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Release => 0,
            Self::Abort => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{JsType, PropertyAttributes, SubtypeFlags, TypedArrayKind, ValueKind};

    #[test]
    fn buffer_wins_over_typed_array_and_object() {
        let flags = SubtypeFlags {
            typed_array: true,
            buffer: true,
            ..SubtypeFlags::default()
        };
        assert_eq!(
            JsType::classify(flags, Some(ValueKind::Object)),
            JsType::Buffer
        );

        let plain = SubtypeFlags {
            typed_array: true,
            ..SubtypeFlags::default()
        };
        assert_eq!(
            JsType::classify(plain, Some(ValueKind::Object)),
            JsType::TypedArray
        );
    }

    #[test]
    fn error_is_checked_after_array_buffer() {
        let flags = SubtypeFlags {
            array_buffer: true,
            error: true,
            ..SubtypeFlags::default()
        };
        assert_eq!(
            JsType::classify(flags, Some(ValueKind::Object)),
            JsType::ArrayBuffer
        );
    }

    #[test]
    fn falls_back_to_typeof_and_unknown() {
        let flags = SubtypeFlags::default();
        assert_eq!(
            JsType::classify(flags, Some(ValueKind::BigInt)),
            JsType::BigInt
        );
        assert_eq!(JsType::classify(flags, None), JsType::Unknown);
    }

    #[test]
    fn element_sizes_match_typed_array_layout() {
        assert_eq!(TypedArrayKind::Uint8Clamped.element_size(), 1);
        assert_eq!(TypedArrayKind::Int16.element_size(), 2);
        assert_eq!(TypedArrayKind::Float32.element_size(), 4);
        assert_eq!(TypedArrayKind::BigUint64.element_size(), 8);
        for raw in 0..=10 {
            let kind = TypedArrayKind::from_raw(raw).expect("known kind");
            assert_eq!(kind.as_raw(), raw);
        }
        assert!(TypedArrayKind::from_raw(11).is_none());
    }

    #[test]
    fn composite_attributes_contain_parts() {
        let method = PropertyAttributes::DEFAULT_METHOD;
        assert!(method.contains(PropertyAttributes::WRITABLE));
        assert!(method.contains(PropertyAttributes::CONFIGURABLE));
        assert!(!method.contains(PropertyAttributes::ENUMERABLE));

        let mut attrs = PropertyAttributes::ENUMERABLE;
        attrs |= PropertyAttributes::STATIC;
        assert_eq!(attrs.bits(), 2 | 1024);
    }
}
