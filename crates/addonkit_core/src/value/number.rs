//! Number and BigInt wrappers.
//!
//! Integer reads follow Node-API: non-finite numbers read as zero, 32-bit
//! reads keep the low 32 bits and 64-bit reads saturate.

use super::kind_is;
use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::types::{JsType, ValueKind};

js_value_type!(
    /// JS number primitive.
    JsNumber,
    JsType::Number,
    |value| kind_is(value, ValueKind::Number)
);

js_value_type!(
    /// JS bigint primitive.
    JsBigInt,
    JsType::BigInt,
    |value| kind_is(value, ValueKind::BigInt)
);

impl<'h> JsNumber<'h> {
    pub fn from_f64(env: Env<'h>, value: f64) -> AddonResult<Self> {
        let raw = env.check(env.host().create_double(value))?;
        Ok(Self(env.value(raw)))
    }

    pub fn from_i32(env: Env<'h>, value: i32) -> AddonResult<Self> {
        let raw = env.check(env.host().create_int32(value))?;
        Ok(Self(env.value(raw)))
    }

    pub fn from_u32(env: Env<'h>, value: u32) -> AddonResult<Self> {
        let raw = env.check(env.host().create_uint32(value))?;
        Ok(Self(env.value(raw)))
    }

    /// Values beyond 2^53 lose precision.
    pub fn from_i64(env: Env<'h>, value: i64) -> AddonResult<Self> {
        let raw = env.check(env.host().create_int64(value))?;
        Ok(Self(env.value(raw)))
    }

    /// Creates a number from any Rust numeric type.
    pub fn new(env: Env<'h>, value: impl IntoJsNumber) -> AddonResult<Self> {
        value.into_js_number(env)
    }

    pub fn to_f64(&self) -> AddonResult<f64> {
        let env = self.env();
        env.check(env.host().get_value_double(self.raw()))
    }

    pub fn to_i32(&self) -> AddonResult<i32> {
        let env = self.env();
        env.check(env.host().get_value_int32(self.raw()))
    }

    pub fn to_u32(&self) -> AddonResult<u32> {
        let env = self.env();
        env.check(env.host().get_value_uint32(self.raw()))
    }

    pub fn to_i64(&self) -> AddonResult<i64> {
        let env = self.env();
        env.check(env.host().get_value_int64(self.raw()))
    }
}

/// Rust numeric types that map onto a JS number.
pub trait IntoJsNumber {
    fn into_js_number(self, env: Env<'_>) -> AddonResult<JsNumber<'_>>;
}

macro_rules! into_js_number {
    ($($ty:ty => $ctor:ident as $target:ty),* $(,)?) => {
        $(
            impl IntoJsNumber for $ty {
                fn into_js_number(self, env: Env<'_>) -> AddonResult<JsNumber<'_>> {
                    JsNumber::$ctor(env, <$target>::from(self))
                }
            }
        )*
    };
}

into_js_number!(
    i8 => from_i32 as i32,
    i16 => from_i32 as i32,
    i32 => from_i32 as i32,
    u8 => from_u32 as u32,
    u16 => from_u32 as u32,
    u32 => from_u32 as u32,
    i64 => from_i64 as i64,
    f32 => from_f64 as f64,
    f64 => from_f64 as f64,
);

impl IntoJsNumber for u64 {
    fn into_js_number(self, env: Env<'_>) -> AddonResult<JsNumber<'_>> {
        JsNumber::from_f64(env, self as f64)
    }
}

impl IntoJsNumber for isize {
    fn into_js_number(self, env: Env<'_>) -> AddonResult<JsNumber<'_>> {
        JsNumber::from_i64(env, self as i64)
    }
}

impl IntoJsNumber for usize {
    fn into_js_number(self, env: Env<'_>) -> AddonResult<JsNumber<'_>> {
        JsNumber::from_f64(env, self as f64)
    }
}

impl<'h> JsBigInt<'h> {
    pub fn from_i64(env: Env<'h>, value: i64) -> AddonResult<Self> {
        let raw = env.check(env.host().create_bigint_int64(value))?;
        Ok(Self(env.value(raw)))
    }

    pub fn from_u64(env: Env<'h>, value: u64) -> AddonResult<Self> {
        let raw = env.check(env.host().create_bigint_uint64(value))?;
        Ok(Self(env.value(raw)))
    }

    /// Returns the truncated value and whether it fit losslessly.
    pub fn get_i64(&self) -> AddonResult<(i64, bool)> {
        let env = self.env();
        env.check(env.host().get_value_bigint_int64(self.raw()))
    }

    pub fn get_u64(&self) -> AddonResult<(u64, bool)> {
        let env = self.env();
        env.check(env.host().get_value_bigint_uint64(self.raw()))
    }

    /// Fails unless the value fits in `i64`.
    pub fn to_i64(&self) -> AddonResult<i64> {
        match self.get_i64()? {
            (value, true) => Ok(value),
            (_, false) => Err(AddonError::conversion("bigint does not fit in i64")),
        }
    }

    /// Fails unless the value fits in `u64`.
    pub fn to_u64(&self) -> AddonResult<u64> {
        match self.get_u64()? {
            (value, true) => Ok(value),
            (_, false) => Err(AddonError::conversion("bigint does not fit in u64")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{JsBigInt, JsNumber};
    use crate::env::Env;
    use crate::host::MemoryHost;

    #[test]
    fn generic_constructor_accepts_rust_numbers() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        assert_eq!(JsNumber::new(env, 7_u8).expect("u8").to_f64().expect("f64"), 7.0);
        assert_eq!(JsNumber::new(env, -3_i16).expect("i16").to_i32().expect("i32"), -3);
        assert_eq!(JsNumber::new(env, 2.5_f32).expect("f32").to_f64().expect("f64"), 2.5);
    }

    #[test]
    fn truncating_reads() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let negative = JsNumber::from_f64(env, -1.9).expect("number");
        assert_eq!(negative.to_i32().expect("i32"), -1);
        assert_eq!(negative.to_u32().expect("u32"), u32::MAX);
        let infinite = JsNumber::from_f64(env, f64::INFINITY).expect("number");
        assert_eq!(infinite.to_i64().expect("i64"), 0);
        assert_eq!(infinite.to_i32().expect("i32"), 0);
    }

    #[test]
    fn bigint_lossless_flag() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let big = JsBigInt::from_u64(env, u64::MAX).expect("bigint");
        assert_eq!(big.get_u64().expect("u64"), (u64::MAX, true));
        assert_eq!(big.get_i64().expect("i64"), (-1, false));
        assert!(big.to_i64().is_err());

        let negative = JsBigInt::from_i64(env, -5).expect("bigint");
        assert_eq!(negative.to_i64().expect("i64"), -5);
        assert!(negative.to_u64().is_err());
    }
}
