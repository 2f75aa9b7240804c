use super::kind_is;
use crate::env::Env;
use crate::error::AddonResult;
use crate::types::{JsType, ValueKind};

js_value_type!(
    /// JS boolean primitive.
    JsBoolean,
    JsType::Boolean,
    |value| kind_is(value, ValueKind::Boolean)
);

impl<'h> JsBoolean<'h> {
    pub fn new(env: Env<'h>, value: bool) -> AddonResult<Self> {
        let raw = env.check(env.host().get_boolean(value))?;
        Ok(Self(env.value(raw)))
    }

    pub fn get(&self) -> AddonResult<bool> {
        let env = self.env();
        env.check(env.host().get_value_bool(self.raw()))
    }
}
