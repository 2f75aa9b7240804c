use super::{kind_is, JsString};
use crate::env::Env;
use crate::error::AddonResult;
use crate::types::{JsType, ValueKind};

js_value_type!(
    /// JS symbol; every created symbol is unique.
    JsSymbol,
    JsType::Symbol,
    |value| kind_is(value, ValueKind::Symbol)
);

impl<'h> JsSymbol<'h> {
    pub fn new(env: Env<'h>, description: Option<&str>) -> AddonResult<Self> {
        let description = match description {
            Some(text) => Some(JsString::new(env, text)?.raw()),
            None => None,
        };
        let raw = env.check(env.host().create_symbol(description))?;
        Ok(Self(env.value(raw)))
    }
}
