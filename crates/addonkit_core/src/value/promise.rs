use super::{JsValue, TypedValue};
use crate::env::Env;
use crate::error::AddonResult;
use crate::host::RawDeferred;
use crate::types::JsType;

js_value_type!(
    /// JS `Promise`.
    JsPromise,
    JsType::Promise,
    |value| {
        let env = value.env();
        env.check(env.host().is_promise(value.raw()))
    }
);
object_like!(JsPromise);

/// Resolver half of a promise. Settling consumes it, so a promise settles
/// at most once.
#[must_use = "a dropped deferred leaves its promise pending forever"]
pub struct JsDeferred<'h> {
    env: Env<'h>,
    raw: RawDeferred,
}

impl<'h> Env<'h> {
    pub fn create_promise(&self) -> AddonResult<(JsDeferred<'h>, JsPromise<'h>)> {
        let (deferred, promise) = self.check(self.host().create_promise())?;
        Ok((
            JsDeferred {
                env: *self,
                raw: deferred,
            },
            JsPromise::from_value_unchecked(self.value(promise)),
        ))
    }
}

impl<'h> JsDeferred<'h> {
    pub(crate) fn from_raw(env: Env<'h>, raw: RawDeferred) -> Self {
        Self { env, raw }
    }

    /// Detaches the resolver from `'h` so it can be settled from a later
    /// callback through `from_raw`.
    pub(crate) fn into_raw(self) -> RawDeferred {
        self.raw
    }

    pub fn env(&self) -> Env<'h> {
        self.env
    }

    pub fn resolve(self, value: impl Into<JsValue<'h>>) -> AddonResult<()> {
        self.env
            .check(self.env.host().resolve_deferred(self.raw, value.into().raw()))
    }

    pub fn reject(self, reason: impl Into<JsValue<'h>>) -> AddonResult<()> {
        self.env
            .check(self.env.host().reject_deferred(self.raw, reason.into().raw()))
    }
}
