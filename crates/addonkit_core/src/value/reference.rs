use super::JsValue;
use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::host::RawRef;
use log::warn;

/// Persistent handle to a JS object, external or symbol.
///
/// A count of zero makes the reference weak. The reference is deleted on
/// drop unless `delete` already did it.
pub struct JsReference<'h> {
    env: Env<'h>,
    raw: Option<RawRef>,
}

impl<'h> JsReference<'h> {
    pub fn new(value: impl Into<JsValue<'h>>, initial_refcount: u32) -> AddonResult<Self> {
        let value = value.into();
        let env = value.env();
        let raw = env.check(env.host().create_reference(value.raw(), initial_refcount))?;
        Ok(Self {
            env,
            raw: Some(raw),
        })
    }

    fn handle(&self) -> AddonResult<RawRef> {
        self.raw
            .ok_or_else(|| AddonError::invalid_arg("reference already deleted"))
    }

    /// Increments the count and returns the new value.
    pub fn ref_(&self) -> AddonResult<u32> {
        self.env.check(self.env.host().reference_ref(self.handle()?))
    }

    /// Decrements the count; unref at zero fails.
    pub fn unref(&self) -> AddonResult<u32> {
        self.env.check(self.env.host().reference_unref(self.handle()?))
    }

    /// `None` once a weak target was collected.
    pub fn value(&self) -> AddonResult<Option<JsValue<'h>>> {
        let raw = self
            .env
            .check(self.env.host().get_reference_value(self.handle()?))?;
        Ok(raw.map(|raw| self.env.value(raw)))
    }

    pub fn delete(mut self) -> AddonResult<()> {
        match self.raw.take() {
            Some(raw) => self.env.check(self.env.host().delete_reference(raw)),
            None => Ok(()),
        }
    }
}

impl Drop for JsReference<'_> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            if let Err(status) = self.env.host().delete_reference(raw) {
                warn!("event=reference_delete_failed module=reference status=error napi_status={status}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::JsReference;
    use crate::env::Env;
    use crate::host::MemoryHost;
    use crate::value::JsObject;

    #[test]
    fn weak_reference_clears_after_collection() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let object = JsObject::new(env).expect("object");
        let reference = JsReference::new(object, 1).expect("reference");

        assert!(!host.collect(object.raw()));
        assert_eq!(reference.unref().expect("unref"), 0);
        assert!(reference.unref().is_err());
        assert!(host.collect(object.raw()));
        assert!(reference.value().expect("value").is_none());
        reference.delete().expect("delete");
    }

    #[test]
    fn strong_reference_keeps_value() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let object = JsObject::new(env).expect("object");
        let reference = JsReference::new(object, 0).expect("reference");
        assert_eq!(reference.ref_().expect("ref"), 1);
        let held = reference.value().expect("value").expect("alive");
        assert!(held.strict_equals(object).expect("eq"));
    }
}
