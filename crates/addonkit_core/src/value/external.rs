use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::host::NativeObject;
use crate::types::{JsType, ValueKind};
use std::rc::Rc;

js_value_type!(
    /// Opaque JS value carrying native Rust data.
    JsExternal,
    JsType::External,
    |value| super::kind_is(value, ValueKind::External)
);

impl<'h> JsExternal<'h> {
    pub fn new<T: 'static>(env: Env<'h>, data: T) -> AddonResult<Self> {
        Self::from_native(env, Rc::new(data))
    }

    pub fn from_native(env: Env<'h>, data: NativeObject) -> AddonResult<Self> {
        let raw = env.check(env.host().create_external(data))?;
        Ok(Self(env.value(raw)))
    }

    pub fn native(&self) -> AddonResult<NativeObject> {
        let env = self.env();
        env.check(env.host().get_value_external(self.raw()))
    }

    /// Returns the attached data when it has type `T`.
    pub fn downcast<T: 'static>(&self) -> AddonResult<Rc<T>> {
        self.native()?.downcast::<T>().map_err(|_| {
            AddonError::invalid_arg(format!(
                "external does not hold {}",
                std::any::type_name::<T>()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::JsExternal;
    use crate::env::Env;
    use crate::host::MemoryHost;
    use crate::types::JsType;

    #[test]
    fn typed_access_checks_the_payload() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let external = JsExternal::new(env, vec![1_u8, 2, 3]).expect("external");
        assert_eq!(external.as_value().js_type().expect("type"), JsType::External);
        assert_eq!(*external.downcast::<Vec<u8>>().expect("vec"), vec![1, 2, 3]);
        assert!(external.downcast::<String>().is_err());
    }
}
