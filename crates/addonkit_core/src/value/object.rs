//! Plain objects and property definitions.

use super::function::{callback, into_raw_callback, CallContext, Callback};
use super::{JsArray, JsFunction, JsString, JsValue, TypedValue};
use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::host::{RawProperty, RawPropertyValue};
use crate::types::{JsType, PropertyAttributes, ValueKind};

js_value_type!(
    /// Any JS object, including functions and object subtypes.
    JsObject,
    JsType::Object,
    |value| Ok(matches!(value.kind()?, ValueKind::Object | ValueKind::Function))
);

enum PropertyValue<'h> {
    Value(JsValue<'h>),
    Method(Callback),
    Accessor {
        getter: Option<Callback>,
        setter: Option<Callback>,
    },
}

/// One property for [`JsObject::define_properties`].
pub struct Property<'h> {
    name: String,
    value: PropertyValue<'h>,
    attributes: PropertyAttributes,
}

impl<'h> Property<'h> {
    /// Data property; writable, enumerable and configurable.
    pub fn value(name: impl Into<String>, value: impl Into<JsValue<'h>>) -> Self {
        Self {
            name: name.into(),
            value: PropertyValue::Value(value.into()),
            attributes: PropertyAttributes::DEFAULT_JSPROPERTY,
        }
    }

    /// Native method; writable and configurable, not enumerable.
    pub fn method<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&CallContext<'a>) -> AddonResult<JsValue<'a>> + 'static,
    {
        Self {
            name: name.into(),
            value: PropertyValue::Method(callback(f)),
            attributes: PropertyAttributes::DEFAULT_METHOD,
        }
    }

    /// Read-only accessor.
    pub fn getter<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&CallContext<'a>) -> AddonResult<JsValue<'a>> + 'static,
    {
        Self {
            name: name.into(),
            value: PropertyValue::Accessor {
                getter: Some(callback(f)),
                setter: None,
            },
            attributes: PropertyAttributes::ENUMERABLE | PropertyAttributes::CONFIGURABLE,
        }
    }

    /// Adds a setter; it receives the assigned value.
    pub fn with_setter<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&CallContext<'a>, JsValue<'a>) -> AddonResult<()> + 'static,
    {
        let setter = callback(move |ctx| {
            f(ctx, ctx.arg(0))?;
            ctx.env().undefined()
        });
        self.value = match self.value {
            PropertyValue::Accessor { getter, .. } => PropertyValue::Accessor {
                getter,
                setter: Some(setter),
            },
            _ => PropertyValue::Accessor {
                getter: None,
                setter: Some(setter),
            },
        };
        self
    }

    pub fn with_attributes(mut self, attributes: PropertyAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_raw(self) -> RawProperty {
        let value = match self.value {
            PropertyValue::Value(value) => RawPropertyValue::Value(value.raw()),
            PropertyValue::Method(method) => RawPropertyValue::Method(into_raw_callback(method)),
            PropertyValue::Accessor { getter, setter } => RawPropertyValue::Accessor {
                getter: getter.map(into_raw_callback),
                setter: setter.map(into_raw_callback),
            },
        };
        RawProperty {
            name: self.name,
            value,
            attributes: self.attributes,
        }
    }
}

impl<'h> JsObject<'h> {
    pub fn new(env: Env<'h>) -> AddonResult<Self> {
        let raw = env.check(env.host().create_object())?;
        Ok(Self(env.value(raw)))
    }

    pub fn get(&self, name: &str) -> AddonResult<JsValue<'h>> {
        let env = self.env();
        let raw = env.check(env.host().get_named_property(self.raw(), name))?;
        Ok(env.value(raw))
    }

    /// Reads a property and downcasts it.
    pub fn get_as<T: TypedValue<'h>>(&self, name: &str) -> AddonResult<T> {
        self.get(name)?.downcast()
    }

    pub fn set(&self, name: &str, value: impl Into<JsValue<'h>>) -> AddonResult<()> {
        let env = self.env();
        env.check(
            env.host()
                .set_named_property(self.raw(), name, value.into().raw()),
        )
    }

    pub fn get_with_key(&self, key: impl Into<JsValue<'h>>) -> AddonResult<JsValue<'h>> {
        let env = self.env();
        let raw = env.check(env.host().get_property(self.raw(), key.into().raw()))?;
        Ok(env.value(raw))
    }

    pub fn set_with_key(
        &self,
        key: impl Into<JsValue<'h>>,
        value: impl Into<JsValue<'h>>,
    ) -> AddonResult<()> {
        let env = self.env();
        env.check(
            env.host()
                .set_property(self.raw(), key.into().raw(), value.into().raw()),
        )
    }

    /// `name in object`, prototype chain included.
    pub fn has(&self, name: &str) -> AddonResult<bool> {
        let env = self.env();
        env.check(env.host().has_named_property(self.raw(), name))
    }

    pub fn has_key(&self, key: impl Into<JsValue<'h>>) -> AddonResult<bool> {
        let env = self.env();
        env.check(env.host().has_property(self.raw(), key.into().raw()))
    }

    pub fn has_own(&self, name: &str) -> AddonResult<bool> {
        let env = self.env();
        let key = JsString::new(env, name)?;
        env.check(env.host().has_own_property(self.raw(), key.raw()))
    }

    /// Returns `false` when the property is not configurable.
    pub fn delete(&self, name: &str) -> AddonResult<bool> {
        let key = JsString::new(self.env(), name)?;
        self.delete_key(key)
    }

    pub fn delete_key(&self, key: impl Into<JsValue<'h>>) -> AddonResult<bool> {
        let env = self.env();
        env.check(env.host().delete_property(self.raw(), key.into().raw()))
    }

    /// Enumerable string keys, inherited ones included, as a JS array.
    pub fn property_names(&self) -> AddonResult<JsArray<'h>> {
        let env = self.env();
        let raw = env.check(env.host().get_property_names(self.raw()))?;
        Ok(JsArray::from_value_unchecked(env.value(raw)))
    }

    pub fn keys(&self) -> AddonResult<Vec<String>> {
        self.property_names()?
            .to_vec()?
            .into_iter()
            .map(|name| name.coerce_to_string())
            .collect()
    }

    pub fn entries(&self) -> AddonResult<Vec<(String, JsValue<'h>)>> {
        let mut entries = Vec::new();
        for key in self.keys()? {
            let value = self.get(&key)?;
            entries.push((key, value));
        }
        Ok(entries)
    }

    pub fn instance_of(&self, constructor: &JsFunction<'h>) -> AddonResult<bool> {
        let env = self.env();
        env.check(env.host().instance_of(self.raw(), constructor.raw()))
    }

    pub fn freeze(&self) -> AddonResult<()> {
        let env = self.env();
        env.check(env.host().object_freeze(self.raw()))
    }

    pub fn seal(&self) -> AddonResult<()> {
        let env = self.env();
        env.check(env.host().object_seal(self.raw()))
    }

    pub fn define_properties(&self, properties: Vec<Property<'h>>) -> AddonResult<()> {
        if let Some(unnamed) = properties.iter().find(|property| property.name.is_empty()) {
            return Err(AddonError::invalid_arg(format!(
                "property name must not be empty (got {:?})",
                unnamed.name
            )));
        }
        let env = self.env();
        let raw = properties.into_iter().map(Property::into_raw).collect();
        env.check(env.host().define_properties(self.raw(), raw))
    }
}

#[cfg(test)]
mod tests {
    use super::{JsObject, Property};
    use crate::env::Env;
    use crate::host::MemoryHost;
    use crate::types::PropertyAttributes;
    use crate::value::{JsNumber, JsString};

    #[test]
    fn keys_and_entries_follow_insertion_order() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let object = JsObject::new(env).expect("object");
        object.set("z", JsNumber::from_i32(env, 1).expect("n")).expect("set");
        object.set("a", JsNumber::from_i32(env, 2).expect("n")).expect("set");
        assert_eq!(object.keys().expect("keys"), vec!["z", "a"]);
        let entries = object.entries().expect("entries");
        assert_eq!(entries.len(), 2);
        let second: JsNumber = entries[1].1.downcast().expect("number");
        assert_eq!(second.to_i32().expect("i32"), 2);
    }

    #[test]
    fn frozen_object_ignores_writes_and_deletes() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let object = JsObject::new(env).expect("object");
        object.set("kept", JsString::new(env, "yes").expect("s")).expect("set");
        object.freeze().expect("freeze");
        object.set("kept", JsString::new(env, "no").expect("s")).expect("set");
        object.set("added", JsString::new(env, "no").expect("s")).expect("set");
        assert!(!object.delete("kept").expect("delete"));
        let kept: JsString = object.get_as("kept").expect("kept");
        assert_eq!(kept.to_string_utf8().expect("utf8"), "yes");
        assert!(!object.has("added").expect("has"));
    }

    #[test]
    fn accessor_properties_call_native_code() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let object = JsObject::new(env).expect("object");
        object
            .define_properties(vec![
                Property::getter("answer", |ctx| {
                    JsNumber::from_i32(ctx.env(), 42).map(Into::into)
                })
                .with_setter(|ctx, value| ctx.this_object()?.set("written", value)),
                Property::value("hidden", JsNumber::from_i32(env, 1).expect("n"))
                    .with_attributes(PropertyAttributes::WRITABLE),
            ])
            .expect("define");

        let answer: JsNumber = object.get_as("answer").expect("answer");
        assert_eq!(answer.to_i32().expect("i32"), 42);
        object
            .set("answer", JsString::new(env, "set").expect("s"))
            .expect("assign");
        assert!(object.has_own("written").expect("has_own"));
        assert_eq!(object.keys().expect("keys"), vec!["answer", "written"]);
    }

    #[test]
    fn empty_property_name_is_rejected() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let object = JsObject::new(env).expect("object");
        let err = object
            .define_properties(vec![Property::value("", JsNumber::from_i32(env, 1).expect("n"))])
            .expect_err("empty name");
        assert!(err.to_string().starts_with("invalid argument"));
    }
}
