use super::{JsValue, TypedValue};
use crate::convert::to_js;
use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::types::JsType;
use serde::Serialize;

/// Upper bound on up-front reservations sized by a JS-reported length.
const RESERVE_LIMIT: u32 = 1024;

/// Capacity to reserve for `length` elements read from JS. Sparse arrays
/// report lengths up to `u32::MAX` without backing storage.
pub(crate) fn reserve_hint(length: u32) -> usize {
    length.min(RESERVE_LIMIT) as usize
}

js_value_type!(
    /// JS array.
    JsArray,
    JsType::Array,
    |value| {
        let env = value.env();
        env.check(env.host().is_array(value.raw()))
    }
);
object_like!(JsArray);

impl<'h> JsArray<'h> {
    pub fn new(env: Env<'h>) -> AddonResult<Self> {
        let raw = env.check(env.host().create_array())?;
        Ok(Self(env.value(raw)))
    }

    /// Array of `length` holes.
    pub fn with_length(env: Env<'h>, length: usize) -> AddonResult<Self> {
        let raw = env.check(env.host().create_array_with_length(length))?;
        Ok(Self(env.value(raw)))
    }

    pub fn from_values(env: Env<'h>, values: &[JsValue<'h>]) -> AddonResult<Self> {
        let array = Self::new(env)?;
        array.extend(values.iter().copied())?;
        Ok(array)
    }

    pub fn len(&self) -> AddonResult<u32> {
        let env = self.env();
        env.check(env.host().get_array_length(self.raw()))
    }

    pub fn is_empty(&self) -> AddonResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads `array[index]`; holes and out-of-range indexes read `undefined`.
    pub fn get(&self, index: u32) -> AddonResult<JsValue<'h>> {
        let env = self.env();
        let raw = env.check(env.host().get_element(self.raw(), index))?;
        Ok(env.value(raw))
    }

    pub fn get_as<T: TypedValue<'h>>(&self, index: u32) -> AddonResult<T> {
        self.get(index)?.downcast()
    }

    pub fn set(&self, index: u32, value: impl Into<JsValue<'h>>) -> AddonResult<()> {
        let env = self.env();
        env.check(env.host().set_element(self.raw(), index, value.into().raw()))
    }

    pub fn has(&self, index: u32) -> AddonResult<bool> {
        let env = self.env();
        env.check(env.host().has_element(self.raw(), index))
    }

    /// Leaves a hole at `index`.
    pub fn delete(&self, index: u32) -> AddonResult<bool> {
        let env = self.env();
        env.check(env.host().delete_element(self.raw(), index))
    }

    /// Appends after the current length.
    pub fn push(&self, value: impl Into<JsValue<'h>>) -> AddonResult<()> {
        let index = self.len()?;
        self.set(index, value)
    }

    /// # Errors
    /// - `InvalidArg` once an index would pass `u32::MAX`; earlier items stay set.
    pub fn extend<V, I>(&self, values: I) -> AddonResult<()>
    where
        V: Into<JsValue<'h>>,
        I: IntoIterator<Item = V>,
    {
        self.append_with(values, |value| Ok(value.into()))
    }

    /// Appends every item after converting it with serde.
    pub fn extend_serialized<T, I>(&self, values: I) -> AddonResult<()>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let env = self.env();
        self.append_with(values, |value| to_js(env, &value))
    }

    fn append_with<V, I>(
        &self,
        values: I,
        mut convert: impl FnMut(V) -> AddonResult<JsValue<'h>>,
    ) -> AddonResult<()>
    where
        I: IntoIterator<Item = V>,
    {
        let start = self.len()?;
        for (offset, value) in values.into_iter().enumerate() {
            let index = u32::try_from(offset)
                .ok()
                .and_then(|offset| start.checked_add(offset))
                .ok_or_else(|| AddonError::invalid_arg("array index past u32::MAX"))?;
            self.set(index, convert(value)?)?;
        }
        Ok(())
    }

    pub fn to_vec(&self) -> AddonResult<Vec<JsValue<'h>>> {
        let length = self.len()?;
        let mut values = Vec::with_capacity(reserve_hint(length));
        for index in 0..length {
            values.push(self.get(index)?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::{reserve_hint, JsArray};
    use crate::env::Env;
    use crate::error::AddonError;
    use crate::host::MemoryHost;
    use crate::value::{JsNumber, JsString};

    #[test]
    fn push_and_extend_append_after_length() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let array = JsArray::with_length(env, 2).expect("array");
        array.push(JsString::new(env, "third").expect("s")).expect("push");
        array.extend_serialized([4, 5]).expect("extend");
        assert_eq!(array.len().expect("len"), 5);
        assert!(!array.has(0).expect("hole"));
        assert!(array.get(0).expect("hole").is_undefined().expect("undefined"));
        let last: JsNumber = array.get_as(4).expect("last");
        assert_eq!(last.to_i32().expect("i32"), 5);
    }

    #[test]
    fn delete_leaves_hole_and_keeps_length() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let values = [
            JsNumber::from_i32(env, 1).expect("n").into(),
            JsNumber::from_i32(env, 2).expect("n").into(),
        ];
        let array = JsArray::from_values(env, &values).expect("array");
        assert!(array.delete(0).expect("delete"));
        assert_eq!(array.len().expect("len"), 2);
        assert_eq!(array.to_vec().expect("vec").len(), 2);
        assert!(array.as_value().downcast::<JsArray>().is_ok());
    }

    #[test]
    fn extend_stops_at_the_last_index() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let array = JsArray::with_length(env, u32::MAX as usize).expect("sparse array");
        assert_eq!(array.len().expect("len"), u32::MAX);

        let err = array
            .extend_serialized([1, 2])
            .expect_err("second index overflows");
        assert!(matches!(err, AddonError::InvalidArg(_)));
    }

    #[test]
    fn reservations_are_capped_for_sparse_lengths() {
        assert_eq!(reserve_hint(3), 3);
        assert_eq!(reserve_hint(u32::MAX), 1024);
    }
}
