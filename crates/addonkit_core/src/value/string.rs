use super::kind_is;
use crate::env::Env;
use crate::error::AddonResult;
use crate::types::{JsType, ValueKind};

js_value_type!(
    /// JS string primitive.
    JsString,
    JsType::String,
    |value| kind_is(value, ValueKind::String)
);

impl<'h> JsString<'h> {
    pub fn new(env: Env<'h>, value: &str) -> AddonResult<Self> {
        let raw = env.check(env.host().create_string_utf8(value))?;
        Ok(Self(env.value(raw)))
    }

    pub fn from_utf16(env: Env<'h>, units: &[u16]) -> AddonResult<Self> {
        let raw = env.check(env.host().create_string_utf16(units))?;
        Ok(Self(env.value(raw)))
    }

    pub fn to_string_utf8(&self) -> AddonResult<String> {
        let env = self.env();
        env.check(env.host().get_value_string_utf8(self.raw()))
    }

    pub fn to_utf16(&self) -> AddonResult<Vec<u16>> {
        let env = self.env();
        env.check(env.host().get_value_string_utf16(self.raw()))
    }

    /// Length in UTF-16 code units, as JS `length` reports it.
    pub fn len_utf16(&self) -> AddonResult<usize> {
        Ok(self.to_utf16()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::JsString;
    use crate::env::Env;
    use crate::host::MemoryHost;

    #[test]
    fn utf16_and_utf8_views_agree() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let text = JsString::new(env, "héllo 🦀").expect("string");
        assert_eq!(text.to_string_utf8().expect("utf8"), "héllo 🦀");
        assert_eq!(text.len_utf16().expect("len"), 8);

        let units: Vec<u16> = "crab".encode_utf16().collect();
        let from_units = JsString::from_utf16(env, &units).expect("utf16");
        assert_eq!(from_units.to_string_utf8().expect("utf8"), "crab");
    }
}
