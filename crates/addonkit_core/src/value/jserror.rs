use super::{JsString, TypedValue};
use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::host::RawValue;
use crate::types::JsType;

js_value_type!(
    /// JS `Error` object (including `TypeError` and `RangeError`).
    JsError,
    JsType::Error,
    |value| {
        let env = value.env();
        env.check(env.host().is_error(value.raw()))
    }
);
object_like!(JsError);

#[derive(Clone, Copy)]
enum ErrorClass {
    Error,
    TypeError,
    RangeError,
}

impl<'h> JsError<'h> {
    pub fn new(env: Env<'h>, message: &str) -> AddonResult<Self> {
        Self::create(env, ErrorClass::Error, None, message)
    }

    /// `Error` with an enumerable `code` property.
    pub fn with_code(env: Env<'h>, code: &str, message: &str) -> AddonResult<Self> {
        Self::create(env, ErrorClass::Error, Some(code), message)
    }

    pub fn type_error(env: Env<'h>, message: &str) -> AddonResult<Self> {
        Self::create(env, ErrorClass::TypeError, None, message)
    }

    pub fn range_error(env: Env<'h>, message: &str) -> AddonResult<Self> {
        Self::create(env, ErrorClass::RangeError, None, message)
    }

    /// `Error` carrying the display form of `err`.
    pub fn from_addon_error(env: Env<'h>, err: &AddonError) -> AddonResult<Self> {
        Self::new(env, &err.to_string())
    }

    fn create(
        env: Env<'h>,
        class: ErrorClass,
        code: Option<&str>,
        message: &str,
    ) -> AddonResult<Self> {
        let message = JsString::new(env, message)?.raw();
        let code: Option<RawValue> = match code {
            Some(code) => Some(JsString::new(env, code)?.raw()),
            None => None,
        };
        let host = env.host();
        let raw = env.check(match class {
            ErrorClass::Error => host.create_error(code, message),
            ErrorClass::TypeError => host.create_type_error(code, message),
            ErrorClass::RangeError => host.create_range_error(code, message),
        })?;
        Ok(Self(env.value(raw)))
    }

    pub fn message(&self) -> AddonResult<String> {
        self.as_object()
            .get_as::<JsString>("message")?
            .to_string_utf8()
    }

    /// `None` when the error has no string `code`.
    pub fn code(&self) -> AddonResult<Option<String>> {
        let code = self.as_object().get("code")?;
        match code.downcast::<JsString>() {
            Ok(code) => code.to_string_utf8().map(Some),
            Err(_) => Ok(None),
        }
    }

    pub fn throw(self) -> AddonResult<()> {
        self.env().throw_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::JsError;
    use crate::env::Env;
    use crate::error::AddonError;
    use crate::host::MemoryHost;

    #[test]
    fn code_and_message_are_readable() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let err = JsError::with_code(env, "E_LIMIT", "too many").expect("error");
        assert_eq!(err.message().expect("message"), "too many");
        assert_eq!(err.code().expect("code").as_deref(), Some("E_LIMIT"));

        let plain = JsError::range_error(env, "out of range").expect("range");
        assert_eq!(plain.code().expect("code"), None);
        assert_eq!(
            plain.as_value().coerce_to_string().expect("string"),
            "RangeError: out of range"
        );
    }

    #[test]
    fn throw_sets_pending_exception() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        JsError::new(env, "thrown").expect("error").throw().expect("throw");
        assert!(env.is_exception_pending().expect("pending"));
        assert_eq!(
            env.exception_error(),
            AddonError::Exception("thrown".to_string())
        );
    }
}
