use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::types::JsType;
use chrono::{DateTime, Utc};

js_value_type!(
    /// JS `Date`.
    JsDate,
    JsType::Date,
    |value| {
        let env = value.env();
        env.check(env.host().is_date(value.raw()))
    }
);
object_like!(JsDate);

impl<'h> JsDate<'h> {
    pub fn from_epoch_ms(env: Env<'h>, epoch_ms: f64) -> AddonResult<Self> {
        let raw = env.check(env.host().create_date(epoch_ms))?;
        Ok(Self(env.value(raw)))
    }

    pub fn from_datetime(env: Env<'h>, value: DateTime<Utc>) -> AddonResult<Self> {
        Self::from_epoch_ms(env, value.timestamp_millis() as f64)
    }

    /// Milliseconds since the Unix epoch; `NaN` for an invalid date.
    pub fn epoch_ms(&self) -> AddonResult<f64> {
        let env = self.env();
        env.check(env.host().get_date_value(self.raw()))
    }

    pub fn to_datetime(&self) -> AddonResult<DateTime<Utc>> {
        let epoch_ms = self.epoch_ms()?;
        if !epoch_ms.is_finite() {
            return Err(AddonError::conversion("invalid date"));
        }
        DateTime::from_timestamp_millis(epoch_ms as i64)
            .ok_or_else(|| AddonError::conversion(format!("date out of range: {epoch_ms}")))
    }
}
