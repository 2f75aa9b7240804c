//! `#[serde(with = "addonkit_core::convert::js_date")]` for
//! `chrono::DateTime<Utc>` fields.
//!
//! Through [`to_js`](super::to_js) the field becomes a JS `Date`; any other
//! serializer writes an RFC 3339 string with millisecond precision.
//! Deserializing accepts that string or epoch milliseconds, which covers
//! what [`from_js`](super::from_js) reads out of a `Date`.

use super::ser::{serializing_to_js, DATE_TOKEN};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt::Formatter;

pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    if serializing_to_js() {
        serializer.serialize_newtype_struct(DATE_TOKEN, &(value.timestamp_millis() as f64))
    } else {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    deserializer.deserialize_any(DateVisitor)
}

struct DateVisitor;

impl DateVisitor {
    fn from_millis<E: de::Error>(epoch_ms: i64) -> Result<DateTime<Utc>, E> {
        Utc.timestamp_millis_opt(epoch_ms)
            .single()
            .ok_or_else(|| E::custom(format!("date out of range: {epoch_ms}")))
    }
}

impl<'de> Visitor<'de> for DateVisitor {
    type Value = DateTime<Utc>;

    fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("an RFC 3339 date string or epoch milliseconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<DateTime<Utc>, E> {
        DateTime::parse_from_rfc3339(v)
            .map(|date| date.with_timezone(&Utc))
            .map_err(|err| E::custom(format!("invalid date `{v}`: {err}")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<DateTime<Utc>, E> {
        Self::from_millis(v)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<DateTime<Utc>, E> {
        let epoch_ms = i64::try_from(v).map_err(|_| E::custom(format!("date out of range: {v}")))?;
        Self::from_millis(epoch_ms)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<DateTime<Utc>, E> {
        if !v.is_finite() {
            return Err(E::custom("invalid date"));
        }
        Self::from_millis(v as i64)
    }
}
