//! Value converters.
//!
//! Every value held in the store is text. A [`Converter`] maps one Rust type
//! to and from that text. Converters are stateless and must round-trip every
//! value they can encode.
//!
//! Dates are written as RFC 3339 in UTC with millisecond precision, e.g.
//! `2015-07-13T17:17:38.000Z`. Any RFC 3339 offset is accepted on decode.
//!
//! [`SerializableConverter`] is an opaque JSON + base64 codec and is not
//! byte-compatible with the scalar converters: `true` encodes as `"1"` through
//! [`BooleanConverter`] but as `"dHJ1ZQ=="` through `SerializableConverter<bool>`.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;

use crate::error::ConvertError;

/// Bidirectional mapping between `T` and its stored text.
pub trait Converter<T>: Send + Sync {
    /// Encode a value for storage.
    fn encode(&self, value: &T) -> Result<String, ConvertError>;

    /// Decode stored text.
    fn decode(&self, raw: &str) -> Result<T, ConvertError>;
}

/// Raw strings, stored as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringConverter;

impl Converter<String> for StringConverter {
    fn encode(&self, value: &String) -> Result<String, ConvertError> {
        Ok(value.clone())
    }

    fn decode(&self, raw: &str) -> Result<String, ConvertError> {
        Ok(raw.to_string())
    }
}

/// Booleans as `"1"` and `"0"`.
///
/// Empty text decodes as `false`, any other integer as `value != 0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanConverter;

impl Converter<bool> for BooleanConverter {
    fn encode(&self, value: &bool) -> Result<String, ConvertError> {
        Ok(if *value { "1" } else { "0" }.to_string())
    }

    fn decode(&self, raw: &str) -> Result<bool, ConvertError> {
        if raw.is_empty() {
            return Ok(false);
        }
        raw.parse::<i64>()
            .map(|i| i != 0)
            .map_err(|e| ConvertError::new("boolean", raw, e))
    }
}

/// 32-bit integers in decimal.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerConverter;

impl Converter<i32> for IntegerConverter {
    fn encode(&self, value: &i32) -> Result<String, ConvertError> {
        Ok(value.to_string())
    }

    fn decode(&self, raw: &str) -> Result<i32, ConvertError> {
        raw.parse().map_err(|e| ConvertError::new("integer", raw, e))
    }
}

/// 64-bit integers in decimal.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongConverter;

impl Converter<i64> for LongConverter {
    fn encode(&self, value: &i64) -> Result<String, ConvertError> {
        Ok(value.to_string())
    }

    fn decode(&self, raw: &str) -> Result<i64, ConvertError> {
        raw.parse().map_err(|e| ConvertError::new("long", raw, e))
    }
}

/// Milliseconds since the Unix epoch, stored as date-time text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampConverter;

impl Converter<i64> for TimestampConverter {
    fn encode(&self, value: &i64) -> Result<String, ConvertError> {
        let at = DateTime::<Utc>::from_timestamp_millis(*value)
            .ok_or_else(|| ConvertError::new("timestamp", &value.to_string(), "out of range"))?;
        check_year(&at, "timestamp")?;
        Ok(format_date_time(&at))
    }

    fn decode(&self, raw: &str) -> Result<i64, ConvertError> {
        parse_date_time(raw, "timestamp").map(|at| at.timestamp_millis())
    }
}

/// UTC date-times, stored as date-time text.
///
/// Fractional seconds keep as many digits as the value needs (0, 3, 6 or 9).
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeConverter;

impl Converter<DateTime<Utc>> for DateTimeConverter {
    fn encode(&self, value: &DateTime<Utc>) -> Result<String, ConvertError> {
        check_year(value, "date-time")?;
        Ok(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    fn decode(&self, raw: &str) -> Result<DateTime<Utc>, ConvertError> {
        parse_date_time(raw, "date-time")
    }
}

/// Any serde type, as base64-encoded JSON.
pub struct SerializableConverter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerializableConverter<T> {
    /// Create a new converter.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerializableConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SerializableConverter<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SerializableConverter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializableConverter")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Converter<T> for SerializableConverter<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<String, ConvertError> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            ConvertError::new("serialized value", std::any::type_name::<T>(), e)
        })?;
        Ok(STANDARD.encode(bytes))
    }

    fn decode(&self, raw: &str) -> Result<T, ConvertError> {
        let bytes = STANDARD
            .decode(raw)
            .map_err(|e| ConvertError::new("serialized value", raw, e))?;
        serde_json::from_slice(&bytes).map_err(|e| ConvertError::new("serialized value", raw, e))
    }
}

/// Format a date-time the way every date converter stores it.
pub fn format_date_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// RFC 3339 has four-digit years only; anything else would not decode.
fn check_year(at: &DateTime<Utc>, kind: &'static str) -> Result<(), ConvertError> {
    if (0..=9999).contains(&at.year()) {
        Ok(())
    } else {
        Err(ConvertError::new(kind, &at.to_string(), "year outside 0000-9999"))
    }
}

fn parse_date_time(raw: &str, kind: &'static str) -> Result<DateTime<Utc>, ConvertError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| ConvertError::new(kind, raw, e))
}
