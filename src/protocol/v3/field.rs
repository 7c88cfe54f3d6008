//! Field mapping between raw JSON objects and typed sentence records
//!
//! Every declared field of a sentence is read through [`FieldValue`], which
//! fixes three things per Rust type: what counts as a compatible JSON value,
//! what the absent sentinel is, and how two values compare. Floating point
//! fields use NaN as their absent sentinel and treat two NaNs as equal, so a
//! record decoded from a sparse line still equals itself.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::DecodeError;

/// One decoded line before classification
///
/// Key order follows the wire order.
pub type RawMessage = serde_json::Map<String, Value>;

/// A scalar that can be read from and written back to a [`RawMessage`]
pub trait FieldValue: Sized {
    /// Name of the expected JSON type, used in mismatch errors
    const EXPECTED: &'static str;

    /// Sentinel used when the key is missing
    fn absent() -> Self;

    /// Converts a present, non-null JSON value; `None` means incompatible
    fn from_json(value: &Value) -> Option<Self>;

    /// Converts back to JSON; `None` when the value is the absent sentinel
    fn to_json(&self) -> Option<Value>;

    /// Whether this value carries data
    fn is_present(&self) -> bool;

    /// Equality where two absent values are equal
    fn same(&self, other: &Self) -> bool;

    /// Hash consistent with [`FieldValue::same`]
    fn hash_value<H: std::hash::Hasher>(&self, state: &mut H);
}

fn hash_f64<H: std::hash::Hasher>(value: f64, state: &mut H) {
    use std::hash::Hash;
    // NaN payloads and the sign of zero must not split equal values
    let bits = if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    };
    bits.hash(state);
}

fn same_f64(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

impl FieldValue for f64 {
    const EXPECTED: &'static str = "number";

    fn absent() -> Self {
        f64::NAN
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_f64()
    }

    fn to_json(&self) -> Option<Value> {
        // from_f64 rejects NaN and infinities
        serde_json::Number::from_f64(*self).map(Value::Number)
    }

    fn is_present(&self) -> bool {
        !self.is_nan()
    }

    fn same(&self, other: &Self) -> bool {
        same_f64(*self, *other)
    }

    fn hash_value<H: std::hash::Hasher>(&self, state: &mut H) {
        hash_f64(*self, state);
    }
}

impl FieldValue for Option<i64> {
    const EXPECTED: &'static str = "integer";

    fn absent() -> Self {
        None
    }

    fn from_json(value: &Value) -> Option<Self> {
        if let Some(int) = value.as_i64() {
            return Some(Some(int));
        }
        match value.as_f64() {
            Some(float) if float.fract() == 0.0 && float.abs() < i64::MAX as f64 => {
                Some(Some(float as i64))
            }
            _ => None,
        }
    }

    fn to_json(&self) -> Option<Value> {
        self.map(Value::from)
    }

    fn is_present(&self) -> bool {
        self.is_some()
    }

    fn same(&self, other: &Self) -> bool {
        self == other
    }

    fn hash_value<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(self, state);
    }
}

impl FieldValue for Option<bool> {
    const EXPECTED: &'static str = "boolean";

    fn absent() -> Self {
        None
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_bool().map(Some)
    }

    fn to_json(&self) -> Option<Value> {
        self.map(Value::Bool)
    }

    fn is_present(&self) -> bool {
        self.is_some()
    }

    fn same(&self, other: &Self) -> bool {
        self == other
    }

    fn hash_value<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(self, state);
    }
}

impl FieldValue for Option<String> {
    const EXPECTED: &'static str = "string";

    fn absent() -> Self {
        None
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_str().map(|s| Some(s.to_owned()))
    }

    fn to_json(&self) -> Option<Value> {
        self.as_ref().map(|s| Value::String(s.clone()))
    }

    fn is_present(&self) -> bool {
        self.is_some()
    }

    fn same(&self, other: &Self) -> bool {
        self == other
    }

    fn hash_value<H: std::hash::Hasher>(&self, state: &mut H) {
        std::hash::Hash::hash(self, state);
    }
}

/// Seconds since the Unix epoch, UTC, or NaN when absent
///
/// On the wire this is either a number (older daemons) or an ISO 8601
/// string (gpsd 3.x). Both decode to the same representation and always
/// encode back as a number. Calendar conversions resolve to the microsecond,
/// the finest step an `f64` holds exactly at present-day epoch values.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp(f64);

impl Timestamp {
    /// The absent timestamp
    pub const ABSENT: Timestamp = Timestamp(f64::NAN);

    /// Creates a timestamp from epoch seconds
    pub fn from_secs(secs: f64) -> Self {
        Timestamp(secs)
    }

    /// Epoch seconds, NaN when absent
    pub fn secs(&self) -> f64 {
        self.0
    }

    /// Whether the timestamp was present on the wire
    pub fn is_present(&self) -> bool {
        !self.0.is_nan()
    }

    /// Converts to a calendar time, `None` when absent or out of range
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        if !self.0.is_finite() {
            return None;
        }
        let micros = (self.0 * 1e6).round();
        let secs = micros.div_euclid(1e6);
        let subsec_micros = micros.rem_euclid(1e6) as u32;
        DateTime::<Utc>::from_timestamp(secs as i64, subsec_micros * 1_000)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp(dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9)
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        same_f64(self.0, other.0)
    }
}

impl Eq for Timestamp {}

impl std::hash::Hash for Timestamp {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        hash_f64(self.0, state);
    }
}

impl FieldValue for Timestamp {
    const EXPECTED: &'static str = "epoch seconds or ISO 8601 time";

    fn absent() -> Self {
        Timestamp::ABSENT
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(num) => num.as_f64().map(Timestamp),
            Value::String(iso) => DateTime::parse_from_rfc3339(iso)
                .ok()
                .map(|dt| Timestamp::from(dt.with_timezone(&Utc))),
            _ => None,
        }
    }

    fn to_json(&self) -> Option<Value> {
        self.0.to_json()
    }

    fn is_present(&self) -> bool {
        Timestamp::is_present(self)
    }

    fn same(&self, other: &Self) -> bool {
        self == other
    }

    fn hash_value<H: std::hash::Hasher>(&self, state: &mut H) {
        hash_f64(self.0, state);
    }
}

/// Reads declared fields out of one raw message for a given sentence class
pub struct FieldReader<'a> {
    raw: &'a RawMessage,
    variant: &'static str,
}

impl<'a> FieldReader<'a> {
    /// Creates a reader attributing mismatches to `variant`
    pub fn new(raw: &'a RawMessage, variant: &'static str) -> Self {
        FieldReader { raw, variant }
    }

    /// Reads `field`, substituting the absent sentinel for missing or null keys
    pub fn get<T: FieldValue>(&self, field: &'static str) -> Result<T, DecodeError> {
        match self.raw.get(field) {
            None | Some(Value::Null) => Ok(T::absent()),
            Some(value) => T::from_json(value).ok_or(DecodeError::FieldTypeMismatch {
                variant: self.variant,
                field,
                expected: T::EXPECTED,
            }),
        }
    }

    /// Reads an array of nested objects, each mapped with `map`
    ///
    /// A missing key or `null` yields `None`; an empty array is present.
    pub fn list<T>(
        &self,
        field: &'static str,
        map: impl Fn(&RawMessage) -> Result<T, DecodeError>,
    ) -> Result<Option<Vec<T>>, DecodeError> {
        let mismatch = DecodeError::FieldTypeMismatch {
            variant: self.variant,
            field,
            expected: "array of objects",
        };
        match self.raw.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Object(obj) => map(obj),
                    _ => Err(mismatch.clone()),
                })
                .collect::<Result<Vec<T>, _>>()
                .map(Some),
            Some(_) => Err(mismatch),
        }
    }
}

/// Writes present fields into a raw message
pub struct FieldWriter {
    raw: RawMessage,
}

impl FieldWriter {
    /// Starts a message carrying the `class` discriminator
    pub fn new(class: &'static str) -> Self {
        let mut raw = RawMessage::new();
        raw.insert("class".into(), Value::String(class.into()));
        FieldWriter { raw }
    }

    /// Inserts `value` under `field` unless it is the absent sentinel
    pub fn put<T: FieldValue>(&mut self, field: &'static str, value: &T) {
        if let Some(json) = value.to_json() {
            self.raw.insert(field.into(), json);
        }
    }

    /// Inserts a list of already-encoded objects unless it is absent
    pub fn put_list(&mut self, field: &'static str, items: Option<Vec<RawMessage>>) {
        if let Some(items) = items {
            self.raw.insert(
                field.into(),
                Value::Array(items.into_iter().map(Value::Object).collect()),
            );
        }
    }

    /// Finishes the message
    pub fn finish(self) -> RawMessage {
        self.raw
    }
}
