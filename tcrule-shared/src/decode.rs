//! Tolerant field decoding for `tc -j` output.
//!
//! iproute2 is inconsistent across versions: optional fields show up as
//! `null`, as an empty string, or not at all. All three mean "absent".

use serde::de::{DeserializeOwned, Deserializer, Error};
use serde::Deserialize;
use serde_json::Value;

/// Deserialize an optional field, mapping `null` and `""` to `None`.
pub fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    from_lenient_value(value).map_err(D::Error::custom)
}

/// Same as [`lenient`], for values already pulled out of a map.
pub fn from_lenient_value<T: DeserializeOwned>(value: Value) -> Result<Option<T>, serde_json::Error> {
    match value {
        Value::Null => Ok(None),
        Value::String(ref s) if s.is_empty() => Ok(None),
        other => serde_json::from_value(other).map(Some),
    }
}
