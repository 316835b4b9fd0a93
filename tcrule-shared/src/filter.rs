//! Classifier records as reported by `tc filter show dev <iface>`.

use std::fmt;

use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::decode::{from_lenient_value, lenient};
use crate::predicate::MatchPredicates;

/// Byte offsets into the IPv4 header used by u32 keys.
pub const OFFSET_SRC_IP: u32 = 12;
pub const OFFSET_DST_IP: u32 = 16;
pub const OFFSET_PORTS: u32 = 20;

/// One classifier. `interface` is not part of the tc output; the reader
/// fills it in from the device it queried.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_deserializing)]
    pub interface: String,
    #[serde(default, deserialize_with = "lenient")]
    pub parent: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub protocol: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub pref: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub chain: Option<u32>,
    #[serde(default, deserialize_with = "lenient_options")]
    pub options: Option<FilterOptions>,
}

impl Filter {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            ..Default::default()
        }
    }

    pub fn flow_id(&self) -> Option<&str> {
        self.options.as_ref()?.flowid.as_deref()
    }

    pub fn handle(&self) -> Option<&str> {
        self.options.as_ref()?.fh.as_deref()
    }

    pub fn predicates(&self) -> Option<&MatchPredicates> {
        self.options.as_ref().map(|o| &o.predicates)
    }

    /// A key node: has both a handle and a target flow. Hash-table headers
    /// and bare chain entries are not.
    pub fn is_classifier(&self) -> bool {
        self.handle().is_some() && self.flow_id().is_some()
    }

    pub fn options_mut(&mut self) -> &mut FilterOptions {
        self.options.get_or_insert_with(FilterOptions::default)
    }
}

/// u32 classifier options.
///
/// `tc -j` emits one `"match"` key per selector, repeating the key within
/// the same object, so the derived map decoding (which rejects duplicate
/// fields) cannot be used here.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOptions {
    pub fh: Option<String>,
    pub ht_divisor: Option<u32>,
    pub order: Option<u32>,
    pub key_ht: Option<String>,
    pub bkt: Option<String>,
    pub flowid: Option<String>,
    pub not_in_hw: Option<bool>,
    #[serde(rename = "match")]
    pub matches: Vec<FilterMatch>,
    /// Decoded selectors; filled in after the raw entries are read.
    #[serde(rename = "match_parsed")]
    pub predicates: MatchPredicates,
}

/// A raw u32 selector: hex value and mask at a byte offset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterMatch {
    pub value: String,
    pub mask: String,
    #[serde(default)]
    pub offmask: String,
    pub off: u32,
}

impl FilterMatch {
    pub fn new(value: &str, mask: &str, off: u32) -> Self {
        Self {
            value: value.to_string(),
            mask: mask.to_string(),
            offmask: String::new(),
            off,
        }
    }
}

impl<'de> Deserialize<'de> for FilterOptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(FilterOptionsVisitor)
    }
}

struct FilterOptionsVisitor;

impl<'de> Visitor<'de> for FilterOptionsVisitor {
    type Value = FilterOptions;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("u32 filter options object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        use serde::de::Error;

        let mut options = FilterOptions::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "fh" => options.fh = next_lenient(&mut map)?,
                "ht_divisor" => options.ht_divisor = next_lenient(&mut map)?,
                "order" => options.order = next_lenient(&mut map)?,
                "key_ht" => options.key_ht = next_lenient(&mut map)?,
                "bkt" => options.bkt = next_lenient(&mut map)?,
                "flowid" => options.flowid = next_lenient(&mut map)?,
                "not_in_hw" => options.not_in_hw = next_lenient(&mut map)?,
                "match" => match map.next_value::<Value>()? {
                    Value::Array(items) => {
                        for item in items {
                            if let Some(m) = from_lenient_value(item).map_err(A::Error::custom)? {
                                options.matches.push(m);
                            }
                        }
                    }
                    other => {
                        if let Some(m) = from_lenient_value(other).map_err(A::Error::custom)? {
                            options.matches.push(m);
                        }
                    }
                },
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(options)
    }
}

/// `options` cannot go through [`lenient`]: buffering into a `Value` would
/// collapse the repeated `match` keys.
fn lenient_options<'de, D>(deserializer: D) -> Result<Option<FilterOptions>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(OptionalOptionsVisitor)
}

struct OptionalOptionsVisitor;

impl<'de> Visitor<'de> for OptionalOptionsVisitor {
    type Value = Option<FilterOptions>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("u32 filter options object, null or empty string")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        lenient_options(deserializer)
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        if v.is_empty() {
            Ok(None)
        } else {
            Err(E::invalid_value(serde::de::Unexpected::Str(v), &self))
        }
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
        FilterOptionsVisitor.visit_map(map).map(Some)
    }
}

fn next_lenient<'de, A, T>(map: &mut A) -> Result<Option<T>, A::Error>
where
    A: MapAccess<'de>,
    T: serde::de::DeserializeOwned,
{
    use serde::de::Error;
    let value = map.next_value::<Value>()?;
    from_lenient_value(value).map_err(A::Error::custom)
}
