/*
 * payload.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Magnet, a client SDK for the Magnet messaging platform.
 *
 * Magnet is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Magnet is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Magnet.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Payload: the closed value tree carried through the pipeline.
//!
//! Attribute trees handed to the formatter and decoded response bodies are both
//! `Payload` values. Unlike `serde_json::Value` it can hold dates, raw bytes,
//! binary parts with their mime type, parsed XML and hydrated models, so the
//! request and response coercions never need to guess at string contents.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

use crate::xml::XmlElement;

/// Wire date profile: `YYYY-MM-DDTHH:mm:ss.sssZ`.
pub const WIRE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Format a date with the fixed wire profile (always UTC, always millisecond precision).
pub fn format_wire_date(date: &DateTime<Utc>) -> String {
    date.format(WIRE_DATE_FORMAT).to_string()
}

/// Parse an RFC 3339 / ISO-8601 date string as sent by the server.
pub fn parse_wire_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Date(DateTime<Utc>),
    /// Byte array (base64 on the wire).
    Bytes(Vec<u8>),
    /// Binary attachment with its declared mime type.
    Binary { mime_type: String, data: Vec<u8> },
    Xml(XmlElement),
    Array(Vec<Payload>),
    Object(BTreeMap<String, Payload>),
    /// Object hydrated against a declared model schema.
    Model {
        type_name: String,
        fields: BTreeMap<String, Payload>,
    },
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Null
    }
}

impl Payload {
    /// Empty object, the usual starting point for an attribute tree.
    pub fn object() -> Self {
        Payload::Object(BTreeMap::new())
    }

    /// Builder-style insert; no-op unless `self` is an object or model.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Payload>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Payload>) {
        match self {
            Payload::Object(map) | Payload::Model { fields: map, .. } => {
                map.insert(key.into(), value.into());
            }
            _ => {}
        }
    }

    pub fn get(&self, key: &str) -> Option<&Payload> {
        match self {
            Payload::Object(map) | Payload::Model { fields: map, .. } => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Payload::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(b) => Some(b),
            Payload::Binary { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Payload::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }

    /// Name of the hydrated model type, if any.
    pub fn model_name(&self) -> Option<&str> {
        match self {
            Payload::Model { type_name, .. } => Some(type_name),
            _ => None,
        }
    }

    /// Convert a JSON tree. Strings stay strings: dates and byte arrays are only
    /// recognised when a schema says so.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => Payload::Number(n),
            Value::String(s) => Payload::String(s),
            Value::Array(items) => Payload::Array(items.into_iter().map(Payload::from_json).collect()),
            Value::Object(map) => Payload::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Payload::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Lossy JSON view: dates as wire dates, bytes as base64, XML as markup.
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Null => Value::Null,
            Payload::Bool(b) => Value::Bool(*b),
            Payload::Number(n) => Value::Number(n.clone()),
            Payload::String(s) => Value::String(s.clone()),
            Payload::Date(d) => Value::String(format_wire_date(d)),
            Payload::Bytes(b) => Value::String(BASE64.encode(b)),
            Payload::Binary { data, .. } => Value::String(BASE64.encode(data)),
            Payload::Xml(x) => Value::String(x.to_xml_string()),
            Payload::Array(items) => Value::Array(items.iter().map(Payload::to_json).collect()),
            Payload::Object(map) | Payload::Model { fields: map, .. } => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json());
                }
                Value::Object(out)
            }
        }
    }

    /// Deserialize into a caller's domain type through the JSON view.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_json())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::String(s) => write!(f, "{}", s),
            Payload::Date(d) => write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::String(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::String(s)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Number(n.into())
    }
}

impl From<u64> for Payload {
    fn from(n: u64) -> Self {
        Payload::Number(n.into())
    }
}

impl From<i32> for Payload {
    fn from(n: i32) -> Self {
        Payload::Number(n.into())
    }
}

impl From<DateTime<Utc>> for Payload {
    fn from(d: DateTime<Utc>) -> Self {
        Payload::Date(d)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Bytes(b)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(items: Vec<Payload>) -> Self {
        Payload::Array(items)
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Payload::from_json(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::Deserialize;

    #[test]
    fn wire_date_has_millisecond_precision() {
        let d = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_wire_date(&d), "2020-01-02T03:04:05.000Z");
        assert_eq!(parse_wire_date("2020-01-02T03:04:05.000Z"), Some(d));
        assert_eq!(parse_wire_date("not a date"), None);
    }

    #[test]
    fn json_view_encodes_bytes_and_dates() {
        let d = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        let p = Payload::object()
            .with("when", d)
            .with("raw", vec![0u8, 1, 2])
            .with("n", 7i64);
        let json = p.to_json();
        assert_eq!(json["when"], "2021-06-01T00:00:00.000Z");
        assert_eq!(json["raw"], "AAEC");
        assert_eq!(json["n"], 7);
    }

    #[test]
    fn deserialize_into_domain_type() {
        #[derive(Deserialize)]
        struct User {
            #[serde(rename = "userName")]
            user_name: String,
            age: u32,
        }
        let p = Payload::from_json(serde_json::json!({"userName": "ann", "age": 30}));
        let u: User = p.deserialize_into().unwrap();
        assert_eq!(u.user_name, "ann");
        assert_eq!(u.age, 30);
    }

    #[test]
    fn insert_ignored_on_scalars() {
        let mut p = Payload::from("x");
        p.insert("k", 1i64);
        assert_eq!(p, Payload::from("x"));
    }
}
