/*
 * decode.rs
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

//! Response decoding.
//!
//! Dispatch is on the declared `ReturnType`; a text body carrying the
//! multipart boundary marker is decoded as multipart whatever the declared
//! type. Nothing here fails: a body that will not decode is passed through
//! as it came off the wire.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::multipart::{self, contains_boundary_marker, DecodeOptions};
use crate::payload::{parse_wire_date, Payload};
use crate::schema::{ModelRegistry, ParamType, ReturnType};
use crate::transport::ResponseBody;

#[derive(Clone)]
pub struct ResponseDecoder {
    models: Arc<ModelRegistry>,
    parse_xml: bool,
}

impl ResponseDecoder {
    pub fn new(models: Arc<ModelRegistry>, parse_xml: bool) -> Self {
        Self { models, parse_xml }
    }

    pub fn decode(&self, body: ResponseBody, return_type: &ReturnType) -> Payload {
        match body {
            ResponseBody::Empty => Payload::Null,
            ResponseBody::Binary { mime_type, data } => Payload::Binary { mime_type, data },
            ResponseBody::Text(text) => self.decode_text(text, return_type),
            ResponseBody::Json(value) => match return_type {
                ReturnType::Void => Payload::Null,
                other => self.coerce_return(Payload::from_json(value), other),
            },
        }
    }

    fn decode_text(&self, text: String, return_type: &ReturnType) -> Payload {
        if *return_type == ReturnType::Multipart || contains_boundary_marker(&text) {
            return match self.decode_multipart(&text) {
                Some(envelope) => self.coerce_return(envelope, return_type),
                None => Payload::String(text),
            };
        }
        match return_type {
            ReturnType::Void => Payload::Null,
            other => self.coerce_return(Payload::String(text), other),
        }
    }

    fn decode_multipart(&self, text: &str) -> Option<Payload> {
        let options = DecodeOptions {
            parse_xml: self.parse_xml,
        };
        match multipart::decode(text, options) {
            Ok(message) => Some(message.envelope),
            Err(e) => {
                tracing::warn!(target: "magnet::pipeline", error = %e, "multipart response did not decode, passing through");
                None
            }
        }
    }

    fn coerce_return(&self, value: Payload, return_type: &ReturnType) -> Payload {
        match param_type_of(return_type) {
            Some(ty) => self.coerce(value, &ty),
            None => value,
        }
    }

    /// Coerce `value` towards `ty`. Recursion follows the value tree, so it
    /// stops at primitives and at model names the registry does not know.
    pub fn coerce(&self, value: Payload, ty: &ParamType) -> Payload {
        match (ty, value) {
            (ParamType::Date, Payload::String(s)) => match parse_wire_date(&s) {
                Some(d) => Payload::Date(d),
                None => Payload::String(s),
            },
            (ParamType::Date, Payload::Number(n)) => match n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis) {
                Some(d) => Payload::Date(d),
                None => Payload::Number(n),
            },
            (ParamType::ByteArray, Payload::String(s)) => decode_base64_text(s),
            (ParamType::Array(inner), Payload::Array(items)) => {
                Payload::Array(items.into_iter().map(|item| self.coerce(item, inner)).collect())
            }
            (ParamType::Model(name), Payload::Object(fields)) => match self.models.get(name) {
                Some(schema) => Payload::Model {
                    type_name: name.clone(),
                    fields: fields
                        .into_iter()
                        .map(|(k, v)| {
                            let v = match schema.field_type(&k) {
                                Some(field_ty) => self.coerce(v, field_ty),
                                None => v,
                            };
                            (k, v)
                        })
                        .collect(),
                },
                None => Payload::Object(fields),
            },
            (ParamType::Any | ParamType::Binary | ParamType::String, Payload::String(s))
                if contains_boundary_marker(&s) =>
            {
                self.decode_multipart(&s).unwrap_or(Payload::String(s))
            }
            (_, value) => value,
        }
    }
}

fn param_type_of(return_type: &ReturnType) -> Option<ParamType> {
    match return_type {
        ReturnType::Void | ReturnType::Plain | ReturnType::Multipart | ReturnType::Binary => None,
        ReturnType::Date => Some(ParamType::Date),
        ReturnType::ByteArray => Some(ParamType::ByteArray),
        ReturnType::Model(name) => Some(ParamType::Model(name.clone())),
        ReturnType::Array(inner) => Some(ParamType::Array(Box::new(
            param_type_of(inner).unwrap_or(ParamType::Any),
        ))),
    }
}

/// Base64 byte arrays come back as text when they hold UTF-8, bytes otherwise.
fn decode_base64_text(s: String) -> Payload {
    let compact: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    match BASE64.decode(compact.as_bytes()) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Payload::String(text),
            Err(e) => Payload::Bytes(e.into_bytes()),
        },
        Err(_) => Payload::String(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::MultipartWriter;
    use crate::schema::ModelSchema;
    use serde_json::json;

    fn decoder() -> ResponseDecoder {
        let models = ModelRegistry::new()
            .with(
                ModelSchema::new("User")
                    .field("created", ParamType::Date)
                    .field("manager", ParamType::Model("User".into()))
                    .field("devices", ParamType::Array(Box::new(ParamType::Model("Device".into())))),
            )
            .with(ModelSchema::new("Device").field("token", ParamType::ByteArray));
        ResponseDecoder::new(Arc::new(models), false)
    }

    #[test]
    fn passthrough_for_plain() {
        let d = decoder();
        let p = d.decode(ResponseBody::Json(json!({"a": 1})), &ReturnType::Plain);
        assert_eq!(p.get("a").and_then(Payload::as_i64), Some(1));
        assert_eq!(d.decode(ResponseBody::Text("hi".into()), &ReturnType::Plain), Payload::from("hi"));
        assert_eq!(d.decode(ResponseBody::Empty, &ReturnType::Model("User".into())), Payload::Null);
    }

    #[test]
    fn date_and_bytes() {
        let d = decoder();
        let p = d.decode(ResponseBody::Text("2020-01-02T03:04:05.000Z".into()), &ReturnType::Date);
        assert_eq!(
            p.as_date().map(|d| d.timestamp()),
            Some(1_577_934_245)
        );
        let p = d.decode(ResponseBody::Json(json!("aGVsbG8=")), &ReturnType::ByteArray);
        assert_eq!(p, Payload::from("hello"));
        let p = d.decode(ResponseBody::Text("not a date".into()), &ReturnType::Date);
        assert_eq!(p, Payload::from("not a date"));
    }

    #[test]
    fn nested_models_hydrate() {
        let d = decoder();
        let body = json!({
            "name": "ann",
            "created": "2021-06-01T00:00:00.000Z",
            "manager": {"name": "bob", "extra": {"deep": true}},
            "devices": [{"token": "AAE="}]
        });
        let p = d.decode(ResponseBody::Json(body), &ReturnType::Model("User".into()));
        assert_eq!(p.model_name(), Some("User"));
        assert!(p.get("created").and_then(Payload::as_date).is_some());
        let manager = p.get("manager").unwrap();
        assert_eq!(manager.model_name(), Some("User"));
        assert!(matches!(manager.get("extra"), Some(Payload::Object(_))));
        match p.get("devices") {
            Some(Payload::Array(items)) => {
                assert_eq!(items[0].model_name(), Some("Device"));
                assert_eq!(items[0].get("token"), Some(&Payload::Bytes(vec![0, 1])));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_model_stays_object() {
        let d = decoder();
        let p = d.decode(ResponseBody::Json(json!({"x": 1})), &ReturnType::Model("Nope".into()));
        assert!(matches!(p, Payload::Object(_)));
    }

    #[test]
    fn multipart_sniffed_from_text() {
        let mut w = MultipartWriter::new();
        let id = w.encode_part("image/png", &[1, 2, 3]);
        let wire = w.close(&json!({"a": 1, "img": id}));
        let p = decoder().decode(ResponseBody::Text(wire), &ReturnType::Plain);
        assert_eq!(p.get("a").and_then(Payload::as_i64), Some(1));
        assert_eq!(p.get("img").and_then(Payload::as_bytes), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn broken_multipart_passes_through() {
        let wire = "--BOUNDARY\r\nContent-Type: application/json\r\n\r\n{broken\r\n--BOUNDARY--".to_string();
        let p = decoder().decode(ResponseBody::Text(wire.clone()), &ReturnType::Multipart);
        assert_eq!(p, Payload::String(wire));
    }
}
