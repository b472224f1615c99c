/*
 * formatter.rs
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

//! Request formatter: places each attribute on the wire according to its
//! declared style, after type-directed conversion to wire primitives.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::multipart::MultipartWriter;
use crate::payload::{format_wire_date, parse_wire_date, Payload};
use crate::schema::{ModelRegistry, ParamType, RequestMetadata, Style};
use crate::transport::Method;

/// Unreserved characters (RFC 3986) pass through, everything else is escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub const DEFAULT_API_ROOT: &str = "/rest";

const OCTET_STREAM: &str = "application/octet-stream";

pub fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, COMPONENT).to_string()
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormatError {
    #[error("missing value for path parameter {0}")]
    MissingTemplate(String),
    #[error("path has no placeholder for {0}")]
    NoPlaceholder(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    /// Flat field object; serialized per the request content type.
    Fields(Map<String, Value>),
    /// Literal body taken from a single binary attribute.
    Raw { mime_type: String, data: Vec<u8> },
    /// Closed multipart/related message.
    Multipart { content_type: String, body: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormattedRequest {
    pub method: Method,
    /// Path with API root, template and matrix substitutions applied.
    pub path: String,
    /// Unencoded query pairs, in schema order.
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub content_type: Option<String>,
}

impl FormattedRequest {
    /// Path plus percent-encoded query string.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
            .collect();
        let sep = if self.path.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.path, sep, query.join("&"))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header (case-insensitive).
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }
}

/// Formats attribute trees against request metadata.
pub struct RequestFormatter<'a> {
    models: &'a ModelRegistry,
    api_root: &'a str,
}

impl<'a> RequestFormatter<'a> {
    pub fn new(models: &'a ModelRegistry, api_root: &'a str) -> Self {
        Self { models, api_root }
    }

    /// Format one request. With a codec, binary attributes become parts and the
    /// body is the closed multipart message; without one, a binary PLAIN/FORM
    /// attribute becomes the literal body.
    pub fn format(
        &self,
        attributes: &Payload,
        metadata: &RequestMetadata,
        mut codec: Option<&mut MultipartWriter>,
    ) -> Result<FormattedRequest, FormatError> {
        let mut path = metadata.path.clone();
        let mut query = Vec::new();
        let mut headers = Vec::new();
        let mut fields = Map::new();
        let mut literal: Option<(String, Vec<u8>)> = None;

        if codec.is_none() {
            literal = self.literal_body(attributes, metadata);
        }

        for param in &metadata.params {
            let value = match attributes.get(&param.name) {
                Some(v) if !v.is_null() => v,
                _ => {
                    if param.style == Style::Template {
                        return Err(FormatError::MissingTemplate(param.name.clone()));
                    }
                    continue;
                }
            };
            let placeholder = format!("{{{}}}", param.name);
            match param.style {
                Style::Template => {
                    let wire = self.to_wire(value, &param.ty, &mut codec);
                    if !path.contains(&placeholder) {
                        return Err(FormatError::NoPlaceholder(param.name.clone()));
                    }
                    path = path.replace(&placeholder, &encode_component(&scalar_text(&wire)));
                }
                Style::Matrix => {
                    let wire = self.to_wire(value, &param.ty, &mut codec);
                    let segment = format!(
                        ";{}={}",
                        encode_component(&param.name),
                        encode_component(&scalar_text(&wire))
                    );
                    if path.contains(&placeholder) {
                        path = path.replace(&placeholder, &segment);
                    } else {
                        path.push_str(&segment);
                    }
                }
                Style::Query => {
                    let wire = self.to_wire(value, &param.ty, &mut codec);
                    query.push((param.name.clone(), scalar_text(&wire)));
                }
                Style::Header => {
                    let wire = self.to_wire(value, &param.ty, &mut codec);
                    headers.push((param.name.clone(), scalar_text(&wire)));
                }
                Style::Plain | Style::Form => {
                    if literal.is_some() {
                        continue;
                    }
                    let wire = self.to_wire(value, &param.ty, &mut codec);
                    if metadata.method.carries_body() {
                        fields.insert(param.name.clone(), wire);
                    } else {
                        query.push((param.name.clone(), scalar_text(&wire)));
                    }
                }
            }
        }

        if !metadata.base_path_only {
            path = format!("{}{}", self.api_root.trim_end_matches('/'), path);
        }

        let (body, content_type) = match (literal, codec) {
            (Some((mime_type, data)), _) => (
                RequestBody::Raw {
                    mime_type: mime_type.clone(),
                    data,
                },
                Some(mime_type),
            ),
            (None, Some(writer)) => {
                let writer = std::mem::take(writer);
                let content_type = writer.content_type();
                let body = writer.close(&Value::Object(fields));
                (
                    RequestBody::Multipart {
                        content_type: content_type.clone(),
                        body,
                    },
                    Some(content_type),
                )
            }
            (None, None) if !fields.is_empty() => (
                RequestBody::Fields(fields),
                Some(metadata.content_type.clone()),
            ),
            (None, None) => (RequestBody::Empty, None),
        };

        Ok(FormattedRequest {
            method: metadata.method,
            path,
            query,
            headers,
            body,
            content_type,
        })
    }

    /// The first binary PLAIN/FORM attribute, as `(mime, bytes)`.
    fn literal_body(
        &self,
        attributes: &Payload,
        metadata: &RequestMetadata,
    ) -> Option<(String, Vec<u8>)> {
        metadata
            .params
            .iter()
            .filter(|p| p.ty == ParamType::Binary && matches!(p.style, Style::Plain | Style::Form))
            .find_map(|p| match attributes.get(&p.name)? {
                Payload::Binary { mime_type, data } => Some((mime_type.clone(), data.clone())),
                Payload::Bytes(data) => Some((OCTET_STREAM.to_string(), data.clone())),
                Payload::String(s) => Some(("text/plain".to_string(), s.as_bytes().to_vec())),
                _ => None,
            })
    }

    /// Convert one value to wire primitives.
    fn to_wire(
        &self,
        value: &Payload,
        ty: &ParamType,
        codec: &mut Option<&mut MultipartWriter>,
    ) -> Value {
        match (value, ty) {
            (Payload::Date(d), _) => Value::String(format_wire_date(d)),
            // Untyped sources (JSON from a shell) carry dates as text or epoch millis.
            (Payload::String(s), ParamType::Date) => match parse_wire_date(s) {
                Some(d) => Value::String(format_wire_date(&d)),
                None => Value::String(s.clone()),
            },
            (Payload::Number(n), ParamType::Date) => {
                match n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis) {
                    Some(d) => Value::String(format_wire_date(&d)),
                    None => Value::Number(n.clone()),
                }
            }
            (Payload::Binary { mime_type, data }, _) => match codec {
                Some(writer) => Value::String(writer.encode_part(mime_type, data)),
                None => Value::String(BASE64.encode(data)),
            },
            (Payload::Bytes(data), ParamType::Binary) => match codec {
                Some(writer) => Value::String(writer.encode_part(OCTET_STREAM, data)),
                None => Value::String(BASE64.encode(data)),
            },
            (Payload::Bytes(data), _) => Value::String(BASE64.encode(data)),
            (Payload::String(s), ParamType::ByteArray) => Value::String(BASE64.encode(s.as_bytes())),
            (Payload::Array(items), _) => {
                let inner = match ty {
                    ParamType::Array(inner) => inner.as_ref().clone(),
                    _ => ParamType::Any,
                };
                Value::Array(items.iter().map(|v| self.to_wire(v, &inner, codec)).collect())
            }
            (Payload::Object(map), _) | (Payload::Model { fields: map, .. }, _) => {
                let model_name = match (value, ty) {
                    (Payload::Model { type_name, .. }, _) => Some(type_name.as_str()),
                    (_, ParamType::Model(name)) => Some(name.as_str()),
                    _ => None,
                };
                let schema = model_name.and_then(|n| self.models.get(n));
                let mut out = Map::new();
                for (key, field) in map {
                    let field_ty = schema
                        .and_then(|s| s.field_type(key))
                        .cloned()
                        .unwrap_or(ParamType::Any);
                    out.insert(key.clone(), self.to_wire(field, &field_ty, codec));
                }
                Value::Object(out)
            }
            (other, _) => other.to_json(),
        }
    }
}

/// Text for path, query and header positions; objects are JSON-stringified.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
