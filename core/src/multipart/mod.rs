/*
 * mod.rs
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

//! Magnet multipart/related wire format.
//!
//! A message is a JSON envelope followed by base64 parts:
//!
//! ```text
//! --BOUNDARY\r\n
//! Content-Type: application/json\r\n
//! \r\n
//! {"file":"DATA_1"}\r\n
//! \r\n
//! --BOUNDARY\r\n
//! Content-Type: image/png\r\n
//! Content-Transfer-Encoding: base64\r\n
//! Content-Id: DATA_1\r\n
//! \r\n
//! iVBORw0KGgo=\r\n
//! \r\n
//! --BOUNDARY--
//! ```
//!
//! The envelope refers to parts by Content-Id; decoding substitutes each part's
//! value wherever a string in the envelope equals its id. Raw part data is
//! always base64, so the boundary token cannot occur inside it.

pub mod content_type;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use thiserror::Error;

use crate::payload::Payload;
use crate::xml::parse_xml;
use content_type::{is_valid_boundary, parse_content_type};

/// Default boundary token.
pub const BOUNDARY: &str = "BOUNDARY";

/// Prefix of part references in the envelope.
pub const PART_ID_PREFIX: &str = "DATA_";

const CRLF: &str = "\r\n";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MultipartError {
    #[error("envelope is not valid JSON: {0}")]
    Envelope(String),
    #[error("part {id} has invalid base64 content")]
    Base64 { id: String },
    #[error("malformed multipart message: {0}")]
    Malformed(String),
}

// ── Encoding ─────────────────────────────────────────────────────────

/// Accumulates binary parts for one request; `close` produces the wire body.
#[derive(Debug, Clone)]
pub struct MultipartWriter {
    boundary: String,
    counter: u32,
    parts: String,
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartWriter {
    pub fn new() -> Self {
        Self::with_boundary(BOUNDARY)
    }

    /// Boundary `BOUNDARY+<uuid>`, for producers that must not collide with
    /// another message embedded in a part.
    pub fn with_unique_boundary() -> Self {
        Self::with_boundary(format!("{}+{}", BOUNDARY, uuid::Uuid::new_v4()))
    }

    fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            counter: 0,
            parts: String::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Request Content-Type for the closed message.
    pub fn content_type(&self) -> String {
        format!("multipart/related; boundary={}", self.boundary)
    }

    pub fn part_count(&self) -> u32 {
        self.counter
    }

    pub fn is_empty(&self) -> bool {
        self.counter == 0
    }

    /// Append one base64 part and return its Content-Id (`DATA_1`, `DATA_2`, ...).
    pub fn encode_part(&mut self, mime_type: &str, raw: &[u8]) -> String {
        self.counter += 1;
        let id = format!("{}{}", PART_ID_PREFIX, self.counter);
        self.parts.push_str("--");
        self.parts.push_str(&self.boundary);
        self.parts.push_str(CRLF);
        self.parts.push_str("Content-Type: ");
        self.parts.push_str(mime_type);
        self.parts.push_str(CRLF);
        self.parts.push_str("Content-Transfer-Encoding: base64");
        self.parts.push_str(CRLF);
        self.parts.push_str("Content-Id: ");
        self.parts.push_str(&id);
        self.parts.push_str(CRLF);
        self.parts.push_str(CRLF);
        self.parts.push_str(&BASE64.encode(raw));
        self.parts.push_str(CRLF);
        self.parts.push_str(CRLF);
        id
    }

    /// Prepend the JSON envelope part and terminate the message.
    pub fn close(self, envelope: &Value) -> String {
        let json = envelope.to_string();
        let mut out = String::with_capacity(json.len() + self.parts.len() + 96);
        out.push_str("--");
        out.push_str(&self.boundary);
        out.push_str(CRLF);
        out.push_str("Content-Type: application/json");
        out.push_str(CRLF);
        out.push_str(CRLF);
        out.push_str(&json);
        out.push_str(CRLF);
        out.push_str(CRLF);
        out.push_str(&self.parts);
        out.push_str("--");
        out.push_str(&self.boundary);
        out.push_str("--");
        out
    }
}

// ── Decoding ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Parse XML-typed parts into element trees instead of leaving them as text.
    pub parse_xml: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub id: Option<String>,
    pub mime_type: String,
    pub transfer_encoding: Option<String>,
    pub value: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartMessage {
    /// Envelope with part references already substituted.
    pub envelope: Payload,
    pub parts: Vec<Part>,
}

impl MultipartMessage {
    pub fn part(&self, id: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.id.as_deref() == Some(id))
    }
}

/// Whether a response body looks like a multipart message.
pub fn contains_boundary_marker(body: &str) -> bool {
    body.contains(&format!("--{}", BOUNDARY))
}

/// Decode a wire message. A body with no boundary is taken as a bare JSON envelope.
pub fn decode(wire: &str, options: DecodeOptions) -> Result<MultipartMessage, MultipartError> {
    let trimmed = wire.trim_start();
    if !trimmed.starts_with("--") {
        let envelope = parse_envelope(trimmed)?;
        return Ok(MultipartMessage {
            envelope,
            parts: Vec::new(),
        });
    }

    let boundary = detect_boundary(trimmed)?;
    let delimiter = format!("--{}", boundary);

    let mut envelope: Option<Payload> = None;
    let mut parts = Vec::new();
    for segment in trimmed.split(delimiter.as_str()) {
        if segment.trim().is_empty() || segment.starts_with("--") {
            continue;
        }
        let (headers, value) = split_part(segment);
        if envelope.is_none() {
            envelope = Some(parse_envelope(value)?);
            continue;
        }
        parts.push(decode_part(&headers, value, options)?);
    }

    let mut envelope = envelope.unwrap_or(Payload::Null);
    for part in &parts {
        if let Some(id) = &part.id {
            substitute(&mut envelope, id, &part.value);
        }
    }
    Ok(MultipartMessage { envelope, parts })
}

fn detect_boundary(wire: &str) -> Result<String, MultipartError> {
    let line = wire.lines().next().unwrap_or("").trim_end();
    let mut token = &line[2..];
    // A message consisting of the terminator alone.
    if wire.trim_end() == line {
        token = token.strip_suffix("--").unwrap_or(token);
    }
    if !is_valid_boundary(token) {
        return Err(MultipartError::Malformed(format!("invalid boundary line {:?}", line)));
    }
    Ok(token.to_string())
}

fn parse_envelope(text: &str) -> Result<Payload, MultipartError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Payload::Null);
    }
    serde_json::from_str::<Value>(text)
        .map(Payload::from_json)
        .map_err(|e| MultipartError::Envelope(e.to_string()))
}

/// Split one segment into lower-cased headers and the raw value.
fn split_part(segment: &str) -> (Vec<(String, String)>, &str) {
    let segment = segment
        .strip_prefix(CRLF)
        .or_else(|| segment.strip_prefix('\n'))
        .unwrap_or(segment);
    let (head, value) = match segment.find("\r\n\r\n") {
        Some(i) => (&segment[..i], &segment[i + 4..]),
        None => match segment.find("\n\n") {
            Some(i) => (&segment[..i], &segment[i + 2..]),
            None => (segment, ""),
        },
    };
    let headers = head
        .lines()
        .filter_map(|line| {
            let colon = line.find(':')?;
            Some((
                line[..colon].trim().to_ascii_lowercase(),
                line[colon + 1..].trim().to_string(),
            ))
        })
        .collect();
    (headers, value)
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn decode_part(
    headers: &[(String, String)],
    raw: &str,
    options: DecodeOptions,
) -> Result<Part, MultipartError> {
    let id = header(headers, "content-id").map(|s| s.trim_matches(|c: char| c == '<' || c == '>').to_string());
    let content_type = header(headers, "content-type").and_then(parse_content_type);
    let mime_type = content_type
        .as_ref()
        .map(|ct| ct.mime_type())
        .unwrap_or_else(|| "text/plain".to_string());
    let transfer_encoding = header(headers, "content-transfer-encoding").map(str::to_string);

    let value = if transfer_encoding
        .as_deref()
        .map_or(false, |e| e.eq_ignore_ascii_case("base64"))
    {
        let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let data = BASE64.decode(compact.as_bytes()).map_err(|_| MultipartError::Base64 {
            id: id.clone().unwrap_or_default(),
        })?;
        Payload::Binary {
            mime_type: mime_type.clone(),
            data,
        }
    } else {
        let text = raw.trim();
        match content_type.as_ref() {
            Some(ct) if ct.is_json() => serde_json::from_str::<Value>(text)
                .map(Payload::from_json)
                .unwrap_or_else(|_| Payload::String(text.to_string())),
            Some(ct) if ct.is_xml() && options.parse_xml => parse_xml(text)
                .map(Payload::Xml)
                .unwrap_or_else(|_| Payload::String(text.to_string())),
            _ => Payload::String(text.to_string()),
        }
    };

    Ok(Part {
        id,
        mime_type,
        transfer_encoding,
        value,
    })
}

/// Replace every string equal to `id` in the tree by `value`.
fn substitute(node: &mut Payload, id: &str, value: &Payload) {
    match node {
        Payload::String(s) if s == id => *node = value.clone(),
        Payload::Array(items) => {
            for item in items {
                substitute(item, id, value);
            }
        }
        Payload::Object(map) | Payload::Model { fields: map, .. } => {
            for item in map.values_mut() {
                substitute(item, id, value);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn binary(mime: &str, data: &[u8]) -> Payload {
        Payload::Binary {
            mime_type: mime.to_string(),
            data: data.to_vec(),
        }
    }

    #[test]
    fn part_ids_count_from_one() {
        let mut w = MultipartWriter::new();
        assert_eq!(w.encode_part("image/png", b"a"), "DATA_1");
        assert_eq!(w.encode_part("image/png", b"b"), "DATA_2");
        assert_eq!(w.part_count(), 2);
    }

    #[test]
    fn wire_layout() {
        let mut w = MultipartWriter::new();
        w.encode_part("text/plain", b"hi");
        let wire = w.close(&json!({"f": "DATA_1"}));
        assert_eq!(
            wire,
            "--BOUNDARY\r\nContent-Type: application/json\r\n\r\n{\"f\":\"DATA_1\"}\r\n\r\n\
             --BOUNDARY\r\nContent-Type: text/plain\r\nContent-Transfer-Encoding: base64\r\n\
             Content-Id: DATA_1\r\n\r\naGk=\r\n\r\n--BOUNDARY--"
        );
    }

    #[test]
    fn two_png_parts_substitute_into_envelope() {
        let bytes1 = vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3];
        let bytes2 = vec![0xff; 300];
        let mut w = MultipartWriter::new();
        let id1 = w.encode_part("image/png", &bytes1);
        let id2 = w.encode_part("image/png", &bytes2);
        let wire = w.close(&json!({"a": 1, "images": [id1, id2]}));

        let msg = decode(&wire, DecodeOptions::default()).unwrap();
        assert_eq!(msg.envelope.get("a").and_then(Payload::as_i64), Some(1));
        assert_eq!(msg.part(&id1).unwrap().value, binary("image/png", &bytes1));
        assert_eq!(msg.part(&id2).unwrap().value, binary("image/png", &bytes2));
        match msg.envelope.get("images") {
            Some(Payload::Array(items)) => {
                assert_eq!(items[0], binary("image/png", &bytes1));
                assert_eq!(items[1], binary("image/png", &bytes2));
            }
            other => panic!("unexpected images: {:?}", other),
        }
    }

    #[test]
    fn recovers_zero_one_and_many_parts() {
        let inputs: Vec<Vec<(&str, Vec<u8>)>> = vec![
            vec![],
            vec![("application/pdf", b"%PDF-1.4".to_vec())],
            vec![
                ("image/jpeg", (0u8..=255).collect()),
                ("application/octet-stream", Vec::new()),
                ("text/csv", b"a,b\r\n1,2".to_vec()),
            ],
        ];
        for parts in inputs {
            let mut w = MultipartWriter::with_unique_boundary();
            let ids: Vec<String> = parts.iter().map(|(m, d)| w.encode_part(m, d)).collect();
            let wire = w.close(&json!({"ids": ids}));
            let msg = decode(&wire, DecodeOptions::default()).unwrap();
            assert_eq!(msg.parts.len(), parts.len());
            for ((mime, data), id) in parts.iter().zip(&ids) {
                let part = msg.part(id).unwrap();
                assert_eq!(part.mime_type, *mime);
                assert_eq!(part.value.as_bytes(), Some(data.as_slice()));
            }
        }
    }

    #[test]
    fn bare_json_body_has_no_parts() {
        let msg = decode("{\"ok\":true}", DecodeOptions::default()).unwrap();
        assert!(msg.parts.is_empty());
        assert_eq!(msg.envelope.get("ok"), Some(&Payload::Bool(true)));
    }

    #[test]
    fn unique_boundary_is_detected() {
        let w = MultipartWriter::with_unique_boundary();
        assert!(w.boundary().starts_with("BOUNDARY+"));
        let boundary = w.boundary().to_string();
        let wire = w.close(&json!({"x": "y"}));
        assert!(wire.ends_with(&format!("--{}--", boundary)));
        let msg = decode(&wire, DecodeOptions::default()).unwrap();
        assert_eq!(msg.envelope.get("x").and_then(Payload::as_str), Some("y"));
    }

    #[test]
    fn text_json_and_xml_parts() {
        let wire = "--BOUNDARY\r\nContent-Type: application/json\r\n\r\n\
                    {\"doc\":\"DATA_1\",\"meta\":\"DATA_2\",\"note\":\"DATA_3\"}\r\n\r\n\
                    --BOUNDARY\r\nContent-Type: text/xml\r\nContent-Id: DATA_1\r\n\r\n<a><b>1</b></a>\r\n\r\n\
                    --BOUNDARY\r\nContent-Type: application/json\r\nContent-Id: DATA_2\r\n\r\n[1,2]\r\n\r\n\
                    --BOUNDARY\r\nContent-Type: text/plain\r\nContent-Id: DATA_3\r\n\r\n  hello  \r\n\r\n\
                    --BOUNDARY--";
        let msg = decode(wire, DecodeOptions { parse_xml: true }).unwrap();
        match msg.envelope.get("doc") {
            Some(Payload::Xml(e)) => assert_eq!(e.child("b").unwrap().text(), "1"),
            other => panic!("unexpected doc: {:?}", other),
        }
        assert_eq!(
            msg.envelope.get("meta"),
            Some(&Payload::Array(vec![1i64.into(), 2i64.into()]))
        );
        assert_eq!(msg.envelope.get("note").and_then(Payload::as_str), Some("hello"));

        let msg = decode(wire, DecodeOptions { parse_xml: false }).unwrap();
        assert_eq!(
            msg.envelope.get("doc").and_then(Payload::as_str),
            Some("<a><b>1</b></a>")
        );
    }

    #[test]
    fn broken_envelope_is_an_error() {
        let wire = "--BOUNDARY\r\nContent-Type: application/json\r\n\r\n{oops\r\n\r\n--BOUNDARY--";
        assert!(matches!(
            decode(wire, DecodeOptions::default()),
            Err(MultipartError::Envelope(_))
        ));
    }

    #[test]
    fn boundary_sniff() {
        assert!(contains_boundary_marker("\r\n--BOUNDARY\r\n..."));
        assert!(!contains_boundary_marker("{\"a\":1}"));
    }
}
