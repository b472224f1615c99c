/*
 * content_type.rs
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

//! Content-Type header values (RFC 2045), as found on multipart parts and responses.

use std::collections::HashMap;

/// Checks if a character is valid in an RFC 2045 token.
#[inline]
fn is_token_char(c: u8) -> bool {
    matches!(c,
        b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z' |
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'{' | b'|' | b'}' | b'~'
    )
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_token_char)
}

/// Checks if a character is valid in a MIME boundary (RFC 2046).
#[inline]
fn is_boundary_char(c: u8) -> bool {
    matches!(c,
        b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z' |
        b'\'' | b'(' | b')' | b'+' | b'_' | b',' | b'-' | b'.' |
        b'/' | b':' | b'=' | b'?'
    )
}

/// Validates a boundary token: 1-70 chars from the boundary set.
pub fn is_valid_boundary(boundary: &str) -> bool {
    let b = boundary.as_bytes();
    (1..=70).contains(&b.len()) && b.iter().copied().all(is_boundary_char)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentType {
    primary_type: String,
    sub_type: String,
    parameters: HashMap<String, String>,
}

impl ContentType {
    pub fn primary_type(&self) -> &str {
        &self.primary_type
    }

    pub fn sub_type(&self) -> &str {
        &self.sub_type
    }

    /// `type/subtype`, lower-cased, without parameters.
    pub fn mime_type(&self) -> String {
        format!(
            "{}/{}",
            self.primary_type.to_ascii_lowercase(),
            self.sub_type.to_ascii_lowercase()
        )
    }

    pub fn is_mime_type(&self, primary: &str, sub: &str) -> bool {
        self.primary_type.eq_ignore_ascii_case(primary) && self.sub_type.eq_ignore_ascii_case(sub)
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_json(&self) -> bool {
        self.sub_type.eq_ignore_ascii_case("json")
            || self.sub_type.to_ascii_lowercase().ends_with("+json")
    }

    pub fn is_xml(&self) -> bool {
        self.sub_type.eq_ignore_ascii_case("xml")
            || self.sub_type.to_ascii_lowercase().ends_with("+xml")
    }

    pub fn is_multipart(&self) -> bool {
        self.primary_type.eq_ignore_ascii_case("multipart")
    }

    pub fn is_text(&self) -> bool {
        self.primary_type.eq_ignore_ascii_case("text")
    }
}

/// Parse a Content-Type header value. Returns None unless `type/subtype` are tokens.
pub fn parse_content_type(value: &str) -> Option<ContentType> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (type_part, params_part) = match value.find(';') {
        Some(i) => (value[..i].trim(), value[i + 1..].trim()),
        None => (value, ""),
    };
    let slash = type_part.find('/')?;
    let primary = type_part[..slash].trim();
    let sub = type_part[slash + 1..].trim();
    if !is_token(primary) || !is_token(sub) {
        return None;
    }
    Some(ContentType {
        primary_type: primary.to_string(),
        sub_type: sub.to_string(),
        parameters: parse_parameter_list(params_part),
    })
}

/// Parse a semicolon-separated parameter list (`name=value; name="value"`).
/// Malformed entries are skipped.
fn parse_parameter_list(params_part: &str) -> HashMap<String, String> {
    let mut parameters = HashMap::new();
    let bytes = params_part.as_bytes();
    let len = bytes.len();
    let mut pos = 0;

    while pos < len {
        while pos < len && (bytes[pos] == b';' || bytes[pos].is_ascii_whitespace()) {
            pos += 1;
        }
        if pos >= len {
            break;
        }
        let eq_abs = match bytes[pos..].iter().position(|&b| b == b'=') {
            Some(eq) => pos + eq,
            None => break,
        };
        let name = String::from_utf8_lossy(&bytes[pos..eq_abs]).trim().to_string();
        pos = eq_abs + 1;
        let value = if pos < len && bytes[pos] == b'"' {
            pos += 1;
            let mut v = String::new();
            while pos < len {
                let c = bytes[pos];
                if c == b'\\' && pos + 1 < len {
                    v.push(bytes[pos + 1] as char);
                    pos += 2;
                } else if c == b'"' {
                    pos += 1;
                    break;
                } else {
                    v.push(c as char);
                    pos += 1;
                }
            }
            v
        } else {
            let end = bytes[pos..]
                .iter()
                .position(|&b| b == b';')
                .map(|i| pos + i)
                .unwrap_or(len);
            let v = String::from_utf8_lossy(&bytes[pos..end]).trim().to_string();
            pos = end;
            v
        };
        if is_token(&name) {
            parameters.insert(name.to_ascii_lowercase(), value);
        }
    }
    parameters
}
