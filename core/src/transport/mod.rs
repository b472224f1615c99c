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

//! Transport: sends a formatted request over the best available HTTP backend
//! and normalises every outcome into a body plus `ResponseDetails`.
//!
//! Backend selection is fixed: the rich backend (reqwest) for text exchanges
//! when compiled in, the raw in-tree HTTP/1.1 client otherwise and for all
//! binary exchanges. With neither, the request fails with `NoMechanism`.

mod method;
pub mod raw;
#[cfg(feature = "reqwest")]
pub mod rich;

pub use method::Method;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::formatter::{encode_component, FormattedRequest, RequestBody};
use crate::multipart::content_type::parse_content_type;
use crate::payload::Payload;
use crate::schema::CONTENT_TYPE_FORM;

/// Fixed per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ── Backend seam ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL including the query string.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timed out")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An HTTP capability. Implementations execute exactly one exchange per call.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, BackendError>;
}

// ── Outcomes ─────────────────────────────────────────────────────────

/// Always populated, on success and failure alike.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDetails {
    /// 0 when no response was received.
    pub status: u16,
    pub content_type: String,
    /// Lower-cased names; repeated headers joined with ", ".
    pub headers: BTreeMap<String, String>,
    pub url: String,
}

impl ResponseDetails {
    pub fn without_response(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    fn from_response(url: &str, headers: &[(String, String)], status: u16) -> Self {
        let mut map: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            map.entry(name.to_ascii_lowercase())
                .and_modify(|v| {
                    v.push_str(", ");
                    v.push_str(value);
                })
                .or_insert_with(|| value.clone());
        }
        Self {
            status,
            content_type: map.get("content-type").cloned().unwrap_or_default(),
            headers: map,
            url: url.to_string(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Response body after best-effort parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    Json(Value),
    Text(String),
    Binary { mime_type: String, data: Vec<u8> },
}

impl ResponseBody {
    pub fn to_payload(&self) -> Payload {
        match self {
            ResponseBody::Empty => Payload::Null,
            ResponseBody::Json(v) => Payload::from_json(v.clone()),
            ResponseBody::Text(s) => Payload::String(s.clone()),
            ResponseBody::Binary { mime_type, data } => Payload::Binary {
                mime_type: mime_type.clone(),
                data: data.clone(),
            },
        }
    }

    /// Whether the textual form of the body contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        match self {
            ResponseBody::Json(v) => v.to_string().contains(needle),
            ResponseBody::Text(s) => s.contains(needle),
            ResponseBody::Binary { data, .. } => String::from_utf8_lossy(data).contains(needle),
            ResponseBody::Empty => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportSuccess {
    pub body: ResponseBody,
    pub details: ResponseDetails,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    Timeout,
    Network(String),
    NoMechanism,
    /// Non-2xx status; the parsed error body.
    Status(ResponseBody),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportFailure {
    pub error: TransportError,
    pub details: ResponseDetails,
}

/// Per-request decoding switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeOptions {
    /// Return the body as opaque bytes with its mime type.
    pub binary: bool,
    /// Replace a JSON object body by its `result` member when present.
    pub unwrap_result: bool,
}

// ── Transport ────────────────────────────────────────────────────────

pub struct Transport {
    base_url: String,
    rich: Option<Arc<dyn HttpBackend>>,
    raw: Option<Arc<dyn HttpBackend>>,
    timeout: Duration,
}

impl Transport {
    /// Transport with the compiled-in backends.
    pub fn new(base_url: impl Into<String>) -> Self {
        #[cfg(feature = "reqwest")]
        let rich: Option<Arc<dyn HttpBackend>> = rich::ReqwestBackend::new()
            .map(|b| Arc::new(b) as Arc<dyn HttpBackend>)
            .map_err(|e| tracing::warn!(target: "magnet::transport", error = %e, "rich HTTP backend unavailable"))
            .ok();
        #[cfg(not(feature = "reqwest"))]
        let rich: Option<Arc<dyn HttpBackend>> = None;
        Self::with_backends(base_url, rich, Some(Arc::new(raw::RawHttpBackend::new())))
    }

    pub fn with_backends(
        base_url: impl Into<String>,
        rich: Option<Arc<dyn HttpBackend>>,
        raw: Option<Arc<dyn HttpBackend>>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rich,
            raw,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Rich backend for text exchanges when present, raw otherwise.
    pub fn select(&self, binary: bool) -> Option<&Arc<dyn HttpBackend>> {
        match (&self.rich, &self.raw) {
            (Some(rich), _) if !binary => Some(rich),
            (_, Some(raw)) => Some(raw),
            _ => None,
        }
    }

    pub fn url_for(&self, request: &FormattedRequest) -> String {
        format!("{}{}", self.base_url, request.path_and_query())
    }

    /// Send one request. Success iff the status is in 200..=299.
    pub async fn request(
        &self,
        request: &FormattedRequest,
        options: ExchangeOptions,
    ) -> Result<TransportSuccess, TransportFailure> {
        let url = self.url_for(request);
        let binary = options.binary || matches!(request.body, RequestBody::Raw { .. });
        let backend = match self.select(binary) {
            Some(b) => b,
            None => {
                tracing::error!(target: "magnet::transport", %url, "no HTTP mechanism available");
                return Err(TransportFailure {
                    error: TransportError::NoMechanism,
                    details: ResponseDetails::without_response(url),
                });
            }
        };

        let mut headers = request.headers.clone();
        if let Some(ct) = &request.content_type {
            if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                headers.push(("Content-Type".to_string(), ct.clone()));
            }
        }
        let http_request = HttpRequest {
            method: request.method,
            url: url.clone(),
            headers,
            body: serialize_body(request),
        };

        tracing::debug!(
            target: "magnet::transport",
            backend = backend.name(),
            method = request.method.as_str(),
            %url,
            "sending request"
        );
        let response = match tokio::time::timeout(self.timeout, backend.execute(http_request)).await {
            Err(_) | Ok(Err(BackendError::Timeout)) => {
                tracing::debug!(target: "magnet::transport", %url, "request timed out");
                return Err(TransportFailure {
                    error: TransportError::Timeout,
                    details: ResponseDetails::without_response(url),
                });
            }
            Ok(Err(e)) => {
                tracing::debug!(target: "magnet::transport", %url, error = %e, "request failed");
                return Err(TransportFailure {
                    error: TransportError::Network(e.to_string()),
                    details: ResponseDetails::without_response(url),
                });
            }
            Ok(Ok(response)) => response,
        };

        let details = ResponseDetails::from_response(&url, &response.headers, response.status);
        let body = parse_body(&details.content_type, response.body, options);
        tracing::debug!(target: "magnet::transport", status = details.status, %url, "response received");
        if (200..=299).contains(&details.status) {
            Ok(TransportSuccess { body, details })
        } else {
            Err(TransportFailure {
                error: TransportError::Status(body),
                details,
            })
        }
    }
}

/// JSON, URL-encoded form, or passthrough.
fn serialize_body(request: &FormattedRequest) -> Option<Bytes> {
    match &request.body {
        RequestBody::Empty => None,
        RequestBody::Fields(fields) => {
            let is_form = request
                .content_type
                .as_deref()
                .map_or(false, |ct| ct.to_ascii_lowercase().starts_with(CONTENT_TYPE_FORM));
            if is_form {
                let pairs: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| {
                        let text = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        format!("{}={}", encode_component(k), encode_component(&text))
                    })
                    .collect();
                Some(Bytes::from(pairs.join("&")))
            } else {
                Some(Bytes::from(Value::Object(fields.clone()).to_string()))
            }
        }
        RequestBody::Raw { data, .. } => Some(Bytes::from(data.clone())),
        RequestBody::Multipart { body, .. } => Some(Bytes::from(body.clone())),
    }
}

/// Best-effort body parsing, applied to success and failure responses alike.
fn parse_body(content_type: &str, body: Bytes, options: ExchangeOptions) -> ResponseBody {
    let parsed_type = parse_content_type(content_type);
    if options.binary {
        let mime_type = parsed_type
            .map(|ct| ct.mime_type())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        return ResponseBody::Binary {
            mime_type,
            data: body.to_vec(),
        };
    }
    if body.is_empty() {
        return ResponseBody::Empty;
    }
    let text = String::from_utf8_lossy(&body).into_owned();
    let trimmed = text.trim_start();
    let looks_json = parsed_type.as_ref().map_or(false, |ct| ct.is_json())
        || trimmed.starts_with('{')
        || trimmed.starts_with('[');
    if looks_json {
        if let Ok(value) = serde_json::from_str::<Value>(&text) {
            return ResponseBody::Json(unwrap_envelope(value, options.unwrap_result));
        }
    }
    ResponseBody::Text(text)
}

fn unwrap_envelope(value: Value, unwrap_result: bool) -> Value {
    match value {
        Value::Object(mut map) if unwrap_result && map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn details_lowercase_and_join_headers() {
        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Set-Cookie".to_string(), "a=1".to_string()),
            ("set-cookie".to_string(), "b=2".to_string()),
        ];
        let d = ResponseDetails::from_response("http://h/x", &headers, 200);
        assert_eq!(d.content_type, "application/json");
        assert_eq!(d.header("SET-COOKIE"), Some("a=1, b=2"));
        assert_eq!(d.url, "http://h/x");
    }

    #[test]
    fn json_parsed_on_any_status_and_unwrapped_only_on_request() {
        let body = Bytes::from_static(b"{\"result\":{\"id\":7}}");
        let opts = ExchangeOptions::default();
        assert_eq!(
            parse_body("application/json", body.clone(), opts),
            ResponseBody::Json(json!({"result": {"id": 7}}))
        );
        let opts = ExchangeOptions {
            unwrap_result: true,
            ..Default::default()
        };
        assert_eq!(
            parse_body("application/json", body, opts),
            ResponseBody::Json(json!({"id": 7}))
        );
    }

    #[test]
    fn text_and_binary_bodies() {
        let opts = ExchangeOptions::default();
        assert_eq!(
            parse_body("text/plain", Bytes::from_static(b"hello"), opts),
            ResponseBody::Text("hello".into())
        );
        assert_eq!(parse_body("", Bytes::new(), opts), ResponseBody::Empty);
        let opts = ExchangeOptions {
            binary: true,
            ..Default::default()
        };
        assert_eq!(
            parse_body("image/png; q=1", Bytes::from_static(b"\x89PNG"), opts),
            ResponseBody::Binary {
                mime_type: "image/png".into(),
                data: b"\x89PNG".to_vec()
            }
        );
    }

    #[test]
    fn selection_prefers_rich_for_text_only() {
        struct Named(&'static str);
        #[async_trait]
        impl HttpBackend for Named {
            fn name(&self) -> &'static str {
                self.0
            }
            async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, BackendError> {
                Err(BackendError::Protocol("unused".into()))
            }
        }
        let t = Transport::with_backends(
            "http://h",
            Some(Arc::new(Named("rich"))),
            Some(Arc::new(Named("raw"))),
        );
        assert_eq!(t.select(false).map(|b| b.name()), Some("rich"));
        assert_eq!(t.select(true).map(|b| b.name()), Some("raw"));
        let t = Transport::with_backends("http://h", Some(Arc::new(Named("rich"))), None);
        assert!(t.select(true).is_none());
        let t = Transport::with_backends("http://h", None, None);
        assert!(t.select(false).is_none());
    }
}
