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

//! Raw HTTP backend: in-tree HTTP/1.1 client over tokio and rustls.
//!
//! Always available. One connection per request; the response body is
//! buffered whole, so it is also the backend used for binary transfers.

pub mod connection;
pub mod handler;
pub mod parser;

use async_trait::async_trait;

use super::{BackendError, HttpBackend, HttpRequest, HttpResponse};
use connection::HttpClient;
use handler::CollectingHandler;

/// Parsed `http[s]://host[:port]/path?query`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub tls: bool,
    pub host: String,
    pub port: u16,
    pub path_and_query: String,
}

/// Split an absolute URL into connection target and request target.
pub fn parse_url(url: &str) -> Result<Target, BackendError> {
    let (tls, rest) = if let Some(r) = url.strip_prefix("https://") {
        (true, r)
    } else if let Some(r) = url.strip_prefix("http://") {
        (false, r)
    } else {
        return Err(BackendError::InvalidUrl(url.to_string()));
    };
    let (authority, path) = match rest.find(|c: char| c == '/' || c == '?') {
        Some(i) if rest[i..].starts_with('?') => (&rest[..i], format!("/{}", &rest[i..])),
        Some(i) => (&rest[..i], rest[i..].to_string()),
        None => (rest, "/".to_string()),
    };
    let default_port = if tls { 443 } else { 80 };
    let (host, port) = match authority.rfind(':') {
        Some(colon) if !authority.ends_with(']') => {
            let port = authority[colon + 1..]
                .parse::<u16>()
                .map_err(|_| BackendError::InvalidUrl(url.to_string()))?;
            (&authority[..colon], port)
        }
        _ => (authority, default_port),
    };
    if host.is_empty() {
        return Err(BackendError::InvalidUrl(url.to_string()));
    }
    Ok(Target {
        tls,
        host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
        port,
        path_and_query: path,
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RawHttpBackend;

impl RawHttpBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HttpBackend for RawHttpBackend {
    fn name(&self) -> &'static str {
        "raw"
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, BackendError> {
        let target = parse_url(&request.url)?;
        let mut conn = HttpClient::connect(&target.host, target.port, target.tls)
            .await
            .map_err(|e| BackendError::Connect(format!("{}:{}: {}", target.host, target.port, e)))?;

        let mut req = conn.request(request.method, target.path_and_query.as_str());
        for (name, value) in &request.headers {
            req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            req.body(body.to_vec());
        }

        let (handler, collected) = CollectingHandler::new();
        conn.send(req, handler).await?;

        let mut collected = collected.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(failure) = collected.failure.take() {
            return Err(BackendError::Protocol(failure));
        }
        Ok(HttpResponse {
            status: collected.status,
            headers: std::mem::take(&mut collected.headers),
            body: collected.body(),
        })
    }
}
