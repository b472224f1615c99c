/*
 * handler.rs
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

//! Push-model response events for the raw HTTP/1.1 client.
//!
//! Events: ok/error → header (×n) → start_body → body_chunk (×n) → end_body → complete,
//! or `failed` alone on connection or protocol failure.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

/// Status line of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub reason: Option<String>,
}

impl Response {
    pub fn new(code: u16) -> Self {
        Self { code, reason: None }
    }

    pub fn with_reason(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Handler for HTTP response events. The connection drives it as data arrives.
pub trait ResponseHandler {
    /// A 2xx status was received.
    fn ok(&mut self, response: Response);

    /// Any other status was received.
    fn error(&mut self, response: Response);

    /// Called for each response or trailer header. Names may repeat.
    fn header(&mut self, name: &str, value: &str);

    /// Not called for bodiless responses (204, 304, Content-Length: 0).
    fn start_body(&mut self);

    /// Data is only valid for the duration of the call.
    fn body_chunk(&mut self, data: &[u8]);

    fn end_body(&mut self);

    fn complete(&mut self);

    fn failed(&mut self, error: &std::io::Error);
}

/// Everything one response delivered.
#[derive(Debug, Default)]
pub struct Collected {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: BytesMut,
    pub completed: bool,
    pub failure: Option<String>,
}

impl Collected {
    pub fn body(&self) -> Bytes {
        self.body.clone().freeze()
    }
}

/// Buffers a whole response into a shared `Collected`, since `send` takes the
/// handler by value.
pub struct CollectingHandler {
    inner: Arc<Mutex<Collected>>,
}

impl CollectingHandler {
    pub fn new() -> (Self, Arc<Mutex<Collected>>) {
        let inner = Arc::new(Mutex::new(Collected::default()));
        (
            Self {
                inner: inner.clone(),
            },
            inner,
        )
    }

    fn with<F: FnOnce(&mut Collected)>(&self, f: F) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

impl ResponseHandler for CollectingHandler {
    fn ok(&mut self, response: Response) {
        self.with(|c| c.status = response.code);
    }

    fn error(&mut self, response: Response) {
        self.with(|c| c.status = response.code);
    }

    fn header(&mut self, name: &str, value: &str) {
        self.with(|c| c.headers.push((name.to_string(), value.to_string())));
    }

    fn start_body(&mut self) {}

    fn body_chunk(&mut self, data: &[u8]) {
        self.with(|c| c.body.extend_from_slice(data));
    }

    fn end_body(&mut self) {}

    fn complete(&mut self) {
        self.with(|c| c.completed = true);
    }

    fn failed(&mut self, error: &std::io::Error) {
        let msg = error.to_string();
        self.with(|c| c.failure = Some(msg));
    }
}
