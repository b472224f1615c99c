/*
 * call.rs
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

//! Calls: one logical request/response lifecycle, its options, and the
//! caller-side handle that settles with the outcome.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::SystemTime;

use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{CallError, ErrorCode};
use crate::payload::Payload;
use crate::schema::RequestMetadata;
use crate::transport::ResponseDetails;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Init,
    Executing,
    Queued,
    Cancelled,
    Success,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Success | CallState::Failed | CallState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Init => "init",
            CallState::Executing => "executing",
            CallState::Queued => "queued",
            CallState::Cancelled => "cancelled",
            CallState::Success => "success",
            CallState::Failed => "failed",
        }
    }
}

/// Connectivity predicate gating whether a call may proceed now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Constraint {
    /// Any network connection.
    Network,
    Wifi,
    /// Real-time (XMPP) channel connected.
    #[serde(alias = "realTime", alias = "real-time")]
    RealTime,
}

impl Constraint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Constraint::Network => "network",
            Constraint::Wifi => "wifi",
            Constraint::RealTime => "realtime",
        }
    }
}

/// Ambient connectivity as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    None,
    Wifi,
    Cellular,
    Ethernet,
    /// Host gives no information (e.g. a plain desktop process).
    #[default]
    Unknown,
}

impl Connectivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Connectivity::None => "none",
            Connectivity::Wifi => "wifi",
            Connectivity::Cellular => "cellular",
            Connectivity::Ethernet => "ethernet",
            Connectivity::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Connectivity {
        match s.to_ascii_lowercase().as_str() {
            "none" | "offline" => Connectivity::None,
            "wifi" => Connectivity::Wifi,
            "cellular" | "mobile" => Connectivity::Cellular,
            "ethernet" => Connectivity::Ethernet,
            _ => Connectivity::Unknown,
        }
    }
}

/// Per-call options. Immutable once the call is sent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallOptions {
    /// Seconds a successful result stays cached; 0 disables caching.
    pub cache_age: u64,
    pub constraint: Option<Constraint>,
    /// Queue instead of failing when the constraint is unmet.
    pub is_reliable: bool,
    /// Maximum seconds a reliable call may wait in the queue; 0 means no limit.
    pub request_age: u64,
    /// Seconds the server may take to produce a reliable call's result.
    pub server_timeout: u64,
    /// Extra request headers; these win over the standard ones.
    pub headers: BTreeMap<String, String>,
    /// Skip response decoding and return the transport body as-is.
    pub return_raw: bool,
    /// Also write the decoded result to this file.
    pub save_as: Option<PathBuf>,
}

impl CallOptions {
    pub fn cached(seconds: u64) -> Self {
        Self {
            cache_age: seconds,
            ..Default::default()
        }
    }
}

/// One request: what to call, with what, and how.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub controller: String,
    pub method_name: String,
    pub metadata: Arc<RequestMetadata>,
    pub attributes: Payload,
    pub options: CallOptions,
}

impl Invocation {
    pub fn new(
        controller: impl Into<String>,
        method_name: impl Into<String>,
        metadata: Arc<RequestMetadata>,
        attributes: Payload,
    ) -> Self {
        Self {
            controller: controller.into(),
            method_name: method_name.into(),
            metadata,
            attributes,
            options: CallOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub value: Payload,
    pub details: ResponseDetails,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallFailure {
    pub error: CallError,
    pub details: ResponseDetails,
}

impl CallFailure {
    pub fn new(error: impl Into<CallError>, details: ResponseDetails) -> Self {
        Self {
            error: error.into(),
            details,
        }
    }
}

pub type CallResult = Result<CallOutcome, CallFailure>;

/// Observable state of a call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub state: CallState,
    pub result: Option<Payload>,
    pub result_error: Option<CallError>,
    pub details: Option<ResponseDetails>,
    pub cached_time: Option<SystemTime>,
    pub is_result_from_cache: bool,
}

/// Shared between the pipeline task and the caller's handle.
#[derive(Debug)]
pub struct Call {
    id: String,
    created: Instant,
    record: Mutex<CallRecord>,
}

impl Call {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created: Instant::now(),
            record: Mutex::new(CallRecord {
                state: CallState::Init,
                result: None,
                result_error: None,
                details: None,
                cached_time: None,
                is_result_from_cache: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn state(&self) -> CallState {
        self.lock().state
    }

    pub fn record(&self) -> CallRecord {
        self.lock().clone()
    }

    /// Move to a non-terminal state. Ignored once terminal.
    pub fn transition(&self, state: CallState) -> bool {
        let mut record = self.lock();
        if record.state.is_terminal() {
            return false;
        }
        record.state = state;
        true
    }

    /// Mark cancelled. Returns false when the call had already settled.
    pub fn cancel(&self) -> bool {
        self.transition(CallState::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == CallState::Cancelled
    }

    /// Record a terminal outcome. A cancelled call keeps its state.
    fn settle(&self, result: &CallResult, cached_time: Option<SystemTime>) {
        let mut record = self.lock();
        if record.state.is_terminal() {
            return;
        }
        match result {
            Ok(outcome) => {
                record.state = CallState::Success;
                record.result = Some(outcome.value.clone());
                record.details = Some(outcome.details.clone());
                record.is_result_from_cache = outcome.from_cache;
                record.cached_time = cached_time;
            }
            Err(failure) => {
                record.state = CallState::Failed;
                record.result_error = Some(failure.error.clone());
                record.details = Some(failure.details.clone());
            }
        }
    }
}

impl Default for Call {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending half of a call: settles the `Call` and wakes the handle exactly once.
#[derive(Debug)]
pub struct Responder {
    call: Arc<Call>,
    tx: oneshot::Sender<CallResult>,
}

impl Responder {
    pub fn call(&self) -> &Arc<Call> {
        &self.call
    }

    pub fn respond(self, result: CallResult) {
        self.respond_cached(result, None)
    }

    pub fn respond_cached(self, result: CallResult, cached_time: Option<SystemTime>) {
        let result = if self.call.is_cancelled() {
            let details = match &result {
                Ok(o) => o.details.clone(),
                Err(f) => f.details.clone(),
            };
            Err(CallFailure::new(ErrorCode::Cancelled, details))
        } else {
            result
        };
        self.call.settle(&result, cached_time);
        // The handle may have been dropped; nobody is waiting then.
        let _ = self.tx.send(result);
    }

    /// Settle as CANCELLED, reporting `error` to the handle.
    pub fn abandon(self, error: impl Into<CallError>, details: ResponseDetails) {
        let error = error.into();
        {
            let mut record = self.call.lock();
            if !record.state.is_terminal() || record.state == CallState::Cancelled {
                record.state = CallState::Cancelled;
                record.result_error = Some(error.clone());
            }
        }
        let _ = self.tx.send(Err(CallFailure::new(error, details)));
    }
}

/// Caller's side. Resolves to the call's outcome however late it is awaited.
#[derive(Debug)]
pub struct CallHandle {
    call: Arc<Call>,
    rx: oneshot::Receiver<CallResult>,
}

impl CallHandle {
    pub fn id(&self) -> &str {
        self.call.id()
    }

    pub fn state(&self) -> CallState {
        self.call.state()
    }

    pub fn call(&self) -> &Arc<Call> {
        &self.call
    }

    /// Advisory: an in-flight request still completes, but the handle resolves
    /// with `call-cancelled`.
    pub fn cancel(&self) -> bool {
        self.call.cancel()
    }
}

impl Future for CallHandle {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CallFailure::new(
                ErrorCode::Cancelled,
                ResponseDetails::default(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Create a call with its handle and responder.
pub fn channel() -> (CallHandle, Responder) {
    let call = Arc::new(Call::new());
    let (tx, rx) = oneshot::channel();
    (
        CallHandle {
            call: call.clone(),
            rx,
        },
        Responder { call, tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_deserialize_from_camel_case() {
        let opts: CallOptions = serde_json::from_value(serde_json::json!({
            "cacheAge": 60,
            "constraint": "wifi",
            "isReliable": true,
            "requestAge": 300,
            "headers": {"X-A": "1"}
        }))
        .unwrap();
        assert_eq!(opts.cache_age, 60);
        assert_eq!(opts.constraint, Some(Constraint::Wifi));
        assert!(opts.is_reliable);
        assert_eq!(opts.request_age, 300);
        assert_eq!(opts.headers.get("X-A").map(String::as_str), Some("1"));
        assert!(!opts.return_raw);
    }

    #[tokio::test]
    async fn handle_resolves_after_respond() {
        let (handle, responder) = channel();
        assert_eq!(handle.state(), CallState::Init);
        let call = handle.call().clone();
        responder.respond(Ok(CallOutcome {
            value: Payload::from("ok"),
            details: ResponseDetails::default(),
            from_cache: false,
        }));
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.value, Payload::from("ok"));
        assert_eq!(call.state(), CallState::Success);
        assert_eq!(call.record().result, Some(Payload::from("ok")));
    }

    #[tokio::test]
    async fn cancelled_call_resolves_with_cancelled() {
        let (handle, responder) = channel();
        assert!(handle.cancel());
        responder.respond(Ok(CallOutcome {
            value: Payload::Null,
            details: ResponseDetails::default(),
            from_cache: false,
        }));
        let failure = handle.await.unwrap_err();
        assert_eq!(failure.error.code(), Some(ErrorCode::Cancelled));
    }

    #[test]
    fn terminal_state_is_sticky() {
        let call = Call::new();
        assert!(call.transition(CallState::Executing));
        assert!(call.cancel());
        assert!(!call.transition(CallState::Executing));
        assert_eq!(call.state(), CallState::Cancelled);
    }
}
