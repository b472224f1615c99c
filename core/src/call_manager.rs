/*
 * call_manager.rs
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

//! Call bookkeeping: the result cache, constraint evaluation, and the queue of
//! reliable calls waiting for their constraint.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::call::{CallState, Connectivity, Constraint, Invocation, Responder};
use crate::payload::{format_wire_date, Payload};
use crate::transport::ResponseDetails;

// ── Collaborators ────────────────────────────────────────────────────

/// Ambient connectivity, supplied by the host.
pub trait ConnectivityMonitor: Send + Sync {
    fn current(&self) -> Connectivity;
}

/// Connectivity set explicitly by the host (FFI shells, tests).
#[derive(Debug, Default)]
pub struct StaticConnectivity {
    state: Mutex<Connectivity>,
}

impl StaticConnectivity {
    pub fn new(state: Connectivity) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn set(&self, state: Connectivity) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl ConnectivityMonitor for StaticConnectivity {
    fn current(&self) -> Connectivity {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The real-time channel, as far as this crate needs to know it.
pub trait XmppLink: Send + Sync {
    fn is_connected(&self) -> bool;
}

// ── Cache ────────────────────────────────────────────────────────────

/// Immutable cached result. Replaced wholesale on write.
#[derive(Debug)]
pub struct CacheEntry {
    pub hash: String,
    pub result: Payload,
    pub details: ResponseDetails,
    pub stored_at: SystemTime,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Stable key over `(controller, method, attributes)`.
pub fn hash(controller: &str, method: &str, attributes: &Payload) -> String {
    let mut canonical = String::new();
    canonical.push_str(controller);
    canonical.push('\u{0}');
    canonical.push_str(method);
    canonical.push('\u{0}');
    write_canonical(attributes, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Type-tagged serialization. Maps are already key-ordered.
fn write_canonical(value: &Payload, out: &mut String) {
    match value {
        Payload::Null => out.push('n'),
        Payload::Bool(b) => out.push(if *b { 't' } else { 'f' }),
        Payload::Number(n) => {
            let _ = write!(out, "N{};", n);
        }
        Payload::String(s) => {
            let _ = write!(out, "S{}:{}", s.len(), s);
        }
        Payload::Date(d) => {
            let _ = write!(out, "D{};", format_wire_date(d));
        }
        Payload::Bytes(b) => {
            out.push('B');
            write_bytes(b, out);
        }
        Payload::Binary { mime_type, data } => {
            let _ = write!(out, "F{}:{}", mime_type.len(), mime_type);
            write_bytes(data, out);
        }
        Payload::Xml(x) => {
            let markup = x.to_xml_string();
            let _ = write!(out, "X{}:{}", markup.len(), markup);
        }
        Payload::Array(items) => {
            out.push('[');
            for item in items {
                write_canonical(item, out);
                out.push(',');
            }
            out.push(']');
        }
        Payload::Object(map) => {
            out.push('{');
            for (k, v) in map {
                let _ = write!(out, "{}:{}=", k.len(), k);
                write_canonical(v, out);
                out.push(',');
            }
            out.push('}');
        }
        Payload::Model { type_name, fields } => {
            let _ = write!(out, "M{}:{}", type_name.len(), type_name);
            write_canonical(&Payload::Object(fields.clone()), out);
        }
    }
}

fn write_bytes(data: &[u8], out: &mut String) {
    let _ = write!(out, "{}:", data.len());
    for b in data {
        let _ = write!(out, "{:02x}", b);
    }
}

/// `max_age` of 0 never expires.
pub fn is_expired(created: Instant, max_age: u64) -> bool {
    max_age != 0 && created.elapsed() > Duration::from_secs(max_age)
}

// ── Queue ────────────────────────────────────────────────────────────

/// A reliable call held for replay with everything needed to resend it.
#[derive(Debug)]
pub struct QueuedCall {
    pub invocation: Invocation,
    pub responder: Responder,
}

impl QueuedCall {
    pub fn call_id(&self) -> &str {
        self.responder.call().id()
    }

    pub fn is_expired(&self) -> bool {
        is_expired(self.responder.call().created(), self.invocation.options.request_age)
    }
}

/// Result of draining the queue.
#[derive(Debug, Default)]
pub struct Drained {
    /// Constraint now met; send these.
    pub ready: Vec<QueuedCall>,
    /// Older than their `request_age`.
    pub expired: Vec<QueuedCall>,
    /// Cancelled through their handle while queued.
    pub cancelled: Vec<QueuedCall>,
}

// ── Manager ──────────────────────────────────────────────────────────

pub struct CallManager {
    cache: Mutex<HashMap<String, Arc<CacheEntry>>>,
    queue: Mutex<Vec<QueuedCall>>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    xmpp: Mutex<Option<Arc<dyn XmppLink>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl CallManager {
    pub fn new(connectivity: Arc<dyn ConnectivityMonitor>) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            queue: Mutex::new(Vec::new()),
            connectivity,
            xmpp: Mutex::new(None),
        }
    }

    pub fn set_xmpp_link(&self, link: Option<Arc<dyn XmppLink>>) {
        *lock(&self.xmpp) = link;
    }

    pub fn connectivity(&self) -> Connectivity {
        self.connectivity.current()
    }

    pub fn get_cache(&self, hash: &str) -> Option<Arc<CacheEntry>> {
        let mut cache = lock(&self.cache);
        match cache.get(hash) {
            Some(entry) if entry.is_live() => Some(entry.clone()),
            Some(_) => {
                cache.remove(hash);
                None
            }
            None => None,
        }
    }

    /// Store a result for `age` seconds. An age of 0 stores nothing.
    pub fn set_cache(&self, hash: &str, result: &Payload, details: &ResponseDetails, age: u64) {
        if age == 0 {
            return;
        }
        let entry = Arc::new(CacheEntry {
            hash: hash.to_string(),
            result: result.clone(),
            details: details.clone(),
            stored_at: SystemTime::now(),
            expires_at: Instant::now() + Duration::from_secs(age),
        });
        lock(&self.cache).insert(hash.to_string(), entry);
    }

    pub fn invalidate(&self, hash: &str) -> bool {
        lock(&self.cache).remove(hash).is_some()
    }

    pub fn clear_cache(&self) {
        lock(&self.cache).clear();
    }

    pub fn cache_len(&self) -> usize {
        lock(&self.cache).values().filter(|e| e.is_live()).count()
    }

    /// Unknown connectivity is taken as satisfying the network constraints.
    pub fn is_constraint_met(&self, constraint: Constraint) -> bool {
        match constraint {
            Constraint::Network => self.connectivity() != Connectivity::None,
            Constraint::Wifi => matches!(
                self.connectivity(),
                Connectivity::Wifi | Connectivity::Ethernet | Connectivity::Unknown
            ),
            Constraint::RealTime => lock(&self.xmpp)
                .as_ref()
                .map_or(false, |link| link.is_connected()),
        }
    }

    /// The state reported alongside an unmet constraint.
    pub fn current_state(&self, constraint: Constraint) -> String {
        match constraint {
            Constraint::RealTime => {
                let connected = lock(&self.xmpp)
                    .as_ref()
                    .map_or(false, |link| link.is_connected());
                if connected { "connected" } else { "disconnected" }.to_string()
            }
            _ => self.connectivity().as_str().to_string(),
        }
    }

    pub fn enqueue(&self, queued: QueuedCall) {
        queued.responder.call().transition(CallState::Queued);
        lock(&self.queue).push(queued);
    }

    pub fn queued_len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn remove_queued(&self, call_id: &str) -> Option<QueuedCall> {
        let mut queue = lock(&self.queue);
        let index = queue.iter().position(|q| q.call_id() == call_id)?;
        Some(queue.remove(index))
    }

    /// Take every queued call that can be settled now. Calls whose constraint
    /// is still unmet stay queued in order.
    pub fn take_replayable(&self) -> Drained {
        let mut queue = lock(&self.queue);
        let mut drained = Drained::default();
        let mut remaining = Vec::with_capacity(queue.len());
        for queued in queue.drain(..) {
            if queued.responder.call().is_cancelled() {
                drained.cancelled.push(queued);
            } else if queued.is_expired() {
                drained.expired.push(queued);
            } else if queued
                .invocation
                .options
                .constraint
                .map_or(true, |c| self.is_constraint_met(c))
            {
                drained.ready.push(queued);
            } else {
                remaining.push(queued);
            }
        }
        *queue = remaining;
        drained
    }
}
