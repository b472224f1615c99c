/*
 * lib.rs
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

//! Magnet client core: turns typed method calls into HTTP requests against
//! the Magnet platform and decodes the responses.
//!
//! The request path is `MagnetClient` → `RequestPipeline` (cache, constraints,
//! session recovery) → `RequestFormatter` / `multipart` → `Transport`
//! (reqwest or the in-tree HTTP/1.1 client) → `ResponseDecoder`.

pub mod call;
pub mod call_manager;
pub mod client;
pub mod config;
pub mod controllers;
pub mod cookie;
pub mod decode;
pub mod error;
pub mod formatter;
pub mod multipart;
pub mod net;
pub mod payload;
pub mod pipeline;
pub mod schema;
pub mod session;
pub mod transport;
pub mod xml;

pub use call::{CallFailure, CallHandle, CallOptions, CallOutcome, CallState, Connectivity, Constraint, Invocation};
pub use client::MagnetClient;
pub use config::ClientConfig;
pub use error::{CallError, ClientError, ErrorCode};
pub use payload::Payload;
pub use pipeline::RequestPipeline;
pub use session::{SessionContext, SessionEvent};
pub use transport::{ResponseDetails, Transport};
