/*
 * error.rs
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

//! Client and call errors.

use std::fmt;

use thiserror::Error;

use crate::payload::Payload;

/// Short machine codes surfaced to callers in place of a server body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SessionExpired,
    NotAuthorized,
    InvalidClientId,
    RequestTimeout,
    FileTooLarge,
    NetworkError,
    NoHttpMechanism,
    RequestExpired,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SessionExpired => "session-expired",
            ErrorCode::NotAuthorized => "not-authorized",
            ErrorCode::InvalidClientId => "invalid-client-id",
            ErrorCode::RequestTimeout => "request-timeout",
            ErrorCode::FileTooLarge => "maximum filesize exceeded",
            ErrorCode::NetworkError => "network-error",
            ErrorCode::NoHttpMechanism => "no-http-mechanism",
            ErrorCode::RequestExpired => "request-expired",
            ErrorCode::Cancelled => "call-cancelled",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error value of a failed call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error("{0}")]
    Code(ErrorCode),
    /// Pre-flight connectivity constraint not satisfied.
    #[error("constraint {constraint} not met (current: {current})")]
    Constraint { constraint: String, current: String },
    /// Request could not be built from the attributes (nothing was sent).
    #[error("invalid request: {0}")]
    Validation(String),
    /// Unclassified failure: the server's (decoded) error body, unchanged.
    #[error("server error: {0}")]
    Server(Payload),
}

impl CallError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            CallError::Code(c) => Some(*c),
            _ => None,
        }
    }

    /// Payload form handed across the FFI and to event listeners.
    pub fn to_payload(&self) -> Payload {
        match self {
            CallError::Code(c) => Payload::from(c.as_str()),
            CallError::Constraint { constraint, current } => Payload::object()
                .with("constraint", constraint.as_str())
                .with("current", current.as_str()),
            CallError::Validation(msg) => Payload::object().with("validation", msg.as_str()),
            CallError::Server(body) => body.clone(),
        }
    }
}

impl From<ErrorCode> for CallError {
    fn from(code: ErrorCode) -> Self {
        CallError::Code(code)
    }
}

/// Errors from configuration, persistence, and client set-up.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cookie store error: {0}")]
    Cookie(String),
    #[error("unknown method {controller}.{method}")]
    UnknownMethod { controller: String, method: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
}

impl ClientError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}
