/*
 * session.rs
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

//! Session context: the single current session (client credentials,
//! application token, user token, device identity) shared by the pipeline,
//! and the session event stream.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::config::{ClientConfig, DeviceIdentity};
use crate::controllers;
use crate::cookie::CookieStore;
use crate::error::{CallError, ClientError, ErrorCode};
use crate::formatter::RequestFormatter;
use crate::payload::Payload;
use crate::schema::ModelRegistry;
use crate::transport::{ExchangeOptions, ResponseBody, ResponseDetails, Transport, TransportError};

/// Cookie holding the user's refresh token between runs.
pub const REFRESH_TOKEN_COOKIE: &str = "magnet-max-refresh-token";
/// Cookie holding the name of the user the refresh token belongs to.
pub const USER_COOKIE: &str = "magnet-max-user";

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SessionExpired,
    TokenRefreshed,
    InvalidClientId,
    /// A call failed its connectivity constraint.
    NotConnected { constraint: String },
    LoggedIn { user_name: String },
    LoggedOut,
}

/// OAuth token response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl AccessToken {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            access_token: token.into(),
            refresh_token: None,
            expires_in: None,
            token_type: Some("Bearer".into()),
        }
    }

    pub fn with_refresh(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, CallError> {
        payload
            .deserialize_into()
            .map_err(|e| CallError::Validation(format!("token response: {}", e)))
    }
}

#[derive(Debug, Default)]
struct SessionState {
    app_token: Option<String>,
    user_name: Option<String>,
    user_token: Option<String>,
    refresh_token: Option<String>,
    device: Option<DeviceIdentity>,
}

pub struct SessionContext {
    client_id: String,
    client_secret: String,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionContext {
    pub fn new(config: &ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            state: Mutex::new(SessionState {
                device: config.device.clone(),
                ..Default::default()
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        tracing::info!(target: "magnet::session", ?event, "session event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn set_app_token(&self, token: impl Into<String>) {
        self.lock().app_token = Some(token.into());
    }

    pub fn app_token(&self) -> Option<String> {
        self.lock().app_token.clone()
    }

    pub fn set_user(&self, user_name: impl Into<String>, token: &AccessToken) {
        let mut state = self.lock();
        state.user_name = Some(user_name.into());
        state.user_token = Some(token.access_token.clone());
        if token.refresh_token.is_some() {
            state.refresh_token = token.refresh_token.clone();
        }
    }

    /// Replace the user's access token after a refresh.
    pub fn update_user_token(&self, token: &AccessToken) {
        let mut state = self.lock();
        state.user_token = Some(token.access_token.clone());
        if token.refresh_token.is_some() {
            state.refresh_token = token.refresh_token.clone();
        }
    }

    pub fn clear_user(&self) {
        let mut state = self.lock();
        state.user_name = None;
        state.user_token = None;
        state.refresh_token = None;
    }

    pub fn user_name(&self) -> Option<String> {
        self.lock().user_name.clone()
    }

    pub fn user_token(&self) -> Option<String> {
        self.lock().user_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().refresh_token.clone()
    }

    /// A user is logged in, or was and can be restored by refresh.
    pub fn has_user(&self) -> bool {
        let state = self.lock();
        state.user_token.is_some() || state.refresh_token.is_some()
    }

    pub fn device(&self) -> Option<DeviceIdentity> {
        self.lock().device.clone()
    }

    pub fn set_device(&self, device: Option<DeviceIdentity>) {
        self.lock().device = device;
    }

    pub fn is_native_shell(&self) -> bool {
        self.lock().device.is_some()
    }

    /// Neither an application nor a user token yet: requests authenticate with
    /// the client credentials.
    pub fn is_client_phase(&self) -> bool {
        let state = self.lock();
        state.app_token.is_none() && state.user_token.is_none()
    }

    /// Bearer with the user token, else the application token; Basic with the
    /// client credentials before either exists.
    pub fn authorization(&self) -> Option<String> {
        let state = self.lock();
        if let Some(token) = state.user_token.as_ref().or(state.app_token.as_ref()) {
            return Some(format!("Bearer {}", token));
        }
        if self.client_id.is_empty() {
            return None;
        }
        let credentials = format!("{}:{}", self.client_id, self.client_secret);
        Some(format!("Basic {}", BASE64.encode(credentials.as_bytes())))
    }

    /// Save the refresh credential, or remove it when there is none.
    pub fn persist(&self, store: &dyn CookieStore) -> Result<(), ClientError> {
        let (user_name, refresh_token) = {
            let state = self.lock();
            (state.user_name.clone(), state.refresh_token.clone())
        };
        match refresh_token {
            Some(token) => {
                store.create(REFRESH_TOKEN_COOKIE, &token)?;
                match user_name {
                    Some(name) => store.create(USER_COOKIE, &name)?,
                    None => store.remove(USER_COOKIE)?,
                }
            }
            None => {
                store.remove(REFRESH_TOKEN_COOKIE)?;
                store.remove(USER_COOKIE)?;
            }
        }
        Ok(())
    }

    /// Restore a saved refresh credential. Returns whether one was found.
    pub fn restore(&self, store: &dyn CookieStore) -> Result<bool, ClientError> {
        let refresh_token = match store.get(REFRESH_TOKEN_COOKIE)? {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(false),
        };
        let user_name = store.get(USER_COOKIE)?;
        let mut state = self.lock();
        state.refresh_token = Some(refresh_token);
        state.user_name = user_name;
        tracing::info!(target: "magnet::session", "restored saved session");
        Ok(true)
    }
}

// ── Recovery collaborators ───────────────────────────────────────────

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    async fn refresh(&self, session: &SessionContext) -> Result<AccessToken, CallError>;
}

/// Handles a native shell's OAuth exception (re-login through the shell).
/// Returns true when the session was re-established and the call may be retried.
#[async_trait]
pub trait OAuthRecovery: Send + Sync {
    async fn recover(&self, body: &Payload, details: &ResponseDetails) -> bool;
}

/// Refresher posting to the user token endpoint. Talks to the transport
/// directly so a refresh never re-enters the pipeline.
pub struct TokenEndpointRefresher {
    transport: Arc<Transport>,
    api_root: String,
}

impl TokenEndpointRefresher {
    pub fn new(transport: Arc<Transport>, api_root: impl Into<String>) -> Self {
        Self {
            transport,
            api_root: api_root.into(),
        }
    }
}

#[async_trait]
impl SessionRefresher for TokenEndpointRefresher {
    async fn refresh(&self, session: &SessionContext) -> Result<AccessToken, CallError> {
        let refresh_token = session
            .refresh_token()
            .ok_or(CallError::Code(ErrorCode::SessionExpired))?;
        let metadata = controllers::renew_token();
        let mut attributes = Payload::object()
            .with("grant_type", "refresh_token")
            .with("refresh_token", refresh_token)
            .with("client_id", session.client_id());
        if let Some(device) = session.device() {
            attributes.insert("device_id", device.device_id);
        }
        let models = ModelRegistry::new();
        let mut request = RequestFormatter::new(&models, &self.api_root)
            .format(&attributes, &metadata, None)
            .map_err(|e| CallError::Validation(e.to_string()))?;
        if !session.client_id().is_empty() {
            let credentials = format!("{}:{}", session.client_id(), session.client_secret());
            request.set_header("Authorization", format!("Basic {}", BASE64.encode(credentials.as_bytes())));
        }

        match self.transport.request(&request, ExchangeOptions::default()).await {
            Ok(success) => {
                let token = AccessToken::from_payload(&success.body.to_payload())?;
                tracing::info!(target: "magnet::session", "user token refreshed");
                Ok(token)
            }
            Err(failure) => {
                tracing::warn!(target: "magnet::session", status = failure.details.status, "token refresh failed");
                Err(match failure.error {
                    TransportError::Status(ResponseBody::Empty) => CallError::Code(ErrorCode::SessionExpired),
                    TransportError::Status(body) => CallError::Server(body.to_payload()),
                    TransportError::Timeout => CallError::Code(ErrorCode::RequestTimeout),
                    TransportError::Network(_) => CallError::Code(ErrorCode::NetworkError),
                    TransportError::NoMechanism => CallError::Code(ErrorCode::NoHttpMechanism),
                })
            }
        }
    }
}
