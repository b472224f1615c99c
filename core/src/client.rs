/*
 * client.rs
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

//! Client facade: owns the pipeline and session, invokes catalogued methods,
//! and keeps the refresh credential in the cookie store.

use std::sync::Arc;

use crate::call::{CallFailure, CallHandle, CallOptions, Connectivity, Invocation};
use crate::call_manager::{StaticConnectivity, XmppLink};
use crate::config::{ClientConfig, DeviceIdentity};
use crate::controllers::{self, Catalogue};
use crate::cookie::CookieStore;
use crate::error::{CallError, ClientError};
use crate::payload::Payload;
use crate::pipeline::RequestPipeline;
use crate::session::{AccessToken, SessionContext, SessionEvent, TokenEndpointRefresher};
use crate::transport::{ResponseDetails, Transport};

pub struct MagnetClient {
    config: ClientConfig,
    catalogue: Catalogue,
    pipeline: RequestPipeline,
    connectivity: Arc<StaticConnectivity>,
    cookies: Arc<dyn CookieStore>,
}

impl MagnetClient {
    /// Client over the compiled-in HTTP backends. Restores a saved session.
    pub fn new(config: ClientConfig, cookies: Arc<dyn CookieStore>) -> Result<Self, ClientError> {
        let transport = Arc::new(Transport::new(config.endpoint.clone()));
        Self::with_transport(config, cookies, transport)
    }

    pub fn with_transport(
        config: ClientConfig,
        cookies: Arc<dyn CookieStore>,
        transport: Arc<Transport>,
    ) -> Result<Self, ClientError> {
        let catalogue = Catalogue::standard();
        let session = Arc::new(SessionContext::new(&config));
        session.restore(cookies.as_ref())?;
        let connectivity = Arc::new(StaticConnectivity::new(Connectivity::Unknown));
        let refresher = Arc::new(TokenEndpointRefresher::new(transport.clone(), config.api_root.clone()));
        let pipeline = RequestPipeline::builder(transport, session)
            .models(catalogue.models())
            .api_root(config.api_root.clone())
            .parse_xml(config.parse_xml)
            .connectivity(connectivity.clone())
            .refresher(refresher)
            .cookies(cookies.clone())
            .build();
        Ok(Self {
            config,
            catalogue,
            pipeline,
            connectivity,
            cookies,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        self.pipeline.session()
    }

    pub fn set_connectivity(&self, connectivity: Connectivity) {
        self.connectivity.set(connectivity);
    }

    pub fn set_xmpp_link(&self, link: Option<Arc<dyn XmppLink>>) {
        self.pipeline.call_manager().set_xmpp_link(link);
    }

    pub fn set_device(&self, device: Option<DeviceIdentity>) {
        self.session().set_device(device);
    }

    /// Call a catalogued method.
    pub fn invoke(
        &self,
        controller: &str,
        method: &str,
        attributes: Payload,
        options: CallOptions,
    ) -> Result<CallHandle, ClientError> {
        let metadata = self
            .catalogue
            .lookup(controller, method)
            .ok_or_else(|| ClientError::UnknownMethod {
                controller: controller.to_string(),
                method: method.to_string(),
            })?;
        let invocation = Invocation::new(controller, method, metadata, attributes).with_options(options);
        Ok(self.pipeline.send(invocation))
    }

    /// Replay queued reliable calls, e.g. after connectivity returns.
    pub fn replay_queued(&self) -> usize {
        self.pipeline.replay_queued()
    }

    /// Client-credential grant; the application token authorizes later calls.
    pub async fn app_session(&self) -> Result<AccessToken, CallFailure> {
        let attributes = Payload::object()
            .with("grant_type", "client_credentials")
            .with("client_id", self.config.client_id.as_str())
            .with("client_secret", self.config.client_secret.as_str())
            .with("scope", "APPLICATION");
        let outcome = self
            .invoke_known(controllers::APPLICATION, "session", attributes)?
            .await?;
        let token = token_from(&outcome.value, &outcome.details)?;
        self.session().set_app_token(token.access_token.clone());
        tracing::info!(target: "magnet::session", "application session established");
        Ok(token)
    }

    /// Password grant. With `remember_me` the refresh token is persisted.
    pub async fn login(&self, username: &str, password: &str, remember_me: bool) -> Result<AccessToken, CallFailure> {
        let attributes = Payload::object()
            .with("grant_type", "password")
            .with("username", username)
            .with("password", password)
            .with("client_id", self.config.client_id.as_str())
            .with("scope", "user")
            .with("remember_me", remember_me);
        let outcome = self.invoke_known(controllers::USER, "login", attributes)?.await?;
        let token = token_from(&outcome.value, &outcome.details)?;
        self.session().set_user(username, &token);
        if remember_me {
            if let Err(e) = self.session().persist(self.cookies.as_ref()) {
                tracing::warn!(target: "magnet::session", error = %e, "could not persist session");
            }
        }
        self.session().emit(SessionEvent::LoggedIn {
            user_name: username.to_string(),
        });
        Ok(token)
    }

    /// End the user session. Local state is cleared whatever the server says.
    pub async fn logout(&self) -> Result<(), CallFailure> {
        let result = match self.invoke_known(controllers::USER, "logout", Payload::object()) {
            Ok(handle) => handle.await.map(|_| ()),
            Err(failure) => Err(failure),
        };
        self.session().clear_user();
        if let Err(e) = self.session().persist(self.cookies.as_ref()) {
            tracing::warn!(target: "magnet::session", error = %e, "could not clear saved session");
        }
        self.session().emit(SessionEvent::LoggedOut);
        result
    }

    /// Upload files as one multipart/related message with a JSON envelope.
    pub fn upload(&self, files: Vec<(String, Vec<u8>)>, metadata: Payload) -> Result<CallHandle, ClientError> {
        let mut parts: Vec<Payload> = files
            .into_iter()
            .map(|(mime_type, data)| Payload::Binary { mime_type, data })
            .collect();
        let mut attributes = Payload::object().with("metadata", metadata);
        if parts.len() == 1 {
            attributes.insert("file", parts.remove(0));
        } else {
            attributes.insert("files", Payload::Array(parts));
        }
        self.invoke(controllers::ATTACHMENT, "upload", attributes, CallOptions::default())
    }

    fn invoke_known(&self, controller: &str, method: &str, attributes: Payload) -> Result<CallHandle, CallFailure> {
        self.invoke(controller, method, attributes, CallOptions::default())
            .map_err(|e| CallFailure::new(CallError::Validation(e.to_string()), ResponseDetails::default()))
    }
}

fn token_from(value: &Payload, details: &ResponseDetails) -> Result<AccessToken, CallFailure> {
    AccessToken::from_payload(value).map_err(|e| CallFailure::new(e, details.clone()))
}
