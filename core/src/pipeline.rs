/*
 * pipeline.rs
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

//! Request pipeline: cache, constraint check, formatting, transport, error
//! classification and response decoding for every call.
//!
//! `send` returns a `CallHandle` at once and runs the call on a spawned task
//! whose first action is to yield, so nothing observable happens before the
//! caller's current tick ends. Each call is one task; there is no shared
//! command loop, since calls never need ordering between them.

use std::sync::Arc;

use crate::call::{self, CallFailure, CallHandle, CallOutcome, CallResult, CallState, Invocation, Responder};
use crate::call_manager::{self, CallManager, ConnectivityMonitor, QueuedCall, StaticConnectivity, XmppLink};
use crate::decode::ResponseDecoder;
use crate::error::{CallError, ErrorCode};
use crate::formatter::{FormatError, FormattedRequest, RequestFormatter, DEFAULT_API_ROOT};
use crate::multipart::MultipartWriter;
use crate::payload::Payload;
use crate::cookie::CookieStore;
use crate::schema::{ModelRegistry, RequestMetadata};
use crate::session::{OAuthRecovery, SessionContext, SessionEvent, SessionRefresher, REFRESH_TOKEN_COOKIE};
use crate::transport::{
    ExchangeOptions, ResponseBody, ResponseDetails, Transport, TransportError, TransportFailure,
    TransportSuccess,
};

pub const HEADER_CLIENT_ID: &str = "X-Magnet-auth_client_id";
pub const HEADER_CLIENT_SECRET: &str = "X-Magnet-auth_client_secret";
pub const HEADER_CORRELATION_ID: &str = "X-Magnet-Correlation-id";
pub const HEADER_RESULT_TIMEOUT: &str = "X-Magnet-Result-Timeout";
pub const HEADER_DEVICE_ID: &str = "X-Magnet-Device-Id";

/// Server messages identifying a rejected client id on a 500.
const INVALID_CLIENT_MARKERS: &[&str] = &["invalid_client", "invalid client id", "Invalid client id"];
/// Native-shell OAuth exceptions carried in a 403 body.
const OAUTH_MARKERS: &[&str] = &["OAuthLoginException", "OAuthFlowException"];

// ── Builder ──────────────────────────────────────────────────────────

pub struct PipelineBuilder {
    transport: Arc<Transport>,
    session: Arc<SessionContext>,
    models: Arc<ModelRegistry>,
    api_root: String,
    parse_xml: bool,
    connectivity: Arc<dyn ConnectivityMonitor>,
    xmpp: Option<Arc<dyn XmppLink>>,
    refresher: Option<Arc<dyn SessionRefresher>>,
    oauth: Option<Arc<dyn OAuthRecovery>>,
    cookies: Option<Arc<dyn CookieStore>>,
}

impl PipelineBuilder {
    pub fn models(mut self, models: Arc<ModelRegistry>) -> Self {
        self.models = models;
        self
    }

    pub fn api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into();
        self
    }

    pub fn parse_xml(mut self, parse_xml: bool) -> Self {
        self.parse_xml = parse_xml;
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn ConnectivityMonitor>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn xmpp_link(mut self, link: Arc<dyn XmppLink>) -> Self {
        self.xmpp = Some(link);
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn SessionRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn oauth_recovery(mut self, oauth: Arc<dyn OAuthRecovery>) -> Self {
        self.oauth = Some(oauth);
        self
    }

    /// Store a rotated refresh token is written back to, when one was saved.
    pub fn cookies(mut self, cookies: Arc<dyn CookieStore>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub fn build(self) -> RequestPipeline {
        let manager = CallManager::new(self.connectivity);
        manager.set_xmpp_link(self.xmpp);
        RequestPipeline {
            inner: Arc::new(Inner {
                decoder: ResponseDecoder::new(self.models.clone(), self.parse_xml),
                models: self.models,
                transport: self.transport,
                session: self.session,
                manager,
                api_root: self.api_root,
                refresher: self.refresher,
                oauth: self.oauth,
                cookies: self.cookies,
            }),
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RequestPipeline {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<Transport>,
    session: Arc<SessionContext>,
    manager: CallManager,
    decoder: ResponseDecoder,
    models: Arc<ModelRegistry>,
    api_root: String,
    refresher: Option<Arc<dyn SessionRefresher>>,
    oauth: Option<Arc<dyn OAuthRecovery>>,
    cookies: Option<Arc<dyn CookieStore>>,
}

enum Recovery {
    Retry,
    Fail(CallFailure),
}

impl RequestPipeline {
    pub fn builder(transport: Arc<Transport>, session: Arc<SessionContext>) -> PipelineBuilder {
        PipelineBuilder {
            transport,
            session,
            models: Arc::new(ModelRegistry::new()),
            api_root: DEFAULT_API_ROOT.to_string(),
            parse_xml: false,
            connectivity: Arc::new(StaticConnectivity::default()),
            xmpp: None,
            refresher: None,
            oauth: None,
            cookies: None,
        }
    }

    /// Start a call. Must be called from within a tokio runtime.
    pub fn send(&self, invocation: Invocation) -> CallHandle {
        let (handle, responder) = call::channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            inner.run(invocation, responder).await;
        });
        handle
    }

    /// Send every queued call whose constraint is now met; cancel the ones
    /// that waited longer than their `request_age`. Returns how many were sent.
    pub fn replay_queued(&self) -> usize {
        let drained = self.inner.manager.take_replayable();
        for QueuedCall { invocation, responder } in drained.cancelled {
            let details = self.inner.details_for(&invocation);
            responder.abandon(ErrorCode::Cancelled, details);
        }
        for QueuedCall { invocation, responder } in drained.expired {
            tracing::debug!(target: "magnet::pipeline", call = responder.call().id(), "queued call expired");
            let details = self.inner.details_for(&invocation);
            responder.abandon(ErrorCode::RequestExpired, details);
        }
        let count = drained.ready.len();
        for QueuedCall { invocation, responder } in drained.ready {
            tracing::debug!(target: "magnet::pipeline", call = responder.call().id(), "replaying queued call");
            let inner = self.inner.clone();
            tokio::spawn(async move {
                inner.execute(invocation, responder).await;
            });
        }
        count
    }

    /// Cancel a queued call by id. In-flight calls are cancelled through
    /// their handle.
    pub fn cancel(&self, call_id: &str) -> bool {
        match self.inner.manager.remove_queued(call_id) {
            Some(QueuedCall { invocation, responder }) => {
                let details = self.inner.details_for(&invocation);
                responder.abandon(ErrorCode::Cancelled, details);
                true
            }
            None => false,
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.inner.session.subscribe()
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.inner.session
    }

    pub fn call_manager(&self) -> &CallManager {
        &self.inner.manager
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.inner.transport
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.inner.models
    }
}

impl Inner {
    async fn run(self: Arc<Self>, invocation: Invocation, responder: Responder) {
        if responder.call().is_cancelled() {
            let details = self.details_for(&invocation);
            responder.abandon(ErrorCode::Cancelled, details);
            return;
        }
        let options = &invocation.options;

        if options.cache_age != 0 {
            let hash = call_manager::hash(&invocation.controller, &invocation.method_name, &invocation.attributes);
            if let Some(entry) = self.manager.get_cache(&hash) {
                tracing::debug!(
                    target: "magnet::pipeline",
                    call = responder.call().id(),
                    controller = %invocation.controller,
                    method = %invocation.method_name,
                    "cache hit"
                );
                let outcome = CallOutcome {
                    value: entry.result.clone(),
                    details: entry.details.clone(),
                    from_cache: true,
                };
                responder.respond_cached(Ok(outcome), Some(entry.stored_at));
                return;
            }
        }

        if let Some(constraint) = options.constraint {
            if !self.manager.is_constraint_met(constraint) {
                let current = self.manager.current_state(constraint);
                if options.is_reliable
                    && !call_manager::is_expired(responder.call().created(), options.request_age)
                {
                    tracing::debug!(
                        target: "magnet::pipeline",
                        call = responder.call().id(),
                        constraint = constraint.as_str(),
                        %current,
                        "constraint unmet, queueing"
                    );
                    self.manager.enqueue(QueuedCall { invocation, responder });
                    return;
                }
                tracing::debug!(
                    target: "magnet::pipeline",
                    call = responder.call().id(),
                    constraint = constraint.as_str(),
                    %current,
                    "constraint unmet"
                );
                self.session.emit(SessionEvent::NotConnected {
                    constraint: constraint.as_str().to_string(),
                });
                let error = CallError::Constraint {
                    constraint: constraint.as_str().to_string(),
                    current,
                };
                let details = self.details_for(&invocation);
                responder.respond(Err(CallFailure::new(error, details)));
                return;
            }
        }

        self.execute(invocation, responder).await;
    }

    /// Transport the call and settle it. Also the replay entry point.
    async fn execute(&self, invocation: Invocation, responder: Responder) {
        responder.call().transition(CallState::Executing);
        let result = self.exchange(&invocation, responder.call().id()).await;

        if let Ok(outcome) = &result {
            if invocation.options.cache_age != 0 {
                let hash = call_manager::hash(&invocation.controller, &invocation.method_name, &invocation.attributes);
                self.manager
                    .set_cache(&hash, &outcome.value, &outcome.details, invocation.options.cache_age);
            }
            if let Some(path) = &invocation.options.save_as {
                if let Err(e) = tokio::fs::write(path, saved_bytes(&outcome.value)).await {
                    tracing::warn!(target: "magnet::pipeline", path = %path.display(), error = %e, "could not save result");
                }
            }
        }
        match &result {
            Ok(outcome) => tracing::debug!(
                target: "magnet::pipeline",
                call = responder.call().id(),
                status = outcome.details.status,
                "call succeeded"
            ),
            Err(failure) => tracing::debug!(
                target: "magnet::pipeline",
                call = responder.call().id(),
                status = failure.details.status,
                error = %failure.error,
                "call failed"
            ),
        }
        responder.respond(result);
    }

    /// One request plus at most one retry after session recovery.
    async fn exchange(&self, invocation: &Invocation, call_id: &str) -> CallResult {
        let options = ExchangeOptions {
            binary: invocation.metadata.binary_response,
            unwrap_result: invocation.metadata.unwrap_result,
        };
        let mut retried = false;
        loop {
            let request = self.prepare(invocation, call_id).map_err(|e| {
                let details = ResponseDetails::without_response(self.template_url(&invocation.metadata));
                CallFailure::new(CallError::Validation(e.to_string()), details)
            })?;
            match self.transport.request(&request, options).await {
                Ok(success) => return Ok(self.on_success(invocation, success)),
                Err(failure) => match self.classify(failure, retried).await {
                    Recovery::Retry => {
                        tracing::debug!(target: "magnet::pipeline", call = call_id, "retrying after session recovery");
                        retried = true;
                    }
                    Recovery::Fail(failure) => return Err(failure),
                },
            }
        }
    }

    /// Format the request and add the standard headers. Options headers win.
    fn prepare(&self, invocation: &Invocation, call_id: &str) -> Result<FormattedRequest, FormatError> {
        let metadata = &invocation.metadata;
        let formatter = RequestFormatter::new(&self.models, &self.api_root);
        let mut writer = metadata.is_multipart().then(MultipartWriter::with_unique_boundary);
        let mut request = formatter.format(&invocation.attributes, metadata, writer.as_mut())?;

        request.set_header("Accept", metadata.data_type.accept());
        if let Some(authorization) = self.session.authorization() {
            request.set_header("Authorization", authorization);
        }
        if self.session.is_client_phase() && !self.session.client_id().is_empty() {
            request.set_header(HEADER_CLIENT_ID, self.session.client_id());
            request.set_header(HEADER_CLIENT_SECRET, self.session.client_secret());
        }
        let options = &invocation.options;
        if options.is_reliable {
            request.set_header(HEADER_CORRELATION_ID, call_id);
            request.set_header(HEADER_RESULT_TIMEOUT, options.server_timeout.to_string());
        }
        if let Some(device) = self.session.device() {
            request.set_header(HEADER_DEVICE_ID, device.device_id);
            request.set_header("User-Agent", device.user_agent);
        }
        for (name, value) in &options.headers {
            request.set_header(name, value.as_str());
        }
        Ok(request)
    }

    /// Write a rotated refresh token back over a saved (remember-me) credential.
    fn save_rotated_credential(&self) {
        let Some(store) = &self.cookies else { return };
        match store.get(REFRESH_TOKEN_COOKIE) {
            Ok(Some(saved)) if !saved.is_empty() => {
                if let Err(e) = self.session.persist(store.as_ref()) {
                    tracing::warn!(target: "magnet::session", error = %e, "could not persist refreshed session");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(target: "magnet::session", error = %e, "could not read saved session"),
        }
    }

    /// Details for a call settled without reaching the transport.
    fn details_for(&self, invocation: &Invocation) -> ResponseDetails {
        let formatter = RequestFormatter::new(&self.models, &self.api_root);
        let url = match formatter.format(&invocation.attributes, &invocation.metadata, None) {
            Ok(request) => self.transport.url_for(&request),
            Err(_) => self.template_url(&invocation.metadata),
        };
        ResponseDetails::without_response(url)
    }

    /// Unexpanded path template under the base URL.
    fn template_url(&self, metadata: &RequestMetadata) -> String {
        let root = if metadata.base_path_only {
            ""
        } else {
            self.api_root.trim_end_matches('/')
        };
        format!("{}{}{}", self.transport.base_url(), root, metadata.path)
    }

    fn on_success(&self, invocation: &Invocation, success: TransportSuccess) -> CallOutcome {
        let value = if invocation.options.return_raw {
            success.body.to_payload()
        } else {
            self.decoder.decode(success.body, &invocation.metadata.return_type)
        };
        CallOutcome {
            value,
            details: success.details,
            from_cache: false,
        }
    }

    async fn classify(&self, failure: TransportFailure, retried: bool) -> Recovery {
        let TransportFailure { error, details } = failure;
        let fail = |error: CallError, details: ResponseDetails| Recovery::Fail(CallFailure { error, details });
        let body = match error {
            TransportError::Timeout => return fail(ErrorCode::RequestTimeout.into(), details),
            TransportError::Network(_) => return fail(ErrorCode::NetworkError.into(), details),
            TransportError::NoMechanism => return fail(ErrorCode::NoHttpMechanism.into(), details),
            TransportError::Status(body) => body,
        };
        let status = details.status;

        if status == 403 && self.session.is_native_shell() && contains_any(&body, OAUTH_MARKERS) {
            if let Some(oauth) = &self.oauth {
                let payload = body.to_payload();
                if retried {
                    return fail(CallError::Server(payload), details);
                }
                tracing::info!(target: "magnet::session", "routing OAuth exception to recovery");
                if oauth.recover(&payload, &details).await {
                    return Recovery::Retry;
                }
                return fail(CallError::Server(payload), details);
            }
        }

        if status == 401 || status == 403 {
            if !retried {
                self.session.emit(SessionEvent::SessionExpired);
            }
            if !retried && self.session.refresh_token().is_some() {
                if let Some(refresher) = &self.refresher {
                    match refresher.refresh(&self.session).await {
                        Ok(token) => {
                            self.session.update_user_token(&token);
                            if token.refresh_token.is_some() {
                                self.save_rotated_credential();
                            }
                            self.session.emit(SessionEvent::TokenRefreshed);
                            return Recovery::Retry;
                        }
                        Err(e) => {
                            tracing::warn!(target: "magnet::session", error = %e, "session refresh failed");
                        }
                    }
                }
            }
            let code = if self.session.has_user() {
                ErrorCode::SessionExpired
            } else {
                ErrorCode::NotAuthorized
            };
            return fail(code.into(), details);
        }

        if status == 500 && contains_any(&body, INVALID_CLIENT_MARKERS) {
            self.session.emit(SessionEvent::InvalidClientId);
            return fail(ErrorCode::InvalidClientId.into(), details);
        }
        if status == 413 {
            return fail(ErrorCode::FileTooLarge.into(), details);
        }
        fail(CallError::Server(body.to_payload()), details)
    }
}

fn contains_any(body: &ResponseBody, needles: &[&str]) -> bool {
    needles.iter().any(|n| body.contains(n))
}

/// File content for `save_as`: raw bytes for binary results, text as-is,
/// JSON otherwise.
fn saved_bytes(value: &Payload) -> Vec<u8> {
    match value {
        Payload::Binary { data, .. } | Payload::Bytes(data) => data.clone(),
        Payload::String(s) => s.as_bytes().to_vec(),
        other => other.to_json().to_string().into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallOptions;
    use crate::config::ClientConfig;
    use crate::schema::{ParamType, RequestMetadata, Style};
    use crate::transport::{BackendError, HttpBackend, HttpRequest, HttpResponse, Method};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        requests: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpBackend for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, BackendError> {
            self.requests.lock().unwrap().push(request);
            Ok(HttpResponse {
                status: 200,
                headers: vec![("Content-Type".into(), "application/json".into())],
                body: bytes::Bytes::from_static(b"{}"),
            })
        }
    }

    fn pipeline(config: ClientConfig) -> (RequestPipeline, Arc<Recording>) {
        let backend = Arc::new(Recording::default());
        let shared: Arc<dyn HttpBackend> = backend.clone();
        let transport = Arc::new(Transport::with_backends("http://h", Some(shared.clone()), Some(shared)));
        let session = Arc::new(SessionContext::new(&config));
        (RequestPipeline::builder(transport, session).build(), backend)
    }

    fn header<'a>(request: &'a HttpRequest, name: &str) -> Option<&'a str> {
        request
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn injects_standard_headers() {
        let config = ClientConfig::new("http://h")
            .with_client("cid", "secret")
            .with_device("dev-1", "App/1.0");
        let (p, backend) = pipeline(config);
        let metadata = Arc::new(
            RequestMetadata::new(Method::Post, "/things").param("name", ParamType::String, Style::Plain),
        );
        let mut options = CallOptions {
            is_reliable: true,
            server_timeout: 20,
            ..Default::default()
        };
        options.headers.insert("X-Extra".into(), "1".into());
        let handle = p.send(
            Invocation::new("ThingController", "create", metadata, Payload::object().with("name", "a"))
                .with_options(options),
        );
        let id = handle.id().to_string();
        handle.await.unwrap();

        let requests = backend.requests.lock().unwrap();
        let r = &requests[0];
        assert_eq!(r.url, "http://h/rest/things");
        assert_eq!(header(r, "Accept"), Some("application/json"));
        assert!(header(r, "Authorization").unwrap().starts_with("Basic "));
        assert_eq!(header(r, HEADER_CLIENT_ID), Some("cid"));
        assert_eq!(header(r, HEADER_CLIENT_SECRET), Some("secret"));
        assert_eq!(header(r, HEADER_CORRELATION_ID), Some(id.as_str()));
        assert_eq!(header(r, HEADER_RESULT_TIMEOUT), Some("20"));
        assert_eq!(header(r, HEADER_DEVICE_ID), Some("dev-1"));
        assert_eq!(header(r, "User-Agent"), Some("App/1.0"));
        assert_eq!(header(r, "X-Extra"), Some("1"));
    }

    #[tokio::test]
    async fn bearer_phase_drops_client_headers() {
        let (p, backend) = pipeline(ClientConfig::new("http://h").with_client("cid", "secret"));
        p.session().set_app_token("app");
        let metadata = Arc::new(RequestMetadata::new(Method::Get, "/x"));
        p.send(Invocation::new("C", "m", metadata, Payload::object())).await.unwrap();
        let requests = backend.requests.lock().unwrap();
        assert_eq!(header(&requests[0], "Authorization"), Some("Bearer app"));
        assert_eq!(header(&requests[0], HEADER_CLIENT_ID), None);
        assert_eq!(header(&requests[0], HEADER_DEVICE_ID), None);
        assert_eq!(header(&requests[0], HEADER_CORRELATION_ID), None);
    }

    #[tokio::test]
    async fn missing_template_fails_before_network() {
        let (p, backend) = pipeline(ClientConfig::new("http://h"));
        let metadata = Arc::new(
            RequestMetadata::new(Method::Get, "/x/{id}").param("id", ParamType::String, Style::Template),
        );
        let handle = p.send(Invocation::new("C", "m", metadata, Payload::object()));
        let call = handle.call().clone();
        let failure = handle.await.unwrap_err();
        assert!(matches!(failure.error, CallError::Validation(_)));
        assert_eq!(failure.details.url, "http://h/rest/x/{id}");
        assert_eq!(call.state(), CallState::Failed);
        assert!(backend.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn saved_bytes_by_kind() {
        assert_eq!(saved_bytes(&Payload::Bytes(vec![1, 2])), vec![1, 2]);
        assert_eq!(saved_bytes(&Payload::from("hi")), b"hi".to_vec());
        assert_eq!(saved_bytes(&Payload::object().with("a", 1i64)), b"{\"a\":1}".to_vec());
    }
}
