/*
 * pipeline.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Behaviour of the request pipeline against a scripted HTTP backend: caching,
 * constraints and the reliable queue, error classification, session refresh
 * and OAuth recovery, and deferred settlement.
 *
 * Run with:
 *   cargo test -p magnet_core --test pipeline
 */

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use magnet_core::call::{CallOptions, CallState, Connectivity, Constraint, Invocation};
use magnet_core::call_manager::StaticConnectivity;
use magnet_core::cookie::{CookieStore, MemoryCookieStore};
use magnet_core::pipeline::{PipelineBuilder, RequestPipeline};
use magnet_core::schema::{ParamType, RequestMetadata, Style};
use magnet_core::session::{
    AccessToken, OAuthRecovery, SessionContext, SessionEvent, SessionRefresher, REFRESH_TOKEN_COOKIE,
};
use magnet_core::transport::{BackendError, HttpBackend, HttpRequest, HttpResponse, Method, ResponseDetails, Transport};
use magnet_core::{CallError, ClientConfig, ErrorCode, Payload};

enum Step {
    Reply(u16, &'static str, &'static str),
    Refuse,
    Hang,
}

struct Scripted {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl Scripted {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn authorization(&self, index: usize) -> Option<String> {
        self.requests.lock().unwrap()[index]
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
            .map(|(_, v)| v.clone())
    }
}

#[async_trait]
impl HttpBackend for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, BackendError> {
        self.requests.lock().unwrap().push(request);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Reply(200, "application/json", "{}"));
        match step {
            Step::Reply(status, content_type, body) => Ok(HttpResponse {
                status,
                headers: vec![("Content-Type".to_string(), content_type.to_string())],
                body: Bytes::from_static(body.as_bytes()),
            }),
            Step::Refuse => Err(BackendError::Connect("connection refused".into())),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(BackendError::Timeout)
            }
        }
    }
}

struct CountingRefresher {
    calls: AtomicUsize,
    succeed: bool,
    rotate: Option<&'static str>,
}

#[async_trait]
impl SessionRefresher for CountingRefresher {
    async fn refresh(&self, _session: &SessionContext) -> Result<AccessToken, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            let token = AccessToken::bearer("fresh");
            Ok(match self.rotate {
                Some(refresh) => token.with_refresh(refresh),
                None => token,
            })
        } else {
            Err(ErrorCode::SessionExpired.into())
        }
    }
}

struct CountingOAuth {
    calls: AtomicUsize,
}

#[async_trait]
impl OAuthRecovery for CountingOAuth {
    async fn recover(&self, _body: &Payload, details: &ResponseDetails) -> bool {
        assert_eq!(details.status, 403);
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }
}

struct Harness {
    pipeline: RequestPipeline,
    backend: Arc<Scripted>,
    connectivity: Arc<StaticConnectivity>,
}

/// `RUST_LOG=magnet=debug` shows the pipeline's decisions.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness_with(
    steps: Vec<Step>,
    config: ClientConfig,
    configure: impl FnOnce(PipelineBuilder) -> PipelineBuilder,
) -> Harness {
    init_tracing();
    let backend = Scripted::new(steps);
    let shared: Arc<dyn HttpBackend> = backend.clone();
    let transport = Arc::new(Transport::with_backends("http://api.test", Some(shared.clone()), Some(shared)));
    let session = Arc::new(SessionContext::new(&config));
    let connectivity = Arc::new(StaticConnectivity::new(Connectivity::Wifi));
    let builder = RequestPipeline::builder(transport, session).connectivity(connectivity.clone());
    Harness {
        pipeline: configure(builder).build(),
        backend,
        connectivity,
    }
}

fn harness(steps: Vec<Step>) -> Harness {
    harness_with(steps, ClientConfig::new("http://api.test"), |b| b)
}

fn list_items(options: CallOptions) -> Invocation {
    let metadata = Arc::new(
        RequestMetadata::new(Method::Get, "/items").param("q", ParamType::String, Style::Query),
    );
    Invocation::new("ItemController", "list", metadata, Payload::object().with("q", "x")).with_options(options)
}

async fn wait_for_state(call: &magnet_core::call::Call, state: CallState) {
    for _ in 0..100 {
        if call.state() == state {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("call never reached {:?}, stuck in {:?}", state, call.state());
}

// ── Caching ──────────────────────────────────────────────────────────

#[tokio::test]
async fn cached_result_issues_no_second_network_call() {
    let h = harness(vec![Step::Reply(200, "application/json", "{\"n\":1}")]);
    let first = h.pipeline.send(list_items(CallOptions::cached(60))).await.unwrap();
    assert!(!first.from_cache);

    let handle = h.pipeline.send(list_items(CallOptions::cached(60)));
    let call = handle.call().clone();
    let second = handle.await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.value, first.value);
    assert_eq!(second.details, first.details);
    assert_eq!(h.backend.calls(), 1);

    let record = call.record();
    assert_eq!(record.state, CallState::Success);
    assert!(record.is_result_from_cache);
    assert!(record.cached_time.is_some());
}

#[tokio::test]
async fn zero_cache_age_never_stores_or_hits() {
    let h = harness(vec![]);
    for _ in 0..3 {
        let outcome = h.pipeline.send(list_items(CallOptions::default())).await.unwrap();
        assert!(!outcome.from_cache);
    }
    assert_eq!(h.backend.calls(), 3);
    assert_eq!(h.pipeline.call_manager().cache_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn cache_expires_after_age() {
    let h = harness(vec![]);
    h.pipeline.send(list_items(CallOptions::cached(10))).await.unwrap();
    tokio::time::advance(Duration::from_secs(11)).await;
    let outcome = h.pipeline.send(list_items(CallOptions::cached(10))).await.unwrap();
    assert!(!outcome.from_cache);
    assert_eq!(h.backend.calls(), 2);
}

// ── Settlement ───────────────────────────────────────────────────────

#[tokio::test]
async fn outcome_is_never_settled_in_the_callers_tick() {
    let h = harness(vec![]);
    h.pipeline.send(list_items(CallOptions::cached(60))).await.unwrap();

    // Even a cache hit waits for the caller to yield.
    let handle = h.pipeline.send(list_items(CallOptions::cached(60)));
    assert_eq!(handle.state(), CallState::Init);
    let outcome = handle.await.unwrap();
    assert!(outcome.from_cache);

    let handle = h.pipeline.send(list_items(CallOptions::default()));
    assert_eq!(handle.state(), CallState::Init);
    assert_eq!(h.backend.calls(), 1);
    handle.await.unwrap();
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn cancelled_before_start_sends_nothing() {
    let h = harness(vec![]);
    let handle = h.pipeline.send(list_items(CallOptions::default()));
    assert!(handle.cancel());
    let call = handle.call().clone();
    let failure = handle.await.unwrap_err();
    assert_eq!(failure.error, CallError::Code(ErrorCode::Cancelled));
    assert_eq!(failure.details.url, "http://api.test/rest/items?q=x");
    assert_eq!(call.state(), CallState::Cancelled);
    assert_eq!(h.backend.calls(), 0);
}

// ── Status classification ────────────────────────────────────────────

#[tokio::test]
async fn success_iff_status_in_2xx() {
    for status in [200u16, 201, 204, 299] {
        let h = harness(vec![Step::Reply(status, "application/json", "{}")]);
        let outcome = h.pipeline.send(list_items(CallOptions::default())).await;
        assert!(outcome.is_ok(), "status {} should succeed", status);
    }
    for status in [300u16, 302, 400, 404, 503] {
        let h = harness(vec![Step::Reply(status, "application/json", "{\"message\":\"no\"}")]);
        let failure = h.pipeline.send(list_items(CallOptions::default())).await.unwrap_err();
        assert_eq!(failure.details.status, status);
        assert_eq!(
            failure.error,
            CallError::Server(Payload::object().with("message", "no")),
            "status {}",
            status
        );
    }
}

#[tokio::test]
async fn network_failure_has_status_zero() {
    let h = harness(vec![Step::Refuse]);
    let failure = h.pipeline.send(list_items(CallOptions::default())).await.unwrap_err();
    assert_eq!(failure.error, CallError::Code(ErrorCode::NetworkError));
    assert_eq!(failure.details.status, 0);
    assert_eq!(failure.details.url, "http://api.test/rest/items?q=x");
}

#[tokio::test(start_paused = true)]
async fn timeout_is_request_timeout_with_status_zero() {
    let h = harness(vec![Step::Hang]);
    let handle = h.pipeline.send(list_items(CallOptions::default()));
    let call = handle.call().clone();
    let failure = handle.await.unwrap_err();
    assert_eq!(failure.error, CallError::Code(ErrorCode::RequestTimeout));
    assert_eq!(failure.details.status, 0);
    assert_eq!(call.state(), CallState::Failed);
}

#[tokio::test]
async fn invalid_client_id_on_500() {
    let h = harness(vec![Step::Reply(500, "application/json", "{\"error\":\"invalid_client\"}")]);
    let mut events = h.pipeline.subscribe();
    let failure = h.pipeline.send(list_items(CallOptions::default())).await.unwrap_err();
    assert_eq!(failure.error, CallError::Code(ErrorCode::InvalidClientId));
    assert_eq!(failure.details.status, 500);
    assert_eq!(events.try_recv().unwrap(), SessionEvent::InvalidClientId);
}

#[tokio::test]
async fn plain_500_is_passed_through() {
    let h = harness(vec![Step::Reply(500, "text/plain", "boom")]);
    let failure = h.pipeline.send(list_items(CallOptions::default())).await.unwrap_err();
    assert_eq!(failure.error, CallError::Server(Payload::from("boom")));
}

#[tokio::test]
async fn entity_too_large() {
    let h = harness(vec![Step::Reply(413, "text/html", "<html>too big</html>")]);
    let failure = h.pipeline.send(list_items(CallOptions::default())).await.unwrap_err();
    assert_eq!(failure.error.to_string(), "maximum filesize exceeded");
}

// ── Session recovery ─────────────────────────────────────────────────

fn logged_in(h: &Harness) {
    h.pipeline
        .session()
        .set_user("ann", &AccessToken::bearer("stale").with_refresh("r1"));
}

#[tokio::test]
async fn unauthorized_is_retried_once_after_refresh() {
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        succeed: true,
        rotate: None,
    });
    let r = refresher.clone();
    let h = harness_with(
        vec![
            Step::Reply(401, "application/json", "{}"),
            Step::Reply(200, "application/json", "{\"ok\":true}"),
        ],
        ClientConfig::new("http://api.test"),
        move |b| b.refresher(r),
    );
    logged_in(&h);
    let mut events = h.pipeline.subscribe();

    let outcome = h.pipeline.send(list_items(CallOptions::default())).await.unwrap();
    assert_eq!(outcome.value.get("ok"), Some(&Payload::Bool(true)));
    assert_eq!(h.backend.calls(), 2);
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.authorization(0).as_deref(), Some("Bearer stale"));
    assert_eq!(h.backend.authorization(1).as_deref(), Some("Bearer fresh"));
    assert_eq!(events.try_recv().unwrap(), SessionEvent::SessionExpired);
    assert_eq!(events.try_recv().unwrap(), SessionEvent::TokenRefreshed);
}

#[tokio::test]
async fn failed_retry_rejects_once_without_second_retry() {
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        succeed: true,
        rotate: None,
    });
    let r = refresher.clone();
    let h = harness_with(
        vec![
            Step::Reply(401, "application/json", "{}"),
            Step::Reply(403, "application/json", "{}"),
            Step::Reply(200, "application/json", "{}"),
        ],
        ClientConfig::new("http://api.test"),
        move |b| b.refresher(r),
    );
    logged_in(&h);
    let mut events = h.pipeline.subscribe();

    let failure = h.pipeline.send(list_items(CallOptions::default())).await.unwrap_err();
    assert_eq!(failure.error, CallError::Code(ErrorCode::SessionExpired));
    assert_eq!(failure.details.status, 403);
    assert_eq!(h.backend.calls(), 2);
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

    // One rejection, one expiry notice.
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen, vec![SessionEvent::SessionExpired, SessionEvent::TokenRefreshed]);
}

#[tokio::test]
async fn rotated_refresh_token_replaces_saved_credential() {
    let store = Arc::new(MemoryCookieStore::new());
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        succeed: true,
        rotate: Some("r2"),
    });
    let r = refresher.clone();
    let cookies: Arc<dyn CookieStore> = store.clone();
    let h = harness_with(
        vec![
            Step::Reply(401, "application/json", "{}"),
            Step::Reply(200, "application/json", "{}"),
        ],
        ClientConfig::new("http://api.test"),
        move |b| b.refresher(r).cookies(cookies),
    );
    logged_in(&h);
    h.pipeline.session().persist(store.as_ref()).unwrap();
    assert_eq!(store.get(REFRESH_TOKEN_COOKIE).unwrap().as_deref(), Some("r1"));

    h.pipeline.send(list_items(CallOptions::default())).await.unwrap();
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.pipeline.session().refresh_token().as_deref(), Some("r2"));
    assert_eq!(store.get(REFRESH_TOKEN_COOKIE).unwrap().as_deref(), Some("r2"));
}

#[tokio::test]
async fn rotated_refresh_token_is_not_saved_without_remember_me() {
    let store = Arc::new(MemoryCookieStore::new());
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        succeed: true,
        rotate: Some("r2"),
    });
    let cookies: Arc<dyn CookieStore> = store.clone();
    let h = harness_with(
        vec![
            Step::Reply(401, "application/json", "{}"),
            Step::Reply(200, "application/json", "{}"),
        ],
        ClientConfig::new("http://api.test"),
        move |b| b.refresher(refresher).cookies(cookies),
    );
    logged_in(&h);

    h.pipeline.send(list_items(CallOptions::default())).await.unwrap();
    assert_eq!(h.pipeline.session().refresh_token().as_deref(), Some("r2"));
    assert_eq!(store.get(REFRESH_TOKEN_COOKIE).unwrap(), None);
}

#[tokio::test]
async fn failed_refresh_is_not_retried() {
    let refresher = Arc::new(CountingRefresher {
        calls: AtomicUsize::new(0),
        succeed: false,
        rotate: None,
    });
    let r = refresher.clone();
    let h = harness_with(
        vec![Step::Reply(401, "application/json", "{}")],
        ClientConfig::new("http://api.test"),
        move |b| b.refresher(r),
    );
    logged_in(&h);
    let failure = h.pipeline.send(list_items(CallOptions::default())).await.unwrap_err();
    assert_eq!(failure.error, CallError::Code(ErrorCode::SessionExpired));
    assert_eq!(h.backend.calls(), 1);
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unauthorized_without_user_is_not_authorized() {
    let h = harness(vec![Step::Reply(401, "application/json", "{}")]);
    let mut events = h.pipeline.subscribe();
    let failure = h.pipeline.send(list_items(CallOptions::default())).await.unwrap_err();
    assert_eq!(failure.error, CallError::Code(ErrorCode::NotAuthorized));
    assert_eq!(h.backend.calls(), 1);
    assert_eq!(events.try_recv().unwrap(), SessionEvent::SessionExpired);
}

#[tokio::test]
async fn native_shell_oauth_exception_goes_to_recovery() {
    let oauth = Arc::new(CountingOAuth {
        calls: AtomicUsize::new(0),
    });
    let o = oauth.clone();
    let h = harness_with(
        vec![
            Step::Reply(403, "application/json", "{\"type\":\"OAuthLoginException\"}"),
            Step::Reply(200, "application/json", "{\"ok\":1}"),
        ],
        ClientConfig::new("http://api.test").with_device("dev-1", "App/1.0"),
        move |b| b.oauth_recovery(o),
    );
    let mut events = h.pipeline.subscribe();
    let outcome = h.pipeline.send(list_items(CallOptions::default())).await.unwrap();
    assert_eq!(outcome.value.get("ok").and_then(Payload::as_i64), Some(1));
    assert_eq!(oauth.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.calls(), 2);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn oauth_recovery_runs_once_when_retry_is_also_rejected() {
    let oauth = Arc::new(CountingOAuth {
        calls: AtomicUsize::new(0),
    });
    let o = oauth.clone();
    let body = "{\"type\":\"OAuthLoginException\"}";
    let h = harness_with(
        vec![
            Step::Reply(403, "application/json", body),
            Step::Reply(403, "application/json", body),
            Step::Reply(403, "application/json", body),
        ],
        ClientConfig::new("http://api.test").with_device("dev-1", "App/1.0"),
        move |b| b.oauth_recovery(o),
    );
    let failure = h.pipeline.send(list_items(CallOptions::default())).await.unwrap_err();
    assert_eq!(
        failure.error,
        CallError::Server(Payload::object().with("type", "OAuthLoginException"))
    );
    assert_eq!(failure.details.status, 403);
    assert_eq!(oauth.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.calls(), 2);
}

#[tokio::test]
async fn oauth_body_outside_native_shell_is_session_expiry() {
    let oauth = Arc::new(CountingOAuth {
        calls: AtomicUsize::new(0),
    });
    let o = oauth.clone();
    let h = harness_with(
        vec![Step::Reply(403, "application/json", "{\"type\":\"OAuthLoginException\"}")],
        ClientConfig::new("http://api.test"),
        move |b| b.oauth_recovery(o),
    );
    let failure = h.pipeline.send(list_items(CallOptions::default())).await.unwrap_err();
    assert_eq!(failure.error, CallError::Code(ErrorCode::NotAuthorized));
    assert_eq!(oauth.calls.load(Ordering::SeqCst), 0);
}

// ── Constraints and the reliable queue ───────────────────────────────

#[tokio::test]
async fn unmet_constraint_fails_with_constraint_payload() {
    let h = harness(vec![]);
    h.connectivity.set(Connectivity::None);
    let mut events = h.pipeline.subscribe();
    let options = CallOptions {
        constraint: Some(Constraint::Network),
        ..Default::default()
    };
    let handle = h.pipeline.send(list_items(options));
    let call = handle.call().clone();
    let failure = handle.await.unwrap_err();
    assert_eq!(
        failure.error,
        CallError::Constraint {
            constraint: "network".into(),
            current: "none".into()
        }
    );
    let payload = failure.error.to_payload();
    assert_eq!(payload.get("constraint").and_then(Payload::as_str), Some("network"));
    assert_eq!(call.state(), CallState::Failed);
    assert_eq!(failure.details.status, 0);
    assert_eq!(failure.details.url, "http://api.test/rest/items?q=x");
    assert_eq!(h.backend.calls(), 0);
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::NotConnected {
            constraint: "network".into()
        }
    );
}

#[tokio::test]
async fn reliable_call_is_queued_and_replayed() {
    let h = harness(vec![Step::Reply(200, "application/json", "{\"sent\":true}")]);
    h.connectivity.set(Connectivity::Cellular);
    let options = CallOptions {
        constraint: Some(Constraint::Wifi),
        is_reliable: true,
        request_age: 600,
        ..Default::default()
    };
    let handle = h.pipeline.send(list_items(options));
    let call = handle.call().clone();
    wait_for_state(&call, CallState::Queued).await;
    assert_eq!(h.pipeline.call_manager().queued_len(), 1);

    // Constraint still unmet: nothing to replay.
    assert_eq!(h.pipeline.replay_queued(), 0);
    assert_eq!(h.backend.calls(), 0);

    h.connectivity.set(Connectivity::Wifi);
    assert_eq!(h.pipeline.replay_queued(), 1);
    let outcome = handle.await.unwrap();
    assert_eq!(outcome.value.get("sent"), Some(&Payload::Bool(true)));
    assert_eq!(call.state(), CallState::Success);
    assert_eq!(h.backend.calls(), 1);

    let requests = h.backend.requests.lock().unwrap();
    let correlation = requests[0]
        .headers
        .iter()
        .find(|(k, _)| k == "X-Magnet-Correlation-id")
        .map(|(_, v)| v.clone());
    assert_eq!(correlation.as_deref(), Some(call.id()));
}

#[tokio::test(start_paused = true)]
async fn expired_queued_call_is_cancelled() {
    let h = harness(vec![]);
    h.connectivity.set(Connectivity::None);
    let options = CallOptions {
        constraint: Some(Constraint::Network),
        is_reliable: true,
        request_age: 5,
        ..Default::default()
    };
    let handle = h.pipeline.send(list_items(options));
    let call = handle.call().clone();
    wait_for_state(&call, CallState::Queued).await;

    tokio::time::advance(Duration::from_secs(6)).await;
    h.connectivity.set(Connectivity::Wifi);
    assert_eq!(h.pipeline.replay_queued(), 0);
    let failure = handle.await.unwrap_err();
    assert_eq!(failure.error, CallError::Code(ErrorCode::RequestExpired));
    assert_eq!(failure.details.url, "http://api.test/rest/items?q=x");
    assert_eq!(call.state(), CallState::Cancelled);
    assert_eq!(h.backend.calls(), 0);
}

#[tokio::test]
async fn queued_call_can_be_cancelled_by_id() {
    let h = harness(vec![]);
    h.connectivity.set(Connectivity::None);
    let options = CallOptions {
        constraint: Some(Constraint::Network),
        is_reliable: true,
        ..Default::default()
    };
    let handle = h.pipeline.send(list_items(options));
    let call = handle.call().clone();
    wait_for_state(&call, CallState::Queued).await;
    assert!(h.pipeline.cancel(call.id()));
    assert!(!h.pipeline.cancel(call.id()));
    let failure = handle.await.unwrap_err();
    assert_eq!(failure.error, CallError::Code(ErrorCode::Cancelled));
    assert_eq!(call.state(), CallState::Cancelled);
}

// ── Decoding through the pipeline ────────────────────────────────────

#[tokio::test]
async fn binary_response_keeps_bytes_and_mime_type() {
    let h = harness(vec![Step::Reply(200, "image/png", "\u{1}\u{2}PNG")]);
    let metadata = Arc::new(
        RequestMetadata::new(Method::Get, "/file/{id}")
            .param("id", ParamType::String, Style::Template)
            .binary_response(),
    );
    let invocation = Invocation::new("AttachmentController", "download", metadata, Payload::object().with("id", "f1"));
    let outcome = h.pipeline.send(invocation).await.unwrap();
    assert_eq!(
        outcome.value,
        Payload::Binary {
            mime_type: "image/png".into(),
            data: b"\x01\x02PNG".to_vec()
        }
    );
    assert_eq!(outcome.details.url, "http://api.test/rest/file/f1");
}

#[tokio::test]
async fn return_raw_skips_decoding() {
    let h = harness(vec![Step::Reply(200, "application/json", "\"2020-01-02T03:04:05.000Z\"")]);
    let metadata = Arc::new(RequestMetadata::new(Method::Get, "/now").returns(magnet_core::schema::ReturnType::Date));
    let decoded = h
        .pipeline
        .send(Invocation::new("C", "now", metadata.clone(), Payload::object()))
        .await
        .unwrap();
    assert!(decoded.value.as_date().is_some());

    let h = harness(vec![Step::Reply(200, "application/json", "\"2020-01-02T03:04:05.000Z\"")]);
    let raw = h
        .pipeline
        .send(
            Invocation::new("C", "now", metadata, Payload::object()).with_options(CallOptions {
                return_raw: true,
                ..Default::default()
            }),
        )
        .await
        .unwrap();
    assert_eq!(raw.value, Payload::from("2020-01-02T03:04:05.000Z"));
}
