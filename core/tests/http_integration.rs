/*
 * http_integration.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration tests for the raw HTTP/1.1 backend and the transport on top of
 * it, against a scripted server on a local TcpListener.
 *
 * Run with:
 *   cargo test -p magnet_core --test http_integration -- --nocapture
 */

use std::sync::Arc;

use serde_json::{json, Map};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use magnet_core::cookie::MemoryCookieStore;
use magnet_core::formatter::{FormattedRequest, RequestBody};
use magnet_core::transport::raw::RawHttpBackend;
use magnet_core::transport::{
    BackendError, ExchangeOptions, HttpBackend, HttpRequest, Method, ResponseBody, Transport, TransportError,
};
use magnet_core::{ClientConfig, MagnetClient, Payload};

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read one request: head plus Content-Length bytes of body.
async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = socket.read(&mut tmp).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                break;
            }
        }
    }
    buf
}

/// Serve exactly one scripted response; the task yields the raw request.
async fn serve_once(response: Vec<u8>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        socket.write_all(&response).await.unwrap();
        let _ = socket.shutdown().await;
        String::from_utf8_lossy(&request).into_owned()
    });
    (format!("http://{}", addr), task)
}

fn get(url: String) -> HttpRequest {
    HttpRequest {
        method: Method::Get,
        url,
        headers: vec![("Accept".into(), "application/json".into())],
        body: None,
    }
}

#[tokio::test]
async fn raw_backend_reads_content_length_body() {
    let (base, server) = serve_once(
        b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\n\r\n{\"a\":true}\n".to_vec(),
    )
    .await;
    let response = RawHttpBackend::new().execute(get(format!("{}/rest/x?q=1", base))).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], b"{\"a\":true}\n");
    assert!(response
        .headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("content-type") && v == "application/json"));

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /rest/x?q=1 HTTP/1.1\r\n"));
    assert!(request.contains("\r\nAccept: application/json\r\n"));
    assert!(request.contains("\r\nConnection: close\r\n"));
}

#[tokio::test]
async fn raw_backend_reads_chunked_body() {
    let (base, server) = serve_once(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n".to_vec(),
    )
    .await;
    let response = RawHttpBackend::new().execute(get(format!("{}/", base))).await.unwrap();
    assert_eq!(&response.body[..], b"hello world");
    server.await.unwrap();
}

#[tokio::test]
async fn raw_backend_reads_until_close_and_sends_body() {
    let (base, server) = serve_once(b"HTTP/1.1 201 Created\r\n\r\nstored".to_vec()).await;
    let request = HttpRequest {
        method: Method::Post,
        url: format!("{}/things", base),
        headers: vec![("Content-Type".into(), "text/plain".into())],
        body: Some(bytes::Bytes::from_static(b"payload")),
    };
    let response = RawHttpBackend::new().execute(request).await.unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(&response.body[..], b"stored");

    let raw = server.await.unwrap();
    assert!(raw.contains("\r\nContent-Length: 7\r\n"));
    assert!(raw.ends_with("\r\n\r\npayload"));
}

#[tokio::test]
async fn raw_backend_reports_refused_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = RawHttpBackend::new()
        .execute(get(format!("http://{}/", addr)))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Connect(_)));
}

#[tokio::test]
async fn transport_parses_error_bodies_and_fills_details() {
    let (base, server) = serve_once(
        b"HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: 25\r\n\r\n{\"result\":{\"err\":\"gone\"}}"
            .to_vec(),
    )
    .await;
    let transport = Transport::with_backends(&base, None, Some(Arc::new(RawHttpBackend::new())));
    let mut fields = Map::new();
    fields.insert("name".into(), json!("a b"));
    let request = FormattedRequest {
        method: Method::Post,
        path: "/rest/things".into(),
        query: vec![("k".into(), "v w".into())],
        headers: Vec::new(),
        body: RequestBody::Fields(fields),
        content_type: Some("application/x-www-form-urlencoded".into()),
    };
    let options = ExchangeOptions {
        unwrap_result: true,
        ..Default::default()
    };
    let failure = transport.request(&request, options).await.unwrap_err();
    assert_eq!(failure.details.status, 404);
    assert_eq!(failure.details.content_type, "application/json");
    assert_eq!(failure.details.url, format!("{}/rest/things?k=v%20w", base));
    assert_eq!(
        failure.error,
        TransportError::Status(ResponseBody::Json(json!({"err": "gone"})))
    );

    let raw = server.await.unwrap();
    assert!(raw.contains("\r\nContent-Type: application/x-www-form-urlencoded\r\n"));
    assert!(raw.ends_with("name=a%20b"));
}

#[tokio::test]
async fn client_uploads_multipart_through_raw_backend() {
    let (base, server) = serve_once(
        b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 27\r\n\r\n{\"result\":{\"ids\":[\"f-1\"]}}\n"
            .to_vec(),
    )
    .await;
    let transport = Arc::new(Transport::with_backends(&base, None, Some(Arc::new(RawHttpBackend::new()))));
    let client = MagnetClient::with_transport(
        ClientConfig::new(&base).with_client("cid", "secret"),
        Arc::new(MemoryCookieStore::new()),
        transport,
    )
    .unwrap();

    let handle = client
        .upload(
            vec![("image/png".into(), vec![0x89, b'P', b'N', b'G'])],
            Payload::object().with("album", "holiday"),
        )
        .unwrap();
    let outcome = handle.await.unwrap();
    assert_eq!(
        outcome.value.to_json(),
        json!({"ids": ["f-1"]})
    );

    let raw = server.await.unwrap();
    assert!(raw.starts_with("POST /rest/com.magnet.server/file/save/multiple HTTP/1.1\r\n"));
    assert!(raw.contains("Content-Type: multipart/related; boundary=BOUNDARY+"));
    assert!(raw.contains("Content-Transfer-Encoding: base64\r\n"));
    assert!(raw.contains("Content-Id: DATA_1\r\n"));
    assert!(raw.contains("iVBORw=="));
    assert!(raw.contains("\"album\":\"holiday\""));
    assert!(raw.contains("X-Magnet-auth_client_id: cid\r\n"));
}
