/*
 * connection.rs
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

//! HTTP/1.1 connection over TCP or TLS: writes one request, drives the push
//! parser, and forwards events to a `ResponseHandler`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream as TokioTlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use super::handler::{Response, ResponseHandler};
use super::parser::{H1ResponseHandler, ParseState, ResponseParser};
use crate::net::http_client_config;
use crate::transport::Method;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Plain TCP or TLS stream.
pub enum HttpStream {
    Plain(TcpStream),
    Tls(Box<TokioTlsStream<TcpStream>>),
}

impl AsyncRead for HttpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for HttpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_flush(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            HttpStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Request line, headers and optional body.
pub struct RequestBuilder {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RequestBuilder {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add or replace a header (case-insensitive name match).
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn body(&mut self, data: Vec<u8>) -> &mut Self {
        self.body = Some(data);
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// Bridges parser callbacks to the status/header state and the user's handler.
struct H1Driver<'a> {
    status: &'a mut Option<(u16, Option<String>)>,
    headers: &'a mut Vec<(String, String)>,
    handler: &'a mut (dyn ResponseHandler + Send),
}

impl H1ResponseHandler for H1Driver<'_> {
    fn status(&mut self, code: u16, reason: Option<&str>) {
        *self.status = Some((code, reason.map(|s| s.to_string())));
    }

    fn header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn body_chunk(&mut self, data: &[u8]) {
        self.handler.body_chunk(data);
    }

    fn trailer(&mut self, name: &str, value: &str) {
        self.handler.header(name, value);
    }

    fn end_body(&mut self) {
        self.handler.end_body();
    }
}

/// One connection; `send` issues a single request and reads its response.
pub struct HttpConnection {
    stream: HttpStream,
    host: String,
    port: u16,
    secure: bool,
    read_buf: BytesMut,
}

impl HttpConnection {
    pub fn new(stream: HttpStream, host: String, port: u16, secure: bool) -> Self {
        Self {
            stream,
            host,
            port,
            secure,
            read_buf: BytesMut::with_capacity(8192),
        }
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, path)
    }

    /// Send the request and drive the handler until the response is complete.
    /// I/O and protocol errors are reported both to `handler.failed` and as `Err`.
    pub async fn send(
        &mut self,
        request: RequestBuilder,
        mut handler: impl ResponseHandler + Send,
    ) -> io::Result<()> {
        let result = self.exchange(&request, &mut handler).await;
        if let Err(ref e) = result {
            handler.failed(e);
        }
        result
    }

    async fn exchange(
        &mut self,
        request: &RequestBuilder,
        handler: &mut (dyn ResponseHandler + Send),
    ) -> io::Result<()> {
        self.write_request(request).await?;

        let head_only = request.method == Method::Head;
        let mut parser = ResponseParser::new();
        let mut status: Option<(u16, Option<String>)> = None;
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut tmp = [0u8; 8192];

        loop {
            let n = self.stream.read(&mut tmp).await?;
            let mut driver = H1Driver {
                status: &mut status,
                headers: &mut headers,
                handler: &mut *handler,
            };
            if n == 0 {
                parser.finish_eof(&mut driver)?;
                break;
            }
            self.read_buf.extend_from_slice(&tmp[..n]);
            parser.receive(&mut self.read_buf, &mut driver)?;

            if parser.state() == ParseState::HeadersComplete {
                let (code, reason) = status.take().unwrap_or((0, None));
                let content_length = headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.trim().parse::<u64>().ok());
                let chunked = headers.iter().any(|(k, v)| {
                    k.eq_ignore_ascii_case("transfer-encoding") && v.to_ascii_lowercase().contains("chunked")
                });

                let response = match reason {
                    Some(r) => Response::with_reason(code, r),
                    None => Response::new(code),
                };
                if response.is_success() {
                    handler.ok(response);
                } else {
                    handler.error(response);
                }
                for (name, value) in &headers {
                    handler.header(name, value);
                }
                let bodiless = head_only || code == 204 || code == 304;
                if parser.set_body_mode(content_length, chunked, bodiless) {
                    handler.start_body();
                }
                let mut driver = H1Driver {
                    status: &mut status,
                    headers: &mut headers,
                    handler: &mut *handler,
                };
                parser.receive(&mut self.read_buf, &mut driver)?;
            }

            if parser.state() == ParseState::Done {
                break;
            }
        }
        handler.complete();
        Ok(())
    }

    async fn write_request(&mut self, request: &RequestBuilder) -> io::Result<()> {
        let host_header = if (self.secure && self.port != 443) || (!self.secure && self.port != 80) {
            format!("{}:{}", self.host, self.port)
        } else {
            self.host.clone()
        };
        let mut req = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\n",
            request.method.as_str(),
            request.path,
            host_header
        );
        for (k, v) in &request.headers {
            req.push_str(k);
            req.push_str(": ");
            req.push_str(v);
            req.push_str("\r\n");
        }
        if let Some(body) = &request.body {
            if !request.has_header("Content-Length") {
                req.push_str(&format!("Content-Length: {}\r\n", body.len()));
            }
        } else if request.method.carries_body() {
            req.push_str("Content-Length: 0\r\n");
        }
        req.push_str("Connection: close\r\n\r\n");
        self.stream.write_all(req.as_bytes()).await?;
        if let Some(body) = &request.body {
            self.stream.write_all(body).await?;
        }
        self.stream.flush().await
    }
}

/// Create connections with `HttpClient::connect(host, port, use_tls)`.
pub struct HttpClient;

impl HttpClient {
    /// Connect, with a TLS handshake when `use_tls` (ALPN http/1.1).
    pub async fn connect(host: &str, port: u16, use_tls: bool) -> io::Result<HttpConnection> {
        let addr = format!("{}:{}", host, port);
        let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TCP connect timed out"))??;

        if !use_tls {
            return Ok(HttpConnection::new(HttpStream::Plain(tcp), host.to_string(), port, false));
        }
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"))?;
        let connector = TlsConnector::from(http_client_config());
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))?;
        Ok(HttpConnection::new(
            HttpStream::Tls(Box::new(tls)),
            host.to_string(),
            port,
            true,
        ))
    }
}
