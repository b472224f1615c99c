/*
 * parser.rs
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

//! HTTP/1.1 response push parser: status line, headers, body (Content-Length,
//! chunked, or read until close).

use bytes::Buf;
use bytes::BytesMut;
use std::io;

/// Parser events. The connection implements this and forwards to its `ResponseHandler`.
pub trait H1ResponseHandler {
    fn status(&mut self, code: u16, reason: Option<&str>);
    fn header(&mut self, name: &str, value: &str);
    fn body_chunk(&mut self, data: &[u8]);
    fn trailer(&mut self, name: &str, value: &str);
    fn end_body(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    StatusLine,
    /// Headers of an interim 1xx response, discarded.
    InterimHeaders,
    Headers,
    /// Headers done; the connection must call `set_body_mode`.
    HeadersComplete,
    Body,
    /// Body delimited by connection close.
    BodyUntilClose,
    ChunkSize,
    ChunkData,
    ChunkTrailer,
    Done,
}

/// Push parser for one response. Feed bytes with `receive`.
pub struct ResponseParser {
    state: ParseState,
    content_length: u64,
    bytes_received: u64,
    chunk_remaining: u64,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StatusLine,
            content_length: 0,
            bytes_received: 0,
            chunk_remaining: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    fn find_crlf(buf: &[u8]) -> Option<usize> {
        buf.windows(2).position(|w| w == b"\r\n")
    }

    fn take_line(buf: &mut BytesMut, what: &str) -> Result<Option<String>, io::Error> {
        let line_end = match Self::find_crlf(buf) {
            Some(n) => n,
            None => return Ok(None),
        };
        let line = buf.split_to(line_end + 2);
        let text = std::str::from_utf8(&line[..line_end])
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("invalid {} UTF-8", what)))?;
        Ok(Some(text.to_string()))
    }

    fn split_header(line: &str) -> Option<(&str, &str)> {
        let colon = line.find(':')?;
        Some((line[..colon].trim(), line[colon + 1..].trim()))
    }

    /// Consume as much of `buf` as possible. Partial tokens stay in `buf`.
    pub fn receive<H: H1ResponseHandler>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> Result<(), io::Error> {
        while !buf.is_empty() {
            match self.state {
                ParseState::StatusLine => {
                    let line = match Self::take_line(buf, "status line")? {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    // HTTP/1.1 200 OK, or HTTP/1.1 200
                    let mut parts = line.splitn(3, ' ');
                    let version = parts.next().unwrap_or("");
                    if !version.starts_with("HTTP/") {
                        return Err(io::Error::new(io::ErrorKind::InvalidData, "not an HTTP response"));
                    }
                    let code = parts
                        .next()
                        .and_then(|s| s.parse::<u16>().ok())
                        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid status code"))?;
                    if (100..200).contains(&code) {
                        self.state = ParseState::InterimHeaders;
                        continue;
                    }
                    handler.status(code, parts.next());
                    self.state = ParseState::Headers;
                }
                ParseState::InterimHeaders => {
                    match Self::take_line(buf, "header")? {
                        Some(l) if l.is_empty() => self.state = ParseState::StatusLine,
                        Some(_) => {}
                        None => return Ok(()),
                    }
                }
                ParseState::Headers => {
                    if buf.starts_with(b"\r\n") {
                        buf.advance(2);
                        self.state = ParseState::HeadersComplete;
                        return Ok(());
                    }
                    let line = match Self::take_line(buf, "header")? {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    if let Some((name, value)) = Self::split_header(&line) {
                        handler.header(name, value);
                    }
                }
                ParseState::HeadersComplete | ParseState::Done => return Ok(()),
                ParseState::Body => {
                    let remaining = (self.content_length - self.bytes_received) as usize;
                    let to_read = remaining.min(buf.len());
                    if to_read > 0 {
                        let chunk = buf.split_to(to_read);
                        handler.body_chunk(&chunk);
                        self.bytes_received += to_read as u64;
                    }
                    if self.bytes_received >= self.content_length {
                        handler.end_body();
                        self.state = ParseState::Done;
                    }
                }
                ParseState::BodyUntilClose => {
                    let chunk = buf.split_to(buf.len());
                    handler.body_chunk(&chunk);
                }
                ParseState::ChunkSize => {
                    let line = match Self::take_line(buf, "chunk size")? {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    let hex_part = line.split(';').next().unwrap_or("").trim();
                    self.chunk_remaining = u64::from_str_radix(hex_part, 16)
                        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid chunk size"))?;
                    self.state = if self.chunk_remaining == 0 {
                        ParseState::ChunkTrailer
                    } else {
                        ParseState::ChunkData
                    };
                }
                ParseState::ChunkData => {
                    let to_read = (self.chunk_remaining as usize).min(buf.len());
                    if to_read > 0 {
                        let chunk = buf.split_to(to_read);
                        handler.body_chunk(&chunk);
                        self.chunk_remaining -= to_read as u64;
                    }
                    if self.chunk_remaining > 0 || buf.len() < 2 {
                        return Ok(());
                    }
                    buf.advance(2);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::ChunkTrailer => {
                    let line = match Self::take_line(buf, "trailer")? {
                        Some(l) => l,
                        None => return Ok(()),
                    };
                    if line.is_empty() {
                        handler.end_body();
                        self.state = ParseState::Done;
                    } else if let Some((name, value)) = Self::split_header(&line) {
                        handler.trailer(name, value);
                    }
                }
            }
        }
        Ok(())
    }

    /// Choose body framing after headers. Returns whether a body follows.
    pub fn set_body_mode(&mut self, content_length: Option<u64>, chunked: bool, bodiless: bool) -> bool {
        if self.state != ParseState::HeadersComplete {
            return false;
        }
        if bodiless {
            self.state = ParseState::Done;
            return false;
        }
        if chunked {
            self.state = ParseState::ChunkSize;
            return true;
        }
        match content_length {
            Some(0) => {
                self.state = ParseState::Done;
                false
            }
            Some(cl) => {
                self.content_length = cl;
                self.bytes_received = 0;
                self.state = ParseState::Body;
                true
            }
            None => {
                self.state = ParseState::BodyUntilClose;
                true
            }
        }
    }

    /// Connection reached EOF. Ends a close-delimited body; anything else is truncation.
    pub fn finish_eof<H: H1ResponseHandler>(&mut self, handler: &mut H) -> Result<(), io::Error> {
        match self.state {
            ParseState::BodyUntilClose => {
                handler.end_body();
                self.state = ParseState::Done;
                Ok(())
            }
            ParseState::Done => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "HTTP connection closed",
            )),
        }
    }
}
