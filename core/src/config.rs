/*
 * config.rs
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

//! Client configuration, read from XML with the quick_xml reader:
//!
//! ```xml
//! <magnet>
//!   <endpoint>https://api.example.com</endpoint>
//!   <apiRoot>/rest</apiRoot>
//!   <clientId>...</clientId>
//!   <clientSecret>...</clientSecret>
//!   <parseXml>true</parseXml>
//!   <device>
//!     <id>device-1</id>
//!     <userAgent>MyApp/1.0 (iOS)</userAgent>
//!   </device>
//! </magnet>
//! ```
//!
//! A `<device>` block means the client runs inside a native shell.

use std::fs;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::ClientError;
use crate::formatter::DEFAULT_API_ROOT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Scheme, host and optional port; no trailing slash.
    pub endpoint: String,
    pub api_root: String,
    pub client_id: String,
    pub client_secret: String,
    /// Parse XML parts of multipart responses into element trees.
    pub parse_xml: bool,
    pub device: Option<DeviceIdentity>,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_root: DEFAULT_API_ROOT.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            parse_xml: false,
            device: None,
        }
    }

    pub fn with_client(mut self, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self.client_secret = client_secret.into();
        self
    }

    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into();
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.device = Some(DeviceIdentity {
            device_id: device_id.into(),
            user_agent: user_agent.into(),
        });
        self
    }

    pub fn with_parse_xml(mut self, parse_xml: bool) -> Self {
        self.parse_xml = parse_xml;
        self
    }

    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let content = fs::read_to_string(path)?;
        Self::from_xml(&content)
    }

    pub fn from_xml(content: &str) -> Result<Self, ClientError> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();

        let mut endpoint = None;
        let mut api_root = None;
        let mut client_id = String::new();
        let mut client_secret = String::new();
        let mut parse_xml = false;
        let mut device_id = None;
        let mut user_agent = None;
        let mut in_device = false;
        let mut element = Vec::<u8>::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Err(e) => return Err(ClientError::Config(format!("XML parse error: {}", e))),
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) => {
                    let name = e.name();
                    if name.as_ref() == b"device" {
                        in_device = true;
                    }
                    element.clear();
                    element.extend_from_slice(name.as_ref());
                }
                Ok(Event::Empty(e)) => {
                    if e.name().as_ref() == b"device" {
                        device_id.get_or_insert_with(String::new);
                    }
                }
                Ok(Event::Text(e)) => {
                    if element.is_empty() {
                        continue;
                    }
                    let text = e
                        .unescape()
                        .map_err(|e| ClientError::Config(e.to_string()))?
                        .trim()
                        .to_string();
                    match (in_device, element.as_slice()) {
                        (false, b"endpoint") => endpoint = Some(text),
                        (false, b"apiRoot") => api_root = Some(text),
                        (false, b"clientId") => client_id = text,
                        (false, b"clientSecret") => client_secret = text,
                        (false, b"parseXml") => parse_xml = parse_bool(&text)?,
                        (true, b"id") => device_id = Some(text),
                        (true, b"userAgent") => user_agent = Some(text),
                        _ => {}
                    }
                    element.clear();
                }
                Ok(Event::End(e)) => {
                    if e.name().as_ref() == b"device" {
                        in_device = false;
                        device_id.get_or_insert_with(String::new);
                    }
                    element.clear();
                }
                _ => {}
            }
            buf.clear();
        }

        let endpoint = endpoint.ok_or_else(|| ClientError::Config("missing <endpoint>".into()))?;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ClientError::Config(format!("endpoint must be http or https: {}", endpoint)));
        }
        let mut config = ClientConfig::new(endpoint)
            .with_client(client_id, client_secret)
            .with_parse_xml(parse_xml);
        if let Some(root) = api_root {
            config = config.with_api_root(root);
        }
        if let Some(id) = device_id {
            config = config.with_device(id, user_agent.unwrap_or_else(default_user_agent));
        }
        Ok(config)
    }

    pub fn is_native_shell(&self) -> bool {
        self.device.is_some()
    }
}

pub fn default_user_agent() -> String {
    concat!("magnet-sdk/", env!("CARGO_PKG_VERSION")).to_string()
}

fn parse_bool(s: &str) -> Result<bool, ClientError> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" | "" => Ok(false),
        other => Err(ClientError::Config(format!("not a boolean: {}", other))),
    }
}
