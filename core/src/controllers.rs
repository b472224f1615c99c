/*
 * controllers.rs
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

//! Controller catalogue: request metadata for the platform's REST surface and
//! the schemas of the models it returns.

use std::collections::HashMap;
use std::sync::Arc;

use crate::schema::{
    ModelRegistry, ModelSchema, ParamType, RequestMetadata, ReturnType, Style, CONTENT_TYPE_FORM,
    CONTENT_TYPE_MULTIPART,
};
use crate::transport::Method;

pub const APPLICATION: &str = "ApplicationController";
pub const USER: &str = "UserController";
pub const DEVICE: &str = "DeviceController";
pub const CHANNEL: &str = "ChannelController";
pub const ATTACHMENT: &str = "AttachmentController";

const SERVER: &str = "/com.magnet.server";

fn model(name: &str) -> ParamType {
    ParamType::Model(name.to_string())
}

fn array_of(ty: ParamType) -> ParamType {
    ParamType::Array(Box::new(ty))
}

fn returns_model(name: &str) -> ReturnType {
    ReturnType::Model(name.to_string())
}

fn returns_models(name: &str) -> ReturnType {
    ReturnType::Array(Box::new(returns_model(name)))
}

/// Schemas of the platform's models.
pub fn models() -> ModelRegistry {
    ModelRegistry::new()
        .with(
            ModelSchema::new("User")
                .field("userIdentifier", ParamType::String)
                .field("userName", ParamType::String)
                .field("firstName", ParamType::String)
                .field("lastName", ParamType::String)
                .field("email", ParamType::String)
                .field("userRealm", ParamType::String)
                .field("tags", array_of(ParamType::String))
                .field("created", ParamType::Date)
                .field("updated", ParamType::Date),
        )
        .with(
            ModelSchema::new("Device")
                .field("deviceId", ParamType::String)
                .field("label", ParamType::String)
                .field("os", ParamType::String)
                .field("osVersion", ParamType::String)
                .field("deviceStatus", ParamType::String)
                .field("pushAuthority", ParamType::String)
                .field("deviceToken", ParamType::ByteArray)
                .field("tags", array_of(ParamType::String))
                .field("created", ParamType::Date),
        )
        .with(
            ModelSchema::new("Channel")
                .field("name", ParamType::String)
                .field("summary", ParamType::String)
                .field("publishPermission", ParamType::String)
                .field("isPublic", ParamType::Boolean)
                .field("owner", model("User"))
                .field("creationDate", ParamType::Date)
                .field("lastTimeActive", ParamType::Date),
        )
        .with(
            ModelSchema::new("ChannelItem")
                .field("itemId", ParamType::String)
                .field("channelName", ParamType::String)
                .field("publisher", model("User"))
                .field("publishedDate", ParamType::Date)
                .field("content", ParamType::Any),
        )
}

// ── Methods ──────────────────────────────────────────────────────────

/// Client-credential grant for an application token.
pub fn app_session() -> RequestMetadata {
    RequestMetadata::new(Method::Post, format!("{}/applications/session", SERVER))
        .param("grant_type", ParamType::String, Style::Form)
        .param("client_id", ParamType::String, Style::Form)
        .param("client_secret", ParamType::String, Style::Form)
        .param("scope", ParamType::String, Style::Form)
        .content_type(CONTENT_TYPE_FORM)
}

pub fn login() -> RequestMetadata {
    RequestMetadata::new(Method::Post, format!("{}/user/session", SERVER))
        .param("grant_type", ParamType::String, Style::Form)
        .param("username", ParamType::String, Style::Form)
        .param("password", ParamType::String, Style::Form)
        .param("client_id", ParamType::String, Style::Form)
        .param("scope", ParamType::String, Style::Form)
        .param("remember_me", ParamType::Boolean, Style::Form)
        .content_type(CONTENT_TYPE_FORM)
}

pub fn logout() -> RequestMetadata {
    RequestMetadata::new(Method::Delete, format!("{}/user/session", SERVER)).returns(ReturnType::Void)
}

pub fn register_user() -> RequestMetadata {
    RequestMetadata::new(Method::Post, format!("{}/user/enrollment", SERVER))
        .param("userName", ParamType::String, Style::Plain)
        .param("password", ParamType::String, Style::Plain)
        .param("firstName", ParamType::String, Style::Plain)
        .param("lastName", ParamType::String, Style::Plain)
        .param("email", ParamType::String, Style::Plain)
        .param("clientId", ParamType::String, Style::Plain)
        .param("userRealm", ParamType::String, Style::Plain)
        .param("tags", array_of(ParamType::String), Style::Plain)
        .returns(returns_model("User"))
}

pub fn current_user() -> RequestMetadata {
    RequestMetadata::new(Method::Get, format!("{}/userinfo", SERVER)).returns(returns_model("User"))
}

pub fn search_users() -> RequestMetadata {
    RequestMetadata::new(Method::Get, format!("{}/user/query", SERVER))
        .param("q", ParamType::String, Style::Query)
        .param("take", ParamType::Integer, Style::Query)
        .param("skip", ParamType::Integer, Style::Query)
        .param("sort", ParamType::String, Style::Query)
        .returns(returns_models("User"))
}

/// Refresh-token grant for a new user access token.
pub fn renew_token() -> RequestMetadata {
    RequestMetadata::new(Method::Post, format!("{}/user/newtoken", SERVER))
        .param("grant_type", ParamType::String, Style::Form)
        .param("refresh_token", ParamType::String, Style::Form)
        .param("client_id", ParamType::String, Style::Form)
        .param("device_id", ParamType::String, Style::Form)
        .content_type(CONTENT_TYPE_FORM)
}

pub fn register_device() -> RequestMetadata {
    RequestMetadata::new(Method::Post, format!("{}/devices", SERVER))
        .param("deviceId", ParamType::String, Style::Plain)
        .param("label", ParamType::String, Style::Plain)
        .param("os", ParamType::String, Style::Plain)
        .param("osVersion", ParamType::String, Style::Plain)
        .param("deviceStatus", ParamType::String, Style::Plain)
        .param("pushAuthority", ParamType::String, Style::Plain)
        .param("deviceToken", ParamType::ByteArray, Style::Plain)
        .param("tags", array_of(ParamType::String), Style::Plain)
        .returns(returns_model("Device"))
}

pub fn create_channel() -> RequestMetadata {
    RequestMetadata::new(Method::Post, format!("{}/channel/create", SERVER))
        .param("channelName", ParamType::String, Style::Plain)
        .param("summary", ParamType::String, Style::Plain)
        .param("publishPermission", ParamType::String, Style::Plain)
        .param("isPublic", ParamType::Boolean, Style::Plain)
        .param("subscribers", array_of(ParamType::String), Style::Plain)
        .returns(returns_model("Channel"))
}

pub fn list_channels() -> RequestMetadata {
    RequestMetadata::new(Method::Get, format!("{}/channel/query", SERVER))
        .param("channelName", ParamType::String, Style::Query)
        .param("limit", ParamType::Integer, Style::Query)
        .param("offset", ParamType::Integer, Style::Query)
        .returns(returns_models("Channel"))
}

pub fn fetch_items() -> RequestMetadata {
    RequestMetadata::new(Method::Get, format!("{}/channel/{{channelName}}/items", SERVER))
        .param("channelName", ParamType::String, Style::Template)
        .param("since", ParamType::Date, Style::Query)
        .param("limit", ParamType::Integer, Style::Query)
        .returns(returns_models("ChannelItem"))
}

pub fn publish() -> RequestMetadata {
    RequestMetadata::new(Method::Post, format!("{}/channel/{{channelName}}/publish", SERVER))
        .param("channelName", ParamType::String, Style::Template)
        .param("content", ParamType::Any, Style::Plain)
        .param("attachment", ParamType::Binary, Style::Plain)
        .consumes(CONTENT_TYPE_MULTIPART)
        .returns(returns_model("ChannelItem"))
}

/// Files plus metadata as one multipart/related message.
pub fn upload() -> RequestMetadata {
    RequestMetadata::new(Method::Post, format!("{}/file/save/multiple", SERVER))
        .param("file", ParamType::Binary, Style::Plain)
        .param("files", array_of(ParamType::Binary), Style::Plain)
        .param("metadata", ParamType::Any, Style::Plain)
        .consumes(CONTENT_TYPE_MULTIPART)
        .unwrap_result()
}

/// One file as the literal request body.
pub fn upload_raw() -> RequestMetadata {
    RequestMetadata::new(Method::Put, format!("{}/file/save/{{name}}", SERVER))
        .param("name", ParamType::String, Style::Template)
        .param("file", ParamType::Binary, Style::Plain)
}

pub fn download() -> RequestMetadata {
    RequestMetadata::new(Method::Get, format!("{}/file/download/{{fileId}}", SERVER))
        .param("fileId", ParamType::String, Style::Template)
        .returns(ReturnType::Binary)
        .binary_response()
}

// ── Catalogue ────────────────────────────────────────────────────────

/// Lookup of request metadata by `(controller, method)`.
#[derive(Debug, Clone)]
pub struct Catalogue {
    methods: HashMap<(String, String), Arc<RequestMetadata>>,
    models: Arc<ModelRegistry>,
}

impl Catalogue {
    pub fn empty() -> Self {
        Self {
            methods: HashMap::new(),
            models: Arc::new(ModelRegistry::new()),
        }
    }

    pub fn standard() -> Self {
        let mut c = Self {
            methods: HashMap::new(),
            models: Arc::new(models()),
        };
        c.register(APPLICATION, "session", app_session());
        c.register(USER, "login", login());
        c.register(USER, "logout", logout());
        c.register(USER, "register", register_user());
        c.register(USER, "getCurrentUser", current_user());
        c.register(USER, "search", search_users());
        c.register(USER, "renewToken", renew_token());
        c.register(DEVICE, "register", register_device());
        c.register(CHANNEL, "create", create_channel());
        c.register(CHANNEL, "list", list_channels());
        c.register(CHANNEL, "fetchItems", fetch_items());
        c.register(CHANNEL, "publish", publish());
        c.register(ATTACHMENT, "upload", upload());
        c.register(ATTACHMENT, "uploadRaw", upload_raw());
        c.register(ATTACHMENT, "download", download());
        c
    }

    pub fn register(&mut self, controller: &str, method: &str, metadata: RequestMetadata) {
        self.methods
            .insert((controller.to_string(), method.to_string()), Arc::new(metadata));
    }

    pub fn lookup(&self, controller: &str, method: &str) -> Option<Arc<RequestMetadata>> {
        self.methods
            .get(&(controller.to_string(), method.to_string()))
            .cloned()
    }

    pub fn models(&self) -> Arc<ModelRegistry> {
        self.models.clone()
    }
}
