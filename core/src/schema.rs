/*
 * schema.rs
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

//! Request metadata: the per-method contract for how each attribute is placed on
//! the wire and how the response is decoded.

use std::collections::HashMap;

use crate::transport::Method;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";
pub const CONTENT_TYPE_MULTIPART: &str = "multipart/related";

/// Wire placement rule for one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// `{name}` placeholder in the path.
    Template,
    Query,
    /// Body field for mutation methods, query parameter otherwise.
    Plain,
    Header,
    /// `;name=value` path segment.
    Matrix,
    /// Like `Plain`; the method normally declares a form content type.
    Form,
}

impl Style {
    pub fn parse(s: &str) -> Option<Style> {
        match s.to_ascii_uppercase().as_str() {
            "TEMPLATE" => Some(Style::Template),
            "QUERY" => Some(Style::Query),
            "PLAIN" => Some(Style::Plain),
            "HEADER" => Some(Style::Header),
            "MATRIX" => Some(Style::Matrix),
            "FORM" => Some(Style::Form),
            _ => None,
        }
    }
}

/// Declared type of an attribute or model field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    /// `byte[]`: base64 on the wire.
    ByteArray,
    /// `_data` / `binary` / file: multipart part, or the literal request body.
    Binary,
    Model(String),
    Array(Box<ParamType>),
    Any,
}

impl ParamType {
    /// Parse the type names used in controller descriptions:
    /// `string`, `integer`, `date`, `byte[]`, `_data`, `array<User>`, `User[]`, ...
    /// Anything capitalised and unknown is taken to be a model name.
    pub fn parse(s: &str) -> ParamType {
        let s = s.trim();
        if let Some(inner) = s.strip_suffix("[]") {
            if inner.eq_ignore_ascii_case("byte") {
                return ParamType::ByteArray;
            }
            return ParamType::Array(Box::new(ParamType::parse(inner)));
        }
        if let Some(inner) = s
            .strip_prefix("array<")
            .or_else(|| s.strip_prefix("Array<"))
            .and_then(|r| r.strip_suffix('>'))
        {
            return ParamType::Array(Box::new(ParamType::parse(inner)));
        }
        match s.to_ascii_lowercase().as_str() {
            "string" | "char" => ParamType::String,
            "integer" | "int" | "long" | "short" => ParamType::Integer,
            "number" | "float" | "double" => ParamType::Number,
            "boolean" | "bool" => ParamType::Boolean,
            "date" => ParamType::Date,
            "bytearray" => ParamType::ByteArray,
            "_data" | "binary" | "file" => ParamType::Binary,
            "object" | "any" | "" => ParamType::Any,
            _ if s.starts_with(|c: char| c.is_ascii_uppercase()) => ParamType::Model(s.to_string()),
            _ => ParamType::Any,
        }
    }
}

/// Declared response type; drives the response decoding table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnType {
    Void,
    /// JSON/text passed through unchanged.
    Plain,
    Date,
    ByteArray,
    Binary,
    Model(String),
    Array(Box<ReturnType>),
    /// Body is a multipart/related message; the envelope is returned.
    Multipart,
}

/// `Accept` negotiation from the declared data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    #[default]
    Json,
    Xml,
    Text,
    Html,
    Any,
}

impl DataType {
    pub fn accept(&self) -> &'static str {
        match self {
            DataType::Json => "application/json",
            DataType::Xml => "application/xml",
            DataType::Text => "text/plain",
            DataType::Html => "text/html",
            DataType::Any => "*/*",
        }
    }

    pub fn parse(s: &str) -> DataType {
        match s.to_ascii_lowercase().as_str() {
            "xml" => DataType::Xml,
            "text" => DataType::Text,
            "html" => DataType::Html,
            "*" => DataType::Any,
            _ => DataType::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSchema {
    pub name: String,
    pub ty: ParamType,
    pub style: Style,
}

/// Describes one controller method.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    pub path: String,
    pub method: Method,
    pub params: Vec<ParamSchema>,
    pub content_type: String,
    pub produces: Vec<String>,
    pub consumes: Vec<String>,
    pub return_type: ReturnType,
    pub data_type: DataType,
    /// Skip the API root prefix.
    pub base_path_only: bool,
    /// Replace a JSON object body by its `result` member when present.
    pub unwrap_result: bool,
    /// Treat the response as an opaque byte string with its mime type.
    pub binary_response: bool,
}

impl RequestMetadata {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            params: Vec::new(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            produces: Vec::new(),
            consumes: Vec::new(),
            return_type: ReturnType::Plain,
            data_type: DataType::Json,
            base_path_only: false,
            unwrap_result: false,
            binary_response: false,
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: ParamType, style: Style) -> Self {
        self.params.push(ParamSchema {
            name: name.into(),
            ty,
            style,
        });
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn produces(mut self, mime: impl Into<String>) -> Self {
        self.produces.push(mime.into());
        self
    }

    pub fn consumes(mut self, mime: impl Into<String>) -> Self {
        self.consumes.push(mime.into());
        self
    }

    pub fn returns(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn base_path_only(mut self) -> Self {
        self.base_path_only = true;
        self
    }

    pub fn unwrap_result(mut self) -> Self {
        self.unwrap_result = true;
        self
    }

    pub fn binary_response(mut self) -> Self {
        self.binary_response = true;
        self
    }

    pub fn schema_for(&self, name: &str) -> Option<&ParamSchema> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Whether requests for this method are sent as multipart/related.
    pub fn is_multipart(&self) -> bool {
        self.consumes
            .iter()
            .chain(std::iter::once(&self.content_type))
            .any(|c| c.to_ascii_lowercase().starts_with(CONTENT_TYPE_MULTIPART))
    }
}

/// Field schema of one model type.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSchema {
    pub name: String,
    pub fields: Vec<(String, ParamType)>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.fields.push((name.into(), ty));
        self
    }

    pub fn field_type(&self, name: &str) -> Option<&ParamType> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

/// Known model schemas, by type name.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelSchema>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: ModelSchema) {
        self.models.insert(schema.name.clone(), schema);
    }

    pub fn with(mut self, schema: ModelSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ModelSchema> {
        self.models.get(name)
    }
}
