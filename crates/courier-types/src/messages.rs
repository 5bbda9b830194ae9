//! Message catalogue understood by the courier server.
//!
//! | Type | Direction | Payload |
//! |------|-----------|---------|
//! | `http.request` | client → server | [`HttpRequestMessage`] |
//! | `http.response` | server → client | [`HttpResponseMessage`] |
//! | `render.template.request` | client → server | [`RenderTemplateRequestMessage`] |
//! | `render.template.response` | server → client | [`RenderTemplateResponseMessage`] |
//! | `error` | server → client | [`ErrorMessage`] |

use crate::envelope::ERROR_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A payload with a fixed wire `type`.
pub trait Message: Serialize + DeserializeOwned {
    /// Value of the envelope's `type` field.
    const TYPE: &'static str;
}

/// A payload the server answers with a correlated reply.
pub trait RequestMessage: Message {
    /// Payload of a successful reply.
    type Response: Message;
}

/// Every kind in the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    HttpRequest,
    HttpResponse,
    RenderTemplateRequest,
    RenderTemplateResponse,
    Error,
}

impl MessageType {
    /// All known kinds, requests first.
    pub const ALL: [MessageType; 5] = [
        MessageType::HttpRequest,
        MessageType::RenderTemplateRequest,
        MessageType::HttpResponse,
        MessageType::RenderTemplateResponse,
        MessageType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpRequest => HttpRequestMessage::TYPE,
            Self::HttpResponse => HttpResponseMessage::TYPE,
            Self::RenderTemplateRequest => RenderTemplateRequestMessage::TYPE,
            Self::RenderTemplateResponse => RenderTemplateResponseMessage::TYPE,
            Self::Error => ErrorMessage::TYPE,
        }
    }

    /// Look up a wire `type`; unknown kinds are `None`.
    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == kind)
    }

    /// Kind of the reply this kind expects, if it is a request.
    pub fn response_type(&self) -> Option<Self> {
        match self {
            Self::HttpRequest => Some(Self::HttpResponse),
            Self::RenderTemplateRequest => Some(Self::RenderTemplateResponse),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ask the server to perform an HTTP request.
///
/// `url` is a template; `variables` are substituted into it server-side.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestMessage {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
}

impl HttpRequestMessage {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables
            .get_or_insert_with(Map::new)
            .insert(name.into(), value);
        self
    }
}

impl Message for HttpRequestMessage {
    const TYPE: &'static str = "http.request";
}

impl RequestMessage for HttpRequestMessage {
    type Response = HttpResponseMessage;
}

/// Result of an [`HttpRequestMessage`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub status: u16,
}

impl HttpResponseMessage {
    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl Message for HttpResponseMessage {
    const TYPE: &'static str = "http.response";
}

/// Ask the server to render a template.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTemplateRequestMessage {
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
}

impl RenderTemplateRequestMessage {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            variables: None,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables
            .get_or_insert_with(Map::new)
            .insert(name.into(), value);
        self
    }
}

impl Message for RenderTemplateRequestMessage {
    const TYPE: &'static str = "render.template.request";
}

impl RequestMessage for RenderTemplateRequestMessage {
    type Response = RenderTemplateResponseMessage;
}

/// Rendered template text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RenderTemplateResponseMessage {
    pub render: String,
}

impl Message for RenderTemplateResponseMessage {
    const TYPE: &'static str = "render.template.response";
}

/// Payload of a failure reply.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

impl ErrorMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Message for ErrorMessage {
    const TYPE: &'static str = ERROR_TYPE;
}
