//! Request description and the transport seam.
//!
//! A [`Request`] names one call against the wolweb API relative to the base
//! URL. A [`Transport`] performs it. [`crate::client::HttpTransport`] is the
//! real implementation; [`crate::mock::MockTransport`] scripts responses for
//! tests.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;

use wolweb_types::DeviceAddress;
use wolweb_types::wire::{self, ErrorBody, WakeRequest};

use crate::error::{Error, Result};

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// One call against the API.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the base URL, starting with `/`.
    pub path: String,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
}

impl Request {
    /// A body-less GET.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    /// A POST with a JSON body.
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    /// `GET /api/macs`.
    pub fn list_devices() -> Self {
        Self::get(wire::DEVICES_PATH)
    }

    /// `POST /api/wol` for an address.
    pub fn wake(address: &DeviceAddress, broadcast_addr: Option<&str>) -> Self {
        let body = WakeRequest {
            mac_addr: address.clone(),
            broadcast_addr: broadcast_addr.map(str::to_string),
        };
        // A struct of strings always serializes.
        let body = serde_json::to_value(body).unwrap_or(serde_json::Value::Null);
        Self::post(wire::WAKE_PATH, body)
    }

    /// `GET /api/ping/{address}`.
    pub fn ping(address: &DeviceAddress) -> Self {
        Self::get(wire::ping_path(address))
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Raw response as returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response body, possibly empty.
    pub body: Bytes,
}

impl Response {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The `error` field of a JSON body, when there is one.
    pub fn error_message(&self) -> Option<String> {
        serde_json::from_slice::<ErrorBody>(&self.body)
            .ok()
            .and_then(|body| body.error)
            .filter(|message| !message.trim().is_empty())
    }
}

/// Payload of a successful call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload(Bytes);

impl Payload {
    /// Wrap a body.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self(body.into())
    }

    /// Raw bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.0).map_err(Error::invalid_response)
    }
}

/// Performs requests.
///
/// Implementations must issue exactly one outbound call per `execute` and
/// report connection-level failures as [`Error::Transport`]. Non-2xx
/// responses are not errors at this layer; they come back as a
/// [`Response`] for the result channel to classify.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request.
    async fn execute(&self, request: &Request) -> Result<Response>;
}
