//! Wire envelope for requests and responses.
//!
//! Every message on a peer link is one JSON object. Bodies travel as base64
//! strings so arbitrary bytes survive the encoding.

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::{P2pError, PeerId, Result};

/// Schema tag carried by every message this crate understands.
pub const PROTOCOL_TAG: &str = "JSON-HTTP-1";

/// Header map. Insertion order is irrelevant.
pub type Headers = HashMap<String, String>;

/// Boxed error for handlers and body streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A request or response as sent over a peer link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Schema tag, [`PROTOCOL_TAG`] for this version.
    #[serde(default)]
    pub protocol_tag: String,
    /// True for requests; absent or false marks a response.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_request: bool,
    /// Sender identity.
    pub src_identity: PeerId,
    /// Recipient identity.
    pub dst_identity: PeerId,
    /// Correlation id shared by a request and its response.
    pub request_id: String,
    /// Target url.
    pub url: String,
    /// Request method.
    pub method: String,
    /// Headers.
    #[serde(default)]
    pub headers: Headers,
    /// Complete body, if any.
    #[serde(default, with = "base64_body", skip_serializing_if = "Option::is_none")]
    pub body: Option<Bytes>,
    /// Response status code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Response status text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
}

impl Message {
    /// Encodes the message as JSON.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decodes a message from JSON.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Returns true if the message uses the schema this crate speaks.
    pub fn is_supported(&self) -> bool {
        self.protocol_tag == PROTOCOL_TAG
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
        match body {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Bytes>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map(Bytes::from))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

/// A request or response body.
///
/// Streaming bodies are drained completely before they are sent; the wire
/// format carries one complete body per message.
pub enum Body {
    /// A complete body.
    Full(Bytes),
    /// A body produced lazily.
    Stream(BoxStream<'static, std::result::Result<Bytes, BoxError>>),
}

impl Body {
    /// Wraps a stream of byte chunks.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Stream(stream.map_err(Into::<BoxError>::into).boxed())
    }

    /// Reads the whole body.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::Body`] if the stream yields an error.
    pub async fn collect(self) -> Result<Bytes> {
        match self {
            Self::Full(bytes) => Ok(bytes),
            Self::Stream(mut stream) => {
                let mut out = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| P2pError::Body(e.to_string()))?;
                    out.extend_from_slice(&chunk);
                }
                Ok(out.freeze())
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Full(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::Full(Bytes::from(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::Full(Bytes::from_static(s.as_bytes()))
    }
}

/// An outgoing request.
#[derive(Debug)]
pub struct Request {
    /// Target url; its host selects the peer.
    pub url: String,
    /// Request method.
    pub method: String,
    /// Headers.
    pub headers: Headers,
    /// Optional body.
    pub body: Option<Body>,
}

impl Request {
    /// Creates a request with no headers or body.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Creates a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Creates a `POST` request with a body.
    pub fn post(url: impl Into<String>, body: impl Into<Body>) -> Self {
        Self::new("POST", url).with_body(body)
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// A response delivered to the caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Url echoed or substituted by the responder.
    pub url: String,
    /// Method echoed or substituted by the responder.
    pub method: String,
    /// Status code.
    pub status: u16,
    /// Status text.
    pub status_text: String,
    /// Body, if any.
    pub body: Option<Bytes>,
    /// Headers.
    pub headers: Headers,
}

impl Response {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body, or an empty buffer when absent.
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone().unwrap_or_default()
    }
}

impl From<Message> for Response {
    fn from(message: Message) -> Self {
        Self {
            url: message.url,
            method: message.method,
            status: message.status.unwrap_or(200),
            status_text: message.status_text.unwrap_or_default(),
            body: message.body,
            headers: message.headers,
        }
    }
}
