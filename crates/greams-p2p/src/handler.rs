//! Inbound request handling.

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use crate::message::{Body, BoxError, Headers, Message, PROTOCOL_TAG};
use crate::PeerId;

/// A request received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    /// Identity of the requesting peer.
    pub src: PeerId,
    /// Target url.
    pub url: String,
    /// Request method.
    pub method: String,
    /// Headers.
    pub headers: Headers,
    /// Complete body, if any.
    pub body: Option<Bytes>,
}

impl From<&Message> for InboundRequest {
    fn from(message: &Message) -> Self {
        Self {
            src: message.src_identity.clone(),
            url: message.url.clone(),
            method: message.method.clone(),
            headers: message.headers.clone(),
            body: message.body.clone(),
        }
    }
}

/// A handler's answer. Omitted fields are filled from the request (url,
/// method) or with defaults (status 200, empty headers and status text, no
/// body).
#[derive(Debug, Default)]
pub struct HandlerResponse {
    /// Replacement url.
    pub url: Option<String>,
    /// Replacement method.
    pub method: Option<String>,
    /// Status code.
    pub status: Option<u16>,
    /// Status text.
    pub status_text: Option<String>,
    /// Headers.
    pub headers: Option<Headers>,
    /// Body; streaming bodies are collected before sending.
    pub body: Option<Body>,
}

impl HandlerResponse {
    /// A 200 response with `body`.
    pub fn ok(body: impl Into<Body>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::default()
        }
    }

    /// A response with the given status and no body.
    pub fn status(status: u16, status_text: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            status_text: Some(status_text.into()),
            ..Self::default()
        }
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }
}

/// Answers requests arriving on any peer link of a session.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Produces the response for `request`.
    ///
    /// An error is turned into a `500 Internal Server Error` response.
    async fn handle(&self, request: InboundRequest) -> Result<HandlerResponse, BoxError>;
}

/// Handler backed by an async closure.
pub struct HandlerFn<F>(F);

/// Wraps an async closure as a [`RequestHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(InboundRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerResponse, BoxError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> RequestHandler for HandlerFn<F>
where
    F: Fn(InboundRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerResponse, BoxError>> + Send + 'static,
{
    async fn handle(&self, request: InboundRequest) -> Result<HandlerResponse, BoxError> {
        (self.0)(request).await
    }
}

/// Runs `handler` on `request` and builds the response message.
///
/// A handler that fails or panics is answered with a 500.
pub(crate) async fn respond(handler: &dyn RequestHandler, request: &Message) -> Message {
    let outcome = AssertUnwindSafe(run_handler(handler, request))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panic_message(panic.as_ref()).into()));

    match outcome {
        Ok((response, body)) => Message {
            protocol_tag: PROTOCOL_TAG.to_string(),
            is_request: false,
            src_identity: request.dst_identity.clone(),
            dst_identity: request.src_identity.clone(),
            request_id: request.request_id.clone(),
            url: response.url.unwrap_or_else(|| request.url.clone()),
            method: response.method.unwrap_or_else(|| request.method.clone()),
            headers: response.headers.unwrap_or_default(),
            body,
            status: Some(response.status.unwrap_or(200)),
            status_text: Some(response.status_text.unwrap_or_default()),
        },
        Err(e) => {
            tracing::warn!(
                request_id = %request.request_id,
                url = %request.url,
                error = %e,
                "Request handler failed"
            );
            Message {
                protocol_tag: PROTOCOL_TAG.to_string(),
                is_request: false,
                src_identity: request.dst_identity.clone(),
                dst_identity: request.src_identity.clone(),
                request_id: request.request_id.clone(),
                url: request.url.clone(),
                method: request.method.clone(),
                headers: Headers::new(),
                body: Some(Bytes::from(e.to_string())),
                status: Some(500),
                status_text: Some("Internal Server Error".to_string()),
            }
        }
    }
}

async fn run_handler(
    handler: &dyn RequestHandler,
    request: &Message,
) -> Result<(HandlerResponse, Option<Bytes>), BoxError> {
    let mut response = handler.handle(InboundRequest::from(request)).await?;
    let body = match response.body.take() {
        Some(body) => Some(body.collect().await?),
        None => None,
    };
    Ok((response, body))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause");
    format!("request handler panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Message {
        Message {
            protocol_tag: PROTOCOL_TAG.to_string(),
            is_request: true,
            src_identity: PeerId::parse("alice").unwrap(),
            dst_identity: PeerId::parse("bob").unwrap(),
            request_id: "r7".to_string(),
            url: "http://bob.webrtcpeer/ping".to_string(),
            method: "GET".to_string(),
            headers: Headers::new(),
            body: None,
            status: None,
            status_text: None,
        }
    }

    #[tokio::test]
    async fn defaults_are_filled_from_request() {
        let handler = handler_fn(|_req| async { Ok::<_, BoxError>(HandlerResponse::ok("pong")) });
        let response = respond(&handler, &request()).await;

        assert!(!response.is_request);
        assert_eq!(response.request_id, "r7");
        assert_eq!(response.src_identity.as_str(), "bob");
        assert_eq!(response.dst_identity.as_str(), "alice");
        assert_eq!(response.url, "http://bob.webrtcpeer/ping");
        assert_eq!(response.method, "GET");
        assert_eq!(response.status, Some(200));
        assert_eq!(response.status_text.as_deref(), Some(""));
        assert_eq!(response.body, Some(Bytes::from_static(b"pong")));
    }

    #[tokio::test]
    async fn handler_values_override() {
        let handler = handler_fn(|_req| async {
            Ok::<_, BoxError>(HandlerResponse {
                url: Some("http://bob.webrtcpeer/moved".into()),
                method: Some("HEAD".into()),
                ..HandlerResponse::status(404, "Not Found").with_header("x-a", "1")
            })
        });
        let response = respond(&handler, &request()).await;
        assert_eq!(response.url, "http://bob.webrtcpeer/moved");
        assert_eq!(response.method, "HEAD");
        assert_eq!(response.status, Some(404));
        assert_eq!(response.headers.get("x-a").map(String::as_str), Some("1"));
        assert!(response.body.is_none());
    }

    #[tokio::test]
    async fn handler_error_becomes_500() {
        let handler = handler_fn(|_req| async { Err::<HandlerResponse, BoxError>("boom".into()) });
        let response = respond(&handler, &request()).await;
        assert_eq!(response.status, Some(500));
        assert_eq!(response.body, Some(Bytes::from_static(b"boom")));
        assert_eq!(response.request_id, "r7");
    }

    #[tokio::test]
    async fn failing_body_stream_becomes_500() {
        let handler = handler_fn(|_req| async {
            let chunks = vec![Err::<Bytes, _>(std::io::Error::other("pack failed"))];
            Ok::<_, BoxError>(HandlerResponse::ok(Body::from_stream(futures::stream::iter(chunks))))
        });
        let response = respond(&handler, &request()).await;
        assert_eq!(response.status, Some(500));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_500() {
        let handler = handler_fn(|req: InboundRequest| async move {
            if req.method == "GET" {
                panic!("handler bug");
            }
            Ok::<_, BoxError>(HandlerResponse::ok("unreachable"))
        });
        let response = respond(&handler, &request()).await;
        assert_eq!(response.status, Some(500));
        assert_eq!(response.status_text.as_deref(), Some("Internal Server Error"));
        assert_eq!(
            response.body,
            Some(Bytes::from_static(b"request handler panicked: handler bug"))
        );
        assert_eq!(response.request_id, "r7");
    }
}
