//! In-memory transport for tests.
//!
//! [`MockTransport`] records every request it receives (with the body fully
//! read) and answers with responses queued ahead of time, in FIFO order.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::body::to_bytes;
use hyper::header::{CONTENT_TYPE, HeaderMap};
use hyper::{Body, Method, Request, Response, StatusCode, Uri};
use serde_json::Value;

use crate::traits::{HttpTransport, TransportError, TransportResult};

/// Request captured by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// Request URI after any rewriting.
    pub uri: Uri,
    /// Request headers after any rewriting.
    pub headers: HeaderMap,
    /// Fully buffered request body.
    pub body: Bytes,
}

impl RecordedRequest {
    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the body is not valid JSON.
    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.body)
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

enum Reply {
    Response(Response<Body>),
    Error(String),
}

/// Transport double that replays queued responses.
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queued = self.replies.lock().expect("mock replies poisoned").len();
        let seen = self.requests.lock().expect("mock requests poisoned").len();
        f.debug_struct("MockTransport")
            .field("queued", &queued)
            .field("seen", &seen)
            .finish()
    }
}

impl MockTransport {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a prebuilt response.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock has been poisoned.
    pub fn push_response(&self, response: Response<Body>) -> &Self {
        self.replies
            .lock()
            .expect("mock replies poisoned")
            .push_back(Reply::Response(response));
        self
    }

    /// Queues a JSON response with the given status.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock has been poisoned.
    pub fn push_json(&self, status: StatusCode, body: &Value) -> &Self {
        let mut response = Response::new(Body::from(body.to_string()));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("application/json"),
        );
        self.push_response(response)
    }

    /// Queues a transport failure.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock has been poisoned.
    pub fn push_error(&self, reason: impl Into<String>) -> &Self {
        self.replies
            .lock()
            .expect("mock replies poisoned")
            .push_back(Reply::Error(reason.into()));
        self
    }

    /// Returns a snapshot of the requests received so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock has been poisoned.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("mock requests poisoned").clone()
    }

    /// Returns the most recent request, if any.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock has been poisoned.
    #[must_use]
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests
            .lock()
            .expect("mock requests poisoned")
            .last()
            .cloned()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: Request<Body>) -> TransportResult<Response<Body>> {
        let (parts, body) = request.into_parts();
        let body = to_bytes(body)
            .await
            .map_err(|err| TransportError::transport(format!("failed to read body: {err}")))?;
        self.requests
            .lock()
            .expect("mock requests poisoned")
            .push(RecordedRequest {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
            });

        let reply = self
            .replies
            .lock()
            .expect("mock replies poisoned")
            .pop_front();
        match reply {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::Error(reason)) => Err(TransportError::transport(reason)),
            None => Err(TransportError::transport("no mock response queued")),
        }
    }
}
