//! Transport that routes LLM client calls through the governance proxy.
//!
//! Callers keep issuing provider-shaped requests and receive provider-shaped
//! responses; the proxy envelope is added and removed here.

use std::fmt;
use std::time::Duration;

use agentguard_primitives::{GovernanceConfig, Unwrapped};
use async_trait::async_trait;
use bytes::Bytes;
use hyper::body::to_bytes;
use hyper::header::{
    AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST, HeaderMap, HeaderValue, TRANSFER_ENCODING,
};
use hyper::{Body, Request, Response, Uri};
use serde_json::Value;
use tracing::debug;

use crate::traits::{HttpTransport, HyperTransport, TransportError, TransportResult};

/// Path of the governed chat-completions endpoint.
pub const CHAT_COMPLETIONS_PATH: &str = "/proxy/v1/chat/completions";
/// Header carrying the URL the caller originally targeted.
pub const ORIGINAL_URL_HEADER: &str = "x-original-url";

const EVENT_STREAM: &str = "text/event-stream";

/// Returns the OpenAI-compatible base URL exposed by the proxy.
#[must_use]
pub fn proxy_base_url(config: &GovernanceConfig) -> String {
    config.endpoint("/proxy/v1")
}

/// Transport that rewrites LLM requests to the governance proxy and unwraps
/// its envelope on the way back.
pub struct GovernedTransport<T = HyperTransport> {
    inner: T,
    endpoint: Uri,
    bearer: HeaderValue,
    timeout_secs: u64,
}

impl<T> fmt::Debug for GovernedTransport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernedTransport")
            .field("endpoint", &self.endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl GovernedTransport<HyperTransport> {
    /// Builds a governed transport over a real HTTPS client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if the proxy endpoint or API
    /// key cannot be represented in an HTTP request.
    pub fn for_llm_client(config: &GovernanceConfig) -> TransportResult<Self> {
        Self::new(config, HyperTransport::new(config.request_timeout()))
    }
}

impl<T> GovernedTransport<T>
where
    T: HttpTransport,
{
    /// Wraps `inner` so every request it sends is governed.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if the proxy endpoint or API
    /// key cannot be represented in an HTTP request.
    pub fn new(config: &GovernanceConfig, inner: T) -> TransportResult<Self> {
        let endpoint = config
            .endpoint(CHAT_COMPLETIONS_PATH)
            .parse::<Uri>()
            .map_err(|err| {
                TransportError::configuration(format!("invalid proxy endpoint: {err}"))
            })?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key()))
            .map_err(|err| TransportError::configuration(format!("invalid api key: {err}")))?;

        Ok(Self {
            inner,
            endpoint,
            bearer,
            timeout_secs: proxy_timeout_secs(config.request_timeout()),
        })
    }

    /// Returns the proxy endpoint every request is redirected to.
    #[must_use]
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    /// Returns the wrapped transport.
    #[must_use]
    pub fn inner(&self) -> &T {
        &self.inner
    }

    async fn rewrite(&self, request: Request<Body>) -> TransportResult<Request<Body>> {
        let (mut parts, body) = request.into_parts();
        let original = parts.uri.to_string();

        let body = to_bytes(body)
            .await
            .map_err(|err| TransportError::invalid_request(format!("failed to read body: {err}")))?;

        parts.uri = self.endpoint.clone();
        parts.headers.remove(HOST);
        if !parts.headers.contains_key(AUTHORIZATION) {
            parts.headers.insert(AUTHORIZATION, self.bearer.clone());
        }
        let original_header = HeaderValue::from_str(&original).map_err(|err| {
            TransportError::invalid_request(format!("original url is not a valid header: {err}"))
        })?;
        parts.headers.insert(ORIGINAL_URL_HEADER, original_header);

        let body = if body.is_empty() {
            body
        } else {
            let body = inject_timeout(body, self.timeout_secs)?;
            set_content_length(&mut parts.headers, body.len());
            body
        };

        debug!(
            target_url = %original,
            proxy = %self.endpoint,
            "routing LLM request through governance proxy"
        );
        Ok(Request::from_parts(parts, Body::from(body)))
    }
}

#[async_trait]
impl<T> HttpTransport for GovernedTransport<T>
where
    T: HttpTransport,
{
    async fn send(&self, request: Request<Body>) -> TransportResult<Response<Body>> {
        let request = self.rewrite(request).await?;
        let response = self.inner.send(request).await?;

        if is_event_stream(response.headers()) {
            return Ok(response);
        }

        let (mut parts, body) = response.into_parts();
        let bytes = to_bytes(body)
            .await
            .map_err(|err| TransportError::transport(format!("failed to read response: {err}")))?;

        match Unwrapped::from_body(&bytes) {
            Unwrapped::Envelope(inner) => {
                let unwrapped = serde_json::to_vec(&inner).map_err(|err| {
                    TransportError::response(format!("failed to encode unwrapped response: {err}"))
                })?;
                set_content_length(&mut parts.headers, unwrapped.len());
                Ok(Response::from_parts(parts, Body::from(unwrapped)))
            }
            Unwrapped::Passthrough => Ok(Response::from_parts(parts, Body::from(bytes))),
        }
    }
}

/// The proxy takes whole seconds; partial seconds round up and zero never goes out.
fn proxy_timeout_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs();
    let rounded = if timeout.subsec_nanos() > 0 { secs.saturating_add(1) } else { secs };
    rounded.max(1)
}

fn inject_timeout(body: Bytes, timeout_secs: u64) -> TransportResult<Bytes> {
    let Ok(Value::Object(mut payload)) = serde_json::from_slice::<Value>(&body) else {
        return Ok(body);
    };
    payload.insert("timeout".to_owned(), Value::from(timeout_secs));
    serde_json::to_vec(&payload)
        .map(Bytes::from)
        .map_err(|err| TransportError::invalid_request(format!("failed to encode body: {err}")))
}

fn set_content_length(headers: &mut HeaderMap, len: usize) {
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(EVENT_STREAM))
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::stream;
    use hyper::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::mock::MockTransport;

    fn config() -> GovernanceConfig {
        GovernanceConfig::new("http://guard.local:8080/", "ag_test")
            .unwrap()
            .with_request_timeout(Duration::from_secs(90))
    }

    fn governed(mock: &Arc<MockTransport>) -> GovernedTransport<Arc<MockTransport>> {
        GovernedTransport::new(&config(), Arc::clone(mock)).unwrap()
    }

    fn chat_request(body: &Value) -> Request<Body> {
        Request::post("https://api.openai.com/v1/chat/completions")
            .header(CONTENT_TYPE, "application/json")
            .header(HOST, "api.openai.com")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn rewrites_destination_and_injects_timeout() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(StatusCode::OK, &json!({"id": "chatcmpl-1"}));

        let body = json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]});
        governed(&mock).send(chat_request(&body)).await.unwrap();

        let seen = mock.last_request().unwrap();
        assert_eq!(seen.uri.to_string(), "http://guard.local:8080/proxy/v1/chat/completions");
        assert_eq!(seen.header("authorization"), Some("Bearer ag_test"));
        assert_eq!(
            seen.header(ORIGINAL_URL_HEADER),
            Some("https://api.openai.com/v1/chat/completions")
        );
        assert!(seen.header("host").is_none());

        let forwarded = seen.json().unwrap();
        assert_eq!(forwarded["timeout"], json!(90));
        assert_eq!(forwarded["model"], json!("gpt-4"));
        let declared: usize = seen.header("content-length").unwrap().parse().unwrap();
        assert_eq!(declared, seen.body.len());
    }

    #[tokio::test]
    async fn keeps_existing_authorization() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(StatusCode::OK, &json!({}));

        let request = Request::post("https://api.openai.com/v1/chat/completions")
            .header(AUTHORIZATION, "Bearer caller-key")
            .body(Body::from("{}"))
            .unwrap();
        governed(&mock).send(request).await.unwrap();

        let seen = mock.last_request().unwrap();
        assert_eq!(seen.header("authorization"), Some("Bearer caller-key"));
    }

    #[tokio::test]
    async fn empty_body_is_not_mutated() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(StatusCode::OK, &json!({"object": "list"}));

        let request = Request::get("https://api.openai.com/v1/models")
            .body(Body::empty())
            .unwrap();
        governed(&mock).send(request).await.unwrap();

        let seen = mock.last_request().unwrap();
        assert!(seen.body.is_empty());
        assert_eq!(seen.uri.path(), CHAT_COMPLETIONS_PATH);
        assert_eq!(seen.header("authorization"), Some("Bearer ag_test"));
    }

    #[tokio::test]
    async fn non_json_body_is_forwarded_verbatim() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(StatusCode::OK, &json!({}));

        let request = Request::post("https://api.openai.com/v1/audio")
            .body(Body::from("raw-bytes"))
            .unwrap();
        governed(&mock).send(request).await.unwrap();

        assert_eq!(mock.last_request().unwrap().body.as_ref(), b"raw-bytes");
    }

    #[tokio::test]
    async fn unwraps_envelope_preserving_status_and_headers() {
        let mock = Arc::new(MockTransport::new());
        let mut response = Response::new(Body::from(
            r#"{"code":200,"data":{"response":{"id":"x"}}}"#,
        ));
        *response.status_mut() = StatusCode::CREATED;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
            .headers_mut()
            .insert("x-request-id", HeaderValue::from_static("req-7"));
        mock.push_response(response);

        let response = governed(&mock)
            .send(chat_request(&json!({"model": "gpt-4"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-request-id"], "req-7");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        let body = to_bytes(response.into_body()).await.unwrap();
        assert_eq!(body.as_ref(), br#"{"id":"x"}"#);
    }

    #[tokio::test]
    async fn unrecognised_body_passes_through_unchanged() {
        let mock = Arc::new(MockTransport::new());
        let mut response = Response::new(Body::from("<html>bad gateway</html>"));
        *response.status_mut() = StatusCode::BAD_GATEWAY;
        mock.push_response(response);

        let response = governed(&mock)
            .send(chat_request(&json!({"model": "gpt-4"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = to_bytes(response.into_body()).await.unwrap();
        assert_eq!(body.as_ref(), b"<html>bad gateway</html>");
    }

    #[tokio::test]
    async fn event_stream_is_returned_untouched() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"code\":200,\"data\":{\"response\":1}}\n\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];
        let mut response = Response::new(Body::wrap_stream(stream::iter(chunks)));
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream; charset=utf-8"),
        );
        let mock = Arc::new(MockTransport::new());
        mock.push_response(response);

        let response = governed(&mock)
            .send(chat_request(&json!({"model": "gpt-4", "stream": true})))
            .await
            .unwrap();

        assert!(response.headers().get(CONTENT_LENGTH).is_none());
        let body = to_bytes(response.into_body()).await.unwrap();
        assert_eq!(
            body.as_ref(),
            b"data: {\"code\":200,\"data\":{\"response\":1}}\n\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn transport_failures_propagate() {
        let mock = Arc::new(MockTransport::new());
        mock.push_error("connection refused");

        let err = governed(&mock)
            .send(chat_request(&json!({"model": "gpt-4"})))
            .await
            .expect_err("transport failure");
        assert!(matches!(err, TransportError::Transport { .. }));
    }

    #[tokio::test]
    async fn sub_second_timeout_rounds_up() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(StatusCode::OK, &json!({"id": "chatcmpl-1"}));
        let config = config().with_request_timeout(Duration::from_millis(500));
        let transport = GovernedTransport::new(&config, Arc::clone(&mock)).unwrap();

        transport.send(chat_request(&json!({"model": "gpt-4"}))).await.unwrap();
        assert_eq!(mock.last_request().unwrap().json().unwrap()["timeout"], json!(1));
    }

    #[test]
    fn proxy_timeout_is_whole_seconds() {
        assert_eq!(proxy_timeout_secs(Duration::ZERO), 1);
        assert_eq!(proxy_timeout_secs(Duration::from_millis(1500)), 2);
        assert_eq!(proxy_timeout_secs(Duration::from_secs(30)), 30);
    }

    #[test]
    fn proxy_base_url_targets_v1() {
        assert_eq!(proxy_base_url(&config()), "http://guard.local:8080/proxy/v1");
    }
}
