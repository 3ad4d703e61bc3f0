//! Pattern-gated interception of arbitrary outbound HTTP calls.
//!
//! An [`ApiInterceptor`] is plugged into a client in place of its normal
//! transport. Requests whose URL matches one of the configured patterns are
//! re-sent to the proxy's invoke-target endpoint; everything else goes to the
//! inner transport untouched. Dropping the interceptor (or handing the client
//! its plain transport again) restores direct calls.

use std::fmt;

use agentguard_primitives::GovernanceConfig;
use async_trait::async_trait;
use hyper::body::to_bytes;
use hyper::{Body, Request, Response, Uri};
use regex::Regex;
use tracing::debug;

use crate::api::{INVOKE_API_PATH, ProxyApiRequest, flatten_headers, payload_to_json};
use crate::traits::{HttpTransport, HyperTransport, TransportError, TransportResult};

/// Set of URL patterns selecting which requests are intercepted.
///
/// An empty set intercepts everything.
#[derive(Debug, Clone, Default)]
pub struct InterceptPatterns {
    patterns: Vec<Regex>,
}

impl InterceptPatterns {
    /// Compiles the supplied regular expressions.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] naming the first pattern that
    /// fails to compile.
    pub fn new<I, S>(patterns: I) -> TransportResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(pattern).map_err(|err| {
                    TransportError::configuration(format!(
                        "invalid intercept pattern `{pattern}`: {err}"
                    ))
                })
            })
            .collect::<TransportResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Matches every URL.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Returns `true` when `url` should be intercepted.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|pattern| pattern.is_match(url))
    }

    /// Returns the number of configured patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Returns `true` when no patterns are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Transport that diverts matching requests to the proxy's invoke-target endpoint.
pub struct ApiInterceptor<T = HyperTransport> {
    inner: T,
    endpoint: Uri,
    api_key: String,
    patterns: InterceptPatterns,
}

impl<T> fmt::Debug for ApiInterceptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiInterceptor")
            .field("endpoint", &self.endpoint)
            .field("patterns", &self.patterns.len())
            .finish_non_exhaustive()
    }
}

impl ApiInterceptor<HyperTransport> {
    /// Creates an interceptor over a real HTTPS transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if the proxy endpoint is invalid.
    pub fn over_hyper(
        config: &GovernanceConfig,
        patterns: InterceptPatterns,
    ) -> TransportResult<Self> {
        Self::new(
            config,
            patterns,
            HyperTransport::new(config.request_timeout()),
        )
    }
}

impl<T> ApiInterceptor<T>
where
    T: HttpTransport,
{
    /// Wraps `inner` so matching requests are routed through the proxy.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if the proxy endpoint is invalid.
    pub fn new(
        config: &GovernanceConfig,
        patterns: InterceptPatterns,
        inner: T,
    ) -> TransportResult<Self> {
        let endpoint = config
            .endpoint(INVOKE_API_PATH)
            .parse::<Uri>()
            .map_err(|err| {
                TransportError::configuration(format!("invalid proxy endpoint: {err}"))
            })?;
        Ok(Self {
            inner,
            endpoint,
            api_key: config.api_key().to_owned(),
            patterns,
        })
    }

    /// Returns `true` when a request to `url` would be intercepted.
    #[must_use]
    pub fn should_intercept(&self, url: &str) -> bool {
        self.patterns.matches(url)
    }

    /// Consumes the interceptor, returning the wrapped transport.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T> HttpTransport for ApiInterceptor<T>
where
    T: HttpTransport,
{
    async fn send(&self, request: Request<Body>) -> TransportResult<Response<Body>> {
        let url = request.uri().to_string();
        if !self.should_intercept(&url) {
            return self.inner.send(request).await;
        }

        let (parts, body) = request.into_parts();
        let raw = to_bytes(body)
            .await
            .map_err(|err| TransportError::invalid_request(format!("failed to read body: {err}")))?;

        let mut proxy = ProxyApiRequest::new(self.api_key.clone(), &parts.method, &url);
        proxy.headers = flatten_headers(&parts.headers);
        proxy.body = payload_to_json(&raw);

        debug!(target_url = %url, method = %proxy.method, "intercepted API call");
        self.inner.send(proxy.into_http(&self.endpoint)?).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hyper::StatusCode;
    use hyper::header::CONTENT_TYPE;
    use serde_json::json;

    use super::*;
    use crate::mock::MockTransport;

    fn interceptor(
        mock: &Arc<MockTransport>,
        patterns: &[&str],
    ) -> ApiInterceptor<Arc<MockTransport>> {
        let config = GovernanceConfig::new("http://guard.local", "ag_test").unwrap();
        ApiInterceptor::new(
            &config,
            InterceptPatterns::new(patterns.iter().copied()).unwrap(),
            Arc::clone(mock),
        )
        .unwrap()
    }

    #[test]
    fn pattern_gating() {
        let patterns = InterceptPatterns::new([r"https://api\.example\.com/.*"]).unwrap();
        assert!(patterns.matches("https://api.example.com/x"));
        assert!(!patterns.matches("https://other.com/y"));
    }

    #[test]
    fn empty_pattern_set_matches_everything() {
        let patterns = InterceptPatterns::all();
        assert!(patterns.is_empty());
        assert!(patterns.matches("https://anything.test/"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = InterceptPatterns::new(["(unclosed"]).expect_err("bad regex");
        assert!(matches!(err, TransportError::Configuration { .. }));
    }

    #[tokio::test]
    async fn matching_request_is_sent_to_proxy() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(StatusCode::OK, &json!({"code": 200, "data": {"status": "SUCCESS"}}));

        let request = Request::post("https://api.example.com/orders")
            .header(CONTENT_TYPE, "application/json")
            .header("x-tenant", "acme")
            .body(Body::from(r#"{"sku":"A1","qty":2}"#))
            .unwrap();
        let response = interceptor(&mock, &[r"https://api\.example\.com/.*"])
            .send(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = mock.last_request().unwrap();
        assert_eq!(seen.uri.to_string(), "http://guard.local/proxy/v1/api");
        assert_eq!(seen.method, hyper::Method::POST);
        let body = seen.json().unwrap();
        assert_eq!(
            body,
            json!({
                "apiKey": "ag_test",
                "targetUrl": "https://api.example.com/orders",
                "method": "POST",
                "headers": {"content-type": "application/json", "x-tenant": "acme"},
                "body": {"sku": "A1", "qty": 2}
            })
        );
    }

    #[tokio::test]
    async fn raw_text_body_is_kept_as_string() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(StatusCode::OK, &json!({"code": 200}));

        let request = Request::put("https://api.example.com/notes/1")
            .body(Body::from("plain text note"))
            .unwrap();
        interceptor(&mock, &[]).send(request).await.unwrap();

        let body = mock.last_request().unwrap().json().unwrap();
        assert_eq!(body["method"], json!("PUT"));
        assert_eq!(body["body"], json!("plain text note"));
    }

    #[tokio::test]
    async fn non_matching_request_is_forwarded_untouched() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(StatusCode::OK, &json!({"direct": true}));

        let request = Request::get("https://other.com/y")
            .header("x-trace", "1")
            .body(Body::from("ping"))
            .unwrap();
        interceptor(&mock, &[r"https://api\.example\.com/.*"])
            .send(request)
            .await
            .unwrap();

        let seen = mock.last_request().unwrap();
        assert_eq!(seen.uri.to_string(), "https://other.com/y");
        assert_eq!(seen.method, hyper::Method::GET);
        assert_eq!(seen.header("x-trace"), Some("1"));
        assert_eq!(seen.body.as_ref(), b"ping");
    }

    #[tokio::test]
    async fn uninstalling_restores_direct_calls() {
        let mock = Arc::new(MockTransport::new());
        mock.push_json(StatusCode::OK, &json!({}));

        let transport = interceptor(&mock, &[]).into_inner();
        let request = Request::get("https://api.example.com/x")
            .body(Body::empty())
            .unwrap();
        transport.send(request).await.unwrap();

        assert_eq!(
            mock.last_request().unwrap().uri.to_string(),
            "https://api.example.com/x"
        );
    }
}
