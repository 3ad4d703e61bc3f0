//! Business API calls routed through the proxy's invoke-target endpoint.

use std::collections::BTreeMap;
use std::fmt;

use agentguard_primitives::{
    ApprovalId, EnvelopeData, GovernanceConfig, ProxyEnvelope, ProxyStatus,
};
use hyper::body::to_bytes;
use hyper::header::{CONTENT_TYPE, HeaderMap};
use hyper::{Body, Method, Request, Uri};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::traits::{HttpTransport, HyperTransport, TransportError, TransportResult};

/// Path of the proxy endpoint that invokes an arbitrary target URL.
pub const INVOKE_API_PATH: &str = "/proxy/v1/api";

const PENDING_MESSAGE: &str = "This operation requires approval";

/// Body posted to [`INVOKE_API_PATH`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyApiRequest {
    /// Agent API key.
    pub api_key: String,
    /// URL the caller wants to reach.
    pub target_url: String,
    /// Upper-case HTTP method.
    pub method: String,
    /// Caller headers, flattened to strings.
    pub headers: BTreeMap<String, String>,
    /// Caller payload, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ProxyApiRequest {
    /// Builds the proxy request for a call to `target_url`.
    #[must_use]
    pub fn new(api_key: impl Into<String>, method: &Method, target_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            target_url: target_url.into(),
            method: method.as_str().to_ascii_uppercase(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Encodes the request as an HTTP POST to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if encoding fails.
    pub fn into_http(self, endpoint: &Uri) -> TransportResult<Request<Body>> {
        let body = serde_json::to_vec(&self).map_err(|err| {
            TransportError::invalid_request(format!("failed to encode proxy request: {err}"))
        })?;
        Request::post(endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|err| {
                TransportError::invalid_request(format!("failed to build proxy request: {err}"))
            })
    }
}

/// Flattens a header map into the string map the proxy expects.
///
/// Repeated headers are joined with `", "`.
pub(crate) fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        flat.entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    flat
}

/// Interprets a raw payload as JSON, falling back to the text itself.
pub(crate) fn payload_to_json(raw: &[u8]) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(raw)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned())),
    )
}

/// Call description for [`GovernedHttpClient::request`].
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    url: String,
    headers: BTreeMap<String, String>,
    body: Option<Value>,
    query: Vec<(String, String)>,
}

impl ApiRequest {
    /// Starts a request for `method` against `url`.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            query: Vec::new(),
        }
    }

    /// Adds a header forwarded to the target.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets a JSON payload.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a raw payload, parsed as JSON when possible.
    #[must_use]
    pub fn data(mut self, raw: impl AsRef<[u8]>) -> Self {
        self.body = payload_to_json(raw.as_ref());
        self
    }

    /// Appends a query parameter to the target URL.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    fn target_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{query}", self.url)
    }
}

/// Normalised result of a governed business API call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome {
    /// The call ran; holds the upstream response payload.
    Success(Value),
    /// The call is held until a reviewer decides.
    PendingApproval {
        /// Identifier to query or justify, when the server supplied one.
        approval_request_id: Option<ApprovalId>,
        /// Caller-facing explanation.
        message: String,
    },
    /// The proxy succeeded but returned data in no known shape.
    Data(Value),
    /// The proxy reported a failure.
    Failed {
        /// Server message, or `"Unknown error"`.
        error: String,
        /// Envelope code.
        code: i64,
    },
}

impl ApiOutcome {
    /// Interprets a proxy envelope.
    #[must_use]
    pub fn from_envelope(envelope: ProxyEnvelope<Value>) -> Self {
        let data = match envelope.data {
            Some(data) if envelope.code == agentguard_primitives::SUCCESS_CODE => data,
            _ => {
                return Self::Failed {
                    error: envelope.message.unwrap_or_else(|| "Unknown error".to_owned()),
                    code: envelope.code,
                };
            }
        };

        let parsed: EnvelopeData = serde_json::from_value(data.clone()).unwrap_or_default();
        match parsed {
            EnvelopeData {
                status: Some(ProxyStatus::PendingApproval),
                approval_request_id,
                ..
            } => Self::PendingApproval {
                approval_request_id: approval_request_id.and_then(|id| ApprovalId::new(id).ok()),
                message: PENDING_MESSAGE.to_owned(),
            },
            EnvelopeData {
                status: Some(ProxyStatus::Success),
                response: Some(response),
                ..
            } => Self::Success(response),
            _ => Self::Data(data),
        }
    }

    /// Returns `true` when the call is waiting for approval.
    #[must_use]
    pub fn is_pending_approval(&self) -> bool {
        matches!(self, Self::PendingApproval { .. })
    }

    /// Renders the caller-facing JSON shape.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Success(value) | Self::Data(value) => value.clone(),
            Self::PendingApproval {
                approval_request_id,
                message,
            } => json!({
                "status": "PENDING_APPROVAL",
                "approvalRequestId": approval_request_id.as_ref().map(ApprovalId::as_str),
                "message": message,
            }),
            Self::Failed { error, code } => json!({ "error": error, "code": code }),
        }
    }
}

/// HTTP client whose every call goes through the proxy's invoke-target endpoint.
pub struct GovernedHttpClient<T = HyperTransport> {
    transport: T,
    endpoint: Uri,
    api_key: String,
}

impl<T> fmt::Debug for GovernedHttpClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernedHttpClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl GovernedHttpClient<HyperTransport> {
    /// Creates a client over a real HTTPS transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if the proxy endpoint is invalid.
    pub fn new(config: &GovernanceConfig) -> TransportResult<Self> {
        Self::with_transport(config, HyperTransport::new(config.request_timeout()))
    }
}

impl<T> GovernedHttpClient<T>
where
    T: HttpTransport,
{
    /// Creates a client over the supplied transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if the proxy endpoint is invalid.
    pub fn with_transport(config: &GovernanceConfig, transport: T) -> TransportResult<Self> {
        let endpoint = config
            .endpoint(INVOKE_API_PATH)
            .parse::<Uri>()
            .map_err(|err| {
                TransportError::configuration(format!("invalid proxy endpoint: {err}"))
            })?;
        Ok(Self {
            transport,
            endpoint,
            api_key: config.api_key().to_owned(),
        })
    }

    /// Sends a call through the proxy and normalises the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on network failure, a non-2xx proxy status, or
    /// a body that is not a proxy envelope.
    pub async fn request(&self, request: ApiRequest) -> TransportResult<ApiOutcome> {
        let target_url = request.target_url();
        let mut proxy = ProxyApiRequest::new(self.api_key.clone(), &request.method, &target_url);
        proxy.headers = if request.headers.is_empty() {
            BTreeMap::from([("Content-Type".to_owned(), "application/json".to_owned())])
        } else {
            request.headers
        };
        proxy.body = request.body;

        debug!(target_url = %target_url, method = %proxy.method, "sending governed API call");
        let response = self.transport.send(proxy.into_http(&self.endpoint)?).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| TransportError::transport(format!("failed to read response: {err}")))?;

        if !status.is_success() {
            let reason = String::from_utf8_lossy(&bytes);
            return Err(TransportError::response(format!(
                "proxy returned {status}: {reason}"
            )));
        }

        let envelope: ProxyEnvelope<Value> = serde_json::from_slice(&bytes).map_err(|err| {
            TransportError::response(format!("failed to decode proxy response: {err}"))
        })?;
        let outcome = ApiOutcome::from_envelope(envelope);
        if let ApiOutcome::PendingApproval {
            approval_request_id,
            ..
        } = &outcome
        {
            info!(
                target_url = %target_url,
                approval_id = ?approval_request_id,
                "API call held for approval"
            );
        }
        Ok(outcome)
    }

    /// Sends a GET request.
    ///
    /// # Errors
    ///
    /// See [`GovernedHttpClient::request`].
    pub async fn get(&self, url: impl Into<String>) -> TransportResult<ApiOutcome> {
        self.request(ApiRequest::new(Method::GET, url)).await
    }

    /// Sends a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`GovernedHttpClient::request`].
    pub async fn post(&self, url: impl Into<String>, body: Value) -> TransportResult<ApiOutcome> {
        self.request(ApiRequest::new(Method::POST, url).json(body)).await
    }

    /// Sends a PUT request with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`GovernedHttpClient::request`].
    pub async fn put(&self, url: impl Into<String>, body: Value) -> TransportResult<ApiOutcome> {
        self.request(ApiRequest::new(Method::PUT, url).json(body)).await
    }

    /// Sends a PATCH request with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`GovernedHttpClient::request`].
    pub async fn patch(&self, url: impl Into<String>, body: Value) -> TransportResult<ApiOutcome> {
        self.request(ApiRequest::new(Method::PATCH, url).json(body)).await
    }

    /// Sends a DELETE request.
    ///
    /// # Errors
    ///
    /// See [`GovernedHttpClient::request`].
    pub async fn delete(&self, url: impl Into<String>) -> TransportResult<ApiOutcome> {
        self.request(ApiRequest::new(Method::DELETE, url)).await
    }
}
