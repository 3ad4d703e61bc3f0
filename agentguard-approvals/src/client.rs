//! Stateless client for the governance server's approval endpoints.

use std::fmt;

use agentguard_primitives::{
    ApprovalId, ApprovalStatus, ApprovalStatusResult, GovernanceConfig, GuardError, GuardResult,
    ProxyEnvelope,
};
use agentguard_transport::traits::{HttpTransport, HyperTransport};
use hyper::body::to_bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Body, Method, Request};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

/// Header carrying the agent API key on approval calls.
pub const API_KEY_HEADER: &str = "x-agent-api-key";

/// Acknowledgement returned by [`ApprovalClient::submit_reason`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    /// Always `true`; failures are reported as errors.
    pub success: bool,
    /// Human-readable confirmation.
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "executionResult")]
    execution_result: Option<Value>,
    #[serde(default)]
    remark: Option<String>,
}

/// Client for querying and justifying approvals.
///
/// Holds no approval state: every call is a fresh round-trip, nothing is
/// retried, and repeated submissions are not deduplicated.
pub struct ApprovalClient<T = HyperTransport> {
    transport: T,
    config: GovernanceConfig,
    api_key: HeaderValue,
}

impl<T> fmt::Debug for ApprovalClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalClient")
            .field("base_url", &self.config.base_url())
            .finish_non_exhaustive()
    }
}

impl ApprovalClient<HyperTransport> {
    /// Creates a client over a real HTTPS transport.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Configuration`] if the API key cannot be sent as a
    /// header value.
    pub fn new(config: GovernanceConfig) -> GuardResult<Self> {
        let transport = HyperTransport::new(config.request_timeout());
        Self::with_transport(config, transport)
    }
}

impl<T> ApprovalClient<T>
where
    T: HttpTransport,
{
    /// Creates a client over the supplied transport.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Configuration`] if the API key cannot be sent as a
    /// header value.
    pub fn with_transport(config: GovernanceConfig, transport: T) -> GuardResult<Self> {
        let api_key = HeaderValue::from_str(config.api_key())
            .map_err(|err| GuardError::configuration(format!("invalid api key: {err}")))?;
        Ok(Self {
            transport,
            config,
            api_key,
        })
    }

    /// Returns the configuration in use.
    #[must_use]
    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Fetches the current status of an approval.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Governance`] on transport failure, a non-2xx
    /// status, an envelope code other than 200, or a status outside the four
    /// known values.
    pub async fn get_status(
        &self,
        approval_id: &ApprovalId,
    ) -> GuardResult<ApprovalStatusResult> {
        let url = self.approval_url(approval_id, "status");
        let request = self.request(Method::GET, &url, Body::empty())?;
        let envelope: ProxyEnvelope<StatusData> =
            self.call(request, "query approval status").await?;

        let data = envelope
            .data
            .ok_or_else(|| GuardError::governance("approval status response has no data"))?;
        let status = data
            .status
            .as_deref()
            .ok_or_else(|| GuardError::governance("approval status response has no status"))?
            .parse::<ApprovalStatus>()?;

        debug!(approval_id = %approval_id, status = %status, "approval status fetched");
        ApprovalStatusResult::new(status, data.execution_result, data.remark)
    }

    /// Submits a justification for a held approval.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Governance`] on transport failure, a non-2xx
    /// status, or an envelope code other than 200.
    pub async fn submit_reason(
        &self,
        approval_id: &ApprovalId,
        reason: &str,
    ) -> GuardResult<SubmitReceipt> {
        let url = self.approval_url(approval_id, "reason");
        let body = json!({ "reason": reason }).to_string();
        let mut request = self.request(Method::POST, &url, Body::from(body))?;
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let _: ProxyEnvelope<Value> = self.call(request, "submit approval reason").await?;

        info!(approval_id = %approval_id, "approval reason submitted");
        Ok(SubmitReceipt {
            success: true,
            message: "Approval reason submitted successfully".to_owned(),
        })
    }

    fn approval_url(&self, approval_id: &ApprovalId, action: &str) -> String {
        self.config
            .endpoint_url(["api", "v1", "approvals", approval_id.as_str(), action])
            .into()
    }

    fn request(&self, method: Method, url: &str, body: Body) -> GuardResult<Request<Body>> {
        Request::builder()
            .method(method)
            .uri(url)
            .header(API_KEY_HEADER, self.api_key.clone())
            .body(body)
            .map_err(|err| GuardError::governance(format!("failed to build request: {err}")))
    }

    async fn call<D>(&self, request: Request<Body>, action: &str) -> GuardResult<ProxyEnvelope<D>>
    where
        D: DeserializeOwned,
    {
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|err| GuardError::governance(format!("failed to {action}: {err}")))?;
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.map_err(|err| {
            GuardError::governance(format!("failed to read response to {action}: {err}"))
        })?;

        if !status.is_success() {
            let reason = String::from_utf8_lossy(&bytes);
            return Err(GuardError::governance(format!(
                "failed to {action}: server returned {status}: {reason}"
            )));
        }

        let envelope: ProxyEnvelope<D> = serde_json::from_slice(&bytes).map_err(|err| {
            GuardError::governance(format!("failed to {action}: malformed response: {err}"))
        })?;
        if !envelope.is_success() {
            return Err(GuardError::governance(format!(
                "failed to {action}: {}",
                envelope.message_or_default()
            )));
        }
        Ok(envelope)
    }
}
