//! HTTP receiver for approval webhooks.

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agentguard_primitives::{ApprovalId, GovernanceConfig};
use hyper::body::to_bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{WebhookError, WebhookResult};
use crate::registry::{ApprovalWait, CallbackRegistry, DispatchOutcome};
use crate::signature::check_signature;

/// Path receiving approval deliveries.
pub const WEBHOOK_PATH: &str = "/agentguard/webhook";
/// Liveness probe path.
pub const HEALTH_PATH: &str = "/health";
/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "x-agentguard-signature";

/// Status code and JSON body produced for a request.
#[derive(Clone, Debug, PartialEq)]
pub struct WebhookReply {
    /// Response status.
    pub status: StatusCode,
    /// Response body.
    pub body: Value,
}

impl WebhookReply {
    fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    fn error(status: StatusCode, message: &str) -> Self {
        Self::new(status, json!({ "error": message }))
    }

    /// Renders the reply as an HTTP response.
    #[must_use]
    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body.to_string()));
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

/// Request handler shared by every connection of a [`WebhookServer`].
#[derive(Clone)]
pub struct WebhookHandler {
    registry: CallbackRegistry,
    secret: Option<Arc<str>>,
}

impl fmt::Debug for WebhookHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookHandler")
            .field("registry", &self.registry)
            .field("signed", &self.secret.is_some())
            .finish()
    }
}

impl WebhookHandler {
    /// Creates a handler delivering into `registry`.
    ///
    /// When `secret` is set, deliveries must carry a valid signature. An empty
    /// secret disables verification.
    #[must_use]
    pub fn new(registry: CallbackRegistry, secret: Option<String>) -> Self {
        let secret = secret.filter(|secret| !secret.is_empty()).map(Arc::from);
        Self { registry, secret }
    }

    /// Returns the registry deliveries are dispatched into.
    #[must_use]
    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Processes one delivery given its signature header and raw body.
    #[must_use]
    pub fn handle_delivery(&self, signature: Option<&str>, body: &[u8]) -> WebhookReply {
        if let Some(secret) = &self.secret
            && let Err(err) = check_signature(secret, body, signature.unwrap_or_default())
        {
            warn!(error = %err, "rejected webhook delivery");
            return WebhookReply::error(StatusCode::UNAUTHORIZED, "Invalid signature");
        }

        let payload = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) if !map.is_empty() => Value::Object(map),
            _ => return WebhookReply::error(StatusCode::BAD_REQUEST, "Invalid JSON"),
        };

        let Some(approval_id) = approval_id_of(&payload) else {
            return WebhookReply::error(StatusCode::BAD_REQUEST, "Missing approval ID");
        };

        match self.registry.dispatch(&approval_id, payload) {
            DispatchOutcome::Delivered => {
                info!(approval_id = %approval_id, "approval webhook delivered");
            }
            DispatchOutcome::NoWaiter => {
                debug!(approval_id = %approval_id, "approval webhook had no waiter");
            }
        }
        WebhookReply::new(StatusCode::OK, json!({ "received": true }))
    }

    /// Routes a full HTTP request.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let method = request.method().clone();
        let path = request.uri().path().to_owned();
        let reply = match (&method, path.as_str()) {
            (&Method::POST, WEBHOOK_PATH) => {
                let signature = request
                    .headers()
                    .get(SIGNATURE_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                match to_bytes(request.into_body()).await {
                    Ok(body) => self.handle_delivery(signature.as_deref(), &body),
                    Err(err) => {
                        warn!(error = %err, "failed to read webhook body");
                        WebhookReply::error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
                    }
                }
            }
            (&Method::GET, HEALTH_PATH) => {
                WebhookReply::new(StatusCode::OK, json!({ "status": "ok" }))
            }
            _ => WebhookReply::error(StatusCode::NOT_FOUND, "Not found"),
        };
        reply.into_response()
    }
}

fn approval_id_of(payload: &Value) -> Option<ApprovalId> {
    ["approvalId", "approval_id"]
        .iter()
        .filter_map(|key| payload.get(*key).and_then(Value::as_str))
        .find_map(|raw| ApprovalId::new(raw).ok())
}

/// Running webhook listener.
///
/// Dropping the handle triggers a graceful shutdown without waiting for it.
pub struct WebhookServer {
    local_addr: SocketAddr,
    registry: CallbackRegistry,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), hyper::Error>>>,
}

impl fmt::Debug for WebhookServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookServer")
            .field("local_addr", &self.local_addr)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl WebhookServer {
    /// Binds the listener and starts serving on the current Tokio runtime.
    ///
    /// Use port `0` to let the OS pick one; [`WebhookServer::local_addr`]
    /// reports the bound address.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Bind`] if the address cannot be bound.
    pub fn bind(addr: SocketAddr, secret: Option<String>) -> WebhookResult<Self> {
        let registry = CallbackRegistry::new();
        let handler = Arc::new(WebhookHandler::new(registry.clone(), secret));

        let make_service = make_service_fn(move |_conn: &AddrStream| {
            let handler = Arc::clone(&handler);
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    let handler = Arc::clone(&handler);
                    async move { Ok::<_, Infallible>(handler.handle(request).await) }
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .map_err(|err| WebhookError::bind(format!("{addr}: {err}")))?
            .serve(make_service);
        let local_addr = server.local_addr();

        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(server.with_graceful_shutdown(async {
            let _ = signal.await;
        }));

        info!(%local_addr, path = WEBHOOK_PATH, "webhook server listening");
        Ok(Self {
            local_addr,
            registry,
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    /// Binds using the webhook secret from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Bind`] if the address cannot be bound.
    pub fn from_config(addr: SocketAddr, config: &GovernanceConfig) -> WebhookResult<Self> {
        Self::bind(addr, config.webhook_secret().map(str::to_owned))
    }

    /// Returns the bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the registry deliveries are dispatched into.
    #[must_use]
    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    /// Waits for the delivery of an approval; see
    /// [`CallbackRegistry::wait_for_approval`].
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::AlreadyRegistered`] if another waiter already
    /// holds the approval.
    pub async fn wait_for_approval(
        &self,
        approval_id: ApprovalId,
        timeout: Duration,
    ) -> WebhookResult<ApprovalWait> {
        self.registry.wait_for_approval(approval_id, timeout).await
    }

    /// Stops accepting connections and waits for in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Server`] if the server task failed.
    pub async fn shutdown(mut self) -> WebhookResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.await
            .map_err(|err| WebhookError::server(err.to_string()))?
            .map_err(|err| WebhookError::server(err.to_string()))?;
        info!(local_addr = %self.local_addr, "webhook server stopped");
        Ok(())
    }
}

impl Drop for WebhookServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
