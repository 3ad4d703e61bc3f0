use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agentguard::primitives::{ApprovalId, GovernanceConfig};
use agentguard::telemetry::{TelemetryConfig, try_init_tracing};
use agentguard::webhook::{
    ApprovalWait, HEALTH_PATH, SIGNATURE_HEADER, WEBHOOK_PATH, WebhookServer, sign,
};
use anyhow::Result;
use hyper::{Body, Client, Request, StatusCode};
use serde_json::{Value, json};

const SECRET: &str = "whsec_test";

fn loopback() -> SocketAddr {
    ([127, 0, 0, 1], 0).into()
}

async fn post(
    addr: SocketAddr,
    body: &str,
    signature: Option<String>,
) -> Result<(StatusCode, Value)> {
    let mut request = Request::post(format!("http://{addr}{WEBHOOK_PATH}"))
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        request = request.header(SIGNATURE_HEADER, signature);
    }
    let response = Client::new()
        .request(request.body(Body::from(body.to_owned()))?)
        .await?;
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

async fn until_registered(server: &WebhookServer, approval_id: &ApprovalId) {
    while !server.registry().contains(approval_id) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn signed_delivery_wakes_the_waiter_once() -> Result<()> {
    let _ = try_init_tracing(&TelemetryConfig::new());
    let config =
        GovernanceConfig::new("http://guard.local", "ag_test")?.with_webhook_secret(SECRET);
    let server = Arc::new(WebhookServer::from_config(loopback(), &config)?);
    let addr = server.local_addr();
    let approval_id = ApprovalId::new("apr-42")?;

    let waiter = {
        let server = Arc::clone(&server);
        let approval_id = approval_id.clone();
        tokio::spawn(async move {
            server
                .wait_for_approval(approval_id, Duration::from_secs(10))
                .await
        })
    };
    until_registered(&server, &approval_id).await;

    let body = r#"{"approvalId":"apr-42","status":"APPROVED","executionResult":{"content":"ok"}}"#;
    let signature = format!("sha256={}", sign(SECRET, body.as_bytes()));
    let (status, reply) = post(addr, body, Some(signature.clone())).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, json!({"received": true}));

    let payload = match waiter.await?? {
        ApprovalWait::Notified(payload) => payload,
        ApprovalWait::TimedOut => panic!("expected a delivered payload"),
    };
    assert_eq!(payload["status"], json!("APPROVED"));
    assert_eq!(payload["executionResult"]["content"], json!("ok"));

    // Replays are acknowledged but reach nobody.
    let (status, _) = post(addr, body, Some(signature)).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(server.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn forged_delivery_is_rejected_and_wait_times_out() -> Result<()> {
    let server = Arc::new(WebhookServer::bind(loopback(), Some(SECRET.to_owned()))?);
    let addr = server.local_addr();
    let approval_id = ApprovalId::new("apr-7")?;

    let waiter = {
        let server = Arc::clone(&server);
        let approval_id = approval_id.clone();
        tokio::spawn(async move {
            server
                .wait_for_approval(approval_id, Duration::from_millis(300))
                .await
        })
    };
    until_registered(&server, &approval_id).await;

    let body = r#"{"approvalId":"apr-7","status":"APPROVED"}"#;
    let (status, reply) = post(addr, body, Some(sign("wrong-secret", body.as_bytes()))).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply, json!({"error": "Invalid signature"}));

    let (status, _) = post(addr, body, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(waiter.await??, ApprovalWait::TimedOut);
    assert!(server.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn unsigned_server_validates_payload_shape() -> Result<()> {
    let server = WebhookServer::bind(loopback(), None)?;
    let addr = server.local_addr();

    let (status, reply) = post(addr, "not json", None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply, json!({"error": "Invalid JSON"}));

    let (status, reply) = post(addr, r#"{"status":"APPROVED"}"#, None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply, json!({"error": "Missing approval ID"}));

    let (status, _) = post(addr, r#"{"approval_id":"nobody-waits"}"#, None).await?;
    assert_eq!(status, StatusCode::OK);

    let health = Client::new()
        .get(format!("http://{addr}{HEALTH_PATH}").parse()?)
        .await?;
    assert_eq!(health.status(), StatusCode::OK);

    server.shutdown().await?;
    Ok(())
}
