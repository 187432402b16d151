//! Integration harness: spin up a real paper-tiger server on an ephemeral
//! port, plus a webhook receiver that captures signed deliveries for
//! assertions.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tiger_server::app::{self, AppState};
use tiger_server::config::ServerConfig;
use tokio::sync::Mutex;

type HmacSha256 = Hmac<Sha256>;

/// A live server bound to an ephemeral loopback port. Dropping the handle
/// does not stop the task; tests are short-lived processes.
pub struct TestServer {
    pub base_url: String,
    pub state: AppState,
}

pub async fn spawn_server() -> Result<TestServer> {
    spawn_server_with(ServerConfig {
        billing_poll: false,
        ..ServerConfig::default()
    })
    .await
}

pub async fn spawn_server_with(config: ServerConfig) -> Result<TestServer> {
    let app = app::build(&config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind test server")?;
    let addr = listener.local_addr().context("test server addr")?;
    let router = app.router.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service()).await;
    });
    Ok(TestServer {
        base_url: format!("http://{addr}"),
        state: app.state,
    })
}

/// One captured webhook POST.
#[derive(Debug, Clone)]
pub struct ReceivedDelivery {
    pub signature: String,
    pub body: String,
}

#[derive(Clone)]
struct ReceiverState {
    received: Arc<Mutex<Vec<ReceivedDelivery>>>,
    /// Respond 500 to this many deliveries before accepting.
    fail_remaining: Arc<AtomicUsize>,
}

pub struct WebhookReceiver {
    pub url: String,
    state: ReceiverState,
}

impl WebhookReceiver {
    /// Fail the next `count` deliveries with HTTP 500, then accept.
    pub fn fail_next(&self, count: usize) {
        self.state.fail_remaining.store(count, Ordering::SeqCst);
    }

    pub async fn received(&self) -> Vec<ReceivedDelivery> {
        self.state.received.lock().await.clone()
    }

    /// Poll until `count` deliveries arrive or the timeout expires.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Result<Vec<ReceivedDelivery>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received = self.received().await;
            if received.len() >= count {
                return Ok(received);
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!(
                    "expected {count} webhook deliveries, saw {} before timeout",
                    received.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub async fn spawn_receiver() -> Result<WebhookReceiver> {
    let state = ReceiverState {
        received: Arc::new(Mutex::new(Vec::new())),
        fail_remaining: Arc::new(AtomicUsize::new(0)),
    };
    let router = Router::new()
        .route("/", post(capture_delivery))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind webhook receiver")?;
    let addr = listener.local_addr().context("receiver addr")?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service()).await;
    });
    Ok(WebhookReceiver {
        url: format!("http://{addr}/"),
        state,
    })
}

async fn capture_delivery(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state
        .received
        .lock()
        .await
        .push(ReceivedDelivery { signature, body });
    let remaining = state.fail_remaining.load(Ordering::SeqCst);
    if remaining > 0 {
        state.fail_remaining.store(remaining - 1, Ordering::SeqCst);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

/// Verify a `Stripe-Signature: t=<ts>,v1=<hex>` header against the body, in
/// constant time.
pub fn verify_signature(secret: &str, signature_header: &str, body: &str) -> bool {
    let mut timestamp = None;
    let mut signature = None;
    for part in signature_header.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("{timestamp}.{body}").as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_accepts_matching_and_rejects_tampered() {
        let body = "{\"id\":\"evt_1\"}";
        let signature = tiger_server::webhooks::sign_event("whsec_abc", 1700000000, body);
        let header = format!("t=1700000000,v1={signature}");
        assert!(verify_signature("whsec_abc", &header, body));
        assert!(!verify_signature("whsec_other", &header, body));
        assert!(!verify_signature("whsec_abc", &header, "{\"id\":\"evt_2\"}"));
        assert!(!verify_signature("whsec_abc", "malformed", body));
    }
}
