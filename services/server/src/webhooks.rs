//! Signed webhook delivery pipeline.
//!
//! Delivery tasks run on a bounded worker pool fed by a FIFO queue, so
//! per-endpoint ordering is best-effort while parallel endpoints never block
//! each other. Each task signs the event payload
//! (`HMAC-SHA256(secret, "<created>.<json>")`), POSTs it with a
//! `Stripe-Signature: t=<created>,v1=<hex>` header, and retries non-2xx and
//! transport failures with exponential backoff measured in *virtual* time.
//! Every attempt is recorded in the deliveries store.

use crate::catalog::{DELIVERIES_PREFIX, DELIVERIES_TABLE};
use crate::model::{generate_id, Resource};
use crate::store::StoreRegistry;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tiger_clock::VirtualClock;
use tokio::sync::{mpsc, Mutex};

type HmacSha256 = Hmac<Sha256>;

pub const MAX_DELIVERY_ATTEMPTS: u32 = 8;
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
/// Granularity of the virtual-time backoff wait.
const BACKOFF_POLL: Duration = Duration::from_millis(25);

/// Hex-encoded `HMAC-SHA256(secret, "<timestamp>.<payload>")`.
pub fn sign_event(secret: &str, timestamp: i64, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Does this webhook's allowlist accept the event type? An absent or empty
/// allowlist accepts everything.
pub fn allowlist_matches(webhook: &Resource, event_type: &str) -> bool {
    match webhook.get("events") {
        None | Some(Value::Null) => true,
        Some(Value::Array(allowed)) => {
            allowed.is_empty() || allowed.iter().any(|entry| entry.as_str() == Some(event_type))
        }
        _ => false,
    }
}

#[derive(Clone)]
struct DeliveryJob {
    webhook: Resource,
    event: Resource,
}

#[derive(Clone)]
pub struct WebhookPipeline {
    jobs: mpsc::UnboundedSender<DeliveryJob>,
}

impl WebhookPipeline {
    /// Enqueue one delivery. Never blocks the caller; a closed pool (test
    /// teardown) drops the job.
    pub fn submit(&self, webhook: Resource, event: Resource) {
        let _ = self.jobs.send(DeliveryJob { webhook, event });
    }

    /// A pipeline with no workers attached; submissions vanish.
    pub fn disconnected() -> Self {
        let (jobs, _rx) = mpsc::unbounded_channel();
        Self { jobs }
    }
}

pub fn spawn_webhook_pipeline(
    workers: usize,
    registry: Arc<StoreRegistry>,
    clock: Arc<VirtualClock>,
) -> WebhookPipeline {
    let (jobs, rx) = mpsc::unbounded_channel::<DeliveryJob>();
    let rx = Arc::new(Mutex::new(rx));
    let client = reqwest::Client::builder()
        .timeout(ATTEMPT_TIMEOUT)
        .build()
        .expect("webhook http client");
    for _ in 0..workers.max(1) {
        tokio::spawn(worker_loop(
            rx.clone(),
            registry.clone(),
            clock.clone(),
            client.clone(),
        ));
    }
    WebhookPipeline { jobs }
}

async fn worker_loop(
    rx: Arc<Mutex<mpsc::UnboundedReceiver<DeliveryJob>>>,
    registry: Arc<StoreRegistry>,
    clock: Arc<VirtualClock>,
    client: reqwest::Client,
) {
    loop {
        // Workers take turns holding the receiver; the lock is released
        // before the delivery itself runs so the pool stays parallel.
        let job = rx.lock().await.recv().await;
        match job {
            Some(job) => deliver_with_retries(&job, &registry, &clock, &client).await,
            None => break,
        }
    }
}

async fn deliver_with_retries(
    job: &DeliveryJob,
    registry: &StoreRegistry,
    clock: &VirtualClock,
    client: &reqwest::Client,
) {
    let Some(url) = job.webhook.str_field("url").map(str::to_string) else {
        tracing::warn!(webhook = job.webhook.id(), "webhook has no url, dropping delivery");
        return;
    };
    let secret = job.webhook.str_field("secret").unwrap_or_default();
    let payload = serde_json::to_string(&job.event).unwrap_or_default();
    let timestamp = job.event.created();
    let signature = sign_event(secret, timestamp, &payload);
    let header = format!("t={timestamp},v1={signature}");

    for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
        let result = client
            .post(&url)
            .header("content-type", "application/json")
            .header("stripe-signature", header.clone())
            .body(payload.clone())
            .send()
            .await;

        let (succeeded, response_code, error) = match result {
            Ok(response) => (
                response.status().is_success(),
                Some(response.status().as_u16()),
                None,
            ),
            Err(err) => (false, err.status().map(|status| status.as_u16()), Some(err.to_string())),
        };

        let last = attempt == MAX_DELIVERY_ATTEMPTS;
        let backoff = 1_i64 << (attempt - 1);
        let next_attempt_at = (!succeeded && !last).then(|| clock.now() + backoff);
        record_attempt(
            registry,
            clock,
            job,
            attempt,
            succeeded,
            response_code,
            error.as_deref(),
            next_attempt_at,
        )
        .await;
        metrics::counter!(
            "paper_tiger_webhook_attempts_total",
            "outcome" => if succeeded { "succeeded" } else { "failed" }
        )
        .increment(1);

        if succeeded {
            return;
        }
        if last {
            tracing::warn!(
                webhook = job.webhook.id(),
                event = job.event.id(),
                "webhook delivery exhausted retries"
            );
            return;
        }
        wait_virtual(clock, backoff).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn record_attempt(
    registry: &StoreRegistry,
    clock: &VirtualClock,
    job: &DeliveryJob,
    attempt: u32,
    succeeded: bool,
    response_code: Option<u16>,
    error: Option<&str>,
    next_attempt_at: Option<i64>,
) {
    let mut record = Resource::new(
        "webhook_delivery",
        generate_id(DELIVERIES_PREFIX),
        clock.now(),
    );
    record.set("webhook_id", json!(job.webhook.id()));
    record.set("event_id", json!(job.event.id()));
    record.set("attempt", json!(attempt));
    record.set(
        "status",
        json!(if succeeded { "succeeded" } else { "failed" }),
    );
    record.set(
        "response_code",
        response_code.map(|code| json!(code)).unwrap_or(Value::Null),
    );
    record.set("error", error.map(|e| json!(e)).unwrap_or(Value::Null));
    record.set(
        "next_attempt_at",
        next_attempt_at.map(|at| json!(at)).unwrap_or(Value::Null),
    );
    registry.store(DELIVERIES_TABLE).insert(record).await;
}

/// Sleep until the virtual clock has advanced `seconds`. Wall-clock in real
/// mode; accelerated and manual modes progress as the clock does.
async fn wait_virtual(clock: &VirtualClock, seconds: i64) {
    let target = clock.now() + seconds;
    while clock.now() < target {
        tokio::time::sleep(BACKOFF_POLL).await;
    }
}
