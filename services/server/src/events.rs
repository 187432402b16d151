//! Event materialization.
//!
//! A telemetry sink that turns every emitted signal into an append-only
//! Event record (`evt_…`, `type`, `created`, `data.object` snapshot),
//! persists it, and hands delivery to the webhook pipeline by way of the
//! chaos coordinator's event layer. Events are never mutated or deleted.

use crate::catalog::{EVENTS_TABLE, WEBHOOKS_TABLE};
use crate::chaos::ChaosCoordinator;
use crate::model::{generate_id, Resource};
use crate::store::StoreRegistry;
use crate::telemetry::{Emission, TelemetrySink};
use crate::webhooks::{allowlist_matches, WebhookPipeline};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tiger_clock::VirtualClock;

pub struct EventMaterializer {
    registry: Arc<StoreRegistry>,
    clock: Arc<VirtualClock>,
    chaos: Arc<ChaosCoordinator>,
    pipeline: WebhookPipeline,
}

impl EventMaterializer {
    pub fn new(
        registry: Arc<StoreRegistry>,
        clock: Arc<VirtualClock>,
        chaos: Arc<ChaosCoordinator>,
        pipeline: WebhookPipeline,
    ) -> Self {
        Self {
            registry,
            clock,
            chaos,
            pipeline,
        }
    }
}

#[async_trait]
impl TelemetrySink for EventMaterializer {
    async fn deliver(&self, emission: &Emission) {
        let mut event = Resource::new("event", generate_id("evt"), self.clock.now());
        event.set("type", json!(emission.signal));
        event.set("data", json!({"object": emission.snapshot.to_value()}));
        let event = self.registry.store(EVENTS_TABLE).insert(event).await;
        metrics::counter!("paper_tiger_events_materialized_total").increment(1);

        let matched: Vec<Resource> = self
            .registry
            .store(WEBHOOKS_TABLE)
            .all()
            .await
            .into_iter()
            .filter(|webhook| allowlist_matches(webhook, &emission.signal))
            .collect();
        if matched.is_empty() {
            return;
        }

        let pipeline = self.pipeline.clone();
        self.chaos.queue_event(Arc::new(move || {
            for webhook in &matched {
                pipeline.submit(webhook.clone(), event.clone());
            }
        }));
    }
}
