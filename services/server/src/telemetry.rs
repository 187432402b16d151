//! In-process telemetry bus.
//!
//! Write paths and the billing engine emit named signals carrying a resource
//! snapshot; a dispatcher task runs the sinks registered at startup, in
//! emission order. Emitting never blocks the write path — the channel is
//! unbounded and sinks offload slow work (webhook delivery) to their own
//! workers.

use crate::model::Resource;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A lifecycle signal: dot-qualified name plus the resource snapshot taken
/// at emit time (a value, not a reference into any store).
#[derive(Debug, Clone)]
pub struct Emission {
    pub signal: String,
    pub snapshot: Resource,
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn deliver(&self, emission: &Emission);
}

#[derive(Clone)]
pub struct TelemetryBus {
    tx: mpsc::UnboundedSender<Emission>,
}

impl TelemetryBus {
    pub fn emit(&self, signal: impl Into<String>, snapshot: Resource) {
        let emission = Emission {
            signal: signal.into(),
            snapshot,
        };
        metrics::counter!("paper_tiger_telemetry_emissions_total").increment(1);
        // Receiver dropping means shutdown; losing trailing emissions is fine.
        let _ = self.tx.send(emission);
    }

    /// A bus whose emissions go nowhere; handy for unit tests of write paths.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// Start the dispatcher. Sinks run sequentially per emission so subscribers
/// observe signals in the order emitters posted them.
pub fn spawn_telemetry(
    sinks: Vec<Arc<dyn TelemetrySink>>,
) -> (TelemetryBus, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Emission>();
    let handle = tokio::spawn(async move {
        while let Some(emission) = rx.recv().await {
            tracing::debug!(signal = %emission.signal, id = emission.snapshot.id(), "telemetry");
            for sink in &sinks {
                sink.deliver(&emission).await;
            }
        }
    });
    (TelemetryBus { tx }, handle)
}
