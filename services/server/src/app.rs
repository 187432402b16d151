//! Application wiring.
//!
//! Builds the component graph (stores, clock, chaos, idempotency, telemetry
//! with the event materializer, webhook pipeline, billing engine), the Axum
//! router with the middleware chain, and the background workers. `main`
//! stays a thin shell over this module, which keeps the whole server
//! constructible inside tests.

use crate::api;
use crate::api::middleware;
use crate::billing::{spawn_billing_worker, BillingEngine};
use crate::chaos::ChaosCoordinator;
use crate::config::ServerConfig;
use crate::events::EventMaterializer;
use crate::idempotency::{spawn_sweeper, IdempotencyCache};
use crate::store::StoreRegistry;
use crate::telemetry::{spawn_telemetry, TelemetryBus};
use crate::webhooks::spawn_webhook_pipeline;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use std::sync::Arc;
use tiger_clock::VirtualClock;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StoreRegistry>,
    pub clock: Arc<VirtualClock>,
    pub idempotency: Arc<IdempotencyCache>,
    pub chaos: Arc<ChaosCoordinator>,
    pub telemetry: TelemetryBus,
    pub billing: Arc<BillingEngine>,
    pub strict_keys: bool,
}

pub struct App {
    pub state: AppState,
    pub router: Router,
}

/// Construct the full component graph and router. Must run inside a Tokio
/// runtime: the telemetry dispatcher and webhook workers are spawned here.
pub fn build(config: &ServerConfig) -> App {
    let registry = Arc::new(StoreRegistry::new());
    let clock = Arc::new(VirtualClock::new());
    let chaos = Arc::new(ChaosCoordinator::new());
    let idempotency = Arc::new(IdempotencyCache::new(clock.clone()));

    let pipeline = spawn_webhook_pipeline(config.webhook_workers, registry.clone(), clock.clone());
    let materializer = EventMaterializer::new(
        registry.clone(),
        clock.clone(),
        chaos.clone(),
        pipeline,
    );
    let (telemetry, _dispatcher) = spawn_telemetry(vec![Arc::new(materializer)]);

    let billing = Arc::new(BillingEngine::new(
        registry.clone(),
        clock.clone(),
        chaos.clone(),
        telemetry.clone(),
    ));

    let state = AppState {
        registry,
        clock,
        idempotency,
        chaos,
        telemetry,
        billing,
        strict_keys: config.strict_keys,
    };
    let router = build_router(state.clone());
    App { state, router }
}

/// Start the periodic workers: idempotency sweeper and, unless disabled,
/// the billing poller.
pub fn spawn_background(state: &AppState, config: &ServerConfig) {
    spawn_sweeper(state.idempotency.clone());
    if config.billing_poll {
        spawn_billing_worker(state.billing.clone());
    }
}

/// Compose the middleware chain. Effective order on a request:
/// trace → CORS → auth → api chaos → idempotency → parser/dispatch.
pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
            )
        });

    Router::new()
        .merge(api::resource_router())
        .merge(api::admin_router())
        .layer(from_fn_with_state(state.clone(), middleware::idempotency))
        .layer(from_fn_with_state(state.clone(), middleware::api_chaos))
        .layer(from_fn_with_state(state.clone(), middleware::auth))
        .layer(from_fn(middleware::cors))
        .layer(trace_layer)
        .with_state(state)
}
