//! Administrative surface (`/_config/…`).
//!
//! Not part of the emulated API: webhook registration, full data flush,
//! clock control, chaos policy, and an explicit billing trigger for
//! manual-mode tests.

use crate::api::error::{self, ApiError};
use crate::api::params::read_params;
use crate::app::AppState;
use crate::catalog::WEBHOOKS_TABLE;
use crate::chaos::ChaosConfigUpdate;
use crate::model::Resource;
use axum::extract::{Path, Request, State};
use axum::Json;
use serde_json::{json, Value};
use tiger_clock::ClockMode;

/// `POST /_config/webhooks/:id {url, secret, events?}` — register (or
/// replace) a webhook under the caller's id.
pub async fn register_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Json<Value>, ApiError> {
    let (params, _) = read_params(req).await?;
    let Some(url) = params.get("url").and_then(Value::as_str) else {
        return Err(error::missing_param("url"));
    };
    let mut webhook = Resource::new("webhook_endpoint", id, state.clock.now());
    webhook.set("url", json!(url));
    webhook.set(
        "secret",
        params.get("secret").cloned().unwrap_or_else(|| json!("")),
    );
    if let Some(events) = params.get("events") {
        webhook.set("events", events.clone());
    }
    let webhook = state.registry.store(WEBHOOKS_TABLE).insert(webhook).await;
    tracing::info!(id = webhook.id(), url, "webhook registered");
    Ok(Json(webhook.into_value()))
}

/// `DELETE /_config/data` — flush every store and the idempotency cache.
/// Global fixtures survive.
pub async fn flush_data(State(state): State<AppState>) -> Json<Value> {
    state.registry.clear_all().await;
    state.idempotency.clear().await;
    tracing::info!("all stores flushed");
    Json(json!({"deleted": true}))
}

/// `POST /_config/time/advance {seconds|minutes|hours|days}`.
pub async fn advance_time(
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<Value>, ApiError> {
    let (params, _) = read_params(req).await?;
    let field = |key: &str| params.get(key).and_then(Value::as_i64).unwrap_or(0);
    let total =
        field("seconds") + field("minutes") * 60 + field("hours") * 3_600 + field("days") * 86_400;
    if total <= 0 {
        return Err(error::invalid_request(
            "Provide a positive duration via seconds, minutes, hours, or days.",
        ));
    }
    let now = state
        .clock
        .advance(total)
        .map_err(|err| error::invalid_request(err.to_string()))?;
    Ok(Json(json!({"status": "ok", "advanced": total, "now": now})))
}

/// `GET /_config/time` — current mode, multiplier, and virtual now.
pub async fn clock_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.clock.info()))
}

/// `POST /_config/time/mode {mode, multiplier?}`.
pub async fn set_clock_mode(
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<Value>, ApiError> {
    let (params, _) = read_params(req).await?;
    let mode: ClockMode = match params.get("mode").and_then(Value::as_str) {
        Some("real") => ClockMode::Real,
        Some("accelerated") => ClockMode::Accelerated,
        Some("manual") => ClockMode::Manual,
        _ => {
            return Err(error::invalid_request(
                "mode must be one of real, accelerated, manual.",
            ))
        }
    };
    let multiplier = params
        .get("multiplier")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    state
        .clock
        .set_mode(mode, multiplier)
        .map_err(|err| error::invalid_request(err.to_string()))?;
    Ok(Json(json!(state.clock.info())))
}

/// `POST /_config/chaos` — partial chaos policy update.
pub async fn configure_chaos(
    State(state): State<AppState>,
    Json(update): Json<ChaosConfigUpdate>,
) -> Result<Json<Value>, ApiError> {
    state
        .chaos
        .configure(update)
        .map_err(|err| error::invalid_request(err.to_string()))?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn reset_chaos(State(state): State<AppState>) -> Json<Value> {
    state.chaos.reset();
    Json(json!({"status": "ok"}))
}

pub async fn chaos_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.chaos.stats()))
}

pub async fn flush_chaos_events(State(state): State<AppState>) -> Json<Value> {
    state.chaos.flush_events();
    Json(json!({"status": "ok"}))
}

/// `POST /_config/billing/run` — one explicit billing pass; the trigger
/// manual-mode tests use instead of the suppressed poller.
pub async fn run_billing(State(state): State<AppState>) -> Json<Value> {
    let summary = state.billing.process_billing().await;
    Json(json!(summary))
}

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
