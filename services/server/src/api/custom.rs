//! Non-CRUD state transitions: payment-method attach/detach and
//! checkout-session completion. These are ordinary writes with their own
//! lifecycle signals, not separate machinery.

use crate::api::error::{self, ApiError};
use crate::api::params::read_params;
use crate::app::AppState;
use crate::hydrate::hydrate;
use axum::extract::{Path, Request, State};
use axum::Json;
use serde_json::{json, Value};

pub async fn attach_payment_method(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Json<Value>, ApiError> {
    let (params, expand) = read_params(req).await?;
    let customer = params
        .get("customer")
        .and_then(Value::as_str)
        .ok_or_else(|| error::missing_param("customer"))?;
    state
        .registry
        .store("customers")
        .get(customer)
        .await
        .ok_or_else(|| error::not_found("customer", customer))?;

    let store = state.registry.store("payment_methods");
    let mut method = store
        .get(&id)
        .await
        .ok_or_else(|| error::not_found("payment_method", &id))?;
    method.set("customer", json!(customer));
    let method = store.update(method).await;
    state
        .telemetry
        .emit("payment_method.attached", method.clone());
    Ok(Json(hydrate(&state.registry, &method, &expand).await))
}

pub async fn detach_payment_method(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let store = state.registry.store("payment_methods");
    let mut method = store
        .get(&id)
        .await
        .ok_or_else(|| error::not_found("payment_method", &id))?;
    method.remove("customer");
    let method = store.update(method).await;
    state
        .telemetry
        .emit("payment_method.detached", method.clone());
    Ok(Json(method.into_value()))
}

pub async fn complete_checkout_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let store = state.registry.store("checkout_sessions");
    let mut session = store
        .get(&id)
        .await
        .ok_or_else(|| error::not_found("checkout.session", &id))?;
    session.set("status", json!("complete"));
    session.set("payment_status", json!("paid"));
    let session = store.update(session).await;
    state
        .telemetry
        .emit("checkout.session.completed", session.clone());
    Ok(Json(session.into_value()))
}
