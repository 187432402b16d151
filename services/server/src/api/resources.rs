//! Uniform resource dispatch.
//!
//! One generic handler per operation, parameterized by the catalog row:
//! create validates required params, stamps the template fields, applies the
//! per-resource build behavior, and emits the lifecycle signal; retrieve /
//! update / delete / list follow the shared template. Hydration applies
//! wherever `expand[]` appears.

use crate::api::error::{self, ApiError};
use crate::api::params::{list_params, read_params};
use crate::billing::{charge_balance_transaction, refund_balance_transaction};
use crate::catalog::{
    CreateBehavior, DeleteBehavior, ResourceSpec, BALANCE_TRANSACTIONS_TABLE, CHARGES_TABLE,
    PLANS_TABLE, PRICES_TABLE, SUBSCRIPTION_ITEMS_TABLE,
};
use crate::chaos::PaymentOutcome;
use crate::declines::decline_message;
use crate::hydrate::hydrate;
use crate::model::{generate_id, Document, Resource};
use crate::telemetry::TelemetryBus;
use crate::{app::AppState, billing::interval_seconds};
use axum::extract::{Path, Request, State};
use axum::Json;
use serde_json::{json, Value};

/// A freshly built resource plus any signals beyond `<object>.created` that
/// the build itself produced.
struct Built {
    resource: Resource,
    extra_signals: Vec<(String, Resource)>,
}

impl Built {
    fn plain(resource: Resource) -> Self {
        Self {
            resource,
            extra_signals: Vec::new(),
        }
    }
}

pub async fn create(
    spec: &'static ResourceSpec,
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<Value>, ApiError> {
    let (params, expand) = read_params(req).await?;
    for required in spec.required {
        if params.get(*required).map_or(true, Value::is_null) {
            return Err(error::missing_param(required));
        }
    }

    let built = match spec.create {
        CreateBehavior::Plain => Built::plain(build_plain(spec, &state, &params).await),
        CreateBehavior::Subscription => build_subscription(spec, &state, &params).await?,
        CreateBehavior::Charge => build_charge(spec, &state, &params).await?,
        CreateBehavior::PaymentIntent => build_payment_intent(spec, &state, &params).await,
        CreateBehavior::Refund => build_refund(spec, &state, &params).await?,
        CreateBehavior::CheckoutSession => build_checkout_session(spec, &state, &params).await,
    };

    let resource = state.registry.store(spec.table).insert(built.resource).await;
    emit_created(&state.telemetry, spec, &resource, built.extra_signals);

    Ok(Json(hydrate(&state.registry, &resource, &expand).await))
}

fn emit_created(
    bus: &TelemetryBus,
    spec: &ResourceSpec,
    resource: &Resource,
    extra: Vec<(String, Resource)>,
) {
    bus.emit(format!("{}.created", spec.object), resource.clone());
    for (signal, snapshot) in extra {
        bus.emit(signal, snapshot);
    }
}

pub async fn retrieve(
    spec: &'static ResourceSpec,
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Json<Value>, ApiError> {
    let (_, expand) = read_params(req).await?;
    let resource = state
        .registry
        .store(spec.table)
        .get(&id)
        .await
        .ok_or_else(|| error::not_found(spec.object, &id))?;
    Ok(Json(hydrate(&state.registry, &resource, &expand).await))
}

pub async fn update(
    spec: &'static ResourceSpec,
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Request,
) -> Result<Json<Value>, ApiError> {
    let (params, expand) = read_params(req).await?;
    let store = state.registry.store(spec.table);
    let mut resource = store
        .get(&id)
        .await
        .ok_or_else(|| error::not_found(spec.object, &id))?;
    resource.merge(&params, spec.extra_immutable);
    let resource = store.update(resource).await;
    state
        .telemetry
        .emit(format!("{}.updated", spec.object), resource.clone());
    Ok(Json(hydrate(&state.registry, &resource, &expand).await))
}

pub async fn delete(
    spec: &'static ResourceSpec,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match spec.delete {
        DeleteBehavior::Remove => {
            let removed = state
                .registry
                .store(spec.table)
                .delete(&id)
                .await
                .map_err(|_| error::not_found(spec.object, &id))?;
            state
                .telemetry
                .emit(format!("{}.deleted", spec.object), removed);
            Ok(Json(json!({
                "deleted": true,
                "id": id,
                "object": spec.object,
            })))
        }
        // Subscriptions survive deletion as a state transition.
        DeleteBehavior::CancelSubscription => {
            let store = state.registry.store(spec.table);
            let mut subscription = store
                .get(&id)
                .await
                .ok_or_else(|| error::not_found(spec.object, &id))?;
            subscription.set("status", json!("canceled"));
            subscription.set("canceled_at", json!(state.clock.now()));
            let subscription = store.update(subscription).await;
            state
                .telemetry
                .emit("subscription.updated", subscription.clone());
            Ok(Json(subscription.into_value()))
        }
        DeleteBehavior::Disabled => Err(error::not_found(spec.object, &id)),
    }
}

pub async fn list(
    spec: &'static ResourceSpec,
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<Value>, ApiError> {
    let (params, expand) = read_params(req).await?;
    let page = state
        .registry
        .store(spec.table)
        .list(&list_params(&params, spec))
        .await;

    let mut data = Vec::with_capacity(page.data.len());
    for item in &page.data {
        if expand.is_empty() {
            data.push(item.to_value());
        } else {
            data.push(hydrate(&state.registry, item, &expand).await);
        }
    }

    Ok(Json(json!({
        "object": "list",
        "data": data,
        "has_more": page.has_more,
        "url": page.url,
    })))
}

/// The generic template: honor a caller-provided id, stamp the guaranteed
/// attributes, overlay the caller's fields.
async fn build_plain(spec: &ResourceSpec, state: &AppState, params: &Document) -> Resource {
    let id = params
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| generate_id(spec.prefix));
    let mut resource = Resource::new(spec.object, id, state.clock.now());
    resource.merge(params, &[]);
    resource
}

/// Subscriptions normalize their `items` into standalone subscription-item
/// records (entities reference each other by id only) and stamp period
/// bounds derived from the first resolvable price or plan.
async fn build_subscription(
    spec: &ResourceSpec,
    state: &AppState,
    params: &Document,
) -> Result<Built, ApiError> {
    let customer = params
        .get("customer")
        .and_then(Value::as_str)
        .unwrap_or_default();
    state
        .registry
        .store("customers")
        .get(customer)
        .await
        .ok_or_else(|| error::not_found("customer", customer))?;

    let now = state.clock.now();
    let mut subscription = build_plain(spec, state, params).await;
    subscription.remove("items");
    if subscription.get("status").is_none() {
        subscription.set("status", json!("active"));
    }

    let mut first_price: Option<String> = None;
    if let Some(Value::Array(items)) = params.get("items") {
        for item in items {
            let Some(price) = item.get("price").and_then(Value::as_str) else {
                continue;
            };
            first_price.get_or_insert_with(|| price.to_string());
            let mut record =
                Resource::new("subscription_item", generate_id("si"), now);
            record.set("subscription", json!(subscription.id()));
            record.set("price", json!(price));
            if let Some(quantity) = item.get("quantity") {
                record.set("quantity", quantity.clone());
            }
            state
                .registry
                .store(SUBSCRIPTION_ITEMS_TABLE)
                .insert(record)
                .await;
        }
    }

    let period = subscription_period(state, first_price.as_deref(), params).await;
    if subscription.get("current_period_start").is_none() {
        subscription.set("current_period_start", json!(now));
    }
    if subscription.get("current_period_end").is_none() {
        subscription.set("current_period_end", json!(now + period));
    }
    Ok(Built::plain(subscription))
}

/// Length of the first billing period, from the price's recurrence, the
/// plan's interval, or a month by default.
async fn subscription_period(state: &AppState, price: Option<&str>, params: &Document) -> i64 {
    if let Some(price_id) = price {
        if let Some(price) = state.registry.store(PRICES_TABLE).get(price_id).await {
            let recurring = price.get("recurring").cloned().unwrap_or(Value::Null);
            let interval = recurring
                .get("interval")
                .and_then(Value::as_str)
                .or(price.str_field("interval"))
                .unwrap_or("month");
            let count = recurring
                .get("interval_count")
                .and_then(Value::as_i64)
                .unwrap_or(1);
            return interval_seconds(interval).unwrap_or(2_592_000) * count;
        }
    }
    if let Some(plan_id) = params.get("plan").and_then(Value::as_str) {
        if let Some(plan) = state.registry.store(PLANS_TABLE).get(plan_id).await {
            let interval = plan.str_field("interval").unwrap_or("month");
            let count = plan.int_field("interval_count").unwrap_or(1);
            return interval_seconds(interval).unwrap_or(2_592_000) * count;
        }
    }
    2_592_000
}

/// Direct charge creation consults payment chaos; a decline still records
/// the failed charge, then surfaces as a 402 card error.
async fn build_charge(
    spec: &ResourceSpec,
    state: &AppState,
    params: &Document,
) -> Result<Built, ApiError> {
    let customer = params.get("customer").and_then(Value::as_str);
    let mut charge = build_plain(spec, state, params).await;
    match state.chaos.should_payment_fail(customer) {
        PaymentOutcome::Ok => {
            let txn_id = generate_id("txn");
            charge.set("status", json!("succeeded"));
            charge.set("paid", json!(true));
            charge.set("captured", json!(true));
            charge.set("amount_refunded", json!(0));
            charge.set("refunded", json!(false));
            charge.set("balance_transaction", json!(txn_id));
            let txn = charge_balance_transaction(txn_id, &charge, state.clock.now());
            state
                .registry
                .store(BALANCE_TRANSACTIONS_TABLE)
                .insert(txn)
                .await;
            Ok(Built {
                extra_signals: vec![("charge.succeeded".to_string(), charge.clone())],
                resource: charge,
            })
        }
        PaymentOutcome::Fail { code } => {
            let message = decline_message(&code);
            charge.set("status", json!("failed"));
            charge.set("paid", json!(false));
            charge.set("captured", json!(false));
            charge.set("failure_code", json!(code));
            charge.set("failure_message", json!(message));
            let charge = state.registry.store(spec.table).insert(charge).await;
            state.telemetry.emit("charge.failed", charge);
            Err(error::card_error(&code, message))
        }
    }
}

async fn build_payment_intent(
    spec: &ResourceSpec,
    state: &AppState,
    params: &Document,
) -> Built {
    let customer = params.get("customer").and_then(Value::as_str);
    let mut intent = build_plain(spec, state, params).await;
    match state.chaos.should_payment_fail(customer) {
        PaymentOutcome::Ok => {
            intent.set("status", json!("succeeded"));
            Built {
                extra_signals: vec![("payment_intent.succeeded".to_string(), intent.clone())],
                resource: intent,
            }
        }
        // A declined intent is not an HTTP failure; the decline lives on the
        // intent itself.
        PaymentOutcome::Fail { code } => {
            let message = decline_message(&code);
            intent.set("status", json!("requires_payment_method"));
            intent.set(
                "last_payment_error",
                json!({"code": code, "message": message, "type": "card_error"}),
            );
            Built {
                extra_signals: vec![(
                    "payment_intent.payment_failed".to_string(),
                    intent.clone(),
                )],
                resource: intent,
            }
        }
    }
}

async fn build_refund(
    spec: &ResourceSpec,
    state: &AppState,
    params: &Document,
) -> Result<Built, ApiError> {
    let charge_id = params
        .get("charge")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let charges = state.registry.store(CHARGES_TABLE);
    let mut charge = charges
        .get(charge_id)
        .await
        .ok_or_else(|| error::not_found("charge", charge_id))?;

    let charged = charge.int_field("amount").unwrap_or(0);
    let already_refunded = charge.int_field("amount_refunded").unwrap_or(0);
    let amount = params
        .get("amount")
        .and_then(Value::as_i64)
        .unwrap_or(charged - already_refunded);
    if amount <= 0 || amount + already_refunded > charged {
        return Err(error::invalid_request(format!(
            "Refund amount ({amount}) exceeds the refundable amount of the charge."
        )));
    }

    let now = state.clock.now();
    let mut refund = build_plain(spec, state, params).await;
    refund.set("amount", json!(amount));
    refund.set(
        "currency",
        charge.get("currency").cloned().unwrap_or(Value::Null),
    );
    refund.set("status", json!("succeeded"));

    // Claw back a proportional share of the original fee, when the original
    // balance transaction is still known.
    let original = match charge.str_field("balance_transaction") {
        Some(txn_id) => state
            .registry
            .store(BALANCE_TRANSACTIONS_TABLE)
            .get(txn_id)
            .await
            .and_then(|txn| Some((txn.int_field("fee")?, charged))),
        None => None,
    };
    let txn = refund_balance_transaction(generate_id("txn"), &refund, original, now);
    refund.set("balance_transaction", json!(txn.id()));
    state
        .registry
        .store(BALANCE_TRANSACTIONS_TABLE)
        .insert(txn)
        .await;

    let refunded_total = already_refunded + amount;
    charge.set("amount_refunded", json!(refunded_total));
    charge.set("refunded", json!(refunded_total >= charged));
    let charge = charges.update(charge).await;

    Ok(Built {
        extra_signals: vec![("charge.refunded".to_string(), charge)],
        resource: refund,
    })
}

async fn build_checkout_session(
    spec: &ResourceSpec,
    state: &AppState,
    params: &Document,
) -> Built {
    let mut session = build_plain(spec, state, params).await;
    if session.get("status").is_none() {
        session.set("status", json!("open"));
    }
    if session.get("payment_status").is_none() {
        session.set("payment_status", json!("unpaid"));
    }
    if session.get("mode").is_none() {
        session.set("mode", json!("payment"));
    }
    Built::plain(session)
}
