//! Billing engine.
//!
//! A single worker that, at each poll, selects subscriptions whose current
//! period has elapsed and runs the billing state machine: derive the amount
//! from the first subscription item's price (falling back to the attached
//! plan), select or create the open invoice, attempt payment through the
//! chaos coordinator, then either advance the subscription period or walk
//! the dunning ladder toward `past_due`.
//!
//! Failures are per-subscription: a broken subscription is logged and
//! counted, never fatal to the engine or to its siblings.

use crate::catalog::{
    BALANCE_TRANSACTIONS_TABLE, CHARGES_TABLE, INVOICES_TABLE, INVOICE_ITEMS_TABLE,
    PAYMENT_INTENTS_TABLE, PLANS_TABLE, PRICES_TABLE, SUBSCRIPTIONS_TABLE,
    SUBSCRIPTION_ITEMS_TABLE,
};
use crate::chaos::{ChaosCoordinator, PaymentOutcome};
use crate::declines::decline_message;
use crate::model::{generate_id, Resource};
use crate::store::StoreRegistry;
use crate::telemetry::TelemetryBus;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tiger_clock::{ClockMode, VirtualClock};

/// Fixed-length billing intervals, in seconds.
pub fn interval_seconds(interval: &str) -> Option<i64> {
    match interval {
        "day" => Some(86_400),
        "week" => Some(604_800),
        "month" => Some(2_592_000),
        "year" => Some(31_536_000),
        _ => None,
    }
}

/// Dunning delay after the nth failed attempt.
pub fn retry_delay(attempt: i64) -> i64 {
    match attempt {
        1 => 86_400,
        2 => 259_200,
        3 => 432_000,
        _ => 604_800,
    }
}

/// Attempts after which a subscription transitions to `past_due`.
pub const DUNNING_ATTEMPT_LIMIT: i64 = 4;

/// Processing fee on a successful charge: 2.9% + 30.
pub fn charge_fee(amount: i64) -> i64 {
    (amount as f64 * 0.029).round() as i64 + 30
}

/// Funds from a charge become available two days later.
const CHARGE_SETTLEMENT_DELAY: i64 = 172_800;

/// Balance transaction minted for a successful charge.
pub fn charge_balance_transaction(id: String, charge: &Resource, now: i64) -> Resource {
    let amount = charge.int_field("amount").unwrap_or_default();
    let fee = charge_fee(amount);
    let mut txn = Resource::new("balance_transaction", id, now);
    txn.set("amount", json!(amount));
    txn.set("fee", json!(fee));
    txn.set("net", json!(amount - fee));
    txn.set("currency", charge.get("currency").cloned().unwrap_or(Value::Null));
    txn.set("status", json!("pending"));
    txn.set("available_on", json!(now + CHARGE_SETTLEMENT_DELAY));
    txn.set("type", json!("charge"));
    txn.set("source", json!(charge.id()));
    txn
}

/// Balance transaction minted for a refund. The fee claws back a
/// proportional share of the original charge fee.
pub fn refund_balance_transaction(
    id: String,
    refund: &Resource,
    original: Option<(i64, i64)>,
    now: i64,
) -> Resource {
    let amount = refund.int_field("amount").unwrap_or_default();
    let fee = match original {
        Some((original_fee, original_amount)) if original_amount > 0 => {
            -((original_fee as f64 * amount as f64 / original_amount as f64).round() as i64)
        }
        _ => 0,
    };
    let mut txn = Resource::new("balance_transaction", id, now);
    txn.set("amount", json!(-amount));
    txn.set("fee", json!(fee));
    txn.set("net", json!(-amount - fee));
    txn.set("currency", refund.get("currency").cloned().unwrap_or(Value::Null));
    txn.set("status", json!("available"));
    txn.set("available_on", json!(now));
    txn.set("type", json!("refund"));
    txn.set("source", json!(refund.id()));
    txn
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("subscription {subscription} has no resolvable price or plan")]
    MissingPricing { subscription: String },
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct BillingRunSummary {
    pub processed: u64,
    pub paid: u64,
    pub failed: u64,
    pub errors: u64,
}

enum CycleOutcome {
    Paid,
    Declined,
    Canceled,
}

struct Pricing {
    amount: i64,
    currency: Value,
    interval: String,
    interval_count: i64,
}

pub struct BillingEngine {
    registry: Arc<StoreRegistry>,
    clock: Arc<VirtualClock>,
    chaos: Arc<ChaosCoordinator>,
    bus: TelemetryBus,
}

impl BillingEngine {
    pub fn new(
        registry: Arc<StoreRegistry>,
        clock: Arc<VirtualClock>,
        chaos: Arc<ChaosCoordinator>,
        bus: TelemetryBus,
    ) -> Self {
        Self {
            registry,
            clock,
            chaos,
            bus,
        }
    }

    pub fn clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    /// Run one billing pass over every eligible subscription.
    pub async fn process_billing(&self) -> BillingRunSummary {
        let now = self.clock.now();
        let mut summary = BillingRunSummary::default();
        let subscriptions = self.registry.store(SUBSCRIPTIONS_TABLE).all().await;
        for subscription in subscriptions {
            let eligible = subscription.str_field("status") == Some("active")
                && subscription
                    .int_field("current_period_end")
                    .is_some_and(|end| end <= now);
            if !eligible {
                continue;
            }
            summary.processed += 1;
            match self.bill_subscription(subscription, now).await {
                Ok(CycleOutcome::Paid) => summary.paid += 1,
                Ok(CycleOutcome::Declined) => summary.failed += 1,
                Ok(CycleOutcome::Canceled) => {}
                Err(err) => {
                    summary.errors += 1;
                    tracing::warn!(error = %err, "billing cycle skipped");
                }
            }
        }
        if summary.processed > 0 {
            metrics::counter!("paper_tiger_billing_cycles_total", "outcome" => "paid")
                .increment(summary.paid);
            metrics::counter!("paper_tiger_billing_cycles_total", "outcome" => "failed")
                .increment(summary.failed);
        }
        summary
    }

    async fn bill_subscription(
        &self,
        mut subscription: Resource,
        now: i64,
    ) -> Result<CycleOutcome, BillingError> {
        if subscription.get("cancel_at_period_end") == Some(&Value::Bool(true)) {
            subscription.set("status", json!("canceled"));
            subscription.set("canceled_at", json!(now));
            let stored = self
                .registry
                .store(SUBSCRIPTIONS_TABLE)
                .update(subscription)
                .await;
            self.bus.emit("subscription.updated", stored);
            return Ok(CycleOutcome::Canceled);
        }

        let pricing = self.derive_pricing(&subscription).await?;
        let customer = subscription.str_field("customer").map(str::to_string);

        let invoice = self.select_or_create_invoice(&subscription, &pricing, now).await;

        match self.chaos.should_payment_fail(customer.as_deref()) {
            PaymentOutcome::Ok => {
                self.settle_cycle(subscription, invoice, &pricing, customer, now)
                    .await;
                Ok(CycleOutcome::Paid)
            }
            PaymentOutcome::Fail { code } => {
                self.dun_cycle(subscription, invoice, &pricing, customer, &code, now)
                    .await;
                Ok(CycleOutcome::Declined)
            }
        }
    }

    /// Prefer the first subscription item's price; fall back to the attached
    /// plan.
    async fn derive_pricing(&self, subscription: &Resource) -> Result<Pricing, BillingError> {
        let missing = || BillingError::MissingPricing {
            subscription: subscription.id().to_string(),
        };

        let mut items: Vec<Resource> = self
            .registry
            .store(SUBSCRIPTION_ITEMS_TABLE)
            .all()
            .await
            .into_iter()
            .filter(|item| item.str_field("subscription") == Some(subscription.id()))
            .collect();
        items.sort_by(|a, b| a.created().cmp(&b.created()).then_with(|| a.id().cmp(b.id())));

        if let Some(price_id) = items.first().and_then(|item| item.str_field("price")) {
            let price = self
                .registry
                .store(PRICES_TABLE)
                .get(price_id)
                .await
                .ok_or_else(missing)?;
            let recurring = price.get("recurring").cloned().unwrap_or(Value::Null);
            let interval = recurring
                .get("interval")
                .and_then(Value::as_str)
                .or(price.str_field("interval"))
                .unwrap_or("month")
                .to_string();
            let interval_count = recurring
                .get("interval_count")
                .and_then(Value::as_i64)
                .or(price.int_field("interval_count"))
                .unwrap_or(1);
            return Ok(Pricing {
                amount: price.int_field("unit_amount").ok_or_else(missing)?,
                currency: price.get("currency").cloned().unwrap_or(Value::Null),
                interval,
                interval_count,
            });
        }

        if let Some(plan_id) = subscription.str_field("plan") {
            let plan = self
                .registry
                .store(PLANS_TABLE)
                .get(plan_id)
                .await
                .ok_or_else(missing)?;
            return Ok(Pricing {
                amount: plan.int_field("amount").ok_or_else(missing)?,
                currency: plan.get("currency").cloned().unwrap_or(Value::Null),
                interval: plan.str_field("interval").unwrap_or("month").to_string(),
                interval_count: plan.int_field("interval_count").unwrap_or(1),
            });
        }

        Err(missing())
    }

    /// Reuse the subscription's open (unpaid) invoice if one exists;
    /// otherwise create a fresh draft invoice plus its line item and emit
    /// `invoice.created`.
    async fn select_or_create_invoice(
        &self,
        subscription: &Resource,
        pricing: &Pricing,
        now: i64,
    ) -> Resource {
        let invoices = self.registry.store(INVOICES_TABLE);
        let open = invoices
            .all()
            .await
            .into_iter()
            .find(|invoice| {
                invoice.str_field("subscription") == Some(subscription.id())
                    && invoice.str_field("status") == Some("open")
            });
        if let Some(existing) = open {
            return existing;
        }

        let mut invoice = Resource::new("invoice", generate_id("in"), now);
        invoice.set("customer", subscription.get("customer").cloned().unwrap_or(Value::Null));
        invoice.set("subscription", json!(subscription.id()));
        invoice.set("status", json!("draft"));
        invoice.set("currency", pricing.currency.clone());
        invoice.set("amount_due", json!(pricing.amount));
        invoice.set("amount_paid", json!(0));
        invoice.set("amount_remaining", json!(pricing.amount));
        invoice.set("billing_reason", json!("subscription_cycle"));
        invoice.set(
            "period_start",
            subscription.get("current_period_start").cloned().unwrap_or(Value::Null),
        );
        invoice.set(
            "period_end",
            subscription.get("current_period_end").cloned().unwrap_or(Value::Null),
        );
        invoice.set("auto_advance", json!(true));
        invoice.set("collection_method", json!("charge_automatically"));
        invoice.set("attempt_count", json!(0));
        invoice.set("paid", json!(false));
        let invoice = invoices.insert(invoice).await;

        let mut line = Resource::new("invoiceitem", generate_id("ii"), now);
        line.set("customer", subscription.get("customer").cloned().unwrap_or(Value::Null));
        line.set("subscription", json!(subscription.id()));
        line.set("invoice", json!(invoice.id()));
        line.set("amount", json!(pricing.amount));
        line.set("currency", pricing.currency.clone());
        line.set("description", json!("Subscription cycle"));
        line.set(
            "period",
            json!({
                "start": invoice.get("period_start").cloned().unwrap_or(Value::Null),
                "end": invoice.get("period_end").cloned().unwrap_or(Value::Null),
            }),
        );
        self.registry.store(INVOICE_ITEMS_TABLE).insert(line).await;

        self.bus.emit("invoice.created", invoice.clone());
        invoice
    }

    async fn settle_cycle(
        &self,
        mut subscription: Resource,
        mut invoice: Resource,
        pricing: &Pricing,
        customer: Option<String>,
        now: i64,
    ) {
        let customer_value = customer.map(Value::String).unwrap_or(Value::Null);

        let mut intent = Resource::new("payment_intent", generate_id("pi"), now);
        intent.set("amount", json!(pricing.amount));
        intent.set("currency", pricing.currency.clone());
        intent.set("customer", customer_value.clone());
        intent.set("invoice", json!(invoice.id()));
        intent.set("status", json!("succeeded"));
        let intent = self.registry.store(PAYMENT_INTENTS_TABLE).insert(intent).await;

        let txn_id = generate_id("txn");
        let mut charge = Resource::new("charge", generate_id("ch"), now);
        charge.set("amount", json!(pricing.amount));
        charge.set("currency", pricing.currency.clone());
        charge.set("customer", customer_value);
        charge.set("invoice", json!(invoice.id()));
        charge.set("payment_intent", json!(intent.id()));
        charge.set("status", json!("succeeded"));
        charge.set("paid", json!(true));
        charge.set("captured", json!(true));
        charge.set("balance_transaction", json!(txn_id));
        let charge = self.registry.store(CHARGES_TABLE).insert(charge).await;

        let txn = charge_balance_transaction(txn_id, &charge, now);
        self.registry.store(BALANCE_TRANSACTIONS_TABLE).insert(txn).await;

        invoice.set("status", json!("paid"));
        invoice.set("paid", json!(true));
        invoice.set("amount_paid", json!(pricing.amount));
        invoice.set("amount_remaining", json!(0));
        invoice.set("charge", json!(charge.id()));
        invoice.set("payment_intent", json!(intent.id()));
        let invoice = self.registry.store(INVOICES_TABLE).update(invoice).await;

        self.bus.emit("payment_intent.created", intent.clone());
        self.bus.emit("payment_intent.succeeded", intent);
        self.bus.emit("charge.succeeded", charge);
        self.bus.emit("invoice.finalized", invoice.clone());
        self.bus.emit("invoice.paid", invoice.clone());
        self.bus.emit("invoice.payment_succeeded", invoice);

        // Advance the period: the old end becomes the new start.
        let old_end = subscription
            .int_field("current_period_end")
            .unwrap_or(now);
        let duration = interval_seconds(&pricing.interval).unwrap_or(2_592_000);
        subscription.set("current_period_start", json!(old_end));
        subscription.set(
            "current_period_end",
            json!(old_end + duration * pricing.interval_count),
        );
        let subscription = self
            .registry
            .store(SUBSCRIPTIONS_TABLE)
            .update(subscription)
            .await;
        self.bus.emit("subscription.updated", subscription);
    }

    async fn dun_cycle(
        &self,
        mut subscription: Resource,
        mut invoice: Resource,
        pricing: &Pricing,
        customer: Option<String>,
        code: &str,
        now: i64,
    ) {
        let message = decline_message(code);
        let customer_value = customer.map(Value::String).unwrap_or(Value::Null);

        let mut intent = Resource::new("payment_intent", generate_id("pi"), now);
        intent.set("amount", json!(pricing.amount));
        intent.set("currency", pricing.currency.clone());
        intent.set("customer", customer_value.clone());
        intent.set("invoice", json!(invoice.id()));
        intent.set("status", json!("requires_payment_method"));
        intent.set(
            "last_payment_error",
            json!({"code": code, "message": message, "type": "card_error"}),
        );
        let intent = self.registry.store(PAYMENT_INTENTS_TABLE).insert(intent).await;

        let mut charge = Resource::new("charge", generate_id("ch"), now);
        charge.set("amount", json!(pricing.amount));
        charge.set("currency", pricing.currency.clone());
        charge.set("customer", customer_value);
        charge.set("invoice", json!(invoice.id()));
        charge.set("payment_intent", json!(intent.id()));
        charge.set("status", json!("failed"));
        charge.set("paid", json!(false));
        charge.set("captured", json!(false));
        charge.set("failure_code", json!(code));
        charge.set("failure_message", json!(message));
        let charge = self.registry.store(CHARGES_TABLE).insert(charge).await;

        self.bus.emit("payment_intent.created", intent.clone());
        self.bus.emit("payment_intent.payment_failed", intent);
        self.bus.emit("charge.failed", charge);

        let attempt = invoice.int_field("attempt_count").unwrap_or(0) + 1;
        invoice.set("status", json!("open"));
        invoice.set("attempt_count", json!(attempt));
        invoice.set("next_payment_attempt", json!(now + retry_delay(attempt)));
        let invoice = self.registry.store(INVOICES_TABLE).update(invoice).await;
        self.bus.emit("invoice.payment_failed", invoice);

        if attempt >= DUNNING_ATTEMPT_LIMIT {
            subscription.set("status", json!("past_due"));
            let subscription = self
                .registry
                .store(SUBSCRIPTIONS_TABLE)
                .update(subscription)
                .await;
            self.bus.emit("subscription.updated", subscription);
        }
    }
}

/// Poll every second of wall time in real and accelerated modes; manual mode
/// suppresses polling and the caller drives `process_billing` explicitly.
pub fn spawn_billing_worker(engine: Arc<BillingEngine>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if engine.clock().mode() == ClockMode::Manual {
                continue;
            }
            let summary = engine.process_billing().await;
            if summary.processed > 0 {
                tracing::info!(
                    processed = summary.processed,
                    paid = summary.paid,
                    failed = summary.failed,
                    errors = summary.errors,
                    "billing pass"
                );
            }
        }
    })
}
