//! Chaos coordinator: policy-driven failure injection.
//!
//! Three independent families:
//! - payment chaos decides whether a charge attempt declines (customer
//!   overrides beat the global failure rate);
//! - event chaos buffers webhook deliveries and may shuffle, duplicate, or
//!   delay them, flushed by a single one-shot timer per buffer cycle;
//! - api chaos maps a uniform draw onto timeout / rate-limit / server-error
//!   bands, with endpoint overrides checked first.
//!
//! All state lives behind one mutex; callers never hold it across I/O, and
//! buffered delivery closures run only after the lock is released.

use crate::declines;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChaosError {
    #[error("unknown decline code `{0}`")]
    UnknownDeclineCode(String),
    #[error("unknown api outcome `{0}`; expected ok, timeout, rate_limit, or server_error")]
    UnknownApiOutcome(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Ok,
    Fail { code: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiOutcome {
    Ok,
    Timeout(u64),
    RateLimit,
    ServerError,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentChaosConfig {
    pub failure_rate: f64,
    pub decline_codes: Vec<String>,
    pub decline_weights: Option<HashMap<String, f64>>,
}

impl Default for PaymentChaosConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            decline_codes: vec!["card_declined".to_string()],
            decline_weights: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventChaosConfig {
    pub out_of_order: bool,
    pub duplicate_rate: f64,
    pub buffer_window_ms: u64,
}

impl EventChaosConfig {
    fn active(&self) -> bool {
        self.out_of_order || self.duplicate_rate > 0.0 || self.buffer_window_ms > 0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiChaosConfig {
    pub timeout_rate: f64,
    pub timeout_ms: u64,
    pub rate_limit_rate: f64,
    pub error_rate: f64,
    pub endpoint_overrides: HashMap<String, ApiOverride>,
}

impl Default for ApiChaosConfig {
    fn default() -> Self {
        Self {
            timeout_rate: 0.0,
            timeout_ms: 5_000,
            rate_limit_rate: 0.0,
            error_rate: 0.0,
            endpoint_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiOverride {
    pub outcome: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Partial update applied by the admin surface; absent sections keep their
/// current values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChaosConfigUpdate {
    pub payment: Option<PaymentChaosConfig>,
    pub event: Option<EventChaosConfig>,
    pub api: Option<ApiChaosConfig>,
    /// customer id → decline code.
    pub customer_overrides: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ChaosStats {
    pub payments_succeeded: u64,
    pub payments_failed: u64,
    pub events_reordered: u64,
    pub events_duplicated: u64,
    pub api_timeouts: u64,
    pub api_rate_limits: u64,
    pub api_errors: u64,
}

type DeliverFn = Arc<dyn Fn() + Send + Sync>;

struct ChaosState {
    payment: PaymentChaosConfig,
    event: EventChaosConfig,
    api: ApiChaosConfig,
    customer_overrides: HashMap<String, String>,
    stats: ChaosStats,
    buffer: Vec<DeliverFn>,
    flush_scheduled: bool,
}

impl Default for ChaosState {
    fn default() -> Self {
        Self {
            payment: PaymentChaosConfig::default(),
            event: EventChaosConfig::default(),
            api: ApiChaosConfig::default(),
            customer_overrides: HashMap::new(),
            stats: ChaosStats::default(),
            buffer: Vec::new(),
            flush_scheduled: false,
        }
    }
}

pub struct ChaosCoordinator {
    state: Mutex<ChaosState>,
}

impl ChaosCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChaosState::default()),
        }
    }

    /// Decide whether a payment attempt for `customer` fails. Customer-level
    /// overrides take precedence over the global failure rate.
    pub fn should_payment_fail(&self, customer: Option<&str>) -> PaymentOutcome {
        let mut state = self.state.lock().expect("chaos lock");
        let outcome = decide_payment(&mut state, customer);
        match &outcome {
            PaymentOutcome::Ok => state.stats.payments_succeeded += 1,
            PaymentOutcome::Fail { code } => {
                state.stats.payments_failed += 1;
                metrics::counter!("paper_tiger_chaos_payment_declines_total", "code" => code.clone())
                    .increment(1);
            }
        }
        outcome
    }

    /// Force every payment attempt for `customer` to decline with `code`.
    pub fn simulate_failure(&self, customer: &str, code: &str) -> Result<(), ChaosError> {
        if !declines::is_known_decline_code(code) {
            return Err(ChaosError::UnknownDeclineCode(code.to_string()));
        }
        let mut state = self.state.lock().expect("chaos lock");
        state
            .customer_overrides
            .insert(customer.to_string(), code.to_string());
        Ok(())
    }

    /// Decide the fate of an API request to `path`. Endpoint overrides are
    /// checked before the global bands.
    pub fn should_api_fail(&self, path: &str) -> ApiOutcome {
        let mut state = self.state.lock().expect("chaos lock");
        let outcome = decide_api(&state, path);
        match outcome {
            ApiOutcome::Timeout(_) => state.stats.api_timeouts += 1,
            ApiOutcome::RateLimit => state.stats.api_rate_limits += 1,
            ApiOutcome::ServerError => state.stats.api_errors += 1,
            ApiOutcome::Ok => {}
        }
        outcome
    }

    /// Hand an event delivery to the coordinator. With no event chaos active
    /// the delivery runs immediately; otherwise it joins the buffer and a
    /// one-shot timer scheduled `buffer_window_ms` after the first queued
    /// event flushes the cycle.
    pub fn queue_event(self: &Arc<Self>, deliver: DeliverFn) {
        let window = {
            let mut state = self.state.lock().expect("chaos lock");
            if !state.event.active() {
                drop(state);
                deliver();
                return;
            }
            state.buffer.push(deliver);
            if state.flush_scheduled {
                return;
            }
            state.flush_scheduled = true;
            state.event.buffer_window_ms
        };
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(window)).await;
            coordinator.flush_events();
        });
    }

    /// Force an immediate flush of the event buffer.
    pub fn flush_events(&self) {
        let deliveries = {
            let mut state = self.state.lock().expect("chaos lock");
            state.flush_scheduled = false;
            let mut pending = std::mem::take(&mut state.buffer);
            if pending.is_empty() {
                return;
            }
            let mut rng = rand::thread_rng();
            if state.event.out_of_order && pending.len() > 1 {
                pending.shuffle(&mut rng);
                state.stats.events_reordered += pending.len() as u64;
            }
            if state.event.duplicate_rate > 0.0 {
                let mut with_duplicates = Vec::with_capacity(pending.len());
                for deliver in pending {
                    let duplicate = rng.gen::<f64>() < state.event.duplicate_rate;
                    with_duplicates.push(Arc::clone(&deliver));
                    if duplicate {
                        with_duplicates.push(deliver);
                        state.stats.events_duplicated += 1;
                    }
                }
                pending = with_duplicates;
            }
            pending
        };
        for deliver in deliveries {
            deliver();
        }
    }

    /// Replace chaos policy; decline codes and api outcomes are validated
    /// before anything is applied.
    pub fn configure(&self, update: ChaosConfigUpdate) -> Result<(), ChaosError> {
        if let Some(payment) = &update.payment {
            validate_payment_config(payment)?;
        }
        if let Some(api) = &update.api {
            for override_ in api.endpoint_overrides.values() {
                validate_api_outcome(&override_.outcome)?;
            }
        }
        if let Some(overrides) = &update.customer_overrides {
            for code in overrides.values() {
                if !declines::is_known_decline_code(code) {
                    return Err(ChaosError::UnknownDeclineCode(code.clone()));
                }
            }
        }
        let mut state = self.state.lock().expect("chaos lock");
        if let Some(payment) = update.payment {
            state.payment = payment;
        }
        if let Some(event) = update.event {
            state.event = event;
        }
        if let Some(api) = update.api {
            state.api = api;
        }
        if let Some(overrides) = update.customer_overrides {
            state.customer_overrides.extend(overrides);
        }
        Ok(())
    }

    /// Restore defaults; clears customer overrides, buffered deliveries, and
    /// statistics.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("chaos lock");
        *state = ChaosState::default();
    }

    pub fn stats(&self) -> ChaosStats {
        self.state.lock().expect("chaos lock").stats
    }
}

impl Default for ChaosCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn decide_payment(state: &mut ChaosState, customer: Option<&str>) -> PaymentOutcome {
    if let Some(code) = customer.and_then(|id| state.customer_overrides.get(id)) {
        return PaymentOutcome::Fail { code: code.clone() };
    }
    if state.payment.failure_rate <= 0.0 {
        return PaymentOutcome::Ok;
    }
    let mut rng = rand::thread_rng();
    if rng.gen::<f64>() >= state.payment.failure_rate {
        return PaymentOutcome::Ok;
    }
    PaymentOutcome::Fail {
        code: pick_decline_code(&state.payment, &mut rng),
    }
}

fn pick_decline_code(config: &PaymentChaosConfig, rng: &mut impl Rng) -> String {
    if let Some(weights) = &config.decline_weights {
        let total: f64 = config
            .decline_codes
            .iter()
            .filter_map(|code| weights.get(code))
            .sum();
        if total > 0.0 {
            let mut draw = rng.gen::<f64>() * total;
            for code in &config.decline_codes {
                let weight = weights.get(code).copied().unwrap_or(0.0);
                if draw < weight {
                    return code.clone();
                }
                draw -= weight;
            }
        }
    }
    config
        .decline_codes
        .choose(rng)
        .cloned()
        .unwrap_or_else(|| "card_declined".to_string())
}

fn decide_api(state: &ChaosState, path: &str) -> ApiOutcome {
    if let Some(override_) = state.api.endpoint_overrides.get(path) {
        return match override_.outcome.as_str() {
            "timeout" => ApiOutcome::Timeout(override_.timeout_ms.unwrap_or(state.api.timeout_ms)),
            "rate_limit" => ApiOutcome::RateLimit,
            "server_error" => ApiOutcome::ServerError,
            _ => ApiOutcome::Ok,
        };
    }
    let api = &state.api;
    if api.timeout_rate <= 0.0 && api.rate_limit_rate <= 0.0 && api.error_rate <= 0.0 {
        return ApiOutcome::Ok;
    }
    // A single draw mapped sequentially onto the configured bands.
    let draw = rand::thread_rng().gen::<f64>();
    if draw < api.timeout_rate {
        ApiOutcome::Timeout(api.timeout_ms)
    } else if draw < api.timeout_rate + api.rate_limit_rate {
        ApiOutcome::RateLimit
    } else if draw < api.timeout_rate + api.rate_limit_rate + api.error_rate {
        ApiOutcome::ServerError
    } else {
        ApiOutcome::Ok
    }
}

fn validate_payment_config(config: &PaymentChaosConfig) -> Result<(), ChaosError> {
    for code in &config.decline_codes {
        if !declines::is_known_decline_code(code) {
            return Err(ChaosError::UnknownDeclineCode(code.clone()));
        }
    }
    if let Some(weights) = &config.decline_weights {
        for code in weights.keys() {
            if !declines::is_known_decline_code(code) {
                return Err(ChaosError::UnknownDeclineCode(code.clone()));
            }
        }
    }
    Ok(())
}

fn validate_api_outcome(outcome: &str) -> Result<(), ChaosError> {
    match outcome {
        "ok" | "timeout" | "rate_limit" | "server_error" => Ok(()),
        other => Err(ChaosError::UnknownApiOutcome(other.to_string())),
    }
}
