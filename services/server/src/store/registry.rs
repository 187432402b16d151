//! Store registry and prefix table.
//!
//! One store per catalog row plus the internal deliveries store. The
//! prefix-to-store table built here is the single source of truth the
//! hydrator uses for reverse id lookup.

use super::Store;
use crate::catalog::{self, ResourceSpec, CATALOG};
use crate::model::{id_prefix, Resource};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub struct StoreRegistry {
    by_table: HashMap<&'static str, Arc<Store>>,
    by_prefix: HashMap<&'static str, Arc<Store>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        let mut by_table = HashMap::new();
        let mut by_prefix = HashMap::new();
        for spec in CATALOG {
            let store = Arc::new(build_store(spec));
            by_table.insert(spec.table, store.clone());
            by_prefix.insert(spec.prefix, store);
        }
        let deliveries = Arc::new(Store::new(
            catalog::DELIVERIES_TABLE,
            format!("/v1/{}", catalog::DELIVERIES_TABLE),
        ));
        by_table.insert(catalog::DELIVERIES_TABLE, deliveries.clone());
        by_prefix.insert(catalog::DELIVERIES_PREFIX, deliveries);
        Self {
            by_table,
            by_prefix,
        }
    }

    /// Store for a catalog table. Tables are a closed static set, so a miss
    /// is a programming error.
    pub fn store(&self, table: &str) -> &Arc<Store> {
        self.by_table
            .get(table)
            .unwrap_or_else(|| panic!("unknown store table `{table}`"))
    }

    /// Reverse lookup from an id's prefix; `None` for unknown prefixes,
    /// which hydration treats as "leave the string alone".
    pub fn store_for_id(&self, id: &str) -> Option<&Arc<Store>> {
        self.by_prefix.get(id_prefix(id)?)
    }

    /// Flush every caller namespace; global fixtures survive.
    pub async fn clear_all(&self) {
        for store in self.by_table.values() {
            store.clear().await;
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<Store>> {
        self.by_table.values()
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_store(spec: &ResourceSpec) -> Store {
    let global = match spec.table {
        "tokens" => token_fixtures(),
        "payment_methods" => payment_method_fixtures(),
        _ => HashMap::new(),
    };
    Store::with_global(spec.table, spec.url(), global)
}

const CARD_BRANDS: &[(&str, &str)] = &[
    ("visa", "4242"),
    ("mastercard", "4444"),
    ("amex", "8431"),
    ("discover", "1117"),
];

fn token_fixtures() -> HashMap<String, Resource> {
    let mut fixtures = HashMap::new();
    for (brand, last4) in CARD_BRANDS {
        let id = format!("tok_{brand}");
        let mut token = Resource::new("token", id.clone(), 0);
        token.set("type", json!("card"));
        token.set("used", json!(false));
        token.set("card", json!({"brand": brand, "last4": last4}));
        fixtures.insert(id, token);
    }
    let mut declined = Resource::new("token", "tok_chargeDeclined".to_string(), 0);
    declined.set("type", json!("card"));
    declined.set("used", json!(false));
    declined.set("card", json!({"brand": "visa", "last4": "0002"}));
    fixtures.insert("tok_chargeDeclined".to_string(), declined);
    fixtures
}

fn payment_method_fixtures() -> HashMap<String, Resource> {
    let mut fixtures = HashMap::new();
    for (brand, last4) in CARD_BRANDS {
        let id = format!("pm_card_{brand}");
        let mut method = Resource::new("payment_method", id.clone(), 0);
        method.set("type", json!("card"));
        method.set("card", json!({"brand": brand, "last4": last4}));
        fixtures.insert(id, method);
    }
    let mut declined = Resource::new("payment_method", "pm_card_chargeDeclined".to_string(), 0);
    declined.set("type", json!("card"));
    declined.set("card", json!({"brand": "visa", "last4": "0002"}));
    fixtures.insert("pm_card_chargeDeclined".to_string(), declined);
    fixtures
}
