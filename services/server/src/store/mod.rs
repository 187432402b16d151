//! Resource store fabric.
//!
//! # Purpose
//! One concurrent key-value store per resource type. Reads proceed
//! concurrently (read lock), writes for a single store are totally ordered
//! (write lock), and writes across stores never contend with each other.
//!
//! # Listing
//! `list` is cursor-based: snapshot under the read lock, sort by
//! `created desc, id asc`, then apply `ending_before`/`starting_after`
//! windows. `has_more` is computed by probing for one item beyond the
//! requested limit.
//!
//! # Global namespace
//! Tokens and payment methods carry well-known pre-seeded fixtures
//! (`tok_visa`, `pm_card_visa`, …). Lookups fall back to this read-only map
//! on a miss, so isolated test runs share the built-ins without copying
//! them; `clear()` never touches it.

use crate::model::Resource;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

pub mod registry;

pub use registry::StoreRegistry;

pub const DEFAULT_PAGE_LIMIT: i64 = 10;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such {table} entry: {id}")]
    NotFound { table: &'static str, id: String },
}

#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub starting_after: Option<String>,
    pub ending_before: Option<String>,
    /// Equality filters on top-level fields, pre-validated by the caller.
    pub filters: Vec<(String, Value)>,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub data: Vec<Resource>,
    pub has_more: bool,
    pub url: String,
}

#[derive(Debug)]
pub struct Store {
    table: &'static str,
    url: String,
    entries: RwLock<HashMap<String, Resource>>,
    /// Read-only fixtures shared across clears; empty for most stores.
    global: HashMap<String, Resource>,
}

impl Store {
    pub fn new(table: &'static str, url: String) -> Self {
        Self::with_global(table, url, HashMap::new())
    }

    pub fn with_global(table: &'static str, url: String, global: HashMap<String, Resource>) -> Self {
        Self {
            table,
            url,
            entries: RwLock::new(HashMap::new()),
            global,
        }
    }

    pub fn table_name(&self) -> &'static str {
        self.table
    }

    /// Lookup by id; checks the caller's namespace first, then the global
    /// fixture namespace.
    pub async fn get(&self, id: &str) -> Option<Resource> {
        if let Some(found) = self.entries.read().await.get(id) {
            return Some(found.clone());
        }
        self.global.get(id).cloned()
    }

    /// Insert or replace; write-locked so writes per store are totally
    /// ordered.
    pub async fn insert(&self, resource: Resource) -> Resource {
        let mut entries = self.entries.write().await;
        entries.insert(resource.id().to_string(), resource.clone());
        metrics::counter!("paper_tiger_store_writes_total", "table" => self.table, "op" => "insert")
            .increment(1);
        metrics::gauge!("paper_tiger_store_entries", "table" => self.table)
            .set(entries.len() as f64);
        resource
    }

    /// Alias for `insert`; callers impose merge semantics before writing.
    pub async fn update(&self, resource: Resource) -> Resource {
        self.insert(resource).await
    }

    pub async fn delete(&self, id: &str) -> Result<Resource, StoreError> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(id).ok_or_else(|| StoreError::NotFound {
            table: self.table,
            id: id.to_string(),
        })?;
        metrics::counter!("paper_tiger_store_writes_total", "table" => self.table, "op" => "delete")
            .increment(1);
        metrics::gauge!("paper_tiger_store_entries", "table" => self.table)
            .set(entries.len() as f64);
        Ok(removed)
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
        metrics::gauge!("paper_tiger_store_entries", "table" => self.table).set(0.0);
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Full snapshot in deterministic order, without cursor windowing.
    pub async fn all(&self) -> Vec<Resource> {
        let mut items: Vec<Resource> = self.entries.read().await.values().cloned().collect();
        sort_for_listing(&mut items);
        items
    }

    pub async fn list(&self, params: &ListParams) -> Page {
        let mut items: Vec<Resource> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|resource| matches_filters(resource, &params.filters))
                .cloned()
                .collect()
        };
        sort_for_listing(&mut items);

        let limit = params
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(0, MAX_PAGE_LIMIT) as usize;

        // `ending_before` wins when both cursors are present.
        let (data, has_more) = if let Some(before) = params.ending_before.as_deref() {
            if let Some(position) = items.iter().position(|item| item.id() == before) {
                items.truncate(position);
            }
            let has_more = items.len() > limit;
            let start = items.len().saturating_sub(limit);
            (items.split_off(start), has_more)
        } else {
            if let Some(after) = params.starting_after.as_deref() {
                if let Some(position) = items.iter().position(|item| item.id() == after) {
                    items.drain(..=position);
                }
            }
            let has_more = items.len() > limit;
            items.truncate(limit);
            (items, has_more)
        };

        Page {
            data,
            has_more,
            url: self.url.clone(),
        }
    }
}

/// `created` descending, ties broken by id ascending for determinism.
fn sort_for_listing(items: &mut [Resource]) {
    items.sort_by(|a, b| {
        b.created()
            .cmp(&a.created())
            .then_with(|| a.id().cmp(b.id()))
    });
}

fn matches_filters(resource: &Resource, filters: &[(String, Value)]) -> bool {
    filters
        .iter()
        .all(|(key, expected)| resource.get(key) == Some(expected))
}
