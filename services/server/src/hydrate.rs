//! Reference expansion ("hydration").
//!
//! Stored records reference each other by id only; expansion into nested
//! objects happens at read time. A dotted path descends the record; any
//! string node whose prefix resolves in the registry is replaced by the
//! retrieved record and descent continues through it. Anything that cannot
//! resolve (missing field, unknown prefix, deleted target) leaves the rest
//! of the path unexpanded — never an error.

use crate::model::Resource;
use crate::store::StoreRegistry;
use serde_json::Value;

/// Expand `paths` on a shallow copy of `resource`. Applying the same paths
/// twice is a no-op the second time: already-expanded nodes are traversed
/// through without re-fetching.
pub async fn hydrate(registry: &StoreRegistry, resource: &Resource, paths: &[String]) -> Value {
    let mut value = resource.to_value();
    for path in paths {
        // List responses accept `data.`-prefixed paths; items hydrate the rest.
        let trimmed = path.strip_prefix("data.").unwrap_or(path);
        let segments: Vec<&str> = trimmed.split('.').filter(|s| !s.is_empty()).collect();
        if !segments.is_empty() {
            expand_path(registry, &mut value, &segments).await;
        }
    }
    value
}

async fn expand_path(registry: &StoreRegistry, root: &mut Value, segments: &[&str]) {
    let mut current = root;
    for segment in segments {
        let Some(object) = current.as_object_mut() else {
            return;
        };
        let Some(child) = object.get_mut(*segment) else {
            return;
        };
        match child {
            Value::String(id) => {
                let Some(store) = registry.store_for_id(id) else {
                    return;
                };
                let Some(found) = store.get(id).await else {
                    return;
                };
                *child = found.into_value();
                current = child;
            }
            Value::Object(_) => {
                current = child;
            }
            _ => return,
        }
    }
}
