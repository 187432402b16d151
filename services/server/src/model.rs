//! Resource document model.
//!
//! Every stored resource is a tagged JSON document with a handful of
//! guaranteed attributes (`id`, `object`, `created`, `livemode`, `metadata`).
//! The mock does not privilege any one resource shape; per-type structure is
//! whatever the caller provided plus the defaults the dispatch layer applies.

use rand::RngCore;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

pub type Document = Map<String, Value>;

/// Attributes that updates can never overlay, independent of resource type.
pub const BASE_IMMUTABLE: &[&str] = &["id", "object", "created", "livemode"];

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    doc: Document,
}

impl Resource {
    /// Wrap an existing document. Returns `None` unless `id` and `object`
    /// are present non-empty strings.
    pub fn from_document(doc: Document) -> Option<Self> {
        let ok = |key: &str| doc.get(key).and_then(Value::as_str).is_some_and(|s| !s.is_empty());
        (ok("id") && ok("object")).then_some(Self { doc })
    }

    /// A fresh resource with the guaranteed attributes populated.
    pub fn new(object: &str, id: String, created: i64) -> Self {
        let mut doc = Document::new();
        doc.insert("id".to_string(), Value::String(id));
        doc.insert("object".to_string(), Value::String(object.to_string()));
        doc.insert("created".to_string(), Value::Number(created.into()));
        doc.insert("livemode".to_string(), Value::Bool(false));
        doc.insert("metadata".to_string(), Value::Object(Document::new()));
        Self { doc }
    }

    pub fn id(&self) -> &str {
        self.doc.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn object(&self) -> &str {
        self.doc
            .get("object")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn created(&self) -> i64 {
        self.doc
            .get("created")
            .and_then(Value::as_i64)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.doc.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.doc.get(key).and_then(Value::as_str)
    }

    pub fn int_field(&self, key: &str) -> Option<i64> {
        self.doc.get(key).and_then(Value::as_i64)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.doc.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.doc.remove(key)
    }

    /// Overlay caller-provided fields, skipping immutable keys and dropping
    /// null-valued fields instead of storing them.
    pub fn merge(&mut self, overlay: &Document, extra_immutable: &[&str]) {
        for (key, value) in overlay {
            if BASE_IMMUTABLE.contains(&key.as_str()) || extra_immutable.contains(&key.as_str()) {
                continue;
            }
            if value.is_null() {
                self.doc.remove(key);
            } else {
                self.doc.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.doc)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.doc.clone())
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.doc.serialize(serializer)
    }
}

/// `<prefix>_<16 lowercase hex chars>`: a 128-bit random suffix truncated to
/// 16 characters after the underscore.
pub fn generate_id(prefix: &str) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut suffix = hex::encode(bytes);
    suffix.truncate(16);
    format!("{prefix}_{suffix}")
}

/// The prefix portion of an id (`cus_123` → `cus`), when it has one.
pub fn id_prefix(id: &str) -> Option<&str> {
    id.split_once('_').map(|(prefix, _)| prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_resource_carries_guaranteed_attributes() {
        let resource = Resource::new("customer", "cus_1".to_string(), 42);
        assert_eq!(resource.id(), "cus_1");
        assert_eq!(resource.object(), "customer");
        assert_eq!(resource.created(), 42);
        assert_eq!(resource.get("livemode"), Some(&Value::Bool(false)));
        assert!(resource.get("metadata").is_some_and(Value::is_object));
    }

    #[test]
    fn merge_skips_immutables_and_drops_nulls() {
        let mut resource = Resource::new("customer", "cus_1".to_string(), 42);
        resource.set("email", json!("a@b.com"));
        let overlay = json!({
            "id": "cus_other",
            "created": 99,
            "email": null,
            "name": "Alice"
        });
        let Value::Object(overlay) = overlay else {
            unreachable!()
        };
        resource.merge(&overlay, &[]);
        assert_eq!(resource.id(), "cus_1");
        assert_eq!(resource.created(), 42);
        assert!(resource.get("email").is_none());
        assert_eq!(resource.str_field("name"), Some("Alice"));
    }

    #[test]
    fn merge_respects_extra_immutables() {
        let mut resource = Resource::new("subscription_item", "si_1".to_string(), 1);
        resource.set("subscription", json!("sub_1"));
        let Value::Object(overlay) = json!({"subscription": "sub_2", "quantity": 3}) else {
            unreachable!()
        };
        resource.merge(&overlay, &["subscription"]);
        assert_eq!(resource.str_field("subscription"), Some("sub_1"));
        assert_eq!(resource.int_field("quantity"), Some(3));
    }

    #[test]
    fn generated_ids_have_prefix_and_16_hex_chars() {
        let id = generate_id("cus");
        let (prefix, suffix) = id.split_once('_').expect("underscore");
        assert_eq!(prefix, "cus");
        assert_eq!(suffix.len(), 16);
        assert!(suffix.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_ne!(generate_id("cus"), id);
    }

    #[test]
    fn id_prefix_splits_on_first_underscore() {
        assert_eq!(id_prefix("pm_card_visa"), Some("pm"));
        assert_eq!(id_prefix("noprefix"), None);
    }

    #[test]
    fn from_document_requires_identity() {
        let Value::Object(doc) = json!({"id": "cus_1"}) else {
            unreachable!()
        };
        assert!(Resource::from_document(doc).is_none());
    }
}
