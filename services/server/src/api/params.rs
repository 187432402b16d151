//! Request parameter assembly.
//!
//! Bodies arrive as bracketed form encoding or JSON; query strings always
//! use the bracket grammar. Query and body documents are merged (body wins)
//! and `expand` is split off into hydration paths.

use crate::api::error::{self, ApiError};
use crate::catalog::ResourceSpec;
use crate::model::Document;
use crate::store::ListParams;
use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::header;
use serde_json::Value;
use tiger_form::{expand_paths, parse_pairs, unflatten};

const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Parse query + body into one document, returning `(params, expand_paths)`.
/// The `expand` key is removed from the document so it never lands on a
/// stored resource.
pub async fn read_params(req: Request) -> Result<(Document, Vec<String>), ApiError> {
    let (parts, body) = req.into_parts();
    let mut merged = Document::new();

    if let Some(query) = parts.uri.query() {
        merge_document(&mut merged, unflatten(&parse_pairs(query)).map_err(form_error)?);
    }

    let bytes = to_bytes(body, BODY_LIMIT)
        .await
        .map_err(|_| error::invalid_request("Request body too large."))?;
    if !bytes.is_empty() {
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if content_type.starts_with("application/json") {
            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|_| error::invalid_request("Invalid JSON body."))?;
            let Value::Object(doc) = value else {
                return Err(error::invalid_request("JSON body must be an object."));
            };
            merge_document(&mut merged, Value::Object(doc));
        } else {
            let text = String::from_utf8_lossy(&bytes);
            merge_document(&mut merged, unflatten(&parse_pairs(&text)).map_err(form_error)?);
        }
    }

    let expand = expand_paths(&Value::Object(merged.clone()));
    merged.remove("expand");
    Ok((merged, expand))
}

fn merge_document(target: &mut Document, source: Value) {
    if let Value::Object(source) = source {
        for (key, value) in source {
            target.insert(key, value);
        }
    }
}

pub fn form_error(err: tiger_form::FormError) -> ApiError {
    error::invalid_request(err.to_string())
}

/// Cursor options plus the filters this resource allows.
pub fn list_params(doc: &Document, spec: &ResourceSpec) -> ListParams {
    ListParams {
        limit: doc.get("limit").and_then(Value::as_i64),
        starting_after: doc
            .get("starting_after")
            .and_then(Value::as_str)
            .map(str::to_string),
        ending_before: doc
            .get("ending_before")
            .and_then(Value::as_str)
            .map(str::to_string),
        filters: spec
            .list_filters
            .iter()
            .filter_map(|key| doc.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect(),
    }
}
