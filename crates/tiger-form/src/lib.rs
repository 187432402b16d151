//! Wire-shape parsers for the mock payments API.
//!
//! The upstream wire contract encodes nested structures in
//! `application/x-www-form-urlencoded` bodies using bracket notation:
//! `metadata[plan]=pro`, `items[0][price]=price_x`, `expand[]=customer`.
//! This crate turns decoded key/value pairs into a nested
//! [`serde_json::Value`] document and parses expansion paths.
//!
//! Limits enforced here (violations surface as HTTP 400 upstream):
//! - at most 1000 parameters per request
//! - bracket nesting depth at most 10
//! - explicit array indices at most 1000

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

pub const MAX_PARAMS: usize = 1000;
pub const MAX_DEPTH: usize = 10;
pub const MAX_INDEX: u64 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("too many parameters: {0} exceeds the limit of {MAX_PARAMS}")]
    TooManyParams(usize),
    #[error("parameter `{0}` exceeds the nesting depth limit of {MAX_DEPTH}")]
    DepthExceeded(String),
    #[error("parameter `{key}` uses array index {index}, above the limit of {MAX_INDEX}")]
    IndexTooLarge { key: String, index: u64 },
    #[error("invalid parameter `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },
}

/// One segment of a bracketed key: `items[0][price]` splits into
/// `Name("items"), Index(0), Name("price")`.
#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Name(String),
    Index(u64),
    Append,
}

/// Intermediate tree; sequences keep explicit indices so `k[1]` before
/// `k[0]` still lands in integer order.
#[derive(Debug)]
enum Node {
    Leaf(Value),
    Map(BTreeMap<String, Node>),
    Seq(BTreeMap<u64, Node>),
}

/// Split a raw percent-decoded query or form body into key/value pairs.
/// Pairs without `=` parse as a key with an empty value.
pub fn parse_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (decode(key), decode(value)),
            None => (decode(part), String::new()),
        })
        .collect()
}

fn decode(part: &str) -> String {
    // '+' means space in form encoding; percent sequences handled by urlencoding.
    let spaced = part.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|cow| cow.into_owned())
        .unwrap_or(spaced)
}

/// Build a nested JSON document from bracketed form pairs.
pub fn unflatten(pairs: &[(String, String)]) -> Result<Value, FormError> {
    if pairs.len() > MAX_PARAMS {
        return Err(FormError::TooManyParams(pairs.len()));
    }
    let mut root: BTreeMap<String, Node> = BTreeMap::new();
    for (key, value) in pairs {
        let segments = parse_segments(key)?;
        insert(&mut root, key, &segments, coerce_scalar(value))?;
    }
    Ok(node_to_value(Node::Map(root)))
}

fn parse_segments(key: &str) -> Result<Vec<Segment>, FormError> {
    let invalid = |reason: &str| FormError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    let open = match key.find('[') {
        None => {
            if key.is_empty() {
                return Err(invalid("empty parameter name"));
            }
            return Ok(vec![Segment::Name(key.to_string())]);
        }
        Some(0) => return Err(invalid("missing top-level name before `[`")),
        Some(open) => open,
    };
    let mut segments = vec![Segment::Name(key[..open].to_string())];
    let mut rest = &key[open..];
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(invalid("unexpected characters after `]`"));
        }
        let close = rest.find(']').ok_or_else(|| invalid("unbalanced `[`"))?;
        let inner = &rest[1..close];
        let segment = if inner.is_empty() {
            Segment::Append
        } else if inner.bytes().all(|b| b.is_ascii_digit()) {
            let index: u64 = inner
                .parse()
                .map_err(|_| invalid("array index out of range"))?;
            if index > MAX_INDEX {
                return Err(FormError::IndexTooLarge {
                    key: key.to_string(),
                    index,
                });
            }
            Segment::Index(index)
        } else {
            Segment::Name(inner.to_string())
        };
        segments.push(segment);
        rest = &rest[close + 1..];
    }
    if segments.len() > MAX_DEPTH {
        return Err(FormError::DepthExceeded(key.to_string()));
    }
    // `[]` only makes sense as the final segment; `k[][sub]` has no
    // well-defined element to descend into.
    if segments[..segments.len() - 1]
        .iter()
        .any(|segment| *segment == Segment::Append)
    {
        return Err(invalid("`[]` must be the final segment"));
    }
    Ok(segments)
}

fn insert(
    root: &mut BTreeMap<String, Node>,
    key: &str,
    segments: &[Segment],
    value: Value,
) -> Result<(), FormError> {
    let conflict = || FormError::InvalidKey {
        key: key.to_string(),
        reason: "conflicts with an earlier parameter of a different shape".to_string(),
    };
    let Segment::Name(head) = &segments[0] else {
        return Err(conflict());
    };
    let mut node = root
        .entry(head.clone())
        .or_insert_with(|| empty_for(segments.get(1)));
    for position in 1..segments.len() {
        match &segments[position] {
            Segment::Name(name) => {
                let Node::Map(map) = node else {
                    return Err(conflict());
                };
                node = map
                    .entry(name.clone())
                    .or_insert_with(|| empty_for(segments.get(position + 1)));
            }
            Segment::Index(index) => {
                let Node::Seq(seq) = node else {
                    return Err(conflict());
                };
                node = seq
                    .entry(*index)
                    .or_insert_with(|| empty_for(segments.get(position + 1)));
            }
            Segment::Append => {
                let Node::Seq(seq) = node else {
                    return Err(conflict());
                };
                let next = seq.keys().next_back().map_or(0, |last| last + 1);
                seq.insert(next, Node::Leaf(value));
                return Ok(());
            }
        }
    }
    match node {
        Node::Leaf(slot) => *slot = value,
        _ => return Err(conflict()),
    }
    Ok(())
}

/// Shape of the container a segment's *successor* needs; a leaf when the
/// segment is terminal.
fn empty_for(next: Option<&Segment>) -> Node {
    match next {
        None => Node::Leaf(Value::Null),
        Some(Segment::Name(_)) => Node::Map(BTreeMap::new()),
        Some(Segment::Index(_)) | Some(Segment::Append) => Node::Seq(BTreeMap::new()),
    }
}

fn node_to_value(node: Node) -> Value {
    match node {
        Node::Leaf(value) => value,
        Node::Map(map) => Value::Object(
            map.into_iter()
                .map(|(key, child)| (key, node_to_value(child)))
                .collect::<Map<String, Value>>(),
        ),
        Node::Seq(seq) => Value::Array(seq.into_values().map(node_to_value).collect()),
    }
}

/// Form values arrive as strings; integers and booleans that the mock's
/// arithmetic depends on (amounts, flags) are coerced, everything else stays
/// a string.
fn coerce_scalar(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "" => return Value::String(String::new()),
        _ => {}
    }
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(number) = raw.parse::<i64>() {
            return Value::Number(number.into());
        }
    }
    Value::String(raw.to_string())
}

/// Collect `expand[]` (repeated) or `expand` (singular) into dotted paths.
pub fn expand_paths(params: &Value) -> Vec<String> {
    match params.get("expand") {
        Some(Value::String(path)) => vec![path.clone()],
        Some(Value::Array(paths)) => paths
            .iter()
            .filter_map(|path| path.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(raw: &str) -> Vec<(String, String)> {
        parse_pairs(raw)
    }

    #[test]
    fn flat_keys() {
        let doc = unflatten(&pairs("email=a%40b.com&name=Alice")).expect("doc");
        assert_eq!(doc, json!({"email": "a@b.com", "name": "Alice"}));
    }

    #[test]
    fn nested_maps() {
        let doc = unflatten(&pairs("metadata[plan]=pro&metadata[seats]=5")).expect("doc");
        assert_eq!(doc, json!({"metadata": {"plan": "pro", "seats": 5}}));
    }

    #[test]
    fn indexed_arrays_sort_by_integer_index() {
        let doc = unflatten(&pairs("items[1][price]=price_b&items[0][price]=price_a")).expect("doc");
        assert_eq!(
            doc,
            json!({"items": [{"price": "price_a"}, {"price": "price_b"}]})
        );
    }

    #[test]
    fn append_syntax_accumulates() {
        let doc = unflatten(&pairs("expand[]=customer&expand[]=customer.default_source"))
            .expect("doc");
        assert_eq!(
            doc,
            json!({"expand": ["customer", "customer.default_source"]})
        );
        assert_eq!(
            expand_paths(&doc),
            vec!["customer".to_string(), "customer.default_source".to_string()]
        );
    }

    #[test]
    fn singular_expand_is_accepted() {
        let doc = unflatten(&pairs("expand=customer")).expect("doc");
        assert_eq!(expand_paths(&doc), vec!["customer".to_string()]);
    }

    #[test]
    fn plus_decodes_to_space() {
        let doc = unflatten(&pairs("name=Alice+Smith")).expect("doc");
        assert_eq!(doc, json!({"name": "Alice Smith"}));
    }

    #[test]
    fn integer_and_bool_coercion() {
        let doc = unflatten(&pairs("unit_amount=2000&negative=-3&flag=true&zip=02134x"))
            .expect("doc");
        assert_eq!(
            doc,
            json!({"unit_amount": 2000, "negative": -3, "flag": true, "zip": "02134x"})
        );
    }

    #[test]
    fn index_above_limit_rejected() {
        let err = unflatten(&pairs("k[999999]=v")).expect_err("index");
        assert!(matches!(err, FormError::IndexTooLarge { index: 999_999, .. }));
    }

    #[test]
    fn depth_above_limit_rejected() {
        let key = format!("k{}", "[a]".repeat(10));
        let err = unflatten(&[(key, "v".to_string())]).expect_err("depth");
        assert!(matches!(err, FormError::DepthExceeded(_)));
    }

    #[test]
    fn depth_at_limit_accepted() {
        let key = format!("k{}", "[a]".repeat(9));
        assert!(unflatten(&[(key, "v".to_string())]).is_ok());
    }

    #[test]
    fn too_many_params_rejected() {
        let many: Vec<(String, String)> = (0..=MAX_PARAMS)
            .map(|n| (format!("k{n}"), "v".to_string()))
            .collect();
        assert!(matches!(
            unflatten(&many),
            Err(FormError::TooManyParams(_))
        ));
    }

    #[test]
    fn conflicting_shapes_rejected() {
        let err = unflatten(&pairs("k=v&k[sub]=v2")).expect_err("conflict");
        assert!(matches!(err, FormError::InvalidKey { .. }));
    }

    #[test]
    fn malformed_brackets_rejected() {
        assert!(unflatten(&pairs("k[unclosed=v")).is_err());
        assert!(unflatten(&pairs("[]=v")).is_err());
        assert!(unflatten(&pairs("k[]x=v")).is_err());
    }

    #[test]
    fn last_value_wins_for_duplicate_scalars() {
        let doc = unflatten(&pairs("a=1&a=2")).expect("doc");
        assert_eq!(doc, json!({"a": 2}));
    }
}
