//! Content fingerprints used to decide whether an entity changed.
//!
//! Content is rendered to canonical JSON (object keys sorted, operation
//! parameters sorted by location and name) and hashed with SHA-256; the first
//! eight bytes of the digest form the fingerprint. Equal fingerprints are
//! treated as equal content; 64-bit collisions are not handled.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::model::{ComponentContent, OperationContent, OperationKey};

/// Fingerprint of an operation: method, path and all client-visible content
pub fn fingerprint_operation(key: &OperationKey, content: &OperationContent) -> i64 {
    // Map keys are strings, so serialization cannot fail
    let mut content = serde_json::to_value(content).unwrap_or(Value::Null);
    if let Some(Value::Array(parameters)) = content.get_mut("parameters") {
        parameters.sort_by_key(parameter_sort_key);
    }

    let mut hasher = Sha256::new();
    hasher.update(format!("method:{}\n", key.method));
    hasher.update(format!("path:{}\n", key.path));
    hasher.update(format!("content:{}\n", canonical_json(&content)));
    truncate_digest(&hasher.finalize())
}

/// Fingerprint of a component: kind and serialized model
pub fn fingerprint_component(content: &ComponentContent) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(format!("kind:{}\n", content.kind.as_str()));
    hasher.update(format!("model:{}\n", canonical_json(&content.model)));
    truncate_digest(&hasher.finalize())
}

/// Fingerprint of an arbitrary JSON value
pub fn fingerprint_value(value: &Value) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value));
    truncate_digest(&hasher.finalize())
}

/// Hex form used in logs and API payloads
pub fn fingerprint_hex(fingerprint: i64) -> String {
    hex::encode(fingerprint.to_be_bytes())
}

fn truncate_digest(digest: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Parameters are identified by (in, name); `$ref` parameters by their target
fn parameter_sort_key(parameter: &Value) -> (String, String, String) {
    let field = |name: &str| {
        parameter
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    (field("in"), field("name"), field("$ref"))
}

/// Render JSON with object keys in sorted order, independent of insertion order
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
