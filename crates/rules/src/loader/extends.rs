//! Deep-merge and `extends` inheritance resolution for policy documents.

use std::collections::{HashMap, HashSet};

use serde_yaml::Value;

/// Longest allowed inheritance chain.
const MAX_EXTENDS_DEPTH: usize = 5;

/// Deep-merge two YAML values: child fields win, sequences replace entirely.
pub fn deep_merge(parent: &Value, child: &Value) -> Value {
    match (parent, child) {
        (Value::Mapping(pm), Value::Mapping(cm)) => {
            let mut merged = pm.clone();
            for (key, child_val) in cm {
                match pm.get(key) {
                    Some(parent_val) => {
                        merged.insert(key.clone(), deep_merge(parent_val, child_val));
                    }
                    None => {
                        merged.insert(key.clone(), child_val.clone());
                    }
                }
            }
            Value::Mapping(merged)
        }
        (_, child) => child.clone(),
    }
}

/// Resolve the `metadata.extends` chain of one document in `raw_values`,
/// keyed by community. The inherited `metadata` block is replaced by the
/// child's own so `community`, `enabled` and `extends` are never inherited.
pub fn resolve_extends(
    id: &str,
    raw_values: &HashMap<String, Value>,
) -> std::result::Result<Value, String> {
    let mut resolved = HashMap::new();
    let mut in_progress = HashSet::new();
    resolve_single(id, raw_values, &mut resolved, &mut in_progress, 0)
}

fn resolve_single(
    id: &str,
    raw_values: &HashMap<String, Value>,
    resolved: &mut HashMap<String, Value>,
    in_progress: &mut HashSet<String>,
    depth: usize,
) -> std::result::Result<Value, String> {
    if let Some(val) = resolved.get(id) {
        return Ok(val.clone());
    }

    if in_progress.contains(id) {
        return Err(format!("circular extends chain detected for community '{id}'"));
    }

    if depth > MAX_EXTENDS_DEPTH {
        return Err(format!(
            "extends chain exceeds maximum depth ({MAX_EXTENDS_DEPTH}) for community '{id}'"
        ));
    }

    let raw = raw_values
        .get(id)
        .ok_or_else(|| format!("community '{id}' not found for extends resolution"))?
        .clone();

    let parent_id = metadata_field(&raw, "extends").map(|s| s.to_lowercase());

    let result = match parent_id {
        Some(ref parent_id) => {
            in_progress.insert(id.to_string());
            let parent_val = resolve_single(parent_id, raw_values, resolved, in_progress, depth + 1)?;
            in_progress.remove(id);
            let mut merged = deep_merge(&parent_val, &raw);
            if let (Value::Mapping(m), Some(own_meta)) = (&mut merged, raw.get("metadata")) {
                m.insert(Value::String("metadata".to_string()), own_meta.clone());
            }
            merged
        }
        None => raw,
    };

    resolved.insert(id.to_string(), result.clone());
    Ok(result)
}

/// String field of the `metadata` block, if present.
pub(super) fn metadata_field<'a>(doc: &'a Value, field: &str) -> Option<&'a str> {
    doc.get("metadata")?.get(field)?.as_str()
}
