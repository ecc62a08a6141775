//! Default-valued field access over loosely structured source payloads.
//!
//! Every adapter reads its response through [`FieldLookup`] so a missing or
//! null key degrades to a neutral default instead of failing the record.
//! Paths are `/`-separated; numeric segments index into arrays.

use std::collections::HashMap;
use serde_json::Value;

/// Neutral placeholder for absent values.
pub const NOT_AVAILABLE: &str = "N/A";

pub trait FieldLookup {
    /// Non-empty text at `path`, if present.
    fn lookup(&self, path: &str) -> Option<String>;

    fn get_or(&self, path: &str, default: &str) -> String {
        self.lookup(path).unwrap_or_else(|| default.to_string())
    }

    /// First path that resolves, in order.
    fn first_of(&self, paths: &[&str]) -> Option<String> {
        paths.iter().find_map(|p| self.lookup(p))
    }
}

impl FieldLookup for Value {
    fn lookup(&self, path: &str) -> Option<String> {
        scalar_text(self.pointer(&format!("/{}", path))?)
    }
}

/// Flattened element-path → text map, as produced by the XML adapters.
impl FieldLookup for HashMap<String, String> {
    fn lookup(&self, path: &str) -> Option<String> {
        self.get(path)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
    }
}

/// Join the items of the array at `path` with `sep`. When `field` is given,
/// each item is an object and that field is read from it. Items that do not
/// resolve are skipped; an empty result is `None`.
pub fn join_array(value: &Value, path: &str, field: Option<&str>, sep: &str) -> Option<String> {
    let items = value.pointer(&format!("/{}", path))?.as_array()?;
    let parts: Vec<String> = items
        .iter()
        .filter_map(|item| match field {
            Some(f) => item.lookup(f),
            None => scalar_text(item),
        })
        .collect();
    if parts.is_empty() { None } else { Some(parts.join(sep)) }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
