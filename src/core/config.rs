//! Live configuration tree.
//!
//! Configuration is kept as a JSON tree addressed with dotted keys
//! (`remote.connections.production`). The project file may be JSON or TOML;
//! both land in the same tree. The tree is mutable for the lifetime of one
//! invocation so credentials can be mirrored into it.

use crate::error::{Error, Result};
use crate::local_files::{self, FileSystem};
use serde_json::{Map, Value};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Config {
    data: Value,
}

impl Config {
    pub fn new(data: Value) -> Self {
        let data = if data.is_object() {
            data
        } else {
            Value::Object(Map::new())
        };
        Self { data }
    }

    /// Load a project configuration file. `.toml` files are parsed as TOML,
    /// everything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = local_files::local().read(path)?;
        let display = path.display().to_string();

        let data: Value = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| Error::config_invalid_json(display, e.to_string()))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::config_invalid_json(display, e.to_string()))?
        };

        if !data.is_object() {
            return Err(Error::config_invalid_value(
                "<root>",
                None,
                "Configuration must be an object",
            ));
        }

        Ok(Self::new(data))
    }

    pub fn as_value(&self) -> &Value {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        get_path(&self.data, key).filter(|v| !v.is_null())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    /// Read a key that may hold either one string or a list of strings.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        value_to_string_list(self.get(key))
    }

    pub fn set(&mut self, key: &str, value: Value) {
        set_path(&mut self.data, key, value);
    }
}

// ============================================================================
// Dotted-key access (internal)
// ============================================================================

/// Resolve a dotted key. Numeric segments index into arrays.
pub(crate) fn get_path<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    if key.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for segment in key.split('.') {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a dotted key, creating intermediate objects as needed.
pub(crate) fn set_path(root: &mut Value, key: &str, value: Value) {
    if key.is_empty() {
        *root = value;
        return;
    }

    let mut current = root;
    for segment in key.split('.') {
        let index = segment.parse::<usize>().ok();
        current = match (current, index) {
            (Value::Array(arr), Some(index)) => {
                if arr.len() <= index {
                    arr.resize(index + 1, Value::Null);
                }
                &mut arr[index]
            }
            (other, _) => ensure_object(other)
                .entry(segment.to_string())
                .or_insert(Value::Null),
        };
    }
    *current = value;
}

/// Coerce a value into an object. Arrays become index-keyed objects, scalars
/// are discarded.
fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        let converted: Map<String, Value> = match std::mem::take(value) {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            _ => Map::new(),
        };
        *value = Value::Object(converted);
    }

    match value {
        Value::Object(obj) => obj,
        _ => unreachable!("value was converted to an object above"),
    }
}

/// Recursive replacement merge: objects merge per key, arrays merge per
/// index, anything else is replaced by the patch value.
pub(crate) fn replace_recursive(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_obj), Value::Object(patch_obj)) => {
            for (key, value) in patch_obj {
                match base_obj.get_mut(&key) {
                    Some(existing) => replace_recursive(existing, value),
                    None => {
                        base_obj.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base_arr), Value::Array(patch_arr)) => {
            for (idx, value) in patch_arr.into_iter().enumerate() {
                if idx < base_arr.len() {
                    replace_recursive(&mut base_arr[idx], value);
                } else {
                    base_arr.push(value);
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

pub(crate) fn value_to_string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}
