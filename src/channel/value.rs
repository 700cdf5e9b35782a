//! Typed property extraction
//!
//! The daemon's marshalling occasionally yields a value of the wrong wire
//! type (a charging flag as an integer, a missing capability list). Mirrored
//! properties never fail on that: the `*_or_default` readers log a
//! [`ModelError::TypeMismatch`] and substitute a safe default.
//!
//! Replies the caller explicitly asked for (e.g. `ListDevices`) use the
//! strict readers instead, which turn a bad shape into a channel error.

use crate::error::{ModelError, Result};
use serde_json::Value;
use tracing::{debug, warn};

fn mismatch(property: &str, expected: &'static str, value: &Value) {
    warn!(
        "{} (got {}), using default",
        ModelError::type_mismatch(property, expected),
        value
    );
}

/// Boolean property; `false` when missing or not a boolean
pub fn bool_or_default(property: &str, value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            mismatch(property, "boolean", other);
            false
        }
        None => {
            debug!("Property '{}' missing, assuming false", property);
            false
        }
    }
}

/// String property; empty when missing or not a string
pub fn string_or_default(property: &str, value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => {
            mismatch(property, "string", other);
            String::new()
        }
        None => {
            debug!("Property '{}' missing, assuming empty", property);
            String::new()
        }
    }
}

/// Unsigned 32-bit property; `0` when missing, negative, too large or not a number
pub fn u32_or_default(property: &str, value: Option<&Value>) -> u32 {
    match value {
        Some(v) => match v.as_u64().and_then(|n| u32::try_from(n).ok()) {
            Some(n) => n,
            None => {
                mismatch(property, "uint32", v);
                0
            }
        },
        None => {
            debug!("Property '{}' missing, assuming 0", property);
            0
        }
    }
}

/// String-list property; non-string entries are dropped
pub fn string_list_or_default(property: &str, value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                other => {
                    mismatch(property, "string", other);
                    None
                }
            })
            .collect(),
        Some(other) => {
            mismatch(property, "array of strings", other);
            Vec::new()
        }
        None => {
            debug!("Property '{}' missing, assuming empty list", property);
            Vec::new()
        }
    }
}

/// Strict string list, for replies whose shape the caller depends on
pub fn string_list(what: &str, value: &Value) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| ModelError::channel(format!("{}: expected an array, got {}", what, value)))?;

    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                ModelError::channel(format!("{}: expected strings, got {}", what, item))
            })
        })
        .collect()
}
