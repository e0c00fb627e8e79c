//! Per-field validation helpers for JSON patch payloads.

use gatekeeper_core::{FieldError, GateError};
use serde_json::{Map, Value};

/// Collects every field error in a payload so they can be reported at once.
#[derive(Debug, Default)]
pub(crate) struct FieldErrors {
    errors: Vec<FieldError>,
}

impl FieldErrors {
    pub(crate) fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Record the error of a single-field parse and pass the value through.
    pub(crate) fn take<T>(&mut self, field: &str, parsed: Result<T, String>) -> Option<T> {
        match parsed {
            Ok(v) => Some(v),
            Err(message) => {
                self.push(field, message);
                None
            }
        }
    }

    pub(crate) fn finish(self) -> gatekeeper_core::Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(GateError::Validation(self.errors))
        }
    }
}

pub(crate) fn object<'a>(value: &'a Value, field: &str) -> gatekeeper_core::Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        let field = if field.is_empty() { "body" } else { field };
        GateError::invalid(field, "expected a JSON object")
    })
}

pub(crate) fn string(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected a string, got {}", kind(value)))
}

pub(crate) fn boolean(value: &Value) -> Result<bool, String> {
    value
        .as_bool()
        .ok_or_else(|| format!("expected a boolean, got {}", kind(value)))
}

/// A strictly positive integer that fits a `u32`.
pub(crate) fn positive(value: &Value) -> Result<u32, String> {
    match value.as_u64() {
        Some(0) => Err("must be a positive integer".into()),
        Some(n) => u32::try_from(n).map_err(|_| format!("must be at most {}", u32::MAX)),
        None => Err(format!("must be a positive integer, got {}", kind(value))),
    }
}

pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
