//! Typed access to tool call arguments.
//!
//! Tagged calls deliver every scalar as text unless the schema told the
//! parser otherwise, so the numeric and boolean getters accept string
//! spellings as well.

use crate::error::RuntimeError;

/// Wrapper around tool call arguments providing typed extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: serde_json::Value,
}

fn missing(kind: &str, key: &str) -> RuntimeError {
    RuntimeError::InvalidArgument(format!("Missing {kind} argument: {key}"))
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, RuntimeError> {
        self.get_str_opt(key).ok_or_else(|| missing("string", key))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    /// Get an integer argument, accepting a decimal string.
    pub fn get_i64(&self, key: &str) -> Result<i64, RuntimeError> {
        match self.value.get(key) {
            Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
            Some(v) => v.as_i64(),
            None => None,
        }
        .ok_or_else(|| missing("integer", key))
    }

    /// Get a boolean argument, accepting `"true"`/`"false"`.
    pub fn get_bool(&self, key: &str) -> Result<bool, RuntimeError> {
        match self.value.get(key) {
            Some(serde_json::Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            Some(v) => v.as_bool(),
            None => None,
        }
        .ok_or_else(|| missing("boolean", key))
    }

    /// Get an array argument.
    pub fn get_array(&self, key: &str) -> Result<&Vec<serde_json::Value>, RuntimeError> {
        self.value
            .get(key)
            .and_then(|v| v.as_array())
            .ok_or_else(|| missing("array", key))
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, RuntimeError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            RuntimeError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_spellings_are_accepted_for_scalars() {
        let args = ToolArguments::new(serde_json::json!({
            "count": "42",
            "flag": "True",
            "native": 7,
        }));
        assert_eq!(args.get_i64("count").unwrap(), 42);
        assert_eq!(args.get_i64("native").unwrap(), 7);
        assert!(args.get_bool("flag").unwrap());
    }

    #[test]
    fn missing_keys_are_invalid_arguments() {
        let args = ToolArguments::new(serde_json::json!({"name": "x"}));
        assert!(matches!(
            args.get_str("path"),
            Err(RuntimeError::InvalidArgument(msg)) if msg == "Missing string argument: path"
        ));
        assert_eq!(args.get_str_opt("name"), Some("x"));
    }

    #[test]
    fn deserialize_into_struct() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Params {
            path: String,
            limit: Option<u32>,
        }
        let args = ToolArguments::new(serde_json::json!({"path": "a.txt"}));
        let params: Params = args.deserialize().unwrap();
        assert_eq!(
            params,
            Params {
                path: "a.txt".into(),
                limit: None
            }
        );
    }
}
