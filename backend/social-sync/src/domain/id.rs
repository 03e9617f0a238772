use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

const TEMP_PREFIX: &str = "temp-";

/// Opaque entity identifier, normalized to its string form
///
/// Rows coming from different tables (or deployments) may carry numeric or
/// textual ids; `7` and `"7"` normalize to the same `EntityId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh local id for an optimistic entry awaiting confirmation
    pub fn temporary() -> Self {
        Self(format!("{TEMP_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalize a JSON cell into an id; empty strings, nulls and
    /// structured values are not ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
            }
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// JSON form for writes; numeric ids are written back as numbers so
    /// integer key columns keep their type.
    pub fn to_value(&self) -> Value {
        match self.0.parse::<i64>() {
            Ok(n) if n.to_string() == self.0 => Value::from(n),
            _ => Value::String(self.0.clone()),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<Uuid> for EntityId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

/// String key used when comparing JSON cells loosely (filters, dedup)
pub fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_and_textual_ids_normalize_equal() {
        assert_eq!(
            EntityId::from_value(&json!(42)),
            EntityId::from_value(&json!("42"))
        );
        assert_eq!(EntityId::from_value(&json!("  ")), None);
        assert_eq!(EntityId::from_value(&json!(null)), None);
    }

    #[test]
    fn temporary_ids_are_marked() {
        let id = EntityId::temporary();
        assert!(id.is_temporary());
        assert!(!EntityId::from("17").is_temporary());
    }

    #[test]
    fn to_value_keeps_numeric_type() {
        assert_eq!(EntityId::from("17").to_value(), json!(17));
        assert_eq!(EntityId::from("017").to_value(), json!("017"));
        assert_eq!(EntityId::from("abc").to_value(), json!("abc"));
    }
}
