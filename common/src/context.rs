// Execution context: restart-durable key/value state scoped to one execution

use crate::errors::ContextError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// ExecutionContext stores namespaced values that survive restarts of the
/// execution that owns it. Values are kept as JSON so the whole context can
/// be persisted and reloaded by the repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: HashMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Get the raw JSON value stored under a key
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    /// Get a value under a key, deserialized into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ContextError> {
        match self.entries.get(key) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| ContextError::Deserialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|v| v.as_str())
    }

    /// Store a value under a key, replacing any previous value
    pub fn put<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), ContextError> {
        let value = serde_json::to_value(value).map_err(|e| ContextError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.put_value(key, value);
        Ok(())
    }

    pub fn put_value(&mut self, key: &str, value: serde_json::Value) {
        self.entries.insert(key.to_string(), value);
    }

    /// Store a value only if the key is not present yet.
    /// Returns true if the value was stored.
    pub fn put_if_absent<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
    ) -> Result<bool, ContextError> {
        if self.contains_key(key) {
            return Ok(false);
        }
        self.put(key, value)?;
        Ok(true)
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_and_get_typed_value() {
        let mut context = ExecutionContext::new();
        context.put("batch.count", &42u64).unwrap();

        assert_eq!(context.get_as::<u64>("batch.count").unwrap(), Some(42));
    }

    #[test]
    fn test_get_as_missing_key_is_none() {
        let context = ExecutionContext::new();
        assert_eq!(context.get_as::<String>("missing").unwrap(), None);
    }

    #[test]
    fn test_get_as_wrong_type_is_error() {
        let mut context = ExecutionContext::new();
        context.put_value("batch.name", json!("not-a-number"));

        let result = context.get_as::<u64>("batch.name");
        assert!(matches!(
            result,
            Err(ContextError::Deserialization { ref key, .. }) if key == "batch.name"
        ));
    }

    #[test]
    fn test_put_if_absent_keeps_first_value() {
        let mut context = ExecutionContext::new();
        assert!(context.put_if_absent("run", "first").unwrap());
        assert!(!context.put_if_absent("run", "second").unwrap());
        assert_eq!(context.get_string("run"), Some("first"));
    }

    #[test]
    fn test_context_survives_reload() {
        let mut context = ExecutionContext::new();
        context.put("key", "value").unwrap();

        let json = serde_json::to_string(&context).unwrap();
        let mut reloaded: ExecutionContext = serde_json::from_str(&json).unwrap();

        assert_eq!(reloaded.get_string("key"), Some("value"));
        assert!(reloaded.remove("key").is_some());
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_non_finite_value_is_rejected() {
        let mut context = ExecutionContext::new();
        let parameters = crate::models::JobParameters::builder()
            .add_double("ratio", f64::INFINITY)
            .build();

        let result = context.put("batch.jobStep.jobParameters", &parameters);

        assert!(matches!(
            result,
            Err(ContextError::Serialization { ref key, .. }) if key == "batch.jobStep.jobParameters"
        ));
        assert!(context.is_empty());
    }
}
