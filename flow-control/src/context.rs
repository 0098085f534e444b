use dashmap::DashMap;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::StorageError;

/// Storage values keyed by name, as they travel between flows.
pub type StorageMap = Map<String, Value>;

/// Validated name of a storage item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageName(String);

impl StorageName {
    pub fn new(name: impl Into<String>) -> Result<Self, StorageError> {
        let name = name.into();
        if name.is_empty() {
            return Err(StorageError::EmptyName);
        }
        if !name.chars().all(is_storage_char) {
            return Err(StorageError::InvalidName { name });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_storage_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.')
}

impl fmt::Display for StorageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for StorageName {
    type Error = StorageError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Flow-local storage for passing data into or out of a pipeline
#[derive(Clone, Debug)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    pub fn set(
        &self,
        name: &StorageName,
        value: impl serde::Serialize,
    ) -> Result<(), StorageError> {
        let value = serde_json::to_value(value).map_err(|e| StorageError::Serialization {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        self.data.insert(name.to_string(), value);
        Ok(())
    }

    pub fn set_value(&self, name: &StorageName, value: Value) {
        self.data.insert(name.to_string(), value);
    }

    pub fn get<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.data
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_value(&self, name: &str) -> Option<Value> {
        self.data.get(name).map(|entry| entry.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.data.remove(name).map(|(_, v)| v)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Copies the current values of `names` out of this storage.
    ///
    /// Fails on the first name that has no value, so a caller never ships a
    /// partially populated map.
    pub fn snapshot(&self, names: &[StorageName]) -> Result<StorageMap, StorageError> {
        let mut map = StorageMap::new();
        for name in names {
            let value = self
                .get_value(name.as_str())
                .ok_or_else(|| StorageError::Missing(name.to_string()))?;
            map.insert(name.to_string(), value);
        }
        Ok(map)
    }

    /// Inserts every entry of `items`, replacing existing values.
    pub fn extend(&self, items: StorageMap) -> Result<(), StorageError> {
        for (name, value) in items {
            let name = StorageName::new(name)?;
            self.set_value(&name, value);
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
