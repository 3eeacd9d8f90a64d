//! Opaque parameter bundle exchanged with the remote endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Untyped, string-keyed, nested key/value payload.
///
/// The session layer never interprets the contents; it only carries
/// bundles between the application and the remote endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    /// Create an empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Get a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style variant of [`Params::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Get a nested bundle.
    ///
    /// Returns `None` if the key is missing or does not hold an object.
    #[must_use]
    pub fn get_bundle(&self, key: &str) -> Option<Self> {
        match self.0.get(key) {
            Some(Value::Object(map)) => Some(Self(map.clone())),
            _ => None,
        }
    }

    /// Store a nested bundle.
    pub fn set_bundle(&mut self, key: impl Into<String>, bundle: Self) {
        self.0.insert(key.into(), Value::Object(bundle.0));
    }

    /// Remove a value by key.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Params> for Value {
    fn from(params: Params) -> Self {
        Self::Object(params.0)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
