use std::path::Path;

use serde_json::{Map, Value};

/// Transient, per-replay key/value state.
pub type ParameterSet = Map<String, Value>;

/// File name of the durable store inside the recordings base directory.
pub const STORE_FILE: &str = "recplay_store.db.json";

/// Durable key/value state surviving across sessions and navigations.
///
/// The store is the only channel guaranteed to carry state across page
/// navigations and process restarts: it is loaded once at session start,
/// reconciled with the in-context copy after every step, and written back
/// once at session close.
#[derive(Debug, Clone, Default)]
pub struct PersistentStore {
    values: Map<String, Value>,
}

impl PersistentStore {
    /// Load the store from disk. A missing file, an empty file or a
    /// non-object body all yield an empty store.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        if !path.exists() {
            tracing::info!("No store at {}, starting empty", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        tracing::info!("Loaded {} bytes from store {}", raw.len(), path.display());

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(values)) => Ok(Self { values }),
            Ok(_) | Err(_) => {
                tracing::warn!("Dropping invalid store content from {}", path.display());
                Ok(Self::default())
            }
        }
    }

    /// Write the store back to disk. An empty store is not written.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if self.values.is_empty() {
            tracing::info!("Not saving store: it's empty");
            return Ok(());
        }

        let encoded = Value::Object(self.values.clone()).to_string();
        tracing::info!(
            "Saving store ({} bytes) to {}",
            encoded.len(),
            path.display()
        );
        std::fs::write(path, encoded)
    }

    /// Merge values pulled from the execution context; context values win
    /// on key collision.
    pub fn merge(&mut self, pulled: Map<String, Value>) {
        for (key, value) in pulled {
            self.values.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.values.insert(key, value);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistentStore::load(&dir.path().join(STORE_FILE)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn empty_store_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE);
        PersistentStore::default().save(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn round_trips_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE);

        let mut store = PersistentStore::default();
        store.insert("token".to_string(), json!("abc123"));
        store.insert("records".to_string(), json!([{"host": "www", "ttl": 300}]));
        store.save(&path).unwrap();

        let reloaded = PersistentStore::load(&path).unwrap();
        assert_eq!(reloaded.values(), store.values());
    }

    #[test]
    fn garbage_content_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE);
        std::fs::write(&path, "not json at all").unwrap();
        let store = PersistentStore::load(&path).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn merge_prefers_pulled_values() {
        let mut store = PersistentStore::default();
        store.insert("a".to_string(), json!(1));
        store.insert("b".to_string(), json!(2));

        let mut pulled = Map::new();
        pulled.insert("b".to_string(), json!(20));
        pulled.insert("c".to_string(), json!(30));
        store.merge(pulled);

        assert_eq!(store.get("a"), Some(&json!(1)));
        assert_eq!(store.get("b"), Some(&json!(20)));
        assert_eq!(store.get("c"), Some(&json!(30)));
    }
}
