//! Persisted agent state.
//!
//! Each agent owns one JSON document at `<root>/agents/<key>/state.json`.
//! Writes replace the whole document (temp file, then rename); the last
//! writer wins. A missing file loads as an empty object. Distinct keys
//! always map to distinct files.

use conclave_common::{ConclaveError, Result};
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(root: impl AsRef<Path>, agent_key: &str) -> Self {
        let path = root
            .as_ref()
            .join("agents")
            .join(encode_key(agent_key))
            .join("state.json");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Value> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                debug!(path = %self.path.display(), bytes = bytes.len(), "Loaded agent state");
                serde_json::from_slice(&bytes).map_err(|e| {
                    ConclaveError::State(format!(
                        "Corrupt state file '{}': {}",
                        self.path.display(),
                        e
                    ))
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Value::Object(Map::new())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, state: &Value) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let data = serde_json::to_vec_pretty(state)?;
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &data).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        debug!(path = %self.path.display(), bytes = data.len(), "Persisted agent state");
        Ok(())
    }
}

/// Encode an agent key as a single path component.
///
/// Bytes outside `[A-Za-z0-9-_.]` and a leading `.` are written as `%XX`, so
/// the mapping is injective and never yields `.`, `..` or a separator.
fn encode_key(key: &str) -> String {
    if key.is_empty() {
        return "%".to_string();
    }

    let mut encoded = String::with_capacity(key.len());
    for (i, byte) in key.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'_')
            || (byte == b'.' && i > 0);
        if keep {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), "alpha");

        let state = store.load().await.unwrap();
        assert_eq!(state, json!({}));
    }

    #[tokio::test]
    async fn test_save_replaces_whole_document() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), "alpha");

        store.save(&json!({"a": 1, "b": 2})).await.unwrap();
        store.save(&json!({"c": 3})).await.unwrap();

        assert_eq!(store.load().await.unwrap(), json!({"c": 3}));
        assert_eq!(
            store.path(),
            dir.path().join("agents").join("alpha").join("state.json")
        );
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_state_error() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), "alpha");
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"{oops").unwrap();

        assert!(matches!(store.load().await, Err(ConclaveError::State(_))));
    }

    #[test]
    fn test_key_cannot_escape_root() {
        assert_eq!(encode_key("../etc"), "%2E.%2Fetc");
        assert_eq!(encode_key(".."), "%2E.");
        assert_eq!(encode_key("a/b\\c"), "a%2Fb%5Cc");
        assert_eq!(encode_key(""), "%");
        assert_eq!(encode_key("code-reviewer_2.v1"), "code-reviewer_2.v1");
    }

    #[test]
    fn test_distinct_keys_get_distinct_paths() {
        let root = Path::new("/state");
        let keys = ["team/a", "team_a", "team%2Fa", "team a", "team:a", "", "%"];
        let paths: std::collections::HashSet<_> = keys
            .iter()
            .map(|k| StateStore::new(root, k).path().to_path_buf())
            .collect();
        assert_eq!(paths.len(), keys.len());
    }

    #[tokio::test]
    async fn test_colliding_looking_keys_keep_separate_documents() {
        let dir = TempDir::new().unwrap();
        let slash = StateStore::new(dir.path(), "team/a");
        let underscore = StateStore::new(dir.path(), "team_a");

        slash.save(&json!({"count": 2})).await.unwrap();
        underscore.save(&json!({})).await.unwrap();

        assert_eq!(slash.load().await.unwrap(), json!({"count": 2}));
        assert_eq!(underscore.load().await.unwrap(), json!({}));
        assert!(slash.path().starts_with(dir.path().join("agents")));
    }
}
