//! Persisted client-side state, the gateway's stand-in for browser local
//! storage: a flat map of string keys to JSON-encoded string values, written
//! to a single file. Reads tolerate missing or malformed data by discarding it.
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

pub const AUTH_TOKEN_KEY: &str = "storyline-auth-token";
pub const ADMIN_CACHE_KEY: &str = "admin_status_cache";
pub const SELECTED_TAGS_KEY: &str = "selectedTags";
pub const SELECTED_LANGUAGES_KEY: &str = "selectedLanguages";
pub const SHOW_UNREAD_ONLY_KEY: &str = "showUnreadOnly";

pub struct LocalStore {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, String>>,
}

impl LocalStore {
    /// Opens (or starts) the store at `path`. A missing or unreadable file
    /// yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries: BTreeMap<String, String> = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding malformed local state at {}: {e}", path.display());
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        debug!("Local state opened at {} ({} keys)", path.display(), entries.len());
        Self {
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn set_raw(&self, key: &str, value: String) {
        let mut entries = self.lock();
        entries.insert(key.to_string(), value);
        self.persist(&entries);
    }

    /// Decodes the value under `key`. Malformed values are removed and read as absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding malformed local value '{key}': {e}");
                self.remove(key);
                None
            }
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key, raw),
            Err(e) => warn!("Could not encode local value '{key}': {e}"),
        }
    }

    pub fn remove(&self, key: &str) {
        let mut entries = self.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }

    /// Drops everything tied to the signed-in user.
    pub fn clear_auth_state(&self) {
        let mut entries = self.lock();
        let removed_token = entries.remove(AUTH_TOKEN_KEY).is_some();
        let removed_cache = entries.remove(ADMIN_CACHE_KEY).is_some();
        if removed_token || removed_cache {
            self.persist(&entries);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A panic while holding the lock leaves the map itself intact.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, entries: &BTreeMap<String, String>) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_vec_pretty(entries)
            .map_err(std::io::Error::from)
            .and_then(|bytes| {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                let tmp = path.with_extension("tmp");
                fs::write(&tmp, bytes)?;
                fs::rename(&tmp, path)
            });
        if let Err(e) = result {
            warn!("Could not persist local state to {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("local.json");

        let store = LocalStore::open(&path);
        store.set_json(SELECTED_TAGS_KEY, &vec!["folklore".to_string()]);
        store.set_json(SHOW_UNREAD_ONLY_KEY, &true);

        let reopened = LocalStore::open(&path);
        let tags: Vec<String> = reopened.get_json(SELECTED_TAGS_KEY).unwrap();
        assert_eq!(tags, vec!["folklore"]);
        assert_eq!(reopened.get_json::<bool>(SHOW_UNREAD_ONLY_KEY), Some(true));
    }

    #[test]
    fn test_malformed_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        fs::write(&path, "{not json").unwrap();

        let store = LocalStore::open(&path);
        assert!(store.get_raw(AUTH_TOKEN_KEY).is_none());
    }

    #[test]
    fn test_malformed_value_is_discarded() {
        let store = LocalStore::in_memory();
        store.set_raw(SELECTED_TAGS_KEY, "[\"unterminated".to_string());

        assert!(store.get_json::<Vec<String>>(SELECTED_TAGS_KEY).is_none());
        assert!(store.get_raw(SELECTED_TAGS_KEY).is_none());
    }

    #[test]
    fn test_clear_auth_state_keeps_preferences() {
        let store = LocalStore::in_memory();
        store.set_raw(AUTH_TOKEN_KEY, "{}".into());
        store.set_raw(ADMIN_CACHE_KEY, "{}".into());
        store.set_json(SHOW_UNREAD_ONLY_KEY, &true);

        store.clear_auth_state();

        assert!(store.get_raw(AUTH_TOKEN_KEY).is_none());
        assert!(store.get_raw(ADMIN_CACHE_KEY).is_none());
        assert_eq!(store.get_json::<bool>(SHOW_UNREAD_ONLY_KEY), Some(true));
    }
}
