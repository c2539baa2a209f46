// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent key/value configuration store.
//
// The whole configuration is one pretty-printed JSON object on disk.  Keys
// the agent does not recognize are preserved across rewrites so older or
// newer builds can share the same file.  Reads fall back to defaults; a
// failed write is logged and reported to the caller but never fatal.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

/// Recognized configuration keys.
pub mod keys {
    /// TCP port of the local HTTP API.
    pub const API_PORT: &str = "apiPort";
    /// Printer used when a job specifies none.
    pub const DEFAULT_PRINTER: &str = "defaultPrinter";
    /// Upper bound on per-job retry attempts.
    pub const MAX_RETRIES: &str = "maxRetries";
    /// Milliseconds between retries.
    pub const RETRY_DELAY: &str = "retryDelay";
    /// Enqueue rejection threshold.
    pub const MAX_QUEUE_SIZE: &str = "maxQueueSize";
    /// Command-center base URL; the remote client is disabled when empty.
    pub const SERVER_BASE_URL: &str = "serverBaseUrl";
    /// Credential forwarded on outbound requests.
    pub const API_KEY: &str = "apiKey";
    /// Override for the Windows SumatraPDF executable.
    pub const SUMATRA_PATH: &str = "sumatraPath";
    /// Milliseconds between pending-job polls.
    pub const POLL_INTERVAL: &str = "pollInterval";
    /// Milliseconds between heartbeats.
    pub const HEARTBEAT_INTERVAL: &str = "heartbeatInterval";
}

/// Process-wide configuration, loaded once and shared by reference.
pub struct ConfigStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl ConfigStore {
    /// Load the store from `path`. A missing or unparsable file starts the
    /// store empty (defaults apply) — the agent must come up regardless.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<Map<String, Value>>(&data) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "config file unparsable — using defaults");
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file yet — using defaults");
                Map::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file unreadable — using defaults");
                Map::new()
            }
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    /// An in-memory store that never touches disk. Used by tests.
    pub fn ephemeral() -> Self {
        Self {
            path: PathBuf::new(),
            values: Mutex::new(Map::new()),
        }
    }

    /// Raw value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().expect("config lock poisoned").get(key).cloned()
    }

    /// Typed read with a fallback. Type mismatches fall back too.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(v) => serde_json::from_value(v).unwrap_or(default),
            None => default,
        }
    }

    /// Set `key` and rewrite the file. Returns `false` when the write failed;
    /// the in-memory value is updated either way.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        let snapshot = {
            let mut values = self.values.lock().expect("config lock poisoned");
            values.insert(key.to_string(), value.into());
            values.clone()
        };
        if self.path.as_os_str().is_empty() {
            return true;
        }
        match persist(&self.path, &snapshot) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to persist config");
                false
            }
        }
    }

    // -- Typed accessors for the recognized keys -----------------------------

    pub fn api_port(&self) -> u16 {
        self.get_or(keys::API_PORT, 3001u16)
    }

    pub fn default_printer(&self) -> Option<String> {
        self.get_nonempty_string(keys::DEFAULT_PRINTER)
    }

    pub fn max_retries(&self) -> u32 {
        self.get_or(keys::MAX_RETRIES, 3u32)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.get_or(keys::RETRY_DELAY, 5_000u64))
    }

    pub fn max_queue_size(&self) -> usize {
        self.get_or(keys::MAX_QUEUE_SIZE, 100usize)
    }

    pub fn server_base_url(&self) -> Option<String> {
        self.get_nonempty_string(keys::SERVER_BASE_URL)
            .map(|u| u.trim_end_matches('/').to_string())
    }

    pub fn api_key(&self) -> Option<String> {
        self.get_nonempty_string(keys::API_KEY)
    }

    pub fn sumatra_path(&self) -> Option<PathBuf> {
        self.get_nonempty_string(keys::SUMATRA_PATH).map(PathBuf::from)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.get_or(keys::POLL_INTERVAL, 5_000u64))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.get_or(keys::HEARTBEAT_INTERVAL, 45_000u64))
    }

    fn get_nonempty_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }
}

/// Write the config atomically: temp file in the same directory, then rename.
fn persist(path: &Path, values: &Map<String, Value>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(&Value::Object(values.clone()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::load(dir.path().join("config.json"));
        assert_eq!(store.api_port(), 3001);
        assert_eq!(store.max_retries(), 3);
        assert_eq!(store.retry_delay(), Duration::from_millis(5_000));
        assert_eq!(store.max_queue_size(), 100);
        assert!(store.default_printer().is_none());
        assert!(store.server_base_url().is_none());
    }

    #[test]
    fn set_then_reload_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");

        let store = ConfigStore::load(&path);
        assert!(store.set(keys::API_PORT, 4000));
        assert!(store.set(keys::DEFAULT_PRINTER, "Office_Laser"));

        let reloaded = ConfigStore::load(&path);
        assert_eq!(reloaded.api_port(), 4000);
        assert_eq!(reloaded.default_printer().as_deref(), Some("Office_Laser"));
    }

    #[test]
    fn unknown_keys_survive_rewrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"futureKey": {"nested": true}}"#).expect("seed file");

        let store = ConfigStore::load(&path);
        assert!(store.set(keys::API_PORT, 3002));

        let reloaded = ConfigStore::load(&path);
        assert_eq!(reloaded.api_port(), 3002);
        assert!(reloaded.get("futureKey").is_some());
    }

    #[test]
    fn creates_parent_directory_on_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("deeply").join("nested").join("config.json");
        let store = ConfigStore::load(&path);
        assert!(store.set(keys::MAX_RETRIES, 7));
        assert!(path.exists());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").expect("seed file");
        let store = ConfigStore::load(&path);
        assert_eq!(store.api_port(), 3001);
    }

    #[test]
    fn type_mismatch_falls_back_to_default() {
        let store = ConfigStore::ephemeral();
        store.set(keys::MAX_RETRIES, "many");
        assert_eq!(store.max_retries(), 3);
    }

    #[test]
    fn base_url_is_trimmed_of_trailing_slash() {
        let store = ConfigStore::ephemeral();
        store.set(keys::SERVER_BASE_URL, "https://cc.example.com/");
        assert_eq!(
            store.server_base_url().as_deref(),
            Some("https://cc.example.com")
        );
    }

    #[test]
    fn empty_string_reads_as_unset() {
        let store = ConfigStore::ephemeral();
        store.set(keys::SERVER_BASE_URL, "");
        assert!(store.server_base_url().is_none());
        store.set(keys::API_KEY, "   ");
        assert!(store.api_key().is_none());
    }
}
