//! Persistence collaborator for indexing settings.
//!
//! The [`SettingsProvider`] trait is the only view this crate has of the
//! host's persistence layer: keyed global state, keyed secrets, and a
//! clear operation. No transactionality is assumed. Two implementations
//! ship here: an in-memory provider for tests and programmatic use, and a
//! TOML-file provider backing the `dom` CLI.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Global-state key under which the raw indexing settings blob lives.
pub const INDEXING_SETTINGS_KEY: &str = "indexingSettings";
/// Secret key for the OpenAI API key.
pub const OPENAI_KEY_SECRET: &str = "openAiApiKey";
/// Secret key for the OpenAI-compatible endpoint's API key.
pub const OPENAI_COMPATIBLE_KEY_SECRET: &str = "openAiCompatibleApiKey";
/// Secret key for the vector store's API key.
pub const VECTOR_STORE_KEY_SECRET: &str = "vectorStoreApiKey";

/// Keyed access to the host's persisted state and secrets.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Fetch a global-state value, or `None` when unset.
    async fn get_global_state(&self, key: &str) -> Option<Value>;

    /// Fetch a secret. Unset secrets are the empty string.
    async fn get_secret(&self, key: &str) -> String;

    /// Remove all persisted indexing settings and secrets.
    ///
    /// Failures propagate unchanged to the caller.
    async fn clear_indexing_settings(&self) -> Result<()>;
}

/// In-memory settings, used by tests and embedding hosts that manage
/// persistence themselves.
#[derive(Default)]
pub struct InMemorySettings {
    state: RwLock<HashMap<String, Value>>,
    secrets: RwLock<HashMap<String, String>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_global_state(&self, key: &str, value: Value) {
        self.state.write().unwrap().insert(key.to_string(), value);
    }

    pub fn set_secret(&self, key: &str, value: &str) {
        self.secrets
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl SettingsProvider for InMemorySettings {
    async fn get_global_state(&self, key: &str) -> Option<Value> {
        self.state.read().unwrap().get(key).cloned()
    }

    async fn get_secret(&self, key: &str) -> String {
        self.secrets
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    async fn clear_indexing_settings(&self) -> Result<()> {
        self.state.write().unwrap().remove(INDEXING_SETTINGS_KEY);
        let mut secrets = self.secrets.write().unwrap();
        for key in [
            OPENAI_KEY_SECRET,
            OPENAI_COMPATIBLE_KEY_SECRET,
            VECTOR_STORE_KEY_SECRET,
        ] {
            secrets.remove(key);
        }
        Ok(())
    }
}

/// TOML-file-backed settings for the CLI.
///
/// The file holds a `[state]` table of JSON-compatible values and a
/// `[secrets]` table of strings. A missing file behaves as empty
/// settings; parse failures surface on construction, not per read.
pub struct FileSettings {
    path: PathBuf,
    state: HashMap<String, Value>,
    secrets: HashMap<String, String>,
}

impl FileSettings {
    /// Load settings from `path`. A missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path: path.to_path_buf(),
                state: HashMap::new(),
                secrets: HashMap::new(),
            });
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let parsed: toml::Value =
            toml::from_str(&content).with_context(|| "Failed to parse settings file")?;

        let state = parsed
            .get("state")
            .and_then(|v| v.as_table())
            .map(|table| {
                table
                    .iter()
                    .filter_map(|(k, v)| {
                        serde_json::to_value(v.clone()).ok().map(|j| (k.clone(), j))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let secrets = parsed
            .get("secrets")
            .and_then(|v| v.as_table())
            .map(|table| {
                table
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            state,
            secrets,
        })
    }
}

#[async_trait]
impl SettingsProvider for FileSettings {
    async fn get_global_state(&self, key: &str) -> Option<Value> {
        self.state.get(key).cloned()
    }

    async fn get_secret(&self, key: &str) -> String {
        self.secrets.get(key).cloned().unwrap_or_default()
    }

    async fn clear_indexing_settings(&self) -> Result<()> {
        std::fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove settings file: {}", self.path.display()))
    }
}
