//! Indexing configuration: normalization, derived readiness, and
//! restart-necessity diffing.
//!
//! Persisted configuration is heterogeneous: a JSON blob of flags and
//! endpoints plus separately-stored secrets, any of which may be missing
//! or garbled. [`IndexConfigStore::reload`] re-reads all of it and
//! normalizes it into one canonical [`IndexingConfig`]; normalization
//! never fails, it degrades to documented defaults instead.
//!
//! The reload also decides whether background indexing must restart. The
//! decisive case is embedding dimensionality: a vector store's collection
//! is physically sized to one dimension, so silently continuing after a
//! provider or model change would corrupt or fail every subsequent write
//! and read. When the dimension of either side of the diff is unknown,
//! the store restarts defensively.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::settings::{
    SettingsProvider, INDEXING_SETTINGS_KEY, OPENAI_COMPATIBLE_KEY_SECRET, OPENAI_KEY_SECRET,
    VECTOR_STORE_KEY_SECRET,
};

/// Minimum similarity score a search hit must reach to be returned.
pub const SEARCH_MIN_SCORE: f64 = 0.4;

/// Supported embedding providers.
///
/// Raw values that are empty or unrecognized normalize to
/// [`EmbedderProvider::OpenAi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbedderProvider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
}

impl EmbedderProvider {
    /// Parse a raw provider value, coercing unknown input to OpenAI.
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Some("ollama") => EmbedderProvider::Ollama,
            Some("openai-compatible") => EmbedderProvider::OpenAiCompatible,
            _ => EmbedderProvider::OpenAi,
        }
    }

    /// The model used when no explicit model id is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            EmbedderProvider::OpenAi | EmbedderProvider::OpenAiCompatible => {
                "text-embedding-3-small"
            }
            EmbedderProvider::Ollama => "nomic-embed-text",
        }
    }
}

/// Known embedding dimensionality for a provider/model pair.
///
/// Returns `None` for models this crate has no dimension on record for;
/// callers treat unknown as a reason to restart, never as "unchanged".
pub fn model_dimension(provider: EmbedderProvider, model: &str) -> Option<usize> {
    match provider {
        EmbedderProvider::OpenAi | EmbedderProvider::OpenAiCompatible => match model {
            "text-embedding-3-small" => Some(1536),
            "text-embedding-3-large" => Some(3072),
            "text-embedding-ada-002" => Some(1536),
            _ => None,
        },
        EmbedderProvider::Ollama => match model {
            "nomic-embed-text" => Some(768),
            "mxbai-embed-large" => Some(1024),
            "all-minilm" => Some(384),
            _ => None,
        },
    }
}

/// The canonical normalized configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexingConfig {
    pub is_enabled: bool,
    pub embedder_provider: EmbedderProvider,
    /// Explicit model id; each provider has a default when absent.
    pub model_id: Option<String>,
    pub open_ai_key: String,
    pub ollama_base_url: Option<String>,
    pub open_ai_compatible_base_url: Option<String>,
    pub open_ai_compatible_key: String,
    /// Raw store-type string. Defaults to `"qdrant"` only when the
    /// persisted value is entirely absent; an explicitly supplied
    /// unknown value passes through and fails later checks instead of
    /// being coerced.
    pub vector_store_type: String,
    pub vector_store_url: String,
    pub vector_store_api_key: String,
    pub search_min_score: f64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            is_enabled: false,
            embedder_provider: EmbedderProvider::OpenAi,
            model_id: None,
            open_ai_key: String::new(),
            ollama_base_url: None,
            open_ai_compatible_base_url: None,
            open_ai_compatible_key: String::new(),
            vector_store_type: "qdrant".to_string(),
            vector_store_url: String::new(),
            vector_store_api_key: String::new(),
            search_min_score: SEARCH_MIN_SCORE,
        }
    }
}

impl IndexingConfig {
    /// Whether enough is configured for indexing and search to run.
    ///
    /// Derived, never persisted: the current provider's required fields
    /// must be non-empty, plus a non-empty store type and URL.
    pub fn is_configured(&self) -> bool {
        let store_ready = !self.vector_store_type.is_empty() && !self.vector_store_url.is_empty();
        let provider_ready = match self.embedder_provider {
            EmbedderProvider::OpenAi => !self.open_ai_key.is_empty(),
            EmbedderProvider::Ollama => self
                .ollama_base_url
                .as_deref()
                .map(|u| !u.is_empty())
                .unwrap_or(false),
            EmbedderProvider::OpenAiCompatible => {
                self.open_ai_compatible_base_url
                    .as_deref()
                    .map(|u| !u.is_empty())
                    .unwrap_or(false)
                    && !self.open_ai_compatible_key.is_empty()
            }
        };
        provider_ready && store_ready
    }

    /// The effective model id: explicit, or the provider default.
    pub fn resolved_model_id(&self) -> &str {
        self.model_id
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.embedder_provider.default_model())
    }

    /// The known dimension of the resolved model, if any.
    pub fn resolved_dimension(&self) -> Option<usize> {
        model_dimension(self.embedder_provider, self.resolved_model_id())
    }
}

/// Immutable capture of the normalized state, taken at the start of a
/// reload and used only for diffing.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub enabled: bool,
    pub configured: bool,
    pub embedder_provider: EmbedderProvider,
    pub model_id: Option<String>,
    pub open_ai_key: String,
    pub ollama_base_url: Option<String>,
    pub open_ai_compatible_base_url: Option<String>,
    pub open_ai_compatible_key: String,
    pub vector_store_type: String,
    pub vector_store_url: String,
    pub vector_store_api_key: String,
}

impl ConfigSnapshot {
    fn capture(config: &IndexingConfig) -> Self {
        Self {
            enabled: config.is_enabled,
            configured: config.is_configured(),
            embedder_provider: config.embedder_provider,
            model_id: config.model_id.clone(),
            open_ai_key: config.open_ai_key.clone(),
            ollama_base_url: config.ollama_base_url.clone(),
            open_ai_compatible_base_url: config.open_ai_compatible_base_url.clone(),
            open_ai_compatible_key: config.open_ai_compatible_key.clone(),
            vector_store_type: config.vector_store_type.clone(),
            vector_store_url: config.vector_store_url.clone(),
            vector_store_api_key: config.vector_store_api_key.clone(),
        }
    }

    fn resolved_dimension(&self) -> Option<usize> {
        let model = self
            .model_id
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.embedder_provider.default_model());
        model_dimension(self.embedder_provider, model)
    }
}

/// Result of one [`IndexConfigStore::reload`].
#[derive(Debug)]
pub struct ReloadOutcome {
    /// The state held before this reload.
    pub previous: ConfigSnapshot,
    /// The freshly normalized state.
    pub config: IndexingConfig,
    /// Whether background indexing must restart to stay consistent.
    pub requires_restart: bool,
}

/// The raw persisted blob, as stored by the host. Every field is
/// optional; missing and malformed values degrade to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawIndexingSettings {
    enabled: bool,
    embedder_provider: Option<String>,
    model_id: Option<String>,
    ollama_base_url: Option<String>,
    open_ai_compatible_base_url: Option<String>,
    vector_store_type: Option<String>,
    vector_store_url: Option<String>,
}

/// Loads, normalizes, and diffs the persisted indexing configuration.
pub struct IndexConfigStore {
    settings: Arc<dyn SettingsProvider>,
    current: IndexingConfig,
}

impl IndexConfigStore {
    /// Create a store with default (disabled) state. The first
    /// [`reload`](Self::reload) populates it from persistence.
    pub fn new(settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            settings,
            current: IndexingConfig::default(),
        }
    }

    /// The currently held normalized configuration.
    pub fn get_config(&self) -> &IndexingConfig {
        &self.current
    }

    /// Whether the currently held configuration is usable.
    pub fn is_configured(&self) -> bool {
        self.current.is_configured()
    }

    /// Snapshot, re-read, normalize, and diff.
    ///
    /// Reload is expected to run from a single serialized
    /// configuration-change entry point; it is not safe against
    /// concurrent invocations of itself.
    pub async fn reload(&mut self) -> ReloadOutcome {
        let previous = ConfigSnapshot::capture(&self.current);

        let raw: RawIndexingSettings = self
            .settings
            .get_global_state(INDEXING_SETTINGS_KEY)
            .await
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let open_ai_key = self.settings.get_secret(OPENAI_KEY_SECRET).await;
        let open_ai_compatible_key =
            self.settings.get_secret(OPENAI_COMPATIBLE_KEY_SECRET).await;
        let vector_store_api_key = self.settings.get_secret(VECTOR_STORE_KEY_SECRET).await;

        let config = IndexingConfig {
            is_enabled: raw.enabled,
            embedder_provider: EmbedderProvider::from_raw(raw.embedder_provider.as_deref()),
            model_id: raw.model_id.filter(|m| !m.is_empty()),
            open_ai_key,
            ollama_base_url: raw.ollama_base_url,
            open_ai_compatible_base_url: raw.open_ai_compatible_base_url,
            open_ai_compatible_key,
            vector_store_type: raw
                .vector_store_type
                .unwrap_or_else(|| "qdrant".to_string()),
            vector_store_url: raw.vector_store_url.unwrap_or_default(),
            vector_store_api_key,
            search_min_score: SEARCH_MIN_SCORE,
        };

        let requires_restart = requires_restart(&previous, &config);
        if requires_restart {
            info!(
                provider = ?config.embedder_provider,
                store = %config.vector_store_type,
                "indexing configuration changed, restart required"
            );
        }

        self.current = config.clone();
        ReloadOutcome {
            previous,
            config,
            requires_restart,
        }
    }

    /// Remove all persisted indexing settings.
    ///
    /// The persistence collaborator's failure propagates unchanged; on
    /// success the held state resets to defaults.
    pub async fn clear(&mut self) -> anyhow::Result<()> {
        self.settings.clear_indexing_settings().await?;
        self.current = IndexingConfig::default();
        Ok(())
    }
}

/// Decide whether the change from `previous` to `current` requires
/// restarting background indexing. Rules evaluate in order; the first
/// match wins.
pub fn requires_restart(previous: &ConfigSnapshot, current: &IndexingConfig) -> bool {
    let now_configured = current.is_configured();

    // Feature transitioned into service: always start fresh.
    if (!previous.enabled || !previous.configured) && current.is_enabled && now_configured {
        return true;
    }
    // Off before and off now: nothing to restart.
    if !previous.enabled && !current.is_enabled {
        return false;
    }
    // Never usable on either side: nothing running to invalidate.
    if !previous.configured && !now_configured {
        return false;
    }

    if current.is_enabled || previous.enabled {
        if previous.embedder_provider != current.embedder_provider {
            return true;
        }

        match (previous.resolved_dimension(), current.resolved_dimension()) {
            (Some(prev_dim), Some(cur_dim)) if prev_dim == cur_dim => {}
            // Unknown on either side: restart rather than risk writing
            // vectors of the wrong size into an existing collection.
            _ => return true,
        }

        let auth_changed = match current.embedder_provider {
            EmbedderProvider::OpenAi => previous.open_ai_key != current.open_ai_key,
            EmbedderProvider::Ollama => previous.ollama_base_url != current.ollama_base_url,
            EmbedderProvider::OpenAiCompatible => {
                previous.open_ai_compatible_base_url != current.open_ai_compatible_base_url
                    || previous.open_ai_compatible_key != current.open_ai_compatible_key
            }
        };
        if auth_changed {
            return true;
        }

        if previous.vector_store_type != current.vector_store_type
            || previous.vector_store_url != current.vector_store_url
            || previous.vector_store_api_key != current.vector_store_api_key
        {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::InMemorySettings;
    use serde_json::json;

    fn provider_with(blob: serde_json::Value, secrets: &[(&str, &str)]) -> Arc<InMemorySettings> {
        let settings = InMemorySettings::new();
        settings.set_global_state(INDEXING_SETTINGS_KEY, blob);
        for (key, value) in secrets {
            settings.set_secret(key, value);
        }
        Arc::new(settings)
    }

    fn configured_openai() -> Arc<InMemorySettings> {
        provider_with(
            json!({
                "enabled": true,
                "embedderProvider": "openai",
                "vectorStoreType": "qdrant",
                "vectorStoreUrl": "http://localhost:6333",
            }),
            &[(OPENAI_KEY_SECRET, "sk-test")],
        )
    }

    #[tokio::test]
    async fn missing_state_normalizes_to_disabled_defaults() {
        let mut store = IndexConfigStore::new(Arc::new(InMemorySettings::new()));
        let outcome = store.reload().await;

        assert!(!outcome.config.is_enabled);
        assert_eq!(outcome.config.embedder_provider, EmbedderProvider::OpenAi);
        assert_eq!(outcome.config.vector_store_type, "qdrant");
        assert!(!outcome.config.is_configured());
        assert!(!outcome.requires_restart);
    }

    #[tokio::test]
    async fn garbled_provider_coerces_to_openai() {
        let settings = provider_with(json!({"embedderProvider": "something-new"}), &[]);
        let mut store = IndexConfigStore::new(settings);
        let outcome = store.reload().await;
        assert_eq!(outcome.config.embedder_provider, EmbedderProvider::OpenAi);
    }

    #[tokio::test]
    async fn explicit_unknown_store_type_passes_through() {
        let settings = provider_with(
            json!({
                "enabled": true,
                "vectorStoreType": "pinecone",
                "vectorStoreUrl": "http://example",
            }),
            &[(OPENAI_KEY_SECRET, "sk-test")],
        );
        let mut store = IndexConfigStore::new(settings);
        let outcome = store.reload().await;
        assert_eq!(outcome.config.vector_store_type, "pinecone");
        // Unknown type still counts as "present" for is_configured; the
        // store factory is where it fails.
        assert!(outcome.config.is_configured());
    }

    #[tokio::test]
    async fn is_configured_per_provider() {
        let openai = IndexingConfig {
            is_enabled: true,
            open_ai_key: "sk".to_string(),
            vector_store_url: "http://q".to_string(),
            ..Default::default()
        };
        assert!(openai.is_configured());

        let ollama_missing_url = IndexingConfig {
            embedder_provider: EmbedderProvider::Ollama,
            vector_store_url: "http://q".to_string(),
            ..Default::default()
        };
        assert!(!ollama_missing_url.is_configured());

        let ollama = IndexingConfig {
            embedder_provider: EmbedderProvider::Ollama,
            ollama_base_url: Some("http://localhost:11434".to_string()),
            vector_store_url: "http://q".to_string(),
            ..Default::default()
        };
        assert!(ollama.is_configured());

        let compatible_needs_both = IndexingConfig {
            embedder_provider: EmbedderProvider::OpenAiCompatible,
            open_ai_compatible_base_url: Some("http://llm.internal".to_string()),
            vector_store_url: "http://q".to_string(),
            ..Default::default()
        };
        assert!(!compatible_needs_both.is_configured());

        let compatible = IndexingConfig {
            open_ai_compatible_key: "key".to_string(),
            ..compatible_needs_both
        };
        assert!(compatible.is_configured());
    }

    #[tokio::test]
    async fn becoming_enabled_and_configured_restarts() {
        let mut store = IndexConfigStore::new(configured_openai());
        let outcome = store.reload().await;
        assert!(outcome.requires_restart);
        assert!(store.is_configured());
    }

    #[tokio::test]
    async fn reload_twice_without_change_is_stable() {
        let mut store = IndexConfigStore::new(configured_openai());
        store.reload().await;
        let second = store.reload().await;
        assert!(!second.requires_restart);
        let third = store.reload().await;
        assert!(!third.requires_restart);
    }

    #[tokio::test]
    async fn provider_toggle_restarts() {
        let settings = configured_openai();
        let mut store = IndexConfigStore::new(settings.clone());
        store.reload().await;

        settings.set_global_state(
            INDEXING_SETTINGS_KEY,
            json!({
                "enabled": true,
                "embedderProvider": "ollama",
                "ollamaBaseUrl": "http://localhost:11434",
                "vectorStoreType": "qdrant",
                "vectorStoreUrl": "http://localhost:6333",
            }),
        );

        let outcome = store.reload().await;
        assert!(outcome.requires_restart);
        assert!(store.is_configured());
    }

    #[tokio::test]
    async fn same_dimension_model_swap_does_not_restart() {
        let settings = configured_openai();
        let mut store = IndexConfigStore::new(settings.clone());
        store.reload().await;

        // ada-002 and 3-small are both 1536-dimensional; no collection
        // resize is needed.
        settings.set_global_state(
            INDEXING_SETTINGS_KEY,
            json!({
                "enabled": true,
                "embedderProvider": "openai",
                "modelId": "text-embedding-ada-002",
                "vectorStoreType": "qdrant",
                "vectorStoreUrl": "http://localhost:6333",
            }),
        );

        let outcome = store.reload().await;
        assert!(!outcome.requires_restart);
    }

    #[tokio::test]
    async fn dimension_change_restarts() {
        let settings = configured_openai();
        let mut store = IndexConfigStore::new(settings.clone());
        store.reload().await;

        settings.set_global_state(
            INDEXING_SETTINGS_KEY,
            json!({
                "enabled": true,
                "embedderProvider": "openai",
                "modelId": "text-embedding-3-large",
                "vectorStoreType": "qdrant",
                "vectorStoreUrl": "http://localhost:6333",
            }),
        );

        let outcome = store.reload().await;
        assert!(outcome.requires_restart);
    }

    #[tokio::test]
    async fn unknown_model_dimension_restarts_defensively() {
        let settings = configured_openai();
        let mut store = IndexConfigStore::new(settings.clone());
        store.reload().await;

        settings.set_global_state(
            INDEXING_SETTINGS_KEY,
            json!({
                "enabled": true,
                "embedderProvider": "openai",
                "modelId": "some-future-model",
                "vectorStoreType": "qdrant",
                "vectorStoreUrl": "http://localhost:6333",
            }),
        );

        let outcome = store.reload().await;
        assert!(outcome.requires_restart);
    }

    #[tokio::test]
    async fn api_key_change_for_current_provider_restarts() {
        let settings = configured_openai();
        let mut store = IndexConfigStore::new(settings.clone());
        store.reload().await;

        settings.set_secret(OPENAI_KEY_SECRET, "sk-rotated");
        let outcome = store.reload().await;
        assert!(outcome.requires_restart);
    }

    #[tokio::test]
    async fn other_provider_credential_change_is_cosmetic() {
        let settings = configured_openai();
        let mut store = IndexConfigStore::new(settings.clone());
        store.reload().await;

        // The OpenAI-compatible key is irrelevant while provider is
        // plain OpenAI.
        settings.set_secret(OPENAI_COMPATIBLE_KEY_SECRET, "other-key");
        let outcome = store.reload().await;
        assert!(!outcome.requires_restart);
    }

    #[tokio::test]
    async fn vector_store_url_change_restarts() {
        let settings = configured_openai();
        let mut store = IndexConfigStore::new(settings.clone());
        store.reload().await;

        settings.set_global_state(
            INDEXING_SETTINGS_KEY,
            json!({
                "enabled": true,
                "embedderProvider": "openai",
                "vectorStoreType": "qdrant",
                "vectorStoreUrl": "http://other-host:6333",
            }),
        );

        let outcome = store.reload().await;
        assert!(outcome.requires_restart);
    }

    #[tokio::test]
    async fn disabled_to_disabled_never_restarts() {
        let settings = provider_with(json!({"enabled": false}), &[]);
        let mut store = IndexConfigStore::new(settings.clone());
        store.reload().await;

        settings.set_global_state(
            INDEXING_SETTINGS_KEY,
            json!({"enabled": false, "modelId": "text-embedding-3-large"}),
        );
        let outcome = store.reload().await;
        assert!(!outcome.requires_restart);
    }

    #[tokio::test]
    async fn clear_resets_to_defaults() {
        let mut store = IndexConfigStore::new(configured_openai());
        store.reload().await;
        assert!(store.is_configured());

        store.clear().await.unwrap();
        assert!(!store.is_configured());
        assert_eq!(store.get_config(), &IndexingConfig::default());
    }
}
