//! Read-through cache over the persisted config key/value table.
//!
//! All runtime-tunable behavior goes through here; the TOML file only
//! bootstraps the process (listen address, DSN, data dir).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::db::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    Boolean,
    Integer,
    String,
    Text,
}

/// One registered config key. The descriptor table drives both default
/// registration and the operator-editable whitelist.
#[derive(Debug, Clone)]
pub struct ConfigDescriptor {
    pub key: &'static str,
    pub kind: ConfigKind,
    pub default: &'static str,
    pub description: &'static str,
}

pub const CONFIG_DESCRIPTORS: &[ConfigDescriptor] = &[
    ConfigDescriptor {
        key: "webhookEnabled",
        kind: ConfigKind::Boolean,
        default: "true",
        description: "Master switch for all media-server webhooks",
    },
    ConfigDescriptor {
        key: "webhookFilterMode",
        kind: ConfigKind::String,
        default: "blacklist",
        description: "blacklist drops matches, whitelist drops non-matches",
    },
    ConfigDescriptor {
        key: "webhookFilterRegex",
        kind: ConfigKind::Text,
        default: "",
        description: "Regex applied to normalized webhook titles",
    },
    ConfigDescriptor {
        key: "webhookDelayedImportEnabled",
        kind: ConfigKind::Boolean,
        default: "false",
        description: "Queue webhook jobs instead of running them immediately",
    },
    ConfigDescriptor {
        key: "webhookDelayedImportHours",
        kind: ConfigKind::Integer,
        default: "24",
        description: "Delay before a queued webhook job becomes due",
    },
    ConfigDescriptor {
        key: "taskDuplicateThresholdHours",
        kind: ConfigKind::Integer,
        default: "3",
        description: "Window in which a finished task blocks an identical resubmission",
    },
    ConfigDescriptor {
        key: "nameConversionEnabled",
        kind: ConfigKind::Boolean,
        default: "false",
        description: "Convert non-Chinese search titles via metadata sources",
    },
    ConfigDescriptor {
        key: "nameConversionSourcePriority",
        kind: ConfigKind::Text,
        default: r#"[{"key":"bangumi","enabled":true},{"key":"tmdb","enabled":true},{"key":"tvdb","enabled":true},{"key":"douban","enabled":true},{"key":"imdb","enabled":true}]"#,
        description: "Ordered metadata sources consulted during name conversion",
    },
    ConfigDescriptor {
        key: "aiMatchEnabled",
        kind: ConfigKind::Boolean,
        default: "false",
        description: "Let the AI matcher tie-break ranked candidates",
    },
    ConfigDescriptor {
        key: "aiNameConversionEnabled",
        kind: ConfigKind::Boolean,
        default: "false",
        description: "AI fallback when metadata name conversion finds nothing",
    },
    ConfigDescriptor {
        key: "aiProvider",
        kind: ConfigKind::String,
        default: "deepseek",
        description: "AI provider tag (informational)",
    },
    ConfigDescriptor {
        key: "aiApiKey",
        kind: ConfigKind::String,
        default: "",
        description: "API key for the AI endpoint",
    },
    ConfigDescriptor {
        key: "aiBaseUrl",
        kind: ConfigKind::String,
        default: "",
        description: "OpenAI-compatible base URL",
    },
    ConfigDescriptor {
        key: "aiModel",
        kind: ConfigKind::String,
        default: "deepseek-chat",
        description: "Model name sent with every AI request",
    },
    ConfigDescriptor {
        key: "aiMatchPrompt",
        kind: ConfigKind::Text,
        default: "",
        description: "Override for the candidate-selection prompt",
    },
    ConfigDescriptor {
        key: "aiMetadataPrompt",
        kind: ConfigKind::Text,
        default: "",
        description: "Override for the metadata-selection prompt",
    },
    ConfigDescriptor {
        key: "aiNameConversionPrompt",
        kind: ConfigKind::Text,
        default: "",
        description: "Override for the name-conversion prompt",
    },
    ConfigDescriptor {
        key: "tmdbApiKey",
        kind: ConfigKind::String,
        default: "",
        description: "TMDB API key",
    },
    ConfigDescriptor {
        key: "tmdbReverseLookupEnabled",
        kind: ConfigKind::Boolean,
        default: "true",
        description: "Map non-Chinese metadata titles to Chinese via TMDB",
    },
    ConfigDescriptor {
        key: "metadataSourcesEnabled",
        kind: ConfigKind::Text,
        default: r#"["tmdb","bangumi"]"#,
        description: "Metadata sources consulted for alias enrichment",
    },
    ConfigDescriptor {
        key: "smartRefreshEnabled",
        kind: ConfigKind::Boolean,
        default: "false",
        description: "Only overwrite stored danmaku when the new list is larger",
    },
    ConfigDescriptor {
        key: "fallbackVerificationEnabled",
        kind: ConfigKind::Boolean,
        default: "false",
        description: "Probe episode 1 of the chosen candidate before importing",
    },
    ConfigDescriptor {
        key: "externalApiKey",
        kind: ConfigKind::String,
        default: "",
        description: "Key required by the external control API",
    },
];

/// Keys an operator may change through the control API.
pub fn editable_keys() -> impl Iterator<Item = &'static str> {
    CONFIG_DESCRIPTORS.iter().map(|d| d.key)
}

#[derive(Clone)]
pub struct ConfigStore {
    store: Store,
    cache: Arc<Mutex<HashMap<String, String>>>,
}

impl ConfigStore {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            store,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create rows for any descriptor key that does not exist yet. Operator
    /// values are never overwritten.
    pub async fn register_defaults(&self) -> anyhow::Result<()> {
        let defaults: Vec<(&str, &str, &str)> = CONFIG_DESCRIPTORS
            .iter()
            .map(|d| (d.key, d.default, d.description))
            .collect();
        self.store.init_config_defaults(&defaults).await
    }

    pub async fn get(&self, key: &str, default: &str) -> String {
        {
            let cache = self.cache.lock().await;
            if let Some(value) = cache.get(key) {
                return value.clone();
            }
        }

        let mut cache = self.cache.lock().await;
        // Another task may have filled the entry while we waited.
        if let Some(value) = cache.get(key) {
            return value.clone();
        }

        let value = self
            .store
            .get_config_value(key)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| default.to_string());
        cache.insert(key.to_string(), value.clone());
        value
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> bool {
        let fallback = if default { "true" } else { "false" };
        self.get(key, fallback).await.eq_ignore_ascii_case("true")
    }

    pub async fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get(key, &default.to_string())
            .await
            .parse()
            .unwrap_or(default)
    }

    /// Write through to the repo, then drop the cached entry.
    pub async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.store.set_config_value(key, value).await?;
        self.invalidate(key).await;
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) {
        let mut cache = self.cache.lock().await;
        if cache.remove(key).is_some() {
            info!("Config cache invalidated: '{}'", key);
        }
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
        info!("Config cache cleared");
    }
}
