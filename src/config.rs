use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::allocator::OneEntryOnlyFilter;
use crate::authority::HttpAuthorityConfig;
use crate::ingestion::IngestionOptions;
use crate::metadata_cache::CacheConfig;
use crate::service::ServiceConfig;
use crate::trie::TrieConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub store: StoreConfig,
    pub authority: AuthorityConfig,
    pub cache: CacheSettings,
    pub index: IndexConfig,
    pub ingestion: IngestionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthorityConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub language: String,
    #[serde(with = "duration_string")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    #[serde(with = "duration_string")]
    pub sliding_expiration: Duration,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    pub max_depth: usize,
    pub max_items: usize,
    /// Periodic trie rebuild; disabled when absent
    #[serde(with = "option_duration_string", skip_serializing_if = "Option::is_none")]
    pub rebuild_interval: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
    pub one_entry_only: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbose: bool,
    pub quiet: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/labeldb".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base_url: "https://store.steampowered.com/api/appdetails".to_string(),
            api_key: None,
            language: "koreana".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            sliding_expiration: defaults.sliding_expiration,
            max_entries: defaults.max_entries,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        let defaults = TrieConfig::default();
        Self {
            max_depth: defaults.max_depth,
            max_items: defaults.max_items,
            rebuild_interval: None,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            history_file: None,
            one_entry_only: OneEntryOnlyFilter::DEFAULT_BASES
                .iter()
                .map(|b| b.to_string())
                .collect(),
        }
    }
}

impl CatalogConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: CatalogConfig =
            toml::from_str(&content).with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Load the optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Ok(url) = std::env::var("LABELDB_DATABASE_URL") {
            config.store.database_url = url;
        }
        if let Ok(url) = std::env::var("LABELDB_AUTHORITY_URL") {
            config.authority.base_url = url;
        }
        if let Ok(key) = std::env::var("LABELDB_AUTHORITY_KEY") {
            config.authority.api_key = Some(key);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.index.max_depth > 0, "index.max_depth must be positive");
        anyhow::ensure!(self.index.max_items > 0, "index.max_items must be positive");
        anyhow::ensure!(self.cache.max_entries > 0, "cache.max_entries must be positive");
        anyhow::ensure!(self.store.max_connections > 0, "store.max_connections must be positive");
        if let Some(interval) = self.index.rebuild_interval {
            anyhow::ensure!(!interval.is_zero(), "index.rebuild_interval must be positive");
        }
        Ok(())
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            trie: TrieConfig {
                max_depth: self.index.max_depth,
                max_items: self.index.max_items,
            },
            cache: CacheConfig {
                sliding_expiration: self.cache.sliding_expiration,
                max_entries: self.cache.max_entries,
                authority_timeout: self.authority.timeout,
            },
        }
    }

    pub fn http_authority_config(&self) -> HttpAuthorityConfig {
        HttpAuthorityConfig {
            base_url: self.authority.base_url.clone(),
            api_key: self.authority.api_key.clone(),
            language: self.authority.language.clone(),
            timeout: self.authority.timeout,
        }
    }

    pub fn ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            history_file: self.ingestion.history_file.clone(),
            one_entry_only: self.ingestion.one_entry_only.clone(),
        }
    }
}

// Helper module for duration serialization
mod duration_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = format!("{}s", duration.as_secs());
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(s: &str) -> Result<Duration, String> {
        match s.strip_suffix('s') {
            Some(stripped) => stripped
                .trim()
                .parse()
                .map(Duration::from_secs)
                .map_err(|e| format!("invalid duration {s:?}: {e}")),
            None => Err("Expected duration string ending with 's'".to_string()),
        }
    }
}

mod option_duration_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => super::duration_string::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| super::duration_string::parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
