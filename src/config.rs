use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::SpeciesError;

pub const DEFAULT_CONFIG_FILE: &str = "species-cache.json";
pub const DEFAULT_BASE_URL: &str = "https://api.iucnredlist.org/api/v4";
pub const TOKEN_ENV: &str = "IUCN_TOKEN";
pub const BASE_URL_ENV: &str = "SPECIES_CACHE_BASE_URL";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub store: StoreSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CatalogSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub single_flight: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StoreSection {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub max_retries: usize,
}

impl CatalogSettings {
    pub fn require_token(&self) -> Result<&str, SpeciesError> {
        self.token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or(SpeciesError::MissingToken)
    }
}

/// How long cached records stay authoritative, and whether concurrent
/// misses for the same scope share one ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Option<Duration>,
    pub single_flight: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: None,
            single_flight: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub catalog: CatalogSettings,
    pub cache: CachePolicy,
    pub store_path: Option<Utf8PathBuf>,
}

/// Environment values that override the config file.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub token: Option<String>,
    pub base_url: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            token: std::env::var(TOKEN_ENV).ok(),
            base_url: std::env::var(BASE_URL_ENV).ok(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SpeciesError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| SpeciesError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content)
                .map_err(|err| SpeciesError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(config, EnvOverrides::from_env())
    }

    pub fn resolve_config(
        config: Config,
        env: EnvOverrides,
    ) -> Result<ResolvedConfig, SpeciesError> {
        let base_url = env
            .base_url
            .or(config.catalog.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(SpeciesError::ConfigParse(format!(
                "catalog base_url must be an http(s) URL: {base_url}"
            )));
        }

        let token = env
            .token
            .or(config.catalog.token)
            .filter(|token| !token.trim().is_empty());

        let catalog = CatalogSettings {
            base_url,
            token,
            timeout: Duration::from_secs(config.catalog.timeout_secs.unwrap_or(30)),
            max_retries: config.catalog.max_retries.unwrap_or(0),
        };

        let cache = CachePolicy {
            ttl: config.cache.ttl_secs.map(Duration::from_secs),
            single_flight: config.cache.single_flight.unwrap_or(true),
        };

        Ok(ResolvedConfig {
            catalog,
            cache,
            store_path: config.store.path.map(Utf8PathBuf::from),
        })
    }
}
