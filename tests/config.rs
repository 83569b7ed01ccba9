use std::time::Duration;

use assert_matches::assert_matches;

use species_cache::config::{Config, ConfigLoader, DEFAULT_BASE_URL, EnvOverrides};
use species_cache::error::SpeciesError;

#[test]
fn parse_config_file_sections() {
    let raw = r#"{
        "catalog": { "token": "abc", "timeout_secs": 5, "max_retries": 2 },
        "cache": { "ttl_secs": 86400, "single_flight": false },
        "store": { "path": "/tmp/species.json" }
    }"#;
    let config: Config = serde_json::from_str(raw).unwrap();

    let resolved = ConfigLoader::resolve_config(config, EnvOverrides::default()).unwrap();
    assert_eq!(resolved.catalog.base_url, DEFAULT_BASE_URL);
    assert_eq!(resolved.catalog.require_token().unwrap(), "abc");
    assert_eq!(resolved.catalog.timeout, Duration::from_secs(5));
    assert_eq!(resolved.catalog.max_retries, 2);
    assert_eq!(resolved.cache.ttl, Some(Duration::from_secs(86400)));
    assert!(!resolved.cache.single_flight);
    assert_eq!(resolved.store_path.unwrap().as_str(), "/tmp/species.json");
}

#[test]
fn blank_token_counts_as_missing() {
    let env = EnvOverrides {
        token: Some("   ".to_string()),
        base_url: None,
    };
    let resolved = ConfigLoader::resolve_config(Config::default(), env).unwrap();
    assert_matches!(
        resolved.catalog.require_token(),
        Err(SpeciesError::MissingToken)
    );
}

#[test]
fn rejects_non_http_base_url() {
    let env = EnvOverrides {
        token: None,
        base_url: Some("ftp://catalog".to_string()),
    };
    let err = ConfigLoader::resolve_config(Config::default(), env).unwrap_err();
    assert_matches!(err, SpeciesError::ConfigParse(_));
}

#[test]
fn explicit_missing_file_is_an_error() {
    let err = ConfigLoader::resolve(Some("/nonexistent/species-cache.json")).unwrap_err();
    assert_matches!(err, SpeciesError::ConfigRead(_));
}
