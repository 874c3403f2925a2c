//! Configuration for the lookup service.
//!
//! Defaults reproduce the public deployment: the ondata cadastral index on
//! GitHub, two concurrent fetches, and the reference result limits. A TOML
//! (or JSON) file overrides any subset of fields; a few environment
//! variables override the file.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LookupError, Result};
use crate::telemetry::TelemetrySettings;

/// Global index of municipality codes to regional shard files.
pub const DEFAULT_INDEX_URL: &str =
    "https://raw.githubusercontent.com/ondata/dati_catastali/main/S_0000_ITALIA/anagrafica/index.parquet";

/// Base location shard file names are relative to.
pub const DEFAULT_BASE_URL: &str =
    "https://raw.githubusercontent.com/ondata/dati_catastali/main/S_0000_ITALIA/anagrafica/";

/// Lookup service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub index_url: String,
    pub base_url: String,
    /// Upper bound on HTTP requests in flight across all queries.
    pub max_concurrent_fetches: usize,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Parsed Parquet footers kept in memory.
    pub footer_cache_capacity: usize,
    pub default_search_limit: usize,
    pub default_duplicate_limit: usize,
    pub default_numeric_duplicate_limit: usize,
    /// Clamp for caller-supplied limits. Unset means no clamp.
    pub max_result_limit: Option<usize>,
    pub telemetry: TelemetrySettings,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            index_url: DEFAULT_INDEX_URL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_concurrent_fetches: 2,
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
            footer_cache_capacity: 64,
            default_search_limit: 20,
            default_duplicate_limit: 20,
            default_numeric_duplicate_limit: 50,
            max_result_limit: None,
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl LookupConfig {
    /// Load configuration from a TOML or JSON file (by extension).
    ///
    /// An empty file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LookupError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        };

        parsed.map_err(|detail| {
            LookupError::config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                detail
            ))
        })
    }

    /// Apply `CATASTO_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = env::var("CATASTO_INDEX_URL") {
            self.index_url = url;
        }
        if let Ok(url) = env::var("CATASTO_BASE_URL") {
            self.base_url = url;
        }
        if let Some(n) = env_number("CATASTO_MAX_CONCURRENT_FETCHES")? {
            self.max_concurrent_fetches = n as usize;
        }
        if let Some(n) = env_number("CATASTO_REQUEST_TIMEOUT_SECS")? {
            self.request_timeout_secs = n;
        }
        Ok(())
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(LookupError::config("max_concurrent_fetches must be at least 1"));
        }
        if self.footer_cache_capacity == 0 {
            return Err(LookupError::config("footer_cache_capacity must be at least 1"));
        }
        if !is_http_url(&self.base_url) || !self.base_url.ends_with('/') {
            return Err(LookupError::config(format!(
                "base_url must be an http(s) URL ending with '/': {}",
                self.base_url
            )));
        }
        if !is_http_url(&self.index_url) {
            return Err(LookupError::config(format!(
                "index_url must be an http(s) URL: {}",
                self.index_url
            )));
        }
        Ok(())
    }

    /// Apply the configured clamp to a caller-supplied (or default) limit.
    pub fn effective_limit(&self, requested: Option<usize>, default: usize) -> usize {
        let limit = requested.unwrap_or(default);
        match self.max_result_limit {
            Some(max) => limit.min(max),
            None => limit,
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| LookupError::config(format!("{} must be a number, got '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = LookupConfig::default();
        assert!(config.index_url.ends_with("/anagrafica/index.parquet"));
        assert_eq!(config.max_concurrent_fetches, 2);
        assert_eq!(config.default_search_limit, 20);
        assert_eq!(config.default_duplicate_limit, 20);
        assert_eq!(config.default_numeric_duplicate_limit, 50);
        assert_eq!(config.max_result_limit, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_partial_toml() {
        let file = write_config(
            ".toml",
            r#"
            max_concurrent_fetches = 4
            max_result_limit = 100

            [telemetry]
            log_query_text = true
            "#,
        );
        let config = LookupConfig::load(file.path()).unwrap();
        assert_eq!(config.max_concurrent_fetches, 4);
        assert_eq!(config.max_result_limit, Some(100));
        assert!(config.telemetry.log_query_text);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_load_json_and_empty() {
        let file = write_config(".json", r#"{"footer_cache_capacity": 8}"#);
        assert_eq!(LookupConfig::load(file.path()).unwrap().footer_cache_capacity, 8);

        let empty = write_config(".toml", "   \n");
        assert_eq!(LookupConfig::load(empty.path()).unwrap(), LookupConfig::default());
    }

    #[test]
    fn test_load_errors_are_config_errors() {
        let file = write_config(".toml", "max_concurrent_fetches = \"many\"");
        let err = LookupConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, LookupError::Config(_)));

        let err = LookupConfig::load(Path::new("/nonexistent/catasto.toml")).unwrap_err();
        assert!(matches!(err, LookupError::Config(_)));
    }

    #[test]
    fn test_validate() {
        let mut config = LookupConfig {
            max_concurrent_fetches: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_concurrent_fetches = 2;
        config.base_url = "https://example.org/anagrafica".to_string();
        assert!(config.validate().is_err());

        config.base_url = "file:///data/".to_string();
        assert!(config.validate().is_err());

        config.base_url = "https://example.org/anagrafica/".to_string();
        config.footer_cache_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_limit() {
        let mut config = LookupConfig::default();
        assert_eq!(config.effective_limit(None, 20), 20);
        assert_eq!(config.effective_limit(Some(5000), 20), 5000);

        config.max_result_limit = Some(100);
        assert_eq!(config.effective_limit(Some(5000), 20), 100);
        assert_eq!(config.effective_limit(Some(7), 20), 7);
    }
}
