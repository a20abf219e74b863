use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::time::Duration;

use crate::search::{SerpApiSettings, DEFAULT_MAX_PAGES, DEFAULT_SERPAPI_BASE_URL};

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub serpapi_key: Option<String>,
    pub serpapi_base_url: String,
    pub search_location: String,
    pub search_language: String,
    pub search_country: String,
    pub search_max_pages: usize,
    pub poll_interval: Duration,
    pub port: u16,
    pub authority_table_path: Option<PathBuf>,
    pub log_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_path: get_env_var_or("DATABASE_PATH", "pressclip.db"),
            serpapi_key: get_optional_env_var("SERPAPI_KEY"),
            serpapi_base_url: get_env_var_or("SERPAPI_BASE_URL", DEFAULT_SERPAPI_BASE_URL),
            search_location: get_env_var_or("SEARCH_LOCATION", "United States"),
            search_language: get_env_var_or("SEARCH_LANGUAGE", "en"),
            search_country: get_env_var_or("SEARCH_COUNTRY", "us"),
            search_max_pages: parse_env_var("SEARCH_MAX_PAGES", DEFAULT_MAX_PAGES)?,
            poll_interval: Duration::from_secs(parse_env_var("POLL_INTERVAL_SECS", 5u64)?),
            port: parse_env_var("PORT", 8080u16)?,
            authority_table_path: get_optional_env_var("AUTHORITY_TABLE_PATH").map(PathBuf::from),
            log_dir: get_env_var_or("LOG_DIR", "logs"),
        })
    }

    /// Provider settings; fails when `SERPAPI_KEY` is not set.
    pub fn serpapi_settings(&self) -> Result<SerpApiSettings> {
        let api_key = self
            .serpapi_key
            .clone()
            .ok_or_else(|| anyhow!("Missing required environment variable: SERPAPI_KEY"))?;

        Ok(SerpApiSettings {
            api_key,
            base_url: self.serpapi_base_url.clone(),
            location: self.search_location.clone(),
            language: self.search_language.clone(),
            country: self.search_country.clone(),
        })
    }
}

/// Value of `var`, or `None` when unset or blank.
pub fn get_optional_env_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn get_env_var_or(var: &str, default: &str) -> String {
    get_optional_env_var(var).unwrap_or_else(|| default.to_string())
}

/// Parses `var` into `T`, using `default` when unset. A value that does not
/// parse is an error rather than silently falling back.
pub fn parse_env_var<T>(var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get_optional_env_var(var) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", var, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names so they can run in parallel.

    #[test]
    fn test_optional_and_default_values() {
        env::remove_var("PRESSCLIP_TEST_UNSET");
        assert_eq!(get_optional_env_var("PRESSCLIP_TEST_UNSET"), None);
        assert_eq!(get_env_var_or("PRESSCLIP_TEST_UNSET", "fallback"), "fallback");

        env::set_var("PRESSCLIP_TEST_BLANK", "   ");
        assert_eq!(get_optional_env_var("PRESSCLIP_TEST_BLANK"), None);

        env::set_var("PRESSCLIP_TEST_SET", " value ");
        assert_eq!(get_env_var_or("PRESSCLIP_TEST_SET", "fallback"), "value");
    }

    #[test]
    fn test_parse_env_var() {
        env::remove_var("PRESSCLIP_TEST_PORT");
        assert_eq!(parse_env_var("PRESSCLIP_TEST_PORT", 8080u16).unwrap(), 8080);

        env::set_var("PRESSCLIP_TEST_PORT", "9000");
        assert_eq!(parse_env_var("PRESSCLIP_TEST_PORT", 8080u16).unwrap(), 9000);

        env::set_var("PRESSCLIP_TEST_PORT", "not-a-port");
        let err = parse_env_var("PRESSCLIP_TEST_PORT", 8080u16).unwrap_err();
        assert!(err.to_string().contains("PRESSCLIP_TEST_PORT"));
    }

    #[test]
    fn test_serpapi_settings_require_key() {
        let mut config = Config {
            database_path: "pressclip.db".to_string(),
            serpapi_key: None,
            serpapi_base_url: DEFAULT_SERPAPI_BASE_URL.to_string(),
            search_location: "United States".to_string(),
            search_language: "en".to_string(),
            search_country: "us".to_string(),
            search_max_pages: DEFAULT_MAX_PAGES,
            poll_interval: Duration::from_secs(5),
            port: 8080,
            authority_table_path: None,
            log_dir: "logs".to_string(),
        };
        assert!(config.serpapi_settings().is_err());

        config.serpapi_key = Some("secret".to_string());
        config.search_country = "gb".to_string();
        let settings = config.serpapi_settings().unwrap();
        assert_eq!(settings.api_key, "secret");
        assert_eq!(settings.country, "gb");
    }
}
