//! Connection settings for the PostgREST endpoint.

use std::env;

/// Environment variable holding the PostgREST base URL.
pub const URL_VAR: &str = "POSTGREST_URL";
/// Environment variable holding the optional bearer credential.
pub const API_KEY_VAR: &str = "POSTGREST_API_KEY";
/// Base URL used when `POSTGREST_URL` is unset.
pub const DEFAULT_URL: &str = "http://postgrest:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl StoreConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    /// Read `POSTGREST_URL` and `POSTGREST_API_KEY` from the process
    /// environment. An empty key counts as no key.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = lookup(URL_VAR)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        Self::new(base_url, lookup(API_KEY_VAR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = StoreConfig::from_lookup(|_| None);
        assert_eq!(config.base_url, DEFAULT_URL);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn reads_url_and_key() {
        let config = StoreConfig::from_lookup(|name| match name {
            URL_VAR => Some("https://db.example.com/rest/".to_string()),
            API_KEY_VAR => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(config.base_url, "https://db.example.com/rest/");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn empty_key_means_no_credential() {
        let config = StoreConfig::new("http://localhost:3000", Some(String::new()));
        assert!(config.api_key.is_none());
    }
}
