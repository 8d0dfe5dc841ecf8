use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metadata::default_ignored_headers;
use crate::mime::APPLICATION_JSON;

pub const DEFAULT_RIAK_HTTP_BASE_URL: &str = "http://127.0.0.1:8098";
pub const BASE_URL_ENV: &str = "RIAK_HTTP_BASE_URL";
pub const TIMEOUT_ENV: &str = "RIAK_HTTP_TIMEOUT_MS";

/// Root paths of the Riak HTTP resources this client talks to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub ping: String,
    pub stats: String,
    /// Bucket, key, props, key-listing and secondary-index root.
    pub buckets: String,
    /// Riak Search (Solr-compatible) root.
    pub solr: String,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            ping: "/ping".to_string(),
            stats: "/stats".to_string(),
            buckets: "/buckets".to_string(),
            solr: "/solr".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Scheme, host and port. `https://` URLs go over rustls.
    pub base_url: String,
    /// Added to every request unless the query already carries them.
    pub default_headers: BTreeMap<String, String>,
    /// Response headers stripped before metadata decoding.
    pub ignore_headers: Vec<String>,
    pub resources: Resources,
    /// Whole-request timeout handed to the transport. `None` leaves it unbounded.
    pub request_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut default_headers = BTreeMap::new();
        default_headers.insert("content-type".to_string(), APPLICATION_JSON.to_string());
        default_headers.insert("accept".to_string(), "*/*".to_string());

        Self {
            base_url: DEFAULT_RIAK_HTTP_BASE_URL.to_string(),
            default_headers,
            ignore_headers: default_ignored_headers(),
            resources: Resources::default(),
            request_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `RIAK_HTTP_BASE_URL` and `RIAK_HTTP_TIMEOUT_MS`.
    /// Blank or unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(base_url) = env_value(BASE_URL_ENV) {
            config.base_url = base_url;
        }
        if let Some(timeout) = env_value(TIMEOUT_ENV).and_then(|value| value.parse().ok()) {
            config.request_timeout_ms = Some(timeout);
        }
        config
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn uses_tls(&self) -> bool {
        self.base_url
            .get(..8)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_riak_http_interface() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:8098");
        assert_eq!(
            config.default_headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(
            config.default_headers.get("accept").map(String::as_str),
            Some("*/*")
        );
        assert_eq!(
            config.ignore_headers,
            vec!["date", "content-length", "server", "vary"]
        );
        assert_eq!(config.resources.buckets, "/buckets");
        assert_eq!(config.resources.solr, "/solr");
        assert!(!config.uses_tls());
    }

    #[test]
    fn https_base_url_selects_tls() {
        assert!(ClientConfig::new("HTTPS://riak.internal:8069").uses_tls());
        assert!(!ClientConfig::new("http").uses_tls());
    }

    #[test]
    fn partial_json_config_fills_defaults() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"base_url":"http://10.0.0.5:8098","resources":{"ping":"/riak/ping"}}"#,
        )
        .unwrap();
        assert_eq!(config.base_url, "http://10.0.0.5:8098");
        assert_eq!(config.resources.ping, "/riak/ping");
        assert_eq!(config.resources.stats, "/stats");
        assert_eq!(config.ignore_headers.len(), 4);
    }
}
