use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerCfg {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

/// Per-million-token prices used to fill `usage.cost`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct PricingCfg {
    #[serde(default)]
    pub prompt_per_million: f64,
    #[serde(default)]
    pub completion_per_million: f64,
}

impl PricingCfg {
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.prompt_per_million
            + completion_tokens as f64 * self.completion_per_million)
            / 1_000_000.0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UpstreamCfg {
    /// OpenAI-compatible base URL; `/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable that contains the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Model used by the streaming route, which carries no model field.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Ask the provider for a trailing usage chunk (`stream_options.include_usage`).
    #[serde(default = "default_include_usage")]
    pub include_usage: bool,
    #[serde(default)]
    pub pricing: Option<PricingCfg>,
}

impl Default for UpstreamCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            include_usage: default_include_usage(),
            pricing: None,
        }
    }
}

fn default_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "DEEPSEEK_API_KEY".to_string()
}
fn default_model() -> String {
    "deepseek-chat".to_string()
}
fn default_max_tokens() -> u32 {
    2_000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_include_usage() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total timeout for non-streaming requests in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Longest gap allowed between two reads of a streamed body (default 30000ms)
    #[serde(default = "default_idle_chunk_timeout_ms")]
    pub idle_chunk_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            idle_chunk_timeout_ms: default_idle_chunk_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}
fn default_idle_chunk_timeout_ms() -> u64 {
    30_000
}

/// Seed for the in-memory account store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct QuotaCfg {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default = "default_tokens_limit")]
    pub tokens_limit: u64,
}

impl Default for QuotaCfg {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            tokens_used: 0,
            tokens_limit: default_tokens_limit(),
        }
    }
}

fn default_user_id() -> String {
    "local-user".to_string()
}
fn default_tokens_limit() -> u64 {
    500_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerCfg,
    #[serde(default)]
    pub upstream: UpstreamCfg,
    /// HTTP client configuration (timeouts, pooling). Missing in older configs → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub quota: QuotaCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::CoreError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::CoreError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::CoreError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::CoreError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::CoreError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::CoreError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("inkstream.json");
        let json = r#"{
          "server": {"bind": "0.0.0.0:8080"},
          "upstream": {
            "base_url": "http://localhost:9000/v1",
            "api_key_env": "TEST_KEY",
            "pricing": {"prompt_per_million": 0.27, "completion_per_million": 1.1}
          },
          "quota": {"user_id": "u1", "tokens_used": 10, "tokens_limit": 20}
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.upstream.api_key_env, "TEST_KEY");
        assert_eq!(cfg.upstream.default_model, "deepseek-chat");
        assert_eq!(cfg.upstream.max_tokens, 2_000);
        assert!(cfg.upstream.include_usage);
        assert_eq!(cfg.quota.tokens_limit, 20);
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.http.request_timeout_ms, 60_000);
        assert_eq!(cfg.http.idle_chunk_timeout_ms, 30_000);
        assert_eq!(cfg.http.pool_max_idle_per_host, None);
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/inkstream-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            crate::error::CoreError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_utf8_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        let bytes = vec![0xff, 0xfe, 0xfd, 0x00, 0x80];
        fs::write(&file, bytes).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            crate::error::CoreError::Other(_) => {}
            other => panic!("expected Other(utf8) error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_json_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        let json = r#"{ "upstream": { "max_tokens": "many" }"#;
        fs::write(&file, json).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            crate::error::CoreError::Other(_) => {}
            other => panic!("expected Other(json parse) error, got: {:?}", other),
        }
    }

    #[test]
    fn load_from_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("inkstream.toml");
        let toml = r#"
[upstream]
default_model = "deepseek-reasoner"
include_usage = false

[http]
idle_chunk_timeout_ms = 1500

[quota]
tokens_limit = 1000
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.upstream.default_model, "deepseek-reasoner");
        assert!(!cfg.upstream.include_usage);
        assert_eq!(cfg.http.idle_chunk_timeout_ms, 1_500);
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.quota.user_id, "local-user");
        assert_eq!(cfg.server.bind, "127.0.0.1:3000");
    }

    #[test]
    fn unknown_extension_falls_back_to_json_then_toml() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("inkstream.conf");
        fs::write(&json_path, r#"{"quota":{"tokens_limit":7}}"#).unwrap();
        let cfg_json_first = Config::from_path(&json_path).unwrap();
        assert_eq!(cfg_json_first.quota.tokens_limit, 7);

        let toml_path = dir.path().join("inkstream2.conf");
        fs::write(&toml_path, "[server]\nbind = \"127.0.0.1:9\"\n").unwrap();
        let cfg_toml_fallback = Config::from_path(&toml_path).unwrap();
        assert_eq!(cfg_toml_fallback.server.bind, "127.0.0.1:9");
        assert_eq!(cfg_toml_fallback.http, HttpCfg::default());
    }

    #[test]
    fn pricing_cost() {
        let p = PricingCfg {
            prompt_per_million: 2.0,
            completion_per_million: 4.0,
        };
        let cost = p.cost(500_000, 250_000);
        assert!((cost - 2.0).abs() < 1e-9);
    }
}
