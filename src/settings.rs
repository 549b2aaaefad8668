use config::{Config, ConfigError, File};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct CircuitBreaker {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_seconds() -> u64 {
    60
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    #[serde(default)]
    pub http_urls: Vec<String>,
    /// Widest block range sent in one `eth_getLogs`
    #[serde(default = "default_max_block_span")]
    pub max_block_span: u64,
    #[serde(default = "default_max_split_depth")]
    pub max_split_depth: u32,
    #[serde(default = "default_qps_limit")]
    pub qps_limit: u32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreaker,
}

fn default_max_block_span() -> u64 {
    100_000
}
fn default_max_split_depth() -> u32 {
    400
}
fn default_qps_limit() -> u32 {
    25
}
fn default_max_concurrency() -> usize {
    8
}
fn default_retry_attempts() -> usize {
    2
}
fn default_retry_base_delay_ms() -> u64 {
    200
}
fn default_request_timeout_seconds() -> u64 {
    30
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            http_urls: Vec::new(),
            max_block_span: default_max_block_span(),
            max_split_depth: default_max_split_depth(),
            qps_limit: default_qps_limit(),
            max_concurrency: default_max_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_seconds: default_request_timeout_seconds(),
            circuit_breaker: CircuitBreaker::default(),
        }
    }
}

/// One marketplace deployment.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub marketplace_address: String,
    /// First block scanned when the chain has no cursor yet
    #[serde(default)]
    pub deployment_block: u64,
    /// Overrides `rpc.http_urls` for this chain
    #[serde(default)]
    pub rpc_urls: Vec<String>,
}

impl ChainConfig {
    pub fn marketplace_address(&self) -> anyhow::Result<Address> {
        Address::from_str(self.marketplace_address.trim()).map_err(|e| {
            anyhow::anyhow!(
                "Invalid marketplace address '{}' for chain {}: {}",
                self.marketplace_address,
                self.chain_id,
                e
            )
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Sync {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Classification failures before a log is dead-lettered
    #[serde(default = "default_quarantine_threshold")]
    pub quarantine_threshold: u32,
}

fn default_interval_seconds() -> u64 {
    300
}
fn default_quarantine_threshold() -> u32 {
    3
}

impl Default for Sync {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            quarantine_threshold: default_quarantine_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_max_connections() -> u32 {
    10
}
fn default_schema() -> String {
    "marketplace".to_string()
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            schema: default_schema(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Redis {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub sync: Sync,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub redis: Redis,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub metrics: Metrics,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_path("Config.toml")
    }

    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder().add_source(File::with_name(path)).build()?;
        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides(|key| env::var(key).ok());
        Ok(settings)
    }

    /// Environment overrides. `lookup` is `std::env::var` outside of tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw_http) = lookup("MARKET_RPC_HTTP_URLS") {
            if let Some(list) = parse_string_list(&raw_http) {
                if !list.is_empty() {
                    self.rpc.http_urls = list;
                }
            }
        }
        if let Some(span) = lookup("MARKET_MAX_BLOCK_SPAN").and_then(|v| v.trim().parse().ok()) {
            self.rpc.max_block_span = span;
        }
        if let Some(interval) =
            lookup("MARKET_SYNC_INTERVAL_SECONDS").and_then(|v| v.trim().parse().ok())
        {
            self.sync.interval_seconds = interval;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            if !url.trim().is_empty() {
                self.database.url = url.trim().to_string();
            }
        }
        if let Some(url) = lookup("REDIS_URL") {
            if !url.trim().is_empty() {
                self.redis.url = url.trim().to_string();
                self.redis.enabled = true;
            }
        }
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// RPC endpoints for a chain, falling back to the global list.
    pub fn rpc_urls_for(&self, chain: &ChainConfig) -> Vec<String> {
        if chain.rpc_urls.is_empty() {
            self.rpc.http_urls.clone()
        } else {
            chain.rpc_urls.clone()
        }
    }
}

/// Accepts a JSON array or a comma-separated list.
fn parse_string_list(input: &str) -> Option<Vec<String>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Some(vec![]);
    }

    if trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<Vec<String>>(trimmed) {
            return Some(v);
        }
        let without_brackets = trimmed.trim_start_matches('[').trim_end_matches(']');
        return Some(split_list(without_brackets));
    }

    Some(split_list(trimmed))
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn parses_json_and_comma_lists() {
        assert_eq!(
            parse_string_list(r#"["http://a", "http://b"]"#).unwrap(),
            vec!["http://a", "http://b"]
        );
        assert_eq!(
            parse_string_list("http://a, http://b").unwrap(),
            vec!["http://a", "http://b"]
        );
        assert_eq!(parse_string_list("[http://a]").unwrap(), vec!["http://a"]);
        assert!(parse_string_list("  ").unwrap().is_empty());
    }

    #[test]
    fn loads_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[rpc]
http_urls = ["http://localhost:8545"]

[[chains]]
chain_id = 4
marketplace_address = "0x0000000000000000000000000000000000000abc"
deployment_block = 10184159
"#
        )
        .unwrap();

        let settings = Settings::from_path(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.rpc.max_block_span, 100_000);
        assert_eq!(settings.rpc.max_split_depth, 400);
        assert_eq!(settings.sync.interval_seconds, 300);
        assert_eq!(settings.sync.quarantine_threshold, 3);

        let chain = settings.chain(4).unwrap();
        assert_eq!(chain.deployment_block, 10184159);
        assert_eq!(
            chain.marketplace_address().unwrap(),
            Address::from_low_u64_be(0xabc)
        );
        assert_eq!(settings.rpc_urls_for(chain), vec!["http://localhost:8545"]);
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            ("MARKET_RPC_HTTP_URLS", "http://x,http://y"),
            ("MARKET_MAX_BLOCK_SPAN", "2000"),
            ("DATABASE_URL", "postgres://localhost/market"),
            ("REDIS_URL", "redis://localhost"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.rpc.http_urls, vec!["http://x", "http://y"]);
        assert_eq!(settings.rpc.max_block_span, 2000);
        assert_eq!(settings.database.url, "postgres://localhost/market");
        assert!(settings.redis.enabled);
        assert_eq!(settings.sync.interval_seconds, 300);
    }

    #[test]
    fn bad_marketplace_address_is_reported() {
        let chain = ChainConfig {
            chain_id: 1,
            marketplace_address: "not-an-address".into(),
            deployment_block: 0,
            rpc_urls: vec![],
        };
        assert!(chain.marketplace_address().is_err());
    }
}
