use crate::models::Tier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub jobs: JobConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8790,
            db_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret. Empty means "generate an ephemeral one at
    /// startup", which invalidates all credentials on restart.
    #[serde(default)]
    pub secret: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub stream_ticket_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            access_ttl_minutes: 15,
            refresh_ttl_days: 7,
            stream_ticket_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierPolicy {
    pub generation_limit: u32,
    pub max_concurrent_jobs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub period_days: u32,
    pub starter: TierPolicy,
    pub professional: TierPolicy,
    pub agency: TierPolicy,
}

impl QuotaConfig {
    pub fn policy(&self, tier: Tier) -> TierPolicy {
        match tier {
            Tier::Starter => self.starter,
            Tier::Professional => self.professional,
            Tier::Agency => self.agency,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            period_days: 30,
            starter: TierPolicy {
                generation_limit: 50,
                max_concurrent_jobs: 1,
            },
            professional: TierPolicy {
                generation_limit: 200,
                max_concurrent_jobs: 3,
            },
            agency: TierPolicy {
                generation_limit: 2000,
                max_concurrent_jobs: 10,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub pool_size: usize,
    /// How long a job may wait for a free worker slot before failing
    /// with Unavailable.
    pub dispatch_wait_ms: u64,
    pub max_duration_secs: u64,
    /// Grace given to a canceled worker before the orchestrator forces
    /// the terminal transition itself.
    pub forced_stop_ms: u64,
    /// Reconciliation: a non-terminal job with no forward progress for
    /// this long is forced to Failed and its reservation released.
    pub stall_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    /// How long terminal job records stay pollable.
    pub terminal_retention_secs: u64,
    pub retry_transient: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            dispatch_wait_ms: 2_000,
            max_duration_secs: 300,
            forced_stop_ms: 1_500,
            stall_timeout_secs: 120,
            reconcile_interval_secs: 30,
            terminal_retention_secs: 3_600,
            retry_transient: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Bounded live channel depth per session. Overflow drops live
    /// frames only; the persistence buffer is unaffected and resume
    /// replays the gap.
    pub live_window: usize,
    /// How long a detached job waits for a reconnect before the
    /// orchestrator treats the viewer as gone.
    pub grace_ms: u64,
    /// Cancel a streaming job whose attached viewer disconnected and
    /// never came back within the grace window.
    pub cancel_on_abandon: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            live_window: 256,
            grace_ms: 15_000,
            cancel_on_abandon: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            api_key: String::new(),
            model: "deepseek-chat".to_string(),
            max_tokens: 3000,
            request_timeout_secs: 120,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            quota: QuotaConfig::default(),
            jobs: JobConfig::default(),
            delivery: DeliveryConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }

    pub fn load(path: &std::path::Path) -> crate::error::AppResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::new();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(host) = env_string("COPYFORGE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parse::<u16>("COPYFORGE_PORT") {
            self.server.port = port;
        }
        if let Some(path) = env_string("COPYFORGE_DB_PATH") {
            self.server.db_path = Some(PathBuf::from(path));
        }
        if let Some(secret) = env_string("COPYFORGE_AUTH_SECRET") {
            self.auth.secret = secret;
        }
        if let Some(key) = env_string("COPYFORGE_UPSTREAM_API_KEY") {
            self.upstream.api_key = key;
        }
        if let Some(url) = env_string("COPYFORGE_UPSTREAM_URL") {
            self.upstream.base_url = url;
        }
        if let Some(model) = env_string("COPYFORGE_UPSTREAM_MODEL") {
            self.upstream.model = model;
        }
        if let Some(size) = env_parse::<usize>("COPYFORGE_POOL_SIZE") {
            self.jobs.pool_size = size.max(1);
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tier_table() {
        let config = AppConfig::new();
        assert_eq!(config.quota.policy(Tier::Starter).generation_limit, 50);
        assert_eq!(config.quota.policy(Tier::Starter).max_concurrent_jobs, 1);
        assert_eq!(
            config.quota.policy(Tier::Professional).generation_limit,
            200
        );
        assert_eq!(config.quota.policy(Tier::Agency).generation_limit, 2000);
    }

    #[test]
    fn config_parses_partial_json() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{"server": {"host": "0.0.0.0", "port": 9000, "db_path": null}}"#)
                .unwrap();
        assert_eq!(parsed.server.port, 9000);
        assert_eq!(parsed.auth.access_ttl_minutes, 15);
    }
}
