use crate::llm::LlmClientConfig;
use std::time::Duration;

pub const DEFAULT_BROKER_URL: &str = "memory://";
pub const DEFAULT_BRIDGE_ADDR: &str = "0.0.0.0:8080";

/// Runtime configuration for [`crate::Relay`]
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// `memory://`, `redis://host:port` or `rediss://...`
    pub broker_url: String,
    /// End a subscription after this long without a message; `None` waits forever
    pub subscription_idle_timeout: Option<Duration>,
    pub function_timeout: Duration,
    pub bridge_addr: String,
    pub llm: LlmClientConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            subscription_idle_timeout: None,
            function_timeout: Duration::from_millis(30_000),
            bridge_addr: DEFAULT_BRIDGE_ADDR.to_string(),
            llm: LlmClientConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let idle_secs: u64 = std::env::var("RELAY_SUBSCRIPTION_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Self {
            broker_url: std::env::var("REDIS_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BROKER_URL.to_string()),
            subscription_idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            function_timeout: Duration::from_millis(
                std::env::var("RELAY_FUNCTION_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30_000),
            ),
            bridge_addr: std::env::var("RELAY_BRIDGE_ADDR")
                .unwrap_or_else(|_| DEFAULT_BRIDGE_ADDR.to_string()),
            llm: LlmClientConfig::default(),
        }
    }
}
