use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Client configuration for the repository engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the resource API, without the `/api/v1` suffix.
    pub api_base: String,
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ClientConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            default_ttl_ms: default_ttl_ms(),
            request_timeout_ms: default_timeout_ms(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_ttl_ms() -> u64 {
    60_000
}
fn default_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_defaults() {
        let config: ClientConfig = toml::from_str(r#"api_base = "http://api.local""#).unwrap();
        assert_eq!(config.api_base, "http://api.local");
        assert_eq!(config.ttl(), Duration::from_millis(60_000));
        assert_eq!(config.timeout(), Duration::from_millis(5_000));
    }

    #[test]
    fn explicit_values_win() {
        let config: ClientConfig = toml::from_str(
            r#"
            api_base = "http://api.local"
            default_ttl_ms = 1000
            request_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.ttl(), Duration::from_millis(1000));
        assert_eq!(config.timeout(), Duration::from_millis(250));
    }
}
