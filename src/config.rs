use std::env;

pub const API_KEY_VARIABLE_NAME: &str = "STABILITY_KEY";
pub const HOST_VARIABLE_NAME: &str = "STABILITY_HOST";
pub const DEFAULT_HOST: &str = "https://grpc.stability.ai:443";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    pub host: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_key: None,
            host: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `STABILITY_KEY` and `STABILITY_HOST`. Empty values count as unset.
    pub fn from_env() -> Self {
        let api_key = env::var(API_KEY_VARIABLE_NAME)
            .ok()
            .filter(|key| !key.is_empty());
        let host = env::var(HOST_VARIABLE_NAME)
            .ok()
            .filter(|host| !host.is_empty());

        ClientConfig { api_key, host }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn host_or_default(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_host() {
        let config = ClientConfig::new().with_api_key("test api key");
        assert_eq!(config.host_or_default(), DEFAULT_HOST);
        assert_eq!(config.api_key.as_deref(), Some("test api key"));
    }

    #[test]
    fn test_with_host() {
        let config = ClientConfig::new().with_host("https://localhost:7042");
        assert_eq!(config.host_or_default(), "https://localhost:7042");
        assert!(config.api_key.is_none());
    }
}
