//! Configuration for conductor-proxy
//!
//! Plain config values constructed once by the embedding process and passed
//! by value into the proxy layer. The library reads no environment state of
//! its own.

use std::time::Duration;

/// Runtime configuration for an [`AppProxy`](crate::AppProxy).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Default timeout applied to zome calls without an explicit timeout
    pub default_timeout: Duration,
    /// Timeout for the `entry_defs` introspection call
    pub entry_defs_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
            entry_defs_timeout: Duration::from_secs(2),
        }
    }
}

/// Configuration for establishing a [`ConductorSession`](crate::transport::ConductorSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// App interface WebSocket URL
    pub app_url: String,
    /// Timeout for individual wire requests
    pub request_timeout: Duration,
    /// Optional authentication token sent after connecting
    pub auth_token: Option<Vec<u8>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_url: "ws://localhost:4445".to_string(),
            request_timeout: Duration::from_secs(60),
            auth_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.default_timeout, Duration::from_secs(10));
        assert_eq!(config.entry_defs_timeout, Duration::from_secs(2));

        let session = SessionConfig::default();
        assert_eq!(session.app_url, "ws://localhost:4445");
        assert!(session.auth_token.is_none());
    }
}
