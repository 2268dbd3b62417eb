//! Process configuration

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::Group;

/// Default relay listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Default relay URL for endpoints
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:3000";

/// Default seconds an endpoint waits for a peer's public value
pub const DEFAULT_KEY_TIMEOUT_SECS: u64 = 30;

/// Relay process configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// DH group whose modulus is handed to every connection
    #[serde(with = "group_name")]
    pub group: Group,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            group: Group::default(),
        }
    }
}

impl RelayConfig {
    /// `host:port`, parsed
    pub fn listen_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("invalid listen address {}:{}: {}", self.host, self.port, e))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("host must not be empty".to_string());
        }
        self.listen_addr().map(|_| ())
    }
}

/// Endpoint process configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Name to register under
    pub client_id: String,
    /// Relay WebSocket URL
    pub relay_url: String,
    /// Seconds to wait for a peer's public value; 0 waits forever
    pub key_timeout_secs: u64,
}

impl EndpointConfig {
    /// Create with a name and default relay settings
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            relay_url: DEFAULT_RELAY_URL.to_string(),
            key_timeout_secs: DEFAULT_KEY_TIMEOUT_SECS,
        }
    }

    /// Key discovery timeout, if enabled
    pub fn key_timeout(&self) -> Option<Duration> {
        (self.key_timeout_secs > 0).then(|| Duration::from_secs(self.key_timeout_secs))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.client_id.is_empty() {
            return Err("client id must not be empty".to_string());
        }
        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(format!("relay url must be ws:// or wss://, got {}", self.relay_url));
        }
        Ok(())
    }
}

mod group_name {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::crypto::Group;

    pub fn serialize<S: Serializer>(group: &Group, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(group.name())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Group, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.group, Group::Modp2048);
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn test_relay_bad_host() {
        let config = RelayConfig {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_config_serde() {
        let config = RelayConfig {
            group: Group::Modp1024,
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["group"], "modp1024");

        let back: RelayConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.group, Group::Modp1024);
        assert!(serde_json::from_str::<RelayConfig>(r#"{"host":"h","port":1,"group":"modp9"}"#).is_err());
    }

    #[test]
    fn test_endpoint_key_timeout() {
        let mut config = EndpointConfig::new("alice");
        assert_eq!(config.key_timeout(), Some(Duration::from_secs(30)));

        config.key_timeout_secs = 0;
        assert_eq!(config.key_timeout(), None);
    }

    #[test]
    fn test_endpoint_validate() {
        assert!(EndpointConfig::new("alice").validate().is_ok());
        assert!(EndpointConfig::new("").validate().is_err());

        let mut config = EndpointConfig::new("alice");
        config.relay_url = "http://localhost:3000".to_string();
        assert!(config.validate().is_err());
    }
}
