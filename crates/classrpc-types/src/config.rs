//! Bridge configuration.

use crate::surface::NamingRules;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum wire frame size (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Configuration shared by both halves of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Suffix marking synchronous members.
    pub sync_suffix: String,
    /// Prefix marking private members.
    pub private_prefix: String,
    /// Upper bound on a blocking call, in milliseconds. `None` waits forever.
    pub sync_call_timeout_ms: Option<u64>,
    /// Maximum size of a single wire frame.
    pub max_message_size: u32,
    /// Address the origin side listens on.
    pub listen_addr: String,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let naming = NamingRules::default();
        Self {
            sync_suffix: naming.sync_suffix,
            private_prefix: naming.private_prefix,
            sync_call_timeout_ms: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            listen_addr: "127.0.0.1:7070".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Naming rules derived from this config.
    pub fn naming(&self) -> NamingRules {
        NamingRules {
            sync_suffix: self.sync_suffix.clone(),
            private_prefix: self.private_prefix.clone(),
        }
    }

    /// Bounded wait for blocking calls, if configured.
    pub fn sync_call_timeout(&self) -> Option<Duration> {
        self.sync_call_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.naming(), NamingRules::default());
        assert_eq!(config.sync_call_timeout(), None);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"sync_call_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.sync_call_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.sync_suffix, "Sync");
    }

    #[test]
    fn test_zero_timeout_means_unbounded() {
        let config = BridgeConfig {
            sync_call_timeout_ms: Some(0),
            ..Default::default()
        };
        assert_eq!(config.sync_call_timeout(), None);
    }
}
