// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use std::{net::SocketAddr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::util::ALPN_RELAY;

/// Parameters for QUIC sessions established by the dialer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuicDialerConfig {
  /// Application protocol identifier negotiated with every destination
  pub alpn: String,
  pub keep_alive_interval_ms: u64,
  pub idle_timeout_ms: u64,
  /// TLS server name override; when unset, the host part of the destination is used
  pub server_name: Option<String>,
  /// Local bind address; when unset, an unspecified address of the destination's family
  pub bind_addr: Option<SocketAddr>,
}

impl Default for QuicDialerConfig {
  fn default() -> Self {
    Self {
      alpn: String::from_utf8_lossy(ALPN_RELAY).into_owned(),
      keep_alive_interval_ms: 5_000,
      idle_timeout_ms: 30_000,
      server_name: None,
      bind_addr: None,
    }
  }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  #[error("An application protocol identifier is required")]
  EmptyAlpn,
  #[error("Keep-alive interval must be non-zero")]
  ZeroKeepAlive,
  #[error("Idle timeout ({idle_timeout_ms}ms) must exceed the keep-alive interval ({keep_alive_interval_ms}ms)")]
  IdleTimeoutTooShort {
    idle_timeout_ms: u64,
    keep_alive_interval_ms: u64,
  },
  #[error("Idle timeout of {0}ms is not representable by the transport")]
  IdleTimeoutOutOfRange(u64),
}

impl QuicDialerConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.alpn.is_empty() {
      return Err(ConfigError::EmptyAlpn);
    }
    if self.keep_alive_interval_ms == 0 {
      return Err(ConfigError::ZeroKeepAlive);
    }
    if self.idle_timeout_ms <= self.keep_alive_interval_ms {
      return Err(ConfigError::IdleTimeoutTooShort {
        idle_timeout_ms: self.idle_timeout_ms,
        keep_alive_interval_ms: self.keep_alive_interval_ms,
      });
    }
    Ok(())
  }

  pub fn keep_alive_interval(&self) -> Duration {
    Duration::from_millis(self.keep_alive_interval_ms)
  }

  pub fn idle_timeout(&self) -> Duration {
    Duration::from_millis(self.idle_timeout_ms)
  }

  pub fn alpn_protocols(&self) -> Vec<Vec<u8>> {
    vec![self.alpn.as_bytes().to_vec()]
  }
}

#[cfg(test)]
mod tests {
  use super::{ConfigError, QuicDialerConfig};

  #[test]
  fn defaults_negotiate_relay_protocol() {
    let config = QuicDialerConfig::default();
    assert_eq!(config.alpn, "relay");
    assert_eq!(config.alpn_protocols(), vec![b"relay".to_vec()]);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn partial_json_fills_defaults() {
    let config: QuicDialerConfig =
      serde_json::from_str(r#"{ "server_name": "relay.example", "keep_alive_interval_ms": 1000 }"#)
        .unwrap();
    assert_eq!(config.server_name.as_deref(), Some("relay.example"));
    assert_eq!(config.keep_alive_interval_ms, 1000);
    assert_eq!(config.idle_timeout_ms, QuicDialerConfig::default().idle_timeout_ms);
    assert_eq!(config.bind_addr, None);
  }

  #[test]
  fn unknown_fields_are_rejected() {
    let parsed = serde_json::from_str::<QuicDialerConfig>(r#"{ "keepalive": true }"#);
    assert!(parsed.is_err());
  }

  #[test]
  fn idle_timeout_must_outlast_keep_alive() {
    let config = QuicDialerConfig {
      keep_alive_interval_ms: 10_000,
      idle_timeout_ms: 10_000,
      ..Default::default()
    };
    assert_eq!(
      config.validate(),
      Err(ConfigError::IdleTimeoutTooShort {
        idle_timeout_ms: 10_000,
        keep_alive_interval_ms: 10_000,
      })
    );
  }

  #[test]
  fn empty_alpn_is_rejected() {
    let config = QuicDialerConfig {
      alpn: String::new(),
      ..Default::default()
    };
    assert_eq!(config.validate(), Err(ConfigError::EmptyAlpn));
  }
}
