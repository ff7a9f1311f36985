// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! The shared dialing contract and its transport-specific implementations

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{
  common::{
    connection::{BoxedConnection, Connection},
    transport::TransportError,
  },
  util::cancellation::CancellationListener,
};

pub mod quic;
pub mod tcp;

pub use self::{quic::QuicDialer, tcp::TcpDialer};

/// Produces connections to destinations, independent of the transport beneath
///
/// `hint` is an existing connection on the caller's side; dialers which must
/// bind to a particular local endpoint may consult it, others ignore it.
pub trait Dialer: Send + Sync {
  fn dial<'a>(
    &'a self,
    network: &'a str,
    address: &'a str,
    hint: Option<&'a dyn Connection>,
    cancel: CancellationListener,
  ) -> BoxFuture<'a, Result<BoxedConnection, DialError>>;
}

impl<T> Dialer for Arc<T>
where
  T: Dialer + ?Sized,
{
  fn dial<'a>(
    &'a self,
    network: &'a str,
    address: &'a str,
    hint: Option<&'a dyn Connection>,
    cancel: CancellationListener,
  ) -> BoxFuture<'a, Result<BoxedConnection, DialError>> {
    (**self).dial(network, address, hint, cancel)
  }
}

/// Identifies a dial target by network kind and address, rendered `network:address`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DestinationKey(Arc<str>);

impl DestinationKey {
  pub fn new(network: &str, address: &str) -> Self {
    Self(format!("{}:{}", network, address).into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for DestinationKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

impl std::fmt::Debug for DestinationKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("DestinationKey").field(&self.0).finish()
  }
}

/// Failures reported to callers of [Dialer::dial]; none are fatal, and none are retried here
#[derive(thiserror::Error, Debug, Clone)]
pub enum DialError {
  #[error("{destination}: session establishment failed: {source}")]
  SessionEstablish {
    destination: String,
    #[source]
    source: TransportError,
  },
  #[error("{destination}: can't open new stream: {source}")]
  StreamOpen {
    destination: String,
    #[source]
    source: TransportError,
  },
  #[error("Dialer has been closed")]
  Closed,
}

impl DialError {
  /// The transport-level cause, if the failure came from the transport
  pub fn transport_error(&self) -> Option<&TransportError> {
    match self {
      Self::SessionEstablish { source, .. } | Self::StreamOpen { source, .. } => Some(source),
      Self::Closed => None,
    }
  }

  /// Returns `true` if the dial was abandoned because the caller cancelled it.
  #[must_use]
  pub fn is_cancelled(&self) -> bool {
    self
      .transport_error()
      .map(TransportError::is_cancelled)
      .unwrap_or(false)
  }

  pub fn destination(&self) -> Option<&str> {
    match self {
      Self::SessionEstablish { destination, .. } | Self::StreamOpen { destination, .. } => {
        Some(destination)
      }
      Self::Closed => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::{DestinationKey, DialError};
  use crate::common::transport::TransportError;

  #[test]
  fn destination_key_joins_network_and_address() {
    let key = DestinationKey::new("tcp", "example:443");
    assert_eq!(key.as_str(), "tcp:example:443");
    assert_eq!(key, DestinationKey::new("tcp", "example:443"));
    assert_ne!(key, DestinationKey::new("udp", "example:443"));
  }

  #[test]
  fn dial_errors_name_their_destination() {
    let err = DialError::StreamOpen {
      destination: "example:443".into(),
      source: TransportError::ConnectionClosed,
    };
    assert_eq!(
      err.to_string(),
      "example:443: can't open new stream: Connection closed"
    );
    assert_eq!(err.destination(), Some("example:443"));
    assert!(!err.is_cancelled());

    let cancelled = DialError::SessionEstablish {
      destination: "example:443".into(),
      source: TransportError::Cancelled,
    };
    assert!(cancelled.is_cancelled());
    assert!(!DialError::Closed.is_cancelled());
  }
}
