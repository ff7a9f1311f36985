// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Seams between the dialer and the secure multiplexed transport beneath it

#![warn(unused_imports, dead_code, unused_variables)]

use std::{net::SocketAddr, sync::Arc};

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod duplex;
pub mod id;
pub mod quinn_transport;

pub use self::id::{MonotonicStreamIdGenerator, StreamId};

#[derive(thiserror::Error, Debug, Clone)]
pub enum TransportError {
  #[error("Connection closed")]
  ConnectionClosed,
  #[error("Connection closed by application")]
  ApplicationClosed,
  #[error("Connection timed out")]
  TimedOut,
  #[error("Connection reset by peer")]
  Reset,
  #[error("Peer does not support a compatible protocol version")]
  VersionMismatch,
  #[error("Transport error encountered: {0}")]
  Protocol(String),
  #[error("Connection closed locally")]
  LocallyClosed,
  #[error("Connection attempt rejected: {0}")]
  Rejected(String),
  #[error("Could not resolve destination {0}")]
  Unresolvable(String),
  #[error("Local I/O failure: {0}")]
  Io(#[source] Arc<std::io::Error>),
  #[error("Cancelled")]
  Cancelled,
}

impl TransportError {
  /// Returns `true` if the error was produced by the caller's cancellation.
  #[must_use]
  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Cancelled)
  }
}

impl From<std::io::Error> for TransportError {
  fn from(io_error: std::io::Error) -> Self {
    Self::Io(Arc::new(io_error))
  }
}

/// A bidirectional byte stream multiplexed inside a [Session]
pub trait SessionStream: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static {}

impl<T> SessionStream for T where T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static {}

/// An established secure association with one remote endpoint, hosting many streams
///
/// Implementations must allow concurrent stream creation and per-stream I/O
/// without external locking.
pub trait Session: Send + Sync + 'static {
  type Stream: SessionStream;

  fn local_addr(&self) -> SocketAddr;

  fn remote_addr(&self) -> SocketAddr;

  /// Peer identity negotiated during the secure handshake, if known
  fn peer_name(&self) -> Option<&str>;

  /// Opens a new outgoing bidirectional stream; may wait for stream credit
  fn open_stream(&self) -> BoxFuture<'_, Result<(StreamId, Self::Stream), TransportError>>;

  /// If the transport has deemed this session dead
  fn is_closed(&self) -> bool;

  /// Closes the session and every stream within it
  fn close(&self);
}

/// Establishes new [Session]s to destinations given as `host:port` strings
pub trait SessionConnector: Send + Sync + 'static {
  type Session: Session;

  fn connect<'a>(&'a self, address: &'a str)
    -> BoxFuture<'a, Result<Self::Session, TransportError>>;
}

impl<T> SessionConnector for Arc<T>
where
  T: SessionConnector,
{
  type Session = T::Session;

  fn connect<'a>(
    &'a self,
    address: &'a str,
  ) -> BoxFuture<'a, Result<Self::Session, TransportError>> {
    (**self).connect(address)
  }
}
