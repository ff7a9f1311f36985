// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Endpoint identities reported by dialed connections

use std::{fmt::Display, net::SocketAddr};

use crate::common::transport::StreamId;

/// A network endpoint identity, as reported by a [Connection](crate::common::Connection)
///
/// Used for identification and logging only; never for dialing.
pub trait NetAddr: Display + std::fmt::Debug + Send + Sync {
  /// Name of the network kind, such as `"tcp"` or `"udp"`
  fn network(&self) -> &str;
}

impl<T: NetAddr + ?Sized> NetAddr for Box<T> {
  fn network(&self) -> &str {
    (**self).network()
  }
}

pub const NETWORK_TCP: &str = "tcp";
pub const NETWORK_UDP: &str = "udp";

/// A socket address tagged with the network kind it was observed on
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SocketAddress {
  network: &'static str,
  addr: SocketAddr,
}

impl SocketAddress {
  pub fn tcp(addr: SocketAddr) -> Self {
    Self {
      network: NETWORK_TCP,
      addr,
    }
  }

  pub fn udp(addr: SocketAddr) -> Self {
    Self {
      network: NETWORK_UDP,
      addr,
    }
  }
}

impl Display for SocketAddress {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    Display::fmt(&self.addr, f)
  }
}

impl NetAddr for SocketAddress {
  fn network(&self) -> &str {
    self.network
  }
}

/// A session-level address suffixed with the id of one stream inside that session
///
/// Streams multiplexed over one session share their socket addresses; the
/// suffix keeps each stream's reported identity distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamAddress<A = SocketAddress> {
  session: A,
  stream_id: StreamId,
}

impl<A> StreamAddress<A> {
  pub fn new(session: A, stream_id: StreamId) -> Self {
    Self { session, stream_id }
  }

  pub fn stream_id(&self) -> StreamId {
    self.stream_id
  }
}

impl<A: Display> Display for StreamAddress<A> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}.{}", self.session, self.stream_id)
  }
}

impl<A: NetAddr> NetAddr for StreamAddress<A> {
  fn network(&self) -> &str {
    self.session.network()
  }
}
