// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
#![deny(unused_imports, dead_code)]
use std::{
  net::{Ipv4Addr, Ipv6Addr, SocketAddr},
  sync::Arc,
};

use futures::{future::BoxFuture, FutureExt};
use tokio::sync::OnceCell;

use crate::{
  common::{
    config::{ConfigError, QuicDialerConfig},
    transport::{Session, SessionConnector, StreamId, TransportError},
  },
  util::quinn_stream::QuinnStream,
};

/// Establishes quinn sessions from lazily-bound client endpoints
///
/// One endpoint is shared by every session of an address family, or a single
/// endpoint when an explicit bind address is configured.
pub struct QuinnConnector {
  client_config: quinn::ClientConfig,
  server_name: Option<String>,
  bind_addr: Option<SocketAddr>,
  bound: OnceCell<quinn::Endpoint>,
  v4: OnceCell<quinn::Endpoint>,
  v6: OnceCell<quinn::Endpoint>,
}

impl QuinnConnector {
  /// Builds a connector from a client TLS context, setting its ALPN list from `config`
  pub fn new(mut tls: rustls::ClientConfig, config: &QuicDialerConfig) -> Result<Self, ConfigError> {
    config.validate()?;
    tls.alpn_protocols = config.alpn_protocols();

    let idle_timeout = quinn::VarInt::from_u64(config.idle_timeout_ms)
      .map_err(|_| ConfigError::IdleTimeoutOutOfRange(config.idle_timeout_ms))?;
    let mut transport = quinn::TransportConfig::default();
    transport
      .keep_alive_interval(Some(config.keep_alive_interval()))
      .max_idle_timeout(Some(idle_timeout.into()));

    let mut client_config = quinn::ClientConfig::new(Arc::new(tls));
    client_config.transport_config(Arc::new(transport));

    Ok(Self {
      client_config,
      server_name: config.server_name.clone(),
      bind_addr: config.bind_addr,
      bound: OnceCell::new(),
      v4: OnceCell::new(),
      v6: OnceCell::new(),
    })
  }

  async fn endpoint_for(&self, remote: &SocketAddr) -> Result<&quinn::Endpoint, TransportError> {
    let (cell, bind_addr) = match self.bind_addr {
      Some(bind_addr) => (&self.bound, bind_addr),
      None if remote.is_ipv4() => (&self.v4, SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))),
      None => (&self.v6, SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))),
    };
    cell
      .get_or_try_init(|| async move {
        let endpoint = quinn::Endpoint::client(bind_addr)?;
        tracing::debug!(local = ?endpoint.local_addr().ok(), "bound quic client endpoint");
        Ok::<_, TransportError>(endpoint)
      })
      .await
  }

  fn server_name_for<'a>(&'a self, address: &'a str) -> &'a str {
    match &self.server_name {
      Some(server_name) => server_name.as_str(),
      None => host_of(address),
    }
  }
}

/// Host part of a `host:port` destination, without IPv6 brackets
pub fn host_of(address: &str) -> &str {
  let host = address
    .rsplit_once(':')
    .map(|(host, _port)| host)
    .unwrap_or(address);
  host
    .strip_prefix('[')
    .and_then(|h| h.strip_suffix(']'))
    .unwrap_or(host)
}

impl SessionConnector for QuinnConnector {
  type Session = QuinnSession;

  fn connect<'a>(
    &'a self,
    address: &'a str,
  ) -> BoxFuture<'a, Result<Self::Session, TransportError>> {
    async move {
      let remote = tokio::net::lookup_host(address)
        .await
        .map_err(|e| TransportError::Unresolvable(format!("{}: {}", address, e)))?
        .next()
        .ok_or_else(|| TransportError::Unresolvable(address.to_string()))?;
      let endpoint = self.endpoint_for(&remote).await?;
      let server_name = self.server_name_for(address);
      let connection = endpoint
        .connect_with(self.client_config.clone(), remote, server_name)?
        .await?;

      let bound = endpoint.local_addr()?;
      let local = SocketAddr::new(
        connection.local_ip().unwrap_or_else(|| bound.ip()),
        bound.port(),
      );
      let alpn = connection
        .handshake_data()
        .and_then(|data| data.downcast::<quinn::crypto::rustls::HandshakeData>().ok())
        .and_then(|data| data.protocol);
      Ok(QuinnSession {
        connection,
        local,
        server_name: server_name.to_owned(),
        alpn,
      })
    }
    .boxed()
  }
}

pub struct QuinnSession {
  connection: quinn::Connection,
  local: SocketAddr,
  server_name: String,
  alpn: Option<Vec<u8>>,
}

impl QuinnSession {
  /// Application protocol the peer agreed to during the handshake
  pub fn alpn(&self) -> Option<&[u8]> {
    self.alpn.as_deref()
  }
}

impl std::fmt::Debug for QuinnSession {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QuinnSession")
      .field("local", &self.local)
      .field("remote", &self.connection.remote_address())
      .field("server_name", &self.server_name)
      .finish_non_exhaustive()
  }
}

impl Session for QuinnSession {
  type Stream = QuinnStream;

  fn local_addr(&self) -> SocketAddr {
    self.local
  }

  fn remote_addr(&self) -> SocketAddr {
    self.connection.remote_address()
  }

  fn peer_name(&self) -> Option<&str> {
    Some(self.server_name.as_str())
  }

  fn open_stream(&self) -> BoxFuture<'_, Result<(StreamId, Self::Stream), TransportError>> {
    self
      .connection
      .open_bi()
      .map(|result| match result {
        Ok((send, recv)) => Ok((StreamId::from(send.id()), QuinnStream::new((send, recv)))),
        Err(e) => Err(e.into()),
      })
      .boxed()
  }

  fn is_closed(&self) -> bool {
    self.connection.close_reason().is_some()
  }

  fn close(&self) {
    self.connection.close(quinn::VarInt::from_u32(0), b"dialer closed");
  }
}

impl From<quinn::ConnectionError> for TransportError {
  fn from(connection_error: quinn::ConnectionError) -> Self {
    match connection_error {
      quinn::ConnectionError::VersionMismatch => Self::VersionMismatch,
      quinn::ConnectionError::TransportError(e) => Self::Protocol(e.to_string()),
      quinn::ConnectionError::ConnectionClosed(_) => Self::ConnectionClosed,
      quinn::ConnectionError::ApplicationClosed(_) => Self::ApplicationClosed,
      quinn::ConnectionError::Reset => Self::Reset,
      quinn::ConnectionError::TimedOut => Self::TimedOut,
      quinn::ConnectionError::LocallyClosed => Self::LocallyClosed,
    }
  }
}

impl From<quinn::ConnectError> for TransportError {
  fn from(connect_error: quinn::ConnectError) -> Self {
    Self::Rejected(connect_error.to_string())
  }
}
