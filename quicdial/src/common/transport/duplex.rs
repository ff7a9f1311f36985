// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! In-memory sessions over [tokio::io::duplex] pipes
//!
//! Each stream opened on a [DuplexSession] hands its far end to the
//! [DuplexAcceptor] created alongside the connector, so tests can play the
//! remote side without a network.
#![deny(unused_imports, dead_code)]
use std::{
  net::{IpAddr, Ipv4Addr, SocketAddr},
  pin::Pin,
  sync::{
    atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering},
    Arc,
  },
  task::{Context, Poll},
  time::Duration,
};

use futures::{future::BoxFuture, FutureExt, Stream};
use tokio::{
  io::DuplexStream,
  sync::mpsc::{self, UnboundedSender},
};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{
  quinn_transport::host_of, MonotonicStreamIdGenerator, Session, SessionConnector, StreamId,
  TransportError,
};

const DUPLEX_BUFFER_SIZE: usize = 8192;
const FIRST_LOCAL_PORT: u16 = 40000;

/// The remote end of a stream opened through a [DuplexConnector]'s sessions
#[derive(Debug)]
pub struct AcceptedStream {
  pub destination: String,
  pub stream_id: StreamId,
  pub stream: DuplexStream,
}

/// Receives the far end of every stream opened on sessions of the paired connector
pub struct DuplexAcceptor {
  incoming: UnboundedReceiverStream<AcceptedStream>,
}

impl Stream for DuplexAcceptor {
  type Item = AcceptedStream;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    Stream::poll_next(Pin::new(&mut self.incoming), cx)
  }
}

struct ConnectorState {
  connects: AtomicUsize,
  pending_failures: AtomicUsize,
  next_local_port: AtomicU16,
  accepted: UnboundedSender<AcceptedStream>,
}

pub struct DuplexConnector {
  state: Arc<ConnectorState>,
  latency: Option<Duration>,
  unresponsive: bool,
}

/// Produces a connector and the acceptor receiving the far ends of its streams
pub fn channel() -> (DuplexConnector, DuplexAcceptor) {
  let (accepted, incoming) = mpsc::unbounded_channel();
  let connector = DuplexConnector {
    state: Arc::new(ConnectorState {
      connects: AtomicUsize::new(0),
      pending_failures: AtomicUsize::new(0),
      next_local_port: AtomicU16::new(FIRST_LOCAL_PORT),
      accepted,
    }),
    latency: None,
    unresponsive: false,
  };
  let acceptor = DuplexAcceptor {
    incoming: UnboundedReceiverStream::new(incoming),
  };
  (connector, acceptor)
}

impl DuplexConnector {
  /// Delays every session establishment, simulating a handshake round-trip
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  /// Makes every session establishment wait forever
  pub fn unresponsive(mut self) -> Self {
    self.unresponsive = true;
    self
  }

  /// Fails the next `count` establishment attempts
  pub fn fail_next_connects(&self, count: usize) {
    self.state.pending_failures.store(count, Ordering::SeqCst);
  }

  /// Number of establishment attempts started, successful or not
  pub fn connect_count(&self) -> usize {
    self.state.connects.load(Ordering::SeqCst)
  }
}

fn take_one(counter: &AtomicUsize) -> bool {
  counter
    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
    .is_ok()
}

fn synthesized_remote(address: &str) -> SocketAddr {
  address.parse().unwrap_or_else(|_| {
    let port = address
      .rsplit_once(':')
      .and_then(|(_, port)| port.parse().ok())
      .unwrap_or(0);
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1)), port)
  })
}

impl SessionConnector for DuplexConnector {
  type Session = DuplexSession;

  fn connect<'a>(
    &'a self,
    address: &'a str,
  ) -> BoxFuture<'a, Result<Self::Session, TransportError>> {
    async move {
      self.state.connects.fetch_add(1, Ordering::SeqCst);
      if let Some(latency) = self.latency {
        tokio::time::sleep(latency).await;
      }
      if self.unresponsive {
        futures::future::pending::<()>().await;
      }
      if take_one(&self.state.pending_failures) {
        return Err(TransportError::Rejected(format!(
          "injected failure connecting to {}",
          address
        )));
      }
      let port = self.state.next_local_port.fetch_add(1, Ordering::SeqCst);
      Ok(DuplexSession {
        destination: address.to_string(),
        local: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
        remote: synthesized_remote(address),
        peer_name: host_of(address).to_string(),
        ids: MonotonicStreamIdGenerator::client_bidirectional(),
        closed: AtomicBool::new(false),
        streams_stalled: AtomicBool::new(false),
        pending_stream_failures: AtomicUsize::new(0),
        accepted: self.state.accepted.clone(),
      })
    }
    .boxed()
  }
}

pub struct DuplexSession {
  destination: String,
  local: SocketAddr,
  remote: SocketAddr,
  peer_name: String,
  ids: MonotonicStreamIdGenerator,
  closed: AtomicBool,
  streams_stalled: AtomicBool,
  pending_stream_failures: AtomicUsize,
  accepted: UnboundedSender<AcceptedStream>,
}

impl DuplexSession {
  /// Marks the session dead, as if its transport had silently failed
  pub fn kill(&self) {
    self.closed.store(true, Ordering::SeqCst);
  }

  /// Fails the next `count` stream-open attempts while the session stays alive
  pub fn fail_next_streams(&self, count: usize) {
    self.pending_stream_failures.store(count, Ordering::SeqCst);
  }

  /// Makes every later stream-open wait forever, as if stream credit never arrived
  pub fn stall_streams(&self) {
    self.streams_stalled.store(true, Ordering::SeqCst);
  }
}

impl std::fmt::Debug for DuplexSession {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DuplexSession")
      .field("destination", &self.destination)
      .field("local", &self.local)
      .field("remote", &self.remote)
      .field("closed", &self.closed)
      .finish_non_exhaustive()
  }
}

impl Session for DuplexSession {
  type Stream = DuplexStream;

  fn local_addr(&self) -> SocketAddr {
    self.local
  }

  fn remote_addr(&self) -> SocketAddr {
    self.remote
  }

  fn peer_name(&self) -> Option<&str> {
    Some(self.peer_name.as_str())
  }

  fn open_stream(&self) -> BoxFuture<'_, Result<(StreamId, Self::Stream), TransportError>> {
    if self.streams_stalled.load(Ordering::SeqCst) {
      return futures::future::pending().boxed();
    }
    let result = if self.is_closed() {
      Err(TransportError::ConnectionClosed)
    } else if take_one(&self.pending_stream_failures) {
      Err(TransportError::Protocol(String::from(
        "stream limit exhausted",
      )))
    } else {
      let (local, remote) = tokio::io::duplex(DUPLEX_BUFFER_SIZE);
      let stream_id = self.ids.next();
      self
        .accepted
        .send(AcceptedStream {
          destination: self.destination.clone(),
          stream_id,
          stream: remote,
        })
        .map_err(|_| TransportError::ConnectionClosed)
        .map(|_| (stream_id, local))
    };
    futures::future::ready(result).boxed()
  }

  fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  fn close(&self) {
    self.closed.store(true, Ordering::SeqCst);
  }
}
