// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use std::{
  io::Error as IOError,
  pin::Pin,
  sync::Arc,
  task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::common::{
  address::{NetAddr, SocketAddress, StreamAddress},
  transport::{Session, StreamId},
};

/// A bidirectional byte connection, as produced by every [Dialer](crate::common::Dialer)
///
/// Shutting down the write half signals end-of-stream to the peer; dropping
/// the connection releases it entirely.
pub trait Connection: AsyncRead + AsyncWrite + Send + Sync + Unpin {
  fn local_addr(&self) -> Box<dyn NetAddr>;

  fn remote_addr(&self) -> Box<dyn NetAddr>;
}

pub type BoxedConnection = Box<dyn Connection>;

impl<T: Connection + ?Sized> Connection for Box<T> {
  fn local_addr(&self) -> Box<dyn NetAddr> {
    (**self).local_addr()
  }

  fn remote_addr(&self) -> Box<dyn NetAddr> {
    (**self).remote_addr()
  }
}

/// One stream of a multiplexed session, presented as a [Connection]
///
/// Holds its session only for address lookups; closing or dropping this
/// connection ends the stream and leaves the session and its other streams
/// untouched.
pub struct QuicConnection<S: Session> {
  stream: S::Stream,
  stream_id: StreamId,
  session: Arc<S>,
  span: tracing::Span,
}

impl<S: Session> QuicConnection<S> {
  pub fn new(session: Arc<S>, stream_id: StreamId, stream: S::Stream, span: tracing::Span) -> Self {
    Self {
      stream,
      stream_id,
      session,
      span,
    }
  }

  pub fn stream_id(&self) -> StreamId {
    self.stream_id
  }

  pub fn session(&self) -> &Arc<S> {
    &self.session
  }

  /// Span carrying this connection's `local-remote.id` label
  pub fn span(&self) -> &tracing::Span {
    &self.span
  }

  pub fn local_stream_addr(&self) -> StreamAddress {
    StreamAddress::new(
      SocketAddress::udp(self.session.local_addr()),
      self.stream_id,
    )
  }

  pub fn remote_stream_addr(&self) -> StreamAddress {
    StreamAddress::new(
      SocketAddress::udp(self.session.remote_addr()),
      self.stream_id,
    )
  }
}

/// Label identifying a stream in logs: `<local>-<remote>.<stream-id>`
pub fn connection_label<S: Session + ?Sized>(session: &S, stream_id: StreamId) -> String {
  format!(
    "{}-{}.{}",
    session.local_addr(),
    session.remote_addr(),
    stream_id
  )
}

impl<S: Session> Connection for QuicConnection<S> {
  fn local_addr(&self) -> Box<dyn NetAddr> {
    Box::new(self.local_stream_addr())
  }

  fn remote_addr(&self) -> Box<dyn NetAddr> {
    Box::new(self.remote_stream_addr())
  }
}

impl<S: Session> AsyncRead for QuicConnection<S> {
  fn poll_read(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut tokio::io::ReadBuf<'_>,
  ) -> Poll<std::io::Result<()>> {
    AsyncRead::poll_read(Pin::new(&mut self.stream), cx, buf)
  }
}

impl<S: Session> AsyncWrite for QuicConnection<S> {
  fn poll_write(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<Result<usize, IOError>> {
    AsyncWrite::poll_write(Pin::new(&mut self.stream), cx, buf)
  }

  fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), IOError>> {
    AsyncWrite::poll_flush(Pin::new(&mut self.stream), cx)
  }

  fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), IOError>> {
    AsyncWrite::poll_shutdown(Pin::new(&mut self.stream), cx)
  }
}

impl<S: Session> Drop for QuicConnection<S> {
  fn drop(&mut self) {
    self.span.in_scope(|| {
      tracing::trace!(stream_id = %self.stream_id, "closing stream");
    });
  }
}

impl<S: Session> std::fmt::Debug for QuicConnection<S> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QuicConnection")
      .field("local", &self.local_stream_addr())
      .field("remote", &self.remote_stream_addr())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use futures::StreamExt;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};

  use super::{connection_label, Connection, QuicConnection};
  use crate::common::{
    address::NetAddr,
    transport::{duplex, Session, SessionConnector},
  };

  #[tokio::test]
  async fn addresses_carry_session_addresses_and_stream_id() {
    let (connector, _acceptor) = duplex::channel();
    let session = Arc::new(connector.connect("203.0.113.5:443").await.unwrap());
    let _ = session.open_stream().await.unwrap();
    let (id, stream) = session.open_stream().await.unwrap();
    let conn = QuicConnection::new(session.clone(), id, stream, tracing::Span::none());

    assert_eq!(conn.remote_addr().to_string(), "203.0.113.5:443.0x4");
    assert_eq!(conn.remote_addr().network(), "udp");
    assert_eq!(
      conn.local_addr().to_string(),
      format!("{}.0x4", session.local_addr())
    );
    assert_eq!(
      connection_label(session.as_ref(), id),
      format!("{}-203.0.113.5:443.0x4", session.local_addr())
    );
  }

  #[tokio::test]
  async fn io_passes_through_to_the_stream() {
    let (connector, mut acceptor) = duplex::channel();
    let session = Arc::new(connector.connect("198.51.100.7:80").await.unwrap());
    let (id, stream) = session.open_stream().await.unwrap();
    let mut conn = QuicConnection::new(session, id, stream, tracing::Span::none());
    let mut far = acceptor.next().await.unwrap().stream;

    conn.write_all(b"request").await.unwrap();
    conn.shutdown().await.unwrap();
    let mut received = Vec::new();
    far.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"request");

    far.write_all(b"response").await.unwrap();
    drop(far);
    let mut response = Vec::new();
    conn.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"response");
  }

  #[tokio::test]
  async fn dropping_a_connection_leaves_the_session_open() {
    let (connector, _acceptor) = duplex::channel();
    let session = Arc::new(connector.connect("198.51.100.7:80").await.unwrap());
    let (id, stream) = session.open_stream().await.unwrap();
    drop(QuicConnection::new(session.clone(), id, stream, tracing::Span::none()));
    assert!(!session.is_closed());
    assert!(session.open_stream().await.is_ok());
  }
}
