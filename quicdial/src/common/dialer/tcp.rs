// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use std::{
  io::Error as IOError,
  net::SocketAddr,
  pin::Pin,
  task::{Context, Poll},
};

use futures::{future::BoxFuture, FutureExt};
use tokio::{
  io::{AsyncRead, AsyncWrite},
  net::TcpStream,
};

use super::{DialError, Dialer};
use crate::{
  common::{
    address::{NetAddr, SocketAddress},
    connection::{BoxedConnection, Connection},
    transport::TransportError,
  },
  util::cancellation::CancellationListener,
};

/// A [Dialer] producing one plain TCP socket per dial
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl TcpDialer {
  pub fn new() -> Self {
    Self
  }

  pub async fn dial_tcp(
    &self,
    address: &str,
    cancel: &CancellationListener,
  ) -> Result<TcpConnection, DialError> {
    let connected = cancel
      .run_until_cancelled(TcpStream::connect(address))
      .await
      .map(|result| result.map_err(TransportError::from))
      .unwrap_or(Err(TransportError::Cancelled))
      .and_then(|stream| TcpConnection::new(stream).map_err(TransportError::from));
    match connected {
      Ok(connection) => {
        tracing::debug!(
          local = %connection.local,
          remote = %connection.remote,
          "tcp-client: connected"
        );
        Ok(connection)
      }
      Err(source) => {
        if !source.is_cancelled() {
          tracing::warn!(destination = %address, error = %source, "tcp-client: can't dial");
        }
        Err(DialError::SessionEstablish {
          destination: address.to_string(),
          source,
        })
      }
    }
  }
}

impl Dialer for TcpDialer {
  fn dial<'a>(
    &'a self,
    _network: &'a str,
    address: &'a str,
    _hint: Option<&'a dyn Connection>,
    cancel: CancellationListener,
  ) -> BoxFuture<'a, Result<BoxedConnection, DialError>> {
    async move {
      let connection = self.dial_tcp(address, &cancel).await?;
      Ok(Box::new(connection) as BoxedConnection)
    }
    .boxed()
  }
}

#[derive(Debug)]
pub struct TcpConnection {
  stream: TcpStream,
  local: SocketAddr,
  remote: SocketAddr,
}

impl TcpConnection {
  pub fn new(stream: TcpStream) -> Result<Self, IOError> {
    let local = stream.local_addr()?;
    let remote = stream.peer_addr()?;
    Ok(Self {
      stream,
      local,
      remote,
    })
  }}

impl Connection for TcpConnection {
  fn local_addr(&self) -> Box<dyn NetAddr> {
    Box::new(SocketAddress::tcp(self.local))
  }

  fn remote_addr(&self) -> Box<dyn NetAddr> {
    Box::new(SocketAddress::tcp(self.remote))
  }
}

impl AsyncRead for TcpConnection {
  fn poll_read(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut tokio::io::ReadBuf<'_>,
  ) -> Poll<std::io::Result<()>> {
    AsyncRead::poll_read(Pin::new(&mut self.stream), cx, buf)
  }
}

impl AsyncWrite for TcpConnection {
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

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
  };
  use tokio_util::sync::CancellationToken;

  use super::TcpDialer;
  use crate::{
    common::{
      address::NetAddr,
      connection::Connection,
      dialer::{DialError, Dialer},
    },
    util::cancellation::CancellationListener,
  };

  #[tokio::test]
  async fn dials_plain_sockets_behind_the_shared_contract() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = listener.local_addr().unwrap();
    let server = tokio::task::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut buf = [0u8; 5];
      socket.read_exact(&mut buf).await.unwrap();
      socket.write_all(&buf).await.unwrap();
    });

    let dialer: Arc<dyn Dialer> = Arc::new(TcpDialer::new());
    let address = target.to_string();
    let mut conn = dialer
      .dial("tcp", &address, None, CancellationListener::never())
      .await
      .unwrap();
    assert_eq!(conn.remote_addr().to_string(), address);
    assert_eq!(conn.remote_addr().network(), "tcp");

    conn.write_all(b"hello").await.unwrap();
    let mut echoed = [0u8; 5];
    conn.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello");
    server.await.unwrap();
  }

  #[tokio::test]
  async fn cancelled_tcp_dial_reports_cancellation() {
    let token = CancellationToken::new();
    token.cancel();
    let err = TcpDialer::new()
      .dial_tcp("127.0.0.1:9", &token.into())
      .await
      .unwrap_err();
    assert!(err.is_cancelled());
    assert!(matches!(err, DialError::SessionEstablish { .. }));
  }
}
