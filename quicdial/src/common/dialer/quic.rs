// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Dials logical connections as streams over cached, shared QUIC sessions

use std::sync::Arc;

use dashmap::DashMap;
use futures::{future::BoxFuture, FutureExt};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::{DestinationKey, DialError, Dialer};
use crate::{
  common::{
    config::{ConfigError, QuicDialerConfig},
    connection::{connection_label, BoxedConnection, Connection, QuicConnection},
    transport::{
      quinn_transport::QuinnConnector, Session, SessionConnector, StreamId, TransportError,
    },
  },
  util::cancellation::CancellationListener,
};

/// Per-destination slot; empty while establishment is pending or after it failed
type SessionSlot<S> = Arc<OnceCell<Arc<S>>>;

type OpenedStream<S> = (StreamId, <S as Session>::Stream);

/// A [Dialer] multiplexing every connection to a destination over one session
///
/// Sessions are established on first use of a destination key and reused by
/// later dials; each dial opens a fresh stream. Callers targeting the same
/// key wait for a single establishment, while other keys proceed unimpeded.
pub struct QuicDialer<C: SessionConnector> {
  connector: C,
  sessions: DashMap<DestinationKey, SessionSlot<C::Session>>,
  shutdown: CancellationToken,
}

impl QuicDialer<QuinnConnector> {
  /// Builds a dialer over quinn, negotiating `config.alpn` through the given TLS context
  pub fn from_tls(tls: rustls::ClientConfig, config: &QuicDialerConfig) -> Result<Self, ConfigError> {
    Ok(Self::new(QuinnConnector::new(tls, config)?))
  }
}

impl<C: SessionConnector> QuicDialer<C> {
  pub fn new(connector: C) -> Self {
    Self {
      connector,
      sessions: DashMap::new(),
      shutdown: CancellationToken::new(),
    }
  }

  pub fn connector(&self) -> &C {
    &self.connector
  }

  /// Number of established sessions currently cached
  pub fn session_count(&self) -> usize {
    self
      .sessions
      .iter()
      .filter(|slot| slot.value().initialized())
      .count()
  }

  pub fn cached_session(&self, network: &str, address: &str) -> Option<Arc<C::Session>> {
    self
      .sessions
      .get(&DestinationKey::new(network, address))
      .and_then(|slot| slot.value().get().cloned())
  }

  pub fn is_closed(&self) -> bool {
    self.shutdown.is_cancelled()
  }

  /// Closes every cached session; later dials fail with [DialError::Closed]
  pub fn close(&self) {
    self.shutdown.cancel();
    self.sessions.retain(|key, slot| {
      if let Some(session) = slot.get() {
        tracing::debug!(destination = %key, remote = %session.remote_addr(), "closing session");
        session.close();
      }
      false
    });
  }

  /// Dials `address`, returning the concrete stream connection
  #[tracing::instrument(level = "trace", skip(self, cancel))]
  pub async fn dial_stream(
    &self,
    network: &str,
    address: &str,
    cancel: &CancellationListener,
  ) -> Result<QuicConnection<C::Session>, DialError> {
    if self.is_closed() {
      return Err(DialError::Closed);
    }
    if cancel.is_cancelled() {
      tracing::debug!(destination = %address, "quic-client: dial cancelled");
      return Err(DialError::SessionEstablish {
        destination: address.to_string(),
        source: TransportError::Cancelled,
      });
    }
    let key = DestinationKey::new(network, address);
    let session = self.session_for(&key, address, cancel).await?;

    let opened = Self::open_stream(&session, cancel).await;
    let (session, opened) = match opened {
      Err(e) if session.is_closed() && !e.is_cancelled() => {
        tracing::debug!(destination = %key, error = %e, "evicting dead session");
        self.evict(&key, &session);
        let session = self.session_for(&key, address, cancel).await?;
        let opened = Self::open_stream(&session, cancel).await;
        (session, opened)
      }
      opened => (session, opened),
    };
    let (stream_id, stream) = opened.map_err(|source| {
      if source.is_cancelled() {
        tracing::debug!(destination = %address, "quic-client: stream open cancelled");
      } else {
        tracing::warn!(destination = %address, error = %source, "quic-client: can't open new stream");
      }
      DialError::StreamOpen {
        destination: address.to_string(),
        source,
      }
    })?;

    let span = tracing::debug_span!(
      "quic_stream",
      conn = %connection_label(session.as_ref(), stream_id)
    );
    span.in_scope(|| tracing::debug!(stream_id = %stream_id, "quic-client: opened new stream"));
    Ok(QuicConnection::new(session, stream_id, stream, span))
  }

  async fn session_for(
    &self,
    key: &DestinationKey,
    address: &str,
    cancel: &CancellationListener,
  ) -> Result<Arc<C::Session>, DialError> {
    let slot = self.sessions.entry(key.clone()).or_default().value().clone();
    let established = slot
      .get_or_try_init(|| self.establish(key, address, cancel))
      .await
      .map(Arc::clone);

    match established {
      Ok(session) => {
        if self.is_closed() {
          self
            .sessions
            .remove_if(key, |_, current| Arc::ptr_eq(current, &slot));
          session.close();
          return Err(DialError::Closed);
        }
        Ok(session)
      }
      Err(source) => {
        // Waiters hold their own handle to the slot and take over establishment in it
        self.sessions.remove_if(key, |_, current| {
          Arc::ptr_eq(current, &slot) && !current.initialized() && Arc::strong_count(current) == 2
        });
        if source.is_cancelled() {
          tracing::debug!(destination = %address, "quic-client: dial cancelled");
        } else {
          tracing::warn!(destination = %address, error = %source, "quic-client: can't dial");
        }
        Err(DialError::SessionEstablish {
          destination: address.to_string(),
          source,
        })
      }
    }
  }

  async fn establish(
    &self,
    key: &DestinationKey,
    address: &str,
    cancel: &CancellationListener,
  ) -> Result<Arc<C::Session>, TransportError> {
    let session = cancel
      .run_until_cancelled(self.connector.connect(address))
      .await
      .unwrap_or(Err(TransportError::Cancelled))?;
    tracing::debug!(
      destination = %key,
      local = %session.local_addr(),
      remote = %session.remote_addr(),
      peer = ?session.peer_name(),
      "quic-client: established new session",
    );
    Ok(Arc::new(session))
  }

  async fn open_stream(
    session: &C::Session,
    cancel: &CancellationListener,
  ) -> Result<OpenedStream<C::Session>, TransportError> {
    cancel
      .run_until_cancelled(session.open_stream())
      .await
      .unwrap_or(Err(TransportError::Cancelled))
  }

  /// Drops `session` from the cache, unless the key already maps to a newer one
  fn evict(&self, key: &DestinationKey, session: &Arc<C::Session>) {
    self.sessions.remove_if(key, |_, slot| {
      slot
        .get()
        .map(|current| Arc::ptr_eq(current, session))
        .unwrap_or(false)
    });
  }
}

impl<C: SessionConnector> Dialer for QuicDialer<C> {
  fn dial<'a>(
    &'a self,
    network: &'a str,
    address: &'a str,
    _hint: Option<&'a dyn Connection>,
    cancel: CancellationListener,
  ) -> BoxFuture<'a, Result<BoxedConnection, DialError>> {
    async move {
      let connection = self.dial_stream(network, address, &cancel).await?;
      Ok(Box::new(connection) as BoxedConnection)
    }
    .boxed()
  }
}
