// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use std::{net::SocketAddr, sync::Arc, time::Duration};

use quicdial::{
  common::{Connection, DialError, Dialer, NetAddr, QuicDialer, QuicDialerConfig, TransportError},
  util::{cancellation::CancellationListener, ALPN_RELAY},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quinn=warn,quicdial=debug")),
    )
    .with_test_writer()
    .try_init();
}

struct EchoServer {
  addr: SocketAddr,
  certificate: rustls::Certificate,
  endpoint: quinn::Endpoint,
}

/// Binds a loopback quinn endpoint that echoes every bidirectional stream
fn spawn_echo_server() -> EchoServer {
  let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
  let certificate = rustls::Certificate(cert.serialize_der().unwrap());
  let key = rustls::PrivateKey(cert.serialize_private_key_der());

  let mut server_crypto = rustls::ServerConfig::builder()
    .with_safe_defaults()
    .with_no_client_auth()
    .with_single_cert(vec![certificate.clone()], key)
    .unwrap();
  server_crypto.alpn_protocols = vec![ALPN_RELAY.to_vec()];
  let server_config = quinn::ServerConfig::with_crypto(Arc::new(server_crypto));
  let endpoint = quinn::Endpoint::server(server_config, "127.0.0.1:0".parse().unwrap()).unwrap();
  let addr = endpoint.local_addr().unwrap();

  let accepting = endpoint.clone();
  tokio::task::spawn(async move {
    while let Some(connecting) = accepting.accept().await {
      tokio::task::spawn(async move {
        let connection = match connecting.await {
          Ok(connection) => connection,
          Err(_) => return,
        };
        while let Ok((mut send, mut recv)) = connection.accept_bi().await {
          tokio::task::spawn(async move {
            let _ = tokio::io::copy(&mut recv, &mut send).await;
            let _ = send.finish().await;
          });
        }
      });
    }
  });

  EchoServer {
    addr,
    certificate,
    endpoint,
  }
}

fn client_tls(trusted: &rustls::Certificate) -> rustls::ClientConfig {
  let mut roots = rustls::RootCertStore::empty();
  roots.add(trusted).unwrap();
  rustls::ClientConfig::builder()
    .with_safe_defaults()
    .with_root_certificates(roots)
    .with_no_client_auth()
}

fn localhost_config() -> QuicDialerConfig {
  QuicDialerConfig {
    server_name: Some("localhost".into()),
    ..Default::default()
  }
}

async fn echo<C: Connection + ?Sized>(conn: &mut C, payload: &[u8]) -> Vec<u8> {
  conn.write_all(payload).await.unwrap();
  conn.shutdown().await.unwrap();
  let mut echoed = Vec::new();
  conn.read_to_end(&mut echoed).await.unwrap();
  echoed
}

#[tokio::test]
async fn streams_share_one_quinn_session() {
  init_tracing();
  let server = spawn_echo_server();
  let dialer = QuicDialer::from_tls(client_tls(&server.certificate), &localhost_config()).unwrap();
  let destination = server.addr.to_string();

  let fut = async {
    let never = CancellationListener::never();
    let mut first = dialer.dial_stream("tcp", &destination, &never).await.unwrap();
    let mut second = dialer.dial_stream("tcp", &destination, &never).await.unwrap();

    assert!(Arc::ptr_eq(first.session(), second.session()));
    assert_eq!(dialer.session_count(), 1);
    assert_eq!(first.session().alpn(), Some(ALPN_RELAY));
    assert_eq!(first.remote_addr().network(), "udp");
    assert_eq!(first.remote_addr().to_string(), format!("{}.0x0", server.addr));
    assert_eq!(second.remote_addr().to_string(), format!("{}.0x4", server.addr));

    assert_eq!(echo(&mut first, b"first stream").await, b"first stream");
    drop(first);
    assert_eq!(echo(&mut second, b"second stream").await, b"second stream");
  };
  tokio::time::timeout(TEST_TIMEOUT, fut)
    .await
    .expect("Loopback dialing must complete");
  dialer.close();
  server.endpoint.close(0u32.into(), b"done");
}

#[tokio::test]
async fn dialing_through_the_trait_object() {
  init_tracing();
  let server = spawn_echo_server();
  let dialer: Arc<dyn Dialer> = Arc::new(
    QuicDialer::from_tls(client_tls(&server.certificate), &localhost_config()).unwrap(),
  );
  let destination = server.addr.to_string();

  let fut = async {
    let mut conn = dialer
      .dial("tcp", &destination, None, CancellationListener::never())
      .await
      .unwrap();
    assert_eq!(echo(&mut conn, b"relay payload").await, b"relay payload");
  };
  tokio::time::timeout(TEST_TIMEOUT, fut)
    .await
    .expect("Loopback dialing must complete");
}

#[tokio::test]
async fn untrusted_server_fails_establishment_without_caching() {
  init_tracing();
  let server = spawn_echo_server();
  let stranger = rustls::Certificate(
    rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
      .unwrap()
      .serialize_der()
      .unwrap(),
  );
  let dialer = QuicDialer::from_tls(client_tls(&stranger), &localhost_config()).unwrap();
  let destination = server.addr.to_string();

  let err = tokio::time::timeout(
    TEST_TIMEOUT,
    dialer.dial_stream("tcp", &destination, &CancellationListener::never()),
  )
  .await
  .expect("A failed handshake must resolve")
  .unwrap_err();
  assert!(matches!(
    err,
    DialError::SessionEstablish {
      source: TransportError::Protocol(_)
        | TransportError::ConnectionClosed
        | TransportError::LocallyClosed,
      ..
    }
  ));
  assert_eq!(dialer.session_count(), 0);
}
