// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use anyhow::{Context as AnyhowContext, Result};
use quicdial::common::StreamId;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing_futures::Instrument;

#[derive(Debug, Clone)]
pub struct EchoArgs {
  pub cert: PathBuf,
  pub key: PathBuf,
  pub quinn_bind_addr: SocketAddr,
  pub alpn: String,
}

pub async fn echo_main(args: EchoArgs) -> Result<()> {
  let crypto = crate::tls::server_tls(&args.cert, &args.key, args.alpn.as_bytes())?;
  let server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
  let endpoint = quinn::Endpoint::server(server_config, args.quinn_bind_addr)
    .context("Failed binding QUIC endpoint")?;
  tracing::info!(local = %endpoint.local_addr()?, alpn = %args.alpn, "echo endpoint listening");

  let shutdown = CancellationToken::new();
  let sigint_handler_task = tokio::task::spawn({
    let shutdown = shutdown.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received SIGINT, shutting down");
        shutdown.cancel();
      }
    }
  });

  loop {
    let connecting = tokio::select! {
      biased;
      _ = shutdown.cancelled() => break,
      connecting = endpoint.accept() => match connecting {
        Some(connecting) => connecting,
        None => break,
      },
    };
    let span = tracing::info_span!("echo_session", remote = %connecting.remote_address());
    tokio::task::spawn(
      async move {
        if let Err(e) = serve_session(connecting).await {
          tracing::warn!(error = ?e, "session ended with error");
        }
      }
      .instrument(span),
    );
  }

  endpoint.close(0u32.into(), b"echo endpoint shutting down");
  endpoint.wait_idle().await;
  sigint_handler_task.abort();
  Ok(())
}

async fn serve_session(connecting: quinn::Connecting) -> Result<()> {
  let connection = connecting.await.context("Handshake failed")?;
  tracing::debug!("session accepted");
  loop {
    let (mut send, mut recv) = match connection.accept_bi().await {
      Ok(stream) => stream,
      Err(quinn::ConnectionError::ApplicationClosed(_) | quinn::ConnectionError::LocallyClosed) => {
        tracing::debug!("session closed");
        return Ok(());
      }
      Err(e) => return Err(e.into()),
    };
    let stream_id = StreamId::from(send.id());
    tokio::task::spawn(
      async move {
        match tokio::io::copy(&mut recv, &mut send).await {
          Ok(echoed) => tracing::trace!(echoed, "stream drained"),
          Err(e) => tracing::debug!(error = ?e, "stream aborted"),
        }
        let _ = send.finish().await;
      }
      .instrument(tracing::trace_span!("echo_stream", id = %stream_id)),
    );
  }
}
