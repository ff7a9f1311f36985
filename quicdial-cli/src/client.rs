// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use anyhow::{Context as AnyhowContext, Result};
use futures::future::try_join;
use quicdial::{
  common::{Connection, QuicDialer, QuicDialerConfig},
  util::cancellation::CancellationListener,
};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing_futures::Instrument;

#[derive(Debug, Clone)]
pub struct DialArgs {
  pub authority_cert: Option<PathBuf>,
  pub server_name: Option<String>,
  pub config: Option<PathBuf>,
  pub target: String,
}

pub fn load_config(path: Option<&Path>) -> Result<QuicDialerConfig> {
  let config: QuicDialerConfig = match path {
    Some(path) => {
      let raw = std::fs::read(path).context("Failed reading dialer config")?;
      serde_json::from_slice(&raw).context("Dialer config must be valid JSON")?
    }
    None => QuicDialerConfig::default(),
  };
  config.validate()?;
  Ok(config)
}

pub async fn dial_main(args: DialArgs) -> Result<()> {
  let mut config = load_config(args.config.as_deref())?;
  if args.server_name.is_some() {
    config.server_name = args.server_name.clone();
  }
  let tls = crate::tls::client_tls(args.authority_cert.as_deref())?;
  let dialer = QuicDialer::from_tls(tls, &config)?;

  let shutdown = CancellationToken::new();
  let sigint_handler_task = tokio::task::spawn({
    let shutdown = shutdown.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received SIGINT, cancelling dial");
        shutdown.cancel();
      }
    }
  });

  let listener = CancellationListener::from(&shutdown);
  let connection = dialer
    .dial_stream("tcp", &args.target, &listener)
    .await?;
  tracing::info!(
    stream_id = %connection.stream_id(),
    local = %connection.local_addr(),
    remote = %connection.remote_addr(),
    "stream opened"
  );

  let span = connection.span().clone();
  let (mut reader, mut writer) = tokio::io::split(connection);
  let upload = async {
    let sent = tokio::io::copy(&mut tokio::io::stdin(), &mut writer).await?;
    writer.shutdown().await?;
    Ok::<_, std::io::Error>(sent)
  };
  let download = async {
    let mut stdout = tokio::io::stdout();
    let received = tokio::io::copy(&mut reader, &mut stdout).await?;
    stdout.flush().await?;
    Ok::<_, std::io::Error>(received)
  };
  let piped = listener
    .run_until_cancelled(try_join(upload, download).instrument(span))
    .await;
  let result = match piped {
    Some(Ok((sent, received))) => {
      tracing::info!(sent, received, "stream finished");
      Ok(())
    }
    Some(Err(e)) => Err(e).context("Stream relay failed"),
    None => {
      tracing::info!("dial interrupted");
      Ok(())
    }
  };
  dialer.close();
  sigint_handler_task.abort();
  result
}
