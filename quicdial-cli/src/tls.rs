// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use anyhow::{Context as AnyhowContext, Error as AnyErr, Result};
use std::{fs::File, io::BufReader, path::Path};

pub fn load_certs(path: &Path) -> Result<Vec<rustls::Certificate>> {
  let mut reader = BufReader::new(File::open(path).context("Failed opening certificate file")?);
  let certs = rustls_pemfile::certs(&mut reader).context("Failed parsing certificate PEM")?;
  if certs.is_empty() {
    return Err(AnyErr::msg("No certificates found in PEM file"));
  }
  Ok(certs.into_iter().map(rustls::Certificate).collect())
}

pub fn load_private_key(path: &Path) -> Result<rustls::PrivateKey> {
  let pem = std::fs::read(path).context("Failed reading private key file")?;
  let pkcs8 = rustls_pemfile::pkcs8_private_keys(&mut pem.as_slice())
    .context("Failed parsing PKCS#8 private key PEM")?;
  let key = match pkcs8.into_iter().next() {
    Some(key) => key,
    None => rustls_pemfile::rsa_private_keys(&mut pem.as_slice())
      .context("Failed parsing RSA private key PEM")?
      .into_iter()
      .next()
      .ok_or_else(|| AnyErr::msg("No private key found in PEM file"))?,
  };
  Ok(rustls::PrivateKey(key))
}

/// Client TLS context trusting `authority` if given, or the platform's roots otherwise
pub fn client_tls(authority: Option<&Path>) -> Result<rustls::ClientConfig> {
  let mut roots = rustls::RootCertStore::empty();
  let ders: Vec<Vec<u8>> = match authority {
    Some(path) => load_certs(path)?.into_iter().map(|cert| cert.0).collect(),
    None => rustls_native_certs::load_native_certs()
      .context("Failed loading platform root certificates")?
      .into_iter()
      .map(|cert| cert.0)
      .collect(),
  };
  let (added, ignored) = roots.add_parsable_certificates(&ders);
  tracing::debug!(added, ignored, "loaded trust roots");
  if added == 0 {
    return Err(AnyErr::msg("No usable trust roots"));
  }
  Ok(
    rustls::ClientConfig::builder()
      .with_safe_defaults()
      .with_root_certificates(roots)
      .with_no_client_auth(),
  )
}

pub fn server_tls(cert: &Path, key: &Path, alpn: &[u8]) -> Result<rustls::ServerConfig> {
  let mut crypto = rustls::ServerConfig::builder()
    .with_safe_defaults()
    .with_no_client_auth()
    .with_single_cert(load_certs(cert)?, load_private_key(key)?)
    .context("Certificate and key must form a valid pair")?;
  crypto.alpn_protocols = vec![alpn.to_vec()];
  Ok(crypto)
}
