// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use anyhow::{Context as AnyhowContext, Error as AnyErr, Result};
use std::path::{Path, PathBuf};
use tracing::instrument;

fn with_suffix(path: &Path, suffix: &str) -> Result<PathBuf> {
  let file_name = path
    .file_name()
    .and_then(|name| name.to_str())
    .ok_or_else(|| AnyErr::msg("Certificate output path must end in a UTF-8 file name"))?;
  Ok(path.with_file_name(format!("{}{}", file_name, suffix)))
}

#[instrument]
pub async fn certgen_main(output_base_path: String, host_san: String) -> Result<()> {
  use std::fs;
  let path = PathBuf::from(output_base_path);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).context("Directory creation must succeed for certs")?;
  }
  let cert =
    rcgen::generate_simple_self_signed(vec![host_san]).context("Certificate generation failed")?;
  let public_pem = cert.serialize_pem()?;
  let private_pem = cert.serialize_private_key_pem();
  let public_path = with_suffix(&path, ".pub.pem")?;
  let private_path = with_suffix(&path, ".priv.pem")?;
  fs::write(&public_path, &public_pem).context("Failed writing public key")?;
  fs::write(&private_path, &private_pem).context("Failed writing private key")?;
  tracing::info!(public = ?public_path, private = ?private_path, "wrote certificate pair");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::with_suffix;
  use std::path::{Path, PathBuf};

  #[test]
  fn suffixes_extend_the_file_name() {
    assert_eq!(
      with_suffix(Path::new("certs/relay"), ".pub.pem").unwrap(),
      PathBuf::from("certs/relay.pub.pem")
    );
    assert!(with_suffix(Path::new("/"), ".pub.pem").is_err());
  }
}
