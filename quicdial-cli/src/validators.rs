// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use anyhow::{Error as AnyErr, Result};
use std::net::SocketAddr;
use std::path::Path;

pub fn validate_existing_file(v: &str) -> Result<(), String> {
  if !Path::new(&v).exists() {
    Err(String::from("A file must exist at the given path"))
  } else {
    Ok(())
  }
}

pub fn parse_socketaddr(v: &str) -> Result<SocketAddr> {
  use std::net::ToSocketAddrs;
  ToSocketAddrs::to_socket_addrs(v)
    .map_err(|e| e.into())
    .and_then(|mut items| {
      items.next().ok_or_else(|| {
        AnyErr::msg("No addresses were resolved from the given host")
      })
    })
}

pub fn validate_socketaddr(v: &str) -> Result<(), String> {
  parse_socketaddr(v).map(|_| ()).map_err(|e| e.to_string())
}

/// Destinations are dialed by name, so only the `host:port` shape is checked here
pub fn validate_destination(v: &str) -> Result<(), String> {
  match v.rsplit_once(':') {
    Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
    _ => Err(String::from("Destinations must take the form host:port")),
  }
}
