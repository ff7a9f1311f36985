// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
pub mod address;
pub mod config;
pub mod connection;
pub mod dialer;
pub mod transport;

pub use self::{
  address::{NetAddr, SocketAddress, StreamAddress},
  config::{ConfigError, QuicDialerConfig},
  connection::{BoxedConnection, Connection, QuicConnection},
  dialer::{DestinationKey, DialError, Dialer, QuicDialer, TcpDialer},
  transport::{Session, SessionConnector, StreamId, TransportError},
};
