// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Dialing over shared QUIC sessions
//!
//! A [QuicDialer](common::QuicDialer) keeps one session per destination and
//! hands out each dial as a fresh stream inside it, behind the same
//! [Dialer](common::Dialer) contract as a plain [TcpDialer](common::TcpDialer).

pub mod common;
pub mod util;
