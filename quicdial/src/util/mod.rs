// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
pub mod cancellation;
pub mod quinn_stream;

/// ALPN protocol identifier negotiated by relay peers
pub const ALPN_RELAY: &[u8] = b"relay";
