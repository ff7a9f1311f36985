// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

/// Transport-assigned identifier of a stream within its session
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct StreamId(u64);

impl StreamId {
  pub fn new(inner: u64) -> StreamId {
    Self(inner)
  }

  pub fn inner(&self) -> u64 {
    self.0
  }
}

impl From<u64> for StreamId {
  fn from(inner: u64) -> Self {
    Self::new(inner)
  }
}

impl From<StreamId> for u64 {
  fn from(id: StreamId) -> Self {
    id.inner()
  }
}

impl From<quinn::StreamId> for StreamId {
  fn from(id: quinn::StreamId) -> Self {
    Self::new(quinn::VarInt::from(id).into_inner())
  }
}

impl std::fmt::LowerHex for StreamId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::LowerHex::fmt(&self.0, f)
  }
}

/// Renders as `0x`-prefixed hex, the form used in stream addresses and log labels
impl std::fmt::Display for StreamId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:#x}", self.0)
  }
}

impl std::fmt::Debug for StreamId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("StreamId")
      .field(&format_args!("{:#x}", self.0))
      .finish()
  }
}

/// Hands out stream ids the way a QUIC client numbers its bidirectional streams
///
/// Client-initiated bidirectional ids share the low two bits, so consecutive
/// streams are spaced four apart.
pub struct MonotonicStreamIdGenerator {
  next: std::sync::atomic::AtomicU64,
  step: u64,
}

impl MonotonicStreamIdGenerator {
  pub const CLIENT_BIDI_STEP: u64 = 4;

  pub fn new(next: u64, step: u64) -> Self {
    Self {
      next: std::sync::atomic::AtomicU64::new(next),
      step,
    }
  }

  pub fn client_bidirectional() -> Self {
    Self::new(0, Self::CLIENT_BIDI_STEP)
  }

  pub fn next(&self) -> StreamId {
    StreamId::new(
      self
        .next
        .fetch_add(self.step, std::sync::atomic::Ordering::Relaxed),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::{MonotonicStreamIdGenerator, StreamId};

  #[test]
  fn renders_as_prefixed_hex() {
    assert_eq!(StreamId::new(7).to_string(), "0x7");
    assert_eq!(StreamId::new(0).to_string(), "0x0");
    assert_eq!(StreamId::new(255).to_string(), "0xff");
  }

  #[test]
  fn client_bidirectional_ids_step_by_four() {
    let ids = MonotonicStreamIdGenerator::client_bidirectional();
    let taken: Vec<u64> = (0..3).map(|_| ids.next().inner()).collect();
    assert_eq!(taken, vec![0, 4, 8]);
  }

  #[test]
  fn converts_from_quinn_stream_id() {
    let quinn_id = quinn::StreamId::from(quinn::VarInt::from_u32(8));
    assert_eq!(StreamId::from(quinn_id), StreamId::new(8));
  }
}
