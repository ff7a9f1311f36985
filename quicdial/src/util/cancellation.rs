// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use futures::future::Future;
use tokio_util::sync::CancellationToken;

/// A [CancellationToken] that cannot be triggered by its recipient
///
/// Holders can observe cancellation but never trigger it.
#[derive(Debug, Clone, Default)]
#[repr(transparent)]
pub struct CancellationListener {
  token: CancellationToken,
}

impl CancellationListener {
  /// A listener with no remaining trigger; it never fires
  pub fn never() -> Self {
    Self::default()
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Drives `future` unless cancellation fires first, in which case `None` is returned
  ///
  /// An already-fired listener returns `None` without polling `future`.
  pub async fn run_until_cancelled<F: Future>(&self, future: F) -> Option<F::Output> {
    tokio::select! {
      biased;
      _ = self.token.cancelled() => None,
      output = future => Some(output),
    }
  }
}

impl From<CancellationToken> for CancellationListener {
  fn from(token: CancellationToken) -> Self {
    Self { token }
  }
}

impl From<&CancellationToken> for CancellationListener {
  fn from(token: &CancellationToken) -> Self {
    Self {
      token: token.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use tokio_util::sync::CancellationToken;

  use super::CancellationListener;

  #[tokio::test]
  async fn fired_listener_skips_the_future() {
    let token = CancellationToken::new();
    token.cancel();
    let listener = CancellationListener::from(&token);
    let polled = std::sync::atomic::AtomicBool::new(false);
    let result = listener
      .run_until_cancelled(async {
        polled.store(true, std::sync::atomic::Ordering::SeqCst);
      })
      .await;
    assert!(result.is_none());
    assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
  }

  #[tokio::test]
  async fn cancellation_interrupts_pending_work() {
    let token = CancellationToken::new();
    let listener = CancellationListener::from(token.clone());
    let trigger = tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      token.cancel();
    });
    let result = tokio::time::timeout(
      Duration::from_secs(5),
      listener.run_until_cancelled(futures::future::pending::<()>()),
    )
    .await
    .expect("Cancellation must unblock pending work");
    assert!(result.is_none());
    trigger.await.unwrap();
  }

  #[tokio::test]
  async fn never_lets_work_complete() {
    let listener = CancellationListener::never();
    assert_eq!(listener.run_until_cancelled(async { 7 }).await, Some(7));
  }
}
