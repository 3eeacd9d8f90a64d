//! Request/response correlation for remote calls that return a value.

use std::time::Duration;

use tokio::sync::oneshot;
use uwb_session_core::TransportError;

/// Waiting end of a remote call.
///
/// The responder side is the `oneshot::Sender` returned by
/// [`SyncResultReceiver::new`]; dropping it unanswered reports
/// `Disconnected`.
#[derive(Debug)]
pub struct SyncResultReceiver<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> SyncResultReceiver<T> {
    /// Create a new receiver and its responder.
    #[must_use]
    pub fn new() -> (oneshot::Sender<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Wait at most `timeout` for the result.
    ///
    /// # Errors
    /// `Timeout` once the bound elapses, `Disconnected` if the responder
    /// was dropped without answering.
    pub async fn await_result(self, timeout: Duration) -> Result<T, TransportError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }
}
