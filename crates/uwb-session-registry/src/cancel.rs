//! Cancellation capability returned by `open_session`.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use uwb_session_core::{SessionError, SessionState};

use crate::session::RangingSession;

/// Requests `close()` on its session when cancelled.
///
/// Cancelling is only meaningful before the session is closed; afterwards,
/// and on every call but the first, it does nothing.
#[derive(Debug)]
pub struct CancellationSignal {
    session: Arc<RangingSession>,
    canceled: AtomicBool,
}

impl CancellationSignal {
    pub(crate) const fn new(session: Arc<RangingSession>) -> Self {
        Self {
            session,
            canceled: AtomicBool::new(false),
        }
    }

    /// Cancel the session.
    ///
    /// # Errors
    /// Returns the transport error if the close request could not be sent.
    pub fn cancel(&self) -> Result<(), SessionError> {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.session.state() == SessionState::Closed {
            tracing::debug!(handle = %self.session.handle(), "Cancel after close ignored");
            return Ok(());
        }
        tracing::debug!(handle = %self.session.handle(), "Cancelling ranging session");
        self.session.close()
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// The session this signal controls.
    #[must_use]
    pub const fn session(&self) -> &Arc<RangingSession> {
        &self.session
    }
}
