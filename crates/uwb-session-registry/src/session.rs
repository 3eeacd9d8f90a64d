//! Ranging session state machine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use uwb_session_core::{
    CallbackExecutor, ControleeFailureReason, DataFailureReason, Params, RangingAdapter, Reason,
    SessionError, SessionHandle, SessionState, UwbAddress,
};

use crate::callback::RangingCallback;

/// One ranging session.
///
/// Control methods only check that the call is legal in the current state
/// and hand the request to the adapter. The state itself moves when the
/// remote side confirms, through the event handlers the registry calls.
pub struct RangingSession {
    handle: SessionHandle,
    chip_id: Option<String>,
    adapter: Arc<dyn RangingAdapter>,
    executor: Arc<dyn CallbackExecutor>,
    callback: Arc<dyn RangingCallback>,
    state: Mutex<SessionState>,
}

impl RangingSession {
    pub(crate) fn new(
        handle: SessionHandle,
        chip_id: Option<String>,
        adapter: Arc<dyn RangingAdapter>,
        executor: Arc<dyn CallbackExecutor>,
        callback: Arc<dyn RangingCallback>,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            chip_id,
            adapter,
            executor,
            callback,
            state: Mutex::new(SessionState::Init),
        })
    }

    #[must_use]
    pub const fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Chip the session is bound to, if any.
    #[must_use]
    pub fn chip_id(&self) -> Option<&str> {
        self.chip_id.as_deref()
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// Whether the session is opened and not yet closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.state(), SessionState::Idle | SessionState::Active)
    }

    /// Start ranging. Requires `Idle`.
    ///
    /// # Errors
    /// `IllegalState` outside `Idle`; `Transport` if the request was not sent.
    pub fn start(&self, params: &Params) -> Result<(), SessionError> {
        self.require("start", &[SessionState::Idle])?;
        tracing::trace!(handle = %self.handle, "start");
        self.adapter.start_ranging(&self.handle, params)?;
        Ok(())
    }

    /// Reconfigure the session. Requires `Idle` or `Active`.
    ///
    /// # Errors
    /// `IllegalState` when not open; `Transport` if the request was not sent.
    pub fn reconfigure(&self, params: &Params) -> Result<(), SessionError> {
        self.require("reconfigure", &[SessionState::Idle, SessionState::Active])?;
        tracing::trace!(handle = %self.handle, "reconfigure");
        self.adapter.reconfigure_ranging(&self.handle, params)?;
        Ok(())
    }

    /// Stop ranging. Requires `Active`.
    ///
    /// # Errors
    /// `IllegalState` outside `Active`; `Transport` if the request was not sent.
    pub fn stop(&self) -> Result<(), SessionError> {
        self.require("stop", &[SessionState::Active])?;
        tracing::trace!(handle = %self.handle, "stop");
        self.adapter.stop_ranging(&self.handle)?;
        Ok(())
    }

    /// Close the session. Legal in every state.
    ///
    /// On an already-closed session this dispatches `on_closed` with
    /// [`Reason::LocalRequest`] again instead of contacting the remote side.
    ///
    /// # Errors
    /// `Transport` if the close request was not sent.
    pub fn close(&self) -> Result<(), SessionError> {
        if self.state() == SessionState::Closed {
            tracing::debug!(handle = %self.handle, "close on a closed session");
            self.execute_callback(|cb| cb.on_closed(Reason::LocalRequest, Params::new()));
            return Ok(());
        }
        tracing::trace!(handle = %self.handle, "close");
        self.adapter.close_ranging(&self.handle)?;
        Ok(())
    }

    /// Add a controlee. Requires `Idle` or `Active`.
    ///
    /// # Errors
    /// `IllegalState` when not open; `Transport` if the request was not sent.
    pub fn add_controlee(&self, params: &Params) -> Result<(), SessionError> {
        self.require("add_controlee", &[SessionState::Idle, SessionState::Active])?;
        tracing::trace!(handle = %self.handle, "add_controlee");
        self.adapter.add_controlee(&self.handle, params)?;
        Ok(())
    }

    /// Remove a controlee. Requires `Idle` or `Active`.
    ///
    /// # Errors
    /// `IllegalState` when not open; `Transport` if the request was not sent.
    pub fn remove_controlee(&self, params: &Params) -> Result<(), SessionError> {
        self.require("remove_controlee", &[SessionState::Idle, SessionState::Active])?;
        tracing::trace!(handle = %self.handle, "remove_controlee");
        self.adapter.remove_controlee(&self.handle, params)?;
        Ok(())
    }

    /// Pause ranging. Requires `Active`.
    ///
    /// # Errors
    /// `IllegalState` outside `Active`; `Transport` if the request was not sent.
    pub fn pause(&self, params: &Params) -> Result<(), SessionError> {
        self.require("pause", &[SessionState::Active])?;
        tracing::trace!(handle = %self.handle, "pause");
        self.adapter.pause(&self.handle, params)?;
        Ok(())
    }

    /// Resume a paused session. Requires `Active`.
    ///
    /// # Errors
    /// `IllegalState` outside `Active`; `Transport` if the request was not sent.
    pub fn resume(&self, params: &Params) -> Result<(), SessionError> {
        self.require("resume", &[SessionState::Active])?;
        tracing::trace!(handle = %self.handle, "resume");
        self.adapter.resume(&self.handle, params)?;
        Ok(())
    }

    /// Send data to a remote device. Requires `Active`.
    ///
    /// # Errors
    /// `IllegalState` outside `Active`; `Transport` if the request was not sent.
    pub fn send_data(
        &self,
        remote_address: &UwbAddress,
        params: &Params,
        data: Bytes,
    ) -> Result<(), SessionError> {
        self.require("send_data", &[SessionState::Active])?;
        tracing::trace!(handle = %self.handle, %remote_address, len = data.len(), "send_data");
        self.adapter
            .send_data(&self.handle, remote_address, params, &data)?;
        Ok(())
    }

    /// Update the active DL-TDoA ranging rounds. Requires `Active`.
    ///
    /// # Errors
    /// `IllegalState` outside `Active`; `Transport` if the request was not sent.
    pub fn update_ranging_rounds_dt_tag(&self, params: &Params) -> Result<(), SessionError> {
        self.require("update_ranging_rounds_dt_tag", &[SessionState::Active])?;
        tracing::trace!(handle = %self.handle, "update_ranging_rounds_dt_tag");
        self.adapter
            .update_ranging_rounds_dt_tag(&self.handle, params)?;
        Ok(())
    }

    /// Largest payload `send_data` accepts. Requires the session to be open.
    ///
    /// Waits for the remote answer, bounded by the transport timeout.
    ///
    /// # Errors
    /// `IllegalState` when not open; `Transport` on failure or timeout.
    pub async fn query_max_data_size_bytes(&self) -> Result<u32, SessionError> {
        self.require(
            "query_max_data_size_bytes",
            &[SessionState::Idle, SessionState::Active],
        )?;
        let size = self.adapter.query_max_data_size_bytes(&self.handle).await?;
        Ok(size)
    }

    /// Forward a device pose update.
    ///
    /// # Errors
    /// `Transport` if the request was not sent.
    pub fn update_pose(&self, params: &Params) -> Result<(), SessionError> {
        self.adapter.update_pose(&self.handle, params)?;
        Ok(())
    }

    pub(crate) fn on_ranging_opened(self: &Arc<Self>) {
        if self.advance("on_ranging_opened", Some(SessionState::Idle)) {
            let session = Arc::clone(self);
            self.execute_callback(move |cb| cb.on_opened(session));
        }
    }

    pub(crate) fn on_ranging_open_failed(&self, reason: Reason, params: Params) {
        if self.advance("on_ranging_open_failed", Some(SessionState::Closed)) {
            self.execute_callback(move |cb| cb.on_open_failed(reason, params));
        }
    }

    pub(crate) fn on_ranging_started(&self, params: Params) {
        if self.advance("on_ranging_started", Some(SessionState::Active)) {
            self.execute_callback(move |cb| cb.on_started(params));
        }
    }

    pub(crate) fn on_ranging_start_failed(&self, reason: Reason, params: Params) {
        if self.advance("on_ranging_start_failed", None) {
            self.execute_callback(move |cb| cb.on_start_failed(reason, params));
        }
    }

    pub(crate) fn on_ranging_reconfigured(&self, params: Params) {
        if self.advance("on_ranging_reconfigured", None) {
            self.execute_callback(move |cb| cb.on_reconfigured(params));
        }
    }

    pub(crate) fn on_ranging_reconfigure_failed(&self, reason: Reason, params: Params) {
        if self.advance("on_ranging_reconfigure_failed", None) {
            self.execute_callback(move |cb| cb.on_reconfigure_failed(reason, params));
        }
    }

    pub(crate) fn on_ranging_stopped(&self, reason: Reason, params: Params) {
        if self.advance("on_ranging_stopped", Some(SessionState::Idle)) {
            self.execute_callback(move |cb| cb.on_stopped(reason, params));
        }
    }

    pub(crate) fn on_ranging_stop_failed(&self, reason: Reason, params: Params) {
        if self.advance("on_ranging_stop_failed", None) {
            self.execute_callback(move |cb| cb.on_stop_failed(reason, params));
        }
    }

    pub(crate) fn on_ranging_closed(&self, reason: Reason, params: Params) {
        *self.lock_state() = SessionState::Closed;
        tracing::trace!(handle = %self.handle, "on_ranging_closed");
        self.execute_callback(move |cb| cb.on_closed(reason, params));
    }

    pub(crate) fn on_ranging_result(&self, report: Params) {
        if self.accept_if_open("on_ranging_result") {
            self.execute_callback(move |cb| cb.on_report_received(report));
        }
    }

    pub(crate) fn on_controlee_added(&self, params: Params) {
        if self.accept_if_open("on_controlee_added") {
            self.execute_callback(move |cb| cb.on_controlee_added(params));
        }
    }

    pub(crate) fn on_controlee_add_failed(&self, reason: ControleeFailureReason, params: Params) {
        if self.accept_if_open("on_controlee_add_failed") {
            self.execute_callback(move |cb| cb.on_controlee_add_failed(reason, params));
        }
    }

    pub(crate) fn on_controlee_removed(&self, params: Params) {
        if self.accept_if_open("on_controlee_removed") {
            self.execute_callback(move |cb| cb.on_controlee_removed(params));
        }
    }

    pub(crate) fn on_controlee_remove_failed(
        &self,
        reason: ControleeFailureReason,
        params: Params,
    ) {
        if self.accept_if_open("on_controlee_remove_failed") {
            self.execute_callback(move |cb| cb.on_controlee_remove_failed(reason, params));
        }
    }

    pub(crate) fn on_ranging_paused(&self, params: Params) {
        if self.accept_if_open("on_ranging_paused") {
            self.execute_callback(move |cb| cb.on_paused(params));
        }
    }

    pub(crate) fn on_ranging_pause_failed(&self, reason: Reason, params: Params) {
        if self.accept_if_open("on_ranging_pause_failed") {
            self.execute_callback(move |cb| cb.on_pause_failed(reason, params));
        }
    }

    pub(crate) fn on_ranging_resumed(&self, params: Params) {
        if self.accept_if_open("on_ranging_resumed") {
            self.execute_callback(move |cb| cb.on_resumed(params));
        }
    }

    pub(crate) fn on_ranging_resume_failed(&self, reason: Reason, params: Params) {
        if self.accept_if_open("on_ranging_resume_failed") {
            self.execute_callback(move |cb| cb.on_resume_failed(reason, params));
        }
    }

    pub(crate) fn on_data_sent(&self, remote_address: UwbAddress, params: Params) {
        if self.accept_if_open("on_data_sent") {
            self.execute_callback(move |cb| cb.on_data_sent(remote_address, params));
        }
    }

    pub(crate) fn on_data_send_failed(
        &self,
        remote_address: UwbAddress,
        reason: DataFailureReason,
        params: Params,
    ) {
        if self.accept_if_open("on_data_send_failed") {
            self.execute_callback(move |cb| cb.on_data_send_failed(remote_address, reason, params));
        }
    }

    pub(crate) fn on_data_received(&self, remote_address: UwbAddress, params: Params, data: Bytes) {
        if self.accept_if_open("on_data_received") {
            self.execute_callback(move |cb| cb.on_data_received(remote_address, params, data));
        }
    }

    pub(crate) fn on_data_receive_failed(
        &self,
        remote_address: UwbAddress,
        reason: DataFailureReason,
        params: Params,
    ) {
        if self.accept_if_open("on_data_receive_failed") {
            self.execute_callback(move |cb| {
                cb.on_data_receive_failed(remote_address, reason, params);
            });
        }
    }

    pub(crate) fn on_service_discovered(&self, params: Params) {
        if self.accept_if_open("on_service_discovered") {
            self.execute_callback(move |cb| cb.on_service_discovered(params));
        }
    }

    pub(crate) fn on_service_connected(&self, params: Params) {
        if self.accept_if_open("on_service_connected") {
            self.execute_callback(move |cb| cb.on_service_connected(params));
        }
    }

    pub(crate) fn on_ranging_rounds_update_dt_tag_status(&self, params: Params) {
        if self.accept_if_open("on_ranging_rounds_update_dt_tag_status") {
            self.execute_callback(move |cb| cb.on_ranging_rounds_update_dt_tag_status(params));
        }
    }

    /// Force the terminal state without notifying the application.
    pub(crate) fn mark_closed(&self) {
        *self.lock_state() = SessionState::Closed;
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<(), SessionError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(SessionError::IllegalState { operation, state })
        }
    }

    /// Apply a lifecycle event. Returns `false` if the event is dropped.
    fn advance(&self, event: &'static str, next: Option<SessionState>) -> bool {
        let mut state = self.lock_state();
        if *state == SessionState::Closed {
            tracing::warn!(handle = %self.handle, "{event} invoked for a closed session");
            return false;
        }
        tracing::trace!(handle = %self.handle, from = %*state, "{event}");
        if let Some(next) = next {
            *state = next;
        }
        true
    }

    fn accept_if_open(&self, event: &'static str) -> bool {
        let state = self.state();
        if matches!(state, SessionState::Idle | SessionState::Active) {
            tracing::trace!(handle = %self.handle, "{event}");
            true
        } else {
            tracing::warn!(handle = %self.handle, %state, "{event} invoked for non-open session");
            false
        }
    }

    fn execute_callback<F>(&self, f: F)
    where
        F: FnOnce(&dyn RangingCallback) + Send + 'static,
    {
        let callback = Arc::clone(&self.callback);
        self.executor.execute(Box::new(move || f(callback.as_ref())));
    }
}

impl std::fmt::Debug for RangingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangingSession")
            .field("handle", &self.handle)
            .field("chip_id", &self.chip_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_test::{assert_err, assert_ok, block_on};
    use uwb_session_core::TransportError;

    use super::*;
    use crate::testing::{Event, RecordingAdapter, RecordingCallback, Request, handle, test_executor};

    fn session() -> (Arc<RangingSession>, Arc<RecordingAdapter>, Arc<RecordingCallback>) {
        let adapter = Arc::new(RecordingAdapter::default());
        let callback = Arc::new(RecordingCallback::default());
        let session = RangingSession::new(
            handle(1),
            None,
            adapter.clone(),
            test_executor(),
            callback.clone(),
        );
        (session, adapter, callback)
    }

    #[test]
    fn test_start_requires_idle() {
        let (session, adapter, _) = session();
        let err = session.start(&Params::new()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::IllegalState {
                operation: "start",
                state: SessionState::Init
            }
        ));
        assert!(adapter.requests().is_empty());
    }

    #[test]
    fn test_start_does_not_change_state_until_acknowledged() {
        let (session, adapter, _) = session();
        session.on_ranging_opened();
        session.start(&Params::new()).unwrap();

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(adapter.requests(), vec![Request::Start(1)]);

        session.on_ranging_started(Params::new());
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn test_start_on_closed_session_issues_no_request() {
        let (session, adapter, _) = session();
        session.on_ranging_closed(Reason::RemoteRequest, Params::new());

        assert!(session.start(&Params::new()).unwrap_err().is_illegal_call());
        assert!(session.stop().is_err());
        assert!(session.pause(&Params::new()).is_err());
        assert!(adapter.requests().is_empty());
    }

    #[test]
    fn test_operation_gates() {
        let (session, _, _) = session();
        session.on_ranging_opened();

        // Idle
        assert!(session.reconfigure(&Params::new()).is_ok());
        assert!(session.add_controlee(&Params::new()).is_ok());
        assert!(session.remove_controlee(&Params::new()).is_ok());
        assert!(session.stop().is_err());
        assert!(session.pause(&Params::new()).is_err());
        assert!(session.resume(&Params::new()).is_err());
        assert!(session.update_ranging_rounds_dt_tag(&Params::new()).is_err());

        session.on_ranging_started(Params::new());

        // Active
        assert!(session.start(&Params::new()).is_err());
        assert!(session.stop().is_ok());
        assert!(session.pause(&Params::new()).is_ok());
        assert!(session.resume(&Params::new()).is_ok());
        assert!(session.update_ranging_rounds_dt_tag(&Params::new()).is_ok());
        let address = UwbAddress::from_bytes(&[1, 2]).unwrap();
        assert!(
            session
                .send_data(&address, &Params::new(), Bytes::from_static(b"hi"))
                .is_ok()
        );
    }

    #[test]
    fn test_close_on_closed_session_redispatches_on_closed() {
        let (session, adapter, callback) = session();
        session.on_ranging_opened();
        session.on_ranging_closed(Reason::RemoteRequest, Params::new());
        session.close().unwrap();
        session.close().unwrap();

        callback.wait_for(4);
        assert_eq!(
            callback.events(),
            vec![
                Event::Opened(1),
                Event::Closed(Reason::RemoteRequest),
                Event::Closed(Reason::LocalRequest),
                Event::Closed(Reason::LocalRequest),
            ]
        );
        assert!(adapter.requests().is_empty());
    }

    #[test]
    fn test_close_issues_remote_request_while_open() {
        let (session, adapter, _) = session();
        session.on_ranging_opened();
        session.close().unwrap();

        assert_eq!(adapter.requests(), vec![Request::Close(1)]);
        // Still open until the remote side confirms.
        assert!(session.is_open());
    }

    #[test]
    fn test_failures_leave_state_unchanged() {
        let (session, _, callback) = session();
        session.on_ranging_opened();
        session.on_ranging_started(Params::new());
        session.on_ranging_stop_failed(Reason::GenericError, Params::new());
        session.on_ranging_reconfigure_failed(Reason::BadParameters, Params::new());

        assert_eq!(session.state(), SessionState::Active);
        callback.wait_for(4);
        assert_eq!(
            callback.events()[2..],
            [
                Event::StopFailed(Reason::GenericError),
                Event::ReconfigureFailed(Reason::BadParameters),
            ]
        );
    }

    #[test]
    fn test_open_failed_is_terminal() {
        let (session, _, callback) = session();
        session.on_ranging_open_failed(Reason::MaxSessionsReached, Params::new());
        session.on_ranging_opened();

        assert_eq!(session.state(), SessionState::Closed);
        callback.wait_for(1);
        callback.assert_quiet();
        assert_eq!(
            callback.events(),
            vec![Event::OpenFailed(Reason::MaxSessionsReached)]
        );
    }

    #[test]
    fn test_non_lifecycle_events_require_open_session() {
        let (session, _, callback) = session();
        session.on_ranging_result(Params::new());
        session.on_ranging_paused(Params::new());

        session.on_ranging_opened();
        session.on_ranging_result(Params::new().with("distance_cm", 120));

        callback.wait_for(2);
        callback.assert_quiet();
        assert_eq!(callback.events(), vec![Event::Opened(1), Event::Report]);
    }

    #[test]
    fn test_transport_failure_is_surfaced() {
        let (session, adapter, _) = session();
        session.on_ranging_opened();
        adapter.fail_requests(true);

        let err = session.start(&Params::new()).unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_query_max_data_size_requires_open() {
        let (session, adapter, _) = session();
        let err = assert_err!(block_on(session.query_max_data_size_bytes()));
        assert!(err.is_illegal_call());

        session.on_ranging_opened();
        assert_eq!(assert_ok!(block_on(session.query_max_data_size_bytes())), 1024);

        adapter.fail_requests(true);
        let err = assert_err!(block_on(session.query_max_data_size_bytes()));
        assert!(matches!(err, SessionError::Transport(TransportError::Timeout(_))));
    }
}
