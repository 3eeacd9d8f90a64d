//! Session registry: handle allocation and event routing.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use serde::Deserialize;
use uwb_session_core::{
    AttributionSource, CallbackExecutor, ControleeFailureReason, DataFailureReason, Params,
    RangingAdapter, RangingEventSink, Reason, SessionError, SessionHandle, UwbAddress,
};

use crate::{callback::RangingCallback, cancel::CancellationSignal, session::RangingSession};

/// Registry configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Log a warning for every live session when the registry is dropped.
    pub warn_unclosed_on_drop: bool,
}

struct Inner {
    last_id: u64,
    sessions: HashMap<SessionHandle, Arc<RangingSession>>,
}

/// Authoritative table of live ranging sessions.
///
/// One lock guards the table. Every remote event is looked up and applied
/// to its session while holding it, so events for one handle are
/// processed strictly one after another. Application callbacks are only
/// queued on their executors, never run under the lock.
pub struct SessionRegistry {
    adapter: Arc<dyn RangingAdapter>,
    config: RegistryConfig,
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    /// Create a new session registry.
    #[must_use]
    pub fn new(adapter: Arc<dyn RangingAdapter>) -> Self {
        Self::with_config(adapter, RegistryConfig::default())
    }

    #[must_use]
    pub fn with_config(adapter: Arc<dyn RangingAdapter>, config: RegistryConfig) -> Self {
        Self {
            adapter,
            config,
            inner: Mutex::new(Inner {
                last_id: 0,
                sessions: HashMap::new(),
            }),
        }
    }

    /// Open a new ranging session.
    ///
    /// The session is tracked in `Init` before the open request goes out;
    /// the lock is released before the adapter is called. The outcome is
    /// reported through `on_opened` / `on_open_failed`.
    ///
    /// # Errors
    /// `InvalidArgument` if `chip_id` is not advertised by the adapter;
    /// `Transport` if the open request could not be sent, in which case the
    /// session is forgotten.
    pub fn open_session(
        &self,
        attribution: AttributionSource,
        params: &Params,
        executor: Arc<dyn CallbackExecutor>,
        callback: Arc<dyn RangingCallback>,
        chip_id: Option<&str>,
    ) -> Result<CancellationSignal, SessionError> {
        if let Some(chip_id) = chip_id {
            if !self.adapter.chip_ids().iter().any(|c| c == chip_id) {
                return Err(SessionError::InvalidArgument(format!(
                    "Unknown chip id: {chip_id}"
                )));
            }
        }
        let bound_chip = chip_id
            .map(str::to_owned)
            .or_else(|| self.adapter.default_chip_id());

        let session = {
            let mut inner = self.lock();
            inner.last_id += 1;
            let handle = SessionHandle::new(inner.last_id, attribution, std::process::id());
            let session = RangingSession::new(
                handle.clone(),
                bound_chip,
                Arc::clone(&self.adapter),
                executor,
                callback,
            );
            inner.sessions.insert(handle, Arc::clone(&session));
            session
        };

        tracing::debug!(handle = %session.handle(), chip_id = ?session.chip_id(), "Opening ranging session");
        if let Err(e) = self.adapter.open_ranging(session.handle(), params, chip_id) {
            tracing::error!(handle = %session.handle(), "Failed to send open request: {e}");
            self.lock().sessions.remove(session.handle());
            session.mark_closed();
            return Err(e.into());
        }

        Ok(CancellationSignal::new(session))
    }

    /// Session for a live handle.
    #[must_use]
    pub fn session(&self, handle: &SessionHandle) -> Option<Arc<RangingSession>> {
        self.lock().sessions.get(handle).cloned()
    }

    /// Handles of every live session, in allocation order.
    #[must_use]
    pub fn live_sessions(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self.lock().sessions.keys().cloned().collect();
        handles.sort_by_key(SessionHandle::id);
        handles
    }

    /// Ask every live session to close.
    ///
    /// Returns how many close requests were issued. Sessions leave the
    /// table once the remote side confirms.
    pub fn shutdown(&self) -> usize {
        let mut sessions: Vec<_> = self.lock().sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.handle().id());
        let mut requested = 0;
        for session in sessions {
            match session.close() {
                Ok(()) => requested += 1,
                Err(e) => {
                    tracing::error!(handle = %session.handle(), "Failed to close session: {e}");
                }
            }
        }
        tracing::info!(requested, "Registry shutdown requested");
        requested
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_session<F>(&self, handle: &SessionHandle, event: &'static str, f: F)
    where
        F: FnOnce(&Arc<RangingSession>),
    {
        let inner = self.lock();
        match inner.sessions.get(handle) {
            Some(session) => f(session),
            None => tracing::warn!(%handle, "{event}: unknown session handle, dropping event"),
        }
    }

    /// Like `with_session`, but the handle leaves the table first.
    fn with_terminal_session<F>(&self, handle: &SessionHandle, event: &'static str, f: F)
    where
        F: FnOnce(&Arc<RangingSession>),
    {
        let mut inner = self.lock();
        match inner.sessions.remove(handle) {
            Some(session) => f(&session),
            None => tracing::warn!(%handle, "{event}: unknown session handle, dropping event"),
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        if !self.config.warn_unclosed_on_drop {
            return;
        }
        for handle in self.lock().sessions.keys() {
            tracing::warn!(%handle, "Ranging session was never closed");
        }
    }
}

impl RangingEventSink for SessionRegistry {
    fn on_ranging_opened(&self, handle: &SessionHandle) {
        self.with_session(handle, "on_ranging_opened", RangingSession::on_ranging_opened);
    }

    fn on_ranging_open_failed(&self, handle: &SessionHandle, reason: Reason, params: Params) {
        self.with_terminal_session(handle, "on_ranging_open_failed", |s| {
            s.on_ranging_open_failed(reason, params);
        });
    }

    fn on_ranging_started(&self, handle: &SessionHandle, params: Params) {
        self.with_session(handle, "on_ranging_started", |s| s.on_ranging_started(params));
    }

    fn on_ranging_start_failed(&self, handle: &SessionHandle, reason: Reason, params: Params) {
        self.with_session(handle, "on_ranging_start_failed", |s| {
            s.on_ranging_start_failed(reason, params);
        });
    }

    fn on_ranging_reconfigured(&self, handle: &SessionHandle, params: Params) {
        self.with_session(handle, "on_ranging_reconfigured", |s| {
            s.on_ranging_reconfigured(params);
        });
    }

    fn on_ranging_reconfigure_failed(&self, handle: &SessionHandle, reason: Reason, params: Params) {
        self.with_session(handle, "on_ranging_reconfigure_failed", |s| {
            s.on_ranging_reconfigure_failed(reason, params);
        });
    }

    fn on_ranging_stopped(&self, handle: &SessionHandle, reason: Reason, params: Params) {
        self.with_session(handle, "on_ranging_stopped", |s| {
            s.on_ranging_stopped(reason, params);
        });
    }

    fn on_ranging_stop_failed(&self, handle: &SessionHandle, reason: Reason, params: Params) {
        self.with_session(handle, "on_ranging_stop_failed", |s| {
            s.on_ranging_stop_failed(reason, params);
        });
    }

    fn on_ranging_closed(&self, handle: &SessionHandle, reason: Reason, params: Params) {
        self.with_terminal_session(handle, "on_ranging_closed", |s| {
            s.on_ranging_closed(reason, params);
        });
    }

    fn on_ranging_result(&self, handle: &SessionHandle, report: Params) {
        self.with_session(handle, "on_ranging_result", |s| s.on_ranging_result(report));
    }

    fn on_controlee_added(&self, handle: &SessionHandle, params: Params) {
        self.with_session(handle, "on_controlee_added", |s| s.on_controlee_added(params));
    }

    fn on_controlee_add_failed(
        &self,
        handle: &SessionHandle,
        reason: ControleeFailureReason,
        params: Params,
    ) {
        self.with_session(handle, "on_controlee_add_failed", |s| {
            s.on_controlee_add_failed(reason, params);
        });
    }

    fn on_controlee_removed(&self, handle: &SessionHandle, params: Params) {
        self.with_session(handle, "on_controlee_removed", |s| s.on_controlee_removed(params));
    }

    fn on_controlee_remove_failed(
        &self,
        handle: &SessionHandle,
        reason: ControleeFailureReason,
        params: Params,
    ) {
        self.with_session(handle, "on_controlee_remove_failed", |s| {
            s.on_controlee_remove_failed(reason, params);
        });
    }

    fn on_ranging_paused(&self, handle: &SessionHandle, params: Params) {
        self.with_session(handle, "on_ranging_paused", |s| s.on_ranging_paused(params));
    }

    fn on_ranging_pause_failed(&self, handle: &SessionHandle, reason: Reason, params: Params) {
        self.with_session(handle, "on_ranging_pause_failed", |s| {
            s.on_ranging_pause_failed(reason, params);
        });
    }

    fn on_ranging_resumed(&self, handle: &SessionHandle, params: Params) {
        self.with_session(handle, "on_ranging_resumed", |s| s.on_ranging_resumed(params));
    }

    fn on_ranging_resume_failed(&self, handle: &SessionHandle, reason: Reason, params: Params) {
        self.with_session(handle, "on_ranging_resume_failed", |s| {
            s.on_ranging_resume_failed(reason, params);
        });
    }

    fn on_data_sent(&self, handle: &SessionHandle, remote_address: UwbAddress, params: Params) {
        self.with_session(handle, "on_data_sent", |s| s.on_data_sent(remote_address, params));
    }

    fn on_data_send_failed(
        &self,
        handle: &SessionHandle,
        remote_address: UwbAddress,
        reason: DataFailureReason,
        params: Params,
    ) {
        self.with_session(handle, "on_data_send_failed", |s| {
            s.on_data_send_failed(remote_address, reason, params);
        });
    }

    fn on_data_received(
        &self,
        handle: &SessionHandle,
        remote_address: UwbAddress,
        params: Params,
        data: Bytes,
    ) {
        self.with_session(handle, "on_data_received", |s| {
            s.on_data_received(remote_address, params, data);
        });
    }

    fn on_data_receive_failed(
        &self,
        handle: &SessionHandle,
        remote_address: UwbAddress,
        reason: DataFailureReason,
        params: Params,
    ) {
        self.with_session(handle, "on_data_receive_failed", |s| {
            s.on_data_receive_failed(remote_address, reason, params);
        });
    }

    fn on_service_discovered(&self, handle: &SessionHandle, params: Params) {
        self.with_session(handle, "on_service_discovered", |s| s.on_service_discovered(params));
    }

    fn on_service_connected(&self, handle: &SessionHandle, params: Params) {
        self.with_session(handle, "on_service_connected", |s| s.on_service_connected(params));
    }

    fn on_ranging_rounds_update_dt_tag_status(&self, handle: &SessionHandle, params: Params) {
        self.with_session(handle, "on_ranging_rounds_update_dt_tag_status", |s| {
            s.on_ranging_rounds_update_dt_tag_status(params);
        });
    }
}
