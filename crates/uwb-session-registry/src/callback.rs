//! Application-side callback interface for ranging sessions.

use std::sync::Arc;

use bytes::Bytes;
use uwb_session_core::{ControleeFailureReason, DataFailureReason, Params, Reason, UwbAddress};

use crate::session::RangingSession;

/// Sink for the lifecycle and data events of one ranging session.
///
/// Every method runs on the executor supplied to `open_session`.
/// Methods with a default body are optional.
pub trait RangingCallback: Send + Sync + 'static {
    /// The session was opened and is ready to start ranging.
    fn on_opened(&self, session: Arc<RangingSession>);

    /// The session could not be opened. It is closed and cannot be reused.
    fn on_open_failed(&self, reason: Reason, params: Params);

    /// Ranging started.
    fn on_started(&self, session_info: Params);

    fn on_start_failed(&self, reason: Reason, params: Params);

    fn on_reconfigured(&self, params: Params);

    fn on_reconfigure_failed(&self, reason: Reason, params: Params);

    /// Ranging stopped; the session is idle again.
    fn on_stopped(&self, reason: Reason, params: Params);

    fn on_stop_failed(&self, reason: Reason, params: Params);

    /// The session is closed. Also invoked for every `close()` on an
    /// already-closed session.
    fn on_closed(&self, reason: Reason, params: Params);

    /// A ranging report arrived.
    fn on_report_received(&self, report: Params);

    fn on_controlee_added(&self, _params: Params) {}

    fn on_controlee_add_failed(&self, _reason: ControleeFailureReason, _params: Params) {}

    fn on_controlee_removed(&self, _params: Params) {}

    fn on_controlee_remove_failed(&self, _reason: ControleeFailureReason, _params: Params) {}

    fn on_paused(&self, _params: Params) {}

    fn on_pause_failed(&self, _reason: Reason, _params: Params) {}

    fn on_resumed(&self, _params: Params) {}

    fn on_resume_failed(&self, _reason: Reason, _params: Params) {}

    fn on_data_sent(&self, _remote_address: UwbAddress, _params: Params) {}

    fn on_data_send_failed(
        &self,
        _remote_address: UwbAddress,
        _reason: DataFailureReason,
        _params: Params,
    ) {
    }

    fn on_data_received(&self, _remote_address: UwbAddress, _params: Params, _data: Bytes) {}

    fn on_data_receive_failed(
        &self,
        _remote_address: UwbAddress,
        _reason: DataFailureReason,
        _params: Params,
    ) {
    }

    fn on_service_discovered(&self, _params: Params) {}

    fn on_service_connected(&self, _params: Params) {}

    /// Status of an `update_ranging_rounds_dt_tag` request.
    fn on_ranging_rounds_update_dt_tag_status(&self, _params: Params) {}
}
