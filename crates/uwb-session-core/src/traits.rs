//! Collaborator traits and error types.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::{
    Params,
    types::{
        ControleeFailureReason, DataFailureReason, Reason, SessionHandle, SessionState,
        UwbAddress,
    },
};

/// Failure to deliver a request to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Remote endpoint disconnected")]
    Disconnected,
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Remote endpoint rejected the request: {0}")]
    Rejected(String),
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Error returned synchronously to the caller of a session operation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation is not legal in the current state.
    #[error("{operation} is not allowed while the session is {state}")]
    IllegalState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Whether this is a caller-usage error rather than a transport failure.
    #[must_use]
    pub const fn is_illegal_call(&self) -> bool {
        matches!(self, Self::IllegalState { .. } | Self::InvalidArgument(_))
    }
}

/// Control interface of the remote UWB service.
///
/// Every request returns as soon as it has been handed to the transport;
/// completion arrives later through [`RangingEventSink`].
#[async_trait]
pub trait RangingAdapter: Send + Sync {
    /// Routing ids (chip ids) the remote side currently advertises.
    fn chip_ids(&self) -> Vec<String>;

    /// Chip used when a session does not name one.
    fn default_chip_id(&self) -> Option<String>;

    fn open_ranging(
        &self,
        handle: &SessionHandle,
        params: &Params,
        chip_id: Option<&str>,
    ) -> Result<(), TransportError>;

    fn start_ranging(&self, handle: &SessionHandle, params: &Params) -> Result<(), TransportError>;

    fn stop_ranging(&self, handle: &SessionHandle) -> Result<(), TransportError>;

    fn reconfigure_ranging(
        &self,
        handle: &SessionHandle,
        params: &Params,
    ) -> Result<(), TransportError>;

    fn close_ranging(&self, handle: &SessionHandle) -> Result<(), TransportError>;

    fn add_controlee(&self, handle: &SessionHandle, params: &Params) -> Result<(), TransportError>;

    fn remove_controlee(
        &self,
        handle: &SessionHandle,
        params: &Params,
    ) -> Result<(), TransportError>;

    fn pause(&self, handle: &SessionHandle, params: &Params) -> Result<(), TransportError>;

    fn resume(&self, handle: &SessionHandle, params: &Params) -> Result<(), TransportError>;

    fn send_data(
        &self,
        handle: &SessionHandle,
        remote_address: &UwbAddress,
        params: &Params,
        data: &Bytes,
    ) -> Result<(), TransportError>;

    fn update_ranging_rounds_dt_tag(
        &self,
        handle: &SessionHandle,
        params: &Params,
    ) -> Result<(), TransportError>;

    fn update_pose(&self, handle: &SessionHandle, params: &Params) -> Result<(), TransportError>;

    /// Ask the remote side for the largest payload `send_data` accepts.
    ///
    /// This waits for the answer, bounded by the transport's timeout.
    async fn query_max_data_size_bytes(&self, handle: &SessionHandle)
    -> Result<u32, TransportError>;

    fn set_enabled(&self, enabled: bool) -> Result<(), TransportError>;

    fn register_adapter_state_callbacks(&self) -> Result<(), TransportError>;

    fn unregister_adapter_state_callbacks(&self) -> Result<(), TransportError>;
}

/// Receiver of asynchronous events emitted by the remote UWB service.
///
/// Implementations must never panic or block: the caller is a
/// transport-owned thread.
pub trait RangingEventSink: Send + Sync {
    fn on_ranging_opened(&self, handle: &SessionHandle);
    fn on_ranging_open_failed(&self, handle: &SessionHandle, reason: Reason, params: Params);
    fn on_ranging_started(&self, handle: &SessionHandle, params: Params);
    fn on_ranging_start_failed(&self, handle: &SessionHandle, reason: Reason, params: Params);
    fn on_ranging_reconfigured(&self, handle: &SessionHandle, params: Params);
    fn on_ranging_reconfigure_failed(&self, handle: &SessionHandle, reason: Reason, params: Params);
    fn on_ranging_stopped(&self, handle: &SessionHandle, reason: Reason, params: Params);
    fn on_ranging_stop_failed(&self, handle: &SessionHandle, reason: Reason, params: Params);
    fn on_ranging_closed(&self, handle: &SessionHandle, reason: Reason, params: Params);
    fn on_ranging_result(&self, handle: &SessionHandle, report: Params);
    fn on_controlee_added(&self, handle: &SessionHandle, params: Params);
    fn on_controlee_add_failed(
        &self,
        handle: &SessionHandle,
        reason: ControleeFailureReason,
        params: Params,
    );
    fn on_controlee_removed(&self, handle: &SessionHandle, params: Params);
    fn on_controlee_remove_failed(
        &self,
        handle: &SessionHandle,
        reason: ControleeFailureReason,
        params: Params,
    );
    fn on_ranging_paused(&self, handle: &SessionHandle, params: Params);
    fn on_ranging_pause_failed(&self, handle: &SessionHandle, reason: Reason, params: Params);
    fn on_ranging_resumed(&self, handle: &SessionHandle, params: Params);
    fn on_ranging_resume_failed(&self, handle: &SessionHandle, reason: Reason, params: Params);
    fn on_data_sent(&self, handle: &SessionHandle, remote_address: UwbAddress, params: Params);
    fn on_data_send_failed(
        &self,
        handle: &SessionHandle,
        remote_address: UwbAddress,
        reason: DataFailureReason,
        params: Params,
    );
    fn on_data_received(
        &self,
        handle: &SessionHandle,
        remote_address: UwbAddress,
        params: Params,
        data: Bytes,
    );
    fn on_data_receive_failed(
        &self,
        handle: &SessionHandle,
        remote_address: UwbAddress,
        reason: DataFailureReason,
        params: Params,
    );
    fn on_service_discovered(&self, handle: &SessionHandle, params: Params);
    fn on_service_connected(&self, handle: &SessionHandle, params: Params);
    fn on_ranging_rounds_update_dt_tag_status(&self, handle: &SessionHandle, params: Params);
}

/// Single remote-side registration shared by many local callbacks.
pub trait RemoteRegistrar: Send + Sync {
    /// Establish the remote registration.
    ///
    /// # Errors
    /// Returns the transport failure if the request could not be issued.
    fn register_remote(&self) -> Result<(), TransportError>;

    /// Tear the remote registration down.
    ///
    /// # Errors
    /// Returns the transport failure if the request could not be issued.
    fn unregister_remote(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_call_classification() {
        let err = SessionError::IllegalState {
            operation: "start",
            state: SessionState::Closed,
        };
        assert!(err.is_illegal_call());
        assert_eq!(err.to_string(), "start is not allowed while the session is closed");

        let err = SessionError::from(TransportError::Disconnected);
        assert!(!err.is_illegal_call());
    }
}
