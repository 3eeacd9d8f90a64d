//! Wire protocol between the session registry and a remote UWB service.
//!
//! Messages are JSON objects tagged by `type`. Byte payloads travel as
//! base64 strings; reason codes travel as their numeric values.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uwb_session_core::{
    AdapterState, ControleeFailureReason, DataFailureReason, Params, RangingEventSink, Reason,
    SessionHandle, StateChangeReason, TransportError, UwbAddress,
};

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded)
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}

/// Request sent to the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterRequest {
    /// Open a session. `chip_id` is omitted when the caller did not pick one.
    Open {
        handle: SessionHandle,
        params: Params,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chip_id: Option<String>,
    },
    Start {
        handle: SessionHandle,
        params: Params,
    },
    Stop {
        handle: SessionHandle,
    },
    Reconfigure {
        handle: SessionHandle,
        params: Params,
    },
    Close {
        handle: SessionHandle,
    },
    AddControlee {
        handle: SessionHandle,
        params: Params,
    },
    RemoveControlee {
        handle: SessionHandle,
        params: Params,
    },
    Pause {
        handle: SessionHandle,
        params: Params,
    },
    Resume {
        handle: SessionHandle,
        params: Params,
    },
    SendData {
        handle: SessionHandle,
        remote_address: UwbAddress,
        params: Params,
        #[serde(with = "base64_bytes")]
        data: Bytes,
    },
    UpdateRangingRoundsDtTag {
        handle: SessionHandle,
        params: Params,
    },
    UpdatePose {
        handle: SessionHandle,
        params: Params,
    },
    /// Answered by [`AdapterMessage::QueryResult`] with the same `request_id`.
    QueryMaxDataSize {
        handle: SessionHandle,
        request_id: u64,
    },
    SetEnabled {
        enabled: bool,
    },
    RegisterAdapterStateCallbacks,
    UnregisterAdapterStateCallbacks,
}

impl AdapterRequest {
    /// Session this request is about, if any.
    #[must_use]
    pub const fn handle(&self) -> Option<&SessionHandle> {
        match self {
            Self::Open { handle, .. }
            | Self::Start { handle, .. }
            | Self::Stop { handle }
            | Self::Reconfigure { handle, .. }
            | Self::Close { handle }
            | Self::AddControlee { handle, .. }
            | Self::RemoveControlee { handle, .. }
            | Self::Pause { handle, .. }
            | Self::Resume { handle, .. }
            | Self::SendData { handle, .. }
            | Self::UpdateRangingRoundsDtTag { handle, .. }
            | Self::UpdatePose { handle, .. }
            | Self::QueryMaxDataSize { handle, .. } => Some(handle),
            Self::SetEnabled { .. }
            | Self::RegisterAdapterStateCallbacks
            | Self::UnregisterAdapterStateCallbacks => None,
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    /// Returns `Codec` if serialization fails.
    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Codec(e.to_string()))
    }
}

/// Asynchronous event about one session, emitted by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RangingEvent {
    Opened,
    OpenFailed {
        reason: Reason,
        #[serde(default)]
        params: Params,
    },
    Started {
        #[serde(default)]
        params: Params,
    },
    StartFailed {
        reason: Reason,
        #[serde(default)]
        params: Params,
    },
    Reconfigured {
        #[serde(default)]
        params: Params,
    },
    ReconfigureFailed {
        reason: Reason,
        #[serde(default)]
        params: Params,
    },
    Stopped {
        reason: Reason,
        #[serde(default)]
        params: Params,
    },
    StopFailed {
        reason: Reason,
        #[serde(default)]
        params: Params,
    },
    Closed {
        reason: Reason,
        #[serde(default)]
        params: Params,
    },
    RangingResult {
        report: Params,
    },
    ControleeAdded {
        #[serde(default)]
        params: Params,
    },
    ControleeAddFailed {
        reason: ControleeFailureReason,
        #[serde(default)]
        params: Params,
    },
    ControleeRemoved {
        #[serde(default)]
        params: Params,
    },
    ControleeRemoveFailed {
        reason: ControleeFailureReason,
        #[serde(default)]
        params: Params,
    },
    Paused {
        #[serde(default)]
        params: Params,
    },
    PauseFailed {
        reason: Reason,
        #[serde(default)]
        params: Params,
    },
    Resumed {
        #[serde(default)]
        params: Params,
    },
    ResumeFailed {
        reason: Reason,
        #[serde(default)]
        params: Params,
    },
    DataSent {
        remote_address: UwbAddress,
        #[serde(default)]
        params: Params,
    },
    DataSendFailed {
        remote_address: UwbAddress,
        reason: DataFailureReason,
        #[serde(default)]
        params: Params,
    },
    DataReceived {
        remote_address: UwbAddress,
        #[serde(default)]
        params: Params,
        #[serde(with = "base64_bytes")]
        data: Bytes,
    },
    DataReceiveFailed {
        remote_address: UwbAddress,
        reason: DataFailureReason,
        #[serde(default)]
        params: Params,
    },
    ServiceDiscovered {
        #[serde(default)]
        params: Params,
    },
    ServiceConnected {
        #[serde(default)]
        params: Params,
    },
    RangingRoundsUpdateDtTagStatus {
        #[serde(default)]
        params: Params,
    },
}

impl RangingEvent {
    /// Hand this event for `handle` to the matching `sink` method.
    pub fn deliver<S: RangingEventSink + ?Sized>(self, handle: &SessionHandle, sink: &S) {
        match self {
            Self::Opened => sink.on_ranging_opened(handle),
            Self::OpenFailed { reason, params } => {
                sink.on_ranging_open_failed(handle, reason, params);
            }
            Self::Started { params } => sink.on_ranging_started(handle, params),
            Self::StartFailed { reason, params } => {
                sink.on_ranging_start_failed(handle, reason, params);
            }
            Self::Reconfigured { params } => sink.on_ranging_reconfigured(handle, params),
            Self::ReconfigureFailed { reason, params } => {
                sink.on_ranging_reconfigure_failed(handle, reason, params);
            }
            Self::Stopped { reason, params } => sink.on_ranging_stopped(handle, reason, params),
            Self::StopFailed { reason, params } => {
                sink.on_ranging_stop_failed(handle, reason, params);
            }
            Self::Closed { reason, params } => sink.on_ranging_closed(handle, reason, params),
            Self::RangingResult { report } => sink.on_ranging_result(handle, report),
            Self::ControleeAdded { params } => sink.on_controlee_added(handle, params),
            Self::ControleeAddFailed { reason, params } => {
                sink.on_controlee_add_failed(handle, reason, params);
            }
            Self::ControleeRemoved { params } => sink.on_controlee_removed(handle, params),
            Self::ControleeRemoveFailed { reason, params } => {
                sink.on_controlee_remove_failed(handle, reason, params);
            }
            Self::Paused { params } => sink.on_ranging_paused(handle, params),
            Self::PauseFailed { reason, params } => {
                sink.on_ranging_pause_failed(handle, reason, params);
            }
            Self::Resumed { params } => sink.on_ranging_resumed(handle, params),
            Self::ResumeFailed { reason, params } => {
                sink.on_ranging_resume_failed(handle, reason, params);
            }
            Self::DataSent {
                remote_address,
                params,
            } => sink.on_data_sent(handle, remote_address, params),
            Self::DataSendFailed {
                remote_address,
                reason,
                params,
            } => sink.on_data_send_failed(handle, remote_address, reason, params),
            Self::DataReceived {
                remote_address,
                params,
                data,
            } => sink.on_data_received(handle, remote_address, params, data),
            Self::DataReceiveFailed {
                remote_address,
                reason,
                params,
            } => sink.on_data_receive_failed(handle, remote_address, reason, params),
            Self::ServiceDiscovered { params } => sink.on_service_discovered(handle, params),
            Self::ServiceConnected { params } => sink.on_service_connected(handle, params),
            Self::RangingRoundsUpdateDtTagStatus { params } => {
                sink.on_ranging_rounds_update_dt_tag_status(handle, params);
            }
        }
    }
}

/// Message from the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterMessage {
    /// Session event.
    Event {
        handle: SessionHandle,
        event: RangingEvent,
    },
    /// Adapter power/activity change.
    AdapterStateChanged {
        state: AdapterState,
        reason: StateChangeReason,
    },
    /// Answer to [`AdapterRequest::QueryMaxDataSize`].
    QueryResult { request_id: u64, value: u32 },
}

impl AdapterMessage {
    /// Decode a JSON text frame.
    ///
    /// # Errors
    /// Returns `Codec` for malformed or unknown messages.
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Codec(e.to_string()))
    }
}
