//! Value types shared by the registry and the transport.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::traits::SessionError;

/// Identity of the application that opened a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributionSource {
    /// Caller uid.
    pub uid: u32,
    /// Caller package, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
}

impl AttributionSource {
    #[must_use]
    pub fn new(uid: u32, package_name: Option<String>) -> Self {
        Self { uid, package_name }
    }
}

/// Never-reused identifier correlating every request and event of one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    id: u64,
    attribution: AttributionSource,
    pid: u32,
}

impl SessionHandle {
    #[must_use]
    pub const fn new(id: u64, attribution: AttributionSource, pid: u32) -> Self {
        Self {
            id,
            attribution,
            pid,
        }
    }

    /// Local sequence number.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Identity of the caller that opened the session.
    #[must_use]
    pub const fn attribution(&self) -> &AttributionSource {
        &self.attribution
    }

    /// Process id of the caller that opened the session.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionHandle{{id={}, uid={}, pid={}}}",
            self.id, self.attribution.uid, self.pid
        )
    }
}

/// Lifecycle state of a ranging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Open requested, not yet acknowledged.
    Init,
    /// Opened, not ranging.
    Idle,
    /// Ranging.
    Active,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Short (2 byte) or extended (8 byte) UWB device address.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct UwbAddress(Vec<u8>);

impl UwbAddress {
    pub const SHORT_LEN: usize = 2;
    pub const EXTENDED_LEN: usize = 8;

    /// Build an address from raw bytes.
    ///
    /// # Errors
    /// Returns `InvalidArgument` unless the length is 2 or 8.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        match bytes.len() {
            Self::SHORT_LEN | Self::EXTENDED_LEN => Ok(Self(bytes.to_vec())),
            n => Err(SessionError::InvalidArgument(format!(
                "UWB address must be {} or {} bytes, got {n}",
                Self::SHORT_LEN,
                Self::EXTENDED_LEN
            ))),
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn is_short(&self) -> bool {
        self.0.len() == Self::SHORT_LEN
    }

    #[must_use]
    pub fn is_extended(&self) -> bool {
        self.0.len() == Self::EXTENDED_LEN
    }
}

impl TryFrom<Vec<u8>> for UwbAddress {
    type Error = SessionError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_bytes(&bytes)
    }
}

impl From<UwbAddress> for Vec<u8> {
    fn from(address: UwbAddress) -> Self {
        address.0
    }
}

impl fmt::Display for UwbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for UwbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UwbAddress({self})")
    }
}

/// Why an operation failed or a session stopped or closed.
///
/// Encoded on the wire by its numeric code. Codes this side does not
/// know decode to [`Reason::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
#[repr(u8)]
pub enum Reason {
    Unknown = 0,
    LocalRequest = 1,
    RemoteRequest = 2,
    BadParameters = 3,
    GenericError = 4,
    MaxSessionsReached = 5,
    SystemPolicy = 6,
    ProtocolSpecificError = 7,
    MaxRetryReached = 9,
    ServiceDiscoveryFailure = 10,
    ServiceConnectionFailure = 11,
    SecureElementNotSupported = 12,
    SecureElementInteractionFailure = 13,
    InsufficientSlots = 14,
    SystemRegulation = 15,
}

impl From<u8> for Reason {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::LocalRequest,
            2 => Self::RemoteRequest,
            3 => Self::BadParameters,
            4 => Self::GenericError,
            5 => Self::MaxSessionsReached,
            6 => Self::SystemPolicy,
            7 => Self::ProtocolSpecificError,
            9 => Self::MaxRetryReached,
            10 => Self::ServiceDiscoveryFailure,
            11 => Self::ServiceConnectionFailure,
            12 => Self::SecureElementNotSupported,
            13 => Self::SecureElementInteractionFailure,
            14 => Self::InsufficientSlots,
            15 => Self::SystemRegulation,
            _ => Self::Unknown,
        }
    }
}

impl From<Reason> for u8 {
    fn from(reason: Reason) -> Self {
        reason as Self
    }
}

/// Why a controlee could not be added or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ControleeFailureReason {
    MaxControleeReached,
    Other(u8),
}

impl From<u8> for ControleeFailureReason {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::MaxControleeReached,
            other => Self::Other(other),
        }
    }
}

impl From<ControleeFailureReason> for u8 {
    fn from(reason: ControleeFailureReason) -> Self {
        match reason {
            ControleeFailureReason::MaxControleeReached => 0,
            ControleeFailureReason::Other(code) => code,
        }
    }
}

/// Why a data transfer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum DataFailureReason {
    DataSizeTooLarge,
    Other(u8),
}

impl From<u8> for DataFailureReason {
    fn from(code: u8) -> Self {
        match code {
            10 => Self::DataSizeTooLarge,
            other => Self::Other(other),
        }
    }
}

impl From<DataFailureReason> for u8 {
    fn from(reason: DataFailureReason) -> Self {
        match reason {
            DataFailureReason::DataSizeTooLarge => 10,
            DataFailureReason::Other(code) => code,
        }
    }
}

/// Power/activity state of the UWB adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
#[repr(u8)]
pub enum AdapterState {
    Disabled = 0,
    EnabledInactive = 1,
    EnabledActive = 2,
}

impl AdapterState {
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::EnabledInactive | Self::EnabledActive)
    }
}

impl From<u8> for AdapterState {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::EnabledInactive,
            2 => Self::EnabledActive,
            _ => Self::Disabled,
        }
    }
}

impl From<AdapterState> for u8 {
    fn from(state: AdapterState) -> Self {
        state as Self
    }
}

/// Why the adapter state last changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
#[repr(u8)]
pub enum StateChangeReason {
    SessionStarted = 0,
    AllSessionsClosed = 1,
    SystemPolicy = 2,
    SystemBoot = 3,
    ErrorUnknown = 4,
    SystemRegulation = 5,
}

impl From<u8> for StateChangeReason {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::SessionStarted,
            1 => Self::AllSessionsClosed,
            2 => Self::SystemPolicy,
            3 => Self::SystemBoot,
            5 => Self::SystemRegulation,
            _ => Self::ErrorUnknown,
        }
    }
}

impl From<StateChangeReason> for u8 {
    fn from(reason: StateChangeReason) -> Self {
        reason as Self
    }
}
