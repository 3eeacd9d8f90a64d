//! Transport between the session registry and a remote UWB service.
//!
//! Provides:
//! - Wire protocol (JSON + base64)
//! - `ChannelAdapter` and `EventPump` wiring the registry to a message channel
//! - WebSocket bridge (feature: websocket)

pub mod channel;
pub mod protocol;
pub mod pump;
pub mod sync_call;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use channel::{ChannelAdapter, ChannelConfig};
pub use protocol::{AdapterMessage, AdapterRequest, RangingEvent};
pub use pump::EventPump;
pub use sync_call::SyncResultReceiver;
