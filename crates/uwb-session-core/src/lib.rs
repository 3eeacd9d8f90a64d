//! Core abstractions for UWB ranging session management.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionHandle`, `Params` and the reason-code enumerations
//! - `RangingAdapter` / `RangingEventSink` - the two directions of the remote channel
//! - `CallbackExecutor` - where application callbacks run

pub mod executor;
pub mod params;
pub mod traits;
pub mod types;

pub use executor::{CallbackExecutor, Task, ThreadExecutor, TokioExecutor};
pub use params::Params;
pub use traits::{RangingAdapter, RangingEventSink, RemoteRegistrar, SessionError, TransportError};
pub use types::{
    AdapterState, AttributionSource, ControleeFailureReason, DataFailureReason, Reason,
    SessionHandle, SessionState, StateChangeReason, UwbAddress,
};
