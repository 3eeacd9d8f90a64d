//! Ranging session registry for UWB.
//!
//! Provides:
//! - `SessionRegistry` - Allocate session handles and route remote events
//! - `RangingSession` - Per-session state machine
//! - `CallbackMultiplexer` / `AdapterStateListener` - Many local callbacks, one remote registration

pub mod adapter_state;
pub mod callback;
pub mod cancel;
pub mod multiplexer;
pub mod registry;
pub mod session;

#[cfg(test)]
mod testing;

pub use adapter_state::{AdapterStateCallback, AdapterStateListener};
pub use callback::RangingCallback;
pub use cancel::CancellationSignal;
pub use multiplexer::{AvailabilityGuard, CallbackMultiplexer, MultiplexerError};
pub use registry::{RegistryConfig, SessionRegistry};
pub use session::RangingSession;
