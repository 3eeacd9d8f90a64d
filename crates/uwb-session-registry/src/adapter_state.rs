//! UWB adapter state listener.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uwb_session_core::{
    AdapterState, CallbackExecutor, RangingAdapter, RemoteRegistrar, StateChangeReason,
    TransportError,
};

use crate::multiplexer::{CallbackMultiplexer, MultiplexerError};

/// Application callback for adapter state changes.
pub trait AdapterStateCallback: Send + Sync + 'static {
    fn on_state_changed(&self, state: AdapterState, reason: StateChangeReason);
}

struct AdapterStateRegistrar(Arc<dyn RangingAdapter>);

impl RemoteRegistrar for AdapterStateRegistrar {
    fn register_remote(&self) -> Result<(), TransportError> {
        self.0.register_adapter_state_callbacks()
    }

    fn unregister_remote(&self) -> Result<(), TransportError> {
        self.0.unregister_adapter_state_callbacks()
    }
}

/// Tracks the adapter state and fans changes out to registered callbacks.
pub struct AdapterStateListener {
    adapter: Arc<dyn RangingAdapter>,
    callbacks: Arc<CallbackMultiplexer<dyn AdapterStateCallback>>,
    current: Mutex<(AdapterState, StateChangeReason)>,
}

impl AdapterStateListener {
    /// Create a new listener. `available` is the initial transport availability.
    #[must_use]
    pub fn new(adapter: Arc<dyn RangingAdapter>, available: bool) -> Self {
        let registrar = Arc::new(AdapterStateRegistrar(Arc::clone(&adapter)));
        Self {
            adapter,
            callbacks: Arc::new(CallbackMultiplexer::new(registrar, available)),
            current: Mutex::new((AdapterState::Disabled, StateChangeReason::ErrorUnknown)),
        }
    }

    /// Register a callback. It immediately receives the last known state.
    ///
    /// # Errors
    /// See [`CallbackMultiplexer::register`].
    pub fn register(
        &self,
        executor: Arc<dyn CallbackExecutor>,
        callback: Arc<dyn AdapterStateCallback>,
    ) -> Result<(), MultiplexerError> {
        let current = self.lock_current();
        self.callbacks
            .register(Arc::clone(&executor), Arc::clone(&callback))?;
        let (state, reason) = *current;
        executor.execute(Box::new(move || callback.on_state_changed(state, reason)));
        Ok(())
    }

    /// Unregister a callback.
    ///
    /// # Errors
    /// `NotRegistered` if `callback` was never registered.
    pub fn unregister(&self, callback: &Arc<dyn AdapterStateCallback>) -> Result<(), MultiplexerError> {
        self.callbacks.unregister(callback)
    }

    /// Last state reported by the remote side.
    #[must_use]
    pub fn adapter_state(&self) -> AdapterState {
        self.lock_current().0
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.adapter_state().is_enabled()
    }

    /// Ask the remote side to enable or disable the adapter.
    ///
    /// # Errors
    /// Returns the transport error if the request could not be sent.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        tracing::debug!(enabled, "Setting UWB adapter enabled state");
        self.adapter.set_enabled(enabled)
    }

    /// Record a state change and deliver it to every callback.
    pub fn on_adapter_state_changed(&self, state: AdapterState, reason: StateChangeReason) {
        let mut current = self.lock_current();
        tracing::debug!(?state, ?reason, "UWB adapter state changed");
        *current = (state, reason);
        self.callbacks
            .for_each(move |cb| cb.on_state_changed(state, reason));
    }

    /// Multiplexer backing this listener, for availability subscriptions.
    #[must_use]
    pub const fn callbacks(&self) -> &Arc<CallbackMultiplexer<dyn AdapterStateCallback>> {
        &self.callbacks
    }

    fn lock_current(&self) -> MutexGuard<'_, (AdapterState, StateChangeReason)> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
