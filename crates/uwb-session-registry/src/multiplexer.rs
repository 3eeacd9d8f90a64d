//! Fan-out of one remote event stream to many local callbacks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use uwb_session_core::{CallbackExecutor, RemoteRegistrar, TransportError};

/// Multiplexer error.
#[derive(Debug, Error)]
pub enum MultiplexerError {
    #[error("Callback is already registered")]
    AlreadyRegistered,
    #[error("Callback is not registered")]
    NotRegistered,
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

struct Registration<C: ?Sized> {
    callback: Arc<C>,
    executor: Arc<dyn CallbackExecutor>,
}

struct Inner<C: ?Sized> {
    registrations: Vec<Registration<C>>,
    available: bool,
    remote_registered: bool,
}

/// Callback table sharing a single remote registration.
///
/// The remote registration exists while at least one callback is
/// registered and the adapter is available. It is re-established every
/// time the adapter comes back, since a restarted service has forgotten
/// it. Callbacks are compared by identity, not by value.
pub struct CallbackMultiplexer<C: ?Sized + Send + Sync + 'static> {
    registrar: Arc<dyn RemoteRegistrar>,
    inner: Mutex<Inner<C>>,
}

impl<C: ?Sized + Send + Sync + 'static> CallbackMultiplexer<C> {
    /// Create a new multiplexer.
    #[must_use]
    pub fn new(registrar: Arc<dyn RemoteRegistrar>, available: bool) -> Self {
        Self {
            registrar,
            inner: Mutex::new(Inner {
                registrations: Vec::new(),
                available,
                remote_registered: false,
            }),
        }
    }

    /// Register `callback` to run on `executor`.
    ///
    /// If the adapter is unavailable, the remote registration is deferred
    /// until [`CallbackMultiplexer::on_adapter_available`].
    ///
    /// # Errors
    /// `AlreadyRegistered` for a callback already in the table; `Transport`
    /// if the remote registration failed, in which case nothing is stored.
    pub fn register(
        &self,
        executor: Arc<dyn CallbackExecutor>,
        callback: Arc<C>,
    ) -> Result<(), MultiplexerError> {
        let mut inner = self.lock();
        if inner
            .registrations
            .iter()
            .any(|r| std::ptr::addr_eq(Arc::as_ptr(&r.callback), Arc::as_ptr(&callback)))
        {
            return Err(MultiplexerError::AlreadyRegistered);
        }

        if !inner.available {
            tracing::debug!("Adapter unavailable, deferring remote registration");
        } else if !inner.remote_registered {
            self.registrar.register_remote()?;
            inner.remote_registered = true;
        }
        inner.registrations.push(Registration { callback, executor });
        Ok(())
    }

    /// Remove `callback`. The remote registration goes with the last one.
    ///
    /// # Errors
    /// `NotRegistered` if `callback` is not in the table.
    pub fn unregister(&self, callback: &Arc<C>) -> Result<(), MultiplexerError> {
        let mut inner = self.lock();
        let position = inner
            .registrations
            .iter()
            .position(|r| std::ptr::addr_eq(Arc::as_ptr(&r.callback), Arc::as_ptr(callback)))
            .ok_or(MultiplexerError::NotRegistered)?;
        inner.registrations.remove(position);

        if inner.registrations.is_empty() && inner.remote_registered {
            inner.remote_registered = false;
            if inner.available {
                if let Err(e) = self.registrar.unregister_remote() {
                    tracing::warn!("Failed to drop remote registration: {e}");
                }
            }
        }
        Ok(())
    }

    /// Deliver one event to every registered callback, each on its own executor.
    pub fn for_each<F>(&self, f: F)
    where
        F: Fn(&C) + Send + Sync + 'static,
    {
        let targets: Vec<_> = self
            .lock()
            .registrations
            .iter()
            .map(|r| (Arc::clone(&r.callback), Arc::clone(&r.executor)))
            .collect();

        let f = Arc::new(f);
        for (callback, executor) in targets {
            let f = Arc::clone(&f);
            executor.execute(Box::new(move || (*f)(&*callback)));
        }
    }

    /// The adapter came up, possibly after a restart.
    pub fn on_adapter_available(&self) {
        let mut inner = self.lock();
        let was_available = inner.available;
        inner.available = true;
        if inner.registrations.is_empty() || (was_available && inner.remote_registered) {
            return;
        }
        tracing::debug!(
            callbacks = inner.registrations.len(),
            "Adapter available, registering remote callback"
        );
        match self.registrar.register_remote() {
            Ok(()) => inner.remote_registered = true,
            Err(e) => tracing::error!("Failed to re-register remote callback: {e}"),
        }
    }

    /// The adapter went away and took the remote registration with it.
    pub fn on_adapter_unavailable(&self) {
        let mut inner = self.lock();
        inner.available = false;
        inner.remote_registered = false;
    }

    /// Follow an availability channel until the returned guard is dropped.
    ///
    /// The current value is applied immediately.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn watch_availability(self: &Arc<Self>, mut rx: watch::Receiver<bool>) -> AvailabilityGuard {
        let mut was_available = *rx.borrow_and_update();
        if was_available {
            self.on_adapter_available();
        } else {
            self.on_adapter_unavailable();
        }

        let mux: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let available = *rx.borrow_and_update();
                let Some(mux) = mux.upgrade() else { break };
                match (was_available, available) {
                    (false, true) => mux.on_adapter_available(),
                    (true, false) => mux.on_adapter_unavailable(),
                    _ => {}
                }
                was_available = available;
            }
        });
        AvailabilityGuard { task }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().registrations.is_empty()
    }

    /// Whether the remote side currently holds our registration.
    #[must_use]
    pub fn is_remote_registered(&self) -> bool {
        self.lock().remote_registered
    }

    fn lock(&self) -> MutexGuard<'_, Inner<C>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Subscription to an availability channel; unsubscribes on drop.
pub struct AvailabilityGuard {
    task: JoinHandle<()>,
}

impl Drop for AvailabilityGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
