//! `RangingAdapter` over an in-process request channel.
//!
//! Requests are queued as [`AdapterRequest`]s for whatever carries them
//! to the remote service (the WebSocket bridge, or a simulated service in
//! tests and demos). Answers to value-returning calls come back through
//! [`ChannelAdapter::complete_query`].

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot, watch};
use uwb_session_core::{Params, RangingAdapter, SessionHandle, TransportError, UwbAddress};

use crate::{protocol::AdapterRequest, sync_call::SyncResultReceiver};

/// Channel adapter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Chip ids advertised to callers.
    pub chip_ids: Vec<String>,
    /// Chip used when a caller does not pick one. Falls back to the first advertised id.
    pub default_chip_id: Option<String>,
    /// Bound on value-returning remote calls.
    pub query_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            chip_ids: vec!["default".to_owned()],
            default_chip_id: None,
            query_timeout_ms: 1000,
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

struct Chips {
    ids: Vec<String>,
    default: Option<String>,
}

/// Adapter that turns every call into an [`AdapterRequest`] on a channel.
///
/// Requests fail with `Disconnected` while the remote side is unavailable
/// or once the receiving end is gone.
pub struct ChannelAdapter {
    requests: mpsc::UnboundedSender<AdapterRequest>,
    chips: RwLock<Chips>,
    available: watch::Sender<bool>,
    pending: Mutex<HashMap<u64, oneshot::Sender<u32>>>,
    next_request_id: AtomicU64,
    query_timeout: Duration,
}

impl ChannelAdapter {
    /// Create a new adapter and the receiving end of its request channel.
    ///
    /// The adapter starts out unavailable.
    #[must_use]
    pub fn new(config: ChannelConfig) -> (Self, mpsc::UnboundedReceiver<AdapterRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let query_timeout = config.query_timeout();
        let adapter = Self {
            requests: tx,
            chips: RwLock::new(Chips {
                ids: config.chip_ids,
                default: config.default_chip_id,
            }),
            available: watch::channel(false).0,
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            query_timeout,
        };
        (adapter, rx)
    }

    /// Replace the advertised chip ids.
    pub fn set_chip_ids(&self, ids: Vec<String>, default: Option<String>) {
        tracing::debug!(?ids, ?default, "Updating advertised chip ids");
        let mut chips = self.chips.write().unwrap_or_else(PoisonError::into_inner);
        *chips = Chips { ids, default };
    }

    /// Mark the remote side reachable or gone.
    ///
    /// Going unavailable fails every pending query with `Disconnected`.
    pub fn set_available(&self, available: bool) {
        let was = self.available.send_replace(available);
        if was != available {
            tracing::info!(available, "UWB service availability changed");
        }
        if !available {
            let dropped = std::mem::take(&mut *self.lock_pending());
            if !dropped.is_empty() {
                tracing::debug!(count = dropped.len(), "Failing pending queries");
            }
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        *self.available.borrow()
    }

    /// Subscribe to availability changes.
    #[must_use]
    pub fn availability(&self) -> watch::Receiver<bool> {
        self.available.subscribe()
    }

    /// Hand a query answer to its waiting caller.
    pub fn complete_query(&self, request_id: u64, value: u32) {
        let waiter = self.lock_pending().remove(&request_id);
        match waiter {
            Some(tx) => {
                if tx.send(value).is_err() {
                    tracing::debug!(request_id, "Query caller gave up before the answer");
                }
            }
            None => tracing::warn!(request_id, "Dropping late or unknown query result"),
        }
    }

    /// Number of queries awaiting an answer.
    #[must_use]
    pub fn pending_queries(&self) -> usize {
        self.lock_pending().len()
    }

    fn send(&self, request: AdapterRequest) -> Result<(), TransportError> {
        if !self.is_available() {
            return Err(TransportError::Disconnected);
        }
        tracing::trace!(?request, "Queueing adapter request");
        self.requests
            .send(request)
            .map_err(|_| TransportError::Disconnected)
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<u32>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RangingAdapter for ChannelAdapter {
    fn chip_ids(&self) -> Vec<String> {
        self.chips
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .clone()
    }

    fn default_chip_id(&self) -> Option<String> {
        let chips = self.chips.read().unwrap_or_else(PoisonError::into_inner);
        chips.default.clone().or_else(|| chips.ids.first().cloned())
    }

    fn open_ranging(
        &self,
        handle: &SessionHandle,
        params: &Params,
        chip_id: Option<&str>,
    ) -> Result<(), TransportError> {
        self.send(AdapterRequest::Open {
            handle: handle.clone(),
            params: params.clone(),
            chip_id: chip_id.map(str::to_owned),
        })
    }

    fn start_ranging(&self, handle: &SessionHandle, params: &Params) -> Result<(), TransportError> {
        self.send(AdapterRequest::Start {
            handle: handle.clone(),
            params: params.clone(),
        })
    }

    fn stop_ranging(&self, handle: &SessionHandle) -> Result<(), TransportError> {
        self.send(AdapterRequest::Stop {
            handle: handle.clone(),
        })
    }

    fn reconfigure_ranging(
        &self,
        handle: &SessionHandle,
        params: &Params,
    ) -> Result<(), TransportError> {
        self.send(AdapterRequest::Reconfigure {
            handle: handle.clone(),
            params: params.clone(),
        })
    }

    fn close_ranging(&self, handle: &SessionHandle) -> Result<(), TransportError> {
        self.send(AdapterRequest::Close {
            handle: handle.clone(),
        })
    }

    fn add_controlee(&self, handle: &SessionHandle, params: &Params) -> Result<(), TransportError> {
        self.send(AdapterRequest::AddControlee {
            handle: handle.clone(),
            params: params.clone(),
        })
    }

    fn remove_controlee(
        &self,
        handle: &SessionHandle,
        params: &Params,
    ) -> Result<(), TransportError> {
        self.send(AdapterRequest::RemoveControlee {
            handle: handle.clone(),
            params: params.clone(),
        })
    }

    fn pause(&self, handle: &SessionHandle, params: &Params) -> Result<(), TransportError> {
        self.send(AdapterRequest::Pause {
            handle: handle.clone(),
            params: params.clone(),
        })
    }

    fn resume(&self, handle: &SessionHandle, params: &Params) -> Result<(), TransportError> {
        self.send(AdapterRequest::Resume {
            handle: handle.clone(),
            params: params.clone(),
        })
    }

    fn send_data(
        &self,
        handle: &SessionHandle,
        remote_address: &UwbAddress,
        params: &Params,
        data: &Bytes,
    ) -> Result<(), TransportError> {
        self.send(AdapterRequest::SendData {
            handle: handle.clone(),
            remote_address: remote_address.clone(),
            params: params.clone(),
            data: data.clone(),
        })
    }

    fn update_ranging_rounds_dt_tag(
        &self,
        handle: &SessionHandle,
        params: &Params,
    ) -> Result<(), TransportError> {
        self.send(AdapterRequest::UpdateRangingRoundsDtTag {
            handle: handle.clone(),
            params: params.clone(),
        })
    }

    fn update_pose(&self, handle: &SessionHandle, params: &Params) -> Result<(), TransportError> {
        self.send(AdapterRequest::UpdatePose {
            handle: handle.clone(),
            params: params.clone(),
        })
    }

    async fn query_max_data_size_bytes(
        &self,
        handle: &SessionHandle,
    ) -> Result<u32, TransportError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = SyncResultReceiver::new();
        self.lock_pending().insert(request_id, tx);

        let sent = self.send(AdapterRequest::QueryMaxDataSize {
            handle: handle.clone(),
            request_id,
        });
        if let Err(e) = sent {
            self.lock_pending().remove(&request_id);
            return Err(e);
        }

        let result = rx.await_result(self.query_timeout).await;
        if let Err(e) = &result {
            tracing::warn!(%handle, request_id, "Max data size query failed: {e}");
            self.lock_pending().remove(&request_id);
        }
        result
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        self.send(AdapterRequest::SetEnabled { enabled })
    }

    fn register_adapter_state_callbacks(&self) -> Result<(), TransportError> {
        self.send(AdapterRequest::RegisterAdapterStateCallbacks)
    }

    fn unregister_adapter_state_callbacks(&self) -> Result<(), TransportError> {
        self.send(AdapterRequest::UnregisterAdapterStateCallbacks)
    }
}
