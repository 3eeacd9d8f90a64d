//! Routes inbound remote messages to the local components.

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use uwb_session_registry::{AdapterStateListener, SessionRegistry};

use crate::{channel::ChannelAdapter, protocol::AdapterMessage};

/// Background task draining [`AdapterMessage`]s.
///
/// Session events go to the registry, state changes to the adapter state
/// listener, query answers back to the adapter. Stops when every sender is
/// dropped, or when the pump itself is dropped.
pub struct EventPump {
    task: JoinHandle<()>,
}

impl EventPump {
    /// Spawn the pump and return the sender the transport feeds it with.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(
        adapter: Arc<ChannelAdapter>,
        registry: Arc<SessionRegistry>,
        adapter_state: Arc<AdapterStateListener>,
    ) -> (Self, mpsc::UnboundedSender<AdapterMessage>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<AdapterMessage>();
        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    AdapterMessage::Event { handle, event } => {
                        tracing::trace!(%handle, ?event, "Remote event");
                        event.deliver(&handle, registry.as_ref());
                    }
                    AdapterMessage::AdapterStateChanged { state, reason } => {
                        adapter_state.on_adapter_state_changed(state, reason);
                    }
                    AdapterMessage::QueryResult { request_id, value } => {
                        adapter.complete_query(request_id, value);
                    }
                }
            }
            tracing::debug!("Event pump stopped");
        });
        (Self { task }, tx)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use uwb_session_core::{
        AdapterState, AttributionSource, CallbackExecutor, Params, RangingAdapter, Reason,
        SessionState, StateChangeReason, TokioExecutor,
    };
    use uwb_session_registry::{AdapterStateCallback, RangingCallback, RangingSession};

    use super::*;
    use crate::{channel::ChannelConfig, protocol::{AdapterRequest, RangingEvent}};

    struct Forward(Mutex<mpsc::UnboundedSender<String>>);

    impl Forward {
        fn send(&self, event: impl Into<String>) {
            let _ = self.0.lock().unwrap().send(event.into());
        }
    }

    impl RangingCallback for Forward {
        fn on_opened(&self, session: Arc<RangingSession>) {
            self.send(format!("opened {}", session.handle().id()));
        }
        fn on_open_failed(&self, reason: Reason, _: Params) {
            self.send(format!("open_failed {reason:?}"));
        }
        fn on_started(&self, _: Params) {
            self.send("started");
        }
        fn on_start_failed(&self, _: Reason, _: Params) {}
        fn on_reconfigured(&self, _: Params) {}
        fn on_reconfigure_failed(&self, _: Reason, _: Params) {}
        fn on_stopped(&self, _: Reason, _: Params) {}
        fn on_stop_failed(&self, _: Reason, _: Params) {}
        fn on_closed(&self, reason: Reason, _: Params) {
            self.send(format!("closed {reason:?}"));
        }
        fn on_report_received(&self, _: Params) {
            self.send("report");
        }
    }

    impl AdapterStateCallback for Forward {
        fn on_state_changed(&self, state: AdapterState, _: StateChangeReason) {
            self.send(format!("state {state:?}"));
        }
    }

    struct Fixture {
        adapter: Arc<ChannelAdapter>,
        registry: Arc<SessionRegistry>,
        listener: Arc<AdapterStateListener>,
        requests: mpsc::UnboundedReceiver<AdapterRequest>,
        messages: mpsc::UnboundedSender<AdapterMessage>,
        _pump: EventPump,
    }

    fn fixture() -> Fixture {
        let (adapter, requests) = ChannelAdapter::new(ChannelConfig::default());
        let adapter = Arc::new(adapter);
        adapter.set_available(true);
        let registry = Arc::new(SessionRegistry::new(adapter.clone()));
        let listener = Arc::new(AdapterStateListener::new(adapter.clone(), true));
        let (pump, messages) = EventPump::spawn(adapter.clone(), registry.clone(), listener.clone());
        Fixture {
            adapter,
            registry,
            listener,
            requests,
            messages,
            _pump: pump,
        }
    }

    fn callback() -> (Arc<Forward>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Forward(Mutex::new(tx))), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    fn executor() -> Arc<dyn CallbackExecutor> {
        Arc::new(TokioExecutor::current())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_lifecycle_over_channel() {
        let mut f = fixture();
        let (cb, mut events) = callback();

        let signal = f
            .registry
            .open_session(
                AttributionSource::new(1000, None),
                &Params::new(),
                executor(),
                cb,
                None,
            )
            .unwrap();
        let handle = signal.session().handle().clone();
        assert!(matches!(
            f.requests.recv().await,
            Some(AdapterRequest::Open { chip_id: None, .. })
        ));

        f.messages
            .send(AdapterMessage::Event {
                handle: handle.clone(),
                event: RangingEvent::Opened,
            })
            .unwrap();
        assert_eq!(next(&mut events).await, "opened 1");
        assert_eq!(signal.session().state(), SessionState::Idle);

        signal.session().start(&Params::new()).unwrap();
        assert!(matches!(
            f.requests.recv().await,
            Some(AdapterRequest::Start { .. })
        ));
        f.messages
            .send(AdapterMessage::Event {
                handle: handle.clone(),
                event: RangingEvent::Started {
                    params: Params::new(),
                },
            })
            .unwrap();
        assert_eq!(next(&mut events).await, "started");

        f.messages
            .send(AdapterMessage::Event {
                handle: handle.clone(),
                event: RangingEvent::Closed {
                    reason: Reason::RemoteRequest,
                    params: Params::new(),
                },
            })
            .unwrap();
        assert_eq!(next(&mut events).await, "closed RemoteRequest");
        assert!(f.registry.live_sessions().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_query_result_routed_to_adapter() {
        let mut f = fixture();
        let adapter = Arc::clone(&f.adapter);
        let handle = uwb_session_core::SessionHandle::new(9, AttributionSource::new(1, None), 1);

        let query = tokio::spawn(async move { adapter.query_max_data_size_bytes(&handle).await });
        let Some(AdapterRequest::QueryMaxDataSize { request_id, .. }) = f.requests.recv().await else {
            panic!("expected a query request");
        };
        f.messages
            .send(AdapterMessage::QueryResult {
                request_id,
                value: 2048,
            })
            .unwrap();

        assert_eq!(query.await.unwrap(), Ok(2048));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_adapter_state_routed_to_listener() {
        let f = fixture();
        let (cb, mut events) = callback();
        f.listener.register(executor(), cb).unwrap();
        assert_eq!(next(&mut events).await, "state Disabled");

        f.messages
            .send(AdapterMessage::AdapterStateChanged {
                state: AdapterState::EnabledActive,
                reason: StateChangeReason::SessionStarted,
            })
            .unwrap();
        assert_eq!(next(&mut events).await, "state EnabledActive");
        assert!(f.listener.is_enabled());
    }
}
