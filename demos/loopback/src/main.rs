//! Loopback demo for the UWB session registry.
//!
//! Run with: cargo run -p uwb-loopback-demo [config.json]
//!
//! By default an in-process simulated UWB service answers every request
//! and one session is driven from open to close. With `"serve":
//! "127.0.0.1:3000"` in the config, a real service is expected to connect
//! to `ws://127.0.0.1:3000/uwb` instead.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context as _;
use bytes::Bytes;
use serde::Deserialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uwb_session_core::{
    AdapterState, AttributionSource, CallbackExecutor, Params, Reason, SessionHandle,
    StateChangeReason, TokioExecutor, UwbAddress,
};
use uwb_session_registry::{
    AdapterStateCallback, AdapterStateListener, RangingCallback, RangingSession, RegistryConfig,
    SessionRegistry,
};
use uwb_session_transport::{
    AdapterMessage, AdapterRequest, ChannelAdapter, ChannelConfig, EventPump, RangingEvent,
    websocket::{BridgeState, create_router},
};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DemoConfig {
    registry: RegistryConfig,
    channel: ChannelConfig,
    /// Serve the WebSocket bridge here instead of simulating a service.
    serve: Option<SocketAddr>,
}

fn load_config() -> anyhow::Result<DemoConfig> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(DemoConfig::default());
    };
    let text = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {path}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let closed = run(load_config()?).await?;
    tracing::info!(closed, "Registry shut down");
    Ok(())
}

/// Wire the registry to its transport and drive one session.
///
/// Returns how many sessions were still live at shutdown.
async fn run(config: DemoConfig) -> anyhow::Result<usize> {
    let (adapter, requests) = ChannelAdapter::new(config.channel);
    let adapter = Arc::new(adapter);
    let registry = Arc::new(SessionRegistry::with_config(
        adapter.clone(),
        config.registry,
    ));
    let listener = Arc::new(AdapterStateListener::new(
        adapter.clone(),
        adapter.is_available(),
    ));
    let _availability = listener.callbacks().watch_availability(adapter.availability());
    let (_pump, messages) = EventPump::spawn(adapter.clone(), registry.clone(), listener.clone());

    let executor: Arc<dyn CallbackExecutor> = Arc::new(TokioExecutor::current());
    listener.register(Arc::clone(&executor), Arc::new(StateLogger))?;

    if let Some(addr) = config.serve {
        let driver = {
            let registry = Arc::clone(&registry);
            let mut available = adapter.availability();
            tokio::spawn(async move {
                if available.wait_for(|a| *a).await.is_ok() {
                    if let Err(e) = drive_session(&registry, executor).await {
                        tracing::error!("Session run failed: {e:#}");
                    }
                }
            })
        };
        let app = create_router(BridgeState::new(adapter.clone(), requests, messages))
            .layer(CorsLayer::permissive());

        tracing::info!("Waiting for a UWB service on ws://{addr}/uwb");
        let tcp = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        axum::serve(tcp, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        driver.abort();
    } else {
        let _service = spawn_simulated_service(adapter.clone(), requests, messages);
        drive_session(&registry, executor).await?;
    }

    Ok(registry.shutdown())
}

/// Milestones the demo waits on.
#[derive(Debug)]
enum Progress {
    Opened(Arc<RangingSession>),
    OpenFailed(Reason),
    Started,
    StartFailed(Reason),
    Stopped(Reason),
    Closed(Reason),
}

struct DemoCallback {
    progress: mpsc::UnboundedSender<Progress>,
}

impl DemoCallback {
    fn report(&self, progress: Progress) {
        let _ = self.progress.send(progress);
    }
}

impl RangingCallback for DemoCallback {
    fn on_opened(&self, session: Arc<RangingSession>) {
        tracing::info!(handle = %session.handle(), chip_id = ?session.chip_id(), "Session opened");
        self.report(Progress::Opened(session));
    }

    fn on_open_failed(&self, reason: Reason, _params: Params) {
        self.report(Progress::OpenFailed(reason));
    }

    fn on_started(&self, session_info: Params) {
        tracing::info!(?session_info, "Ranging started");
        self.report(Progress::Started);
    }

    fn on_start_failed(&self, reason: Reason, _params: Params) {
        self.report(Progress::StartFailed(reason));
    }

    fn on_reconfigured(&self, _params: Params) {}

    fn on_reconfigure_failed(&self, reason: Reason, _params: Params) {
        tracing::warn!(?reason, "Reconfigure failed");
    }

    fn on_stopped(&self, reason: Reason, _params: Params) {
        self.report(Progress::Stopped(reason));
    }

    fn on_stop_failed(&self, reason: Reason, _params: Params) {
        tracing::warn!(?reason, "Stop failed");
    }

    fn on_closed(&self, reason: Reason, _params: Params) {
        self.report(Progress::Closed(reason));
    }

    fn on_report_received(&self, report: Params) {
        tracing::info!(?report, "Ranging report");
    }

    fn on_data_sent(&self, remote_address: UwbAddress, _params: Params) {
        tracing::info!(%remote_address, "Data sent");
    }
}

struct StateLogger;

impl AdapterStateCallback for StateLogger {
    fn on_state_changed(&self, state: AdapterState, reason: StateChangeReason) {
        tracing::info!(?state, ?reason, "UWB adapter state");
    }
}

async fn next(progress: &mut mpsc::UnboundedReceiver<Progress>) -> anyhow::Result<Progress> {
    tokio::time::timeout(STEP_TIMEOUT, progress.recv())
        .await
        .context("Timed out waiting for the UWB service")?
        .context("Callback channel closed")
}

async fn drive_session(
    registry: &SessionRegistry,
    executor: Arc<dyn CallbackExecutor>,
) -> anyhow::Result<()> {
    let (tx, mut progress) = mpsc::unbounded_channel();
    let signal = registry.open_session(
        AttributionSource::new(1000, Some("uwb-loopback-demo".into())),
        &Params::new().with("channel", 9).with("slot_duration_ms", 2),
        executor,
        Arc::new(DemoCallback { progress: tx }),
        None,
    )?;

    let session = match next(&mut progress).await? {
        Progress::Opened(session) => session,
        Progress::OpenFailed(reason) => anyhow::bail!("Open failed: {reason:?}"),
        other => anyhow::bail!("Unexpected progress while opening: {other:?}"),
    };

    session.start(&Params::new())?;
    match next(&mut progress).await? {
        Progress::Started => {}
        Progress::StartFailed(reason) => anyhow::bail!("Start failed: {reason:?}"),
        other => anyhow::bail!("Unexpected progress while starting: {other:?}"),
    }

    let max = session.query_max_data_size_bytes().await?;
    tracing::info!(max, "Max data size");
    session.send_data(
        &UwbAddress::from_bytes(&[0x12, 0x34])?,
        &Params::new(),
        Bytes::from_static(b"hello"),
    )?;

    session.stop()?;
    if let Progress::Stopped(reason) = next(&mut progress).await? {
        tracing::info!(?reason, "Ranging stopped");
    }

    signal.cancel()?;
    if let Progress::Closed(reason) = next(&mut progress).await? {
        tracing::info!(?reason, "Session closed");
    }
    Ok(())
}

/// Start the in-process stand-in for the remote UWB service.
///
/// The adapter is available by the time this returns.
fn spawn_simulated_service(
    adapter: Arc<ChannelAdapter>,
    requests: mpsc::UnboundedReceiver<AdapterRequest>,
    messages: mpsc::UnboundedSender<AdapterMessage>,
) -> JoinHandle<()> {
    adapter.set_available(true);
    tokio::spawn(simulated_service(adapter, requests, messages))
}

async fn simulated_service(
    adapter: Arc<ChannelAdapter>,
    mut requests: mpsc::UnboundedReceiver<AdapterRequest>,
    messages: mpsc::UnboundedSender<AdapterMessage>,
) {
    while let Some(request) = requests.recv().await {
        tracing::debug!(?request, "Simulated service request");
        for message in respond(request) {
            if messages.send(message).is_err() {
                return;
            }
        }
    }
    adapter.set_available(false);
}

const fn event(handle: SessionHandle, kind: RangingEvent) -> AdapterMessage {
    AdapterMessage::Event {
        handle,
        event: kind,
    }
}

fn respond(request: AdapterRequest) -> Vec<AdapterMessage> {
    match request {
        AdapterRequest::Open { handle, .. } => vec![event(handle, RangingEvent::Opened)],
        AdapterRequest::Start { handle, .. } => {
            let mut out = vec![event(
                handle.clone(),
                RangingEvent::Started { params: Params::new() },
            )];
            out.extend((1..=3).map(|round| {
                event(
                    handle.clone(),
                    RangingEvent::RangingResult {
                        report: Params::new()
                            .with("round", round)
                            .with("distance_cm", 100 + round * 5),
                    },
                )
            }));
            out
        }
        AdapterRequest::Stop { handle } => vec![event(
            handle,
            RangingEvent::Stopped {
                reason: Reason::LocalRequest,
                params: Params::new(),
            },
        )],
        AdapterRequest::Reconfigure { handle, .. } => {
            vec![event(handle, RangingEvent::Reconfigured { params: Params::new() })]
        }
        AdapterRequest::Close { handle } => vec![event(
            handle,
            RangingEvent::Closed {
                reason: Reason::LocalRequest,
                params: Params::new(),
            },
        )],
        AdapterRequest::AddControlee { handle, .. } => {
            vec![event(handle, RangingEvent::ControleeAdded { params: Params::new() })]
        }
        AdapterRequest::RemoveControlee { handle, .. } => {
            vec![event(handle, RangingEvent::ControleeRemoved { params: Params::new() })]
        }
        AdapterRequest::Pause { handle, .. } => {
            vec![event(handle, RangingEvent::Paused { params: Params::new() })]
        }
        AdapterRequest::Resume { handle, .. } => {
            vec![event(handle, RangingEvent::Resumed { params: Params::new() })]
        }
        AdapterRequest::SendData {
            handle,
            remote_address,
            ..
        } => vec![event(
            handle,
            RangingEvent::DataSent {
                remote_address,
                params: Params::new(),
            },
        )],
        AdapterRequest::UpdateRangingRoundsDtTag { handle, .. } => vec![event(
            handle,
            RangingEvent::RangingRoundsUpdateDtTagStatus { params: Params::new() },
        )],
        AdapterRequest::QueryMaxDataSize { request_id, .. } => vec![AdapterMessage::QueryResult {
            request_id,
            value: 1024,
        }],
        AdapterRequest::SetEnabled { enabled } => vec![AdapterMessage::AdapterStateChanged {
            state: if enabled {
                AdapterState::EnabledInactive
            } else {
                AdapterState::Disabled
            },
            reason: StateChangeReason::SystemPolicy,
        }],
        AdapterRequest::RegisterAdapterStateCallbacks => {
            vec![AdapterMessage::AdapterStateChanged {
                state: AdapterState::EnabledInactive,
                reason: StateChangeReason::SystemBoot,
            }]
        }
        AdapterRequest::UpdatePose { .. } | AdapterRequest::UnregisterAdapterStateCallbacks => {
            Vec::new()
        }
    }
}
