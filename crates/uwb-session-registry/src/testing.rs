//! Recording doubles shared by the unit tests of this crate.

use std::{
    sync::{
        Arc, Condvar, Mutex, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tracing_subscriber::fmt::MakeWriter;
use uwb_session_core::{
    AttributionSource, CallbackExecutor, ControleeFailureReason, DataFailureReason, Params,
    RangingAdapter, Reason, RemoteRegistrar, SessionHandle, ThreadExecutor, TransportError,
    UwbAddress,
};

use crate::{callback::RangingCallback, session::RangingSession};

const WAIT: Duration = Duration::from_secs(5);

pub fn handle(id: u64) -> SessionHandle {
    SessionHandle::new(id, AttributionSource::new(1000, None), 42)
}

/// Log sink for asserting on emitted `tracing` output.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Run `f` with a subscriber writing plain text into this sink.
    pub fn capture<R>(&self, f: impl FnOnce() -> R) -> R {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Fresh serial executor thread named `test-callbacks`.
pub fn test_executor() -> Arc<dyn CallbackExecutor> {
    Arc::new(ThreadExecutor::new("test-callbacks").unwrap())
}

/// Requests seen by [`RecordingAdapter`], keyed by session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Open(u64, Option<String>),
    Start(u64),
    Stop(u64),
    Reconfigure(u64),
    Close(u64),
    AddControlee(u64),
    RemoveControlee(u64),
    Pause(u64),
    Resume(u64),
    SendData(u64, usize),
    UpdateDtTag(u64),
    UpdatePose(u64),
    SetEnabled(bool),
    RegisterStateCallbacks,
    UnregisterStateCallbacks,
}

#[derive(Default)]
pub struct RecordingAdapter {
    requests: Mutex<Vec<Request>>,
    fail: AtomicBool,
}

impl RecordingAdapter {
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn fail_requests(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn record(&self, request: Request) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

#[async_trait]
impl RangingAdapter for RecordingAdapter {
    fn chip_ids(&self) -> Vec<String> {
        vec!["chip0".to_owned(), "chip1".to_owned()]
    }

    fn default_chip_id(&self) -> Option<String> {
        Some("chip0".to_owned())
    }

    fn open_ranging(
        &self,
        handle: &SessionHandle,
        _params: &Params,
        chip_id: Option<&str>,
    ) -> Result<(), TransportError> {
        self.record(Request::Open(handle.id(), chip_id.map(str::to_owned)))
    }

    fn start_ranging(&self, handle: &SessionHandle, _params: &Params) -> Result<(), TransportError> {
        self.record(Request::Start(handle.id()))
    }

    fn stop_ranging(&self, handle: &SessionHandle) -> Result<(), TransportError> {
        self.record(Request::Stop(handle.id()))
    }

    fn reconfigure_ranging(
        &self,
        handle: &SessionHandle,
        _params: &Params,
    ) -> Result<(), TransportError> {
        self.record(Request::Reconfigure(handle.id()))
    }

    fn close_ranging(&self, handle: &SessionHandle) -> Result<(), TransportError> {
        self.record(Request::Close(handle.id()))
    }

    fn add_controlee(&self, handle: &SessionHandle, _params: &Params) -> Result<(), TransportError> {
        self.record(Request::AddControlee(handle.id()))
    }

    fn remove_controlee(
        &self,
        handle: &SessionHandle,
        _params: &Params,
    ) -> Result<(), TransportError> {
        self.record(Request::RemoveControlee(handle.id()))
    }

    fn pause(&self, handle: &SessionHandle, _params: &Params) -> Result<(), TransportError> {
        self.record(Request::Pause(handle.id()))
    }

    fn resume(&self, handle: &SessionHandle, _params: &Params) -> Result<(), TransportError> {
        self.record(Request::Resume(handle.id()))
    }

    fn send_data(
        &self,
        handle: &SessionHandle,
        _remote_address: &UwbAddress,
        _params: &Params,
        data: &Bytes,
    ) -> Result<(), TransportError> {
        self.record(Request::SendData(handle.id(), data.len()))
    }

    fn update_ranging_rounds_dt_tag(
        &self,
        handle: &SessionHandle,
        _params: &Params,
    ) -> Result<(), TransportError> {
        self.record(Request::UpdateDtTag(handle.id()))
    }

    fn update_pose(&self, handle: &SessionHandle, _params: &Params) -> Result<(), TransportError> {
        self.record(Request::UpdatePose(handle.id()))
    }

    async fn query_max_data_size_bytes(
        &self,
        _handle: &SessionHandle,
    ) -> Result<u32, TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout(Duration::from_millis(10)));
        }
        Ok(1024)
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        self.record(Request::SetEnabled(enabled))
    }

    fn register_adapter_state_callbacks(&self) -> Result<(), TransportError> {
        self.record(Request::RegisterStateCallbacks)
    }

    fn unregister_adapter_state_callbacks(&self) -> Result<(), TransportError> {
        self.record(Request::UnregisterStateCallbacks)
    }
}

/// Counts remote (un)registrations for multiplexer tests.
#[derive(Default)]
pub struct RecordingRegistrar {
    calls: Mutex<Vec<&'static str>>,
    fail: AtomicBool,
}

impl RecordingRegistrar {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_requests(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl RemoteRegistrar for RecordingRegistrar {
    fn register_remote(&self) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.calls.lock().unwrap().push("register");
        Ok(())
    }

    fn unregister_remote(&self) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push("unregister");
        Ok(())
    }
}

/// Callback events, reduced to what the tests assert on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Opened(u64),
    OpenFailed(Reason),
    Started,
    StartFailed(Reason),
    Reconfigured,
    ReconfigureFailed(Reason),
    Stopped(Reason),
    StopFailed(Reason),
    Closed(Reason),
    Report,
    ControleeAdded,
    ControleeAddFailed(ControleeFailureReason),
    Paused,
    Resumed,
    DataSent(UwbAddress),
    DataSendFailed(DataFailureReason),
    DataReceived(Bytes),
    ServiceDiscovered,
    DtTagStatus,
}

/// Records every callback together with the thread it ran on.
#[derive(Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<(Event, Option<String>)>>,
    changed: Condvar,
    session: OnceLock<Arc<RangingSession>>,
}

impl RecordingCallback {
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(e, _)| e.clone())
            .collect()
    }

    /// Names of the threads callbacks ran on.
    pub fn threads(&self) -> Vec<Option<String>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Session passed to `on_opened`, if any.
    pub fn session(&self) -> Option<Arc<RangingSession>> {
        self.session.get().cloned()
    }

    /// Block until at least `count` callbacks ran.
    pub fn wait_for(&self, count: usize) {
        let guard = self.events.lock().unwrap();
        let (guard, timeout) = self
            .changed
            .wait_timeout_while(guard, WAIT, |events| events.len() < count)
            .unwrap();
        assert!(
            !timeout.timed_out(),
            "expected {count} callbacks, saw {}",
            guard.len()
        );
    }

    /// Give stray callbacks a moment to show up.
    pub fn assert_quiet(&self) {
        let before = self.events.lock().unwrap().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(self.events.lock().unwrap().len(), before, "unexpected callback");
    }

    fn push(&self, event: Event) {
        let thread = thread::current().name().map(str::to_owned);
        self.events.lock().unwrap().push((event, thread));
        self.changed.notify_all();
    }
}

impl RangingCallback for RecordingCallback {
    fn on_opened(&self, session: Arc<RangingSession>) {
        let id = session.handle().id();
        let _ = self.session.set(session);
        self.push(Event::Opened(id));
    }

    fn on_open_failed(&self, reason: Reason, _params: Params) {
        self.push(Event::OpenFailed(reason));
    }

    fn on_started(&self, _session_info: Params) {
        self.push(Event::Started);
    }

    fn on_start_failed(&self, reason: Reason, _params: Params) {
        self.push(Event::StartFailed(reason));
    }

    fn on_reconfigured(&self, _params: Params) {
        self.push(Event::Reconfigured);
    }

    fn on_reconfigure_failed(&self, reason: Reason, _params: Params) {
        self.push(Event::ReconfigureFailed(reason));
    }

    fn on_stopped(&self, reason: Reason, _params: Params) {
        self.push(Event::Stopped(reason));
    }

    fn on_stop_failed(&self, reason: Reason, _params: Params) {
        self.push(Event::StopFailed(reason));
    }

    fn on_closed(&self, reason: Reason, _params: Params) {
        self.push(Event::Closed(reason));
    }

    fn on_report_received(&self, _report: Params) {
        self.push(Event::Report);
    }

    fn on_controlee_added(&self, _params: Params) {
        self.push(Event::ControleeAdded);
    }

    fn on_controlee_add_failed(&self, reason: ControleeFailureReason, _params: Params) {
        self.push(Event::ControleeAddFailed(reason));
    }

    fn on_paused(&self, _params: Params) {
        self.push(Event::Paused);
    }

    fn on_resumed(&self, _params: Params) {
        self.push(Event::Resumed);
    }

    fn on_data_sent(&self, remote_address: UwbAddress, _params: Params) {
        self.push(Event::DataSent(remote_address));
    }

    fn on_data_send_failed(
        &self,
        _remote_address: UwbAddress,
        reason: DataFailureReason,
        _params: Params,
    ) {
        self.push(Event::DataSendFailed(reason));
    }

    fn on_data_received(&self, _remote_address: UwbAddress, _params: Params, data: Bytes) {
        self.push(Event::DataReceived(data));
    }

    fn on_service_discovered(&self, _params: Params) {
        self.push(Event::ServiceDiscovered);
    }

    fn on_ranging_rounds_update_dt_tag_status(&self, _params: Params) {
        self.push(Event::DtTagStatus);
    }
}
