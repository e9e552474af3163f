use crate::capture::decode::{decode_photo, encode_jpeg, DEFAULT_JPEG_QUALITY};
use crate::connection::ConnectionManager;
use crate::debug_log::DebugLog;
use crate::errors::LinkError;
use crate::state::ServerConnectionState;
use crate::upload::FrameUploader;
use crate::wearable::{
    StreamConfiguration, VideoQuality, WearableCapability, WearableSession, WearableSessionState,
};
use crate::webrtc::PeerConnector;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Bounds for the periodic capture interval.
pub const MIN_AUTO_CAPTURE_INTERVAL: Duration = Duration::from_millis(5_000);
pub const MAX_AUTO_CAPTURE_INTERVAL: Duration = Duration::from_millis(20_000);
pub const DEFAULT_AUTO_CAPTURE_INTERVAL: Duration = Duration::from_millis(10_000);

/// Why a capture attempt did not start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    CaptureInFlight,
    WearableNotStreaming(WearableSessionState),
    ServerNotConnected(ServerConnectionState),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::CaptureInFlight => f.write_str("capture already in progress"),
            SkipReason::WearableNotStreaming(state) => write!(f, "wearable session is {}", state),
            SkipReason::ServerNotConnected(state) => write!(f, "server signaling is {}", state),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Started,
    Skipped(SkipReason),
}

/// Summary of the most recent successfully processed photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPhoto {
    pub width: u32,
    pub height: u32,
    pub jpeg_bytes: usize,
    pub captured_at: DateTime<Utc>,
}

/// Capture gate, checked in order: in-flight, wearable, server.
pub fn evaluate_gate(
    is_capturing: bool,
    wearable: WearableSessionState,
    server: ServerConnectionState,
) -> Option<SkipReason> {
    if is_capturing {
        Some(SkipReason::CaptureInFlight)
    } else if wearable != WearableSessionState::Streaming {
        Some(SkipReason::WearableNotStreaming(wearable))
    } else if server != ServerConnectionState::Connected {
        Some(SkipReason::ServerNotConnected(server))
    } else {
        None
    }
}

/// Clamp a requested auto-capture interval into the supported window.
pub fn clamp_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_AUTO_CAPTURE_INTERVAL, MAX_AUTO_CAPTURE_INTERVAL)
}

struct OrchestratorState {
    /// Bumped by every stop; tasks from an older generation are stale.
    generation: u64,
    credentials: Option<(String, String)>,
    session: Option<Arc<dyn WearableSession>>,
    manager: Option<Arc<ConnectionManager>>,
    wearable_state: WearableSessionState,
    watcher: Option<JoinHandle<()>>,
    is_capturing: bool,
    capture_seq: u64,
    capture_task: Option<JoinHandle<()>>,
    auto_capture: Option<JoinHandle<()>>,
    auto_interval: Duration,
    last_skip_reason: Option<SkipReason>,
    last_capture: Option<CapturedPhoto>,
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self {
            generation: 0,
            credentials: None,
            session: None,
            manager: None,
            wearable_state: WearableSessionState::Stopped,
            watcher: None,
            is_capturing: false,
            capture_seq: 0,
            capture_task: None,
            auto_capture: None,
            auto_interval: DEFAULT_AUTO_CAPTURE_INTERVAL,
            last_skip_reason: None,
            last_capture: None,
        }
    }
}

struct OrchestratorInner {
    wearable: Arc<dyn WearableCapability>,
    connector: Arc<dyn PeerConnector>,
    uploader: FrameUploader,
    log: DebugLog,
    jpeg_quality: AtomicU8,
    state: Mutex<OrchestratorState>,
}

/// Drives wearable capture and upload on top of one connection manager.
///
/// Cheap to clone; clones share state. All methods that spawn work must be
/// called from inside a Tokio runtime.
#[derive(Clone)]
pub struct CaptureOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl CaptureOrchestrator {
    pub fn new(
        wearable: Arc<dyn WearableCapability>,
        connector: Arc<dyn PeerConnector>,
        log: DebugLog,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                wearable,
                connector,
                uploader: FrameUploader::new(log.clone()),
                log,
                jpeg_quality: AtomicU8::new(DEFAULT_JPEG_QUALITY),
                state: Mutex::new(OrchestratorState::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OrchestratorState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn debug_log(&self) -> &DebugLog {
        &self.inner.log
    }

    pub fn set_jpeg_quality(&self, quality: u8) {
        self.inner
            .jpeg_quality
            .store(quality.clamp(1, 100), Ordering::SeqCst);
    }

    pub fn wearable_state(&self) -> WearableSessionState {
        self.lock().wearable_state
    }

    pub fn server_state(&self) -> ServerConnectionState {
        self.lock()
            .manager
            .as_ref()
            .map(|m| m.state())
            .unwrap_or_default()
    }

    pub fn connection(&self) -> Option<Arc<ConnectionManager>> {
        self.lock().manager.clone()
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().is_capturing
    }

    pub fn is_auto_capturing(&self) -> bool {
        self.lock().auto_capture.is_some()
    }

    pub fn auto_capture_interval(&self) -> Duration {
        self.lock().auto_interval
    }

    pub fn last_capture(&self) -> Option<CapturedPhoto> {
        self.lock().last_capture.clone()
    }

    pub fn last_skip_reason(&self) -> Option<SkipReason> {
        self.lock().last_skip_reason.clone()
    }

    /// Stop whatever is running, then connect to `server_address` and start
    /// a wearable session.
    ///
    /// A connection failure is reported through the server state and the
    /// debug log; only a wearable that refuses to start is an error here.
    pub async fn start(&self, server_address: &str, shared_secret: &str) -> Result<(), LinkError> {
        self.stop().await;
        self.inner
            .log
            .info("Starting wearable stream session and signaling connection");

        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&self.inner.connector),
            self.inner.log.clone(),
        ));
        let generation = {
            let mut state = self.lock();
            state.manager = Some(Arc::clone(&manager));
            state.credentials = Some((server_address.to_string(), shared_secret.to_string()));
            state.generation
        };

        if let Err(err) = manager.connect(server_address, shared_secret).await {
            log::debug!("Connection manager {} did not start: {}", manager.id(), err);
        }

        let session = match self.inner.wearable.start_session(StreamConfiguration {
            video_quality: VideoQuality::Low,
        }) {
            Ok(session) => session,
            Err(err) => {
                self.inner
                    .log
                    .error(format!("Wearable session failed to start: {}", err));
                return Err(err);
            }
        };
        let states = session.state_stream();

        let superseded = {
            let mut state = self.lock();
            if state.generation == generation {
                state.session = Some(Arc::clone(&session));
                state.watcher = Some(tokio::spawn(watch_wearable(
                    self.clone(),
                    generation,
                    states,
                )));
                false
            } else {
                true
            }
        };
        if superseded {
            session.close().await;
        }
        Ok(())
    }

    /// Tear everything down and return to the initial state.
    pub async fn stop(&self) {
        self.stop_if(None).await;
    }

    async fn stop_if(&self, generation: Option<u64>) {
        let (session, manager) = {
            let mut state = self.lock();
            if generation.is_some_and(|g| g != state.generation) {
                return;
            }
            self.inner.log.info("Stopping stream session");

            for task in [
                state.auto_capture.take(),
                state.watcher.take(),
                state.capture_task.take(),
            ]
            .into_iter()
            .flatten()
            {
                task.abort();
            }

            let session = state.session.take();
            let manager = state.manager.take();
            let auto_interval = state.auto_interval;
            let generation = state.generation + 1;
            let capture_seq = state.capture_seq;
            *state = OrchestratorState {
                generation,
                capture_seq,
                auto_interval,
                ..OrchestratorState::default()
            };
            (session, manager)
        };

        if let Some(session) = session {
            session.close().await;
        }
        if let Some(manager) = manager {
            manager.close().await;
        }
    }

    /// Evaluate the capture gate and, if it is open, start one capture in
    /// the background.
    ///
    /// Skips are logged only when the reason differs from the previous
    /// attempt's.
    pub fn capture(&self, server_address: &str, shared_secret: &str) -> CaptureOutcome {
        let mut state = self.lock();
        let server = state
            .manager
            .as_ref()
            .map(|m| m.state())
            .unwrap_or_default();

        let gate = evaluate_gate(state.is_capturing, state.wearable_state, server);
        let session = match (gate, state.session.clone()) {
            (None, Some(session)) => session,
            (gate, _) => {
                let reason = gate
                    .unwrap_or(SkipReason::WearableNotStreaming(WearableSessionState::Stopped));
                if state.last_skip_reason.as_ref() != Some(&reason) {
                    self.inner.log.info(format!("Skipping snapshot: {}", reason));
                    state.last_skip_reason = Some(reason.clone());
                }
                return CaptureOutcome::Skipped(reason);
            }
        };

        state.last_skip_reason = None;
        state.capture_seq += 1;
        state.is_capturing = true;

        let guard = InFlightGuard {
            orchestrator: self.clone(),
            seq: state.capture_seq,
        };
        let this = self.clone();
        let address = server_address.to_string();
        let secret = shared_secret.to_string();
        state.capture_task = Some(tokio::spawn(async move {
            let _guard = guard;
            this.run_capture(session, &address, &secret).await;
        }));

        CaptureOutcome::Started
    }

    async fn run_capture(&self, session: Arc<dyn WearableSession>, address: &str, secret: &str) {
        let log = &self.inner.log;
        log.info("Triggering wearable snapshot");

        let photo = match session.capture_photo().await {
            Ok(photo) => photo,
            Err(err) => {
                log.error(format!("Wearable snapshot failed: {}", err));
                return;
            }
        };

        let quality = self.inner.jpeg_quality.load(Ordering::SeqCst);
        let processed = tokio::task::spawn_blocking(move || {
            let image = decode_photo(photo)?;
            let jpeg = encode_jpeg(&image, quality)?;
            Ok::<_, LinkError>((image.width(), image.height(), jpeg))
        })
        .await;

        let (width, height, jpeg) = match processed {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                log.error(format!("Snapshot processing failed: {}", err));
                return;
            }
            Err(err) => {
                log.error(format!("Snapshot processing failed: {}", err));
                return;
            }
        };

        self.lock().last_capture = Some(CapturedPhoto {
            width,
            height,
            jpeg_bytes: jpeg.len(),
            captured_at: Utc::now(),
        });
        log.info(format!("Snapshot captured ({}x{}), uploading", width, height));
        self.inner.uploader.upload(address, secret, jpeg);
    }

    /// Capture, wait `interval`, repeat, using the credentials given to
    /// [`start`](Self::start). Replaces any running loop.
    pub fn start_auto_capture(&self, interval: Duration) {
        let interval = interval.max(Duration::from_millis(1));
        let this = self.clone();
        let mut state = self.lock();
        if let Some(previous) = state.auto_capture.take() {
            previous.abort();
        }
        state.auto_interval = interval;
        state.auto_capture = Some(tokio::spawn(async move {
            loop {
                let (address, secret) = this.lock().credentials.clone().unwrap_or_default();
                this.capture(&address, &secret);
                tokio::time::sleep(interval).await;
            }
        }));
    }

    pub fn stop_auto_capture(&self) {
        if let Some(task) = self.lock().auto_capture.take() {
            task.abort();
        }
    }

    /// Clamp `interval` into the supported window, store it and restart a
    /// running loop with it. Returns the interval actually used.
    pub fn set_auto_capture_interval(&self, interval: Duration) -> Duration {
        let interval = clamp_interval(interval);
        let running = {
            let mut state = self.lock();
            state.auto_interval = interval;
            state.auto_capture.is_some()
        };
        if running {
            self.start_auto_capture(interval);
        }
        interval
    }
}

/// Clears the in-flight flag when a capture task finishes or is aborted,
/// unless a newer capture has taken over.
struct InFlightGuard {
    orchestrator: CaptureOrchestrator,
    seq: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.orchestrator.lock();
        if state.capture_seq == self.seq {
            state.is_capturing = false;
            state.capture_task = None;
        }
    }
}

async fn watch_wearable(
    orchestrator: CaptureOrchestrator,
    generation: u64,
    mut states: BoxStream<'static, WearableSessionState>,
) {
    while let Some(next) = states.next().await {
        let previous = {
            let mut state = orchestrator.lock();
            if state.generation != generation {
                return;
            }
            std::mem::replace(&mut state.wearable_state, next)
        };
        if previous == next {
            continue;
        }

        let log = orchestrator.debug_log();
        log.info(format!("Wearable stream session state: {} -> {}", previous, next));
        if next == WearableSessionState::Stopped {
            log.info("Wearable stream stopped; disconnecting");
            // stop() aborts this task, so it has to run elsewhere.
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.stop_if(Some(generation)).await });
            return;
        }
    }
}
