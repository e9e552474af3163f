use crate::errors::LinkError;
use crate::wearable::{
    PhotoData, StreamConfiguration, WearableCapability, WearableSession, WearableSessionState,
};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Scripted in-process wearable.
///
/// State is driven by the test (or by `start_session` when built with
/// [`MockWearable::streaming`]), photos are whatever was last scripted, and
/// every session/capture/close call is counted.
#[derive(Clone)]
pub struct MockWearable {
    inner: Arc<MockInner>,
}

struct MockInner {
    state: watch::Sender<WearableSessionState>,
    auto_stream: bool,
    photo: Mutex<Result<PhotoData, String>>,
    capture_delay: Mutex<Duration>,
    sessions: AtomicUsize,
    captures: AtomicUsize,
    closes: AtomicUsize,
}

impl Default for MockWearable {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWearable {
    /// A device whose state only changes through [`set_state`](Self::set_state).
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A device that reports `Streaming` as soon as a session starts.
    pub fn streaming() -> Self {
        Self::build(true)
    }

    fn build(auto_stream: bool) -> Self {
        let (state, _) = watch::channel(WearableSessionState::Stopped);
        Self {
            inner: Arc::new(MockInner {
                state,
                auto_stream,
                photo: Mutex::new(Err("no photo scripted".to_string())),
                capture_delay: Mutex::new(Duration::ZERO),
                sessions: AtomicUsize::new(0),
                captures: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_state(&self, state: WearableSessionState) {
        self.inner.state.send_replace(state);
    }

    pub fn state(&self) -> WearableSessionState {
        *self.inner.state.borrow()
    }

    pub fn set_captured_photo(&self, photo: PhotoData) {
        *lock(&self.inner.photo) = Ok(photo);
    }

    /// Make every following capture fail with `message`.
    pub fn fail_captures(&self, message: impl Into<String>) {
        *lock(&self.inner.photo) = Err(message.into());
    }

    /// Delay each capture, to hold a capture in flight.
    pub fn set_capture_delay(&self, delay: Duration) {
        *lock(&self.inner.capture_delay) = delay;
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.load(Ordering::SeqCst)
    }

    pub fn capture_count(&self) -> usize {
        self.inner.captures.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl WearableCapability for MockWearable {
    fn start_session(
        &self,
        config: StreamConfiguration,
    ) -> Result<Arc<dyn WearableSession>, LinkError> {
        self.inner.sessions.fetch_add(1, Ordering::SeqCst);
        log::debug!("Mock wearable session starting ({:?})", config.video_quality);

        self.inner.state.send_replace(WearableSessionState::Starting);
        if self.inner.auto_stream {
            self.inner
                .state
                .send_replace(WearableSessionState::Streaming);
        }

        Ok(Arc::new(MockSession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockSession {
    inner: Arc<MockInner>,
}

#[async_trait]
impl WearableSession for MockSession {
    fn state_stream(&self) -> BoxStream<'static, WearableSessionState> {
        let rx = self.inner.state.subscribe();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let state = *rx.borrow_and_update();
            Some((state, (rx, false)))
        })
        .boxed()
    }

    async fn capture_photo(&self) -> Result<PhotoData, LinkError> {
        self.inner.captures.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.inner.capture_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        lock(&self.inner.photo)
            .clone()
            .map_err(LinkError::CaptureError)
    }

    async fn close(&self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.state.send_replace(WearableSessionState::Stopped);
    }
}
