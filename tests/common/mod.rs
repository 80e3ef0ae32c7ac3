#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use echovision::camera::FrameSource;
use echovision::config::SpeechConfig;
use echovision::detection::{BoundingBox, DetectedObject, DetectionSource};
use echovision::error::{SourceError, SpeechError};
use echovision::frame::Frame;
use echovision::sources::{DetectionAdapter, DetectionFilter, ModelLoader, ObjectDetector, RawPrediction};
use echovision::speech::{SpeechEngine, VoiceParams};

pub fn object(label: &str, confidence: f32, bbox: BoundingBox, distance: f32) -> DetectedObject {
    DetectedObject::new(1, label, confidence, bbox).with_distance(distance)
}

/// Box of the given size centered on (cx, cy).
pub fn centered_box(cx: f32, cy: f32, width: f32, height: f32) -> BoundingBox {
    BoundingBox::new(cx - width / 2.0, cy - height / 2.0, width, height)
}

pub fn fast_speech_config() -> SpeechConfig {
    SpeechConfig {
        debounce_ms: 5,
        watchdog_interval_ms: 20,
        ..Default::default()
    }
}

/// Detection source that returns whatever result it is currently set to.
pub struct ScriptedAdapter {
    source: DetectionSource,
    result: Mutex<Result<Vec<DetectedObject>, SourceError>>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn returning(source: DetectionSource, detections: Vec<DetectedObject>) -> Self {
        Self {
            source,
            result: Mutex::new(Ok(detections)),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(source: DetectionSource, error: SourceError) -> Self {
        Self {
            source,
            result: Mutex::new(Err(error)),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set(&self, result: Result<Vec<DetectedObject>, SourceError>) {
        *self.result.lock() = result;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetectionAdapter for ScriptedAdapter {
    fn source(&self) -> DetectionSource {
        self.source
    }

    async fn detect(
        &self,
        _frame: &Frame,
        _filter: &DetectionFilter,
    ) -> Result<Vec<DetectedObject>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.lock().clone()
    }
}

pub fn network_error(origin: DetectionSource) -> SourceError {
    SourceError::Network {
        origin,
        message: "connection refused".to_string(),
    }
}

/// Speech engine that records what it was asked to say.
pub struct RecordingEngine {
    events: Mutex<Vec<String>>,
    params: Mutex<Vec<VoiceParams>>,
    delay: Duration,
    fail: AtomicBool,
    cancelled: tokio::sync::Notify,
}

impl RecordingEngine {
    pub fn new(delay: Duration) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            params: Mutex::new(Vec::new()),
            delay,
            fail: AtomicBool::new(false),
            cancelled: tokio::sync::Notify::new(),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.with_prefix("start:")
    }

    pub fn finished(&self) -> Vec<String> {
        self.with_prefix("end:")
    }

    pub fn params(&self) -> Vec<VoiceParams> {
        self.params.lock().clone()
    }

    fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl SpeechEngine for RecordingEngine {
    fn name(&self) -> &str {
        "recording"
    }

    async fn speak(&self, text: &str, params: &VoiceParams) -> Result<(), SpeechError> {
        self.events.lock().push(format!("start:{}", text));
        self.params.lock().push(params.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(SpeechError::Engine("synthetic failure".to_string()));
        }

        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {
                self.events.lock().push(format!("end:{}", text));
                Ok(())
            }
            _ = self.cancelled.notified() => Err(SpeechError::Interrupted),
        }
    }

    async fn cancel(&self) {
        self.events.lock().push("cancel".to_string());
        self.cancelled.notify_waiters();
    }

    async fn voices(&self) -> Vec<String> {
        vec!["test-voice".to_string()]
    }
}

/// Poll until `check` passes or the timeout expires.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Endless blank frames.
pub struct BlankFrames {
    pub served: Arc<AtomicUsize>,
}

impl BlankFrames {
    pub fn new() -> Self {
        Self {
            served: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl FrameSource for BlankFrames {
    async fn next_frame(&mut self) -> Result<Frame> {
        self.served.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::new(64, 48, 3))
    }

    fn describe(&self) -> String {
        "blank test frames".to_string()
    }
}

pub struct BrokenFrames;

#[async_trait]
impl FrameSource for BrokenFrames {
    async fn next_frame(&mut self) -> Result<Frame> {
        Err(anyhow::anyhow!("camera unplugged"))
    }

    fn describe(&self) -> String {
        "broken test frames".to_string()
    }
}

/// Detector returning the same predictions for every frame.
pub struct FixedDetector {
    pub predictions: Vec<RawPrediction>,
}

impl ObjectDetector for FixedDetector {
    fn name(&self) -> &str {
        "fixed"
    }

    fn detect(&self, _frame: &Frame) -> Result<Vec<RawPrediction>> {
        Ok(self.predictions.clone())
    }
}

/// Loader that counts loads and takes `delay` to finish.
pub struct SlowLoader {
    pub loads: Arc<AtomicUsize>,
    pub delay: Duration,
    pub predictions: Vec<RawPrediction>,
    pub fail: bool,
}

impl SlowLoader {
    pub fn new(delay: Duration, predictions: Vec<RawPrediction>) -> Self {
        Self {
            loads: Arc::new(AtomicUsize::new(0)),
            delay,
            predictions,
            fail: false,
        }
    }
}

#[async_trait]
impl ModelLoader for SlowLoader {
    async fn load(&self) -> Result<Arc<dyn ObjectDetector>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(anyhow::anyhow!("weights file is corrupt"));
        }
        Ok(Arc::new(FixedDetector {
            predictions: self.predictions.clone(),
        }))
    }
}
