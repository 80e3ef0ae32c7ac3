use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::camera::FrameSource;
use crate::config::{CycleConfig, DeviceInfo, EchoVisionConfig, Settings};
use crate::detection::{DetectedObject, DetectionSource};
use crate::error::{FusionError, SourceErrorKind, SpeechError};
use crate::fusion::{FusionPolicy, FusionRequest};
use crate::history::InstructionHistory;
use crate::instructions::{first_sentence, InstructionGenerator, NavigationInstruction, Priority};
use crate::notify::{Notifier, Severity};
use crate::prioritizer::prioritize;
use crate::speech::{QueueMode, SpeakOptions, SpeechScheduler, VoiceParams};
use crate::stabilizer::Stabilizer;

pub const READY_ANNOUNCEMENT: &str =
    "Camera ready. Continuous object detection and navigation guidance is now active.";
pub const READY_CLOUD_ANNOUNCEMENT: &str = "Camera ready. Using cloud-based object detection.";
pub const SCAN_ANNOUNCEMENT: &str = "Scanning for objects";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    FetchingFrame,
    Detecting,
    Stabilizing,
    Prioritizing,
    Instructing,
    Speaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// More utterances are waiting than the cycle allows
    SpeechBacklog,
    DetectionInFlight,
    /// Mobile tick that is not a multiple of the frame stride
    FrameStride,
    /// The frame source had nothing to give
    NoFrame,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub source: DetectionSource,
    /// Stabilized and prioritized
    pub detections: Vec<DetectedObject>,
    pub instruction: Option<NavigationInstruction>,
    /// Text handed to the speech scheduler this cycle
    pub announcement: Option<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Completed(CycleReport),
    Failed { consecutive_failures: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    pub announcements: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Scan,
    Stop,
}

/// Lets other tasks request a manual scan or stop a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
    running: Arc<RwLock<bool>>,
}

impl ControllerHandle {
    pub fn scan(&self) -> bool {
        self.commands.send(ControlCommand::Scan).is_ok()
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        let _ = self.commands.send(ControlCommand::Stop);
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Drives fetch, detect, stabilize, prioritize, instruct and speak on a timer.
pub struct FrameCycleController {
    frames: Box<dyn FrameSource>,
    fusion: Arc<FusionPolicy>,
    stabilizer: Stabilizer,
    generator: InstructionGenerator,
    speech: Arc<SpeechScheduler>,
    history: InstructionHistory,
    notifier: Notifier,
    settings: Settings,
    preferred: DetectionSource,
    device: DeviceInfo,
    cycle: CycleConfig,

    previous: Vec<DetectedObject>,
    state: CycleState,
    consecutive_failures: u32,
    last_announcement: Option<Instant>,
    processing_times: VecDeque<Duration>,
    ticks: u64,
    stats: ControllerStats,

    running: Arc<RwLock<bool>>,
    commands_tx: mpsc::UnboundedSender<ControlCommand>,
    commands_rx: Option<mpsc::UnboundedReceiver<ControlCommand>>,
}

impl FrameCycleController {
    pub fn new(
        frames: Box<dyn FrameSource>,
        fusion: Arc<FusionPolicy>,
        speech: Arc<SpeechScheduler>,
        config: &EchoVisionConfig,
        device: DeviceInfo,
        notifier: Notifier,
    ) -> Self {
        info!("Initializing frame cycle controller with {}", frames.describe());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        Self {
            frames,
            fusion,
            stabilizer: Stabilizer::default(),
            generator: InstructionGenerator::new(config.instructions.clone()),
            speech,
            history: InstructionHistory::new(config.cycle.history_size),
            notifier,
            settings: config.settings.clone(),
            preferred: config.preferred_source(&device),
            device,
            cycle: config.cycle.clone(),
            previous: Vec::new(),
            state: CycleState::Idle,
            consecutive_failures: 0,
            last_announcement: None,
            processing_times: VecDeque::new(),
            ticks: 0,
            stats: ControllerStats::default(),
            running: Arc::new(RwLock::new(false)),
            commands_tx,
            commands_rx: Some(commands_rx),
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            commands: self.commands_tx.clone(),
            running: self.running.clone(),
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn history(&self) -> &InstructionHistory {
        &self.history
    }

    pub fn stats(&self) -> ControllerStats {
        self.stats
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Last stabilized detection set.
    pub fn previous(&self) -> &[DetectedObject] {
        &self.previous
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Takes effect from the next cycle.
    pub fn update_settings(&mut self, settings: Settings) {
        if let Some(preferred) = settings.preferred_provider {
            self.preferred = preferred;
        }
        self.settings = settings;
    }

    /// Timer period for this device.
    pub fn interval(&self) -> Duration {
        let ms = if self.device.is_mobile {
            self.cycle.mobile_interval_ms
        } else {
            self.cycle.desktop_interval_ms
        };
        Duration::from_millis(ms.max(1))
    }

    /// Warm the local model and tell the user the camera is ready.
    pub async fn start(&mut self) {
        match self.fusion.warm_up().await {
            Ok(()) => debug!("Local detection model ready"),
            Err(e) if e.kind() == SourceErrorKind::ModelLoadTimeout => self.notify_basic_mode(),
            Err(e) => {
                warn!("Local model unavailable: {}", e);
                self.notifier.notify_once(
                    "model-load",
                    Severity::Warning,
                    "Object detection unavailable",
                    "Could not load the on-device model. Cloud detection will be used when configured.",
                );
            }
        }

        if !self.cycle.startup_announcement || !self.settings.voice_enabled {
            return;
        }
        let text = if self.settings.use_cloud_detection {
            READY_CLOUD_ANNOUNCEMENT
        } else {
            READY_ANNOUNCEMENT
        };
        let options = SpeakOptions::new(VoiceParams::from_settings(&self.settings));
        match self.speech.enqueue(text, options) {
            Ok(_) => self.last_announcement = Some(Instant::now()),
            Err(e) => debug!("Startup announcement not spoken: {}", e),
        }
    }

    /// Timer entry point; applies the mobile frame stride.
    pub async fn on_tick(&mut self) -> CycleOutcome {
        self.ticks += 1;
        let stride = u64::from(self.cycle.mobile_frame_stride.max(1));
        if self.device.is_mobile && self.ticks % stride != 0 {
            return CycleOutcome::Skipped(SkipReason::FrameStride);
        }
        self.run_cycle().await
    }

    /// Say so, then look right away with the announcement timer reset.
    pub async fn manual_scan(&mut self) -> CycleOutcome {
        info!("Manual scan requested");
        let options = SpeakOptions::new(VoiceParams::from_settings(&self.settings))
            .mode(QueueMode::Immediate);
        match self.speech.enqueue(SCAN_ANNOUNCEMENT, options) {
            Ok(_) | Err(SpeechError::AlreadySpeaking) => {}
            Err(e) => debug!("Scan announcement not spoken: {}", e),
        }
        self.last_announcement = None;
        self.run_cycle().await
    }

    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self.process_frame().await;
        self.state = CycleState::Idle;
        match &outcome {
            CycleOutcome::Skipped(reason) => {
                self.stats.cycles_skipped += 1;
                debug!("Cycle skipped: {:?}", reason);
            }
            CycleOutcome::Completed(report) => {
                self.stats.cycles_completed += 1;
                if report.announcement.is_some() {
                    self.stats.announcements += 1;
                }
            }
            CycleOutcome::Failed { .. } => self.stats.cycles_failed += 1,
        }
        outcome
    }

    async fn process_frame(&mut self) -> CycleOutcome {
        if self.speech.pending_len() > self.cycle.max_pending_speech {
            return CycleOutcome::Skipped(SkipReason::SpeechBacklog);
        }
        if self.fusion.is_in_flight() {
            return CycleOutcome::Skipped(SkipReason::DetectionInFlight);
        }

        let started = Instant::now();
        self.state = CycleState::FetchingFrame;
        let frame = match self.frames.next_frame().await {
            Ok(frame) if !frame.is_empty() => frame,
            Ok(_) => return CycleOutcome::Skipped(SkipReason::NoFrame),
            Err(e) => {
                warn!("Frame fetch failed: {}", e);
                return CycleOutcome::Skipped(SkipReason::NoFrame);
            }
        };

        self.state = CycleState::Detecting;
        let request = FusionRequest {
            preferred: self.preferred,
            use_cloud_detection: self.settings.use_cloud_detection,
            is_mobile: self.device.is_mobile,
        };
        let fused = match self.fusion.detect(&frame, &request).await {
            Ok(fused) => fused,
            Err(FusionError::InFlight) => {
                return CycleOutcome::Skipped(SkipReason::DetectionInFlight)
            }
            Err(e) => return self.on_failure(e),
        };

        self.consecutive_failures = 0;
        self.notifier.reset("cloud-error");

        self.state = CycleState::Stabilizing;
        let stabilized = self.stabilizer.stabilize(&fused.detections, &self.previous);
        self.previous = stabilized.clone();

        self.state = CycleState::Prioritizing;
        let detections = prioritize(stabilized);

        self.state = CycleState::Instructing;
        let instruction = if detections.is_empty() {
            None
        } else {
            let id = self.history.next_id();
            let instruction = self.generator.navigation_instruction(id, &detections);
            self.history.record(instruction.clone());
            Some(instruction)
        };

        let elapsed = started.elapsed();
        self.record_processing_time(elapsed);

        let announcement = if self.announcement_due() {
            self.state = CycleState::Speaking;
            let text = self.generator.describe(&detections);
            let priority = self.generator.generate(&detections).priority;
            self.announce(text, priority)
        } else {
            None
        };

        debug!(
            "Cycle via {}: {} objects in {:?}",
            fused.source,
            detections.len(),
            elapsed
        );

        CycleOutcome::Completed(CycleReport {
            source: fused.source,
            detections,
            instruction,
            announcement,
            elapsed,
        })
    }

    fn on_failure(&mut self, error: FusionError) -> CycleOutcome {
        self.consecutive_failures += 1;
        error!("Detection failed: {}", error);

        if error.is_model_load_timeout() {
            self.notify_basic_mode();
        }

        if self.settings.use_cloud_detection {
            self.notifier.notify_once(
                "cloud-error",
                Severity::Error,
                "Cloud Detection Error",
                "Could not connect to cloud detection service. Check your settings.",
            );
        } else if let FusionError::Exhausted {
            recommend_switch: true,
            ..
        } = error
        {
            self.notifier.notify_once(
                "detection-issues",
                Severity::Warning,
                "Detection Issues",
                "Having trouble with object detection. Try cloud detection for better results.",
            );
        }

        CycleOutcome::Failed {
            consecutive_failures: self.consecutive_failures,
        }
    }

    fn notify_basic_mode(&self) {
        self.notifier.notify_once(
            "basic-camera-mode",
            Severity::Warning,
            "Basic camera mode",
            "The detection model is taking too long to load. Running in basic camera mode.",
        );
    }

    fn record_processing_time(&mut self, elapsed: Duration) {
        self.processing_times.push_back(elapsed);
        while self.processing_times.len() > self.cycle.processing_window.max(1) {
            self.processing_times.pop_front();
        }

        let average = self.average_processing_time();
        if average > Duration::from_millis(self.cycle.slow_processing_ms)
            && !self.settings.use_cloud_detection
            && self.consecutive_failures == 0
        {
            self.notifier.notify_once(
                "slow-processing",
                Severity::Info,
                "Processing is slow",
                "Consider enabling cloud detection for better performance",
            );
        }
    }

    /// Mean of the recent cycle durations.
    pub fn average_processing_time(&self) -> Duration {
        if self.processing_times.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.processing_times.iter().sum();
        total / self.processing_times.len() as u32
    }

    fn announcement_due(&self) -> bool {
        if !self.settings.continuous_speech_enabled || !self.settings.voice_enabled {
            return false;
        }
        let interval = Duration::from_millis(self.settings.speech_interval_ms);
        self.last_announcement
            .map(|last| last.elapsed() >= interval)
            .unwrap_or(true)
    }

    /// Hand `text` to the scheduler without waiting for it to be spoken.
    fn announce(&mut self, text: String, priority: Priority) -> Option<String> {
        let recovering = self.speech.consecutive_failures() > self.cycle.speech_recovery_threshold;
        let mut params = VoiceParams::from_settings(&self.settings);
        let text = if recovering {
            debug!("Speech recovery mode, shortening announcement");
            params.rate = 1.0;
            first_sentence(&text).to_string()
        } else {
            text
        };
        let options = SpeakOptions::new(params)
            .mode(QueueMode::Flush)
            .interrupting()
            .with_earcon(priority);

        // Rejected requests are not announcements and leave the timer alone
        let completion = match self.speech.enqueue(text.clone(), options) {
            Ok(completion) => completion,
            Err(e) => {
                debug!("Announcement not queued: {}", e);
                return None;
            }
        };
        self.last_announcement = Some(Instant::now());
        tokio::spawn(async move {
            log_speech_result(completion.await.unwrap_or(Err(SpeechError::Interrupted)));
        });

        Some(text)
    }

    /// Run cycles on the timer until stopped through a handle.
    pub async fn run(&mut self) -> Result<()> {
        let mut commands = self
            .commands_rx
            .take()
            .ok_or_else(|| anyhow!("controller is already running"))?;

        info!("Starting EchoVision frame cycle every {:?}", self.interval());
        *self.running.write().await = true;
        self.start().await;

        let mut ticker = tokio::time::interval(self.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_stats_time = Instant::now();

        loop {
            if !*self.running.read().await {
                break;
            }

            let outcome = tokio::select! {
                _ = ticker.tick() => self.on_tick().await,
                command = commands.recv() => match command {
                    Some(ControlCommand::Scan) => self.manual_scan().await,
                    Some(ControlCommand::Stop) | None => break,
                },
            };

            if let CycleOutcome::Completed(report) = &outcome {
                if !report.detections.is_empty() {
                    debug!(
                        "👁️ {} objects, nearest: {}",
                        report.detections.len(),
                        report.detections[0].label
                    );
                }
            }

            // Print stats every 100 cycles
            if self.stats.cycles_completed > 0 && self.stats.cycles_completed % 100 == 0 {
                if let CycleOutcome::Completed(_) = outcome {
                    let elapsed = last_stats_time.elapsed();
                    info!(
                        "Processed {} cycles ({} skipped, {} failed), {:.2} cycles/s",
                        self.stats.cycles_completed,
                        self.stats.cycles_skipped,
                        self.stats.cycles_failed,
                        100.0 / elapsed.as_secs_f32().max(f32::EPSILON)
                    );
                    last_stats_time = Instant::now();
                }
            }
        }

        *self.running.write().await = false;
        self.speech.stop();
        self.commands_rx = Some(commands);
        info!(
            "Controller stopped after {} cycles and {} announcements",
            self.stats.cycles_completed, self.stats.announcements
        );
        Ok(())
    }
}

fn log_speech_result(result: std::result::Result<(), SpeechError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_scheduling() => debug!("Announcement cut short: {}", e),
        Err(e) => warn!("Announcement failed: {}", e),
    }
}
