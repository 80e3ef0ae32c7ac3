use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::SpeechError;
use crate::instructions::Priority;

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    /// 1.0 is the engine's normal speaking rate
    pub rate: f32,
    /// 0.0 to 1.0
    pub volume: f32,
    pub voice: Option<String>,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            rate: 1.0,
            volume: 1.0,
            voice: None,
        }
    }
}

impl VoiceParams {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            rate: settings.speech_rate,
            volume: settings.speech_volume,
            voice: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// Wait behind everything already queued
    #[default]
    Append,
    /// Drop everything queued and cut off the current utterance
    Flush,
    /// Jump to the front of the queue
    Immediate,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeakOptions {
    pub params: VoiceParams,
    pub queue_mode: QueueMode,
    /// Cancel the utterance currently playing
    pub interrupt: bool,
    /// Cue played right before the words, when earcons are on
    pub earcon: Option<Priority>,
}

impl SpeakOptions {
    pub fn new(params: VoiceParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    pub fn mode(mut self, queue_mode: QueueMode) -> Self {
        self.queue_mode = queue_mode;
        self
    }

    pub fn interrupting(mut self) -> Self {
        self.interrupt = true;
        self
    }

    pub fn with_earcon(mut self, priority: Priority) -> Self {
        self.earcon = Some(priority);
        self
    }
}

/// Something that can say a sentence out loud.
///
/// `speak` resolves when the utterance has finished playing. Dropping the
/// future before then abandons the wait, `cancel` silences the output.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn speak(&self, text: &str, params: &VoiceParams) -> Result<(), SpeechError>;

    async fn cancel(&self);

    async fn voices(&self) -> Vec<String> {
        Vec::new()
    }

    /// Some platforms pause synthesis on their own.
    fn is_paused(&self) -> bool {
        false
    }

    async fn resume(&self) {}

    /// Time the engine may spend before any audio starts, such as a synthesis
    /// request. Added on top of the scheduler's stall deadline.
    fn startup_allowance(&self) -> Duration {
        Duration::ZERO
    }
}

/// Try the primary (remote) voice and fall back to the secondary on any failure.
pub struct FallbackSpeechEngine {
    primary: Arc<dyn SpeechEngine>,
    fallback: Arc<dyn SpeechEngine>,
}

impl FallbackSpeechEngine {
    pub fn new(primary: Arc<dyn SpeechEngine>, fallback: Arc<dyn SpeechEngine>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl SpeechEngine for FallbackSpeechEngine {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn speak(&self, text: &str, params: &VoiceParams) -> Result<(), SpeechError> {
        match self.primary.speak(text, params).await {
            Ok(()) => Ok(()),
            Err(SpeechError::Interrupted) => Err(SpeechError::Interrupted),
            Err(e) => {
                warn!(
                    "{} voice failed ({}), using {} instead",
                    self.primary.name(),
                    e,
                    self.fallback.name()
                );
                self.fallback.speak(text, params).await
            }
        }
    }

    async fn cancel(&self) {
        self.primary.cancel().await;
        self.fallback.cancel().await;
    }

    async fn voices(&self) -> Vec<String> {
        let mut voices = self.primary.voices().await;
        voices.extend(self.fallback.voices().await);
        voices
    }

    fn is_paused(&self) -> bool {
        self.primary.is_paused() || self.fallback.is_paused()
    }

    async fn resume(&self) {
        self.primary.resume().await;
        self.fallback.resume().await;
    }

    fn startup_allowance(&self) -> Duration {
        self.primary.startup_allowance() + self.fallback.startup_allowance()
    }
}

/// Used when no audio backend is available; announcements only reach the log.
pub struct LoggingSpeechEngine;

#[async_trait]
impl SpeechEngine for LoggingSpeechEngine {
    fn name(&self) -> &str {
        "log"
    }

    async fn speak(&self, text: &str, _params: &VoiceParams) -> Result<(), SpeechError> {
        info!("TTS not available, text would be spoken: {}", text);
        Ok(())
    }

    async fn cancel(&self) {}
}
