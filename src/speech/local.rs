use async_trait::async_trait;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use tts::Tts;

use super::engine::{SpeechEngine, VoiceParams};
use crate::error::SpeechError;

enum TtsCommand {
    Speak {
        text: String,
        params: VoiceParams,
        done: oneshot::Sender<Result<(), SpeechError>>,
    },
    Stop,
    Shutdown,
}

/// The platform text-to-speech voice.
///
/// `Tts` is not `Send` on every platform, so it lives on its own thread and
/// is driven over a channel.
pub struct LocalSpeechEngine {
    tx: Sender<TtsCommand>,
    speaking: Arc<AtomicBool>,
    voices: Vec<String>,
    thread: Option<thread::JoinHandle<()>>,
}

impl LocalSpeechEngine {
    pub fn new(voice: Option<String>) -> Result<Self, SpeechError> {
        let (tx, rx) = channel::unbounded();
        let (ready_tx, ready_rx) = channel::bounded(1);
        let speaking = Arc::new(AtomicBool::new(false));
        let speaking_flag = speaking.clone();

        let thread = thread::Builder::new()
            .name("echovision-tts".to_string())
            .spawn(move || {
                let mut tts = match Tts::default() {
                    Ok(tts) => tts,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let voices = select_voice(&mut tts, voice.as_deref());
                let _ = ready_tx.send(Ok(voices));
                run_tts_thread(tts, rx, speaking_flag);
            })
            .map_err(|e| SpeechError::Unavailable(format!("failed to start TTS thread: {}", e)))?;

        let voices = ready_rx
            .recv()
            .map_err(|_| SpeechError::Unavailable("TTS thread exited during startup".to_string()))?
            .map_err(|e| SpeechError::Unavailable(format!("Failed to initialize TTS engine: {}", e)))?;

        info!("Text-to-speech engine initialized successfully ({} voices)", voices.len());
        Ok(Self {
            tx,
            speaking,
            voices,
            thread: Some(thread),
        })
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SpeechEngine for LocalSpeechEngine {
    fn name(&self) -> &str {
        "device"
    }

    async fn speak(&self, text: &str, params: &VoiceParams) -> Result<(), SpeechError> {
        let (done, finished) = oneshot::channel();
        self.tx
            .send(TtsCommand::Speak {
                text: text.to_string(),
                params: params.clone(),
                done,
            })
            .map_err(|_| SpeechError::Unavailable("TTS thread has stopped".to_string()))?;

        finished
            .await
            .unwrap_or_else(|_| Err(SpeechError::Engine("TTS thread dropped the request".to_string())))
    }

    async fn cancel(&self) {
        let _ = self.tx.send(TtsCommand::Stop);
    }

    async fn voices(&self) -> Vec<String> {
        self.voices.clone()
    }
}

impl Drop for LocalSpeechEngine {
    fn drop(&mut self) {
        let _ = self.tx.send(TtsCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn select_voice(tts: &mut Tts, wanted: Option<&str>) -> Vec<String> {
    let voices = match tts.voices() {
        Ok(voices) => voices,
        Err(e) => {
            debug!("Voice listing not supported: {}", e);
            return Vec::new();
        }
    };

    if let Some(wanted) = wanted {
        let wanted = wanted.to_lowercase();
        match voices.iter().find(|v| v.name().to_lowercase().contains(&wanted)) {
            Some(voice) => {
                if let Err(e) = tts.set_voice(voice) {
                    warn!("Could not select voice {}: {}", voice.name(), e);
                }
            }
            None => warn!("Voice '{}' not found, using the default voice", wanted),
        }
    }

    voices.iter().map(|v| v.name()).collect()
}

fn apply_params(tts: &mut Tts, params: &VoiceParams) {
    let features = tts.supported_features();
    if features.rate {
        let rate = (tts.normal_rate() * params.rate).clamp(tts.min_rate(), tts.max_rate());
        if let Err(e) = tts.set_rate(rate) {
            debug!("Failed to set speech rate: {}", e);
        }
    }
    if features.volume {
        let span = tts.max_volume() - tts.min_volume();
        let volume = tts.min_volume() + span * params.volume.clamp(0.0, 1.0);
        if let Err(e) = tts.set_volume(volume) {
            debug!("Failed to set speech volume: {}", e);
        }
    }
}

fn run_tts_thread(mut tts: Tts, rx: Receiver<TtsCommand>, speaking: Arc<AtomicBool>) {
    let mut pending: Option<TtsCommand> = None;
    loop {
        let command = match pending.take() {
            Some(command) => command,
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            TtsCommand::Speak { text, params, done } => {
                apply_params(&mut tts, &params);
                speaking.store(true, Ordering::Release);
                let (result, next) = speak_blocking(&mut tts, &rx, &text);
                speaking.store(false, Ordering::Release);
                let _ = done.send(result);
                pending = next;
                if matches!(pending, Some(TtsCommand::Shutdown)) {
                    break;
                }
            }
            // nothing is playing
            TtsCommand::Stop => {}
            TtsCommand::Shutdown => break,
        }
    }
    debug!("TTS thread exiting");
}

/// Speak and wait for the engine to finish, watching for commands meanwhile.
/// Returns any command that should run next.
fn speak_blocking(
    tts: &mut Tts,
    rx: &Receiver<TtsCommand>,
    text: &str,
) -> (Result<(), SpeechError>, Option<TtsCommand>) {
    if let Err(e) = tts.speak(text, true) {
        error!("TTS error: {}", e);
        return (Err(SpeechError::Engine(format!("Text-to-speech failed: {}", e))), None);
    }

    // Engines without completion reporting are treated as done once queued
    if !tts.supported_features().is_speaking {
        return (Ok(()), None);
    }

    loop {
        match rx.try_recv() {
            Ok(TtsCommand::Stop) => {
                let _ = tts.stop();
                return (Err(SpeechError::Interrupted), None);
            }
            Ok(next @ TtsCommand::Speak { .. }) | Ok(next @ TtsCommand::Shutdown) => {
                let _ = tts.stop();
                return (Err(SpeechError::Interrupted), Some(next));
            }
            Err(TryRecvError::Disconnected) => {
                let _ = tts.stop();
                return (Err(SpeechError::Interrupted), Some(TtsCommand::Shutdown));
            }
            Err(TryRecvError::Empty) => {}
        }

        match tts.is_speaking() {
            Ok(true) => thread::sleep(Duration::from_millis(50)),
            Ok(false) => return (Ok(()), None),
            Err(e) => {
                debug!("Speech completion check failed: {}", e);
                return (Ok(()), None);
            }
        }
    }
}
