use async_trait::async_trait;
use cpal::traits::HostTrait;
use rodio::{Decoder, OutputStream, Sink};
use serde::Serialize;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::engine::{SpeechEngine, VoiceParams};
use crate::config::RemoteTtsConfig;
use crate::error::SpeechError;

#[derive(Serialize)]
struct TtsRequest<'a> {
    model_id: &'a str,
    transcript: &'a str,
    voice: VoiceSpec<'a>,
    output_format: OutputFormat<'a>,
    language: &'a str,
}

#[derive(Serialize)]
struct VoiceSpec<'a> {
    mode: &'a str,
    id: &'a str,
}

#[derive(Serialize)]
struct OutputFormat<'a> {
    container: &'a str,
    encoding: &'a str,
    sample_rate: u32,
}

/// High-quality voice from an HTTP synthesis service that returns WAV audio.
pub struct RemoteSpeechEngine {
    config: RemoteTtsConfig,
    client: reqwest::Client,
    stop: Arc<AtomicBool>,
}

impl RemoteSpeechEngine {
    pub fn new(config: RemoteTtsConfig) -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent("EchoVision/1.0")
            .build()
            .map_err(|e| SpeechError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        info!("🌐 Remote voice endpoint: {}", config.url);
        Ok(Self {
            config,
            client,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key().is_some()
    }

    fn api_key(&self) -> Option<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
    }

    /// Fetch synthesized WAV bytes for `text`.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        let key = self
            .api_key()
            .ok_or_else(|| SpeechError::Configuration("missing remote voice API key".to_string()))?;

        let body = TtsRequest {
            model_id: &self.config.model_id,
            transcript: text,
            voice: VoiceSpec {
                mode: "id",
                id: &self.config.voice_id,
            },
            output_format: OutputFormat {
                container: "wav",
                encoding: "pcm_s16le",
                sample_rate: self.config.sample_rate,
            },
            language: &self.config.language,
        };

        let response = self
            .client
            .post(&self.config.url)
            .header("Cartesia-Version", &self.config.api_version)
            .header("X-API-Key", key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SpeechError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SpeechError::Network(format!("HTTP {}: {}", status.as_u16(), detail)));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Network(e.to_string()))?;
        debug!("Received {} bytes of synthesized audio", audio.len());
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SpeechEngine for RemoteSpeechEngine {
    fn name(&self) -> &str {
        "remote"
    }

    async fn speak(&self, text: &str, params: &VoiceParams) -> Result<(), SpeechError> {
        let audio = self.synthesize(text).await?;
        self.stop.store(false, Ordering::Release);
        let stop = self.stop.clone();
        let volume = params.volume.clamp(0.0, 1.0);

        tokio::task::spawn_blocking(move || play_wav(audio, volume, stop))
            .await
            .map_err(|e| SpeechError::Engine(format!("playback task failed: {}", e)))?
    }

    async fn cancel(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn startup_allowance(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }
}

fn play_wav(audio: Vec<u8>, volume: f32, stop: Arc<AtomicBool>) -> Result<(), SpeechError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| SpeechError::Unavailable("no audio output device".to_string()))?;
    let (_stream, handle) = OutputStream::try_from_device(&device)
        .map_err(|e| SpeechError::Unavailable(format!("Failed to initialize output stream: {}", e)))?;
    let sink = Sink::try_new(&handle).map_err(|e| SpeechError::Unavailable(e.to_string()))?;
    let source = Decoder::new(Cursor::new(audio))
        .map_err(|e| SpeechError::Engine(format!("could not decode synthesized audio: {}", e)))?;

    sink.set_volume(volume);
    sink.append(source);

    // Wait for playback to complete
    while !sink.empty() {
        if stop.load(Ordering::Acquire) {
            sink.stop();
            return Err(SpeechError::Interrupted);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}
