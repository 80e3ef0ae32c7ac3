//! Spoken output: engines, the single-flow scheduler, and earcons.

pub mod earcon;
pub mod engine;
pub mod local;
pub mod remote;
pub mod scheduler;

use std::sync::Arc;
use tracing::{info, warn};

pub use earcon::EarconPlayer;
pub use engine::{
    FallbackSpeechEngine, LoggingSpeechEngine, QueueMode, SpeakOptions, SpeechEngine, VoiceParams,
};
pub use local::LocalSpeechEngine;
pub use remote::RemoteSpeechEngine;
pub use scheduler::SpeechScheduler;

use crate::config::EchoVisionConfig;

/// Build the best available engine: remote voice with device fallback,
/// the device voice alone, or a log-only engine.
pub fn build_engine(config: &EchoVisionConfig) -> Arc<dyn SpeechEngine> {
    let device: Arc<dyn SpeechEngine> = match LocalSpeechEngine::new(config.speech.voice.clone()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            warn!("{}; announcements will only be logged", e);
            Arc::new(LoggingSpeechEngine)
        }
    };

    if !config.settings.use_remote_voice {
        return device;
    }

    match RemoteSpeechEngine::new(config.remote_tts.clone()) {
        Ok(remote) if remote.is_configured() => {
            info!("Using remote voice with device voice fallback");
            Arc::new(FallbackSpeechEngine::new(Arc::new(remote), device))
        }
        Ok(_) => {
            info!("No remote voice key configured, using device voice");
            device
        }
        Err(e) => {
            warn!("Remote voice unavailable: {}", e);
            device
        }
    }
}
