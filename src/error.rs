use std::time::Duration;
use thiserror::Error;

use crate::detection::DetectionSource;

/// Failure reported by a single detection source adapter.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("{origin} source is not configured: {reason}")]
    Configuration {
        origin: DetectionSource,
        reason: String,
    },

    #[error("{origin} request failed: {message}")]
    Network {
        origin: DetectionSource,
        message: String,
    },

    #[error("{origin} rejected credentials (HTTP {status})")]
    Auth { origin: DetectionSource, status: u16 },

    #[error("{origin} returned an unreadable response: {message}")]
    Parse {
        origin: DetectionSource,
        message: String,
    },

    #[error("{origin} request timed out after {after:?}")]
    Timeout {
        origin: DetectionSource,
        after: Duration,
    },

    #[error("Model loading timed out after {waited:?}")]
    ModelLoadTimeout { waited: Duration },

    #[error("Model failed to load: {message}")]
    ModelLoad { message: String },

    #[error("local inference failed: {message}")]
    Inference { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceErrorKind {
    Configuration,
    Network,
    Auth,
    Parse,
    Timeout,
    ModelLoadTimeout,
    ModelLoad,
    Inference,
}

impl SourceError {
    pub fn origin(&self) -> DetectionSource {
        match self {
            SourceError::Configuration { origin, .. }
            | SourceError::Network { origin, .. }
            | SourceError::Auth { origin, .. }
            | SourceError::Parse { origin, .. }
            | SourceError::Timeout { origin, .. } => *origin,
            SourceError::ModelLoadTimeout { .. }
            | SourceError::ModelLoad { .. }
            | SourceError::Inference { .. } => DetectionSource::Local,
        }
    }

    pub fn kind(&self) -> SourceErrorKind {
        match self {
            SourceError::Configuration { .. } => SourceErrorKind::Configuration,
            SourceError::Network { .. } => SourceErrorKind::Network,
            SourceError::Auth { .. } => SourceErrorKind::Auth,
            SourceError::Parse { .. } => SourceErrorKind::Parse,
            SourceError::Timeout { .. } => SourceErrorKind::Timeout,
            SourceError::ModelLoadTimeout { .. } => SourceErrorKind::ModelLoadTimeout,
            SourceError::ModelLoad { .. } => SourceErrorKind::ModelLoad,
            SourceError::Inference { .. } => SourceErrorKind::Inference,
        }
    }

    /// Configuration problems will not go away by retrying the same frame.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SourceError::Configuration { .. })
    }
}

#[derive(Debug, Clone, Error)]
pub enum FusionError {
    #[error("a detection cycle is already in flight")]
    InFlight,

    #[error("all detection sources failed ({} errors, {consecutive_failures} consecutive failed cycles)", .failures.len())]
    Exhausted {
        failures: Vec<SourceError>,
        consecutive_failures: u32,
        /// Set once per failure streak when the streak reaches the reporting threshold.
        recommend_switch: bool,
    },
}

impl FusionError {
    /// True when any underlying source gave up waiting on the local model.
    pub fn is_model_load_timeout(&self) -> bool {
        match self {
            FusionError::Exhausted { failures, .. } => failures
                .iter()
                .any(|e| e.kind() == SourceErrorKind::ModelLoadTimeout),
            FusionError::InFlight => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeechError {
    #[error("Speech already in progress")]
    AlreadySpeaking,

    #[error("speech output requires a user gesture before it can start")]
    GestureRequired,

    #[error("utterance was interrupted")]
    Interrupted,

    #[error("utterance stalled and was cancelled after {after:?}")]
    Stalled { after: Duration },

    #[error("speech engine error: {0}")]
    Engine(String),

    #[error("remote voice request failed: {0}")]
    Network(String),

    #[error("speech is not configured: {0}")]
    Configuration(String),

    #[error("speech engine unavailable: {0}")]
    Unavailable(String),
}

impl SpeechError {
    /// Errors caused by the scheduler itself rather than the engine failing.
    pub fn is_scheduling(&self) -> bool {
        matches!(
            self,
            SpeechError::AlreadySpeaking | SpeechError::GestureRequired | SpeechError::Interrupted
        )
    }
}
