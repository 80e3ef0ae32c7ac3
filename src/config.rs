use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::detection::DetectionSource;
use crate::instructions::DescriptionStyle;

/// Prefix for environment overrides, e.g. `ECHOVISION__SETTINGS__SPEECH_RATE=1.2`.
pub const ENV_PREFIX: &str = "ECHOVISION";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoVisionConfig {
    pub detection: DetectionConfig,
    pub distance: DistanceConfig,
    pub instructions: InstructionConfig,
    pub sources: SourcesConfig,
    pub settings: Settings,
    pub speech: SpeechConfig,
    pub remote_tts: RemoteTtsConfig,
    pub cycle: CycleConfig,
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum confidence for a detection to survive filtering
    pub confidence_threshold: f32,
    /// Maximum detections kept per frame
    pub max_detections: usize,
    /// Detections estimated farther than this (meters) are dropped
    pub max_distance_threshold: f32,
    /// Minimum normalized box area
    pub min_object_size: f32,
    /// Distance assumed for detections without one when filtering
    pub missing_distance: f32,
    pub mobile: MobileDetectionConfig,
}

/// Relaxed thresholds used on phones and other constrained devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MobileDetectionConfig {
    pub confidence_threshold: f32,
    pub max_detections: usize,
    pub min_object_size: f32,
    /// Detection cap for devices with two cores or fewer
    pub low_end_max_detections: usize,
    /// Detection cap for devices with four cores or fewer
    pub mid_range_max_detections: usize,
    pub high_end_max_detections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceConfig {
    pub base_distance: f32,
    pub scale_factor: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    /// Reference width for classes missing from the table
    pub default_reference_size: f32,
    /// Boxes smaller than this area are reported at `max_distance`
    pub min_object_size: f32,
    /// Uniform multiplicative jitter amplitude, 0 disables it
    pub jitter: f32,
    /// Per-class reference width overrides in meters
    pub reference_overrides: HashMap<String, f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstructionConfig {
    pub style: DescriptionStyle,
    /// Objects beyond this many meters are not mentioned
    pub relevance_cutoff: f32,
    pub missing_distance: f32,
    pub stop_distance: f32,
    pub pass_around_distance: f32,
    pub side_clearance_distance: f32,
    pub high_priority_distance: f32,
    pub low_priority_distance: f32,
    /// Number of objects named in a multi-object description
    pub max_described: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub local: LocalModelConfig,
    pub cloud: CloudEndpointConfig,
    pub azure: CloudEndpointConfig,
    pub deepseek: CloudEndpointConfig,
}

impl SourcesConfig {
    pub fn endpoint(&self, source: DetectionSource) -> Option<&CloudEndpointConfig> {
        match source {
            DetectionSource::Local => None,
            DetectionSource::Cloud => Some(&self.cloud),
            DetectionSource::Azure => Some(&self.azure),
            DetectionSource::Deepseek => Some(&self.deepseek),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalModelConfig {
    /// ONNX detector on disk; without it the local source reports nothing
    pub model_path: Option<String>,
    pub input_width: u32,
    pub input_height: u32,
    /// How long a caller waits on a model that is still loading
    pub load_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudEndpointConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    /// Frames are downscaled so neither side exceeds this before upload
    pub max_image_dimension: u32,
    pub jpeg_quality: u8,
}

impl CloudEndpointConfig {
    pub fn has_url(&self) -> bool {
        filled(&self.url)
    }

    pub fn has_key(&self) -> bool {
        filled(&self.api_key)
    }

    /// URL and key both present. JSON endpoints can do without the key.
    pub fn is_configured(&self) -> bool {
        self.has_url() && self.has_key()
    }
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

/// User preferences, read once per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Source tried first when cloud detection is off; derived from the device when unset
    pub preferred_provider: Option<DetectionSource>,
    pub use_cloud_detection: bool,
    pub speech_rate: f32,
    pub speech_volume: f32,
    pub continuous_speech_enabled: bool,
    /// Minimum gap between automatic announcements
    pub speech_interval_ms: u64,
    /// Spoken guidance on or off
    pub voice_enabled: bool,
    /// Prefer the remote voice when it has credentials
    pub use_remote_voice: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// Hold all speech until `unlock` is called once
    pub requires_user_gesture: bool,
    pub debounce_ms: u64,
    pub watchdog_interval_ms: u64,
    /// Base time an utterance may take before it is treated as stalled
    pub stall_base_ms: u64,
    pub stall_per_char_ms: u64,
    /// Consecutive failures before the user is told about speech problems
    pub failure_threshold: u32,
    /// Device voice name
    pub voice: Option<String>,
    /// Play a priority tone before each announcement
    pub earcons: bool,
    pub earcon_volume: f32,
}

/// HTTP text-to-speech returning WAV audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteTtsConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub api_version: String,
    pub model_id: String,
    pub voice_id: String,
    pub sample_rate: u32,
    pub language: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub desktop_interval_ms: u64,
    pub mobile_interval_ms: u64,
    /// On mobile only every n-th tick runs a cycle
    pub mobile_frame_stride: u32,
    /// Skip a cycle while more than this many utterances are waiting
    pub max_pending_speech: usize,
    pub failure_threshold: u32,
    /// Mean cycle time above which the user is advised to switch to cloud detection
    pub slow_processing_ms: u64,
    pub processing_window: usize,
    pub history_size: usize,
    /// Consecutive speech failures above which announcements are shortened
    pub speech_recovery_threshold: u32,
    pub startup_announcement: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub is_mobile: bool,
    /// Overrides the detected core count
    pub cpu_cores: Option<usize>,
    pub force_cloud_processing: bool,
}

/// Device characteristics used to pick timer periods, filters and the default source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub is_mobile: bool,
    pub cpu_cores: usize,
    pub is_high_end_device: bool,
    pub needs_cloud_processing: bool,
}

impl DeviceInfo {
    pub fn detect(config: &DeviceConfig) -> Self {
        let cpu_cores = config.cpu_cores.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
        });
        let is_high_end_device = cpu_cores >= 6;
        let needs_cloud_processing =
            config.force_cloud_processing || (config.is_mobile && cpu_cores <= 2);

        let info = Self {
            is_mobile: config.is_mobile,
            cpu_cores,
            is_high_end_device,
            needs_cloud_processing,
        };
        debug!("Device info: {:?}", info);
        info
    }

    pub fn default_provider(&self) -> DetectionSource {
        if self.needs_cloud_processing {
            DetectionSource::Cloud
        } else {
            DetectionSource::Local
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.35,
            max_detections: 15,
            max_distance_threshold: 5.0,
            min_object_size: 0.001,
            missing_distance: 5.0,
            mobile: MobileDetectionConfig::default(),
        }
    }
}

impl Default for MobileDetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.15,
            max_detections: 5,
            min_object_size: 0.0001,
            low_end_max_detections: 3,
            mid_range_max_detections: 4,
            high_end_max_detections: 8,
        }
    }
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            base_distance: 1.5,
            scale_factor: 0.8,
            min_distance: 0.5,
            max_distance: 10.0,
            default_reference_size: 0.5,
            min_object_size: 0.001,
            jitter: 0.1,
            reference_overrides: HashMap::new(),
        }
    }
}

impl Default for InstructionConfig {
    fn default() -> Self {
        Self {
            style: DescriptionStyle::Directive,
            relevance_cutoff: 11.0,
            missing_distance: 5.0,
            stop_distance: 1.5,
            pass_around_distance: 3.5,
            side_clearance_distance: 5.0,
            high_priority_distance: 3.0,
            low_priority_distance: 8.0,
            max_described: 3,
        }
    }
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            input_width: 300,
            input_height: 300,
            load_timeout_ms: 5000,
        }
    }
}

impl Default for CloudEndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_ms: 5000,
            max_image_dimension: 640,
            jpeg_quality: 70,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            preferred_provider: None,
            use_cloud_detection: false,
            speech_rate: 1.0,
            speech_volume: 1.0,
            continuous_speech_enabled: true,
            speech_interval_ms: 5000,
            voice_enabled: true,
            use_remote_voice: true,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requires_user_gesture: false,
            debounce_ms: 50,
            watchdog_interval_ms: 1000,
            stall_base_ms: 5000,
            stall_per_char_ms: 120,
            failure_threshold: 3,
            voice: None,
            earcons: false,
            earcon_volume: 0.15,
        }
    }
}

impl Default for RemoteTtsConfig {
    fn default() -> Self {
        Self {
            url: "https://api.cartesia.ai/tts/bytes".to_string(),
            api_key: None,
            api_version: "2024-06-10".to_string(),
            model_id: "sonic-2".to_string(),
            voice_id: "bf0a246a-8642-498a-9950-80c35e9276b5".to_string(),
            sample_rate: 44100,
            language: "en".to_string(),
            timeout_ms: 3000,
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            desktop_interval_ms: 1000,
            mobile_interval_ms: 2000,
            mobile_frame_stride: 3,
            max_pending_speech: 2,
            failure_threshold: 3,
            slow_processing_ms: 1000,
            processing_window: 10,
            history_size: 10,
            speech_recovery_threshold: 2,
            startup_announcement: true,
        }
    }
}

impl EchoVisionConfig {
    /// Load the config file, writing the defaults first if it does not exist,
    /// then apply `ECHOVISION__SECTION__KEY` environment overrides.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            // Create default config file
            let default_config = Self::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            fs::write(path, toml_content)
                .await
                .with_context(|| format!("failed to write default config to {}", path.display()))?;
            info!("Wrote default configuration to {}", path.display());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_with_env(&content)
    }

    pub fn from_toml_with_env(content: &str) -> Result<Self> {
        let layered = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to assemble configuration")?;

        let config: Self = layered
            .try_deserialize()
            .context("invalid configuration")?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Preferred source from settings, or the device default.
    pub fn preferred_source(&self, device: &DeviceInfo) -> DetectionSource {
        self.settings
            .preferred_provider
            .unwrap_or_else(|| device.default_provider())
    }
}
