pub mod camera;
pub mod config;
pub mod controller;
pub mod detection;
pub mod distance;
pub mod error;
pub mod frame;
pub mod fusion;
pub mod history;
pub mod instructions;
pub mod notify;
pub mod prioritizer;
pub mod sources;
pub mod speech;
pub mod stabilizer;

pub use config::EchoVisionConfig;
pub use controller::FrameCycleController;
pub use detection::{BoundingBox, DetectedObject, DetectionSource};
pub use error::{FusionError, SourceError, SpeechError};
