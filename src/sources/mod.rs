//! Detection source adapters.
//!
//! Every source turns a [`Frame`] into normalized [`DetectedObject`]s with
//! estimated distances, and reports failures as [`SourceError`] so the fusion
//! policy can fall back to the next source.

use async_trait::async_trait;

use crate::config::{DetectionConfig, DeviceInfo};
use crate::detection::{DetectedObject, DetectionSource};
use crate::error::SourceError;
use crate::frame::Frame;

pub mod cloud;
pub mod local;

pub use cloud::{CloudAdapter, WireFormat};
pub use local::{LocalModelAdapter, ModelCache, ModelLoader, ObjectDetector, RawPrediction};

#[cfg(feature = "backend-tract")]
pub mod tract;

#[async_trait]
pub trait DetectionAdapter: Send + Sync {
    fn source(&self) -> DetectionSource;

    /// False when required endpoint details or credentials are missing.
    fn is_configured(&self) -> bool {
        true
    }

    async fn detect(
        &self,
        frame: &Frame,
        filter: &DetectionFilter,
    ) -> Result<Vec<DetectedObject>, SourceError>;

    /// Prepare expensive resources ahead of the first frame.
    async fn warm_up(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Thresholds applied to every detection set before it leaves the fusion policy.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionFilter {
    pub confidence_threshold: f32,
    pub max_distance: f32,
    pub min_object_size: f32,
    pub max_detections: usize,
    /// Distance assumed for detections that carry none
    pub missing_distance: f32,
}

impl DetectionFilter {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            max_distance: config.max_distance_threshold,
            min_object_size: config.min_object_size,
            max_detections: config.max_detections,
            missing_distance: config.missing_distance,
        }
    }

    /// Relaxed filter for constrained devices, with the cap scaled by CPU class.
    pub fn mobile(config: &DetectionConfig, device: &DeviceInfo) -> Self {
        let mobile = &config.mobile;
        let max_detections = if device.cpu_cores <= 2 {
            mobile.low_end_max_detections
        } else if device.cpu_cores <= 4 {
            mobile.mid_range_max_detections
        } else if device.is_high_end_device {
            mobile.high_end_max_detections
        } else {
            mobile.max_detections
        };

        Self {
            confidence_threshold: mobile.confidence_threshold,
            max_distance: config.max_distance_threshold,
            min_object_size: mobile.min_object_size,
            max_detections,
            missing_distance: config.missing_distance,
        }
    }

    pub fn accepts(&self, object: &DetectedObject) -> bool {
        object.confidence >= self.confidence_threshold
            && object.bbox.is_valid()
            && object.bbox.area() >= self.min_object_size
            && object.distance_or(self.missing_distance) <= self.max_distance
    }

    /// Drop rejected detections and cap the count, keeping input order.
    pub fn apply(&self, detections: Vec<DetectedObject>) -> Vec<DetectedObject> {
        detections
            .into_iter()
            .filter(|d| self.accepts(d))
            .take(self.max_detections)
            .collect()
    }
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self::from_config(&DetectionConfig::default())
    }
}
