use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{DetectionConfig, DeviceInfo};
use crate::detection::{DetectedObject, DetectionSource};
use crate::error::{FusionError, SourceError};
use crate::frame::Frame;
use crate::notify::{Notifier, Severity};
use crate::sources::{DetectionAdapter, DetectionFilter};

/// Per-cycle inputs read from the current settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionRequest {
    pub preferred: DetectionSource,
    pub use_cloud_detection: bool,
    pub is_mobile: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionResult {
    pub detections: Vec<DetectedObject>,
    pub source: DetectionSource,
}

/// Chooses a detection source per frame and falls back toward the local model.
pub struct FusionPolicy {
    adapters: HashMap<DetectionSource, Arc<dyn DetectionAdapter>>,
    filter: DetectionFilter,
    mobile_filter: DetectionFilter,
    in_flight: AtomicBool,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
    notifier: Notifier,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FusionPolicy {
    pub fn new(filter: DetectionFilter, mobile_filter: DetectionFilter, notifier: Notifier) -> Self {
        Self {
            adapters: HashMap::new(),
            filter,
            mobile_filter,
            in_flight: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            failure_threshold: 3,
            notifier,
        }
    }

    pub fn from_config(config: &DetectionConfig, device: &DeviceInfo, notifier: Notifier) -> Self {
        Self::new(
            DetectionFilter::from_config(config),
            DetectionFilter::mobile(config, device),
            notifier,
        )
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn DetectionAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn DetectionAdapter>) {
        debug!("Registered detection source {}", adapter.source());
        self.adapters.insert(adapter.source(), adapter);
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn filter_for(&self, is_mobile: bool) -> &DetectionFilter {
        if is_mobile {
            &self.mobile_filter
        } else {
            &self.filter
        }
    }

    /// Sources to try in order; the local model is always last.
    pub fn chain(&self, request: &FusionRequest) -> Vec<DetectionSource> {
        let first = if request.use_cloud_detection {
            DetectionSource::Cloud
        } else {
            request.preferred
        };
        let mut chain = vec![first];
        if first != DetectionSource::Local {
            chain.push(DetectionSource::Local);
        }
        chain
    }

    pub async fn warm_up(&self) -> Result<(), SourceError> {
        match self.adapters.get(&DetectionSource::Local) {
            Some(local) => local.warm_up().await,
            None => Ok(()),
        }
    }

    pub async fn detect(
        &self,
        frame: &Frame,
        request: &FusionRequest,
    ) -> Result<FusionResult, FusionError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FusionError::InFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let filter = self.filter_for(request.is_mobile);
        let mut failures = Vec::new();

        for source in self.chain(request) {
            let Some(adapter) = self.adapters.get(&source) else {
                let error = SourceError::Configuration {
                    origin: source,
                    reason: "no adapter registered".to_string(),
                };
                self.report_configuration(&error);
                failures.push(error);
                continue;
            };

            match adapter.detect(frame, filter).await {
                Ok(detections) => {
                    let detections = filter.apply(detections);
                    if detections.is_empty() && source != DetectionSource::Local {
                        debug!("{} found nothing, trying next source", source);
                        continue;
                    }
                    self.consecutive_failures.store(0, Ordering::Release);
                    debug!("{} produced {} detections", source, detections.len());
                    return Ok(FusionResult { detections, source });
                }
                Err(error) => {
                    if error.is_configuration() {
                        self.report_configuration(&error);
                    } else {
                        warn!("Detection with {} failed: {}", source, error);
                    }
                    failures.push(error);
                }
            }
        }

        let consecutive_failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let recommend_switch = consecutive_failures == self.failure_threshold;
        if recommend_switch {
            info!(
                "{} consecutive detection failures, recommending a different source",
                consecutive_failures
            );
        }

        Err(FusionError::Exhausted {
            failures,
            consecutive_failures,
            recommend_switch,
        })
    }

    fn report_configuration(&self, error: &SourceError) {
        let origin = error.origin();
        self.notifier.notify_once(
            &format!("source-config-{}", origin),
            Severity::Warning,
            "Detection source not configured",
            format!("{}. Falling back to on-device detection.", error),
        );
    }
}
