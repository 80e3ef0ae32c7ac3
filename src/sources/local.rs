use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DetectionAdapter, DetectionFilter};
use crate::config::LocalModelConfig;
use crate::detection::{BoundingBox, DetectedObject, DetectionSource};
use crate::distance::DistanceEstimator;
use crate::error::SourceError;
use crate::frame::Frame;

/// One raw model output, box in pixels as `[x, y, width, height]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPrediction {
    pub class: String,
    pub score: f32,
    pub bbox: [f32; 4],
}

/// An on-device object detector. Inference is blocking and runs off the async runtime.
pub trait ObjectDetector: Send + Sync {
    fn name(&self) -> &str;
    fn detect(&self, frame: &Frame) -> Result<Vec<RawPrediction>>;
}

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn ObjectDetector>>;
}

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<dyn ObjectDetector>, String>>>;

enum CacheState {
    Empty,
    Loading(LoadFuture),
    Ready(Arc<dyn ObjectDetector>),
}

/// Lazily loads the detector once and shares it.
///
/// Concurrent callers await the same in-flight load. Each caller waits at most
/// `load_timeout`; the load itself keeps running so a later call can pick up
/// the finished model. A failed load empties the cache so the next call retries.
pub struct ModelCache {
    loader: Arc<dyn ModelLoader>,
    state: Arc<Mutex<CacheState>>,
    load_timeout: Duration,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ModelLoader>, load_timeout: Duration) -> Self {
        Self {
            loader,
            state: Arc::new(Mutex::new(CacheState::Empty)),
            load_timeout,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.lock(), CacheState::Ready(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.state.lock(), CacheState::Loading(_))
    }

    pub async fn get(&self) -> Result<Arc<dyn ObjectDetector>, SourceError> {
        let pending = {
            let mut state = self.state.lock();
            match &*state {
                CacheState::Ready(model) => return Ok(model.clone()),
                CacheState::Loading(load) => {
                    debug!("Model load already in progress, waiting on it");
                    load.clone()
                }
                CacheState::Empty => {
                    let load = self.start_load();
                    *state = CacheState::Loading(load.clone());
                    load
                }
            }
        };

        match tokio::time::timeout(self.load_timeout, pending).await {
            Ok(Ok(model)) => Ok(model),
            Ok(Err(message)) => Err(SourceError::ModelLoad { message }),
            Err(_) => {
                warn!("Model loading timed out after {:?}", self.load_timeout);
                Err(SourceError::ModelLoadTimeout {
                    waited: self.load_timeout,
                })
            }
        }
    }

    // Called with the state lock held.
    fn start_load(&self) -> LoadFuture {
        info!("Loading local detection model");
        let loader = self.loader.clone();
        let state = self.state.clone();

        let task = tokio::spawn(async move {
            let result = loader.load().await.map_err(|e| e.to_string());
            {
                let mut guard = state.lock();
                match &result {
                    Ok(model) => {
                        info!("Local detection model ready: {}", model.name());
                        *guard = CacheState::Ready(model.clone());
                    }
                    Err(e) => {
                        warn!("Local detection model failed to load: {}", e);
                        *guard = CacheState::Empty;
                    }
                }
            }
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(format!("model load task failed: {}", e)),
            }
        }
        .boxed()
        .shared()
    }
}

/// Detection source backed by the on-device model.
pub struct LocalModelAdapter {
    cache: ModelCache,
    estimator: DistanceEstimator,
}

impl LocalModelAdapter {
    pub fn new(cache: ModelCache, estimator: DistanceEstimator) -> Self {
        Self { cache, estimator }
    }

    pub fn from_config(config: &LocalModelConfig, estimator: DistanceEstimator) -> Self {
        let cache = ModelCache::new(
            loader_from_config(config),
            Duration::from_millis(config.load_timeout_ms),
        );
        Self::new(cache, estimator)
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Normalize pixel boxes, drop weak or tiny predictions, and attach distances.
    pub fn normalize(
        &self,
        predictions: Vec<RawPrediction>,
        frame_width: u32,
        frame_height: u32,
        filter: &DetectionFilter,
    ) -> Vec<DetectedObject> {
        let mut objects = Vec::new();
        for prediction in predictions {
            if prediction.score < filter.confidence_threshold {
                continue;
            }
            let [x, y, w, h] = prediction.bbox;
            let bbox = BoundingBox::from_pixels(x, y, w, h, frame_width, frame_height);
            if !bbox.is_valid() || bbox.area() < filter.min_object_size {
                continue;
            }

            let distance = self
                .estimator
                .estimate(&prediction.class, bbox.width, bbox.height);
            let id = objects.len() as u32 + 1;
            objects.push(
                DetectedObject::new(id, prediction.class, prediction.score, bbox)
                    .with_distance(distance),
            );
        }
        objects
    }
}

#[async_trait]
impl DetectionAdapter for LocalModelAdapter {
    fn source(&self) -> DetectionSource {
        DetectionSource::Local
    }

    async fn detect(
        &self,
        frame: &Frame,
        filter: &DetectionFilter,
    ) -> Result<Vec<DetectedObject>, SourceError> {
        let model = self.cache.get().await?;
        let owned = frame.clone();
        let predictions = tokio::task::spawn_blocking(move || model.detect(&owned))
            .await
            .map_err(|e| SourceError::Inference {
                message: e.to_string(),
            })?
            .map_err(|e| SourceError::Inference {
                message: e.to_string(),
            })?;

        debug!("Local model returned {} raw predictions", predictions.len());
        Ok(self.normalize(predictions, frame.width, frame.height, filter))
    }

    async fn warm_up(&self) -> Result<(), SourceError> {
        self.cache.get().await.map(|_| ())
    }
}

/// Stands in when there is no usable model, so the local source fails loudly
/// instead of reporting an empty scene.
struct UnavailableLoader {
    reason: String,
}

#[async_trait]
impl ModelLoader for UnavailableLoader {
    async fn load(&self) -> Result<Arc<dyn ObjectDetector>> {
        Err(anyhow!("{}", self.reason))
    }
}

/// Pick the model loader for the configured model file and enabled backends.
pub fn loader_from_config(config: &LocalModelConfig) -> Arc<dyn ModelLoader> {
    let reason = match &config.model_path {
        #[cfg(feature = "backend-tract")]
        Some(path) => {
            return Arc::new(super::tract::TractLoader::new(
                path.clone(),
                config.input_width,
                config.input_height,
            ))
        }
        #[cfg(not(feature = "backend-tract"))]
        Some(path) => format!(
            "model {} configured but no inference backend is compiled in (enable backend-tract)",
            path
        ),
        None => "no local detection model configured".to_string(),
    };
    warn!("Local detection unavailable: {}", reason);
    Arc::new(UnavailableLoader { reason })
}
