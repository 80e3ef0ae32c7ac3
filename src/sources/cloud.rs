use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DetectionAdapter, DetectionFilter};
use crate::config::CloudEndpointConfig;
use crate::detection::{BoundingBox, DetectedObject, DetectionSource};
use crate::distance::DistanceEstimator;
use crate::error::SourceError;
use crate::frame::{EncodedFrame, Frame};

/// Request/response shape spoken by a cloud endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// JSON body with a base64 JPEG and optional bearer auth; normalized boxes back
    Json,
    /// Raw JPEG body with a subscription key header; pixel rectangles back
    Azure,
}

impl WireFormat {
    pub fn for_source(source: DetectionSource) -> Self {
        match source {
            DetectionSource::Azure => WireFormat::Azure,
            _ => WireFormat::Json,
        }
    }
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    image: String,
    options: DetectOptions<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectOptions<'a> {
    confidence_threshold: f32,
    max_detections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a str>,
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    objects: Vec<CloudObject>,
}

#[derive(Deserialize)]
struct CloudObject {
    bbox: CloudBox,
    #[serde(alias = "label")]
    class: String,
    confidence: f32,
    #[serde(default)]
    distance: Option<f32>,
}

#[derive(Deserialize)]
struct CloudBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

#[derive(Deserialize)]
struct AzureResponse {
    #[serde(default)]
    objects: Vec<AzureObject>,
    metadata: Option<AzureMetadata>,
}

#[derive(Deserialize)]
struct AzureObject {
    rectangle: AzureRectangle,
    object: String,
    confidence: f32,
}

#[derive(Deserialize)]
struct AzureRectangle {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

#[derive(Deserialize)]
struct AzureMetadata {
    width: u32,
    height: u32,
}

/// Detection through a remote vision API.
pub struct CloudAdapter {
    origin: DetectionSource,
    format: WireFormat,
    config: CloudEndpointConfig,
    client: reqwest::Client,
    estimator: DistanceEstimator,
}

impl CloudAdapter {
    pub fn new(
        origin: DetectionSource,
        config: CloudEndpointConfig,
        estimator: DistanceEstimator,
    ) -> Result<Self, SourceError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("EchoVision/1.0")
            .build()
            .map_err(|e| SourceError::Configuration {
                origin,
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        if config.has_url() {
            info!(
                "Cloud detection source {} ready at {}",
                origin,
                config.url.as_deref().unwrap_or_default()
            );
        } else {
            debug!("Cloud detection source {} has no endpoint", origin);
        }

        Ok(Self {
            origin,
            format: WireFormat::for_source(origin),
            config,
            client,
            estimator,
        })
    }

    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// The bearer key is optional for JSON endpoints; Azure requires its key.
    fn endpoint(&self) -> Result<(&str, Option<&str>), SourceError> {
        let missing = |what: &str| SourceError::Configuration {
            origin: self.origin,
            reason: format!("missing {}", what),
        };
        let url = self
            .config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| missing("endpoint URL"))?;
        let key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty());
        if key.is_none() && self.format == WireFormat::Azure {
            return Err(missing("API key"));
        }
        Ok((url, key))
    }

    fn encode(&self, frame: &Frame) -> Result<EncodedFrame, SourceError> {
        frame
            .encode_jpeg(self.config.max_image_dimension, self.config.jpeg_quality)
            .map_err(|e| SourceError::Parse {
                origin: self.origin,
                message: format!("could not encode frame: {}", e),
            })
    }

    fn request_error(&self, error: reqwest::Error) -> SourceError {
        if error.is_timeout() {
            SourceError::Timeout {
                origin: self.origin,
                after: Duration::from_millis(self.config.timeout_ms),
            }
        } else {
            SourceError::Network {
                origin: self.origin,
                message: error.to_string(),
            }
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, SourceError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| SourceError::Timeout {
                origin: self.origin,
                after: timeout,
            })?
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Auth {
                origin: self.origin,
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Network {
                origin: self.origin,
                message: format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>()),
            });
        }

        response.text().await.map_err(|e| self.request_error(e))
    }

    fn parse_error(&self, error: serde_json::Error) -> SourceError {
        SourceError::Parse {
            origin: self.origin,
            message: error.to_string(),
        }
    }

    async fn detect_json(
        &self,
        url: &str,
        key: Option<&str>,
        frame: &Frame,
        filter: &DetectionFilter,
    ) -> Result<Vec<DetectedObject>, SourceError> {
        let jpeg = self.encode(frame)?;
        let body = DetectRequest {
            image: general_purpose::STANDARD.encode(&jpeg.bytes),
            options: DetectOptions {
                confidence_threshold: filter.confidence_threshold,
                max_detections: filter.max_detections,
                provider: match self.origin {
                    DetectionSource::Deepseek => Some("deepseek"),
                    _ => None,
                },
            },
        };

        let mut request = self.client.post(url).json(&body);
        if let Some(key) = key {
            request = request.bearer_auth(key);
        }
        let text = self.send(request).await?;
        let parsed: DetectResponse = serde_json::from_str(&text).map_err(|e| self.parse_error(e))?;

        let objects = parsed
            .objects
            .into_iter()
            .enumerate()
            .map(|(i, o)| {
                let bbox = BoundingBox::new(o.bbox.x, o.bbox.y, o.bbox.width, o.bbox.height).clamped();
                let distance = o
                    .distance
                    .unwrap_or_else(|| self.estimator.estimate(&o.class, bbox.width, bbox.height));
                DetectedObject::new(i as u32 + 1, o.class, o.confidence, bbox).with_distance(distance)
            })
            .collect();
        Ok(objects)
    }

    async fn detect_azure(
        &self,
        url: &str,
        key: &str,
        frame: &Frame,
    ) -> Result<Vec<DetectedObject>, SourceError> {
        let jpeg = self.encode(frame)?;
        let request = self
            .client
            .post(url)
            .header("Ocp-Apim-Subscription-Key", key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(jpeg.bytes);
        let text = self.send(request).await?;
        let parsed: AzureResponse = serde_json::from_str(&text).map_err(|e| self.parse_error(e))?;

        // Rectangles are in pixels of the uploaded image, not the camera frame
        let (width, height) = parsed
            .metadata
            .map(|m| (m.width, m.height))
            .unwrap_or((jpeg.width, jpeg.height));

        let objects = parsed
            .objects
            .into_iter()
            .enumerate()
            .map(|(i, o)| {
                let r = o.rectangle;
                let bbox = BoundingBox::from_pixels(r.x, r.y, r.w, r.h, width, height);
                let distance = self.estimator.estimate(&o.object, bbox.width, bbox.height);
                DetectedObject::new(i as u32 + 1, o.object, o.confidence, bbox).with_distance(distance)
            })
            .collect();
        Ok(objects)
    }
}

#[async_trait]
impl DetectionAdapter for CloudAdapter {
    fn source(&self) -> DetectionSource {
        self.origin
    }

    fn is_configured(&self) -> bool {
        match self.format {
            WireFormat::Json => self.config.has_url(),
            WireFormat::Azure => self.config.is_configured(),
        }
    }

    async fn detect(
        &self,
        frame: &Frame,
        filter: &DetectionFilter,
    ) -> Result<Vec<DetectedObject>, SourceError> {
        let (url, key) = self.endpoint()?;
        debug!("📤 Sending frame {}x{} to {}", frame.width, frame.height, self.origin);

        let result = match self.format {
            WireFormat::Json => self.detect_json(url, key, frame, filter).await,
            WireFormat::Azure => self.detect_azure(url, key.unwrap_or_default(), frame).await,
        };

        match &result {
            Ok(objects) => debug!("{} returned {} objects", self.origin, objects.len()),
            Err(e) => warn!("{} detection failed: {}", self.origin, e),
        }
        result
    }
}
