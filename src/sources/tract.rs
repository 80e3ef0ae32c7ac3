use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tract_onnx::prelude::*;

use super::local::{ModelLoader, ObjectDetector, RawPrediction};
use crate::frame::Frame;

/// COCO ids as emitted by SSD-style exports; empty entries are unused ids.
const COCO_LABELS: [&str; 91] = [
    "", "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "", "backpack",
    "umbrella", "", "", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard",
    "sports ball", "kite", "baseball bat", "baseball glove", "skateboard", "surfboard",
    "tennis racket", "bottle", "", "wine glass", "cup", "fork", "knife", "spoon", "bowl",
    "banana", "apple", "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut",
    "cake", "chair", "couch", "potted plant", "bed", "", "dining table", "", "", "toilet", "",
    "tv", "laptop", "mouse", "remote", "keyboard", "cell phone", "microwave", "oven", "toaster",
    "sink", "refrigerator", "", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// SSD-style ONNX detector: uint8 NHWC input, outputs boxes, classes, scores, count.
pub struct TractDetector {
    plan: Plan,
    width: u32,
    height: u32,
}

impl TractDetector {
    pub fn load(path: &PathBuf, width: u32, height: u32) -> Result<Self> {
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to load ONNX model from {}", path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, height as usize, width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            plan,
            width,
            height,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let resized = frame
            .to_image()?
            .resize_exact(
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            )
            .to_rgb8();
        let width = self.width as usize;
        let pixels = resized.as_raw();
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, self.height as usize, width, 3),
            |(_, y, x, c)| pixels[(y * width + x) * 3 + c],
        );
        Ok(input.into_tensor())
    }
}

impl ObjectDetector for TractDetector {
    fn name(&self) -> &str {
        "tract-ssd"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<RawPrediction>> {
        let input = self.build_input(frame)?;
        let outputs = self.plan.run(tvec!(input.into())).context("ONNX inference failed")?;
        if outputs.len() < 4 {
            return Err(anyhow!("expected 4 model outputs, got {}", outputs.len()));
        }

        let boxes = outputs[0].to_array_view::<f32>().context("boxes were not f32")?;
        let classes = outputs[1].to_array_view::<f32>().context("classes were not f32")?;
        let scores = outputs[2].to_array_view::<f32>().context("scores were not f32")?;
        let count = outputs[3]
            .to_array_view::<f32>()
            .context("count was not f32")?
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0) as usize;

        let fw = frame.width as f32;
        let fh = frame.height as f32;
        let mut predictions = Vec::with_capacity(count);
        for i in 0..count.min(scores.len()) {
            let class_id = classes.as_slice().and_then(|c| c.get(i)).copied().unwrap_or(0.0) as usize;
            let label = COCO_LABELS.get(class_id).copied().unwrap_or("");
            if label.is_empty() {
                continue;
            }
            let score = scores.as_slice().and_then(|s| s.get(i)).copied().unwrap_or(0.0);
            let b = boxes
                .as_slice()
                .and_then(|b| b.get(i * 4..i * 4 + 4))
                .ok_or_else(|| anyhow!("box {} missing from model output", i))?;
            // ymin, xmin, ymax, xmax in [0, 1]
            predictions.push(RawPrediction {
                class: label.to_string(),
                score,
                bbox: [b[1] * fw, b[0] * fh, (b[3] - b[1]) * fw, (b[2] - b[0]) * fh],
            });
        }

        debug!("tract detector produced {} predictions", predictions.len());
        Ok(predictions)
    }
}

/// Loads a [`TractDetector`] on a blocking thread.
pub struct TractLoader {
    path: PathBuf,
    width: u32,
    height: u32,
}

impl TractLoader {
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
        }
    }
}

#[async_trait]
impl ModelLoader for TractLoader {
    async fn load(&self) -> Result<Arc<dyn ObjectDetector>> {
        let path = self.path.clone();
        let (width, height) = (self.width, self.height);
        info!("Loading ONNX detector from {}", path.display());
        let detector = tokio::task::spawn_blocking(move || TractDetector::load(&path, width, height))
            .await
            .map_err(|e| anyhow!("model load task failed: {}", e))??;
        Ok(Arc::new(detector))
    }
}
