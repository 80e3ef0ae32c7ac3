use crate::detection::DetectedObject;

/// Single-step temporal smoothing of detections against the previous frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stabilizer {
    /// Maximum center offset on each axis for two boxes to be the same object
    pub tolerance: f32,
    /// Weight of the current box in the blend
    pub current_weight: f32,
}

impl Default for Stabilizer {
    fn default() -> Self {
        Self {
            tolerance: 0.15,
            current_weight: 0.6,
        }
    }
}

impl Stabilizer {
    /// Blend each current detection with its first match in `previous`.
    ///
    /// A match has the same label and a box center within `tolerance` on both
    /// axes. Matching is greedy in array order, so one previous detection may
    /// serve several current ones. Unmatched detections pass through untouched.
    pub fn stabilize(
        &self,
        current: &[DetectedObject],
        previous: &[DetectedObject],
    ) -> Vec<DetectedObject> {
        if previous.is_empty() {
            return current.to_vec();
        }

        current
            .iter()
            .map(|object| match self.find_match(object, previous) {
                Some(prior) => DetectedObject {
                    bbox: object.bbox.blend(&prior.bbox, self.current_weight),
                    confidence: object.confidence.max(prior.confidence),
                    ..object.clone()
                },
                None => object.clone(),
            })
            .collect()
    }

    fn find_match<'a>(
        &self,
        object: &DetectedObject,
        previous: &'a [DetectedObject],
    ) -> Option<&'a DetectedObject> {
        let (cx, cy) = object.bbox.center();
        previous.iter().find(|prior| {
            let (px, py) = prior.bbox.center();
            prior.label == object.label
                && (cx - px).abs() < self.tolerance
                && (cy - py).abs() < self.tolerance
        })
    }
}

/// [`Stabilizer::stabilize`] with the default tolerance and weights.
pub fn stabilize(current: &[DetectedObject], previous: &[DetectedObject]) -> Vec<DetectedObject> {
    Stabilizer::default().stabilize(current, previous)
}
