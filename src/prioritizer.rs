use std::cmp::Ordering;

use crate::detection::DetectedObject;

/// Detection counts at or below this are left in source order.
pub const REORDER_ABOVE: usize = 3;

/// Favor detections near the middle of the frame once there are many.
pub fn prioritize(mut detections: Vec<DetectedObject>) -> Vec<DetectedObject> {
    if detections.len() <= REORDER_ABOVE {
        return detections;
    }

    // sort_by is stable, equal distances keep their relative order
    detections.sort_by(|a, b| {
        center_offset(a)
            .partial_cmp(&center_offset(b))
            .unwrap_or(Ordering::Equal)
    });
    detections
}

fn center_offset(object: &DetectedObject) -> f32 {
    let (cx, cy) = object.bbox.center();
    ((cx - 0.5).powi(2) + (cy - 0.5).powi(2)).sqrt()
}
