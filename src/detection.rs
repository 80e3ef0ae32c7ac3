use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Axis-aligned box in normalized frame coordinates, `(x, y)` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Normalize a pixel-space `[x, y, w, h]` box by the frame size.
    pub fn from_pixels(x: f32, y: f32, width: f32, height: f32, frame_w: u32, frame_h: u32) -> Self {
        let fw = frame_w.max(1) as f32;
        let fh = frame_h.max(1) as f32;
        Self::new(x / fw, y / fh, width / fw, height / fh).clamped()
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersect with the unit square. Parts outside the frame are cut off,
    /// so a box hanging over the left edge loses that much width.
    pub fn clamped(&self) -> Self {
        let left = self.x.clamp(0.0, 1.0);
        let top = self.y.clamp(0.0, 1.0);
        let right = (self.x + self.width).clamp(left, 1.0);
        let bottom = (self.y + self.height).clamp(top, 1.0);
        Self::new(left, top, right - left, bottom - top)
    }

    pub fn is_valid(&self) -> bool {
        let in_unit = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        in_unit(self.x)
            && in_unit(self.y)
            && in_unit(self.width)
            && in_unit(self.height)
            && self.width > 0.0
            && self.height > 0.0
    }

    /// Componentwise `weight * self + (1 - weight) * other`.
    pub fn blend(&self, other: &BoundingBox, weight: f32) -> Self {
        let mix = |a: f32, b: f32| a * weight + b * (1.0 - weight);
        Self::new(
            mix(self.x, other.x),
            mix(self.y, other.y),
            mix(self.width, other.width),
            mix(self.height, other.height),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    /// Unique within one frame's result set only.
    pub id: u32,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Estimated meters to the object, if the source produced one.
    pub distance: Option<f32>,
}

impl DetectedObject {
    pub fn new(id: u32, label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            id,
            label: label.into(),
            confidence,
            bbox,
            distance: None,
        }
    }

    pub fn with_distance(mut self, distance: f32) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn distance_or(&self, default: f32) -> f32 {
        self.distance.unwrap_or(default)
    }

    pub fn position(&self) -> Position {
        Position::from_center_x(self.bbox.center().0)
    }

    pub fn spoken_label(&self) -> &'static str {
        normalize_label(&self.label)
    }
}

/// Where a detection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    Local,
    Cloud,
    Azure,
    Deepseek,
}

impl DetectionSource {
    pub const ALL: [DetectionSource; 4] = [
        DetectionSource::Local,
        DetectionSource::Cloud,
        DetectionSource::Azure,
        DetectionSource::Deepseek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::Local => "local",
            DetectionSource::Cloud => "cloud",
            DetectionSource::Azure => "azure",
            DetectionSource::Deepseek => "deepseek",
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, DetectionSource::Local)
    }
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(DetectionSource::Local),
            "cloud" => Ok(DetectionSource::Cloud),
            "azure" => Ok(DetectionSource::Azure),
            "deepseek" => Ok(DetectionSource::Deepseek),
            other => Err(format!(
                "unknown detection source '{}', expected local, cloud, azure or deepseek",
                other
            )),
        }
    }
}

/// Horizontal position of a detection relative to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Left,
    Center,
    Right,
}

impl Position {
    pub fn from_center_x(center_x: f32) -> Self {
        if center_x < 0.4 {
            Position::Left
        } else if center_x > 0.6 {
            Position::Right
        } else {
            Position::Center
        }
    }

    pub fn phrase(&self) -> &'static str {
        match self {
            Position::Left => "to your left",
            Position::Center => "ahead",
            Position::Right => "to your right",
        }
    }

    pub fn side(&self) -> &'static str {
        match self {
            Position::Left => "on your left",
            Position::Center => "ahead",
            Position::Right => "on your right",
        }
    }
}

const SPOKEN_LABELS: &[(&str, &str)] = &[
    ("person", "person"),
    ("bicycle", "bicycle"),
    ("car", "car"),
    ("motorcycle", "motorcycle"),
    ("airplane", "airplane"),
    ("bus", "bus"),
    ("train", "train"),
    ("truck", "truck"),
    ("boat", "boat"),
    ("traffic light", "traffic light"),
    ("fire hydrant", "fire hydrant"),
    ("stop sign", "stop sign"),
    ("parking meter", "parking meter"),
    ("bench", "bench"),
    ("bird", "bird"),
    ("cat", "cat"),
    ("dog", "dog"),
    ("horse", "horse"),
    ("sheep", "sheep"),
    ("cow", "cow"),
    ("elephant", "elephant"),
    ("bear", "bear"),
    ("zebra", "zebra"),
    ("giraffe", "giraffe"),
    ("backpack", "backpack"),
    ("umbrella", "umbrella"),
    ("handbag", "handbag"),
    ("tie", "tie"),
    ("suitcase", "suitcase"),
    ("frisbee", "frisbee"),
    ("skis", "skis"),
    ("snowboard", "snowboard"),
    ("sports ball", "sports ball"),
    ("kite", "kite"),
    ("baseball bat", "baseball bat"),
    ("baseball glove", "baseball glove"),
    ("skateboard", "skateboard"),
    ("surfboard", "surfboard"),
    ("tennis racket", "tennis racket"),
    ("bottle", "bottle"),
    ("wine glass", "wine glass"),
    ("cup", "cup"),
    ("fork", "fork"),
    ("knife", "knife"),
    ("spoon", "spoon"),
    ("bowl", "bowl"),
    ("banana", "banana"),
    ("apple", "apple"),
    ("sandwich", "sandwich"),
    ("orange", "orange"),
    ("broccoli", "broccoli"),
    ("carrot", "carrot"),
    ("hot dog", "hot dog"),
    ("pizza", "pizza"),
    ("donut", "donut"),
    ("cake", "cake"),
    ("chair", "chair"),
    ("couch", "couch"),
    ("potted plant", "potted plant"),
    ("bed", "bed"),
    ("dining table", "table"),
    ("toilet", "toilet"),
    ("tv", "tv"),
    ("laptop", "laptop"),
    ("mouse", "mouse"),
    ("remote", "remote"),
    ("keyboard", "keyboard"),
    ("cell phone", "phone"),
    ("microwave", "microwave"),
    ("oven", "oven"),
    ("toaster", "toaster"),
    ("sink", "sink"),
    ("refrigerator", "refrigerator"),
    ("book", "book"),
    ("clock", "clock"),
    ("vase", "vase"),
    ("scissors", "scissors"),
    ("teddy bear", "teddy bear"),
    ("hair drier", "hair dryer"),
    ("toothbrush", "toothbrush"),
    // navigation landmarks reported by cloud sources
    ("door", "door"),
    ("doorway", "doorway"),
    ("steps", "steps"),
    ("stairs", "stairs"),
    ("table", "table"),
];

/// Map a raw class name to the word spoken to the user; unknown classes become "object".
pub fn normalize_label(label: &str) -> &'static str {
    let cleaned = label.trim().to_lowercase().replace('_', " ");
    SPOKEN_LABELS
        .iter()
        .find(|(raw, _)| *raw == cleaned)
        .map(|(_, spoken)| *spoken)
        .unwrap_or("object")
}
