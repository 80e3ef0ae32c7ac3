use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::SystemTime;

use crate::config::InstructionConfig;
use crate::detection::{DetectedObject, Position};

pub const PATH_CLEAR: &str = "Path is clear";
pub const PATH_CLEAR_AHEAD: &str = "Path is clear ahead";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionKind {
    Door,
    Doorway,
    Steps,
    General,
}

impl InstructionKind {
    pub fn classify(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "door" => InstructionKind::Door,
            "doorway" | "entrance" => InstructionKind::Doorway,
            "steps" | "stairs" | "staircase" | "step" => InstructionKind::Steps,
            _ => InstructionKind::General,
        }
    }
}

/// How announcements are phrased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionStyle {
    /// Qualitative directions: "chair ahead, pass around"
    #[default]
    Directive,
    /// Spoken distances: "chair detected on your left, about 2.4 meters away."
    Distance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub text: String,
    pub priority: Priority,
}

/// One entry in the instruction history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationInstruction {
    pub id: u64,
    pub text: String,
    pub priority: Priority,
    pub timestamp: SystemTime,
    pub kind: InstructionKind,
}

/// Turns a detection list into something worth saying.
#[derive(Debug, Clone)]
pub struct InstructionGenerator {
    config: InstructionConfig,
}

impl Default for InstructionGenerator {
    fn default() -> Self {
        Self::new(InstructionConfig::default())
    }
}

impl InstructionGenerator {
    pub fn new(config: InstructionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InstructionConfig {
        &self.config
    }

    pub fn style(&self) -> DescriptionStyle {
        self.config.style
    }

    /// Detections within the relevance cutoff, nearest first, with distances filled in.
    fn relevant(&self, detections: &[DetectedObject]) -> Vec<(f32, DetectedObject)> {
        let mut nearby: Vec<(f32, DetectedObject)> = detections
            .iter()
            .map(|d| (d.distance_or(self.config.missing_distance), d.clone()))
            .filter(|(distance, _)| *distance <= self.config.relevance_cutoff)
            .collect();
        nearby.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        nearby
    }

    fn directive(&self, position: Position, distance: f32) -> Option<&'static str> {
        let cfg = &self.config;
        match position {
            Position::Center if distance < cfg.stop_distance => Some("stop"),
            Position::Center if distance < cfg.pass_around_distance => Some("pass around"),
            Position::Left if distance < cfg.side_clearance_distance => Some("move right"),
            Position::Right if distance < cfg.side_clearance_distance => Some("move left"),
            _ => None,
        }
    }

    fn phrase(&self, object: &DetectedObject, distance: f32) -> String {
        let label = object.spoken_label();
        let position = object.position();
        match self.config.style {
            DescriptionStyle::Directive => {
                let base = format!("{} {}", label, position.phrase());
                match self.directive(position, distance) {
                    Some(directive) => format!("{}, {}", base, directive),
                    None => base,
                }
            }
            DescriptionStyle::Distance => {
                if distance < self.config.stop_distance {
                    format!(
                        "Caution: {} very close ahead, about {:.1} meters away.",
                        label, distance
                    )
                } else {
                    format!(
                        "{} detected {}, about {:.1} meters away.",
                        label,
                        position.side(),
                        distance
                    )
                }
            }
        }
    }

    fn priority(&self, object: &DetectedObject, distance: f32) -> Priority {
        if distance < self.config.high_priority_distance
            || InstructionKind::classify(&object.label) == InstructionKind::Steps
        {
            Priority::High
        } else if distance > self.config.low_priority_distance {
            Priority::Low
        } else {
            Priority::Medium
        }
    }

    /// A single instruction about the closest relevant object.
    pub fn generate(&self, detections: &[DetectedObject]) -> Instruction {
        if detections.is_empty() {
            return Instruction {
                text: PATH_CLEAR.to_string(),
                priority: Priority::Low,
            };
        }

        match self.relevant(detections).into_iter().next() {
            Some((distance, closest)) => Instruction {
                text: self.phrase(&closest, distance),
                priority: self.priority(&closest, distance),
            },
            None => Instruction {
                text: PATH_CLEAR_AHEAD.to_string(),
                priority: Priority::Low,
            },
        }
    }

    /// A spoken summary of the few nearest objects.
    pub fn describe(&self, detections: &[DetectedObject]) -> String {
        if detections.is_empty() {
            return PATH_CLEAR.to_string();
        }

        let nearby = self.relevant(detections);
        if nearby.is_empty() {
            return PATH_CLEAR_AHEAD.to_string();
        }

        let phrases: Vec<String> = nearby
            .iter()
            .take(self.config.max_described.max(1))
            .map(|(distance, object)| self.phrase(object, *distance))
            .collect();

        match self.config.style {
            DescriptionStyle::Directive => join_phrases(&phrases),
            DescriptionStyle::Distance => phrases.join(" "),
        }
    }

    /// History entry for the current detections; `id` comes from the history.
    pub fn navigation_instruction(&self, id: u64, detections: &[DetectedObject]) -> NavigationInstruction {
        let instruction = self.generate(detections);
        let kind = self
            .relevant(detections)
            .first()
            .map(|(_, closest)| InstructionKind::classify(&closest.label))
            .unwrap_or(InstructionKind::General);

        NavigationInstruction {
            id,
            text: instruction.text,
            priority: instruction.priority,
            timestamp: SystemTime::now(),
            kind,
        }
    }
}

/// "A", "A and B", "A, B, and C".
pub fn join_phrases(phrases: &[String]) -> String {
    match phrases {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{} and {}", first, second),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

/// First sentence of an announcement, used when speech keeps failing.
pub fn first_sentence(text: &str) -> &str {
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let at_boundary = chars.peek().map(|(_, next)| next.is_whitespace()).unwrap_or(true);
        if matches!(c, '.' | '!' | '?') && at_boundary {
            return &text[..i + c.len_utf8()];
        }
    }
    text
}
