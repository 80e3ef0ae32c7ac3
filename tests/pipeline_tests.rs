mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{centered_box, object};
use echovision::config::{DetectionConfig, DistanceConfig, InstructionConfig};
use echovision::detection::{normalize_label, BoundingBox, DetectionSource, Position};
use echovision::distance::DistanceEstimator;
use echovision::history::{time_ago, InstructionHistory};
use echovision::instructions::{
    first_sentence, join_phrases, DescriptionStyle, InstructionGenerator, InstructionKind,
    Priority, PATH_CLEAR, PATH_CLEAR_AHEAD,
};
use echovision::prioritizer::prioritize;
use echovision::sources::DetectionFilter;
use echovision::stabilizer::{stabilize, Stabilizer};

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

#[test]
fn test_distance_follows_reference_size_and_width() {
    let estimator = DistanceEstimator::deterministic(DistanceConfig::default());

    // chair: 0.5 / (0.2 * 0.8) * 1.5
    let chair = estimator.estimate("chair", 0.2, 0.3);
    assert!(close(chair, 4.6875), "got {}", chair);

    // a wider box of the same class is closer
    assert!(estimator.estimate("chair", 0.4, 0.3) < chair);

    // doors have a bigger reference size than chairs
    assert!(estimator.estimate("door", 0.2, 0.3) > chair);
}

#[test]
fn test_distance_is_clamped() {
    let estimator = DistanceEstimator::deterministic(DistanceConfig::default());

    assert_eq!(estimator.estimate("person", 0.01, 0.01), 10.0);
    assert_eq!(estimator.estimate("person", 0.0, 0.5), 10.0);
    assert!(close(estimator.estimate("person", 1.0, 1.0), 0.9375));
    assert_eq!(estimator.estimate("door", 50.0, 1.0), 0.5);
}

#[test]
fn test_distance_jitter_is_bounded() {
    let wild = Arc::new(|| 5.0_f32);
    let estimator = DistanceEstimator::with_noise(DistanceConfig::default(), wild);
    let steady = DistanceEstimator::deterministic(DistanceConfig::default());

    let jittered = estimator.estimate("chair", 0.2, 0.3);
    let base = steady.estimate("chair", 0.2, 0.3);
    assert!(close(jittered, base * 1.1), "{} vs {}", jittered, base);

    let random = DistanceEstimator::new(DistanceConfig::default());
    for _ in 0..50 {
        let d = random.estimate("chair", 0.2, 0.3);
        assert!(d >= base * 0.9 - 1e-4 && d <= base * 1.1 + 1e-4);
    }
}

#[test]
fn test_reference_size_overrides_and_default() {
    let mut overrides = HashMap::new();
    overrides.insert("guide_dog".to_string(), 0.6);
    let estimator = DistanceEstimator::deterministic(DistanceConfig {
        reference_overrides: overrides,
        ..Default::default()
    });

    assert_eq!(estimator.reference_size("Guide Dog"), 0.6);
    assert_eq!(estimator.reference_size("door"), 0.9);
    assert_eq!(estimator.reference_size("hovercraft"), 0.5);
}

#[test]
fn test_labels_and_positions() {
    assert_eq!(normalize_label("person"), "person");
    assert_eq!(normalize_label("  Chair "), "chair");
    assert_eq!(normalize_label("flux capacitor"), "object");

    assert_eq!(Position::from_center_x(0.2), Position::Left);
    assert_eq!(Position::from_center_x(0.5), Position::Center);
    assert_eq!(Position::from_center_x(0.8), Position::Right);
    assert_eq!(Position::Left.phrase(), "to your left");

    let bbox = BoundingBox::from_pixels(320.0, 120.0, 640.0, 120.0, 640, 480);
    assert!(close(bbox.x, 0.5));
    assert!(close(bbox.width, 0.5), "width clamps to the frame edge");
    assert!(close(bbox.height, 0.25));
    assert!(bbox.is_valid());
}

#[test]
fn test_boxes_over_the_edge_are_cut_not_shifted() {
    // 10 px hang over the left edge of a 100 px frame
    let bbox = BoundingBox::from_pixels(-10.0, -20.0, 100.0, 50.0, 100, 100);
    assert!(close(bbox.x, 0.0));
    assert!(close(bbox.width, 0.9));
    assert!(close(bbox.y, 0.0));
    assert!(close(bbox.height, 0.3));

    let estimator = DistanceEstimator::deterministic(DistanceConfig::default());
    let full = estimator.estimate("chair", 1.0, 0.5);
    let cut = estimator.estimate("chair", bbox.width, bbox.height);
    assert!(cut > full);

    let outside = BoundingBox::new(1.2, 0.5, 0.3, 0.2).clamped();
    assert_eq!(outside.width, 0.0);
    assert!(!outside.is_valid());
}

#[test]
fn test_detection_source_names() {
    for source in DetectionSource::ALL {
        assert_eq!(source.as_str().parse::<DetectionSource>(), Ok(source));
    }
    assert_eq!("Azure".parse::<DetectionSource>(), Ok(DetectionSource::Azure));
    assert!("sonar".parse::<DetectionSource>().is_err());
    assert!(!DetectionSource::Local.is_remote());
    assert!(DetectionSource::Deepseek.is_remote());
    assert_eq!(
        serde_json::to_string(&DetectionSource::Cloud).unwrap(),
        "\"cloud\""
    );
}

#[test]
fn test_filter_drops_weak_and_distant_detections() {
    let filter = DetectionFilter::from_config(&DetectionConfig::default());
    let bbox = centered_box(0.5, 0.5, 0.2, 0.2);

    let detections = vec![
        object("chair", 0.9, bbox, 2.0),
        object("cup", 0.2, bbox, 2.0),
        object("table", 0.8, bbox, 7.5),
        object("dog", 0.7, bbox, 5.0),
        object("door", 0.8, BoundingBox::new(0.5, 0.5, 0.01, 0.01), 1.0),
    ];
    let kept = filter.apply(detections);
    let labels: Vec<&str> = kept.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["chair", "dog"]);

    // missing distance counts as the configured default
    let unknown = echovision::detection::DetectedObject::new(9, "person", 0.9, bbox);
    assert!(filter.accepts(&unknown));
}

#[test]
fn test_filter_caps_detection_count() {
    let filter = DetectionFilter {
        max_detections: 2,
        ..Default::default()
    };
    let bbox = centered_box(0.5, 0.5, 0.2, 0.2);
    let detections = (0..5).map(|_| object("chair", 0.9, bbox, 2.0)).collect();
    assert_eq!(filter.apply(detections).len(), 2);
}

#[test]
fn test_stabilizer_identity_without_history() {
    let current = vec![object("chair", 0.8, BoundingBox::new(0.1, 0.2, 0.2, 0.3), 2.0)];
    assert_eq!(stabilize(&current, &[]), current);
}

#[test]
fn test_stabilizer_blends_matching_boxes() {
    let current = vec![object("chair", 0.6, BoundingBox::new(0.30, 0.30, 0.20, 0.20), 2.0)];
    let previous = vec![object("chair", 0.9, BoundingBox::new(0.25, 0.35, 0.30, 0.10), 2.2)];

    let stable = stabilize(&current, &previous);
    let bbox = stable[0].bbox;
    assert!(close(bbox.x, 0.6 * 0.30 + 0.4 * 0.25));
    assert!(close(bbox.y, 0.6 * 0.30 + 0.4 * 0.35));
    assert!(close(bbox.width, 0.6 * 0.20 + 0.4 * 0.30));
    assert!(close(bbox.height, 0.6 * 0.20 + 0.4 * 0.10));
    assert!(close(stable[0].confidence, 0.9));
    assert_eq!(stable[0].distance, Some(2.0));
}

#[test]
fn test_stabilizer_ignores_other_labels_and_far_boxes() {
    let current = vec![
        object("chair", 0.6, centered_box(0.5, 0.5, 0.2, 0.2), 2.0),
        object("person", 0.6, centered_box(0.2, 0.5, 0.2, 0.2), 2.0),
    ];
    let previous = vec![
        object("table", 0.9, centered_box(0.5, 0.5, 0.2, 0.2), 2.0),
        object("person", 0.9, centered_box(0.5, 0.5, 0.2, 0.2), 2.0),
    ];

    let stable = Stabilizer::default().stabilize(&current, &previous);
    assert_eq!(stable, current);
}

#[test]
fn test_prioritizer_keeps_small_lists_in_order() {
    let detections = vec![
        object("a", 0.9, centered_box(0.1, 0.5, 0.1, 0.1), 2.0),
        object("b", 0.9, centered_box(0.5, 0.5, 0.1, 0.1), 2.0),
        object("c", 0.9, centered_box(0.9, 0.5, 0.1, 0.1), 2.0),
    ];
    assert_eq!(prioritize(detections.clone()), detections);
}

#[test]
fn test_prioritizer_sorts_by_center_offset() {
    let detections = vec![
        object("left", 0.9, centered_box(0.1, 0.5, 0.1, 0.1), 3.0),
        object("middle", 0.9, centered_box(0.5, 0.5, 0.1, 0.1), 3.0),
        object("right", 0.9, centered_box(0.85, 0.5, 0.1, 0.1), 3.0),
        object("corner", 0.9, centered_box(0.05, 0.05, 0.1, 0.1), 3.0),
        object("near-middle", 0.9, centered_box(0.55, 0.5, 0.1, 0.1), 3.0),
    ];
    let labels: Vec<String> = prioritize(detections).into_iter().map(|d| d.label).collect();
    assert_eq!(labels, vec!["middle", "near-middle", "right", "left", "corner"]);
}

#[test]
fn test_instruction_path_clear() {
    let generator = InstructionGenerator::default();

    let empty = generator.generate(&[]);
    assert_eq!(empty.text, PATH_CLEAR);
    assert_eq!(empty.priority, Priority::Low);

    let far = vec![object("car", 0.9, centered_box(0.5, 0.5, 0.1, 0.1), 12.0)];
    let instruction = generator.generate(&far);
    assert_eq!(instruction.text, PATH_CLEAR_AHEAD);
    assert_eq!(instruction.priority, Priority::Low);
    assert_eq!(generator.describe(&far), PATH_CLEAR_AHEAD);
}

#[test]
fn test_instruction_center_bands() {
    let generator = InstructionGenerator::default();
    let ahead = |distance| vec![object("chair", 0.9, centered_box(0.5, 0.5, 0.2, 0.2), distance)];

    let pass = generator.generate(&ahead(2.0));
    assert_eq!(pass.priority, Priority::High);
    assert_eq!(pass.text, "chair ahead, pass around");

    let stop = generator.generate(&ahead(1.0));
    assert_eq!(stop.text, "chair ahead, stop");

    let medium = generator.generate(&ahead(4.0));
    assert_eq!(medium.priority, Priority::Medium);
    assert_eq!(medium.text, "chair ahead");

    let low = generator.generate(&ahead(9.0));
    assert_eq!(low.priority, Priority::Low);
}

#[test]
fn test_instruction_uses_closest_and_missing_distance_default() {
    let generator = InstructionGenerator::default();
    let detections = vec![
        object("person", 0.9, centered_box(0.8, 0.5, 0.2, 0.2), 4.0),
        echovision::detection::DetectedObject::new(2, "bench", 0.9, centered_box(0.2, 0.5, 0.2, 0.2)),
        object("dog", 0.9, centered_box(0.2, 0.5, 0.2, 0.2), 2.5),
    ];

    let instruction = generator.generate(&detections);
    assert_eq!(instruction.text, "dog to your left, move right");
    assert_eq!(instruction.priority, Priority::High);

    assert_eq!(
        generator.describe(&detections),
        "dog to your left, move right, person to your right, move left, and bench to your left"
    );
}

#[test]
fn test_steps_are_always_high_priority() {
    let generator = InstructionGenerator::default();
    let steps = vec![object("stairs", 0.9, centered_box(0.5, 0.5, 0.3, 0.2), 6.0)];
    assert_eq!(generator.generate(&steps).priority, Priority::High);
    assert_eq!(InstructionKind::classify("stairs"), InstructionKind::Steps);
    assert_eq!(InstructionKind::classify("door"), InstructionKind::Door);
}

#[test]
fn test_distance_style_description() {
    let generator = InstructionGenerator::new(InstructionConfig {
        style: DescriptionStyle::Distance,
        ..Default::default()
    });
    let detections = vec![
        object("chair", 0.9, centered_box(0.5, 0.5, 0.2, 0.2), 1.2),
        object("table", 0.9, centered_box(0.8, 0.5, 0.2, 0.2), 3.46),
    ];

    assert_eq!(
        generator.describe(&detections),
        "Caution: chair very close ahead, about 1.2 meters away. \
         table detected on your right, about 3.5 meters away."
    );
}

#[test]
fn test_chair_scenario_end_to_end() {
    let estimator = DistanceEstimator::deterministic(DistanceConfig::default());
    let bbox = BoundingBox::new(0.1, 0.2, 0.2, 0.3);
    let distance = estimator.estimate("chair", bbox.width, bbox.height);
    assert!((0.5..=10.0).contains(&distance));

    let current = vec![object("chair", 0.8, bbox, distance)];
    let stable = stabilize(&current, &[]);
    assert_eq!(stable, current);
    let ordered = prioritize(stable);
    assert_eq!(ordered, current);

    let instruction = InstructionGenerator::default().generate(&ordered);
    assert!(instruction.text.contains("chair"));
    assert!(instruction.text.contains("to your left"));
    assert_eq!(instruction.priority, Priority::Medium);
}

#[test]
fn test_phrase_helpers() {
    let phrases: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
    assert_eq!(join_phrases(&phrases[..1]), "a");
    assert_eq!(join_phrases(&phrases[..2]), "a and b");
    assert_eq!(join_phrases(&phrases), "a, b, and c");

    assert_eq!(
        first_sentence("Caution: chair about 1.2 meters away. Table on your right."),
        "Caution: chair about 1.2 meters away."
    );
    assert_eq!(first_sentence("chair ahead, stop"), "chair ahead, stop");
}

#[test]
fn test_history_is_bounded_and_ordered() {
    let generator = InstructionGenerator::default();
    let mut history = InstructionHistory::new(3);

    for distance in [9.0, 2.0, 4.0, 5.0] {
        let id = history.next_id();
        let detections = vec![object("chair", 0.9, centered_box(0.5, 0.5, 0.2, 0.2), distance)];
        history.record(generator.navigation_instruction(id, &detections));
    }

    assert_eq!(history.len(), 3);
    let ids: Vec<u64> = history.iter().map(|i| i.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(history.primary().map(|i| i.priority), Some(Priority::High));
    assert_eq!(history.latest().map(|i| i.priority), Some(Priority::Medium));
}

#[test]
fn test_time_ago_formatting() {
    use std::time::{Duration, SystemTime};
    let now = SystemTime::now();
    assert_eq!(time_ago(now, now), "just now");
    assert_eq!(time_ago(now - Duration::from_secs(12), now), "12s ago");
    assert_eq!(time_ago(now - Duration::from_secs(180), now), "3m ago");
    assert_eq!(time_ago(now - Duration::from_secs(7200), now), "2h ago");
}
