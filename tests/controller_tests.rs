mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{
    centered_box, fast_speech_config, network_error, object, wait_until, BlankFrames,
    BrokenFrames, RecordingEngine, ScriptedAdapter,
};
use echovision::camera::FrameSource;
use echovision::config::{DeviceConfig, DeviceInfo, EchoVisionConfig, LocalModelConfig};
use echovision::controller::{
    CycleOutcome, CycleState, FrameCycleController, SkipReason, READY_ANNOUNCEMENT,
    SCAN_ANNOUNCEMENT,
};
use echovision::detection::{DetectedObject, DetectionSource};
use echovision::distance::DistanceEstimator;
use echovision::error::SourceError;
use echovision::fusion::FusionPolicy;
use echovision::instructions::{DescriptionStyle, Priority, PATH_CLEAR};
use echovision::notify::{Notification, Notifier};
use echovision::sources::{DetectionAdapter, LocalModelAdapter};
use echovision::speech::{SpeakOptions, SpeechScheduler};
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
    controller: FrameCycleController,
    engine: Arc<RecordingEngine>,
    speech: Arc<SpeechScheduler>,
    notifications: UnboundedReceiver<Notification>,
}

impl Harness {
    fn titles(&mut self) -> Vec<String> {
        let mut titles = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            titles.push(notification.title);
        }
        titles
    }
}

fn test_config() -> EchoVisionConfig {
    let mut config = EchoVisionConfig::default();
    config.speech = fast_speech_config();
    config
}

fn desktop() -> DeviceInfo {
    DeviceInfo::detect(&DeviceConfig {
        is_mobile: false,
        cpu_cores: Some(8),
        force_cloud_processing: false,
    })
}

fn phone() -> DeviceInfo {
    DeviceInfo::detect(&DeviceConfig {
        is_mobile: true,
        cpu_cores: Some(4),
        force_cloud_processing: false,
    })
}

fn harness_with(
    config: EchoVisionConfig,
    device: DeviceInfo,
    frames: Box<dyn FrameSource>,
    adapters: Vec<Arc<dyn DetectionAdapter>>,
    speech_delay: Duration,
) -> Harness {
    let (notifier, notifications) = Notifier::channel();
    let mut fusion = FusionPolicy::from_config(&config.detection, &device, notifier.clone())
        .with_failure_threshold(config.cycle.failure_threshold);
    for adapter in adapters {
        fusion.register(adapter);
    }

    let engine = Arc::new(RecordingEngine::new(speech_delay));
    let speech = Arc::new(SpeechScheduler::new(
        engine.clone(),
        config.speech.clone(),
        notifier.clone(),
    ));
    let controller = FrameCycleController::new(
        frames,
        Arc::new(fusion),
        speech.clone(),
        &config,
        device,
        notifier,
    );

    Harness {
        controller,
        engine,
        speech,
        notifications,
    }
}

fn harness(adapter: Arc<dyn DetectionAdapter>) -> Harness {
    harness_with(
        test_config(),
        desktop(),
        Box::new(BlankFrames::new()),
        vec![adapter],
        Duration::from_millis(10),
    )
}

fn adapter(scripted: &Arc<ScriptedAdapter>) -> Arc<dyn DetectionAdapter> {
    scripted.clone()
}

fn chair_ahead() -> Vec<DetectedObject> {
    vec![object("chair", 0.9, centered_box(0.5, 0.5, 0.2, 0.2), 2.0)]
}

fn completed(outcome: CycleOutcome) -> echovision::controller::CycleReport {
    match outcome {
        CycleOutcome::Completed(report) => report,
        other => panic!("expected a completed cycle, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cycle_instructs_and_announces() {
    let local = Arc::new(ScriptedAdapter::returning(DetectionSource::Local, chair_ahead()));
    let mut h = harness(local);

    let report = completed(h.controller.run_cycle().await);
    assert_eq!(report.source, DetectionSource::Local);
    assert_eq!(report.detections.len(), 1);

    let instruction = report.instruction.expect("instruction recorded");
    assert_eq!(instruction.text, "chair ahead, pass around");
    assert_eq!(instruction.priority, Priority::High);
    assert_eq!(report.announcement.as_deref(), Some("chair ahead, pass around"));

    assert_eq!(h.controller.history().len(), 1);
    assert_eq!(h.controller.previous().len(), 1);
    assert_eq!(h.controller.state(), CycleState::Idle);

    let engine = h.engine.clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            engine.finished() == vec!["chair ahead, pass around".to_string()]
        })
        .await
    );
}

#[tokio::test]
async fn test_empty_frame_announces_clear_path_without_history() {
    let local = Arc::new(ScriptedAdapter::returning(DetectionSource::Local, vec![]));
    let mut h = harness(local);

    let report = completed(h.controller.run_cycle().await);
    assert!(report.detections.is_empty());
    assert!(report.instruction.is_none());
    assert_eq!(report.announcement.as_deref(), Some(PATH_CLEAR));
    assert!(h.controller.history().is_empty());
}

#[tokio::test]
async fn test_announcements_are_rate_limited_until_manual_scan() {
    let local = Arc::new(ScriptedAdapter::returning(DetectionSource::Local, chair_ahead()));
    let mut h = harness(local);

    assert!(completed(h.controller.run_cycle().await).announcement.is_some());
    let engine = h.engine.clone();
    assert!(wait_until(Duration::from_secs(2), || engine.finished().len() == 1).await);

    let second = completed(h.controller.run_cycle().await);
    assert!(second.announcement.is_none());
    assert_eq!(h.controller.history().len(), 2);

    let scan = completed(h.controller.manual_scan().await);
    assert!(scan.announcement.is_some());
    assert!(wait_until(Duration::from_secs(2), || {
        engine.started().contains(&SCAN_ANNOUNCEMENT.to_string())
    })
    .await);
    assert_eq!(h.controller.stats().announcements, 2);
}

#[tokio::test]
async fn test_disabled_voice_never_announces() {
    let local = Arc::new(ScriptedAdapter::returning(DetectionSource::Local, chair_ahead()));
    let mut config = test_config();
    config.settings.continuous_speech_enabled = false;
    let mut h = harness_with(
        config,
        desktop(),
        Box::new(BlankFrames::new()),
        vec![adapter(&local)],
        Duration::from_millis(10),
    );

    let report = completed(h.controller.run_cycle().await);
    assert!(report.announcement.is_none());
    assert!(report.instruction.is_some());
}

#[tokio::test]
async fn test_speech_backlog_skips_cycle() {
    let local = Arc::new(ScriptedAdapter::returning(DetectionSource::Local, chair_ahead()));
    let frames = BlankFrames::new();
    let served = frames.served.clone();
    let mut h = harness_with(
        test_config(),
        desktop(),
        Box::new(frames),
        vec![adapter(&local)],
        Duration::from_secs(5),
    );

    for text in ["one", "two", "three", "four"] {
        h.speech.enqueue(text, SpeakOptions::default()).unwrap();
    }
    let speech = h.speech.clone();
    assert!(wait_until(Duration::from_secs(1), || speech.is_speaking()).await);
    assert_eq!(h.speech.pending_len(), 3);

    let outcome = h.controller.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::SpeechBacklog));
    assert_eq!(served.load(Ordering::SeqCst), 0);
    assert_eq!(local.call_count(), 0);
    assert_eq!(h.controller.stats().cycles_skipped, 1);
    h.speech.stop();
}

#[tokio::test]
async fn test_frame_errors_skip_the_cycle() {
    let local = Arc::new(ScriptedAdapter::returning(DetectionSource::Local, chair_ahead()));
    let mut h = harness_with(
        test_config(),
        desktop(),
        Box::new(BrokenFrames),
        vec![adapter(&local)],
        Duration::from_millis(10),
    );

    let outcome = h.controller.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::NoFrame));
    assert_eq!(local.call_count(), 0);
    assert_eq!(h.controller.consecutive_failures(), 0);
}

#[tokio::test]
async fn test_failures_count_and_recommend_switch_once() {
    let local = Arc::new(ScriptedAdapter::failing(
        DetectionSource::Local,
        network_error(DetectionSource::Local),
    ));
    let mut h = harness(local.clone());

    for expected in 1..=4 {
        let outcome = h.controller.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Failed {
                consecutive_failures: expected
            }
        );
    }
    let titles = h.titles();
    assert_eq!(titles, vec!["Detection Issues".to_string()]);

    local.set(Ok(chair_ahead()));
    completed(h.controller.run_cycle().await);
    assert_eq!(h.controller.consecutive_failures(), 0);
    assert_eq!(h.controller.stats().cycles_failed, 4);
}

#[tokio::test]
async fn test_model_load_timeout_enters_basic_mode_notice() {
    let local = Arc::new(ScriptedAdapter::failing(
        DetectionSource::Local,
        SourceError::ModelLoadTimeout {
            waited: Duration::from_secs(5),
        },
    ));
    let mut h = harness(local);

    h.controller.run_cycle().await;
    h.controller.run_cycle().await;
    let titles = h.titles();
    assert_eq!(
        titles.iter().filter(|t| *t == "Basic camera mode").count(),
        1
    );
}

#[tokio::test]
async fn test_cloud_failure_notice_when_cloud_enabled() {
    let cloud = Arc::new(ScriptedAdapter::failing(
        DetectionSource::Cloud,
        network_error(DetectionSource::Cloud),
    ));
    let local = Arc::new(ScriptedAdapter::failing(
        DetectionSource::Local,
        network_error(DetectionSource::Local),
    ));
    let mut config = test_config();
    config.settings.use_cloud_detection = true;
    let mut h = harness_with(
        config,
        desktop(),
        Box::new(BlankFrames::new()),
        vec![adapter(&cloud), adapter(&local)],
        Duration::from_millis(10),
    );

    h.controller.run_cycle().await;
    h.controller.run_cycle().await;
    assert_eq!(cloud.call_count(), 2);
    assert_eq!(h.titles(), vec!["Cloud Detection Error".to_string()]);
}

#[tokio::test]
async fn test_mobile_runs_every_third_tick() {
    let local = Arc::new(ScriptedAdapter::returning(DetectionSource::Local, vec![]));
    let mut h = harness_with(
        test_config(),
        phone(),
        Box::new(BlankFrames::new()),
        vec![adapter(&local)],
        Duration::from_millis(10),
    );
    assert_eq!(h.controller.interval(), Duration::from_millis(2000));

    let mut outcomes = Vec::new();
    for _ in 0..6 {
        outcomes.push(h.controller.on_tick().await);
    }
    let ran = outcomes
        .iter()
        .filter(|o| matches!(o, CycleOutcome::Completed(_)))
        .count();
    assert_eq!(ran, 2);
    assert_eq!(outcomes[0], CycleOutcome::Skipped(SkipReason::FrameStride));
    assert!(matches!(outcomes[2], CycleOutcome::Completed(_)));
    assert_eq!(local.call_count(), 2);
}

#[tokio::test]
async fn test_slow_processing_advisory() {
    let local = Arc::new(
        ScriptedAdapter::returning(DetectionSource::Local, vec![])
            .with_delay(Duration::from_millis(30)),
    );
    let mut config = test_config();
    config.cycle.slow_processing_ms = 10;
    let mut h = harness_with(
        config,
        desktop(),
        Box::new(BlankFrames::new()),
        vec![adapter(&local)],
        Duration::from_millis(10),
    );

    h.controller.run_cycle().await;
    h.controller.run_cycle().await;
    assert!(h.controller.average_processing_time() >= Duration::from_millis(30));
    let titles = h.titles();
    assert_eq!(
        titles.iter().filter(|t| *t == "Processing is slow").count(),
        1
    );
}

#[tokio::test]
async fn test_repeated_speech_failures_shorten_announcements() {
    let detections = vec![
        object("chair", 0.9, centered_box(0.5, 0.5, 0.2, 0.2), 1.2),
        object("table", 0.9, centered_box(0.8, 0.5, 0.2, 0.2), 3.46),
    ];
    let local = Arc::new(ScriptedAdapter::returning(DetectionSource::Local, detections));
    let mut config = test_config();
    config.instructions.style = DescriptionStyle::Distance;
    config.settings.speech_rate = 1.5;
    let mut h = harness_with(
        config,
        desktop(),
        Box::new(BlankFrames::new()),
        vec![adapter(&local)],
        Duration::from_millis(10),
    );

    h.engine.set_failing(true);
    for _ in 0..3 {
        assert!(h.speech.speak("warm up", SpeakOptions::default()).await.is_err());
    }
    h.engine.set_failing(false);

    let report = completed(h.controller.run_cycle().await);
    let expected = "Caution: chair very close ahead, about 1.2 meters away.";
    assert_eq!(report.announcement.as_deref(), Some(expected));

    let engine = h.engine.clone();
    assert!(wait_until(Duration::from_secs(2), || engine.finished() == vec![expected.to_string()]).await);
    assert_eq!(engine.params().last().map(|p| p.rate), Some(1.0));
}

#[tokio::test]
async fn test_run_loop_until_stopped() {
    let local = Arc::new(ScriptedAdapter::returning(DetectionSource::Local, chair_ahead()));
    let frames = BlankFrames::new();
    let served: Arc<AtomicUsize> = frames.served.clone();
    let mut config = test_config();
    config.cycle.desktop_interval_ms = 20;
    let h = harness_with(
        config,
        desktop(),
        Box::new(frames),
        vec![adapter(&local)],
        Duration::from_millis(10),
    );

    let engine = h.engine.clone();
    let mut controller = h.controller;
    let handle = controller.handle();
    let task = tokio::spawn(async move {
        let result = controller.run().await;
        (result, controller)
    });

    assert!(wait_until(Duration::from_secs(2), || served.load(Ordering::SeqCst) >= 3).await);
    assert!(handle.is_running().await);
    assert!(handle.scan());

    handle.stop().await;
    let (result, controller) = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("controller stops")
        .unwrap();
    assert!(result.is_ok());
    assert!(!handle.is_running().await);
    assert!(controller.stats().cycles_completed >= 3);
    assert!(controller.history().len() <= 10);
    assert_eq!(
        engine.started().first().map(String::as_str),
        Some(READY_ANNOUNCEMENT)
    );
}

#[tokio::test]
async fn test_missing_local_model_never_claims_a_clear_path() {
    let local: Arc<dyn DetectionAdapter> = Arc::new(LocalModelAdapter::from_config(
        &LocalModelConfig::default(),
        DistanceEstimator::default(),
    ));
    let mut config = test_config();
    config.cycle.startup_announcement = false;
    let mut h = harness_with(
        config,
        desktop(),
        Box::new(BlankFrames::new()),
        vec![local],
        Duration::from_millis(10),
    );

    h.controller.start().await;
    for expected in 1..=3 {
        assert_eq!(
            h.controller.run_cycle().await,
            CycleOutcome::Failed {
                consecutive_failures: expected
            }
        );
    }

    let titles = h.titles();
    assert!(titles.contains(&"Object detection unavailable".to_string()));
    assert!(titles.contains(&"Detection Issues".to_string()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.engine.started().is_empty());
    assert_eq!(h.controller.stats().announcements, 0);
}

#[tokio::test]
async fn test_rejected_announcement_keeps_the_timer() {
    let local = Arc::new(ScriptedAdapter::returning(DetectionSource::Local, chair_ahead()));
    let mut config = test_config();
    config.speech.earcons = true;
    config.speech.requires_user_gesture = true;
    let mut h = harness_with(
        config,
        desktop(),
        Box::new(BlankFrames::new()),
        vec![adapter(&local)],
        Duration::from_millis(10),
    );

    let locked = completed(h.controller.run_cycle().await);
    assert!(locked.announcement.is_none());
    assert_eq!(h.controller.stats().announcements, 0);

    // the next cycle may speak right away once the user has interacted
    h.speech.unlock();
    let unlocked = completed(h.controller.run_cycle().await);
    assert_eq!(unlocked.announcement.as_deref(), Some("chair ahead, pass around"));
    assert_eq!(h.controller.stats().announcements, 1);

    let engine = h.engine.clone();
    assert!(
        wait_until(Duration::from_secs(3), || {
            engine.finished() == vec!["chair ahead, pass around".to_string()]
        })
        .await
    );
}
