use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use echovision::camera::{CameraConfig, CameraSystem, FrameSource, ImageFileSource};
use echovision::config::{DeviceInfo, EchoVisionConfig};
use echovision::controller::{CycleOutcome, FrameCycleController};
use echovision::detection::DetectionSource;
use echovision::distance::DistanceEstimator;
use echovision::fusion::FusionPolicy;
use echovision::notify::Notifier;
use echovision::sources::{CloudAdapter, LocalModelAdapter};
use echovision::speech::{self, SpeechScheduler};

#[derive(Parser)]
#[command(name = "echovision")]
#[command(about = "Spoken obstacle guidance from a camera feed")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "echovision.toml")]
    config: String,

    /// Camera device index
    #[arg(short = 'd', long, default_value = "0")]
    camera_device: u32,

    /// Replay an image file or a directory of images instead of the camera
    #[arg(short, long)]
    images: Option<PathBuf>,

    /// Detection source to try first: local, cloud, azure or deepseek
    #[arg(short, long)]
    provider: Option<DetectionSource>,

    /// Route detection through the cloud service first
    #[arg(long)]
    cloud: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// List available cameras and exit
    #[arg(long)]
    list_cameras: bool,

    /// Run a single scan and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(format!("echovision={}", log_level))
        .try_init(); // Use try_init to avoid panic if already initialized

    info!("Starting EchoVision - spoken navigation guidance");

    if args.list_cameras {
        let cameras = tokio::task::spawn_blocking(CameraSystem::detect_cameras).await?;
        if cameras.is_empty() {
            info!("No cameras detected");
        }
        for id in cameras {
            info!("Camera {}", id);
        }
        return Ok(());
    }

    let mut config = EchoVisionConfig::load(&args.config).await?;
    if let Some(provider) = args.provider {
        config.settings.preferred_provider = Some(provider);
    }
    if args.cloud {
        config.settings.use_cloud_detection = true;
    }
    info!("Configuration loaded successfully");

    let device = DeviceInfo::detect(&config.device);
    let (notifier, mut notifications) = Notifier::channel();
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            info!("🔔 [{:?}] {}", notification.severity, notification.title);
        }
    });

    let fusion = Arc::new(build_fusion(&config, &device, notifier.clone())?);
    let engine = speech::build_engine(&config);
    let speech = Arc::new(SpeechScheduler::new(
        engine,
        config.speech.clone(),
        notifier.clone(),
    ));
    let frames = open_frames(&args).await?;

    let mut controller =
        FrameCycleController::new(frames, fusion, speech, &config, device, notifier);

    if args.once {
        controller.start().await;
        match controller.manual_scan().await {
            CycleOutcome::Completed(report) => {
                info!("Source: {}", report.source);
                for object in &report.detections {
                    info!(
                        "{} ({:.0}%) {} at {:.1} m",
                        object.label,
                        object.confidence * 100.0,
                        object.position().phrase(),
                        object.distance.unwrap_or_default()
                    );
                }
                if let Some(text) = report.announcement {
                    info!("Announcement: {}", text);
                }
            }
            other => warn!("Scan did not complete: {:?}", other),
        }
        // let the announcement play out
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        return Ok(());
    }

    let handle = controller.handle();
    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            ctrl_c.stop().await;
        }
    });

    // Enter on stdin triggers a manual scan
    let scanner = handle.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            if !scanner.scan() {
                break;
            }
        }
    });

    match controller.run().await {
        Ok(_) => info!("EchoVision stopped"),
        Err(e) => {
            error!("Controller error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}

fn build_fusion(
    config: &EchoVisionConfig,
    device: &DeviceInfo,
    notifier: Notifier,
) -> Result<FusionPolicy> {
    let estimator = DistanceEstimator::new(config.distance.clone());
    let local = LocalModelAdapter::from_config(&config.sources.local, estimator.clone());

    let mut fusion = FusionPolicy::from_config(&config.detection, device, notifier)
        .with_failure_threshold(config.cycle.failure_threshold)
        .with_adapter(Arc::new(local));

    for source in [
        DetectionSource::Cloud,
        DetectionSource::Azure,
        DetectionSource::Deepseek,
    ] {
        if let Some(endpoint) = config.sources.endpoint(source) {
            let adapter = CloudAdapter::new(source, endpoint.clone(), estimator.clone())
                .with_context(|| format!("failed to set up {} detection", source))?;
            fusion.register(Arc::new(adapter));
        }
    }

    Ok(fusion)
}

async fn open_frames(args: &Args) -> Result<Box<dyn FrameSource>> {
    if let Some(path) = &args.images {
        return Ok(Box::new(ImageFileSource::open(path)?));
    }

    let mut camera = CameraSystem::new(CameraConfig {
        camera_id: args.camera_device,
    });
    camera.initialize().await?;
    Ok(Box::new(camera))
}
