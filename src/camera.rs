use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use crossbeam::channel::{self, Receiver, Sender};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::path::{Path, PathBuf};
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::frame::Frame;

/// Anything that can hand the controller a fresh frame.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Frame>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub camera_id: u32,
}

enum CameraRequest {
    Capture(oneshot::Sender<Result<Frame>>),
    Stop,
}

/// Live camera input.
///
/// nokhwa cameras are not `Send`, so the device is opened and read on a
/// dedicated capture thread that serves frame requests over a channel.
pub struct CameraSystem {
    config: CameraConfig,
    requests: Option<Sender<CameraRequest>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CameraSystem {
    pub fn new(config: CameraConfig) -> Self {
        info!("Creating CameraSystem for real camera input");
        Self {
            config,
            requests: None,
            thread: None,
        }
    }

    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing camera system - scanning for available cameras");

        let available_cameras = tokio::task::spawn_blocking(Self::detect_cameras)
            .await
            .context("camera scan task failed")?;
        if available_cameras.is_empty() {
            return Err(anyhow!("No cameras detected on this system"));
        }
        info!("Found {} camera(s): {:?}", available_cameras.len(), available_cameras);

        // Try the requested camera first, then any other that was found
        let mut candidates = vec![];
        if available_cameras.contains(&self.config.camera_id) {
            candidates.push(self.config.camera_id);
        }
        candidates.extend(available_cameras.into_iter().filter(|id| *id != self.config.camera_id));

        let (tx, rx) = channel::unbounded();
        let (ready_tx, ready_rx) = oneshot::channel();
        let thread = thread::Builder::new()
            .name("echovision-camera".to_string())
            .spawn(move || capture_thread(candidates, rx, ready_tx))
            .context("failed to start camera thread")?;

        let opened = ready_rx
            .await
            .map_err(|_| anyhow!("camera thread exited during startup"))??;
        self.config.camera_id = opened;
        self.requests = Some(tx);
        self.thread = Some(thread);

        info!("Successfully initialized camera {}", opened);
        Ok(())
    }

    pub fn detect_cameras() -> Vec<u32> {
        let mut cameras = Vec::new();

        // Try camera indices 0-9 (most common range)
        for cam_id in 0..10 {
            let camera_index = CameraIndex::Index(cam_id);
            let requested_format =
                RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

            if Camera::new(camera_index, requested_format).is_ok() {
                cameras.push(cam_id);
            }
        }

        cameras
    }

    pub async fn stop(&mut self) {
        info!("Stopping camera system");
        if let Some(tx) = self.requests.take() {
            let _ = tx.send(CameraRequest::Stop);
        }
        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
    }
}

#[async_trait]
impl FrameSource for CameraSystem {
    async fn next_frame(&mut self) -> Result<Frame> {
        let tx = self
            .requests
            .as_ref()
            .ok_or_else(|| anyhow!("Camera system not initialized"))?;
        let (reply, frame) = oneshot::channel();
        tx.send(CameraRequest::Capture(reply))
            .map_err(|_| anyhow!("camera thread has stopped"))?;
        frame.await.map_err(|_| anyhow!("camera thread dropped the request"))?
    }

    fn describe(&self) -> String {
        if self.requests.is_some() {
            format!("Camera {} - Active", self.config.camera_id)
        } else {
            "No camera active".to_string()
        }
    }
}

impl Drop for CameraSystem {
    fn drop(&mut self) {
        if let Some(tx) = self.requests.take() {
            info!("CameraSystem being dropped, cleaning up");
            let _ = tx.send(CameraRequest::Stop);
        }
    }
}

fn open_camera(camera_id: u32) -> Result<Camera> {
    let requested_format =
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = Camera::new(CameraIndex::Index(camera_id), requested_format)?;
    camera.open_stream()?;

    // Test capture a frame to ensure it works
    let _test_frame = camera.frame()?;
    Ok(camera)
}

fn capture_thread(
    candidates: Vec<u32>,
    requests: Receiver<CameraRequest>,
    ready: oneshot::Sender<Result<u32>>,
) {
    let mut opened = None;
    for cam_id in candidates {
        match open_camera(cam_id) {
            Ok(camera) => {
                opened = Some((cam_id, camera));
                break;
            }
            Err(e) => warn!("Failed to initialize camera {}: {}", cam_id, e),
        }
    }

    let Some((cam_id, mut camera)) = opened else {
        let _ = ready.send(Err(anyhow!("Failed to initialize any available camera")));
        return;
    };
    let _ = ready.send(Ok(cam_id));

    while let Ok(request) = requests.recv() {
        match request {
            CameraRequest::Capture(reply) => {
                let _ = reply.send(capture_frame(&mut camera));
            }
            CameraRequest::Stop => break,
        }
    }

    match camera.stop_stream() {
        Ok(_) => info!("Camera stream stopped successfully"),
        Err(e) => warn!("Error stopping camera stream: {}", e),
    }
}

fn capture_frame(camera: &mut Camera) -> Result<Frame> {
    match camera.frame() {
        Ok(buffer) => {
            let decoded = buffer.decode_image::<RgbFormat>()?;
            let (width, height) = (decoded.width(), decoded.height());
            debug!("Captured real camera frame: {}x{}", width, height);
            Frame::from_rgb(width, height, decoded.into_raw())
        }
        Err(e) => {
            error!("Camera frame capture failed: {}", e);
            Err(anyhow!("Camera frame capture error: {}", e))
        }
    }
}

/// Replays still images from disk in a loop, for demos and offline runs.
pub struct ImageFileSource {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageFileSource {
    const EXTENSIONS: [&'static str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

    /// A single image file or every image in a directory, in name order.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let paths = if path.is_dir() {
            let mut images: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("failed to read {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| Self::is_image(p))
                .collect();
            images.sort();
            images
        } else {
            vec![path.to_path_buf()]
        };

        Self::from_paths(paths)
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Result<Self> {
        if paths.is_empty() {
            return Err(anyhow!("no images to replay"));
        }
        info!("Replaying {} image(s)", paths.len());
        Ok(Self { paths, next: 0 })
    }

    fn is_image(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| Self::EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[async_trait]
impl FrameSource for ImageFileSource {
    async fn next_frame(&mut self) -> Result<Frame> {
        let path = self.paths[self.next % self.paths.len()].clone();
        self.next = (self.next + 1) % self.paths.len();

        let image = tokio::task::spawn_blocking({
            let path = path.clone();
            move || image::open(&path)
        })
        .await
        .context("image decode task failed")?
        .with_context(|| format!("failed to open image {}", path.display()))?;

        debug!("Loaded frame from {}", path.display());
        Ok(Frame::from_image(&image))
    }

    fn describe(&self) -> String {
        format!("{} still image(s)", self.paths.len())
    }
}
