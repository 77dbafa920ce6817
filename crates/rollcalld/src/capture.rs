use rollcall_core::Config;
use rollcall_hw::{Camera, CameraError, ReplayCapture, ReplayError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("replay: {0}")]
    Replay(#[from] ReplayError),
}

/// A device that yields one image file per capture.
///
/// Owned exclusively by the scanner; at most one capture is in progress.
pub trait CaptureDevice: Send + 'static {
    fn capture(&mut self) -> Result<PathBuf, CaptureError>;

    /// Called once per captured image when the cycle is done with it.
    fn release(&mut self, _image: &Path) {}
}

impl CaptureDevice for Camera {
    fn capture(&mut self) -> Result<PathBuf, CaptureError> {
        Ok(self.capture_to_file()?)
    }

    fn release(&mut self, image: &Path) {
        self.discard_capture(image);
    }
}

impl CaptureDevice for ReplayCapture {
    fn capture(&mut self) -> Result<PathBuf, CaptureError> {
        Ok(self.next_image())
    }
}

/// One opened device handed to successive scan sessions.
#[derive(Clone)]
pub struct SharedDevice(Arc<Mutex<Box<dyn CaptureDevice>>>);

impl SharedDevice {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self(Arc::new(Mutex::new(device)))
    }
}

impl CaptureDevice for SharedDevice {
    fn capture(&mut self) -> Result<PathBuf, CaptureError> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .capture()
    }

    fn release(&mut self, image: &Path) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(image)
    }
}

/// Open the configured capture source. Errors here are fatal at start-up
/// (missing device, permission denied), never per tick.
pub fn open(config: &Config) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    if let Some(dir) = &config.replay_dir {
        return Ok(Box::new(ReplayCapture::open(dir)?));
    }

    let camera = Camera::open(&config.camera_device, &config.capture_dir)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    if config.warmup_frames > 0 {
        tracing::info!(count = config.warmup_frames, "discarding warmup frames");
        camera.discard_frames(config.warmup_frames);
    }

    Ok(Box::new(camera))
}
