//! V4L2 camera capture via the `v4l` crate.
//!
//! Each capture grabs one frame, converts it to greyscale and writes it as
//! a PNG into the capture directory, so the external landmark detector can
//! read it like any other photo.

use crate::frame::{self, Frame, FrameError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const DARK_FRAME_THRESHOLD: f32 = 0.95;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("frame too dark")]
    DarkFrame,
    #[error("capture directory {path}: {source}")]
    CaptureDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit greyscale.
    Grey,
    /// 16-bit little-endian greyscale.
    Y16,
}

/// V4L2 camera that saves each captured frame to disk.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    capture_dir: PathBuf,
}

impl Camera {
    /// Open a V4L2 camera (e.g. "/dev/video0") writing captures into `capture_dir`.
    pub fn open(device_path: &str, capture_dir: &Path) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(device_path.to_string())
            }
            _ if e.to_string().contains("busy") || e.to_string().contains("EBUSY") => {
                CameraError::DeviceBusy
            }
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        std::fs::create_dir_all(capture_dir).map_err(|source| CameraError::CaptureDir {
            path: capture_dir.to_path_buf(),
            source,
        })?;

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
            capture_dir: capture_dir.to_path_buf(),
        })
    }

    /// Capture a single greyscale frame.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        Ok(Frame {
            data: self.buf_to_grayscale(buf)?,
            width: self.width,
            height: self.height,
            sequence: meta.sequence,
        })
    }

    /// Capture one frame and write it to the capture directory.
    ///
    /// Dark frames (lens covered, emitter warm-up) are rejected rather than
    /// handed to the detector.
    pub fn capture_to_file(&self) -> Result<PathBuf, CameraError> {
        let frame = self.capture_frame()?;
        if frame::is_dark_frame(&frame.data, DARK_FRAME_THRESHOLD) {
            tracing::debug!(seq = frame.sequence, "dark frame");
            return Err(CameraError::DarkFrame);
        }

        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let path = self
            .capture_dir
            .join(format!("capture-{millis}-{}.png", frame.sequence));
        frame.save_png(&path)?;
        tracing::trace!(path = %path.display(), brightness = frame.avg_brightness(), "frame saved");
        Ok(path)
    }

    /// Delete a file written by [`capture_to_file`](Self::capture_to_file)
    /// along with any landmark sidecar the detector tool left next to it.
    pub fn discard_capture(&self, path: &Path) {
        remove_capture(&self.capture_dir, path);
    }

    /// Capture and throw away `count` frames while auto-exposure settles.
    pub fn discard_frames(&self, count: usize) {
        for _ in 0..count {
            if let Err(e) = self.capture_frame() {
                tracing::debug!(error = %e, "warmup capture failed");
            }
        }
    }

    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;
        let gray = match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::Frame(FrameError::InvalidLength {
                        expected: pixels,
                        actual: buf.len(),
                    }));
                }
                buf[..pixels].to_vec()
            }
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height)?,
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height)?,
        };
        Ok(gray)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// Paths outside `capture_dir` are left alone.
fn remove_capture(capture_dir: &Path, path: &Path) {
    if path.parent() != Some(capture_dir) {
        tracing::warn!(path = %path.display(), "not a capture file; keeping it");
        return;
    }
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!(path = %path.display(), error = %e, "failed to remove capture");
    }
    let mut sidecar = path.as_os_str().to_os_string();
    sidecar.push(".json");
    let _ = std::fs::remove_file(sidecar);
}
