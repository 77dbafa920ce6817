//! rollcall-hw — Capture devices for the scanner.
//!
//! Provides V4L2 camera capture to image files and a directory replay
//! source with the same shape: each capture yields the path of an image.

pub mod camera;
pub mod frame;
pub mod replay;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use replay::{ReplayCapture, ReplayError};
