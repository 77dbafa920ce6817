//! Landmark detector seam and the sidecar-file detector.
//!
//! Landmark detection itself runs outside this workspace. The detector
//! tool writes its result next to each image as `<image file name>.json`:
//! a JSON array of faces, each with a `frame` and named `landmarks`.

use crate::types::FaceDetection;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("image not found: {0}")]
    ImageNotFound(PathBuf),
    #[error("failed to read landmarks for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed landmark file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Image → detected faces. An empty result means "no face"; errors are
/// reserved for I/O-level failure.
pub trait LandmarkDetector: Send + Sync {
    fn detect(&self, image: &Path) -> Result<Vec<FaceDetection>, DetectorError>;
}

impl<D: LandmarkDetector + ?Sized> LandmarkDetector for std::sync::Arc<D> {
    fn detect(&self, image: &Path) -> Result<Vec<FaceDetection>, DetectorError> {
        (**self).detect(image)
    }
}

/// Reads detector output from JSON sidecar files.
#[derive(Debug, Clone, Default)]
pub struct SidecarDetector {
    /// Directory holding sidecars. `None` → alongside the image.
    sidecar_dir: Option<PathBuf>,
}

impl SidecarDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            sidecar_dir: Some(dir.into()),
        }
    }

    /// Path of the sidecar for `image`.
    pub fn sidecar_path(&self, image: &Path) -> PathBuf {
        let mut file_name = image
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        file_name.push(".json");
        match &self.sidecar_dir {
            Some(dir) => dir.join(file_name),
            None => image.with_file_name(file_name),
        }
    }
}

impl LandmarkDetector for SidecarDetector {
    fn detect(&self, image: &Path) -> Result<Vec<FaceDetection>, DetectorError> {
        if !image.exists() {
            return Err(DetectorError::ImageNotFound(image.to_path_buf()));
        }

        let path = self.sidecar_path(image);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            // The tool writes nothing when it found no face.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::trace!(image = %image.display(), "no landmark sidecar");
                return Ok(Vec::new());
            }
            Err(source) => return Err(DetectorError::Io { path, source }),
        };

        let faces: Vec<FaceDetection> =
            serde_json::from_str(&raw).map_err(|source| DetectorError::Malformed {
                path: path.clone(),
                source,
            })?;

        tracing::trace!(image = %image.display(), faces = faces.len(), "landmarks loaded");
        Ok(faces)
    }
}
