//! Directory replay capture: hands out pre-recorded images in a loop.
//!
//! Stands in for a camera on kiosks without V4L2 hardware and in demos.

use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read replay directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no images in replay directory {0}")]
    Empty(PathBuf),
}

/// Cycles through the images of a directory in lexical order.
#[derive(Debug)]
pub struct ReplayCapture {
    images: Vec<PathBuf>,
    next: usize,
}

impl ReplayCapture {
    pub fn open(dir: &Path) -> Result<Self, ReplayError> {
        let io_err = |source| ReplayError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut images = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && is_image(&path) {
                images.push(path);
            }
        }
        if images.is_empty() {
            return Err(ReplayError::Empty(dir.to_path_buf()));
        }
        images.sort();
        tracing::info!(dir = %dir.display(), images = images.len(), "replay capture opened");
        Ok(Self { images, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Next image path, wrapping around at the end.
    pub fn next_image(&mut self) -> PathBuf {
        let path = self.images[self.next].clone();
        self.next = (self.next + 1) % self.images.len();
        path
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rollcall-replay-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_cycles_in_lexical_order() {
        let dir = scratch_dir("cycle");
        for name in ["b.jpg", "a.PNG", "notes.txt", "a.png.json"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let mut replay = ReplayCapture::open(&dir).unwrap();
        assert_eq!(replay.len(), 2);
        assert_eq!(replay.next_image(), dir.join("a.PNG"));
        assert_eq!(replay.next_image(), dir.join("b.jpg"));
        assert_eq!(replay.next_image(), dir.join("a.PNG"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_empty_dir_is_error() {
        let dir = scratch_dir("empty");
        assert!(matches!(ReplayCapture::open(&dir), Err(ReplayError::Empty(_))));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_dir_is_error() {
        let err = ReplayCapture::open(Path::new("/nonexistent/rollcall-replay")).unwrap_err();
        assert!(matches!(err, ReplayError::Io { .. }));
    }
}
