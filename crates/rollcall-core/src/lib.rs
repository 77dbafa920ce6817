//! rollcall-core — Landmark-geometry face matching and attendance deduplication.
//!
//! Faces are compared by three landmark distance ratios rather than learned
//! embeddings. Landmark detection is delegated to an external detector
//! behind [`LandmarkDetector`].

pub mod attendance;
pub mod config;
pub mod detector;
pub mod matcher;
pub mod signature;
pub mod types;

pub use attendance::{record_attendance, AttendanceLog, AttendanceOutcome};
pub use config::{Config, ConfigError};
pub use detector::{DetectorError, LandmarkDetector, SidecarDetector};
pub use matcher::{is_same_face, IdentityMatcher, MatchOutcome, MATCH_THRESHOLD};
pub use signature::{extract_signature, signature_of, Unusable};
pub use types::{
    AttendanceMark, FaceDetection, FaceFrame, IdentityRecord, LandmarkName, LandmarkPoint,
    Landmarks, Signature,
};
