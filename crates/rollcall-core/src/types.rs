use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A 2D landmark coordinate in image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
}

impl LandmarkPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &LandmarkPoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned bounding box of a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceFrame {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// The six landmarks a signature is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LandmarkName {
    LeftEye,
    RightEye,
    NoseBase,
    MouthLeft,
    MouthRight,
    MouthBottom,
}

impl LandmarkName {
    pub const ALL: [LandmarkName; 6] = [
        LandmarkName::LeftEye,
        LandmarkName::RightEye,
        LandmarkName::NoseBase,
        LandmarkName::MouthLeft,
        LandmarkName::MouthRight,
        LandmarkName::MouthBottom,
    ];

    /// Key used by the landmark detector's JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            LandmarkName::LeftEye => "leftEye",
            LandmarkName::RightEye => "rightEye",
            LandmarkName::NoseBase => "noseBase",
            LandmarkName::MouthLeft => "mouthLeft",
            LandmarkName::MouthRight => "mouthRight",
            LandmarkName::MouthBottom => "mouthBottom",
        }
    }
}

impl fmt::Display for LandmarkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named landmarks of one detected face. Any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Landmarks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_eye: Option<LandmarkPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_eye: Option<LandmarkPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nose_base: Option<LandmarkPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouth_left: Option<LandmarkPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouth_right: Option<LandmarkPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouth_bottom: Option<LandmarkPoint>,
}

impl Landmarks {
    pub fn get(&self, name: LandmarkName) -> Option<LandmarkPoint> {
        match name {
            LandmarkName::LeftEye => self.left_eye,
            LandmarkName::RightEye => self.right_eye,
            LandmarkName::NoseBase => self.nose_base,
            LandmarkName::MouthLeft => self.mouth_left,
            LandmarkName::MouthRight => self.mouth_right,
            LandmarkName::MouthBottom => self.mouth_bottom,
        }
    }

    pub fn set(&mut self, name: LandmarkName, point: Option<LandmarkPoint>) {
        let slot = match name {
            LandmarkName::LeftEye => &mut self.left_eye,
            LandmarkName::RightEye => &mut self.right_eye,
            LandmarkName::NoseBase => &mut self.nose_base,
            LandmarkName::MouthLeft => &mut self.mouth_left,
            LandmarkName::MouthRight => &mut self.mouth_right,
            LandmarkName::MouthBottom => &mut self.mouth_bottom,
        };
        *slot = point;
    }
}

/// One face reported by the landmark detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub frame: FaceFrame,
    #[serde(default)]
    pub landmarks: Landmarks,
}

/// Scale- and translation-invariant landmark ratios of a face.
///
/// Each component is a distance divided by the inter-eye distance.
/// Values are only ever produced by [`crate::signature::extract_signature`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    eye_nose: f32,
    nose_mouth: f32,
    mouth_width: f32,
}

impl Signature {
    pub(crate) fn new(eye_nose: f32, nose_mouth: f32, mouth_width: f32) -> Self {
        Self {
            eye_nose,
            nose_mouth,
            mouth_width,
        }
    }

    pub fn eye_nose(&self) -> f32 {
        self.eye_nose
    }

    pub fn nose_mouth(&self) -> f32 {
        self.nose_mouth
    }

    pub fn mouth_width(&self) -> f32 {
        self.mouth_width
    }

    /// Sum of absolute componentwise differences (L1 distance).
    ///
    /// A non-finite component on either side contributes zero difference
    /// instead of poisoning the whole comparison.
    pub fn distance(&self, other: &Signature) -> f32 {
        component_diff(self.eye_nose, other.eye_nose)
            + component_diff(self.nose_mouth, other.nose_mouth)
            + component_diff(self.mouth_width, other.mouth_width)
    }
}

fn component_diff(a: f32, b: f32) -> f32 {
    if a.is_finite() && b.is_finite() {
        (a - b).abs()
    } else {
        0.0
    }
}

/// A registered person, re-derived from its reference image on every match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub worker_id: String,
    pub name: String,
    pub photo_path: PathBuf,
    pub enrolled_at: DateTime<Local>,
}

/// One attendance entry for a person on a calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceMark {
    pub id: String,
    pub name: String,
    pub date: NaiveDate,
    pub timestamp: DateTime<Local>,
}
