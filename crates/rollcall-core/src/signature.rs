//! Landmark signature extraction.
//!
//! Landmarks are re-centred on the face frame and divided by the frame
//! width, then reduced to three distance ratios over the inter-eye
//! distance. Every ratio is a Euclidean distance over a Euclidean
//! distance, so the result is invariant to uniform translation, scale and
//! rigid in-plane rotation of all six landmarks. It is not pose-normalised
//! otherwise: a turned head (yaw) or landmarks that move relative to each
//! other yield a materially different signature.

use crate::types::{FaceDetection, LandmarkName, LandmarkPoint, Signature};
use thiserror::Error;

/// Why a detection could not be turned into a signature.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum Unusable {
    #[error("no face detected")]
    NoFace,
    #[error("face frame has non-positive or non-finite geometry")]
    DegenerateFrame,
    #[error("landmark {0} missing")]
    MissingLandmark(LandmarkName),
    #[error("eye landmarks coincide")]
    CoincidentEyes,
}

/// Build a signature from the first face of a detector result.
pub fn extract_signature(detections: &[FaceDetection]) -> Result<Signature, Unusable> {
    let face = detections.first().ok_or(Unusable::NoFace)?;
    signature_of(face)
}

/// Build a signature from a single detected face.
pub fn signature_of(face: &FaceDetection) -> Result<Signature, Unusable> {
    let frame = &face.frame;
    let scale = frame.width;
    if !(scale > 0.0) || !scale.is_finite() {
        return Err(Unusable::DegenerateFrame);
    }
    let center_x = frame.left + frame.width / 2.0;
    let center_y = frame.top + frame.height / 2.0;

    let mut normalized = [LandmarkPoint::new(0.0, 0.0); 6];
    for (slot, name) in normalized.iter_mut().zip(LandmarkName::ALL) {
        let p = face
            .landmarks
            .get(name)
            .ok_or(Unusable::MissingLandmark(name))?;
        *slot = LandmarkPoint::new((p.x - center_x) / scale, (p.y - center_y) / scale);
    }
    let [left_eye, right_eye, nose, mouth_left, mouth_right, mouth_bottom] = normalized;

    let eye_dist = left_eye.distance(&right_eye);
    if eye_dist == 0.0 {
        return Err(Unusable::CoincidentEyes);
    }

    let eye_nose = nose.distance(&left_eye) / eye_dist;
    let nose_mouth = nose.distance(&mouth_bottom) / eye_dist;
    let mouth_width = mouth_left.distance(&mouth_right) / eye_dist;

    if !(eye_nose.is_finite() && nose_mouth.is_finite() && mouth_width.is_finite()) {
        return Err(Unusable::DegenerateFrame);
    }

    Ok(Signature::new(eye_nose, nose_mouth, mouth_width))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{FaceFrame, Landmarks};

    /// Frontal face in a 200x200 frame at the origin.
    pub(crate) fn sample_face() -> FaceDetection {
        face_from_points(
            FaceFrame { left: 0.0, top: 0.0, width: 200.0, height: 200.0 },
            [
                (70.0, 80.0),   // left eye
                (130.0, 80.0),  // right eye
                (100.0, 115.0), // nose base
                (75.0, 150.0),  // mouth left
                (125.0, 150.0), // mouth right
                (100.0, 160.0), // mouth bottom
            ],
        )
    }

    pub(crate) fn face_from_points(frame: FaceFrame, points: [(f32, f32); 6]) -> FaceDetection {
        let mut landmarks = Landmarks::default();
        for (name, (x, y)) in LandmarkName::ALL.into_iter().zip(points) {
            landmarks.set(name, Some(LandmarkPoint::new(x, y)));
        }
        FaceDetection { frame, landmarks }
    }

    fn transform(face: &FaceDetection, f: impl Fn(f32, f32) -> (f32, f32)) -> FaceDetection {
        let mut out = face.clone();
        for name in LandmarkName::ALL {
            let p = face.landmarks.get(name).unwrap();
            let (x, y) = f(p.x, p.y);
            out.landmarks.set(name, Some(LandmarkPoint::new(x, y)));
        }
        out
    }

    fn assert_close(a: &Signature, b: &Signature) {
        assert!((a.eye_nose() - b.eye_nose()).abs() < 1e-5, "{a:?} vs {b:?}");
        assert!((a.nose_mouth() - b.nose_mouth()).abs() < 1e-5, "{a:?} vs {b:?}");
        assert!((a.mouth_width() - b.mouth_width()).abs() < 1e-5, "{a:?} vs {b:?}");
    }

    #[test]
    fn test_sample_signature_values() {
        let sig = signature_of(&sample_face()).unwrap();
        // eye distance 60px, nose-to-left-eye sqrt(30² + 35²), nose-to-mouth 45, mouth 50
        let expected_eye_nose = (30.0f32.powi(2) + 35.0f32.powi(2)).sqrt() / 60.0;
        assert!((sig.eye_nose() - expected_eye_nose).abs() < 1e-5);
        assert!((sig.nose_mouth() - 45.0 / 60.0).abs() < 1e-5);
        assert!((sig.mouth_width() - 50.0 / 60.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_detections() {
        assert_eq!(extract_signature(&[]), Err(Unusable::NoFace));
    }

    #[test]
    fn test_uses_first_face_only() {
        let mut second = sample_face();
        second.landmarks.left_eye = None;
        let sig = extract_signature(&[sample_face(), second.clone()]).unwrap();
        assert_close(&sig, &signature_of(&sample_face()).unwrap());
        assert!(extract_signature(&[second, sample_face()]).is_err());
    }

    #[test]
    fn test_translation_and_scale_invariance() {
        let base = sample_face();
        let base_sig = signature_of(&base).unwrap();

        let (k, dx, dy) = (2.5f32, 340.0f32, -75.0f32);
        let mut moved = transform(&base, |x, y| (x * k + dx, y * k + dy));
        moved.frame = FaceFrame {
            left: base.frame.left * k + dx,
            top: base.frame.top * k + dy,
            width: base.frame.width * k,
            height: base.frame.height * k,
        };
        assert_close(&base_sig, &signature_of(&moved).unwrap());
    }

    #[test]
    fn test_head_turn_changes_signature() {
        let base = sample_face();
        let base_sig = signature_of(&base).unwrap();

        // Yaw the head 25° about the vertical axis through the frame centre
        // and project orthographically. Depth per landmark, in pixels.
        let depth = [0.0f32, 0.0, 35.0, 8.0, 8.0, 10.0];
        let theta = 25.0f32.to_radians();
        let mut turned = base.clone();
        for (name, z) in LandmarkName::ALL.into_iter().zip(depth) {
            let p = base.landmarks.get(name).unwrap();
            let x = 100.0 + (p.x - 100.0) * theta.cos() + z * theta.sin();
            turned.landmarks.set(name, Some(LandmarkPoint::new(x, p.y)));
        }

        let turned_sig = signature_of(&turned).unwrap();
        let changed = (base_sig.eye_nose() - turned_sig.eye_nose()).abs() > 1e-3
            || (base_sig.nose_mouth() - turned_sig.nose_mouth()).abs() > 1e-3
            || (base_sig.mouth_width() - turned_sig.mouth_width()).abs() > 1e-3;
        assert!(changed, "{base_sig:?} vs {turned_sig:?}");
    }

    #[test]
    fn test_rigid_rotation_keeps_signature() {
        let base = sample_face();
        let theta = 0.6f32;
        let rotated = transform(&base, |x, y| {
            let (rx, ry) = (x - 100.0, y - 100.0);
            (
                100.0 + rx * theta.cos() - ry * theta.sin(),
                100.0 + rx * theta.sin() + ry * theta.cos(),
            )
        });
        let base_sig = signature_of(&base).unwrap();
        let rotated_sig = signature_of(&rotated).unwrap();
        assert_close(&base_sig, &rotated_sig);
        assert!(base_sig.distance(&rotated_sig) < 1e-4);
    }

    #[test]
    fn test_mouth_rotated_against_eyes_changes_signature() {
        // Only the mouth points roll; the eye-nose geometry stays put.
        let base = sample_face();
        let base_sig = signature_of(&base).unwrap();
        let theta = 0.5f32;
        let tilted = transform(&base, |x, y| {
            if y > 140.0 {
                let (rx, ry) = (x - 100.0, y - 100.0);
                (
                    100.0 + rx * theta.cos() - ry * theta.sin(),
                    100.0 + rx * theta.sin() + ry * theta.cos(),
                )
            } else {
                (x, y)
            }
        });
        assert!(base_sig.distance(&signature_of(&tilted).unwrap()) > 1e-3);
    }

    #[test]
    fn test_each_missing_landmark_is_unusable() {
        for name in LandmarkName::ALL {
            let mut face = sample_face();
            face.landmarks.set(name, None);
            assert_eq!(signature_of(&face), Err(Unusable::MissingLandmark(name)));
        }
    }

    #[test]
    fn test_zero_width_frame() {
        let mut face = sample_face();
        face.frame.width = 0.0;
        assert_eq!(signature_of(&face), Err(Unusable::DegenerateFrame));
        face.frame.width = -10.0;
        assert_eq!(signature_of(&face), Err(Unusable::DegenerateFrame));
        face.frame.width = f32::NAN;
        assert_eq!(signature_of(&face), Err(Unusable::DegenerateFrame));
    }

    #[test]
    fn test_coincident_eyes() {
        let mut face = sample_face();
        face.landmarks.right_eye = face.landmarks.left_eye;
        assert_eq!(signature_of(&face), Err(Unusable::CoincidentEyes));
    }

    #[test]
    fn test_deterministic() {
        let a = signature_of(&sample_face()).unwrap();
        let b = signature_of(&sample_face()).unwrap();
        assert_eq!(a, b);
    }
}
