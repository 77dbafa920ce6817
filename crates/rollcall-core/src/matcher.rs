//! Identity matching against the registry.
//!
//! A probe is compared against every registered identity in store order,
//! re-detecting each reference image on every call. The first identity
//! whose signature lies within [`MATCH_THRESHOLD`] wins; the scan does not
//! look for a closer one.

use crate::detector::{DetectorError, LandmarkDetector};
use crate::signature::{extract_signature, Unusable};
use crate::types::{FaceDetection, IdentityRecord, Signature};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Summed absolute signature difference below which two faces are the same person.
pub const MATCH_THRESHOLD: f32 = 0.15;

/// Outcome of matching one probe image.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(IdentityRecord),
    /// Probe had a face but no identity was within threshold. Also returned
    /// when the probe's face is unusable (missing landmarks).
    NoMatch,
    /// Probe had no detected face at all; the registry was not scanned.
    NoFaceDetected,
}

/// True when two signatures are within [`MATCH_THRESHOLD`] (strictly).
pub fn is_same_face(a: &Signature, b: &Signature) -> bool {
    a.distance(b) < MATCH_THRESHOLD
}

/// Matches probe images against registered identities.
pub struct IdentityMatcher<D> {
    detector: D,
    cache: Option<SignatureCache>,
}

impl<D: LandmarkDetector> IdentityMatcher<D> {
    /// Matcher that recomputes every reference signature on each call.
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            cache: None,
        }
    }

    /// Matcher that memoises reference signatures by image path.
    ///
    /// Opt-in: a reference image replaced on disk under the same path keeps
    /// its old signature until [`invalidate`](Self::invalidate) is called.
    pub fn with_cache(detector: D) -> Self {
        Self {
            detector,
            cache: Some(SignatureCache::default()),
        }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn caching(&self) -> bool {
        self.cache.is_some()
    }

    /// Drop the cached signature for one reference image.
    pub fn invalidate(&self, path: &Path) {
        if let Some(cache) = &self.cache {
            cache.remove(path);
        }
    }

    /// Drop every cached signature.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Detect the probe and compare it against `records` in order.
    ///
    /// Only a detector failure on the probe itself is an error; reference
    /// images that fail, have no face, or have an unusable face are skipped.
    pub fn match_face(
        &self,
        probe: &Path,
        records: &[IdentityRecord],
    ) -> Result<MatchOutcome, DetectorError> {
        let faces = self.detector.detect(probe)?;
        Ok(self.match_detections(&faces, records))
    }

    /// Compare an already-detected probe against `records`.
    pub fn match_detections(
        &self,
        probe_faces: &[FaceDetection],
        records: &[IdentityRecord],
    ) -> MatchOutcome {
        if probe_faces.is_empty() {
            return MatchOutcome::NoFaceDetected;
        }
        if probe_faces.len() > 1 {
            tracing::warn!(faces = probe_faces.len(), "multiple faces in probe; using the first");
        }

        let probe_sig = match extract_signature(probe_faces) {
            Ok(sig) => sig,
            Err(reason) => {
                tracing::debug!(%reason, "probe face unusable; treating as no match");
                return MatchOutcome::NoMatch;
            }
        };

        for record in records {
            let Some(reference) = self.reference_signature(record) else {
                continue;
            };
            let diff = probe_sig.distance(&reference);
            tracing::trace!(worker_id = %record.worker_id, diff, "compared");
            if diff < MATCH_THRESHOLD {
                tracing::debug!(worker_id = %record.worker_id, name = %record.name, diff, "matched");
                return MatchOutcome::Matched(record.clone());
            }
        }

        MatchOutcome::NoMatch
    }

    fn reference_signature(&self, record: &IdentityRecord) -> Option<Signature> {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&record.photo_path)) {
            return cached;
        }

        let computed = match self.detector.detect(&record.photo_path) {
            Ok(faces) => match extract_signature(&faces) {
                Ok(sig) => Some(sig),
                Err(Unusable::NoFace) => {
                    tracing::debug!(worker_id = %record.worker_id, "no face in reference image; skipping");
                    None
                }
                Err(reason) => {
                    tracing::debug!(worker_id = %record.worker_id, %reason, "reference face unusable; skipping");
                    None
                }
            },
            Err(e) => {
                // Not cached: the next call retries the read.
                tracing::warn!(worker_id = %record.worker_id, error = %e, "reference detection failed; skipping");
                return None;
            }
        };

        if let Some(cache) = &self.cache {
            cache.insert(record.photo_path.clone(), computed);
        }
        computed
    }
}

/// Reference signatures keyed by image path. `None` records an image
/// that had no usable face.
#[derive(Default)]
struct SignatureCache {
    entries: Mutex<HashMap<PathBuf, Option<Signature>>>,
}

impl SignatureCache {
    fn get(&self, path: &Path) -> Option<Option<Signature>> {
        self.entries.lock().ok()?.get(path).copied()
    }

    fn insert(&self, path: PathBuf, sig: Option<Signature>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(path, sig);
        }
    }

    fn remove(&self, path: &Path) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(path);
        }
    }

    fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::signature_of;
    use crate::signature::tests::sample_face;
    use crate::types::LandmarkPoint;
    use chrono::Local;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory detector keyed by image path, counting calls.
    #[derive(Default)]
    struct FakeDetector {
        faces: HashMap<PathBuf, Vec<FaceDetection>>,
        failing: Vec<PathBuf>,
        calls: AtomicUsize,
    }

    impl FakeDetector {
        fn with(mut self, path: &str, faces: Vec<FaceDetection>) -> Self {
            self.faces.insert(PathBuf::from(path), faces);
            self
        }

        fn failing(mut self, path: &str) -> Self {
            self.failing.push(PathBuf::from(path));
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl LandmarkDetector for FakeDetector {
        fn detect(&self, image: &Path) -> Result<Vec<FaceDetection>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.iter().any(|p| p == image) {
                return Err(DetectorError::ImageNotFound(image.to_path_buf()));
            }
            Ok(self.faces.get(image).cloned().unwrap_or_default())
        }
    }

    fn record(worker_id: &str, name: &str, path: &str) -> IdentityRecord {
        IdentityRecord {
            worker_id: worker_id.into(),
            name: name.into(),
            photo_path: PathBuf::from(path),
            enrolled_at: Local::now(),
        }
    }

    /// Sample face with the nose moved down by `dy` pixels.
    fn nose_shifted(dy: f32) -> FaceDetection {
        let mut face = sample_face();
        let nose = face.landmarks.nose_base.unwrap();
        face.landmarks.nose_base = Some(LandmarkPoint::new(nose.x, nose.y + dy));
        face
    }

    fn matched_name(outcome: &MatchOutcome) -> Option<&str> {
        match outcome {
            MatchOutcome::Matched(r) => Some(r.name.as_str()),
            _ => None,
        }
    }

    #[test]
    fn test_self_match() {
        let det = FakeDetector::default()
            .with("probe.jpg", vec![sample_face()])
            .with("alice.jpg", vec![sample_face()]);
        let matcher = IdentityMatcher::new(det);
        let out = matcher
            .match_face(Path::new("probe.jpg"), &[record("w1", "Alice", "alice.jpg")])
            .unwrap();
        assert_eq!(matched_name(&out), Some("Alice"));
    }

    #[test]
    fn test_threshold_is_strict() {
        let a = Signature::new(1.0, 1.0, 1.0);
        assert!(is_same_face(&a, &Signature::new(1.149, 1.0, 1.0)));
        assert!(!is_same_face(&a, &Signature::new(1.151, 1.0, 1.0)));

        // Exactly on the threshold does not match.
        let b = Signature::new(0.0, 0.75, 0.8);
        let c = Signature::new(MATCH_THRESHOLD, 0.75, 0.8);
        assert_eq!(b.distance(&c), MATCH_THRESHOLD);
        assert!(!is_same_face(&b, &c));
    }

    #[test]
    fn test_scenario_within_threshold() {
        // Moving the nose changes eye_nose and nose_mouth; pick a shift that
        // lands the L1 difference under the threshold.
        let shifted = nose_shifted(2.0);
        let diff = signature_of(&sample_face())
            .unwrap()
            .distance(&signature_of(&shifted).unwrap());
        assert!(diff > 0.0 && diff < MATCH_THRESHOLD, "diff = {diff}");

        let det = FakeDetector::default()
            .with("probe.jpg", vec![shifted])
            .with("alice.jpg", vec![sample_face()]);
        let out = IdentityMatcher::new(det)
            .match_face(Path::new("probe.jpg"), &[record("w1", "Alice", "alice.jpg")])
            .unwrap();
        assert_eq!(matched_name(&out), Some("Alice"));
    }

    #[test]
    fn test_far_face_does_not_match() {
        let far = nose_shifted(25.0);
        let diff = signature_of(&sample_face())
            .unwrap()
            .distance(&signature_of(&far).unwrap());
        assert!(diff >= MATCH_THRESHOLD, "diff = {diff}");

        let det = FakeDetector::default()
            .with("probe.jpg", vec![far])
            .with("alice.jpg", vec![sample_face()]);
        let out = IdentityMatcher::new(det)
            .match_face(Path::new("probe.jpg"), &[record("w1", "Alice", "alice.jpg")])
            .unwrap();
        assert_eq!(out, MatchOutcome::NoMatch);
    }

    #[test]
    fn test_no_face_in_probe_skips_registry() {
        let det = FakeDetector::default().with("alice.jpg", vec![sample_face()]);
        let matcher = IdentityMatcher::new(det);
        let out = matcher
            .match_face(Path::new("probe.jpg"), &[record("w1", "Alice", "alice.jpg")])
            .unwrap();
        assert_eq!(out, MatchOutcome::NoFaceDetected);
        assert_eq!(matcher.detector().calls(), 1);
    }

    #[test]
    fn test_unusable_probe_is_reported_as_no_match() {
        // A face without a mouth-bottom landmark is not distinguished from a
        // genuine non-match; only an empty detection yields NoFaceDetected.
        let mut partial = sample_face();
        partial.landmarks.mouth_bottom = None;
        let det = FakeDetector::default()
            .with("probe.jpg", vec![partial])
            .with("alice.jpg", vec![sample_face()]);
        let out = IdentityMatcher::new(det)
            .match_face(Path::new("probe.jpg"), &[record("w1", "Alice", "alice.jpg")])
            .unwrap();
        assert_eq!(out, MatchOutcome::NoMatch);
    }

    #[test]
    fn test_empty_registry() {
        let det = FakeDetector::default().with("probe.jpg", vec![sample_face()]);
        let out = IdentityMatcher::new(det)
            .match_face(Path::new("probe.jpg"), &[])
            .unwrap();
        assert_eq!(out, MatchOutcome::NoMatch);
    }

    #[test]
    fn test_first_match_wins() {
        // Bob is an exact match but Alice comes first and is within threshold.
        let det = FakeDetector::default()
            .with("probe.jpg", vec![sample_face()])
            .with("alice.jpg", vec![nose_shifted(2.0)])
            .with("bob.jpg", vec![sample_face()]);
        let out = IdentityMatcher::new(det)
            .match_face(
                Path::new("probe.jpg"),
                &[record("w1", "Alice", "alice.jpg"), record("w2", "Bob", "bob.jpg")],
            )
            .unwrap();
        assert_eq!(matched_name(&out), Some("Alice"));
    }

    #[test]
    fn test_unusable_and_failing_references_are_skipped() {
        let mut partial = sample_face();
        partial.landmarks.left_eye = None;
        let det = FakeDetector::default()
            .with("probe.jpg", vec![sample_face()])
            .with("blank.jpg", vec![])
            .with("partial.jpg", vec![partial])
            .with("carol.jpg", vec![sample_face()])
            .failing("gone.jpg");
        let out = IdentityMatcher::new(det)
            .match_face(
                Path::new("probe.jpg"),
                &[
                    record("w1", "Blank", "blank.jpg"),
                    record("w2", "Partial", "partial.jpg"),
                    record("w3", "Gone", "gone.jpg"),
                    record("w4", "Carol", "carol.jpg"),
                ],
            )
            .unwrap();
        assert_eq!(matched_name(&out), Some("Carol"));
    }

    #[test]
    fn test_probe_detector_failure_propagates() {
        let det = FakeDetector::default().failing("probe.jpg");
        let err = IdentityMatcher::new(det)
            .match_face(Path::new("probe.jpg"), &[])
            .unwrap_err();
        assert!(matches!(err, DetectorError::ImageNotFound(_)));
    }

    #[test]
    fn test_recomputes_references_every_call() {
        let det = FakeDetector::default()
            .with("probe.jpg", vec![nose_shifted(25.0)])
            .with("alice.jpg", vec![sample_face()]);
        let matcher = IdentityMatcher::new(det);
        let records = [record("w1", "Alice", "alice.jpg")];
        matcher.match_face(Path::new("probe.jpg"), &records).unwrap();
        matcher.match_face(Path::new("probe.jpg"), &records).unwrap();
        // probe + reference, twice
        assert_eq!(matcher.detector().calls(), 4);
        assert!(!matcher.caching());
    }

    #[test]
    fn test_cache_reuses_reference_signatures() {
        let det = FakeDetector::default()
            .with("probe.jpg", vec![nose_shifted(25.0)])
            .with("alice.jpg", vec![sample_face()])
            .with("blank.jpg", vec![]);
        let matcher = IdentityMatcher::with_cache(det);
        let records = [record("w0", "Blank", "blank.jpg"), record("w1", "Alice", "alice.jpg")];
        matcher.match_face(Path::new("probe.jpg"), &records).unwrap();
        assert_eq!(matcher.detector().calls(), 3);
        matcher.match_face(Path::new("probe.jpg"), &records).unwrap();
        assert_eq!(matcher.detector().calls(), 4);

        matcher.invalidate(Path::new("alice.jpg"));
        matcher.match_face(Path::new("probe.jpg"), &records).unwrap();
        assert_eq!(matcher.detector().calls(), 6);

        matcher.clear_cache();
        matcher.match_face(Path::new("probe.jpg"), &records).unwrap();
        assert_eq!(matcher.detector().calls(), 9);
    }
}
