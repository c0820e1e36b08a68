//! Attendance session: Idle → Streaming → (MarkRequested | Stopped).
//!
//! A session owns its frame source exclusively. The source is acquired on
//! [`AttendanceSession::start`] and released on every way out: explicit
//! stop, a successful mark, a capture error, or drop.

use crate::encoder::FaceEncoder;
use crate::gallery::Gallery;
use crate::ledger::{self, AttendanceLedger, AttendanceRecord, LedgerError};
use crate::matcher::{EuclideanMatcher, Matcher, DEFAULT_TOLERANCE};
use crate::name::IdentityName;
use crate::types::{MatchDecision, ObservedFace};
use image::imageops::FilterType;
use image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;

/// Default down-sampling factor applied before detection.
pub const DEFAULT_DOWNSAMPLE: u32 = 4;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
    #[error("frame capture failed: {0}")]
    CaptureFailed(String),
    #[error("frame source exhausted")]
    Exhausted,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[source] SourceError),
    #[error("capture failed: {0}")]
    Capture(#[source] SourceError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("operation not valid in state {0:?}")]
    InvalidState(SessionState),
}

/// Exclusive, scoped producer of camera frames.
pub trait FrameSource {
    /// Open the underlying device. Called once per session start.
    fn acquire(&mut self) -> Result<(), SourceError>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<DynamicImage, SourceError>;

    /// Close the device. Must be safe to call repeatedly and without a prior acquire.
    fn release(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn acquire(&mut self) -> Result<(), SourceError> {
        (**self).acquire()
    }

    fn next_frame(&mut self) -> Result<DynamicImage, SourceError> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    /// A mark was requested before a known face was in view.
    MarkRequested,
    Stopped,
}

/// What a session produced for one frame, for the UI to render.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub decisions: Vec<MatchDecision>,
    pub candidate: Option<IdentityName>,
    /// Set when this frame completed a pending mark.
    pub marked: Option<AttendanceRecord>,
    /// Detection failed and the frame was skipped.
    pub skipped: bool,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Result of [`AttendanceSession::request_mark`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// Candidate was known; the ledger was updated and the session stopped.
    Marked(AttendanceRecord),
    /// No known candidate yet; the next frame with one will be marked.
    Pending,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub tolerance: f32,
    pub downsample: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            downsample: DEFAULT_DOWNSAMPLE,
        }
    }
}

pub struct AttendanceSession<E, S: FrameSource, M = EuclideanMatcher> {
    gallery: Arc<Gallery>,
    ledger: AttendanceLedger,
    encoder: E,
    source: S,
    matcher: M,
    settings: SessionSettings,
    state: SessionState,
    candidate: Option<IdentityName>,
    acquired: bool,
}

impl<E: FaceEncoder, S: FrameSource> AttendanceSession<E, S> {
    /// Session using the Euclidean arg-min matcher.
    pub fn new(
        gallery: Arc<Gallery>,
        ledger: AttendanceLedger,
        encoder: E,
        source: S,
        settings: SessionSettings,
    ) -> Self {
        Self::with_matcher(gallery, ledger, encoder, source, EuclideanMatcher, settings)
    }
}

impl<E: FaceEncoder, S: FrameSource, M: Matcher> AttendanceSession<E, S, M> {
    pub fn with_matcher(
        gallery: Arc<Gallery>,
        ledger: AttendanceLedger,
        encoder: E,
        source: S,
        matcher: M,
        settings: SessionSettings,
    ) -> Self {
        Self {
            gallery,
            ledger,
            encoder,
            source,
            matcher,
            settings,
            state: SessionState::Idle,
            candidate: None,
            acquired: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn candidate(&self) -> Option<&IdentityName> {
        self.candidate.as_ref()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Streaming | SessionState::MarkRequested)
    }

    /// Acquire the source and begin streaming.
    ///
    /// On acquisition failure the session stays Idle.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState(self.state));
        }
        if let Err(e) = self.source.acquire() {
            // Partially opened devices still get closed.
            self.source.release();
            tracing::warn!(error = %e, "could not acquire frame source");
            return Err(SessionError::CameraUnavailable(e));
        }
        self.acquired = true;
        self.state = SessionState::Streaming;
        tracing::info!(identities = self.gallery.len(), "session streaming");
        Ok(())
    }

    /// Capture, detect and match one frame.
    ///
    /// A detection failure skips the frame. A capture failure stops the
    /// session and is returned.
    pub fn process_frame(&mut self) -> Result<FrameReport, SessionError> {
        if !self.is_running() {
            return Err(SessionError::InvalidState(self.state));
        }

        let frame = match self.source.next_frame() {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = %e, "frame capture failed; stopping session");
                self.stop();
                return Err(SessionError::Capture(e));
            }
        };

        let (width, height) = (frame.width(), frame.height());
        let observed = match self.observe(&frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed; frame skipped");
                return Ok(FrameReport {
                    decisions: Vec::new(),
                    candidate: self.candidate.clone(),
                    marked: None,
                    skipped: true,
                    frame_width: width,
                    frame_height: height,
                });
            }
        };

        let decisions =
            self.matcher
                .match_faces(self.gallery.identities(), &observed, self.settings.tolerance);
        for decision in &decisions {
            self.candidate = decision.identity.clone();
        }

        let marked = if self.state == SessionState::MarkRequested && self.candidate.is_some() {
            Some(self.mark_candidate()?)
        } else {
            None
        };

        Ok(FrameReport {
            decisions,
            candidate: self.candidate.clone(),
            marked,
            skipped: false,
            frame_width: width,
            frame_height: height,
        })
    }

    /// Mark the current candidate present, or arm a mark for the next known face.
    pub fn request_mark(&mut self) -> Result<MarkOutcome, SessionError> {
        if !self.is_running() {
            return Err(SessionError::InvalidState(self.state));
        }
        if self.candidate.is_some() {
            return Ok(MarkOutcome::Marked(self.mark_candidate()?));
        }
        tracing::info!("mark requested; waiting for a known face");
        self.state = SessionState::MarkRequested;
        Ok(MarkOutcome::Pending)
    }

    /// Stop streaming and release the source. Idempotent.
    pub fn stop(&mut self) {
        if self.acquired {
            self.source.release();
            self.acquired = false;
            tracing::info!("frame source released");
        }
        self.state = SessionState::Stopped;
    }

    fn mark_candidate(&mut self) -> Result<AttendanceRecord, SessionError> {
        let Some(name) = self.candidate.clone() else {
            return Err(SessionError::InvalidState(self.state));
        };
        let result = self
            .ledger
            .mark_present(&name, ledger::today(), ledger::now_time());
        // One mark ends the session, successful or not.
        self.stop();
        Ok(result?)
    }

    fn observe(&mut self, frame: &DynamicImage) -> Result<Vec<ObservedFace>, crate::encoder::EncoderError> {
        let factor = self.settings.downsample.max(1);
        let small;
        let input = if factor > 1 {
            small = frame.resize_exact(
                (frame.width() / factor).max(1),
                (frame.height() / factor).max(1),
                FilterType::Triangle,
            );
            &small
        } else {
            frame
        };

        let faces = self.encoder.detect_and_encode(input)?;
        Ok(faces
            .into_iter()
            .map(|(bbox, embedding)| ObservedFace {
                embedding,
                bbox: bbox.scaled(factor as f32),
            })
            .collect())
    }
}

impl<E, S: FrameSource, M> Drop for AttendanceSession<E, S, M> {
    fn drop(&mut self) {
        if self.acquired {
            self.source.release();
            self.acquired = false;
            tracing::debug!("frame source released on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::testing::{face_image, PixelEncoder};
    use crate::ledger::Status;
    use crate::encoder::EncoderError;
    use crate::types::{BoundingBox, Embedding, Identity};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Counters {
        acquired: usize,
        released: usize,
    }

    struct ScriptedSource {
        frames: VecDeque<Result<DynamicImage, SourceError>>,
        fail_acquire: bool,
        counters: Rc<RefCell<Counters>>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<DynamicImage>) -> (Self, Rc<RefCell<Counters>>) {
            let counters = Rc::new(RefCell::new(Counters::default()));
            let source = Self {
                frames: frames.into_iter().map(Ok).collect(),
                fail_acquire: false,
                counters: counters.clone(),
            };
            (source, counters)
        }
    }

    impl FrameSource for ScriptedSource {
        fn acquire(&mut self) -> Result<(), SourceError> {
            if self.fail_acquire {
                return Err(SourceError::Unavailable("no device".into()));
            }
            self.counters.borrow_mut().acquired += 1;
            Ok(())
        }

        fn next_frame(&mut self) -> Result<DynamicImage, SourceError> {
            self.frames.pop_front().unwrap_or(Err(SourceError::Exhausted))
        }

        fn release(&mut self) {
            self.counters.borrow_mut().released += 1;
        }
    }

    fn gallery(entries: &[(&str, f32)]) -> Arc<Gallery> {
        Arc::new(Gallery::new(
            entries
                .iter()
                .map(|(n, v)| Identity {
                    name: IdentityName::new(n).unwrap(),
                    embedding: Embedding::new(vec![*v]),
                })
                .collect(),
        ))
    }

    fn ledger() -> (tempfile::TempDir, AttendanceLedger) {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::new(tmp.path().join("attendance.csv"));
        (tmp, ledger)
    }

    fn session(
        gallery: Arc<Gallery>,
        ledger: AttendanceLedger,
        source: ScriptedSource,
    ) -> AttendanceSession<PixelEncoder, ScriptedSource> {
        // Loose tolerance: resampling may shift flat colours by a level.
        let settings = SessionSettings { tolerance: 5.0, downsample: 4 };
        AttendanceSession::new(gallery, ledger, PixelEncoder::new(), source, settings)
    }

    #[test]
    fn test_empty_gallery_yields_no_decisions() {
        let (_tmp, ledger) = ledger();
        let (source, _) = ScriptedSource::new(vec![face_image(1, 50)]);
        let mut s = session(gallery(&[]), ledger, source);
        s.start().unwrap();
        let report = s.process_frame().unwrap();
        assert!(report.decisions.is_empty());
        assert!(report.candidate.is_none());
    }

    #[test]
    fn test_known_face_becomes_candidate_and_boxes_are_rescaled() {
        let (_tmp, ledger) = ledger();
        let (source, _) = ScriptedSource::new(vec![face_image(1, 50)]);
        let mut s = session(gallery(&[("bob", 50.0)]), ledger, source);
        s.start().unwrap();

        let report = s.process_frame().unwrap();
        assert_eq!(report.decisions.len(), 1);
        assert_eq!(report.candidate.as_ref().map(|n| n.as_str()), Some("Bob"));
        // 16x16 frame down-sampled to 4x4; box right edge 3 → 12.
        assert_eq!(report.decisions[0].face.bbox.right, 12.0);
        assert_eq!((report.frame_width, report.frame_height), (16, 16));
    }

    #[test]
    fn test_unknown_face_clears_candidate_but_empty_frame_keeps_it() {
        let (_tmp, ledger) = ledger();
        let (source, _) = ScriptedSource::new(vec![
            face_image(1, 50),
            face_image(0, 0),
            face_image(1, 200),
        ]);
        let mut s = session(gallery(&[("bob", 50.0)]), ledger, source);
        s.start().unwrap();

        s.process_frame().unwrap();
        assert!(s.candidate().is_some());
        s.process_frame().unwrap();
        assert!(s.candidate().is_some());
        s.process_frame().unwrap();
        assert!(s.candidate().is_none());
    }

    #[test]
    fn test_mark_with_candidate_marks_and_stops() {
        let (_tmp, ledger) = ledger();
        let (source, counters) = ScriptedSource::new(vec![face_image(1, 50)]);
        let mut s = session(gallery(&[("bob", 50.0)]), ledger.clone(), source);
        s.start().unwrap();
        s.process_frame().unwrap();

        let outcome = s.request_mark().unwrap();
        let MarkOutcome::Marked(record) = outcome else {
            panic!("expected a mark");
        };
        assert_eq!(record.name.as_str(), "Bob");
        assert_eq!(s.state(), SessionState::Stopped);
        assert_eq!(counters.borrow().released, 1);

        let rows = ledger.records().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, Status::Present);
        assert!(rows[0].time.is_some());

        // Stopped sessions reject further work.
        assert!(matches!(s.process_frame(), Err(SessionError::InvalidState(_))));
    }

    #[test]
    fn test_mark_without_candidate_waits_for_known_face() {
        let (_tmp, ledger) = ledger();
        let (source, _) = ScriptedSource::new(vec![face_image(1, 200), face_image(1, 50)]);
        let mut s = session(gallery(&[("bob", 50.0)]), ledger.clone(), source);
        s.start().unwrap();

        assert_eq!(s.request_mark().unwrap(), MarkOutcome::Pending);
        assert_eq!(s.state(), SessionState::MarkRequested);

        let first = s.process_frame().unwrap();
        assert!(first.marked.is_none());
        assert_eq!(s.state(), SessionState::MarkRequested);
        assert!(ledger.records().unwrap().is_empty());

        let second = s.process_frame().unwrap();
        assert_eq!(second.marked.map(|r| r.name.to_string()), Some("Bob".to_string()));
        assert_eq!(s.state(), SessionState::Stopped);
    }

    #[test]
    fn test_detection_failure_skips_frame() {
        let (_tmp, ledger) = ledger();
        let (source, _) = ScriptedSource::new(vec![face_image(1, 50), face_image(1, 50)]);
        let mut s = session(gallery(&[("bob", 50.0)]), ledger, source);
        s.encoder.fail_next = true;
        s.start().unwrap();

        let skipped = s.process_frame().unwrap();
        assert!(skipped.skipped);
        assert!(s.is_running());
        let next = s.process_frame().unwrap();
        assert_eq!(next.decisions.len(), 1);
    }

    #[test]
    fn test_capture_failure_releases_and_stops() {
        let (_tmp, ledger) = ledger();
        let (source, counters) = ScriptedSource::new(vec![]);
        let mut s = session(gallery(&[("bob", 50.0)]), ledger, source);
        s.start().unwrap();

        assert!(matches!(s.process_frame(), Err(SessionError::Capture(SourceError::Exhausted))));
        assert_eq!(s.state(), SessionState::Stopped);
        assert_eq!(counters.borrow().released, 1);
    }

    #[test]
    fn test_unavailable_camera_stays_idle() {
        let (_tmp, ledger) = ledger();
        let (mut source, counters) = ScriptedSource::new(vec![]);
        source.fail_acquire = true;
        let mut s = session(gallery(&[]), ledger, source);

        assert!(matches!(s.start(), Err(SessionError::CameraUnavailable(_))));
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(counters.borrow().acquired, 0);
    }

    #[test]
    fn test_stop_is_idempotent_and_drop_does_not_double_release() {
        let (_tmp, ledger) = ledger();
        let (source, counters) = ScriptedSource::new(vec![]);
        let mut s = session(gallery(&[]), ledger, source);
        s.start().unwrap();
        s.stop();
        s.stop();
        drop(s);
        assert_eq!(counters.borrow().released, 1);
    }

    #[test]
    fn test_drop_releases_running_session() {
        let (_tmp, ledger) = ledger();
        let (source, counters) = ScriptedSource::new(vec![]);
        let mut s = session(gallery(&[]), ledger, source);
        s.start().unwrap();
        drop(s);
        assert_eq!(counters.borrow().released, 1);
    }

    /// Reports one face per frame with a fixed embedding.
    struct FixedEncoder(Vec<f32>);

    impl FaceEncoder for FixedEncoder {
        fn detect_and_encode(
            &mut self,
            _image: &DynamicImage,
        ) -> Result<Vec<(BoundingBox, Embedding)>, EncoderError> {
            let bbox = BoundingBox { top: 0.0, right: 1.0, bottom: 1.0, left: 0.0 };
            Ok(vec![(bbox, Embedding::new(self.0.clone()))])
        }
    }

    #[test]
    fn test_incomparable_embeddings_never_mark() {
        for values in [vec![], vec![0.3; 64]] {
            let (_tmp, ledger) = ledger();
            let (source, _) = ScriptedSource::new(vec![face_image(1, 0), face_image(1, 0)]);
            let gallery = Arc::new(Gallery::new(vec![Identity {
                name: IdentityName::new("bob").unwrap(),
                embedding: Embedding::new(vec![0.3; 128]),
            }]));
            let mut s = AttendanceSession::new(
                gallery,
                ledger.clone(),
                FixedEncoder(values),
                source,
                SessionSettings::default(),
            );
            s.start().unwrap();

            assert_eq!(s.request_mark().unwrap(), MarkOutcome::Pending);
            for _ in 0..2 {
                let report = s.process_frame().unwrap();
                assert_eq!(report.decisions.len(), 1);
                assert!(!report.decisions[0].is_known());
                assert!(report.marked.is_none());
            }
            assert!(s.candidate().is_none());
            assert_eq!(s.state(), SessionState::MarkRequested);
            assert!(ledger.records().unwrap().is_empty());
        }
    }

    /// Declares every face to be the first gallery identity.
    struct FirstIdentityMatcher;

    impl Matcher for FirstIdentityMatcher {
        fn match_faces(
            &self,
            gallery: &[Identity],
            observed: &[ObservedFace],
            _tolerance: f32,
        ) -> Vec<MatchDecision> {
            observed
                .iter()
                .map(|face| MatchDecision {
                    face: face.clone(),
                    identity: gallery.first().map(|i| i.name.clone()),
                    distance: 0.0,
                })
                .collect()
        }
    }

    #[test]
    fn test_session_uses_supplied_matcher() {
        let (_tmp, ledger) = ledger();
        // Far from Alice by distance; only the custom matcher can match it.
        let (source, _) = ScriptedSource::new(vec![face_image(1, 200)]);
        let mut s = AttendanceSession::with_matcher(
            gallery(&[("alice", 0.0)]),
            ledger,
            PixelEncoder::new(),
            source,
            FirstIdentityMatcher,
            SessionSettings::default(),
        );
        s.start().unwrap();
        let report = s.process_frame().unwrap();
        assert_eq!(report.candidate.as_ref().map(|n| n.as_str()), Some("Alice"));
    }
}
