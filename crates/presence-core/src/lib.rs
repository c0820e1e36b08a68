//! presence-core: attendance matching and ledger engine.
//!
//! Known identities are embedded from a gallery of reference images,
//! observed faces are matched against them by Euclidean distance, and
//! attendance is kept in a per-day CSV ledger with one row per person.

pub mod encoder;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod name;
pub mod session;
pub mod types;

pub use encoder::{EncoderError, FaceEncoder};
pub use gallery::{is_image_path, Gallery, GalleryEntry, GalleryError, GalleryStore, LoadReport};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, Status};
pub use matcher::{EuclideanMatcher, Matcher, DEFAULT_TOLERANCE};
pub use name::{IdentityName, NameError};
pub use session::{
    AttendanceSession, FrameReport, FrameSource, MarkOutcome, SessionError, SessionSettings,
    SessionState, SourceError,
};
pub use types::{BoundingBox, Embedding, Identity, MatchDecision, ObservedFace};
