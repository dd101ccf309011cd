//! rollcall-core: Face enrollment, recognition and attendance bookkeeping.
//!
//! Faces are located with a Haar cascade and identified with a Local Binary
//! Patterns Histograms (LBPH) model. Enrolled names live in a line-oriented
//! label registry; attendance is an append-only CSV ledger holding at most one
//! record per name per day.

pub mod detector;
pub mod ledger;
pub mod lbph;
pub mod notify;
pub mod recognition;
pub mod registry;
pub mod samples;
pub mod session;
pub mod trainer;
pub mod types;

pub use detector::{CascadeClassifier, DetectionParams, FaceDetector};
pub use lbph::LbphModel;
pub use ledger::{AttendanceRecord, Ledger, MarkOutcome};
pub use notify::{Announcer, NotificationSink};
pub use recognition::{RecognitionEngine, RecognitionError};
pub use registry::{LabelRegistry, Labels};
pub use samples::SampleStore;
pub use session::AttendanceSession;
pub use types::{BoundingBox, Identity, Prediction, RecognitionResult, UNKNOWN};
