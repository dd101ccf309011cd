use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::detector::CascadeError;
use rollcall_core::lbph::ModelError;
use rollcall_core::ledger::LedgerError;
use rollcall_core::recognition::{RecognitionError, DEFAULT_CONFIDENCE_THRESHOLD};
use rollcall_core::registry::RegistryError;
use rollcall_core::samples::{normalize_face, SampleError};
use rollcall_core::trainer::{self, TrainError, TrainReport};
use rollcall_core::{
    Announcer, AttendanceRecord, AttendanceSession, DetectionParams, FaceDetector, LabelRegistry,
    LbphModel, Ledger, MarkOutcome, RecognitionEngine, RecognitionResult, SampleStore,
};
use rollcall_hw::{CameraError, Frame, FrameSource};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Samples(#[from] SampleError),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Cascade(#[from] CascadeError),
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
}

/// Coarse failure class reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any work.
    Validation,
    /// A prerequisite (samples, model, cascade) is missing.
    NoData,
    /// Video source unavailable or failed mid-stream.
    Device,
    Io,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Registry(RegistryError::InvalidName(..)) => ErrorKind::Validation,
            SessionError::Train(TrainError::NoData(_))
            | SessionError::Train(TrainError::Model(ModelError::Empty))
            | SessionError::Model(ModelError::NotFound(_))
            | SessionError::Model(ModelError::Empty)
            | SessionError::Cascade(CascadeError::NotFound(_)) => ErrorKind::NoData,
            SessionError::Camera(_) => ErrorKind::Device,
            _ => ErrorKind::Io,
        }
    }
}

/// Cooperative stop flag shared between a streaming loop and whoever ends it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Frames processed by a recognition run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames: usize,
    pub faces: usize,
    pub known: usize,
}

/// Outcome of an attendance run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceSummary {
    pub frames: usize,
    pub faces: usize,
    /// Rows appended to the ledger during this run, in order.
    pub recorded: Vec<AttendanceRecord>,
    /// Identities seen this run that were already in the ledger for the day.
    pub duplicates: Vec<String>,
}

/// An enrolled identity and its stored sample count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySummary {
    pub id: u32,
    pub name: String,
    pub samples: usize,
}

/// What `reset_all` removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub samples: bool,
    pub registry: bool,
    pub model: bool,
    pub ledger: bool,
}

type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Persisted state locations plus the knobs the loops need.
///
/// Every operation reloads what it reads (registry snapshot, model) so
/// results always reflect the files on disk.
#[derive(Clone)]
pub struct SessionContext {
    registry: LabelRegistry,
    store: SampleStore,
    ledger: Ledger,
    model_path: PathBuf,
    threshold: f64,
    max_samples: usize,
    clock: Clock,
}

impl SessionContext {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: LabelRegistry::new(config.labels_path()),
            store: SampleStore::new(config.samples_dir()),
            ledger: Ledger::new(config.ledger_path()),
            model_path: config.model_path(),
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_samples: config.max_samples,
            clock: Arc::new(|| chrono::Local::now().naive_local()),
        }
    }

    /// Replace the wall clock used to timestamp attendance.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Capture face samples for `name` until `max_samples` are stored, the
    /// stop signal fires, or the source ends.
    ///
    /// The name is validated and resolved before the source is opened. Only
    /// the first face of each frame is kept.
    pub fn enroll<S, F>(
        &self,
        name: &str,
        open_source: F,
        detector: &dyn FaceDetector,
        stop: &StopSignal,
    ) -> Result<usize, SessionError>
    where
        S: FrameSource,
        F: FnOnce() -> Result<S, CameraError>,
    {
        let id = self.registry.resolve_or_create(name)?;
        let mut source = open_source()?;
        tracing::info!(id, name, source = %source.describe(), max = self.max_samples, "enrollment started");

        let mut stored = 0usize;
        while stored < self.max_samples && !stop.is_triggered() {
            let Some(frame) = source.next_frame()? else {
                break;
            };
            if frame.is_dark {
                tracing::debug!(sequence = frame.sequence, "skipping dark frame");
                continue;
            }
            let faces = detector.detect(&frame.data, frame.width, frame.height, &DetectionParams::CAPTURE)?;
            let Some(face) = faces
                .first()
                .and_then(|bbox| normalize_face(&frame.data, frame.width, frame.height, bbox))
            else {
                continue;
            };

            let sequence = stored as u32 + 1;
            self.store.put(id, sequence, &face)?;
            stored += 1;
            tracing::debug!(id, sequence, "sample stored");
        }

        tracing::info!(id, name, samples = stored, "enrollment finished");
        Ok(stored)
    }

    /// Retrain the model from every stored sample.
    pub fn train(&self) -> Result<TrainReport, SessionError> {
        let report = trainer::train_to(&self.store, &self.model_path)?;
        tracing::info!(
            samples = report.samples,
            identities = report.identities.len(),
            path = %self.model_path.display(),
            "model trained"
        );
        Ok(report)
    }

    /// Identify faces frame by frame without touching the ledger.
    pub fn recognize_stream<S, F, O>(
        &self,
        open_source: F,
        detector: &dyn FaceDetector,
        stop: &StopSignal,
        mut observer: O,
    ) -> Result<StreamSummary, SessionError>
    where
        S: FrameSource,
        F: FnOnce() -> Result<S, CameraError>,
        O: FnMut(&Frame, &[RecognitionResult]),
    {
        let model = LbphModel::load(&self.model_path)?;
        let labels = self.registry.load()?;
        let engine = RecognitionEngine::new(detector, &model, &labels, self.threshold);

        let mut source = open_source()?;
        tracing::info!(source = %source.describe(), "recognition started");

        let mut summary = StreamSummary::default();
        while !stop.is_triggered() {
            let Some(frame) = source.next_frame()? else {
                break;
            };
            summary.frames += 1;
            if frame.is_dark {
                continue;
            }
            let results = engine.recognize(&frame.data, frame.width, frame.height)?;
            summary.faces += results.len();
            summary.known += results.iter().filter(|r| r.identity.is_known()).count();
            observer(&frame, &results);
        }

        tracing::info!(frames = summary.frames, faces = summary.faces, "recognition finished");
        Ok(summary)
    }

    /// Recognize faces and record each known identity once per day.
    ///
    /// Newly recorded names are handed to `announcer`; the caller owns it and
    /// decides when to drain it.
    pub fn take_attendance_stream<S, F, O>(
        &self,
        open_source: F,
        detector: &dyn FaceDetector,
        stop: &StopSignal,
        announcer: &Announcer,
        mut observer: O,
    ) -> Result<AttendanceSummary, SessionError>
    where
        S: FrameSource,
        F: FnOnce() -> Result<S, CameraError>,
        O: FnMut(&Frame, &[RecognitionResult]),
    {
        let model = LbphModel::load(&self.model_path)?;
        let labels = self.registry.load()?;
        let engine = RecognitionEngine::new(detector, &model, &labels, self.threshold);
        let mut session = AttendanceSession::new(&self.ledger, announcer);

        let mut source = open_source()?;
        tracing::info!(source = %source.describe(), "attendance started");

        let mut summary = AttendanceSummary::default();
        while !stop.is_triggered() {
            let Some(frame) = source.next_frame()? else {
                break;
            };
            summary.frames += 1;
            if frame.is_dark {
                continue;
            }
            let results = engine.recognize(&frame.data, frame.width, frame.height)?;
            summary.faces += results.len();
            for result in &results {
                match session.observe(&result.identity, (self.clock)())? {
                    Some(MarkOutcome::Recorded(record)) => summary.recorded.push(record),
                    Some(MarkOutcome::Duplicate) => {
                        summary.duplicates.push(result.identity.name().to_string())
                    }
                    Some(MarkOutcome::Rejected) | None => {}
                }
            }
            observer(&frame, &results);
        }

        tracing::info!(
            frames = summary.frames,
            recorded = summary.recorded.len(),
            duplicates = summary.duplicates.len(),
            "attendance finished"
        );
        Ok(summary)
    }

    /// Delete samples, registry, model and ledger. Irreversible; callers
    /// confirm first.
    pub fn reset_all(&self) -> Result<ResetReport, SessionError> {
        let report = ResetReport {
            samples: self.store.clear()?,
            registry: self.registry.remove()?,
            model: LbphModel::remove(&self.model_path)?,
            ledger: self.ledger.remove()?,
        };
        tracing::warn!(?report, "all enrollment and attendance data removed");
        Ok(report)
    }

    /// Registered identities in id order, with their sample counts.
    pub fn list_identities(&self) -> Result<Vec<IdentitySummary>, SessionError> {
        let labels = self.registry.load()?;
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for sample in self.store.list()? {
            *counts.entry(sample.owner_id).or_default() += 1;
        }
        Ok(labels
            .iter()
            .map(|(id, name)| IdentitySummary {
                id,
                name: name.to_string(),
                samples: counts.get(&id).copied().unwrap_or(0),
            })
            .collect())
    }

    pub fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, SessionError> {
        Ok(self.ledger.records_on(date)?)
    }

    /// Current local date according to the context clock.
    pub fn today(&self) -> NaiveDate {
        (self.clock)().date()
    }
}
