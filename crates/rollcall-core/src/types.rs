use serde::{Deserialize, Serialize};

/// Display name reported for faces that do not match an enrolled identity.
pub const UNKNOWN: &str = "UNKNOWN";

/// Axis-aligned face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of raw cascade hits merged into this box (0 when ungrouped).
    pub neighbors: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            neighbors: 0,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }
}

/// Raw classifier output: nearest training label and its distance.
///
/// Lower distance means a closer match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: u32,
    pub distance: f64,
}

/// Outcome of resolving a prediction against the label registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Known { id: u32, name: String },
    Unknown,
}

impl Identity {
    /// Name to display or record; [`UNKNOWN`] for unmatched faces.
    pub fn name(&self) -> &str {
        match self {
            Identity::Known { name, .. } => name,
            Identity::Unknown => UNKNOWN,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known { .. })
    }
}

/// Per-face, per-frame recognition output. Never persisted.
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    pub bbox: BoundingBox,
    pub identity: Identity,
    /// Distance reported by the model for its nearest label.
    pub confidence: f64,
}
