use serde::{Deserialize, Serialize};

/// Denominator guard for cosine similarity.
pub const SIMILARITY_EPSILON: f32 = 1e-8;

/// Axis-aligned face region in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl DetectionBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }
}

/// Face embedding vector. Dimensionality is fixed by the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True when the vector is non-empty and every component is finite.
    pub fn is_well_formed(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| v.is_finite())
    }

    /// Cosine similarity `dot(a, b) / (|a| * |b| + eps)`.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Callers are
    /// responsible for comparing only vectors of equal dimension.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        dot / (norm_a.sqrt() * norm_b.sqrt() + SIMILARITY_EPSILON)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceStatus {
    Recognized,
    Unknown,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Best identity, present only when the score cleared the threshold.
    pub identity: Option<String>,
    /// Best cosine similarity found, reported regardless of the threshold outcome.
    pub score: f32,
    pub status: FaceStatus,
}

impl MatchResult {
    pub fn unknown(score: f32) -> Self {
        Self {
            identity: None,
            score,
            status: FaceStatus::Unknown,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.status == FaceStatus::Recognized
    }
}

/// One face in a recognize response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedFace {
    #[serde(rename = "box")]
    pub bbox: DetectionBox,
    pub student_id: Option<String>,
    pub student_name: Option<String>,
    pub confidence: f32,
    pub status: FaceStatus,
}

impl RecognizedFace {
    /// A face that was detected but never compared against the gallery.
    pub fn detection_only(bbox: DetectionBox) -> Self {
        Self {
            bbox,
            student_id: None,
            student_name: None,
            confidence: 0.0,
            status: FaceStatus::Unknown,
        }
    }
}

/// Response of `recognize`. Same shape in every availability regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResponse {
    pub available: bool,
    pub message: String,
    pub faces: Vec<RecognizedFace>,
}

/// Response of the detection-only `detect` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub faces: Vec<DetectionBox>,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
