//! Recognition orchestrator.
//!
//! [`RecognitionEngine`] is the long-lived service object: it owns the
//! detector and embedder capabilities (each loaded once, possibly
//! unavailable for the life of the process) and the gallery cache.
//! Every call is independent and reads one gallery snapshot.

use crate::detector::FaceDetector;
use crate::embedder::FaceEmbedder;
use crate::frame;
use crate::gallery::{Gallery, GalleryCache, GalleryError};
use crate::matcher::{CosineMatcher, Matcher};
use crate::preprocess;
use crate::types::{DetectionBox, DetectionResponse, RecognitionResponse, RecognizedFace};
use image::RgbImage;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub const DEFAULT_THRESHOLD: f32 = 0.85;

const MSG_DETECTION_UNAVAILABLE: &str = "Face detection unavailable; detector model not loaded.";
const MSG_NO_USABLE_FRAME: &str = "No usable frame; image could not be decoded.";
const MSG_NO_MODEL: &str = "Detection only. Recognition model not loaded.";
const MSG_NO_GALLERY: &str = "Detection only. No gallery entries enrolled.";
const MSG_RECOGNIZED: &str = "Recognition executed";
const MSG_NO_FACES: &str = "No faces";

/// Caller errors. Everything else degrades inside the response.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("frame is required")]
    MissingFrame,
}

/// A process-wide capability, decided once at startup.
pub enum Capability<T> {
    Available(Mutex<T>),
    Unavailable { reason: String },
}

impl<T> Capability<T> {
    pub fn available(inner: T) -> Self {
        Self::Available(Mutex::new(inner))
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable { reason: reason.into() }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Available(_) => None,
            Self::Unavailable { reason } => Some(reason),
        }
    }
}

/// Which inference stages are operational in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub detection: bool,
    pub embedding: bool,
}

/// Parse a caller-supplied threshold, falling back to [`DEFAULT_THRESHOLD`]
/// when absent, unparsable or not finite.
pub fn parse_threshold(raw: Option<&str>) -> f32 {
    parse_threshold_or(raw, DEFAULT_THRESHOLD)
}

/// Like [`parse_threshold`] with a caller-chosen fallback.
pub fn parse_threshold_or(raw: Option<&str>, default: f32) -> f32 {
    raw.and_then(|s| s.trim().parse::<f32>().ok())
        .filter(|t| t.is_finite())
        .unwrap_or(default)
}

fn round_confidence(score: f32) -> f32 {
    (score * 10_000.0).round() / 10_000.0
}

pub struct RecognitionEngine {
    detector: Capability<Box<dyn FaceDetector>>,
    embedder: Capability<Box<dyn FaceEmbedder>>,
    gallery: GalleryCache,
    matcher: CosineMatcher,
}

impl RecognitionEngine {
    pub fn new(
        detector: Capability<Box<dyn FaceDetector>>,
        embedder: Capability<Box<dyn FaceEmbedder>>,
        gallery: GalleryCache,
    ) -> Self {
        if let Some(reason) = detector.reason() {
            tracing::warn!(reason, "face detection unavailable; all requests will report unavailable");
        }
        if let Some(reason) = embedder.reason() {
            tracing::warn!(reason, "embedding model unavailable; running detection-only");
        }
        Self {
            detector,
            embedder,
            gallery,
            matcher: CosineMatcher,
        }
    }

    pub fn availability(&self) -> Availability {
        Availability {
            detection: self.detector.is_available(),
            embedding: self.embedder.is_available(),
        }
    }

    pub fn gallery(&self) -> &GalleryCache {
        &self.gallery
    }

    /// Re-read the gallery from the record store. Must be called after any
    /// embedding mutation before that mutation is reported complete.
    pub fn reload_gallery(&self) -> Result<usize, GalleryError> {
        self.gallery.reload()
    }

    /// Detect face boxes without identity matching.
    pub fn detect(&self, frame: &str) -> Result<DetectionResponse, RequestError> {
        ensure_frame(frame)?;

        let Capability::Available(detector) = &self.detector else {
            return Ok(DetectionResponse {
                faces: Vec::new(),
                available: false,
                message: Some(MSG_DETECTION_UNAVAILABLE.into()),
            });
        };

        let Some(image) = decode(frame) else {
            return Ok(DetectionResponse {
                faces: Vec::new(),
                available: true,
                message: Some(MSG_NO_USABLE_FRAME.into()),
            });
        };

        Ok(DetectionResponse {
            faces: run_detector(detector, &image),
            available: true,
            message: None,
        })
    }

    /// Detect faces and match each against the gallery.
    pub fn recognize(&self, frame: &str, threshold: f32) -> Result<RecognitionResponse, RequestError> {
        ensure_frame(frame)?;

        let Capability::Available(detector) = &self.detector else {
            return Ok(RecognitionResponse {
                available: false,
                message: MSG_DETECTION_UNAVAILABLE.into(),
                faces: Vec::new(),
            });
        };

        let Some(image) = decode(frame) else {
            return Ok(RecognitionResponse {
                available: true,
                message: MSG_NO_USABLE_FRAME.into(),
                faces: Vec::new(),
            });
        };

        let boxes = run_detector(detector, &image);

        let Capability::Available(embedder) = &self.embedder else {
            return Ok(detection_only(boxes, MSG_NO_MODEL));
        };

        // One snapshot for the whole request.
        let gallery = self.gallery.current();
        if gallery.is_empty() {
            return Ok(detection_only(boxes, MSG_NO_GALLERY));
        }

        let faces: Vec<RecognizedFace> = boxes
            .into_iter()
            .filter_map(|bbox| self.recognize_face(embedder, &image, bbox, &gallery, threshold))
            .collect();

        tracing::debug!(faces = faces.len(), gallery = gallery.len(), threshold, "recognition complete");

        Ok(RecognitionResponse {
            available: true,
            message: (if faces.is_empty() { MSG_NO_FACES } else { MSG_RECOGNIZED }).into(),
            faces,
        })
    }

    /// Preprocess → embed → match for one box. `None` drops the box from the response.
    fn recognize_face(
        &self,
        embedder: &Mutex<Box<dyn FaceEmbedder>>,
        image: &RgbImage,
        bbox: DetectionBox,
        gallery: &Gallery,
        threshold: f32,
    ) -> Option<RecognizedFace> {
        let input = match preprocess::preprocess_face(image, &bbox) {
            Ok(input) => input,
            Err(e) => {
                tracing::debug!(error = %e, "skipping face: preprocessing failed");
                return None;
            }
        };

        let embedding = match embedder.lock().unwrap_or_else(PoisonError::into_inner).embed(&input) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, ?bbox, "skipping face: embedding failed");
                return None;
            }
        };

        let result = self.matcher.compare(&embedding, gallery, threshold);
        let student_name = result
            .identity
            .as_deref()
            .and_then(|id| gallery.name(id))
            .map(str::to_string);

        Some(RecognizedFace {
            bbox,
            student_id: result.identity,
            student_name,
            confidence: round_confidence(result.score),
            status: result.status,
        })
    }
}

fn ensure_frame(frame: &str) -> Result<(), RequestError> {
    if frame.trim().is_empty() {
        return Err(RequestError::MissingFrame);
    }
    Ok(())
}

fn decode(frame: &str) -> Option<RgbImage> {
    match frame::decode_frame(frame) {
        Ok(image) => Some(image),
        Err(e) => {
            tracing::debug!(error = %e, "frame decode failed");
            None
        }
    }
}

fn run_detector(detector: &Mutex<Box<dyn FaceDetector>>, image: &RgbImage) -> Vec<DetectionBox> {
    match detector.lock().unwrap_or_else(PoisonError::into_inner).detect(image) {
        Ok(boxes) => boxes,
        Err(e) => {
            tracing::warn!(error = %e, "face detection failed for frame");
            Vec::new()
        }
    }
}

fn detection_only(boxes: Vec<DetectionBox>, message: &str) -> RecognitionResponse {
    RecognitionResponse {
        available: true,
        message: message.into(),
        faces: boxes.into_iter().map(RecognizedFace::detection_only).collect(),
    }
}
