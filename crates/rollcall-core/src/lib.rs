//! rollcall-core — Face recognition and identity matching engine.
//!
//! Decodes client frames, finds faces with an SCRFD detector, embeds each
//! face crop with an ONNX model and matches the result against an in-memory
//! gallery of enrolled identities. Both ONNX models are optional at runtime;
//! the engine degrades to detection-only or reports itself unavailable.

pub mod detector;
pub mod embedder;
pub mod engine;
pub mod frame;
pub mod gallery;
pub mod matcher;
pub mod preprocess;
pub mod types;

pub use detector::{FaceDetector, ScrfdDetector};
pub use embedder::{FaceEmbedder, OnnxEmbedder};
pub use engine::{
    parse_threshold, parse_threshold_or, Availability, Capability, RecognitionEngine, RequestError,
    DEFAULT_THRESHOLD,
};
pub use gallery::{EmbeddingSource, Gallery, GalleryCache, GalleryError, SourceError};
pub use matcher::{CosineMatcher, Matcher};
pub use types::{
    DetectionBox, DetectionResponse, Embedding, FaceStatus, MatchResult, RecognitionResponse,
    RecognizedFace,
};
