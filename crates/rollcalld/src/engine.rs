use crate::config::Config;
use rollcall_core::{
    Capability, EmbeddingSource, FaceDetector, FaceEmbedder, GalleryCache, OnnxEmbedder,
    RecognitionEngine, ScrfdDetector,
};
use std::sync::Arc;

/// Build the process-wide recognition engine.
///
/// Each ONNX model is loaded exactly once here. A model that fails to load
/// leaves its capability unavailable for the life of the process; startup
/// itself never fails on a missing model. The gallery is populated from the
/// store before the engine is returned.
pub fn load_engine(config: &Config, store: Arc<dyn EmbeddingSource>) -> RecognitionEngine {
    let detector: Capability<Box<dyn FaceDetector>> =
        match ScrfdDetector::load(&config.detection_model_path) {
            Ok(d) => {
                tracing::info!(path = %config.detection_model_path.display(), "SCRFD detector loaded");
                Capability::available(Box::new(d) as Box<dyn FaceDetector>)
            }
            Err(e) => Capability::unavailable(e.to_string()),
        };

    let embedder: Capability<Box<dyn FaceEmbedder>> =
        match OnnxEmbedder::load(&config.recognition_model_path) {
            Ok(m) => {
                tracing::info!(path = %config.recognition_model_path.display(), "embedding model loaded");
                Capability::available(Box::new(m) as Box<dyn FaceEmbedder>)
            }
            Err(e) => Capability::unavailable(e.to_string()),
        };

    let gallery = GalleryCache::new(store);
    match gallery.reload() {
        Ok(count) => tracing::info!(identities = count, "gallery loaded"),
        Err(e) => tracing::error!(error = %e, "initial gallery load failed; starting with an empty gallery"),
    }

    RecognitionEngine::new(detector, embedder, gallery)
}
