//! Face embedding model via ONNX Runtime.
//!
//! Runs a preprocessed 1x3x112x112 face tensor through the recognition
//! model and returns the first output row as the embedding. The vector is
//! returned as produced; no normalization is applied.

use crate::types::Embedding;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face embedding capability.
pub trait FaceEmbedder: Send {
    fn embed(&mut self, input: &Array4<f32>) -> Result<Embedding, EmbedderError>;
}

/// Generic ONNX embedding model.
pub struct OnnxEmbedder {
    session: Session,
}

impl OnnxEmbedder {
    /// Load the recognition model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session })
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn embed(&mut self, input: &Array4<f32>) -> Result<Embedding, EmbedderError> {
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        // Batch size is 1, so the whole output is row 0.
        validate_output(raw.to_vec())
    }
}

fn validate_output(values: Vec<f32>) -> Result<Embedding, EmbedderError> {
    let embedding = Embedding::new(values);
    if embedding.values.is_empty() {
        return Err(EmbedderError::InferenceFailed("model returned an empty embedding".into()));
    }
    if !embedding.is_well_formed() {
        return Err(EmbedderError::InferenceFailed("model returned non-finite values".into()));
    }
    Ok(embedding)
}
