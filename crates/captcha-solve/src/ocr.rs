use std::path::Path;
use std::sync::Arc;

use image::GrayImage;
use tracing::{info, warn};

use crate::{NeuralEngine, TesseractEngine};

/// Uniform contract over text-recognition backends.
///
/// Implementations never raise on bad input: an unreadable image yields an
/// empty candidate list.
pub trait RecognitionEngine: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Return zero or more raw text guesses for the image.
    fn recognize(&self, image: &GrayImage) -> Vec<String>;
}

/// Errors from OCR backend setup and inference.
#[derive(thiserror::Error, Debug)]
pub enum OcrError {
    /// The neural model file could not be loaded.
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    /// The Tesseract binary is missing or not runnable.
    #[error("Tesseract unavailable: {0}")]
    TesseractUnavailable(String),

    /// No recognition backend could be initialized at all.
    #[error("No OCR backend available; configure a model path or install tesseract")]
    NoBackendAvailable,
}

/// Resolve the recognition backend once at start-up.
///
/// Prefers the neural engine when a model path is configured and loads,
/// falling back to the Tesseract CLI. Failure of both is fatal for the
/// caller: the solver cannot function without a working backend, so this is
/// surfaced immediately rather than deferred to first use.
pub fn init_engine(
    model_path: Option<&Path>,
    tesseract_binary: &Path,
) -> Result<Arc<dyn RecognitionEngine>, OcrError> {
    if let Some(path) = model_path {
        match NeuralEngine::load(path) {
            Ok(engine) => {
                info!("Using neural OCR engine ({})", engine.backend_name());
                return Ok(Arc::new(engine));
            }
            Err(e) => {
                warn!("Neural OCR engine failed to load: {}", e);
            }
        }
    }

    match TesseractEngine::probe(tesseract_binary) {
        Ok(engine) => {
            info!("Using Tesseract OCR engine at {:?}", tesseract_binary);
            Ok(Arc::new(engine))
        }
        Err(e) => {
            warn!("Tesseract OCR engine unavailable: {}", e);
            Err(OcrError::NoBackendAvailable)
        }
    }
}
