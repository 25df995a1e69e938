//! Capability contract for the external face-analysis backend.
//!
//! Detection, landmark regression, expression scoring and descriptor
//! extraction all live behind [`VisionBackend`]; this crate only orchestrates
//! calls into it.

use crate::types::{Descriptor, Detection, EuclideanMatcher, FaceGallery, Frame, MatchResult, Matcher};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("model weights not found: {0}")]
    ModelNotFound(String),
    #[error("failed to load model weights: {0}")]
    LoadFailed(String),
    #[error("models are not loaded")]
    NotLoaded,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// What the backend should compute for each detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOptions {
    /// Detections scoring below this are dropped.
    pub min_confidence: f32,
    /// Square network input size the backend resizes frames to.
    pub input_size: u32,
    pub with_landmarks: bool,
    pub with_expressions: bool,
    pub with_descriptors: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            input_size: 416,
            with_landmarks: false,
            with_expressions: false,
            with_descriptors: false,
        }
    }
}

/// A face-analysis backend loaded from pre-trained model files.
#[async_trait]
pub trait VisionBackend: Send + Sync + 'static {
    /// Load every model the backend needs from `model_dir`.
    async fn load_models(&self, model_dir: &Path) -> Result<(), BackendError>;

    /// Detect all faces in a frame.
    async fn detect_faces(
        &self,
        frame: &Frame,
        options: &DetectionOptions,
    ) -> Result<Vec<Detection>, BackendError>;

    /// Detect the single most prominent face, including its descriptor.
    async fn detect_single_face(&self, frame: &Frame) -> Result<Option<Detection>, BackendError>;

    /// Match a descriptor against the reference gallery.
    fn match_descriptor(&self, descriptor: &Descriptor, gallery: &FaceGallery) -> MatchResult {
        EuclideanMatcher.compare(descriptor, gallery)
    }
}
