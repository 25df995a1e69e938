//! Replay backend: serves backend output captured earlier to a JSON file.
//!
//! Recording layout:
//!
//! ```json
//! {
//!   "models": ["tiny_face_detector_model", "face_landmark_68_model"],
//!   "frames": [[{"box": {...}, "landmarks": [[x, y], ...]}], []],
//!   "references": {"alice/1": [0.01, -0.2, ...]}
//! }
//! ```
//!
//! `load_models` requires `<model_dir>/<name>-weights_manifest.json` to exist
//! and parse for every listed model.

use crate::backend::{BackendError, DetectionOptions, VisionBackend};
use crate::types::{BoundingBox, Descriptor, Detection, Frame};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::task::JoinSet;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Recording {
    pub models: Vec<String>,
    pub frames: Vec<Vec<Detection>>,
    pub references: HashMap<String, Descriptor>,
}

pub struct ReplayBackend {
    recording: Recording,
    cursor: AtomicUsize,
    loaded: AtomicBool,
}

impl ReplayBackend {
    pub fn new(recording: Recording) -> Self {
        Self {
            recording,
            cursor: AtomicUsize::new(0),
            loaded: AtomicBool::new(false),
        }
    }

    /// Read a recording from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, BackendError> {
        if !path.exists() {
            return Err(BackendError::ModelNotFound(path.display().to_string()));
        }
        let raw = std::fs::read(path)?;
        let recording: Recording = serde_json::from_slice(&raw)
            .map_err(|e| BackendError::LoadFailed(format!("{}: {e}", path.display())))?;
        tracing::info!(
            path = %path.display(),
            models = recording.models.len(),
            frames = recording.frames.len(),
            references = recording.references.len(),
            "loaded replay recording"
        );
        Ok(Self::new(recording))
    }

    fn ensure_loaded(&self) -> Result<(), BackendError> {
        if self.loaded.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BackendError::NotLoaded)
        }
    }
}

fn manifest_path(model_dir: &Path, model: &str) -> PathBuf {
    model_dir.join(format!("{model}-weights_manifest.json"))
}

async fn load_manifest(path: PathBuf) -> Result<(), BackendError> {
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BackendError::ModelNotFound(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice::<serde_json::Value>(&raw)
        .map_err(|e| BackendError::LoadFailed(format!("{}: {e}", path.display())))?;
    tracing::debug!(path = %path.display(), "weights manifest ok");
    Ok(())
}

/// Strip the parts of a detection the caller did not ask for.
fn shape(det: &Detection, options: &DetectionOptions) -> Detection {
    Detection {
        bbox: det.bbox,
        landmarks: det.landmarks.clone().filter(|_| options.with_landmarks),
        expressions: det.expressions.filter(|_| options.with_expressions),
        descriptor: det.descriptor.clone().filter(|_| options.with_descriptors),
    }
}

#[async_trait]
impl VisionBackend for ReplayBackend {
    async fn load_models(&self, model_dir: &Path) -> Result<(), BackendError> {
        let mut tasks = JoinSet::new();
        for model in &self.recording.models {
            tasks.spawn(load_manifest(manifest_path(model_dir, model)));
        }
        while let Some(res) = tasks.join_next().await {
            res.map_err(|e| BackendError::LoadFailed(format!("loader task: {e}")))??;
        }
        self.loaded.store(true, Ordering::Release);
        tracing::info!(dir = %model_dir.display(), models = self.recording.models.len(), "models loaded");
        Ok(())
    }

    async fn detect_faces(
        &self,
        _frame: &Frame,
        options: &DetectionOptions,
    ) -> Result<Vec<Detection>, BackendError> {
        self.ensure_loaded()?;
        if self.recording.frames.is_empty() {
            return Ok(Vec::new());
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.recording.frames.len();
        Ok(self.recording.frames[idx]
            .iter()
            .filter(|d| d.bbox.confidence >= options.min_confidence)
            .map(|d| shape(d, options))
            .collect())
    }

    async fn detect_single_face(&self, frame: &Frame) -> Result<Option<Detection>, BackendError> {
        self.ensure_loaded()?;
        let Some(tag) = frame.tag.as_deref() else {
            return Ok(None);
        };
        Ok(self.recording.references.get(tag).map(|d| Detection {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: frame.width as f32,
                height: frame.height as f32,
                confidence: 1.0,
            },
            landmarks: None,
            expressions: None,
            descriptor: Some(d.clone()),
        }))
    }
}
