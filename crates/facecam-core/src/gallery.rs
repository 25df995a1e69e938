//! Reference gallery construction for the identity overlay.
//!
//! Each label gets `images_per_label` reference images. Images that fail to
//! load or contain no usable face are skipped with a warning. A label left
//! with no descriptors is dropped; a gallery with no labels left is an error.

use crate::backend::VisionBackend;
use crate::types::{FaceGallery, Frame, LabeledDescriptors};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("reference image not found: {0}")]
    NotFound(String),
    #[error("failed to decode reference image {path}: {source}")]
    Decode {
        path: String,
        source: image::ImageError,
    },
    #[error("no gallery labels configured")]
    NoLabels,
    #[error("no reference descriptors for any of {0} labels")]
    Empty(usize),
    #[error("image loader task failed: {0}")]
    Task(String),
}

/// Which identities to enroll and how many reference images each one has.
#[derive(Debug, Clone)]
pub struct GallerySpec {
    pub labels: Vec<String>,
    /// Reference images per label, numbered `1..=images_per_label`.
    pub images_per_label: usize,
    pub distance_threshold: f32,
}

/// Where reference images come from.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// Fetch reference image `index` (1-based) for `label`.
    async fn fetch(&self, label: &str, index: usize) -> Result<Frame, GalleryError>;
}

/// Reference images laid out as `<root>/<label>/<index>.png`.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, label: &str, index: usize) -> PathBuf {
        self.root.join(label).join(format!("{index}.png"))
    }
}

#[async_trait]
impl ReferenceSource for DirectorySource {
    async fn fetch(&self, label: &str, index: usize) -> Result<Frame, GalleryError> {
        let path = self.path_for(label, index);
        if !path.exists() {
            return Err(GalleryError::NotFound(path.display().to_string()));
        }
        let tag = format!("{label}/{index}");
        tokio::task::spawn_blocking(move || {
            let img = image::open(&path).map_err(|source| GalleryError::Decode {
                path: path.display().to_string(),
                source,
            })?;
            Ok(Frame::from_image(&img, Some(tag)))
        })
        .await
        .map_err(|e| GalleryError::Task(e.to_string()))?
    }
}

/// Build the reference gallery by running single-face detection on every
/// reference image of every label.
pub async fn build_reference_gallery(
    backend: &dyn VisionBackend,
    source: &dyn ReferenceSource,
    spec: &GallerySpec,
) -> Result<FaceGallery, GalleryError> {
    if spec.labels.is_empty() {
        return Err(GalleryError::NoLabels);
    }

    let mut entries = Vec::with_capacity(spec.labels.len());

    for label in &spec.labels {
        let mut descriptors = Vec::with_capacity(spec.images_per_label);

        for index in 1..=spec.images_per_label {
            let frame = match source.fetch(label, index).await {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(label = %label, index, error = %e, "skipping reference image");
                    continue;
                }
            };

            match backend.detect_single_face(&frame).await {
                Ok(Some(det)) => match det.descriptor {
                    Some(d) => descriptors.push(d),
                    None => {
                        tracing::warn!(label = %label, index, "backend returned no descriptor");
                    }
                },
                Ok(None) => {
                    tracing::warn!(label = %label, index, "no face in reference image");
                }
                Err(e) => {
                    tracing::warn!(label = %label, index, error = %e, "reference detection failed");
                }
            }
        }

        if descriptors.is_empty() {
            tracing::warn!(label = %label, "no usable reference images; label dropped");
            continue;
        }

        tracing::debug!(label = %label, count = descriptors.len(), "label enrolled");
        entries.push(LabeledDescriptors {
            label: label.clone(),
            descriptors,
        });
    }

    if entries.is_empty() {
        return Err(GalleryError::Empty(spec.labels.len()));
    }

    tracing::info!(labels = entries.len(), "reference gallery built");
    Ok(FaceGallery::new(entries, spec.distance_threshold))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, DetectionOptions};
    use crate::types::{BoundingBox, Descriptor, Detection};
    use std::path::Path;
    use std::sync::Mutex;

    /// Serves a blank frame for every (label, index) except those listed as missing.
    struct FakeSource {
        missing: Vec<(&'static str, usize)>,
        fetched: Mutex<Vec<(String, usize)>>,
    }

    impl FakeSource {
        fn new(missing: Vec<(&'static str, usize)>) -> Self {
            Self {
                missing,
                fetched: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReferenceSource for FakeSource {
        async fn fetch(&self, label: &str, index: usize) -> Result<Frame, GalleryError> {
            self.fetched.lock().unwrap().push((label.to_string(), index));
            if self.missing.iter().any(|(l, i)| *l == label && *i == index) {
                return Err(GalleryError::NotFound(format!("{label}/{index}")));
            }
            Ok(Frame {
                data: vec![0; 4],
                width: 2,
                height: 2,
                sequence: 0,
                tag: Some(format!("{label}/{index}")),
            })
        }
    }

    /// Finds a face in every frame whose tag is not listed as faceless.
    struct FakeBackend {
        faceless: Vec<&'static str>,
    }

    #[async_trait]
    impl VisionBackend for FakeBackend {
        async fn load_models(&self, _model_dir: &Path) -> Result<(), BackendError> {
            Ok(())
        }

        async fn detect_faces(
            &self,
            _frame: &Frame,
            _options: &DetectionOptions,
        ) -> Result<Vec<Detection>, BackendError> {
            Ok(Vec::new())
        }

        async fn detect_single_face(&self, frame: &Frame) -> Result<Option<Detection>, BackendError> {
            let tag = frame.tag.as_deref().unwrap_or_default();
            if self.faceless.contains(&tag) {
                return Ok(None);
            }
            Ok(Some(Detection {
                bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 0.9 },
                landmarks: None,
                expressions: None,
                descriptor: Some(Descriptor::new(vec![tag.len() as f32])),
            }))
        }
    }

    fn spec(labels: &[&str], images_per_label: usize) -> GallerySpec {
        GallerySpec {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            images_per_label,
            distance_threshold: 0.6,
        }
    }

    #[tokio::test]
    async fn test_uses_per_label_image_count() {
        // Three labels, two images each: the label count must not leak into the image bound.
        let source = FakeSource::new(Vec::new());
        let backend = FakeBackend { faceless: Vec::new() };
        let gallery = build_reference_gallery(&backend, &source, &spec(&["a", "b", "c"], 2))
            .await
            .unwrap();

        assert_eq!(gallery.entries.len(), 3);
        assert!(gallery.entries.iter().all(|e| e.descriptors.len() == 2));
        let fetched = source.fetched.lock().unwrap();
        assert_eq!(fetched.len(), 6);
        assert!(fetched.iter().all(|(_, i)| (1..=2).contains(i)));
    }

    #[tokio::test]
    async fn test_failed_images_are_skipped() {
        let source = FakeSource::new(vec![("alice", 1)]);
        let backend = FakeBackend { faceless: vec!["alice/2"] };
        let gallery = build_reference_gallery(&backend, &source, &spec(&["alice"], 3))
            .await
            .unwrap();

        assert_eq!(gallery.entries.len(), 1);
        assert_eq!(gallery.entries[0].descriptors.len(), 1);
    }

    #[tokio::test]
    async fn test_label_without_descriptors_is_dropped() {
        let source = FakeSource::new(vec![("bob", 1)]);
        let backend = FakeBackend { faceless: vec!["bob/2"] };
        let gallery = build_reference_gallery(&backend, &source, &spec(&["alice", "bob"], 2))
            .await
            .unwrap();

        assert_eq!(gallery.labels().collect::<Vec<_>>(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_all_labels_dropped_is_error() {
        let source = FakeSource::new(Vec::new());
        let backend = FakeBackend { faceless: vec!["alice/1", "bob/1"] };
        let err = build_reference_gallery(&backend, &source, &spec(&["alice", "bob"], 1))
            .await
            .unwrap_err();
        assert!(matches!(err, GalleryError::Empty(2)));
    }

    #[tokio::test]
    async fn test_no_labels_is_error() {
        let source = FakeSource::new(Vec::new());
        let backend = FakeBackend { faceless: Vec::new() };
        let err = build_reference_gallery(&backend, &source, &spec(&[], 2))
            .await
            .unwrap_err();
        assert!(matches!(err, GalleryError::NoLabels));
    }

    #[tokio::test]
    async fn test_directory_source_missing_file() {
        let source = DirectorySource::new(std::env::temp_dir().join("facecam-no-such-gallery"));
        let err = source.fetch("alice", 1).await.unwrap_err();
        assert!(matches!(err, GalleryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_directory_source_loads_png() {
        let root = std::env::temp_dir().join(format!("facecam-gallery-{}", std::process::id()));
        std::fs::create_dir_all(root.join("alice")).unwrap();
        image::GrayImage::from_pixel(4, 3, image::Luma([200u8]))
            .save(root.join("alice").join("1.png"))
            .unwrap();

        let frame = DirectorySource::new(&root).fetch("alice", 1).await.unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.tag.as_deref(), Some("alice/1"));
        assert!(frame.data.iter().all(|&p| p == 200));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
