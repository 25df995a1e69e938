//! facecam-core — Types and capability traits for the face overlay demo.
//!
//! Face analysis itself is delegated to a [`VisionBackend`]; this crate
//! defines what the backend consumes and produces, how reference galleries
//! are assembled, and how results are drawn.

pub mod backend;
pub mod gallery;
pub mod overlay;
pub mod replay;
pub mod types;

pub use backend::{BackendError, DetectionOptions, VisionBackend};
pub use gallery::{build_reference_gallery, DirectorySource, GalleryError, GallerySpec, ReferenceSource};
pub use overlay::{ImageSurface, LogSurface, OverlayError, OverlayOptions, Surface};
pub use replay::ReplayBackend;
pub use types::{
    BoundingBox, Descriptor, Detection, Expressions, Face, FaceGallery, Frame, LabeledDescriptors,
    MatchResult, Matcher,
};

/// Default directory holding model weight manifests.
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("facecam/models")
}
