use serde::{Deserialize, Serialize};

/// Label reported for a face that matched no gallery entry.
pub const UNKNOWN_LABEL: &str = "unknown";

/// An 8-bit luma frame, either sampled from a camera or loaded from disk.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    /// Identifies still images loaded from disk, e.g. `"alice/1"`.
    pub tag: Option<String>,
}

impl Frame {
    /// Build a frame from a decoded image, converting it to luma.
    pub fn from_image(image: &image::DynamicImage, tag: Option<String>) -> Self {
        let luma = image.to_luma8();
        let (width, height) = luma.dimensions();
        Self {
            data: luma.into_raw(),
            width,
            height,
            sequence: 0,
            tag,
        }
    }
}

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Facial expression probabilities as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Expressions {
    pub neutral: f32,
    pub happy: f32,
    pub sad: f32,
    pub angry: f32,
    pub fearful: f32,
    pub disgusted: f32,
    pub surprised: f32,
}

impl Expressions {
    /// The highest scoring expression and its probability.
    pub fn dominant(&self) -> (&'static str, f32) {
        let scores = [
            ("neutral", self.neutral),
            ("happy", self.happy),
            ("sad", self.sad),
            ("angry", self.angry),
            ("fearful", self.fearful),
            ("disgusted", self.disgusted),
            ("surprised", self.surprised),
        ];
        scores
            .into_iter()
            .fold(("neutral", f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 { cur } else { best }
            })
    }
}

/// Face descriptor vector (128-dimensional for the usual recognition nets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute Euclidean distance between two descriptors.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found by the backend in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<(f32, f32)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Expressions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
}

/// Reference descriptors collected for one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledDescriptors {
    pub label: String,
    pub descriptors: Vec<Descriptor>,
}

/// Labelled reference descriptors that probe faces are matched against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceGallery {
    pub entries: Vec<LabeledDescriptors>,
    /// Maximum distance at which a probe still counts as a match.
    pub distance_threshold: f32,
}

impl FaceGallery {
    pub fn new(entries: Vec<LabeledDescriptors>, distance_threshold: f32) -> Self {
        Self {
            entries,
            distance_threshold,
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.label.as_str())
    }
}

/// Result of matching a probe descriptor against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Best label, or [`UNKNOWN_LABEL`] when nothing was close enough.
    pub label: String,
    /// Distance to the best label (mean over its reference descriptors).
    pub distance: f32,
}

impl MatchResult {
    pub fn unknown(distance: f32) -> Self {
        Self {
            matched: false,
            label: UNKNOWN_LABEL.to_string(),
            distance,
        }
    }
}

/// Strategy for comparing a probe descriptor against a gallery.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, gallery: &FaceGallery) -> MatchResult;
}

/// Nearest-label matcher using the mean Euclidean distance to each label's
/// reference descriptors.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Descriptor, gallery: &FaceGallery) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.entries.iter().enumerate() {
            if entry.descriptors.is_empty() {
                continue;
            }
            let mean = entry
                .descriptors
                .iter()
                .map(|d| probe.euclidean_distance(d))
                .sum::<f32>()
                / entry.descriptors.len() as f32;
            if mean < best_dist {
                best_dist = mean;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= gallery.distance_threshold => MatchResult {
                matched: true,
                label: gallery.entries[idx].label.clone(),
                distance: best_dist,
            },
            Some(_) => MatchResult::unknown(best_dist),
            None => MatchResult::unknown(f32::INFINITY),
        }
    }
}

/// A detection paired with its identity, ready to be drawn.
#[derive(Debug, Clone, Serialize)]
pub struct Face {
    #[serde(flatten)]
    pub detection: Detection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<MatchResult>,
}
