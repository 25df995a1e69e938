//! Drawing surfaces for detection overlays.

use crate::backend::DetectionOptions;
use crate::types::{BoundingBox, Face, Frame};
use image::{Rgb, RgbImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BOX_THICKNESS: u32 = 2;
const LANDMARK_RADIUS: i64 = 1;
const COLOR_FACE: Rgb<u8> = Rgb([0, 200, 255]);
const COLOR_KNOWN: Rgb<u8> = Rgb([0, 220, 0]);
const COLOR_UNKNOWN: Rgb<u8> = Rgb([230, 40, 40]);
const COLOR_LANDMARK: Rgb<u8> = Rgb([255, 220, 0]);

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("frame buffer too short: expected {expected}, got {actual}")]
    FrameSize { expected: usize, actual: usize },
    #[error("failed to write overlay image: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to write overlay metadata: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown overlay layer: {0}")]
    UnknownLayer(String),
}

/// Which layers to draw. Each demo variant enables a different subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayOptions {
    pub boxes: bool,
    pub landmarks: bool,
    pub expressions: bool,
    pub labels: bool,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            boxes: true,
            landmarks: false,
            expressions: false,
            labels: false,
        }
    }
}

impl OverlayOptions {
    /// Parse a comma-separated layer list such as `"boxes,landmarks"`.
    pub fn parse(spec: &str) -> Result<Self, OverlayError> {
        let mut opts = Self {
            boxes: false,
            landmarks: false,
            expressions: false,
            labels: false,
        };
        for layer in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match layer {
                "boxes" => opts.boxes = true,
                "landmarks" => opts.landmarks = true,
                "expressions" => opts.expressions = true,
                "labels" => opts.labels = true,
                other => return Err(OverlayError::UnknownLayer(other.to_string())),
            }
        }
        Ok(opts)
    }

    /// Backend options needed to produce the enabled layers.
    pub fn detection_options(&self, min_confidence: f32, input_size: u32) -> DetectionOptions {
        DetectionOptions {
            min_confidence,
            input_size,
            with_landmarks: self.landmarks || self.labels,
            with_expressions: self.expressions,
            with_descriptors: self.labels,
        }
    }
}

/// Something detections can be drawn onto.
pub trait Surface: Send {
    /// Erase whatever was drawn by the previous render.
    fn clear(&mut self);

    /// Draw the faces found in `frame`.
    fn render(&mut self, frame: &Frame, faces: &[Face], overlay: &OverlayOptions)
        -> Result<(), OverlayError>;

    /// Called when a ready video stream is attached to the surface.
    fn attach(&mut self, _width: u32, _height: u32) {}

    /// Called when the video stream is detached from the surface.
    fn detach(&mut self) {
        self.clear();
    }
}

/// Logs each rendered face instead of drawing it.
#[derive(Default)]
pub struct LogSurface;

impl Surface for LogSurface {
    fn attach(&mut self, width: u32, height: u32) {
        tracing::info!(width, height, "stream attached");
    }

    fn clear(&mut self) {}

    fn render(
        &mut self,
        frame: &Frame,
        faces: &[Face],
        overlay: &OverlayOptions,
    ) -> Result<(), OverlayError> {
        tracing::info!(seq = frame.sequence, faces = faces.len(), "frame analysed");
        for face in faces {
            let b = &face.detection.bbox;
            let label = overlay
                .labels
                .then(|| face.identity.as_ref().map(|m| m.label.as_str()))
                .flatten();
            let expression = overlay
                .expressions
                .then(|| face.detection.expressions.map(|e| e.dominant().0))
                .flatten();
            tracing::info!(
                x = b.x,
                y = b.y,
                width = b.width,
                height = b.height,
                confidence = b.confidence,
                label,
                expression,
                "face"
            );
        }
        Ok(())
    }
}

/// Per-face metadata written next to the overlay image.
#[derive(Serialize)]
struct FaceRecord<'a> {
    #[serde(rename = "box")]
    bbox: &'a BoundingBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expression: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expression_score: Option<f32>,
}

#[derive(Serialize)]
struct OverlayRecord<'a> {
    sequence: u32,
    width: u32,
    height: u32,
    faces: Vec<FaceRecord<'a>>,
}

/// Draws the annotated frame into a PNG and writes face labels to a JSON
/// sidecar (`<path>.json`). Both files are replaced atomically.
pub struct ImageSurface {
    path: PathBuf,
    canvas: Option<RgbImage>,
}

impl ImageSurface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            canvas: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sidecar_path(&self) -> PathBuf {
        let mut p = self.path.clone().into_os_string();
        p.push(".json");
        PathBuf::from(p)
    }

    fn write_atomic(target: &Path, write: impl FnOnce(&Path) -> Result<(), OverlayError>) -> Result<(), OverlayError> {
        let mut tmp = target.to_path_buf().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        write(&tmp)?;
        std::fs::rename(&tmp, target)?;
        Ok(())
    }
}

impl Surface for ImageSurface {
    fn clear(&mut self) {
        self.canvas = None;
    }

    fn render(
        &mut self,
        frame: &Frame,
        faces: &[Face],
        overlay: &OverlayOptions,
    ) -> Result<(), OverlayError> {
        let canvas = self.canvas.insert(luma_to_rgb(frame)?);

        for face in faces {
            let color = match &face.identity {
                Some(m) if overlay.labels && m.matched => COLOR_KNOWN,
                Some(_) if overlay.labels => COLOR_UNKNOWN,
                _ => COLOR_FACE,
            };
            if overlay.boxes || overlay.labels {
                draw_box(canvas, &face.detection.bbox, color);
            }
            if overlay.landmarks {
                for &(x, y) in face.detection.landmarks.iter().flatten() {
                    draw_point(canvas, x, y, COLOR_LANDMARK);
                }
            }
        }

        let record = OverlayRecord {
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
            faces: faces
                .iter()
                .map(|f| {
                    let identity = f.identity.as_ref().filter(|_| overlay.labels);
                    let expression = f.detection.expressions.filter(|_| overlay.expressions).map(|e| e.dominant());
                    FaceRecord {
                        bbox: &f.detection.bbox,
                        label: identity.map(|m| m.label.as_str()),
                        distance: identity.map(|m| m.distance),
                        expression: expression.map(|e| e.0),
                        expression_score: expression.map(|e| e.1),
                    }
                })
                .collect(),
        };

        Self::write_atomic(&self.path, |tmp| {
            canvas.save_with_format(tmp, image::ImageFormat::Png)?;
            Ok(())
        })?;
        Self::write_atomic(&self.sidecar_path(), |tmp| {
            std::fs::write(tmp, serde_json::to_vec_pretty(&record)?)?;
            Ok(())
        })
    }

    fn detach(&mut self) {
        self.clear();
        for p in [self.path.clone(), self.sidecar_path()] {
            if let Err(e) = std::fs::remove_file(&p) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %p.display(), error = %e, "failed to remove overlay file");
                }
            }
        }
    }
}

fn luma_to_rgb(frame: &Frame) -> Result<RgbImage, OverlayError> {
    let expected = (frame.width * frame.height) as usize;
    if frame.data.len() < expected {
        return Err(OverlayError::FrameSize {
            expected,
            actual: frame.data.len(),
        });
    }
    Ok(RgbImage::from_fn(frame.width, frame.height, |x, y| {
        let v = frame.data[(y * frame.width + x) as usize];
        Rgb([v, v, v])
    }))
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_box(canvas: &mut RgbImage, b: &BoundingBox, color: Rgb<u8>) {
    let x0 = b.x.round() as i64;
    let y0 = b.y.round() as i64;
    let x1 = (b.x + b.width).round() as i64;
    let y1 = (b.y + b.height).round() as i64;

    for t in 0..BOX_THICKNESS as i64 {
        for x in x0..=x1 {
            put(canvas, x, y0 + t, color);
            put(canvas, x, y1 - t, color);
        }
        for y in y0..=y1 {
            put(canvas, x0 + t, y, color);
            put(canvas, x1 - t, y, color);
        }
    }
}

fn draw_point(canvas: &mut RgbImage, x: f32, y: f32, color: Rgb<u8>) {
    let cx = x.round() as i64;
    let cy = y.round() as i64;
    for dy in -LANDMARK_RADIUS..=LANDMARK_RADIUS {
        for dx in -LANDMARK_RADIUS..=LANDMARK_RADIUS {
            put(canvas, cx + dx, cy + dy, color);
        }
    }
}
