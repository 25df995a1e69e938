//! Fixed-period detection loop.
//!
//! One [`PollingTask`] samples the camera, runs the backend and redraws the
//! surface on every tick. A failed tick is logged and the loop carries on.

use facecam_core::{
    BackendError, DetectionOptions, Face, FaceGallery, OverlayError, OverlayOptions, Surface,
    VisionBackend,
};
use facecam_hw::{CameraError, VideoStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Surface shared between the controller (which detaches it) and the loop.
pub type SharedSurface = Arc<Mutex<Box<dyn Surface>>>;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
    #[error("overlay: {0}")]
    Overlay(#[from] OverlayError),
    #[error("surface lock poisoned")]
    SurfacePoisoned,
    #[error("render task: {0}")]
    RenderTask(String),
}

/// Everything one tick needs.
pub struct PollContext {
    pub stream: Arc<dyn VideoStream>,
    pub backend: Arc<dyn VisionBackend>,
    pub gallery: Option<Arc<FaceGallery>>,
    pub surface: SharedSurface,
    pub options: DetectionOptions,
    pub overlay: OverlayOptions,
}

/// Run a single detect-and-draw cycle. Returns the number of faces drawn.
pub async fn run_tick(ctx: &PollContext) -> Result<usize, FrameError> {
    let frame = ctx.stream.read_frame().await?;
    let detections = ctx.backend.detect_faces(&frame, &ctx.options).await?;

    let faces: Vec<Face> = detections
        .into_iter()
        .map(|detection| {
            let identity = match (&ctx.gallery, &detection.descriptor) {
                (Some(gallery), Some(descriptor)) => {
                    Some(ctx.backend.match_descriptor(descriptor, gallery))
                }
                _ => None,
            };
            Face {
                detection,
                identity,
            }
        })
        .collect();

    let drawn = faces.len();
    let stream = Arc::clone(&ctx.stream);
    let surface = Arc::clone(&ctx.surface);
    let overlay = ctx.overlay;
    tokio::task::spawn_blocking(move || -> Result<(), FrameError> {
        let mut surface = surface.lock().map_err(|_| FrameError::SurfacePoisoned)?;
        // A released stream has already been detached from the surface.
        if !stream.is_live() {
            return Err(CameraError::Stopped.into());
        }
        surface.clear();
        surface.render(&frame, &faces, &overlay)?;
        Ok(())
    })
    .await
    .map_err(|e| FrameError::RenderTask(e.to_string()))??;
    Ok(drawn)
}

/// Handle to the running loop. Dropping it cancels the loop at its next
/// suspension point.
pub struct PollingTask {
    handle: JoinHandle<()>,
}

impl PollingTask {
    /// Start the loop; the first tick fires one `period` from now.
    pub fn spawn(ctx: PollContext, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(period_ms = period.as_millis() as u64, "polling started");

            loop {
                ticker.tick().await;
                match run_tick(&ctx).await {
                    Ok(faces) => tracing::debug!(faces, "tick"),
                    Err(e) => tracing::warn!(error = %e, "frame skipped"),
                }
            }
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PollingTask {
    fn drop(&mut self) {
        self.handle.abort();
        tracing::info!("polling stopped");
    }
}
