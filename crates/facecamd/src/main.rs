use anyhow::{Context, Result};
use facecam_core::{DirectorySource, ImageSurface, LogSurface, ReplayBackend, Surface};
use facecam_hw::V4lCamera;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod machine;
mod polling;
mod session;

use config::Config;
use session::{SessionParts, SessionSettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facecamd starting");

    let config = Config::from_env()?;
    tracing::info!(
        camera = %config.camera_device,
        models = %config.model_dir.display(),
        interval_ms = config.poll_interval_ms,
        overlay = ?config.overlay,
        labels = config.gallery_labels.len(),
        "configuration loaded"
    );

    let backend = ReplayBackend::from_file(&config.recording)
        .with_context(|| format!("reading backend recording {}", config.recording.display()))?;

    let surface: Box<dyn Surface> = match &config.overlay_path {
        Some(path) => Box::new(ImageSurface::new(path)),
        None => Box::new(LogSurface),
    };

    let settings = SessionSettings {
        constraints: config.video_constraints(),
        model_dir: config.model_dir.clone(),
        poll_interval: config.poll_interval(),
        detection: config
            .overlay
            .detection_options(config.min_confidence, config.input_size),
        overlay: config.overlay,
        gallery: config.gallery_spec(),
    };
    let parts = SessionParts {
        camera: Arc::new(V4lCamera::new(&config.camera_device)),
        backend: Arc::new(backend),
        references: Arc::new(DirectorySource::new(&config.gallery_dir)),
        surface,
    };
    let session = session::spawn_session(settings, parts);

    let _conn = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(
            dbus_interface::OBJECT_PATH,
            dbus_interface::SessionService::new(session.clone()),
        )?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!(bus = dbus_interface::BUS_NAME, "facecamd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facecamd shutting down");

    let snapshot = session.shutdown().await?;
    tracing::debug!(?snapshot, "session closed");

    Ok(())
}
