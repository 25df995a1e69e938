use facecam_core::{GallerySpec, OverlayOptions};
use facecam_hw::VideoConstraints;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Seconds to wait for the first frame after opening the camera.
    pub camera_ready_timeout_secs: u64,
    /// Directory containing model weight manifests.
    pub model_dir: PathBuf,
    /// Backend recording replayed by the daemon.
    pub recording: PathBuf,
    /// Period of the detection loop.
    pub poll_interval_ms: u64,
    pub overlay: OverlayOptions,
    /// Where the annotated frame is written; logged only when unset.
    pub overlay_path: Option<PathBuf>,
    pub min_confidence: f32,
    pub input_size: u32,
    /// Root of `<label>/<index>.png` reference images.
    pub gallery_dir: PathBuf,
    /// Identities to recognise. Empty disables the identity overlay.
    pub gallery_labels: Vec<String>,
    pub gallery_images_per_label: usize,
    /// Euclidean distance above which a face is reported as unknown.
    pub match_threshold: f32,
}

impl Config {
    /// Load configuration from `FACECAM_*` environment variables with defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let model_dir = std::env::var("FACECAM_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facecam_core::default_model_dir());

        let gallery_labels: Vec<String> = std::env::var("FACECAM_GALLERY_LABELS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let mut overlay = match std::env::var("FACECAM_OVERLAY") {
            Ok(v) => OverlayOptions::parse(&v)?,
            Err(_) => OverlayOptions::default(),
        };
        if !gallery_labels.is_empty() {
            overlay.labels = true;
        }

        let config = Self {
            camera_device: std::env::var("FACECAM_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            frame_width: env_parse("FACECAM_FRAME_WIDTH", 720),
            frame_height: env_parse("FACECAM_FRAME_HEIGHT", 560),
            camera_ready_timeout_secs: env_parse("FACECAM_CAMERA_READY_TIMEOUT_SECS", 5),
            recording: std::env::var("FACECAM_RECORDING")
                .map(PathBuf::from)
                .unwrap_or_else(|_| model_dir.join("recording.json")),
            model_dir: model_dir.clone(),
            poll_interval_ms: env_parse("FACECAM_POLL_INTERVAL_MS", 1000),
            overlay,
            overlay_path: std::env::var("FACECAM_OVERLAY_PATH").ok().map(PathBuf::from),
            min_confidence: env_parse("FACECAM_MIN_CONFIDENCE", 0.5),
            input_size: env_parse("FACECAM_INPUT_SIZE", 416),
            gallery_dir: std::env::var("FACECAM_GALLERY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| model_dir.join("labeled_images")),
            gallery_labels,
            gallery_images_per_label: env_parse("FACECAM_GALLERY_IMAGES_PER_LABEL", 2),
            match_threshold: env_parse("FACECAM_MATCH_THRESHOLD", 0.6),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("FACECAM_POLL_INTERVAL_MS must be at least 1");
        }
        if self.camera_ready_timeout_secs == 0 {
            anyhow::bail!("FACECAM_CAMERA_READY_TIMEOUT_SECS must be at least 1");
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            anyhow::bail!(
                "frame size must be non-zero (got {}x{})",
                self.frame_width,
                self.frame_height
            );
        }
        Ok(())
    }

    pub fn video_constraints(&self) -> VideoConstraints {
        VideoConstraints {
            width: self.frame_width,
            height: self.frame_height,
            ready_timeout: Duration::from_secs(self.camera_ready_timeout_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Gallery to build after the models load, if identities are configured.
    pub fn gallery_spec(&self) -> Option<GallerySpec> {
        if self.gallery_labels.is_empty() {
            return None;
        }
        Some(GallerySpec {
            labels: self.gallery_labels.clone(),
            images_per_label: self.gallery_images_per_label,
            distance_threshold: self.match_threshold,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            camera_device: "/dev/video0".into(),
            frame_width: 720,
            frame_height: 560,
            camera_ready_timeout_secs: 5,
            model_dir: PathBuf::from("/models"),
            recording: PathBuf::from("/models/recording.json"),
            poll_interval_ms: 1000,
            overlay: OverlayOptions::default(),
            overlay_path: None,
            min_confidence: 0.5,
            input_size: 416,
            gallery_dir: PathBuf::from("/models/labeled_images"),
            gallery_labels: Vec::new(),
            gallery_images_per_label: 2,
            match_threshold: 0.6,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let cfg = Config { poll_interval_ms: 0, ..config() };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("FACECAM_POLL_INTERVAL_MS"));
    }

    #[test]
    fn test_zero_ready_timeout_rejected() {
        let cfg = Config { camera_ready_timeout_secs: 0, ..config() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_frame_size_rejected() {
        let cfg = Config { frame_width: 0, ..config() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_gallery_spec_only_with_labels() {
        assert!(config().gallery_spec().is_none());
        let cfg = Config {
            gallery_labels: vec!["alice".into()],
            gallery_images_per_label: 3,
            ..config()
        };
        let spec = cfg.gallery_spec().unwrap();
        assert_eq!(spec.labels, vec!["alice".to_string()]);
        assert_eq!(spec.images_per_label, 3);
    }
}
