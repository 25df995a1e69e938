//! Camera acquisition: the [`CameraDevice`]/[`VideoStream`] seams and their
//! V4L2 implementation via the `v4l` crate.

use crate::frame::{self, PixelFormat};
use async_trait::async_trait;
use facecam_core::Frame;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera did not become ready within {0:?}")]
    NotReady(Duration),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("stream has been stopped")]
    Stopped,
}

/// Requested capture parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    /// How long to wait for the first frame before giving up.
    pub ready_timeout: Duration,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 720,
            height: 560,
            ready_timeout: Duration::from_secs(5),
        }
    }
}

/// A source of camera streams.
#[async_trait]
pub trait CameraDevice: Send + Sync + 'static {
    /// Open a stream and wait until it delivers frames.
    async fn acquire(&self, constraints: &VideoConstraints) -> Result<Arc<dyn VideoStream>, CameraError>;
}

/// A live camera stream. Stopping it releases the underlying device.
#[async_trait]
pub trait VideoStream: Send + Sync {
    /// Sample the current frame.
    async fn read_frame(&self) -> Result<Frame, CameraError>;
    /// Stop all tracks. Idempotent.
    fn stop(&self);
    fn is_live(&self) -> bool;
    fn resolution(&self) -> (u32, u32);
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// V4L2 camera addressed by device path (e.g. `/dev/video0`).
pub struct V4lCamera {
    device_path: PathBuf,
}

impl V4lCamera {
    pub fn new(device_path: impl Into<PathBuf>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

fn open_error(path: &str, e: std::io::Error) -> CameraError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        CameraError::PermissionDenied(format!("{path}: {e}"))
    } else if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
        CameraError::DeviceBusy(path.to_string())
    } else {
        CameraError::DeviceNotFound(format!("{path}: {e}"))
    }
}

/// Open the device and negotiate a format close to the requested size.
fn open_device(path: &Path, constraints: &VideoConstraints) -> Result<V4lShared, CameraError> {
    let path_str = path.display().to_string();
    if !path.exists() {
        return Err(CameraError::DeviceNotFound(path_str));
    }

    let device = Device::with_path(path).map_err(|e| open_error(&path_str, e))?;

    let caps = device.query_caps().map_err(|e| {
        CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
    })?;
    tracing::info!(device = %path_str, driver = %caps.driver, card = %caps.card, "opened camera");

    if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
        return Err(CameraError::StreamingNotSupported);
    }

    let mut fmt = device.format().map_err(|e| {
        CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
    })?;
    fmt.fourcc = FourCC::new(b"YUYV");
    fmt.width = constraints.width;
    fmt.height = constraints.height;

    let negotiated = device.set_format(&fmt).map_err(|e| {
        CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
    })?;

    let fourcc = negotiated.fourcc;
    let pixel_format = if fourcc == FourCC::new(b"YUYV") {
        PixelFormat::Yuyv
    } else if fourcc == FourCC::new(b"GREY") {
        PixelFormat::Grey
    } else if fourcc == FourCC::new(b"Y16 ") {
        PixelFormat::Y16
    } else {
        return Err(CameraError::FormatNegotiationFailed(format!(
            "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
        )));
    };

    tracing::info!(
        width = negotiated.width,
        height = negotiated.height,
        fourcc = ?fourcc,
        "negotiated format"
    );

    Ok(V4lShared {
        slot: DeviceSlot::new(device),
        width: negotiated.width,
        height: negotiated.height,
        pixel_format,
        capture_timeout: constraints.ready_timeout,
    })
}

#[async_trait]
impl CameraDevice for V4lCamera {
    async fn acquire(&self, constraints: &VideoConstraints) -> Result<Arc<dyn VideoStream>, CameraError> {
        let path = self.device_path.clone();
        let opts = constraints.clone();
        let shared = tokio::task::spawn_blocking(move || open_device(&path, &opts))
            .await
            .map_err(|e| CameraError::CaptureFailed(format!("open task: {e}")))??;

        let stream = V4lStream {
            shared: Arc::new(shared),
        };
        wait_until_ready(Arc::new(stream), constraints.ready_timeout).await
    }
}

/// Hand back `stream` once it delivers its first frame. A stream that stays
/// silent for `timeout` is stopped and reported as [`CameraError::NotReady`].
async fn wait_until_ready(
    stream: Arc<dyn VideoStream>,
    timeout: Duration,
) -> Result<Arc<dyn VideoStream>, CameraError> {
    match tokio::time::timeout(timeout, stream.read_frame()).await {
        Ok(Ok(first)) => {
            tracing::debug!(seq = first.sequence, "first frame received");
            Ok(stream)
        }
        Ok(Err(e)) => {
            stream.stop();
            Err(e)
        }
        Err(_) => {
            stream.stop();
            Err(CameraError::NotReady(timeout))
        }
    }
}

/// An open device shared between capture threads and whoever stops the
/// stream. Stopping never waits for a capture in flight; the device is
/// closed by whichever side finishes last.
struct DeviceSlot<D> {
    device: Mutex<Option<D>>,
    live: AtomicBool,
}

impl<D> DeviceSlot<D> {
    fn new(device: D) -> Self {
        Self {
            device: Mutex::new(Some(device)),
            live: AtomicBool::new(true),
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Run `f` against the open device. Blocks while another capture holds it.
    fn with_device<T>(&self, f: impl FnOnce(&D) -> Result<T, CameraError>) -> Result<T, CameraError> {
        let mut guard = self
            .device
            .lock()
            .map_err(|_| CameraError::CaptureFailed("device lock poisoned".into()))?;
        let result = match guard.as_ref() {
            Some(device) if self.is_live() => f(device),
            _ => Err(CameraError::Stopped),
        };
        if !self.is_live() {
            guard.take();
        }
        drop(guard);

        // stop() may have flipped the flag after the check above while we
        // still held the lock.
        if !self.is_live() {
            if let Ok(mut guard) = self.device.try_lock() {
                guard.take();
            }
        }
        result
    }

    /// Mark the slot stopped and close the device unless a capture holds it.
    /// Returns false if it was already stopped.
    fn stop(&self) -> bool {
        if !self.live.swap(false, Ordering::AcqRel) {
            return false;
        }
        match self.device.try_lock() {
            // Dropping the device closes the fd and ends streaming.
            Ok(mut guard) => drop(guard.take()),
            Err(TryLockError::Poisoned(poisoned)) => drop(poisoned.into_inner().take()),
            Err(TryLockError::WouldBlock) => {
                tracing::debug!("capture in flight; device closes when it returns");
            }
        }
        true
    }
}

struct V4lShared {
    slot: DeviceSlot<Device>,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    /// Upper bound on a single dequeue.
    capture_timeout: Duration,
}

impl V4lShared {
    fn capture(&self) -> Result<Frame, CameraError> {
        self.slot.with_device(|device| {
            let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;
            stream.set_timeout(self.capture_timeout);
            let (buf, meta) = stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

            let data = frame::decode_luma(self.pixel_format, buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;

            Ok(Frame {
                data,
                width: self.width,
                height: self.height,
                sequence: meta.sequence,
                tag: None,
            })
        })
    }
}

/// An open V4L2 capture stream.
pub struct V4lStream {
    shared: Arc<V4lShared>,
}

#[async_trait]
impl VideoStream for V4lStream {
    async fn read_frame(&self) -> Result<Frame, CameraError> {
        if !self.is_live() {
            return Err(CameraError::Stopped);
        }
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.capture())
            .await
            .map_err(|e| CameraError::CaptureFailed(format!("capture task: {e}")))?
    }

    fn stop(&self) {
        if self.shared.slot.stop() {
            tracing::info!("camera stream stopped");
        }
    }

    fn is_live(&self) -> bool {
        self.shared.slot.is_live()
    }

    fn resolution(&self) -> (u32, u32) {
        (self.shared.width, self.shared.height)
    }
}

impl Drop for V4lStream {
    fn drop(&mut self) {
        self.stop();
    }
}
