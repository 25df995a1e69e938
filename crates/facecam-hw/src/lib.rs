//! facecam-hw — Camera acquisition for the face overlay demo.
//!
//! Defines the camera seams the session controller talks to and a V4L2
//! implementation of them.

pub mod camera;
pub mod frame;

pub use camera::{CameraDevice, CameraError, DeviceInfo, V4lCamera, VideoConstraints, VideoStream};
pub use frame::PixelFormat;
