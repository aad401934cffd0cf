//! facegate-hw - Camera capture for the recognition loop.
//!
//! Provides V4L2-based frame capture converted to RGB, plus the frame
//! helpers the loop needs (dark-frame check, downscaling).

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, FrameStream, PixelFormat};
pub use frame::Frame;
