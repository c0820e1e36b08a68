//! presence-hw: frame sources for attendance sessions.
//!
//! Provides a V4L2 camera source and a replay source that reads frames
//! from a directory of images.

pub mod camera;
pub mod frame;
pub mod replay;

pub use camera::{Camera, CameraError, CameraSource};
pub use frame::{Frame, FrameError, PixelFormat};
pub use replay::ReplaySource;
