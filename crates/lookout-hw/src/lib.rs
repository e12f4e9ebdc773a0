//! lookout-hw: Frame sources for live recognition.
//!
//! V4L2 camera capture with YUYV, MJPG and GREY conversion to RGB, and a
//! directory replay source for recorded frames.

pub mod camera;
pub mod frame;
pub mod sequence;

pub use camera::{Camera, CameraError, PixelFormat};
pub use sequence::ImageSequence;
