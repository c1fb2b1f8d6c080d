//! likeness-hw: Imaging device abstraction.
//!
//! Every device is consumed through [`FrameSource`]: a V4L2 [`Camera`] for
//! live capture and a [`ReplaySource`] for recorded frames.

pub mod camera;
pub mod frame;
pub mod replay;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use replay::ReplaySource;
pub use source::FrameSource;
