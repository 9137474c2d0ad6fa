//! Backend-neutral frame and device types.

use serde::{Deserialize, Serialize};

/// Bytes per packed BGR pixel.
pub const BGR_CHANNELS: usize = 3;

/// One captured video frame as packed 8-bit BGR rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    /// Wrap a packed BGR buffer, rejecting buffers of the wrong length.
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() == width as usize * height as usize * BGR_CHANNELS {
            Some(Self {
                width,
                height,
                data,
            })
        } else {
            None
        }
    }

    /// A frame filled with a single BGR colour.
    pub fn solid(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * BGR_CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&bgr);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Number of pixels in the frame.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether the frame has the given dimensions.
    pub fn has_size(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

/// Resolution, rate and encoding requested for one pulse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSpec {
    pub device_index: i32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Four-character code for writers that honour one
    pub fourcc: String,
}

/// A pull-based stream of frames from an opened device.
pub trait FrameSource {
    /// Pull the next frame, or `None` when none is ready.
    fn read(&mut self) -> Option<Frame>;

    /// Release the device. Must be safe to call more than once.
    fn close(&mut self);
}

/// Something that can open a [`FrameSource`] for a capture spec.
pub trait Camera {
    type Source: FrameSource;

    fn open(&self, spec: &CaptureSpec) -> Result<Self::Source, CameraError>;
}

/// Errors that can occur while opening a camera.
#[derive(Debug)]
pub enum CameraError {
    /// The device could not be opened
    Unavailable(String),
    /// The backend reported an error while configuring the device
    Backend(String),
}

impl std::fmt::Display for CameraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraError::Unavailable(msg) => write!(f, "Camera unavailable: {msg}"),
            CameraError::Backend(msg) => write!(f, "Camera backend error: {msg}"),
        }
    }
}

impl std::error::Error for CameraError {}
