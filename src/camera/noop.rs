//! Cameras that need no device.
//!
//! [`NoopCamera`] stands in when the crate is built without a capture backend
//! so the scheduler still runs and skips every pulse. [`PatternCamera`] yields
//! a moving grey test pattern, useful for checking the recording and
//! extraction path without hardware.

use crate::camera::types::{Camera, CameraError, CaptureSpec, Frame, FrameSource};
use std::time::{Duration, Instant};

/// A camera that can never be opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCamera;

/// Source type for [`NoopCamera`]; never constructed.
pub struct NoopSource;

impl FrameSource for NoopSource {
    fn read(&mut self) -> Option<Frame> {
        None
    }

    fn close(&mut self) {}
}

impl Camera for NoopCamera {
    type Source = NoopSource;

    fn open(&self, spec: &CaptureSpec) -> Result<Self::Source, CameraError> {
        Err(CameraError::Unavailable(format!(
            "device {} requested but no capture backend was compiled in (enable the `opencv` feature)",
            spec.device_index
        )))
    }
}

/// A synthetic camera producing frames at the requested rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternCamera;

/// Frame source for [`PatternCamera`].
pub struct PatternSource {
    width: u32,
    height: u32,
    interval: Duration,
    next_due: Instant,
    tick: u8,
    open: bool,
}

impl Camera for PatternCamera {
    type Source = PatternSource;

    fn open(&self, spec: &CaptureSpec) -> Result<Self::Source, CameraError> {
        Ok(PatternSource {
            width: spec.width,
            height: spec.height,
            interval: Duration::from_secs(1) / spec.fps.max(1),
            next_due: Instant::now(),
            tick: 0,
            open: true,
        })
    }
}

impl FrameSource for PatternSource {
    fn read(&mut self) -> Option<Frame> {
        if !self.open || Instant::now() < self.next_due {
            return None;
        }
        self.next_due += self.interval;
        self.tick = self.tick.wrapping_add(4);
        let level = 64 + self.tick / 2;
        Some(Frame::solid(self.width, self.height, [level, level, level]))
    }

    fn close(&mut self) {
        self.open = false;
    }
}
