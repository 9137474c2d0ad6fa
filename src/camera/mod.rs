//! Camera access for the MoodPulse agent.
//!
//! Backends implement [`Camera`]/[`FrameSource`]; the rest of the crate only
//! ever touches a device through [`CameraHandle`], which performs the warm-up
//! reads on open and releases the device exactly once when dropped.

pub mod noop;
pub mod types;

#[cfg(feature = "opencv")]
pub mod opencv;

use std::thread;
use std::time::Duration;

// Re-export commonly used types
pub use noop::{NoopCamera, PatternCamera};
pub use types::{Camera, CameraError, CaptureSpec, Frame, FrameSource};

#[cfg(feature = "opencv")]
pub use self::opencv::OpenCvCamera;

/// Pause between warm-up reads.
const WARMUP_PAUSE: Duration = Duration::from_millis(20);

/// An opened device, released on drop.
pub struct CameraHandle<S: FrameSource> {
    source: Option<S>,
}

impl<S: FrameSource> CameraHandle<S> {
    /// Open a device and discard `warmup_frames` reads so exposure and white
    /// balance can settle.
    pub fn open<C>(camera: &C, spec: &CaptureSpec, warmup_frames: u32) -> Result<Self, CameraError>
    where
        C: Camera<Source = S>,
    {
        let source = camera.open(spec)?;
        let mut handle = Self {
            source: Some(source),
        };

        for _ in 0..warmup_frames {
            let _ = handle.read();
            thread::sleep(WARMUP_PAUSE);
        }

        tracing::debug!(
            device = spec.device_index,
            warmup_frames,
            "camera opened"
        );
        Ok(handle)
    }

    /// Pull the next frame; `None` once closed or when no frame is ready.
    pub fn read(&mut self) -> Option<Frame> {
        self.source.as_mut()?.read()
    }

    /// Release the device. Later calls are no-ops.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
            tracing::debug!("camera released");
        }
    }

    /// Whether the device is still held.
    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }
}

impl<S: FrameSource> Drop for CameraHandle<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSource {
        reads: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl FrameSource for CountingSource {
        fn read(&mut self) -> Option<Frame> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Some(Frame::solid(1, 1, [0, 0, 0]))
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingCamera {
        reads: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl Camera for CountingCamera {
        type Source = CountingSource;

        fn open(&self, _spec: &CaptureSpec) -> Result<Self::Source, CameraError> {
            Ok(CountingSource {
                reads: self.reads.clone(),
                closes: self.closes.clone(),
            })
        }
    }

    fn spec() -> CaptureSpec {
        CaptureSpec {
            device_index: 0,
            width: 1,
            height: 1,
            fps: 15,
            fourcc: "mp4v".into(),
        }
    }

    #[test]
    fn test_warmup_reads_are_discarded() {
        let camera = CountingCamera::default();
        let handle = CameraHandle::open(&camera, &spec(), 3).unwrap();
        assert_eq!(camera.reads.load(Ordering::SeqCst), 3);
        drop(handle);
    }

    #[test]
    fn test_close_runs_once() {
        let camera = CountingCamera::default();
        {
            let mut handle = CameraHandle::open(&camera, &spec(), 0).unwrap();
            handle.close();
            handle.close();
            assert!(!handle.is_open());
            assert!(handle.read().is_none());
        }
        assert_eq!(camera.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_device() {
        let camera = CountingCamera::default();
        {
            let _handle = CameraHandle::open(&camera, &spec(), 0).unwrap();
        }
        assert_eq!(camera.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_failure_propagates() {
        let result = CameraHandle::open(&NoopCamera, &spec(), 2);
        assert!(matches!(result, Err(CameraError::Unavailable(_))));
    }
}
