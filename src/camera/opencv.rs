//! OpenCV capture backend.

use crate::camera::types::{Camera, CameraError, CaptureSpec, Frame, FrameSource};
use opencv::{
    core::{Mat, CV_8UC3},
    prelude::*,
    videoio::{
        self, VideoCapture, VideoWriter, CAP_PROP_FOURCC, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT,
        CAP_PROP_FRAME_WIDTH,
    },
};

/// A camera opened through `cv::VideoCapture`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCvCamera;

/// Frame source wrapping an open `VideoCapture`.
pub struct OpenCvSource {
    capture: Option<VideoCapture>,
}

impl Camera for OpenCvCamera {
    type Source = OpenCvSource;

    fn open(&self, spec: &CaptureSpec) -> Result<Self::Source, CameraError> {
        let mut capture = VideoCapture::new(spec.device_index, videoio::CAP_ANY)
            .map_err(|e| CameraError::Backend(e.to_string()))?;

        // Drivers may ignore any of these; the recorder checks the real size.
        let _ = capture.set(CAP_PROP_FRAME_WIDTH, f64::from(spec.width));
        let _ = capture.set(CAP_PROP_FRAME_HEIGHT, f64::from(spec.height));
        let _ = capture.set(CAP_PROP_FPS, f64::from(spec.fps));
        if let Ok(mjpg) = VideoWriter::fourcc('M', 'J', 'P', 'G') {
            let _ = capture.set(CAP_PROP_FOURCC, f64::from(mjpg));
        }

        let opened = capture
            .is_opened()
            .map_err(|e| CameraError::Backend(e.to_string()))?;
        if !opened {
            return Err(CameraError::Unavailable(format!(
                "could not open camera {}",
                spec.device_index
            )));
        }

        Ok(OpenCvSource {
            capture: Some(capture),
        })
    }
}

impl FrameSource for OpenCvSource {
    fn read(&mut self) -> Option<Frame> {
        let capture = self.capture.as_mut()?;
        let mut mat = Mat::default();
        match capture.read(&mut mat) {
            Ok(true) if !mat.empty() => mat_to_frame(&mat),
            _ => None,
        }
    }

    fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                tracing::warn!("camera release failed: {e}");
            }
        }
    }
}

/// Copy a continuous 8-bit BGR `Mat` into a [`Frame`].
fn mat_to_frame(mat: &Mat) -> Option<Frame> {
    if mat.typ() != CV_8UC3 {
        return None;
    }
    let bytes = mat.data_bytes().ok()?;
    Frame::from_bgr(mat.cols() as u32, mat.rows() as u32, bytes.to_vec())
}
