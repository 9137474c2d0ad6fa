//! Video sinks that turn captured frames into a finite artifact.
//!
//! The built-in [`Y4mSinkFactory`] writes uncompressed YUV4MPEG2 (4:4:4) and
//! needs no native libraries; OpenFace opens it through its ffmpeg backend.
//! With the `opencv` feature, [`OpenCvSinkFactory`] encodes through
//! `cv::VideoWriter` using the configured fourcc instead.

use crate::camera::{CaptureSpec, Frame};
use crate::pulse::RecorderError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Destination for the frames of one pulse.
pub trait VideoSink {
    /// Append one frame.
    fn write(&mut self, frame: &Frame) -> Result<(), RecorderError>;

    /// Flush and close the artifact. Called once, before extraction.
    fn finalize(&mut self) -> Result<(), RecorderError>;
}

/// Opens a [`VideoSink`] at a path for a capture spec.
pub trait SinkFactory {
    /// File extension of the artifacts this factory writes.
    fn extension(&self) -> &'static str;

    /// Open the write target, failing if it cannot be created.
    fn create(&self, path: &Path, spec: &CaptureSpec) -> Result<Box<dyn VideoSink>, RecorderError>;
}

/// Factory for [`Y4mWriter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Y4mSinkFactory;

impl SinkFactory for Y4mSinkFactory {
    fn extension(&self) -> &'static str {
        "y4m"
    }

    fn create(&self, path: &Path, spec: &CaptureSpec) -> Result<Box<dyn VideoSink>, RecorderError> {
        Ok(Box::new(Y4mWriter::create(path, spec)?))
    }
}

/// YUV4MPEG2 writer with BT.601 studio-range conversion.
pub struct Y4mWriter {
    out: Option<BufWriter<File>>,
    width: u32,
    height: u32,
    plane: Vec<u8>,
}

impl Y4mWriter {
    pub fn create(path: &Path, spec: &CaptureSpec) -> Result<Self, RecorderError> {
        let file = File::create(path).map_err(|e| {
            RecorderError::WriterOpen(format!("could not create {}: {e}", path.display()))
        })?;
        let mut out = BufWriter::new(file);
        writeln!(
            out,
            "YUV4MPEG2 W{} H{} F{}:1 Ip A1:1 C444",
            spec.width, spec.height, spec.fps
        )
        .map_err(|e| RecorderError::WriterOpen(e.to_string()))?;

        Ok(Self {
            out: Some(out),
            width: spec.width,
            height: spec.height,
            plane: Vec::new(),
        })
    }
}

impl VideoSink for Y4mWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), RecorderError> {
        if !frame.has_size(self.width, self.height) {
            return Err(RecorderError::FrameSize {
                expected: (self.width, self.height),
                actual: (frame.width, frame.height),
            });
        }
        let out = self.out.as_mut().ok_or(RecorderError::Closed)?;

        out.write_all(b"FRAME\n").map_err(io_error)?;
        for component in 0..3 {
            self.plane.clear();
            self.plane.extend(frame.data.chunks_exact(3).map(|bgr| {
                let yuv = bgr_to_yuv(bgr[0], bgr[1], bgr[2]);
                yuv[component]
            }));
            out.write_all(&self.plane).map_err(io_error)?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), RecorderError> {
        if let Some(mut out) = self.out.take() {
            out.flush().map_err(io_error)?;
        }
        Ok(())
    }
}

fn io_error(e: std::io::Error) -> RecorderError {
    RecorderError::Io(e.to_string())
}

/// Integer BT.601 conversion to studio-range Y'CbCr.
pub fn bgr_to_yuv(b: u8, g: u8, r: u8) -> [u8; 3] {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    [clamp_u8(y), clamp_u8(u), clamp_u8(v)]
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(feature = "opencv")]
pub use self::cv::OpenCvSinkFactory;

#[cfg(feature = "opencv")]
mod cv {
    use super::{SinkFactory, VideoSink};
    use crate::camera::{CaptureSpec, Frame};
    use crate::pulse::RecorderError;
    use opencv::{
        core::{Mat, Size},
        prelude::*,
        videoio::VideoWriter,
    };
    use std::path::Path;

    /// Factory for `cv::VideoWriter` sinks.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct OpenCvSinkFactory;

    struct OpenCvSink {
        writer: Option<VideoWriter>,
        width: u32,
        height: u32,
    }

    fn cv_error(e: opencv::Error) -> RecorderError {
        RecorderError::Io(e.to_string())
    }

    impl SinkFactory for OpenCvSinkFactory {
        fn extension(&self) -> &'static str {
            "mp4"
        }

        fn create(
            &self,
            path: &Path,
            spec: &CaptureSpec,
        ) -> Result<Box<dyn VideoSink>, RecorderError> {
            let mut code = spec.fourcc.chars();
            let (Some(a), Some(b), Some(c), Some(d)) =
                (code.next(), code.next(), code.next(), code.next())
            else {
                return Err(RecorderError::WriterOpen(format!(
                    "invalid fourcc {:?}",
                    spec.fourcc
                )));
            };
            let fourcc = VideoWriter::fourcc(a, b, c, d).map_err(cv_error)?;
            let path_str = path.to_string_lossy();
            let writer = VideoWriter::new(
                &path_str,
                fourcc,
                f64::from(spec.fps),
                Size::new(spec.width as i32, spec.height as i32),
                true,
            )
            .map_err(|e| RecorderError::WriterOpen(e.to_string()))?;

            if !writer.is_opened().map_err(cv_error)? {
                return Err(RecorderError::WriterOpen(format!(
                    "VideoWriter failed to open {} (try fourcc 'XVID' and .avi)",
                    path.display()
                )));
            }

            Ok(Box::new(OpenCvSink {
                writer: Some(writer),
                width: spec.width,
                height: spec.height,
            }))
        }
    }

    impl VideoSink for OpenCvSink {
        fn write(&mut self, frame: &Frame) -> Result<(), RecorderError> {
            if !frame.has_size(self.width, self.height) {
                return Err(RecorderError::FrameSize {
                    expected: (self.width, self.height),
                    actual: (frame.width, frame.height),
                });
            }
            let writer = self.writer.as_mut().ok_or(RecorderError::Closed)?;
            let flat = Mat::from_slice(&frame.data).map_err(cv_error)?;
            let image = flat.reshape(3, frame.height as i32).map_err(cv_error)?;
            writer.write(&*image).map_err(cv_error)
        }

        fn finalize(&mut self) -> Result<(), RecorderError> {
            if let Some(mut writer) = self.writer.take() {
                writer.release().map_err(cv_error)?;
            }
            Ok(())
        }
    }
}
