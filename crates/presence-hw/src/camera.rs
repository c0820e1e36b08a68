//! V4L2 capture for attendance sessions.

use crate::frame::{Frame, FrameError, PixelFormat};
use image::DynamicImage;
use presence_core::{FrameSource, SourceError};
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    NotFound(String),
    #[error("camera {0} is in use by another process")]
    Busy(String),
    #[error("{0} cannot capture video")]
    NotACaptureDevice(String),
    #[error("format setup failed: {0}")]
    Format(String),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

fn open_error(path: &str, err: io::Error) -> CameraError {
    match err.raw_os_error() {
        Some(16) => CameraError::Busy(path.to_string()),
        _ if err.kind() == io::ErrorKind::NotFound => CameraError::NotFound(path.to_string()),
        _ => CameraError::Capture(format!("{path}: {err}")),
    }
}

/// An open capture device in a luma-convertible format.
pub struct Camera {
    device: Device,
    path: String,
    format: PixelFormat,
    width: u32,
    height: u32,
}

impl Camera {
    /// Open `path` and ask for `width`x`height` YUYV. The driver has the
    /// last word on size and may fall back to GREY.
    pub fn open(path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(path).exists() {
            return Err(CameraError::NotFound(path.to_string()));
        }
        let device = Device::with_path(path).map_err(|e| open_error(path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::Capture(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotACaptureDevice(path.to_string()));
        }

        let mut wanted = device
            .format()
            .map_err(|e| CameraError::Format(e.to_string()))?;
        wanted.fourcc = FourCC::new(b"YUYV");
        wanted.width = width;
        wanted.height = height;
        let actual = device
            .set_format(&wanted)
            .map_err(|e| CameraError::Format(e.to_string()))?;
        let format = PixelFormat::from_fourcc(&actual.fourcc.repr)?;

        tracing::info!(
            device = path,
            card = %caps.card,
            width = actual.width,
            height = actual.height,
            ?format,
            "camera opened"
        );

        Ok(Self {
            device,
            path: path.to_string(),
            format,
            width: actual.width,
            height: actual.height,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Grab one frame. Each call maps a short-lived buffer stream.
    pub fn capture(&self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 2)
            .map_err(|e| CameraError::Capture(format!("mmap stream: {e}")))?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::Capture(format!("dequeue: {e}")))?;

        Ok(Frame {
            luma: self.format.to_luma(buf, self.width, self.height)?,
            width: self.width,
            height: self.height,
            sequence: meta.sequence,
        })
    }
}

/// Camera opened on [`FrameSource::acquire`] and closed on release or drop.
pub struct CameraSource {
    path: String,
    width: u32,
    height: u32,
    warmup_frames: usize,
    camera: Option<Camera>,
}

impl CameraSource {
    pub fn new(path: impl Into<String>, width: u32, height: u32, warmup_frames: usize) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            warmup_frames,
            camera: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.camera.is_some()
    }
}

impl FrameSource for CameraSource {
    fn acquire(&mut self) -> Result<(), SourceError> {
        if self.is_open() {
            return Ok(());
        }
        let camera = Camera::open(&self.path, self.width, self.height)
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        // Early frames come out dark while auto exposure settles.
        for n in 0..self.warmup_frames {
            if let Err(e) = camera.capture() {
                tracing::debug!(frame = n, error = %e, "warmup capture failed");
            }
        }
        self.camera = Some(camera);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<DynamicImage, SourceError> {
        let Some(camera) = &self.camera else {
            return Err(SourceError::Unavailable("camera not acquired".into()));
        };
        let frame = camera
            .capture()
            .map_err(|e| SourceError::CaptureFailed(e.to_string()))?;
        tracing::trace!(sequence = frame.sequence, "frame captured");
        frame
            .into_image()
            .map_err(|e| SourceError::CaptureFailed(e.to_string()))
    }

    fn release(&mut self) {
        if let Some(camera) = self.camera.take() {
            tracing::info!(device = camera.path(), "camera released");
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_CAMERA: &str = "/dev/presence-no-such-camera";

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            Camera::open(NO_CAMERA, 640, 480),
            Err(CameraError::NotFound(p)) if p == NO_CAMERA
        ));
    }

    #[test]
    fn test_acquire_missing_device_is_unavailable() {
        let mut source = CameraSource::new(NO_CAMERA, 640, 480, 0);
        assert!(matches!(source.acquire(), Err(SourceError::Unavailable(_))));
        assert!(!source.is_open());
    }

    #[test]
    fn test_release_without_acquire_is_noop() {
        let mut source = CameraSource::new(NO_CAMERA, 640, 480, 0);
        source.release();
        source.release();
        assert!(!source.is_open());
    }

    #[test]
    fn test_next_frame_requires_acquire() {
        let mut source = CameraSource::new(NO_CAMERA, 640, 480, 0);
        assert!(matches!(source.next_frame(), Err(SourceError::Unavailable(_))));
    }

    #[test]
    fn test_busy_error_mapping() {
        let err = open_error("/dev/video0", io::Error::from_raw_os_error(16));
        assert!(matches!(err, CameraError::Busy(_)));
        let err = open_error("/dev/video0", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, CameraError::NotFound(_)));
    }
}
