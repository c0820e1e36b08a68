//! Raw camera frames and their conversion to luma images.

use image::{DynamicImage, GrayImage};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer too short: need {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(String),
}

/// Pixel layouts the camera path can turn into luma.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, `[Y0, U, Y1, V]` per pixel pair.
    Yuyv,
    /// One byte of luma per pixel.
    Grey,
}

impl PixelFormat {
    pub fn from_fourcc(code: &[u8; 4]) -> Result<Self, FrameError> {
        match code {
            b"YUYV" => Ok(Self::Yuyv),
            b"GREY" => Ok(Self::Grey),
            other => Err(FrameError::UnsupportedFormat(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Yuyv => 2,
            Self::Grey => 1,
        }
    }

    /// Extract `width * height` luma bytes from a driver buffer.
    ///
    /// Drivers may pad the buffer; anything past the image is ignored.
    pub fn to_luma(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        let pixels = width as usize * height as usize;
        let expected = pixels * self.bytes_per_pixel();
        let Some(image) = buf.get(..expected) else {
            return Err(FrameError::InvalidLength {
                expected,
                actual: buf.len(),
            });
        };
        Ok(match self {
            Self::Yuyv => image.chunks_exact(2).map(|px| px[0]).collect(),
            Self::Grey => image.to_vec(),
        })
    }
}

/// One captured frame in luma form.
#[derive(Debug, Clone)]
pub struct Frame {
    pub luma: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Driver sequence number, for spotting dropped frames in logs.
    pub sequence: u32,
}

impl Frame {
    pub fn into_image(self) -> Result<DynamicImage, FrameError> {
        let expected = self.width as usize * self.height as usize;
        let actual = self.luma.len();
        GrayImage::from_raw(self.width, self.height, self.luma)
            .map(DynamicImage::ImageLuma8)
            .ok_or(FrameError::InvalidLength { expected, actual })
    }
}
