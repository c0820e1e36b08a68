//! Face detection + embedding capability.
//!
//! The models themselves live outside this workspace; anything that can
//! turn an image into `(box, embedding)` pairs implements [`FaceEncoder`].

use crate::types::{BoundingBox, Embedding};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("encoder unavailable: {0}")]
    Unavailable(String),
    #[error("encoder failed: {0}")]
    Failed(String),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

pub trait FaceEncoder {
    /// Detect every face in `image` and embed each one.
    ///
    /// Boxes are in `image` coordinates. An image with no faces returns an
    /// empty vector, not an error.
    fn detect_and_encode(
        &mut self,
        image: &DynamicImage,
    ) -> Result<Vec<(BoundingBox, Embedding)>, EncoderError>;

    /// Embed the single face of a reference image.
    ///
    /// Zero faces is an error. With several faces the first detection is
    /// used and a warning is logged.
    fn encode_single_face(&mut self, image: &DynamicImage) -> Result<Embedding, EncoderError> {
        let mut faces = self.detect_and_encode(image)?;
        if faces.len() > 1 {
            tracing::warn!(
                faces = faces.len(),
                "reference image contains several faces; using the first detection"
            );
        }
        if faces.is_empty() {
            return Err(EncoderError::NoFaceDetected);
        }
        let (_, embedding) = faces.swap_remove(0);
        Ok(embedding)
    }
}

impl<E: FaceEncoder + ?Sized> FaceEncoder for &mut E {
    fn detect_and_encode(
        &mut self,
        image: &DynamicImage,
    ) -> Result<Vec<(BoundingBox, Embedding)>, EncoderError> {
        (**self).detect_and_encode(image)
    }

    fn encode_single_face(&mut self, image: &DynamicImage) -> Result<Embedding, EncoderError> {
        (**self).encode_single_face(image)
    }
}
