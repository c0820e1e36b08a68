//! Face encoder backed by an external program.
//!
//! The program is called as `<command...> <image.png>` and must print a
//! JSON array on stdout:
//!
//! ```json
//! [{"box": {"top": 10, "right": 90, "bottom": 110, "left": 5}, "embedding": [0.01, ...]}]
//! ```

use image::{DynamicImage, ImageFormat};
use presence_core::{BoundingBox, Embedding, EncoderError, FaceEncoder};
use serde::Deserialize;
use std::process::Command;

#[derive(Debug, Deserialize)]
struct EncodedFace {
    #[serde(rename = "box")]
    bbox: BoundingBox,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct CommandEncoder {
    program: String,
    args: Vec<String>,
}

impl CommandEncoder {
    pub fn from_command(command: &[String]) -> Result<Self, EncoderError> {
        let (program, args) = command.split_first().ok_or_else(|| {
            EncoderError::Unavailable(
                "no encoder configured; set encoder_command or PRESENCE_ENCODER_COMMAND".into(),
            )
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

/// Parse the encoder's JSON. Every face must carry a non-empty embedding,
/// and all faces of one image must share a length.
fn parse_output(stdout: &[u8]) -> Result<Vec<(BoundingBox, Embedding)>, EncoderError> {
    let faces: Vec<EncodedFace> = serde_json::from_slice(stdout)
        .map_err(|e| EncoderError::Failed(format!("invalid encoder output: {e}")))?;
    if let Some(first) = faces.first() {
        let len = first.embedding.len();
        if len == 0 {
            return Err(EncoderError::InvalidEmbedding("empty embedding".into()));
        }
        if let Some(other) = faces.iter().find(|f| f.embedding.len() != len) {
            return Err(EncoderError::InvalidEmbedding(format!(
                "mixed embedding lengths {len} and {}",
                other.embedding.len()
            )));
        }
    }
    Ok(faces
        .into_iter()
        .map(|f| (f.bbox, Embedding::new(f.embedding)))
        .collect())
}

impl FaceEncoder for CommandEncoder {
    fn detect_and_encode(
        &mut self,
        image: &DynamicImage,
    ) -> Result<Vec<(BoundingBox, Embedding)>, EncoderError> {
        let tmp = tempfile::Builder::new()
            .prefix("presence-frame-")
            .suffix(".png")
            .tempfile()?;
        image.save_with_format(tmp.path(), ImageFormat::Png)?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(tmp.path())
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    EncoderError::Unavailable(format!("{}: not found", self.program))
                }
                _ => EncoderError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EncoderError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let faces = parse_output(&output.stdout)?;
        tracing::trace!(faces = faces.len(), "encoder returned");
        Ok(faces)
    }
}
