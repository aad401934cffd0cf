//! Encoder seam: turns an image into zero or more face encodings.
//!
//! Detection and encoding live outside this workspace. [`CommandEncoder`]
//! hands each image to an external program and reads back JSON.

use crate::types::{Encoding, FaceRegion, ENCODING_DIM};
use image::{ImageFormat, RgbImage};
use serde::Deserialize;
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("failed to start encoder {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encoder {program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("malformed encoder output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("expected {expected}-dim encoding, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A face found in an image, with its encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub region: FaceRegion,
    pub encoding: Encoding,
}

/// Source of face encodings.
///
/// Faces are returned in image-scan order.
pub trait Encoder {
    fn faces(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncoderError>;

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceRegion>, EncoderError> {
        Ok(self.faces(image)?.into_iter().map(|f| f.region).collect())
    }

    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Encoding>, EncoderError> {
        Ok(self.faces(image)?.into_iter().map(|f| f.encoding).collect())
    }
}

impl<E: Encoder + ?Sized> Encoder for &mut E {
    fn faces(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncoderError> {
        (**self).faces(image)
    }
}

impl<E: Encoder + ?Sized> Encoder for Box<E> {
    fn faces(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncoderError> {
        (**self).faces(image)
    }
}

/// Runs `program args... <image.png>` once per image.
///
/// The program must print a JSON array on stdout:
/// `[{"location": [top, right, bottom, left], "encoding": [f32; N]}]`.
#[derive(Debug, Clone)]
pub struct CommandEncoder {
    program: String,
    args: Vec<String>,
    expected_dim: usize,
}

impl CommandEncoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            expected_dim: ENCODING_DIM,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_expected_dim(mut self, expected_dim: usize) -> Self {
        self.expected_dim = expected_dim;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Encoder for CommandEncoder {
    fn faces(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncoderError> {
        let input = tempfile::Builder::new()
            .prefix("facegate-")
            .suffix(".png")
            .tempfile()?;
        image.save_with_format(input.path(), ImageFormat::Png)?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(input.path())
            .output()
            .map_err(|source| EncoderError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(EncoderError::CommandFailed {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let faces = parse_faces(&output.stdout, self.expected_dim)?;
        tracing::trace!(
            program = %self.program,
            width = image.width(),
            height = image.height(),
            faces = faces.len(),
            "encoder finished"
        );
        Ok(faces)
    }
}

#[derive(Deserialize)]
struct FaceRecord {
    location: [u32; 4],
    encoding: Vec<f32>,
}

/// Parse the encoder's stdout, checking every encoding's length.
pub fn parse_faces(stdout: &[u8], expected_dim: usize) -> Result<Vec<DetectedFace>, EncoderError> {
    let records: Vec<FaceRecord> = serde_json::from_slice(stdout)?;
    records
        .into_iter()
        .map(|r| {
            if r.encoding.len() != expected_dim {
                return Err(EncoderError::Dimension {
                    expected: expected_dim,
                    actual: r.encoding.len(),
                });
            }
            let [top, right, bottom, left] = r.location;
            Ok(DetectedFace {
                region: FaceRegion { top, right, bottom, left },
                encoding: Encoding::new(r.encoding),
            })
        })
        .collect()
}
