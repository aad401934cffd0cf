//! Batch gallery construction from a directory of single-face images.
//!
//! Each image contributes at most one entry, named after its file stem. A
//! bad image is recorded and skipped; it never stops the rest of the batch.

use crate::encoder::Encoder;
use crate::types::{Gallery, GalleryError};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Why an image did not make it into the gallery.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("cannot decode image: {0}")]
    Unreadable(String),
    #[error("encoder failed: {0}")]
    EncoderFailed(String),
    #[error("must contain exactly 1 face, found {faces}")]
    AmbiguousImage { faces: usize },
    #[error("duplicate identity")]
    DuplicateIdentity,
    #[error("encoding has {actual} dimensions, gallery uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("file name does not yield an identity")]
    InvalidIdentity,
}

impl From<GalleryError> for SkipReason {
    fn from(err: GalleryError) -> Self {
        match err {
            GalleryError::EmptyIdentity => SkipReason::InvalidIdentity,
            GalleryError::DuplicateIdentity(_) => SkipReason::DuplicateIdentity,
            GalleryError::DimensionMismatch {
                expected, actual, ..
            } => SkipReason::DimensionMismatch { expected, actual },
        }
    }
}

/// A rejected image.
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub source: PathBuf,
    pub identity: String,
    pub reason: SkipReason,
}

/// Result of a build: the accepted gallery plus every skip.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub gallery: Gallery,
    pub skipped: Vec<Skipped>,
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("cannot read images directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether `path` has one of the enrollable image extensions.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Enrollable image files directly inside `dir`, sorted by file name.
pub fn image_files(dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let read_err = |source| BuildError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && is_supported_image(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Accumulates a gallery under the skip-and-continue build policy.
pub struct GalleryBuilder<E> {
    encoder: E,
    gallery: Gallery,
    skipped: Vec<Skipped>,
}

impl<E: Encoder> GalleryBuilder<E> {
    pub fn new(encoder: E) -> Self {
        Self {
            encoder,
            gallery: Gallery::new(),
            skipped: Vec::new(),
        }
    }

    /// Try to enroll one decoded image. Returns `true` if it was accepted.
    pub fn enroll_image(&mut self, identity: &str, source: &Path, image: &RgbImage) -> bool {
        match self.try_enroll(identity, image) {
            Ok(()) => {
                tracing::info!(identity, source = %source.display(), "added");
                true
            }
            Err(reason) => {
                tracing::warn!(identity, source = %source.display(), %reason, "skipped");
                self.skipped.push(Skipped {
                    source: source.to_path_buf(),
                    identity: identity.to_string(),
                    reason,
                });
                false
            }
        }
    }

    fn try_enroll(&mut self, identity: &str, image: &RgbImage) -> Result<(), SkipReason> {
        let mut encodings = self
            .encoder
            .encode(image)
            .map_err(|e| SkipReason::EncoderFailed(e.to_string()))?;
        if encodings.len() != 1 {
            return Err(SkipReason::AmbiguousImage {
                faces: encodings.len(),
            });
        }
        let encoding = encodings.remove(0);
        self.gallery.push(identity, encoding)?;
        Ok(())
    }

    /// Decode and enroll one image file, named after its file stem.
    pub fn enroll_file(&mut self, path: &Path) -> bool {
        let identity = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match image::open(path) {
            Ok(img) => self.enroll_image(&identity, path, &img.to_rgb8()),
            Err(e) => {
                let reason = SkipReason::Unreadable(e.to_string());
                tracing::warn!(identity, source = %path.display(), %reason, "skipped");
                self.skipped.push(Skipped {
                    source: path.to_path_buf(),
                    identity,
                    reason,
                });
                false
            }
        }
    }

    /// Enroll every supported image in `dir`. Returns how many were considered.
    pub fn enroll_dir(&mut self, dir: &Path) -> Result<usize, BuildError> {
        let files = image_files(dir)?;
        tracing::info!(dir = %dir.display(), images = files.len(), "scanning images");
        for path in &files {
            self.enroll_file(path);
        }
        Ok(files.len())
    }

    pub fn finish(self) -> BuildReport {
        BuildReport {
            gallery: self.gallery,
            skipped: self.skipped,
        }
    }
}
