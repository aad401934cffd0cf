//! Gallery persistence as a single JSON document.
//!
//! Saves replace the file wholesale. Loads accept both the current record
//! layout and the older positional `names` / `encodings` layout.

use crate::types::{Encoding, Gallery, GalleryEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FORMAT_VERSION: u32 = 2;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("gallery file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("gallery file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("gallery file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to serialize gallery: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct GalleryFileOut<'a> {
    version: u32,
    generated_at: DateTime<Utc>,
    entries: &'a [GalleryEntry],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GalleryFileIn {
    Records {
        version: u32,
        #[serde(default)]
        generated_at: Option<DateTime<Utc>>,
        entries: Vec<GalleryEntry>,
    },
    Positional {
        names: Vec<String>,
        encodings: Vec<Encoding>,
    },
}

/// Reads and writes the gallery at a fixed path.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the gallery. A missing file is an empty gallery, not an error.
    pub fn load(&self) -> Result<Gallery, StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no gallery file; starting empty");
                return Ok(Gallery::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let file: GalleryFileIn =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let entries = match file {
            GalleryFileIn::Records {
                version,
                generated_at,
                entries,
            } => {
                if version > FORMAT_VERSION {
                    return Err(self.corrupt(format!(
                        "format version {version} is newer than supported {FORMAT_VERSION}"
                    )));
                }
                tracing::debug!(version, ?generated_at, "reading gallery records");
                entries
            }
            GalleryFileIn::Positional { names, encodings } => {
                if names.len() != encodings.len() {
                    return Err(self.corrupt(format!(
                        "{} names but {} encodings",
                        names.len(),
                        encodings.len()
                    )));
                }
                tracing::debug!("reading positional gallery layout");
                names
                    .into_iter()
                    .zip(encodings)
                    .map(|(identity, encoding)| GalleryEntry { identity, encoding })
                    .collect()
            }
        };

        let gallery = Gallery::from_entries(entries).map_err(|e| self.corrupt(e.to_string()))?;
        tracing::info!(
            path = %self.path.display(),
            identities = gallery.len(),
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Overwrite the gallery file with `gallery`.
    ///
    /// Writes to a sibling temp file first and renames it into place, so a
    /// failed save leaves the previous file intact.
    pub fn save(&self, gallery: &Gallery) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|source| self.io(source))?;

        let json = serde_json::to_vec_pretty(&GalleryFileOut {
            version: FORMAT_VERSION,
            generated_at: Utc::now(),
            entries: gallery.entries(),
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|source| self.io(source))?;
        tmp.write_all(&json).map_err(|source| self.io(source))?;
        tmp.as_file().sync_all().map_err(|source| self.io(source))?;
        tmp.persist(&self.path).map_err(|e| self.io(e.error))?;

        tracing::info!(
            path = %self.path.display(),
            identities = gallery.len(),
            "gallery saved"
        );
        Ok(())
    }

    fn io(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn corrupt(&self, reason: String) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }
}
