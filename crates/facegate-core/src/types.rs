use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Dimensionality of encodings produced by the reference encoder.
pub const ENCODING_DIM: usize = 128;

/// Face encoding vector (128-dimensional for the reference encoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two encodings.
    ///
    /// Dimensions are not checked here; the matcher rejects mismatched
    /// queries before any distance is computed.
    pub fn distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Hex SHA-256 over the little-endian bytes of every component.
    ///
    /// Used in listings and logs so raw biometric vectors never hit stdout.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for v in &self.values {
            hasher.update(v.to_le_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl From<Vec<f32>> for Encoding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Pixel-space location of a detected face, in `[top, right, bottom, left]` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceRegion {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Map a region found on a resized frame back onto the original frame.
    pub fn rescale(&self, factor: f32) -> Self {
        let s = |v: u32| (v as f32 * factor).round() as u32;
        Self {
            top: s(self.top),
            right: s(self.right),
            bottom: s(self.bottom),
            left: s(self.left),
        }
    }
}

/// One enrolled identity and its reference encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub identity: String,
    pub encoding: Encoding,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GalleryError {
    #[error("identity must not be empty")]
    EmptyIdentity,
    #[error("identity already enrolled: {0}")]
    DuplicateIdentity(String),
    #[error("encoding for {identity} has {actual} dimensions, gallery uses {expected}")]
    DimensionMismatch {
        identity: String,
        expected: usize,
        actual: usize,
    },
}

/// Ordered set of enrolled faces.
///
/// Identities are pairwise distinct and every encoding shares one
/// dimensionality; both are enforced on insertion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a gallery from entries, failing on the first invariant violation.
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Result<Self, GalleryError> {
        let mut gallery = Self::new();
        for entry in entries {
            gallery.push(entry.identity, entry.encoding)?;
        }
        Ok(gallery)
    }

    /// Append an entry. An existing identity is never overwritten.
    pub fn push(
        &mut self,
        identity: impl Into<String>,
        encoding: Encoding,
    ) -> Result<(), GalleryError> {
        let identity = identity.into();
        if identity.trim().is_empty() {
            return Err(GalleryError::EmptyIdentity);
        }
        if self.contains(&identity) {
            return Err(GalleryError::DuplicateIdentity(identity));
        }
        if let Some(expected) = self.dim() {
            if encoding.dim() != expected {
                return Err(GalleryError::DimensionMismatch {
                    identity,
                    expected,
                    actual: encoding.dim(),
                });
            }
        }
        self.entries.push(GalleryEntry { identity, encoding });
        Ok(())
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.iter().any(|e| e.identity == identity)
    }

    /// Dimensionality shared by all encodings, `None` while empty.
    pub fn dim(&self) -> Option<usize> {
        self.entries.first().map(|e| e.encoding.dim())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GalleryEntry> {
        self.entries.iter()
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.identity.as_str())
    }
}

impl<'a> IntoIterator for &'a Gallery {
    type Item = &'a GalleryEntry;
    type IntoIter = std::slice::Iter<'a, GalleryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Outcome of matching one query encoding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchDecision {
    Match { identity: String, distance: f32 },
    NoMatch,
}

impl MatchDecision {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchDecision::Match { .. })
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            MatchDecision::Match { identity, .. } => Some(identity),
            MatchDecision::NoMatch => None,
        }
    }

    pub fn distance(&self) -> Option<f32> {
        match self {
            MatchDecision::Match { distance, .. } => Some(*distance),
            MatchDecision::NoMatch => None,
        }
    }

    /// Text shown to the end user: the identity, or "Unknown".
    pub fn label(&self) -> &str {
        self.identity().unwrap_or("Unknown")
    }
}
