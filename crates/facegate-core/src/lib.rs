//! facegate-core - gallery matching for a face-recognition gate.
//!
//! Detection and encoding are delegated to an external [`Encoder`]; this
//! crate owns the matching decision, the gallery build policy and the
//! on-disk gallery format.

pub mod builder;
pub mod encoder;
pub mod matcher;
pub mod store;
pub mod types;

pub use builder::{BuildReport, GalleryBuilder, SkipReason, Skipped};
pub use encoder::{CommandEncoder, DetectedFace, Encoder, EncoderError};
pub use matcher::{MatchError, MatchPolicy, MatchReport, Matcher, ToleranceMatcher};
pub use store::{GalleryStore, StoreError};
pub use types::{Encoding, FaceRegion, Gallery, GalleryEntry, MatchDecision, ENCODING_DIM};
