//! Gallery matching: tolerance match with nearest-neighbour tie-break.
//!
//! A query is accepted only if some enrolled encoding lies strictly within
//! the tolerance; the closest such entry wins, and an optional secondary
//! threshold can still reject it.

use crate::types::{Encoding, Gallery, MatchDecision};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default primary tolerance.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("query encoding has {actual} dimensions, gallery uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid match policy: {0}")]
    InvalidPolicy(String),
}

/// Acceptance thresholds for [`ToleranceMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    tolerance: f32,
    confidence_threshold: Option<f32>,
}

impl MatchPolicy {
    /// `tolerance` bounds candidates (`distance < tolerance`); when set,
    /// `confidence_threshold` rejects a best candidate with `distance >= threshold`.
    pub fn new(tolerance: f32, confidence_threshold: Option<f32>) -> Result<Self, MatchError> {
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(MatchError::InvalidPolicy(format!(
                "tolerance must be a positive number, got {tolerance}"
            )));
        }
        if let Some(t) = confidence_threshold {
            if !t.is_finite() || t <= 0.0 {
                return Err(MatchError::InvalidPolicy(format!(
                    "confidence threshold must be a positive number, got {t}"
                )));
            }
        }
        Ok(Self {
            tolerance,
            confidence_threshold,
        })
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    pub fn confidence_threshold(&self) -> Option<f32> {
        self.confidence_threshold
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            confidence_threshold: None,
        }
    }
}

/// Decision plus the distance from the query to every gallery entry,
/// in gallery order.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchReport {
    pub decision: MatchDecision,
    pub distances: Vec<f32>,
}

/// Strategy for classifying a query encoding against a gallery.
pub trait Matcher {
    fn evaluate(&self, query: &Encoding, gallery: &Gallery) -> Result<MatchReport, MatchError>;

    fn decide(&self, query: &Encoding, gallery: &Gallery) -> Result<MatchDecision, MatchError> {
        self.evaluate(query, gallery).map(|r| r.decision)
    }
}

/// Distances from `query` to every gallery entry.
///
/// Fails if the query's dimensionality differs from the gallery's. An empty
/// gallery yields an empty vector.
pub fn distances(query: &Encoding, gallery: &Gallery) -> Result<Vec<f32>, MatchError> {
    let Some(expected) = gallery.dim() else {
        return Ok(Vec::new());
    };
    if query.dim() != expected {
        return Err(MatchError::DimensionMismatch {
            expected,
            actual: query.dim(),
        });
    }
    Ok(gallery
        .iter()
        .map(|entry| query.distance(&entry.encoding))
        .collect())
}

/// Two-stage matcher: tolerance candidates, then argmin over candidates only.
///
/// Equal best distances resolve to the lowest gallery index. NaN distances
/// never qualify as candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToleranceMatcher {
    policy: MatchPolicy,
}

impl ToleranceMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }
}

impl Matcher for ToleranceMatcher {
    fn evaluate(&self, query: &Encoding, gallery: &Gallery) -> Result<MatchReport, MatchError> {
        if gallery.is_empty() {
            return Ok(MatchReport {
                decision: MatchDecision::NoMatch,
                distances: Vec::new(),
            });
        }

        let distances = distances(query, gallery)?;
        let tolerance = self.policy.tolerance;

        let mut best: Option<(usize, f32)> = None;
        for (i, &d) in distances.iter().enumerate() {
            let is_candidate = d < tolerance;
            if !is_candidate {
                continue;
            }
            match best {
                Some((_, best_d)) if best_d <= d => {}
                _ => best = Some((i, d)),
            }
        }

        let decision = match best {
            None => MatchDecision::NoMatch,
            Some((_, d))
                if self
                    .policy
                    .confidence_threshold
                    .is_some_and(|threshold| d >= threshold) =>
            {
                tracing::debug!(
                    distance = d,
                    threshold = self.policy.confidence_threshold,
                    "best candidate failed confidence threshold"
                );
                MatchDecision::NoMatch
            }
            Some((idx, d)) => MatchDecision::Match {
                identity: gallery.entries()[idx].identity.clone(),
                distance: d,
            },
        };

        match &decision {
            MatchDecision::Match { identity, distance } => {
                tracing::debug!(%identity, distance, ?distances, "[MATCH]");
            }
            MatchDecision::NoMatch => {
                tracing::debug!(?distances, "[NO MATCH]");
            }
        }

        Ok(MatchReport {
            decision,
            distances,
        })
    }
}
