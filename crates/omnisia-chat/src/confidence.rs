//! Distance-to-confidence mapping for retrieved context.

use omnisia_core::config::ChatConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default divisor applied to the average distance.
pub const DEFAULT_SCALE: f32 = 2.0;

/// Coarse confidence bucket reported alongside the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

/// Maps query distances to a confidence in `[0, 1]`.
///
/// `confidence = clamp(1 - mean(distances) / scale, 0, 1)`; an empty or NaN
/// input scores 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceScorer {
    scale: f32,
    high: f32,
    medium: f32,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            high: 0.7,
            medium: 0.4,
        }
    }
}

impl ConfidenceScorer {
    /// A non-positive or non-finite scale falls back to [`DEFAULT_SCALE`].
    pub fn new(scale: f32, high: f32, medium: f32) -> Self {
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            warn!(scale, "Invalid confidence scale, using {}", DEFAULT_SCALE);
            DEFAULT_SCALE
        };
        Self { scale, high, medium }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(
            config.confidence_scale,
            config.high_confidence,
            config.medium_confidence,
        )
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Confidence for a set of match distances.
    pub fn score(&self, distances: &[f32]) -> f32 {
        if distances.is_empty() {
            return 0.0;
        }
        let avg = distances.iter().map(|d| f64::from(*d)).sum::<f64>() / distances.len() as f64;
        self.relevance(avg as f32)
    }

    /// Confidence for a single match distance.
    pub fn relevance(&self, distance: f32) -> f32 {
        if distance.is_nan() {
            return 0.0;
        }
        (1.0 - distance / self.scale).clamp(0.0, 1.0)
    }

    pub fn level(&self, confidence: f32) -> ConfidenceLevel {
        if confidence >= self.high {
            ConfidenceLevel::High
        } else if confidence >= self.medium {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}
