//! Extractive response composition.
//!
//! Turns index matches into an answer, a confidence score and source
//! previews without an LLM.

use omnisia_vector::QueryMatch;
use serde::{Deserialize, Serialize};

use crate::confidence::{ConfidenceLevel, ConfidenceScorer};

// =============================================================================
// Types
// =============================================================================

/// How the context lookup for a message went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Retrieval {
    /// At least one context text matched.
    Matched { count: usize },
    /// The index is empty or returned nothing.
    NoMatches,
    /// The lookup failed; the answer was produced without context.
    Unavailable { reason: String },
}

/// A context text backing an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub position: usize,
    pub preview: String,
    pub distance: f32,
    /// Per-source confidence in `[0, 1]`.
    pub relevance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    /// Full text of every matched context entry, best first.
    pub context: Vec<String>,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
    pub confidence_level: ConfidenceLevel,
    pub retrieval: Retrieval,
}

// =============================================================================
// ResponseBuilder
// =============================================================================

#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    scorer: ConfidenceScorer,
    preview_chars: usize,
}

impl ResponseBuilder {
    pub fn new(scorer: ConfidenceScorer, preview_chars: usize) -> Self {
        Self {
            scorer,
            preview_chars,
        }
    }

    pub fn scorer(&self) -> &ConfidenceScorer {
        &self.scorer
    }

    /// Compose a response from matches sorted best first.
    pub fn from_matches(&self, matches: &[QueryMatch]) -> ChatResponse {
        if matches.is_empty() {
            return ChatResponse {
                answer: "I don't have any context about that yet. Add some context and ask again."
                    .to_string(),
                context: vec![],
                sources: vec![],
                confidence: 0.0,
                confidence_level: ConfidenceLevel::Low,
                retrieval: Retrieval::NoMatches,
            };
        }

        let distances: Vec<f32> = matches.iter().map(|m| m.distance).collect();
        let confidence = self.scorer.score(&distances);
        let level = self.scorer.level(confidence);

        let answer = if let [only] = matches {
            format!("based on your context: \"{}\"", only.text)
        } else {
            let mut lines = vec![format!(
                "here is what {} context entries say:",
                matches.len()
            )];
            lines.extend(matches.iter().map(|m| format!("- {}", m.text)));
            lines.join("\n")
        };
        let answer = if level == ConfidenceLevel::Low {
            format!("I'm not very confident, but {}", answer)
        } else {
            capitalize_first(&answer)
        };

        let sources = matches
            .iter()
            .map(|m| SourceRef {
                position: m.position,
                preview: preview(&m.text, self.preview_chars),
                distance: m.distance,
                relevance: self.scorer.relevance(m.distance),
            })
            .collect();

        ChatResponse {
            answer,
            context: matches.iter().map(|m| m.text.clone()).collect(),
            sources,
            confidence,
            confidence_level: level,
            retrieval: Retrieval::Matched {
                count: matches.len(),
            },
        }
    }

    /// Response used when the context lookup itself failed.
    pub fn unavailable(&self, reason: impl Into<String>) -> ChatResponse {
        ChatResponse {
            answer: "Context retrieval is unavailable right now, so I can't answer from your context."
                .to_string(),
            context: vec![],
            sources: vec![],
            confidence: 0.0,
            confidence_level: ConfidenceLevel::Low,
            retrieval: Retrieval::Unavailable {
                reason: reason.into(),
            },
        }
    }
}

/// First `max_chars` characters of `text`.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
