// Prompt moderation for image generation
//
// Two OR-combined heuristics on the lowercased prompt: a block-list
// substring scan, and an instruction-override detector (regex patterns
// plus a marker-phrase suspicion score). Heuristic, not a guarantee.

mod terms;

pub use terms::{BLOCKED_TERMS, MARKER_PHRASES};

use crate::config::constants::DEFAULT_SUSPICION_THRESHOLD;
use crate::config::ModerationConfig;
use serde::Serialize;
use terms::OVERRIDE_PATTERNS;
use tracing::warn;

pub const REASON_DISALLOWED: &str = "disallowed content";
pub const REASON_OVERRIDE: &str = "attempt to override content guidelines";

/// Outcome of a moderation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModerationVerdict {
    pub safe: bool,
    pub reason: String,
}

impl ModerationVerdict {
    fn safe() -> Self {
        Self {
            safe: true,
            reason: String::new(),
        }
    }

    fn unsafe_because(reason: &str) -> Self {
        Self {
            safe: false,
            reason: reason.to_string(),
        }
    }
}

/// Per-axis detail behind a verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyAssessment {
    /// First block-list term found, if any
    pub blocked_term: Option<String>,
    /// Whether any override regex matched
    pub override_pattern: bool,
    /// Total marker-phrase occurrences
    pub suspicion_score: usize,
    /// Score at or above which the prompt counts as an override attempt
    pub suspicion_threshold: usize,
}

impl SafetyAssessment {
    pub fn is_disallowed_content(&self) -> bool {
        self.blocked_term.is_some()
    }

    pub fn is_override_attempt(&self) -> bool {
        self.override_pattern || self.suspicion_score >= self.suspicion_threshold
    }

    pub fn is_safe(&self) -> bool {
        !self.is_disallowed_content() && !self.is_override_attempt()
    }
}

/// Stateless prompt checker
#[derive(Debug, Clone)]
pub struct SafetyGate {
    extra_terms: Vec<String>,
    suspicion_threshold: usize,
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self {
            extra_terms: Vec::new(),
            suspicion_threshold: DEFAULT_SUSPICION_THRESHOLD,
        }
    }
}

impl SafetyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in vocabulary plus the configured extra terms and threshold
    pub fn with_policy(config: &ModerationConfig) -> Self {
        Self {
            extra_terms: config
                .extra_blocked_terms
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            suspicion_threshold: config.suspicion_threshold.max(1),
        }
    }

    /// Check a prompt. Never fails; logs a warning on any positive match.
    pub fn check(&self, prompt: &str) -> ModerationVerdict {
        let normalized = normalize(prompt);

        if let Some(term) = self.find_blocked_term(&normalized) {
            warn!(term = %term, "Moderation: disallowed term in prompt");
            return ModerationVerdict::unsafe_because(REASON_DISALLOWED);
        }

        if let Some(pattern) = OVERRIDE_PATTERNS.iter().find(|p| p.is_match(&normalized)) {
            warn!(pattern = pattern.as_str(), "Moderation: override pattern in prompt");
            return ModerationVerdict::unsafe_because(REASON_OVERRIDE);
        }

        let score = suspicion_score(&normalized);
        if score >= self.suspicion_threshold {
            warn!(score, "Moderation: suspicious marker phrases in prompt");
            return ModerationVerdict::unsafe_because(REASON_OVERRIDE);
        }

        ModerationVerdict::safe()
    }

    /// Evaluate both axes without short-circuiting
    pub fn assess(&self, prompt: &str) -> SafetyAssessment {
        let normalized = normalize(prompt);
        SafetyAssessment {
            blocked_term: self.find_blocked_term(&normalized),
            override_pattern: OVERRIDE_PATTERNS.iter().any(|p| p.is_match(&normalized)),
            suspicion_score: suspicion_score(&normalized),
            suspicion_threshold: self.suspicion_threshold,
        }
    }

    fn find_blocked_term(&self, normalized: &str) -> Option<String> {
        BLOCKED_TERMS
            .iter()
            .map(|t| t.to_string())
            .chain(self.extra_terms.iter().cloned())
            .find(|term| normalized.contains(term.as_str()))
    }
}

/// Lowercase and fold typographic apostrophes so "don’t" matches "don't"
fn normalize(prompt: &str) -> String {
    prompt.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

fn suspicion_score(normalized: &str) -> usize {
    MARKER_PHRASES
        .iter()
        .map(|phrase| normalized.matches(phrase).count())
        .sum()
}
