//! Acceptance rules for generated summaries.

use crate::error::ValidationError;
use crate::script::Script;

/// Phrases that mark a refusal or a meta answer instead of a fact.
const REFUSAL_MARKERS: &[&str] = &[
    "I cannot",
    "I don't have",
    "I'm sorry",
    "As an AI",
    "אני לא יכול",
    "אני לא מסוגל",
    "אני מצטער",
    "כבוט AI",
];

#[derive(Debug, Clone)]
pub struct SummaryRules {
    pub min_chars: usize,
    pub max_chars: usize,
    pub min_sentences: usize,
    pub max_sentences: usize,
    pub min_script_ratio: f64,
    pub script: Script,
}

impl SummaryRules {
    pub fn for_language(language: &str) -> Self {
        Self {
            min_chars: 50,
            max_chars: 400,
            min_sentences: 1,
            max_sentences: 5,
            min_script_ratio: 0.3,
            script: Script::for_language(language),
        }
    }

    /// Check `summary`, returning the measured diagnostics on failure.
    pub fn validate(&self, summary: &str) -> Result<(), ValidationError> {
        let summary = summary.trim();
        let length = summary.chars().count();
        let sentences = count_sentences(summary);
        let script_ratio = self.script.ratio(summary);

        let fail = |reason: String| ValidationError {
            reason,
            length,
            sentences,
            script_ratio,
        };

        if length < self.min_chars || length > self.max_chars {
            return Err(fail(format!(
                "length outside {}..={} characters",
                self.min_chars, self.max_chars
            )));
        }
        if sentences < self.min_sentences || sentences > self.max_sentences {
            return Err(fail(format!(
                "sentence count outside {}..={}",
                self.min_sentences, self.max_sentences
            )));
        }
        if script_ratio < self.min_script_ratio {
            return Err(fail(format!(
                "less than {:.0}% of characters in the expected script",
                self.min_script_ratio * 100.0
            )));
        }
        let lower = summary.to_lowercase();
        if let Some(marker) = REFUSAL_MARKERS.iter().find(|m| lower.contains(&m.to_lowercase())) {
            return Err(fail(format!("contains refusal phrase '{marker}'")));
        }
        Ok(())
    }
}

/// Non-empty segments between `.`, `!` and `?`.
pub fn count_sentences(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
}
