//! Input sanitation for incoming questions.
//!
//! Questions pass through here before they touch the cache or the model:
//! control characters are stripped, length is bounded, and a small pattern
//! list rejects the obvious prompt-injection phrasings. Rejection is
//! [`EngineError::ContentFilter`] and is never retried.

use regex::Regex;
use std::sync::OnceLock;

use crate::errors::EngineError;

const INJECTION_PATTERNS: &[&str] = &[
    r"(?i)ignore\s+(all\s+)?(previous|prior|above)\s+(instructions|prompts|rules)",
    r"(?i)disregard\s+(all\s+)?(previous|prior|your)\s+(instructions|prompts|rules)",
    r"(?i)forget\s+(all\s+)?(previous|prior|your)\s+(instructions|rules)",
    r"(?i)reveal\s+(your\s+)?(system\s+prompt|instructions)",
    r"(?i)you\s+are\s+now\s+(a|an|in)\b",
    r"(?i)act\s+as\s+(if\s+you\s+are|a)\s+",
    r"(?i)\bjailbreak\b",
    r"(?i)<\s*/?\s*system\s*>",
];

fn injection_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        INJECTION_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("builtin pattern"))
            .collect()
    })
}

/// Clean and validate a question. Returns the trimmed text or a
/// `ContentFilter` rejection.
pub fn sanitize_question(question: &str, max_len: usize) -> Result<String, EngineError> {
    let cleaned: String = question
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(EngineError::ContentFilter);
    }
    if cleaned.chars().count() > max_len {
        return Err(EngineError::ContentFilter);
    }
    if injection_patterns().iter().any(|p| p.is_match(cleaned)) {
        return Err(EngineError::ContentFilter);
    }

    Ok(cleaned.to_string())
}
