//! Confidence blending and handoff decision.
//!
//! The final score for an answer mixes two signals:
//! - the model's self-reported confidence
//! - a retrieval confidence derived from the best (smallest) cosine distance
//!   among the retrieved chunks, linearly rescaled so distance 0 maps to 1.0
//!   and `max_useful_distance` or beyond maps to 0.0
//!
//! With no retrieved chunks there is nothing grounding the answer, so the
//! blend is forced to 0.0 and the handoff flag is set regardless of the
//! threshold.

use crate::config::{AnswerConfig, RetrievalConfig};
use crate::models::RetrievedChunk;

/// Retrieval-side confidence from the best match distance.
pub fn retrieval_confidence(chunks: &[RetrievedChunk], retrieval: &RetrievalConfig) -> f64 {
    let Some(best) = chunks
        .iter()
        .map(|c| c.distance)
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    else {
        return 0.0;
    };

    (1.0 - best / retrieval.max_useful_distance).clamp(0.0, 1.0)
}

/// Weighted blend of self-confidence and retrieval confidence, in [0, 1].
pub fn blend(
    self_confidence: f64,
    chunks: &[RetrievedChunk],
    answer: &AnswerConfig,
    retrieval: &RetrievalConfig,
) -> f64 {
    if chunks.is_empty() {
        return 0.0;
    }

    let score = answer.self_weight * self_confidence.clamp(0.0, 1.0)
        + answer.retrieval_weight * retrieval_confidence(chunks, retrieval);
    score.clamp(0.0, 1.0)
}

/// An answer below the threshold or grounded in nothing goes to a human.
pub fn should_handoff(score: f64, chunks: &[RetrievedChunk], answer: &AnswerConfig) -> bool {
    chunks.is_empty() || score < answer.handoff_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_at(distance: f64) -> RetrievedChunk {
        RetrievedChunk {
            source_key: "https://a.test/x".to_string(),
            title: "X".to_string(),
            chunk_index: 0,
            text: String::new(),
            distance,
            last_seen: 0,
        }
    }

    fn configs() -> (AnswerConfig, RetrievalConfig) {
        (AnswerConfig::default(), RetrievalConfig::default())
    }

    #[test]
    fn test_perfect_match_and_full_self_confidence() {
        let (a, r) = configs();
        let chunks = vec![chunk_at(0.0)];
        assert!((blend(1.0, &chunks, &a, &r) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_chunks_forces_zero_and_handoff() {
        let (a, r) = configs();
        let score = blend(1.0, &[], &a, &r);
        assert_eq!(score, 0.0);
        assert!(should_handoff(score, &[], &a));
    }

    #[test]
    fn test_distance_at_max_useful_contributes_nothing() {
        let (a, r) = configs();
        let chunks = vec![chunk_at(r.max_useful_distance)];
        // Only the self term remains: 0.6 * 0.5
        let score = blend(0.5, &chunks, &a, &r);
        assert!((score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_best_distance_wins_among_chunks() {
        let (_, r) = configs();
        let chunks = vec![chunk_at(0.6), chunk_at(0.2), chunk_at(0.79)];
        let conf = retrieval_confidence(&chunks, &r);
        assert!((conf - (1.0 - 0.2 / 0.8)).abs() < 1e-9);
    }

    #[test]
    fn test_distance_beyond_max_clamps_to_zero() {
        let (_, r) = configs();
        let chunks = vec![chunk_at(2.0)];
        assert_eq!(retrieval_confidence(&chunks, &r), 0.0);
    }

    #[test]
    fn test_out_of_range_self_confidence_is_clamped() {
        let (a, r) = configs();
        let chunks = vec![chunk_at(0.0)];
        let score = blend(7.0, &chunks, &a, &r);
        assert!((0.0..=1.0).contains(&score));
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_handoff_threshold_boundary() {
        let (a, _) = configs();
        let chunks = vec![chunk_at(0.0)];
        assert!(should_handoff(a.handoff_threshold - 0.01, &chunks, &a));
        assert!(!should_handoff(a.handoff_threshold, &chunks, &a));
    }
}
