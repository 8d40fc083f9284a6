//! Health score for a window
//!
//! ```text
//! score = 100
//!       - error_rate * 100 * error_weight
//!       - max(0, avg_response_time - latency_budget_ms) / latency_scale_ms
//!       - min(tail_max_penalty, max(0, slowest_response - tail_ceiling_ms) / tail_scale_ms)
//! ```
//!
//! rounded to the nearest integer and clamped to [0, 100]. With the default
//! weights (1.0, 500ms, 20ms, 2000ms, 100ms, 20) a window with 40% errors and
//! a 138ms mean scores 60.

use super::accumulator::InsightDraft;
use crate::config::ScoringConfig;

#[derive(Debug, Clone)]
pub struct ScoreCalculator {
    weights: ScoringConfig,
}

impl Default for ScoreCalculator {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

impl ScoreCalculator {
    pub fn new(weights: ScoringConfig) -> Self {
        Self { weights }
    }

    pub fn score(&self, draft: &InsightDraft) -> u8 {
        let w = &self.weights;

        let error_penalty = draft.error_rate.clamp(0.0, 1.0) * 100.0 * w.error_weight;

        let latency_over = draft.avg_response_time.saturating_sub(w.latency_budget_ms);
        let latency_penalty = latency_over as f64 / w.latency_scale_ms.max(1) as f64;

        let tail_over = draft.slowest_response.saturating_sub(w.tail_ceiling_ms);
        let tail_penalty =
            (tail_over as f64 / w.tail_scale_ms.max(1) as f64).min(w.tail_max_penalty);

        let raw = 100.0 - error_penalty - latency_penalty - tail_penalty;
        if raw.is_nan() {
            return 0;
        }

        raw.round().clamp(0.0, 100.0) as u8
    }
}
