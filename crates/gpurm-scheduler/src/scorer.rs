//! Device fitness scoring

use gpurm_core::{AllocatorConfig, DeviceSnapshot};

/// Weights applied to utilization and memory pressure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub utilization: f64,
    pub memory: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            utilization: 0.7,
            memory: 0.3,
        }
    }
}

impl From<&AllocatorConfig> for ScoringWeights {
    fn from(config: &AllocatorConfig) -> Self {
        Self {
            utilization: config.utilization_weight,
            memory: config.memory_weight,
        }
    }
}

/// Ranks candidate devices for a memory request; lower scores are better
///
/// Callers must pass snapshots with `memory_total_mb > 0`. A zero-sized device
/// is never eligible.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationScorer {
    weights: ScoringWeights,
}

impl AllocationScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> ScoringWeights {
        self.weights
    }

    /// Score a device, or `None` if it lacks `required_memory_mb` free
    pub fn score(&self, snapshot: &DeviceSnapshot, required_memory_mb: u64) -> Option<f64> {
        self.score_with_pledge(snapshot, required_memory_mb, 0)
    }

    /// Score a device whose free memory is reduced by `pledged_mb` of reservations
    pub fn score_with_pledge(
        &self,
        snapshot: &DeviceSnapshot,
        required_memory_mb: u64,
        pledged_mb: u64,
    ) -> Option<f64> {
        let used_fraction = snapshot.memory_used_fraction()?;
        let effective_free = snapshot.memory_free_mb.saturating_sub(pledged_mb);
        if effective_free < required_memory_mb {
            return None;
        }

        Some(
            snapshot.utilization_pct * self.weights.utilization
                + used_fraction * 100.0 * self.weights.memory,
        )
    }

    /// Pick the lowest score; equal scores go to the lowest device id
    pub fn select_best(candidates: impl IntoIterator<Item = (u32, f64)>) -> Option<(u32, f64)> {
        candidates.into_iter().min_by(|(a_id, a_score), (b_id, b_score)| {
            a_score.total_cmp(b_score).then_with(|| a_id.cmp(b_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: u32, utilization_pct: f64, total: u64, used: u64) -> DeviceSnapshot {
        DeviceSnapshot {
            id,
            name: None,
            utilization_pct,
            memory_total_mb: total,
            memory_used_mb: used,
            memory_free_mb: total - used,
            temperature_c: 55.0,
            power_draw_w: 0.0,
        }
    }

    #[test]
    fn test_score_formula() {
        let scorer = AllocationScorer::default();
        // 50 * 0.7 + 25 * 0.3
        let score = scorer.score(&snapshot(0, 50.0, 8000, 2000), 0).unwrap();
        assert!((score - 42.5).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_memory_is_excluded() {
        let scorer = AllocationScorer::default();
        let device = snapshot(0, 90.0, 20000, 18000);

        assert!(scorer.score(&device, 3000).is_none());
        assert!(scorer.score(&device, 2000).is_some());
    }

    #[test]
    fn test_pledges_reduce_free_memory() {
        let scorer = AllocationScorer::default();
        let device = snapshot(0, 10.0, 10000, 2000);

        assert!(scorer.score_with_pledge(&device, 4000, 4000).is_some());
        assert!(scorer.score_with_pledge(&device, 4000, 4001).is_none());
        assert!(scorer.score_with_pledge(&device, 0, u64::MAX).is_some());
    }

    #[test]
    fn test_zero_total_memory_is_rejected() {
        let scorer = AllocationScorer::default();
        assert!(scorer.score(&snapshot(0, 0.0, 0, 0), 0).is_none());
    }

    #[test]
    fn test_custom_weights() {
        let scorer = AllocationScorer::new(ScoringWeights {
            utilization: 0.0,
            memory: 1.0,
        });
        let score = scorer.score(&snapshot(0, 99.0, 1000, 500), 0).unwrap();
        assert!((score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_weights_from_config() {
        let weights = ScoringWeights::from(&AllocatorConfig::default());
        assert_eq!(weights, ScoringWeights::default());
    }

    #[test]
    fn test_select_best_tie_break() {
        assert_eq!(
            AllocationScorer::select_best([(3, 42.0), (1, 42.0), (2, 42.0)]),
            Some((1, 42.0))
        );
        assert_eq!(
            AllocationScorer::select_best([(0, 42.0), (1, 12.5)]),
            Some((1, 12.5))
        );
        assert_eq!(AllocationScorer::select_best(Vec::new()), None);
    }
}
