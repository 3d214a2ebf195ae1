//! Detection parameters shared by the matrix, prediction and clustering stages

use anyhow::Result;

use crate::error::EmeraldError;

/// Probability cutoffs for greediness levels 0..=3 (higher level, lower cutoff)
pub const GREED_LEVELS: [f64; 4] = [0.90, 0.75, 0.60, 0.45];

pub const DEFAULT_GREED: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    pub block_size: usize,       // window length and matrix padding block; 0 = no padding
    pub greed_levels: [f64; 4],  // --greed table
    pub gap_fill: usize,         // negative runs up to this length are bridged
    pub min_run: usize,          // positive runs up to this length are dropped
    pub border_threshold: f64,   // fixed cutoff for the border mask
    pub class_intercept: f64,    // acceptance = clamp(intercept + slope * threshold)
    pub class_slope: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        DetectionParams {
            block_size: 128,
            greed_levels: GREED_LEVELS,
            gap_fill: 2,
            min_run: 2,
            border_threshold: 0.40,
            class_intercept: -0.15,
            class_slope: 1.0,
        }
    }
}

impl DetectionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_gap_fill(mut self, gap_fill: usize) -> Self {
        self.gap_fill = gap_fill;
        self
    }

    pub fn with_min_run(mut self, min_run: usize) -> Self {
        self.min_run = min_run;
        self
    }

    pub fn with_border_threshold(mut self, threshold: f64) -> Self {
        self.border_threshold = threshold;
        self
    }

    /// Probability threshold for cluster membership.
    ///
    /// An explicit `score` wins over the greediness `level`.
    pub fn resolve_threshold(&self, level: u8, score: Option<f64>) -> Result<f64> {
        if let Some(score) = score {
            if !(0.0..=1.0).contains(&score) {
                return Err(EmeraldError::InvalidParameter(format!(
                    "score {score} outside [0, 1]"
                ))
                .into());
            }
            return Ok(score);
        }

        self.greed_levels
            .get(level as usize)
            .copied()
            .ok_or_else(|| {
                EmeraldError::InvalidParameter(format!("greediness level {level} not in 0..=3"))
                    .into()
            })
    }

    /// Minimum best-class probability a cluster needs to be kept
    pub fn class_acceptance(&self, threshold: f64) -> f64 {
        (self.class_intercept + self.class_slope * threshold).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_threshold_levels() {
        let params = DetectionParams::default();
        for (level, expected) in GREED_LEVELS.iter().enumerate() {
            assert_eq!(params.resolve_threshold(level as u8, None).unwrap(), *expected);
        }
    }

    #[test]
    fn test_score_overrides_level() {
        let params = DetectionParams::default();
        assert_eq!(params.resolve_threshold(0, Some(0.33)).unwrap(), 0.33);
    }

    #[test]
    fn test_invalid_level_and_score() {
        let params = DetectionParams::default();
        assert!(params.resolve_threshold(4, None).is_err());
        let err = params.resolve_threshold(2, Some(1.5)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EmeraldError>(),
            Some(EmeraldError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_class_acceptance_clamped() {
        let mut params = DetectionParams::default();
        params.class_intercept = -0.5;
        params.class_slope = 1.0;
        assert_eq!(params.class_acceptance(0.2), 0.0);

        params.class_intercept = 0.5;
        params.class_slope = 2.0;
        assert_eq!(params.class_acceptance(0.9), 1.0);

        params.class_intercept = 0.1;
        params.class_slope = 0.5;
        assert!((params.class_acceptance(0.6) - 0.4).abs() < 1e-12);
    }
}
