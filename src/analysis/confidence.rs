//! Confidence scoring
//!
//! Field confidence measures how consistent population rates are across a
//! corpus: a field that is always or never populated is a strong signal, a
//! field populated half the time is noise. With few samples the score decays
//! toward the neutral 0.5.
//!
//! Overall confidence blends the vendor and field signals. The field signal
//! gains weight as the corpus grows, and corpora past the large-corpus
//! threshold earn a bounded bonus.

use crate::config::ConfidenceConfig;
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::models::FieldPatterns;

/// Score used when a signal is unavailable
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Absolute cap of the large-corpus bonus
const MAX_BONUS: f64 = 0.1;

/// Pure confidence arithmetic; never performs I/O
#[derive(Debug, Clone, Default)]
pub struct ConfidenceCalculationService {
    config: ConfidenceConfig,
}

impl ConfidenceCalculationService {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    /// Confidence in a set of field statistics computed from `sample_size`
    /// messages.
    pub fn field_pattern_confidence(
        &self,
        patterns: &FieldPatterns,
        sample_size: usize,
    ) -> IntelligenceResult<f64> {
        let mut weighted = 0.0;
        let mut total = 0usize;

        for (path, field) in patterns.fields() {
            if field.populated_count > field.total_count {
                return Err(IntelligenceError::analysis(
                    "confidence calculation",
                    format!(
                        "{path}: populated count {} exceeds total {}",
                        field.populated_count, field.total_count
                    ),
                ));
            }
            if field.total_count == 0 {
                continue;
            }
            let rate = field.frequency;
            weighted += field.total_count as f64 * rate.max(1.0 - rate);
            total += field.total_count;
        }

        if total == 0 {
            return Ok(NEUTRAL_CONFIDENCE);
        }

        let consistency = weighted / total as f64;
        let adequacy = self.adequacy(sample_size);
        let confidence = NEUTRAL_CONFIDENCE + adequacy * (consistency - NEUTRAL_CONFIDENCE);
        Ok(confidence.clamp(0.0, 1.0))
    }

    /// Blend vendor and field confidences; missing signals count as 0.5.
    pub fn overall_confidence(
        &self,
        vendor: Option<f64>,
        field: Option<f64>,
        sample_size: usize,
    ) -> f64 {
        let vendor = vendor.unwrap_or(NEUTRAL_CONFIDENCE).clamp(0.0, 1.0);
        let field = field.unwrap_or(NEUTRAL_CONFIDENCE).clamp(0.0, 1.0);

        let adequate = self.config.adequate_sample_size.max(1) as f64;
        let n = sample_size as f64;
        let corpus_weight = n / (n + adequate);

        let vendor_weight =
            self.config.vendor_weight.clamp(0.0, 1.0) * (1.0 - 0.5 * corpus_weight);
        let blended = vendor_weight * vendor + (1.0 - vendor_weight) * field;

        (blended + self.large_corpus_bonus(sample_size)).clamp(0.0, 1.0)
    }

    /// Bonus for corpora at or past the large-corpus threshold; grows
    /// monotonically with size and never exceeds 0.1
    pub fn large_corpus_bonus(&self, sample_size: usize) -> f64 {
        let threshold = self.config.large_corpus_threshold.max(1);
        if sample_size < threshold {
            return 0.0;
        }
        let max = self.config.max_large_corpus_bonus.clamp(0.0, MAX_BONUS);
        max * (1.0 - threshold as f64 / sample_size as f64)
    }

    fn adequacy(&self, sample_size: usize) -> f64 {
        let adequate = self.config.adequate_sample_size.max(1);
        (sample_size as f64 / adequate as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldFrequency;

    fn patterns(populated: usize, total: usize) -> FieldPatterns {
        let mut patterns = FieldPatterns::new("HL7v23", "ADT^A01");
        patterns
            .segment_mut("PID")
            .field_frequencies
            .insert(5, FieldFrequency::from_counts(5, "Patient Name", populated, total));
        patterns
    }

    #[test]
    fn test_consistent_fields_score_high() {
        let service = ConfidenceCalculationService::default();
        let confidence = service
            .field_pattern_confidence(&patterns(20, 20), 20)
            .unwrap();
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn test_small_sample_decays_to_neutral() {
        let service = ConfidenceCalculationService::default();
        let small = service.field_pattern_confidence(&patterns(1, 1), 1).unwrap();
        let large = service
            .field_pattern_confidence(&patterns(10, 10), 10)
            .unwrap();
        assert!(small < large);
        assert!((small - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_no_fields_is_neutral() {
        let service = ConfidenceCalculationService::default();
        let empty = FieldPatterns::new("HL7v23", "ADT^A01");
        assert_eq!(service.field_pattern_confidence(&empty, 50).unwrap(), 0.5);
    }

    #[test]
    fn test_corrupt_counts_rejected() {
        let service = ConfidenceCalculationService::default();
        let mut corrupt = patterns(1, 1);
        corrupt
            .segment_mut("PID")
            .field_frequencies
            .get_mut(&5)
            .unwrap()
            .populated_count = 9;
        assert!(service.field_pattern_confidence(&corrupt, 1).is_err());
    }

    #[test]
    fn test_missing_signals_are_neutral() {
        let service = ConfidenceCalculationService::default();
        assert!((service.overall_confidence(None, None, 5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_bonus_bounded_and_monotone() {
        let service = ConfidenceCalculationService::default();
        assert_eq!(service.large_corpus_bonus(10), 0.0);
        assert_eq!(service.large_corpus_bonus(50), 0.0);
        let a = service.large_corpus_bonus(100);
        let b = service.large_corpus_bonus(10_000);
        assert!(a > 0.0 && a < b && b <= 0.1);

        assert_eq!(service.overall_confidence(Some(1.0), Some(1.0), 10_000), 1.0);
    }

    #[test]
    fn test_field_signal_gains_weight_with_corpus() {
        let service = ConfidenceCalculationService::default();
        let small = service.overall_confidence(Some(0.0), Some(1.0), 1);
        let large = service.overall_confidence(Some(0.0), Some(1.0), 40);
        assert!(large > small);
    }
}
