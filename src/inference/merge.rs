//! Pattern merging utilities
//!
//! Combines statistics computed from independent corpora. Counts are summed
//! pointwise and frequencies recomputed from the sums, so merging is
//! commutative in every count. Operands must share standard and message
//! type; anything else is a fatal [`IntelligenceError::MergeIncompatibility`].

use tracing::debug;

use crate::config::{ConfidenceConfig, DEFAULT_MAX_COMMON_VALUES};
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::models::{
    ChangeType, ConfigurationChange, ConfigurationMetadata, FieldPatterns, MessagePattern,
    VendorConfiguration, VendorSignature, merge_deviations,
};

/// Upper bound of the sample-size bonus added to merged confidence
const MAX_MERGE_BONUS: f64 = 0.1;

/// Merges patterns and whole configurations
#[derive(Debug, Clone)]
pub struct PatternMergeService {
    config: ConfidenceConfig,
    max_common_values: usize,
}

impl Default for PatternMergeService {
    fn default() -> Self {
        Self::new(ConfidenceConfig::default())
    }
}

impl PatternMergeService {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self {
            config,
            max_common_values: DEFAULT_MAX_COMMON_VALUES,
        }
    }

    /// Bound on value histograms after a merge (at least 1)
    pub fn with_max_common_values(mut self, max: usize) -> Self {
        self.max_common_values = max.max(1);
        self
    }

    /// Merge two corpus rollups. Neither input is modified.
    pub fn merge_patterns(
        &self,
        primary: &MessagePattern,
        secondary: &MessagePattern,
    ) -> IntelligenceResult<MessagePattern> {
        check_compatible(
            &primary.standard,
            &primary.message_type,
            &secondary.standard,
            &secondary.message_type,
        )?;

        let segments = |pattern: &MessagePattern| FieldPatterns {
            standard: pattern.standard.clone(),
            message_type: pattern.message_type.clone(),
            segment_patterns: pattern.segment_patterns.clone(),
            sample_size: pattern.sample_size,
        };
        let mut merged = segments(primary).merge_with(segments(secondary));
        merged.truncate_common_values(self.max_common_values);

        let confidence = self.merged_confidence(
            primary.confidence,
            primary.sample_size,
            secondary.confidence,
            secondary.sample_size,
        );

        // Flattened paths follow the merged segments
        let pattern = MessagePattern::from_field_patterns(
            &merged,
            primary.total_samples + secondary.total_samples,
            confidence,
        );

        debug!(
            standard = %primary.standard,
            message_type = %primary.message_type,
            fields = pattern.field_frequencies.len(),
            confidence,
            "Merged message patterns"
        );

        Ok(pattern)
    }

    /// Merge per-segment statistics of the same standard and message type
    pub fn merge_field_patterns(
        &self,
        primary: &FieldPatterns,
        secondary: &FieldPatterns,
    ) -> IntelligenceResult<FieldPatterns> {
        check_compatible(
            &primary.standard,
            &primary.message_type,
            &secondary.standard,
            &secondary.message_type,
        )?;
        let mut merged = primary.clone().merge_with(secondary.clone());
        merged.truncate_common_values(self.max_common_values);
        Ok(merged)
    }

    /// Fold `incoming` into `existing`.
    ///
    /// Statistics and deviations are combined, the more confident signature
    /// is kept and the version is bumped. A single `Merged` change is
    /// appended; the history of `incoming` is not carried over.
    pub fn merge_configurations(
        &self,
        existing: &VendorConfiguration,
        incoming: &VendorConfiguration,
    ) -> IntelligenceResult<VendorConfiguration> {
        if existing.address != incoming.address {
            return Err(IntelligenceError::validation(format!(
                "Cannot merge configurations for different addresses: {} and {}",
                existing.address, incoming.address
            )));
        }

        let field_patterns =
            self.merge_field_patterns(&existing.field_patterns, &incoming.field_patterns)?;

        let n1 = existing.messages_sampled();
        let n2 = incoming.messages_sampled();
        let confidence =
            self.merged_confidence(existing.confidence(), n1, incoming.confidence(), n2);

        let format_deviations = merge_deviations(
            existing.format_deviations.clone(),
            n1,
            incoming.format_deviations.clone(),
            n2,
        );

        let signature = pick_signature(&existing.signature, &incoming.signature);

        let impact = confidence - existing.confidence();
        let change = ConfigurationChange::new(
            ChangeType::Merged,
            format!(
                "Merged {n2} messages into {n1} (confidence {:.2} -> {confidence:.2})",
                existing.confidence()
            ),
            impact,
        );

        let mut metadata = ConfigurationMetadata {
            messages_sampled: n1 + n2,
            confidence,
            first_seen: existing.metadata.first_seen.min(incoming.metadata.first_seen),
            last_updated: change.timestamp,
            version: existing.metadata.version + 1,
            changes: existing.metadata.changes.clone(),
        };
        metadata.changes.append(change);

        Ok(VendorConfiguration {
            address: existing.address.clone(),
            signature,
            field_patterns,
            format_deviations,
            metadata,
        })
    }

    /// Sample-weighted mean of two confidences plus a bonus that grows with
    /// the combined sample size, capped at 1.0
    pub fn merged_confidence(&self, c1: f64, n1: usize, c2: f64, n2: usize) -> f64 {
        let total = n1 + n2;
        let mean = if total == 0 {
            (c1 + c2) / 2.0
        } else {
            (c1 * n1 as f64 + c2 * n2 as f64) / total as f64
        };
        let threshold = self.config.large_corpus_threshold.max(1) as f64;
        let bonus = MAX_MERGE_BONUS * total as f64 / (total as f64 + threshold);
        (mean + bonus).clamp(0.0, 1.0)
    }
}

fn check_compatible(
    primary_standard: &str,
    primary_type: &str,
    secondary_standard: &str,
    secondary_type: &str,
) -> IntelligenceResult<()> {
    if !primary_standard.eq_ignore_ascii_case(secondary_standard) {
        return Err(IntelligenceError::MergeIncompatibility {
            field: "standard",
            primary: primary_standard.to_string(),
            secondary: secondary_standard.to_string(),
        });
    }
    if primary_type != secondary_type {
        return Err(IntelligenceError::MergeIncompatibility {
            field: "messageType",
            primary: primary_type.to_string(),
            secondary: secondary_type.to_string(),
        });
    }
    Ok(())
}

/// Higher confidence wins; a known vendor beats the fallback; ties go to
/// the lexically smaller name
fn pick_signature(a: &VendorSignature, b: &VendorSignature) -> VendorSignature {
    if a.is_unknown() != b.is_unknown() {
        return if a.is_unknown() { b.clone() } else { a.clone() };
    }
    match a.confidence.total_cmp(&b.confidence) {
        std::cmp::Ordering::Greater => a.clone(),
        std::cmp::Ordering::Less => b.clone(),
        std::cmp::Ordering::Equal if a.name <= b.name => a.clone(),
        std::cmp::Ordering::Equal => b.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfigurationAddress, FieldFrequency};

    fn pattern(message_type: &str, populated: usize, total: usize, confidence: f64) -> MessagePattern {
        let mut patterns = FieldPatterns::new("HL7v23", message_type);
        patterns.sample_size = total;
        let pid = patterns.segment_mut("PID");
        pid.sample_size = total;
        pid.field_frequencies
            .insert(3, FieldFrequency::from_counts(3, "Patient ID", populated, total));
        MessagePattern::from_field_patterns(&patterns, total, confidence)
    }

    #[test]
    fn test_merge_sums_counts() {
        let service = PatternMergeService::default();
        let merged = service
            .merge_patterns(&pattern("ADT^A01", 8, 10, 0.8), &pattern("ADT^A01", 5, 10, 0.6))
            .unwrap();

        let field = &merged.field_frequencies["PID.3"];
        assert_eq!(field.populated_count, 13);
        assert_eq!(field.total_count, 20);
        assert!((field.frequency - 0.65).abs() < 1e-9);
        assert_eq!(merged.sample_size, 20);
        assert!(merged.confidence <= 1.0);
        assert!(merged.confidence > 0.7);
    }

    #[test]
    fn test_message_type_mismatch_is_fatal() {
        let service = PatternMergeService::default();
        let err = service
            .merge_patterns(&pattern("ADT^A01", 1, 1, 0.5), &pattern("ORU^R01", 1, 1, 0.5))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            IntelligenceError::MergeIncompatibility { field: "messageType", .. }
        ));
    }

    #[test]
    fn test_inputs_unchanged() {
        let service = PatternMergeService::default();
        let a = pattern("ADT^A01", 2, 4, 0.5);
        let b = pattern("ADT^A01", 1, 4, 0.5);
        let before = a.clone();
        service.merge_patterns(&a, &b).unwrap();
        assert_eq!(a, before);
    }

    #[test]
    fn test_merged_confidence_capped() {
        let service = PatternMergeService::default();
        assert_eq!(service.merged_confidence(1.0, 500, 1.0, 500), 1.0);
        let c = service.merged_confidence(0.5, 10, 0.5, 10);
        assert!(c > 0.5 && c < 0.6);
    }

    #[test]
    fn test_merge_configurations() {
        let address = ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01");
        let mut patterns = FieldPatterns::new("HL7v23", "ADT^A01");
        patterns.segment_mut("PID").field_mut(3, "Patient ID").record("1");

        let make = |n, confidence| VendorConfiguration {
            address: address.clone(),
            signature: VendorSignature::unknown(),
            field_patterns: patterns.clone(),
            format_deviations: Vec::new(),
            metadata: ConfigurationMetadata::created(n, confidence),
        };

        let merged = PatternMergeService::default()
            .merge_configurations(&make(5, 0.6), &make(7, 0.8))
            .unwrap();
        assert_eq!(merged.messages_sampled(), 12);
        assert_eq!(merged.metadata.version, 2);
        assert_eq!(merged.metadata.changes.len(), 2);
        assert_eq!(
            merged.metadata.changes.last().unwrap().change_type,
            ChangeType::Merged
        );
        assert_eq!(merged.field_patterns.field("PID.3").unwrap().total_count, 2);
    }

    #[test]
    fn test_merge_bounds_common_values() {
        let histogram = |range: std::ops::Range<usize>| {
            let mut patterns = FieldPatterns::new("HL7v23", "ADT^A01");
            let field = patterns.segment_mut("MSH").field_mut(10, "Message Control ID");
            for i in range {
                field.record(&i.to_string());
            }
            patterns
        };

        let service = PatternMergeService::default().with_max_common_values(4);
        let merged = service
            .merge_field_patterns(&histogram(0..6), &histogram(6..12))
            .unwrap();
        let field = merged.field("MSH.10").unwrap();
        assert_eq!(field.common_values.len(), 4);
        assert_eq!(field.total_count, 12);

        let a = MessagePattern::from_field_patterns(&histogram(0..6), 6, 0.5);
        let b = MessagePattern::from_field_patterns(&histogram(6..12), 6, 0.5);
        let merged = service.merge_patterns(&a, &b).unwrap();
        assert_eq!(merged.field_frequencies["MSH.10"].common_values.len(), 4);
        assert_eq!(merged.segment_patterns["MSH"].field(10).unwrap().common_values.len(), 4);
    }

    #[test]
    fn test_pick_signature_prefers_known_vendor() {
        let mut epic = VendorSignature::unknown();
        epic.name = "Epic".to_string();
        epic.confidence = 0.2;
        let picked = pick_signature(&VendorSignature::unknown(), &epic);
        assert_eq!(picked.name, "Epic");
    }
}
