//! Configuration for inference and confidence scoring

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How single-standard vendor detection combines per-message results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VendorDetectionPolicy {
    /// Stop at the first message yielding a match
    #[default]
    FirstMatch,
    /// Sum confidences per vendor across every message, keep the heaviest
    ConfidenceWeighted,
    /// Count matches per vendor across every message, keep the most frequent
    MajorityVote,
}

/// Default number of most frequent literal values kept per field
pub const DEFAULT_MAX_COMMON_VALUES: usize = 10;

/// Options for a single inference request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceOptions {
    /// Maximum number of messages to analyze (0 = all)
    pub sample_limit: usize,

    /// Number of most frequent literal values kept per field
    pub max_common_values: usize,

    /// Recurse into composite fields
    pub include_component_patterns: bool,

    /// Run format deviation detection
    pub detect_deviations: bool,

    /// Vendor detection aggregation across sample messages
    pub vendor_detection_policy: VendorDetectionPolicy,

    /// Matches below this confidence are ignored (0.0 - 1.0)
    pub min_vendor_confidence: f64,

    /// Confidence scoring parameters
    pub confidence: ConfidenceConfig,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            sample_limit: 0,
            max_common_values: DEFAULT_MAX_COMMON_VALUES,
            include_component_patterns: true,
            detect_deviations: true,
            vendor_detection_policy: VendorDetectionPolicy::FirstMatch,
            min_vendor_confidence: 0.5,
            confidence: ConfidenceConfig::default(),
        }
    }
}

impl InferenceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for custom options
    pub fn builder() -> InferenceOptionsBuilder {
        InferenceOptionsBuilder::default()
    }

    /// Apply `sample_limit` to a corpus
    pub fn limit<'a>(&self, messages: &'a [String]) -> &'a [String] {
        if self.sample_limit > 0 && messages.len() > self.sample_limit {
            &messages[..self.sample_limit]
        } else {
            messages
        }
    }
}

/// Builder for InferenceOptions
#[derive(Debug, Default)]
pub struct InferenceOptionsBuilder {
    options: InferenceOptions,
}

impl InferenceOptionsBuilder {
    pub fn sample_limit(mut self, limit: usize) -> Self {
        self.options.sample_limit = limit;
        self
    }

    /// At least one value is always kept
    pub fn max_common_values(mut self, max: usize) -> Self {
        self.options.max_common_values = max.max(1);
        self
    }

    pub fn include_component_patterns(mut self, include: bool) -> Self {
        self.options.include_component_patterns = include;
        self
    }

    pub fn detect_deviations(mut self, detect: bool) -> Self {
        self.options.detect_deviations = detect;
        self
    }

    pub fn vendor_detection_policy(mut self, policy: VendorDetectionPolicy) -> Self {
        self.options.vendor_detection_policy = policy;
        self
    }

    pub fn min_vendor_confidence(mut self, threshold: f64) -> Self {
        self.options.min_vendor_confidence = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn confidence(mut self, confidence: ConfidenceConfig) -> Self {
        self.options.confidence = confidence;
        self
    }

    pub fn build(self) -> InferenceOptions {
        self.options
    }
}

/// Parameters of the confidence model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceConfig {
    /// Sample size at which field statistics are considered fully adequate
    pub adequate_sample_size: usize,

    /// Sample size from which the large-corpus bonus starts to apply
    pub large_corpus_threshold: usize,

    /// Upper bound of the large-corpus bonus
    pub max_large_corpus_bonus: f64,

    /// Weight of the vendor signal for the smallest corpora (0.0 - 1.0)
    pub vendor_weight: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            adequate_sample_size: 10,
            large_corpus_threshold: 50,
            max_large_corpus_bonus: 0.1,
            vendor_weight: 0.5,
        }
    }
}

/// Settings for the file-backed vendor repositories
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// How long loaded documents are served from memory
    pub cache_ttl: Duration,

    /// Seed built-in documents when the directory is created
    pub seed_defaults: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5 * 60),
            seed_defaults: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = InferenceOptions::default();
        assert_eq!(options.sample_limit, 0);
        assert_eq!(options.max_common_values, 10);
        assert_eq!(
            options.vendor_detection_policy,
            VendorDetectionPolicy::FirstMatch
        );
    }

    #[test]
    fn test_builder() {
        let options = InferenceOptions::builder()
            .sample_limit(100)
            .max_common_values(3)
            .detect_deviations(false)
            .vendor_detection_policy(VendorDetectionPolicy::MajorityVote)
            .build();

        assert_eq!(options.sample_limit, 100);
        assert_eq!(options.max_common_values, 3);
        assert!(!options.detect_deviations);
        assert_eq!(
            options.vendor_detection_policy,
            VendorDetectionPolicy::MajorityVote
        );
    }

    #[test]
    fn test_clamping() {
        let options = InferenceOptions::builder()
            .min_vendor_confidence(1.7)
            .max_common_values(0)
            .build();

        assert_eq!(options.min_vendor_confidence, 1.0);
        assert_eq!(options.max_common_values, 1);
    }

    #[test]
    fn test_sample_limit() {
        let messages: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        let options = InferenceOptions::builder().sample_limit(2).build();
        assert_eq!(options.limit(&messages).len(), 2);
        assert_eq!(InferenceOptions::default().limit(&messages).len(), 5);
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&VendorDetectionPolicy::ConfidenceWeighted).unwrap();
        assert_eq!(json, "\"confidenceWeighted\"");
    }
}
