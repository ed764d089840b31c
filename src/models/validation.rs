//! Catalog query results

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::address::ConfigurationAddress;

/// Confidence below which a validation result carries a low-confidence warning
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Outcome of scoring one message against a stored configuration.
///
/// Missing configurations and empty messages produce an invalid result
/// rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageValidationResult {
    pub address: ConfigurationAddress,
    pub is_valid: bool,
    pub confidence: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub validated_at: DateTime<Utc>,
}

impl MessageValidationResult {
    pub fn valid(address: ConfigurationAddress, confidence: f64) -> Self {
        Self {
            address,
            is_valid: true,
            confidence: confidence.clamp(0.0, 1.0),
            errors: Vec::new(),
            warnings: Vec::new(),
            validated_at: Utc::now(),
        }
    }

    pub fn invalid(address: ConfigurationAddress, error: impl Into<String>) -> Self {
        Self {
            address,
            is_valid: false,
            confidence: 0.0,
            errors: vec![error.into()],
            warnings: Vec::new(),
            validated_at: Utc::now(),
        }
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Multiply the confidence by `factor`, staying within `[0, 1]`
    pub fn scale_confidence(&mut self, factor: f64) {
        self.confidence = (self.confidence * factor).clamp(0.0, 1.0);
    }
}

/// Corpus-wide rollup of the catalog
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStatistics {
    pub total_configurations: usize,
    pub configurations_by_vendor: BTreeMap<String, usize>,
    pub configurations_by_standard: BTreeMap<String, usize>,
    pub total_messages_analyzed: usize,
    pub average_confidence: f64,
    pub most_recent_update: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_confidence() {
        let address = ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01");
        let mut result = MessageValidationResult::valid(address, 0.9);
        result.scale_confidence(0.8);
        assert!((result.confidence - 0.72).abs() < 1e-9);
        result.scale_confidence(5.0);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_invalid_result() {
        let address = ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01");
        let result = MessageValidationResult::invalid(address, "no configuration");
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["no configuration"]);
    }
}
