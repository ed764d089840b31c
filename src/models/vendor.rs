//! Vendor fingerprints and detection results

use std::collections::BTreeSet;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::deviation::FormatDeviation;
use crate::error::{IntelligenceError, IntelligenceResult};

/// How a detection rule compares its pattern with an observed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchType {
    Exact,
    #[default]
    Contains,
    Regex,
}

/// A single application/facility matching rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRule {
    #[serde(default)]
    pub match_type: MatchType,
    pub pattern: String,
    #[serde(default)]
    pub case_sensitive: bool,
    /// Added to the pattern's base confidence when this rule matches
    #[serde(default)]
    pub confidence_boost: f64,
}

impl DetectionRule {
    pub fn new(match_type: MatchType, pattern: impl Into<String>, confidence_boost: f64) -> Self {
        Self {
            match_type,
            pattern: pattern.into(),
            case_sensitive: false,
            confidence_boost,
        }
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Whether `value` satisfies this rule. Invalid regexes never match.
    pub fn matches(&self, value: &str) -> bool {
        if value.is_empty() || self.pattern.is_empty() {
            return false;
        }
        match self.match_type {
            MatchType::Exact => {
                if self.case_sensitive {
                    value == self.pattern
                } else {
                    value.eq_ignore_ascii_case(&self.pattern)
                }
            }
            MatchType::Contains => {
                if self.case_sensitive {
                    value.contains(&self.pattern)
                } else {
                    value
                        .to_ascii_lowercase()
                        .contains(&self.pattern.to_ascii_lowercase())
                }
            }
            MatchType::Regex => match RegexBuilder::new(&self.pattern)
                .case_insensitive(!self.case_sensitive)
                .build()
            {
                Ok(regex) => regex.is_match(value),
                Err(e) => {
                    warn!(pattern = %self.pattern, error = %e, "Invalid detection regex");
                    false
                }
            },
        }
    }
}

/// File-persisted vendor fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorDetectionPattern {
    pub id: String,
    pub vendor_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub supported_standards: BTreeSet<String>,
    #[serde(default)]
    pub application_patterns: Vec<DetectionRule>,
    #[serde(default)]
    pub facility_patterns: Vec<DetectionRule>,
    #[serde(default)]
    pub base_confidence: f64,
    #[serde(default)]
    pub vendor_validated: bool,
    #[serde(default = "default_pattern_version")]
    pub pattern_version: String,
    #[serde(default)]
    pub common_deviations: Vec<FormatDeviation>,
}

fn default_pattern_version() -> String {
    "1.0".to_string()
}

impl VendorDetectionPattern {
    pub fn new(id: impl Into<String>, vendor_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vendor_name: vendor_name.into(),
            description: String::new(),
            supported_standards: BTreeSet::new(),
            application_patterns: Vec::new(),
            facility_patterns: Vec::new(),
            base_confidence: 0.5,
            vendor_validated: false,
            pattern_version: default_pattern_version(),
            common_deviations: Vec::new(),
        }
    }

    /// Whether this pattern applies to `standard`.
    ///
    /// An empty standard set applies everywhere. Matching is by prefix in
    /// either direction so `"HL7"` covers `"HL7v23"` and vice versa.
    pub fn supports_standard(&self, standard: &str) -> bool {
        if self.supported_standards.is_empty() {
            return true;
        }
        let standard = standard.to_ascii_lowercase();
        self.supported_standards.iter().any(|s| {
            let s = s.to_ascii_lowercase();
            standard.starts_with(&s) || s.starts_with(&standard)
        })
    }

    /// Confidence that a message with these sender values came from this
    /// vendor, or `None` when no rule matches.
    ///
    /// The best application boost and the best facility boost are added to
    /// the base confidence; the result is clamped to `[0, 1]`.
    pub fn score(&self, application: &str, facility: &str) -> Option<f64> {
        let best = |rules: &[DetectionRule], value: &str| {
            rules
                .iter()
                .filter(|r| r.matches(value))
                .map(|r| r.confidence_boost)
                .fold(None, |acc: Option<f64>, b| Some(acc.map_or(b, |a| a.max(b))))
        };

        let app_boost = best(&self.application_patterns, application);
        let facility_boost = best(&self.facility_patterns, facility);

        if app_boost.is_none() && facility_boost.is_none() {
            return None;
        }

        let confidence =
            self.base_confidence + app_boost.unwrap_or(0.0) + facility_boost.unwrap_or(0.0);
        Some(confidence.clamp(0.0, 1.0))
    }

    /// Check that every regex rule compiles and confidences are in range
    pub fn validate(&self) -> IntelligenceResult<()> {
        if !(0.0..=1.0).contains(&self.base_confidence) {
            return Err(IntelligenceError::validation(format!(
                "Pattern '{}' has base confidence {} outside [0, 1]",
                self.id, self.base_confidence
            )));
        }
        for rule in self.application_patterns.iter().chain(&self.facility_patterns) {
            if !rule.confidence_boost.is_finite() {
                return Err(IntelligenceError::validation(format!(
                    "Pattern '{}' has a non-finite confidence boost",
                    self.id
                )));
            }
            if rule.match_type == MatchType::Regex {
                RegexBuilder::new(&rule.pattern).build()?;
            }
        }
        Ok(())
    }
}

/// One vendor candidate produced by a plugin for one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorMatch {
    pub vendor_name: String,
    pub confidence: f64,
    pub detection_method: String,
    #[serde(default)]
    pub standard: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub sending_application: Option<String>,
    #[serde(default)]
    pub sending_facility: Option<String>,
    #[serde(default)]
    pub pattern_id: Option<String>,
    #[serde(default)]
    pub deviations: Vec<FormatDeviation>,
}

impl VendorMatch {
    pub fn new(
        vendor_name: impl Into<String>,
        confidence: f64,
        detection_method: impl Into<String>,
    ) -> Self {
        Self {
            vendor_name: vendor_name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            detection_method: detection_method.into(),
            standard: String::new(),
            version: None,
            sending_application: None,
            sending_facility: None,
            pattern_id: None,
            deviations: Vec::new(),
        }
    }
}
