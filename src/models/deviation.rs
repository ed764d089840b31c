//! Observed departures from the nominal standard

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a format deviation.
///
/// Serialized as a plain string (`"StructuralDeviation"`); unrecognized
/// strings round-trip through [`DeviationType::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviationType {
    /// Non-standard delimiters, escape or line-terminator usage
    EncodingVariation,
    /// Unexpected, missing or reordered segments
    StructuralDeviation,
    /// Field content not matching the field's declared format
    FieldFormatDeviation,
    /// Alternative representation of the same data (e.g. date precision)
    DataFormatVariation,
    /// A field the standard requires is left empty
    MissingRequiredField,
    /// Vendor- or plugin-specific classification
    Custom(String),
}

impl DeviationType {
    pub fn as_str(&self) -> &str {
        match self {
            DeviationType::EncodingVariation => "EncodingVariation",
            DeviationType::StructuralDeviation => "StructuralDeviation",
            DeviationType::FieldFormatDeviation => "FieldFormatDeviation",
            DeviationType::DataFormatVariation => "DataFormatVariation",
            DeviationType::MissingRequiredField => "MissingRequiredField",
            DeviationType::Custom(name) => name,
        }
    }
}

impl From<String> for DeviationType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "EncodingVariation" => DeviationType::EncodingVariation,
            "StructuralDeviation" => DeviationType::StructuralDeviation,
            "FieldFormatDeviation" => DeviationType::FieldFormatDeviation,
            "DataFormatVariation" => DeviationType::DataFormatVariation,
            "MissingRequiredField" => DeviationType::MissingRequiredField,
            _ => DeviationType::Custom(value),
        }
    }
}

impl From<DeviationType> for String {
    fn from(value: DeviationType) -> Self {
        match value {
            DeviationType::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for DeviationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered severity; `Info < Warning < Error`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

/// One observed deviation with its rate across the analyzed corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDeviation {
    pub deviation_type: DeviationType,
    pub location: String,
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    /// Observed rate (0.0 - 1.0)
    #[serde(default)]
    pub frequency: f64,
}

impl FormatDeviation {
    pub fn new(
        deviation_type: DeviationType,
        location: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        frequency: f64,
    ) -> Self {
        Self {
            deviation_type,
            location: location.into(),
            description: description.into(),
            severity,
            frequency: frequency.clamp(0.0, 1.0),
        }
    }

    /// Identity used when de-duplicating deviations from several queries
    pub fn key(&self) -> (&str, &str) {
        (self.deviation_type.as_str(), self.location.as_str())
    }
}

/// Merge deviation lists, keeping one entry per `(type, location)`.
///
/// Frequencies of duplicates are combined as a weighted mean using the
/// provided corpus sizes; the higher severity wins.
pub fn merge_deviations(
    primary: Vec<FormatDeviation>,
    primary_weight: usize,
    secondary: Vec<FormatDeviation>,
    secondary_weight: usize,
) -> Vec<FormatDeviation> {
    let total = (primary_weight + secondary_weight).max(1) as f64;
    let mut merged: Vec<FormatDeviation> = Vec::with_capacity(primary.len() + secondary.len());

    for deviation in primary {
        let mut deviation = deviation;
        deviation.frequency = deviation.frequency * primary_weight as f64 / total;
        merged.push(deviation);
    }

    for deviation in secondary {
        let weighted = deviation.frequency * secondary_weight as f64 / total;
        if let Some(existing) = merged.iter_mut().find(|d| d.key() == deviation.key()) {
            existing.frequency = (existing.frequency + weighted).clamp(0.0, 1.0);
            existing.severity = existing.severity.max(deviation.severity);
        } else {
            let mut deviation = deviation;
            deviation.frequency = weighted;
            merged.push(deviation);
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deviation_type_serde() {
        let json = serde_json::to_string(&DeviationType::StructuralDeviation).unwrap();
        assert_eq!(json, "\"StructuralDeviation\"");

        let custom: DeviationType = serde_json::from_str("\"ZSegmentUsage\"").unwrap();
        assert_eq!(custom, DeviationType::Custom("ZSegmentUsage".to_string()));
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_frequency_clamped() {
        let deviation = FormatDeviation::new(
            DeviationType::EncodingVariation,
            "MSH.2",
            "custom encoding characters",
            Severity::Warning,
            3.0,
        );
        assert_eq!(deviation.frequency, 1.0);
    }

    #[test]
    fn test_merge_deviations_weighted() {
        let a = vec![FormatDeviation::new(
            DeviationType::StructuralDeviation,
            "ZPD",
            "custom segment",
            Severity::Info,
            1.0,
        )];
        let b = vec![FormatDeviation::new(
            DeviationType::StructuralDeviation,
            "ZPD",
            "custom segment",
            Severity::Warning,
            0.0,
        )];

        let merged = merge_deviations(a, 5, b, 5);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].frequency, 0.5);
        assert_eq!(merged[0].severity, Severity::Warning);
    }
}
