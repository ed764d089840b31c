//! Human-curated vendor interface specifications

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::deviation::FormatDeviation;
use super::vendor::{DetectionRule, MatchType, VendorDetectionPattern};

/// Boost applied to rules derived from a specification's name lists
const DERIVED_RULE_BOOST: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificationInfo {
    pub name: String,
    pub vendor_name: String,
    pub standard: String,
    #[serde(default)]
    pub interface_type: String,
    #[serde(default)]
    pub confidential: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionInfo {
    #[serde(default)]
    pub common_application_names: Vec<String>,
    #[serde(default)]
    pub common_facility_patterns: Vec<String>,
    #[serde(default)]
    pub message_type_patterns: Vec<String>,
    #[serde(default)]
    pub base_confidence: f64,
}

/// Usage code of a field within a vendor interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FieldUsage {
    Required,
    #[default]
    Optional,
    Conditional,
    NotUsed,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub position: usize,
    pub name: String,
    #[serde(default)]
    pub usage: FieldUsage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_value: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, FieldSpec>,
}

impl FieldSpec {
    /// Whether `value` is acceptable under the fixed/allowed value constraints
    pub fn accepts(&self, value: &str) -> bool {
        if let Some(fixed) = &self.fixed_value {
            return value == fixed;
        }
        self.allowed_values.is_empty() || self.allowed_values.iter().any(|v| v == value)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub repeating: bool,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTypeSpec {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub segments: BTreeMap<String, SegmentSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_messages: Vec<String>,
}

/// File-persisted vendor interface specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorSpecification {
    pub id: String,
    pub specification: SpecificationInfo,
    #[serde(default)]
    pub detection_info: DetectionInfo,
    #[serde(default)]
    pub messages_to_receiver: BTreeMap<String, MessageTypeSpec>,
    #[serde(default)]
    pub common_deviations: Vec<FormatDeviation>,
}

impl VendorSpecification {
    pub fn vendor_name(&self) -> &str {
        &self.specification.vendor_name
    }

    pub fn standard(&self) -> &str {
        &self.specification.standard
    }

    pub fn message_type(&self, message_type: &str) -> Option<&MessageTypeSpec> {
        self.messages_to_receiver.get(message_type)
    }

    /// Fields marked `Required` for a message type, as `"SEG.n"` paths
    pub fn required_fields(&self, message_type: &str) -> Vec<String> {
        let Some(spec) = self.message_type(message_type) else {
            return Vec::new();
        };
        spec.segments
            .iter()
            .flat_map(|(segment_id, segment)| {
                segment
                    .fields
                    .iter()
                    .filter(|f| f.usage == FieldUsage::Required)
                    .map(move |f| format!("{segment_id}.{}", f.position))
            })
            .collect()
    }

    /// Detection pattern equivalent of this specification's detection info
    pub fn to_detection_pattern(&self) -> VendorDetectionPattern {
        let mut pattern =
            VendorDetectionPattern::new(format!("spec-{}", self.id), self.vendor_name());
        pattern.description = self.specification.description.clone();
        if !self.standard().is_empty() {
            pattern
                .supported_standards
                .insert(self.standard().to_string());
        }
        pattern.application_patterns = self
            .detection_info
            .common_application_names
            .iter()
            .map(|name| DetectionRule::new(MatchType::Contains, name, DERIVED_RULE_BOOST))
            .collect();
        pattern.facility_patterns = self
            .detection_info
            .common_facility_patterns
            .iter()
            .map(|p| DetectionRule::new(MatchType::Regex, p, DERIVED_RULE_BOOST / 2.0))
            .collect();
        pattern.base_confidence = self.detection_info.base_confidence.clamp(0.0, 1.0);
        pattern.common_deviations = self.common_deviations.clone();
        pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC_JSON: &str = r#"{
        "id": "lab-to-ehr",
        "specification": {
            "name": "Lab results interface",
            "vendorName": "Generic LIS",
            "standard": "HL7v23",
            "interfaceType": "Lab to EHR",
            "confidential": false,
            "description": "ORU results"
        },
        "detectionInfo": {
            "commonApplicationNames": ["LIS"],
            "commonFacilityPatterns": ["^LAB"],
            "messageTypePatterns": ["ORU^R01"],
            "baseConfidence": 0.5
        },
        "messagesToReceiver": {
            "ORU^R01": {
                "description": "Observation result",
                "segments": {
                    "OBX": {
                        "description": "Observation",
                        "repeating": true,
                        "fields": [
                            {"position": 2, "name": "Value Type", "usage": "Required", "allowedValues": ["NM", "ST"]},
                            {"position": 11, "name": "Result Status", "usage": "Required", "fixedValue": "F"}
                        ]
                    }
                },
                "sampleMessages": []
            }
        },
        "commonDeviations": []
    }"#;

    #[test]
    fn test_specification_json_contract() {
        let spec: VendorSpecification = serde_json::from_str(SPEC_JSON).unwrap();
        assert_eq!(spec.vendor_name(), "Generic LIS");
        let oru = spec.message_type("ORU^R01").unwrap();
        assert!(oru.segments["OBX"].repeating);
        assert_eq!(spec.required_fields("ORU^R01"), vec!["OBX.2", "OBX.11"]);
    }

    #[test]
    fn test_field_spec_accepts() {
        let spec: VendorSpecification = serde_json::from_str(SPEC_JSON).unwrap();
        let fields = &spec.messages_to_receiver["ORU^R01"].segments["OBX"].fields;
        assert!(fields[0].accepts("NM"));
        assert!(!fields[0].accepts("CE"));
        assert!(fields[1].accepts("F"));
        assert!(!fields[1].accepts("P"));
    }

    #[test]
    fn test_to_detection_pattern() {
        let spec: VendorSpecification = serde_json::from_str(SPEC_JSON).unwrap();
        let pattern = spec.to_detection_pattern();
        assert_eq!(pattern.vendor_name, "Generic LIS");
        assert!(pattern.supports_standard("HL7v23"));
        assert!(pattern.score("MAIN_LIS", "").is_some());
        assert!(pattern.score("OTHER", "LAB_NORTH").is_some());
    }
}
