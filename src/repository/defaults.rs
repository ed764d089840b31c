//! Built-in vendor knowledge, written to a repository when it is created

use std::collections::BTreeMap;

use crate::models::{
    DetectionInfo, DetectionRule, DeviationType, FieldSpec, FieldUsage, FormatDeviation,
    MatchType, MessageTypeSpec, SegmentSpec, Severity, SpecificationInfo,
    VendorDetectionPattern, VendorSpecification,
};

fn pattern(
    id: &str,
    vendor: &str,
    description: &str,
    standards: &[&str],
    base_confidence: f64,
) -> VendorDetectionPattern {
    let mut pattern = VendorDetectionPattern::new(id, vendor);
    pattern.description = description.to_string();
    pattern.supported_standards = standards.iter().map(|s| s.to_string()).collect();
    pattern.base_confidence = base_confidence;
    pattern
}

/// Detection patterns shipped with the crate
pub fn default_patterns() -> Vec<VendorDetectionPattern> {
    let mut epic = pattern(
        "epic",
        "Epic",
        "Epic Systems EHR interfaces (Bridges, Interconnect)",
        &["HL7", "FHIR"],
        0.6,
    );
    epic.application_patterns = vec![
        DetectionRule::new(MatchType::Contains, "EPIC", 0.3),
        DetectionRule::new(MatchType::Contains, "HYPERSPACE", 0.25),
    ];
    epic.facility_patterns = vec![DetectionRule::new(MatchType::Regex, r"^MYCHART", 0.1)];
    epic.vendor_validated = true;
    epic.common_deviations = vec![FormatDeviation::new(
        DeviationType::StructuralDeviation,
        "ZPD",
        "Epic patient demographics extension segment",
        Severity::Info,
        0.3,
    )];

    let mut cerner = pattern(
        "cerner",
        "Cerner",
        "Oracle Health (Cerner Millennium) interfaces",
        &["HL7", "FHIR"],
        0.6,
    );
    cerner.application_patterns = vec![
        DetectionRule::new(MatchType::Contains, "CERNER", 0.3),
        DetectionRule::new(MatchType::Contains, "MILLENNIUM", 0.25),
    ];
    cerner.vendor_validated = true;
    cerner.common_deviations = vec![FormatDeviation::new(
        DeviationType::DataFormatVariation,
        "PID.7",
        "Birth date sent without time component",
        Severity::Info,
        0.5,
    )];

    let mut pharmacy = pattern(
        "generic-pharmacy",
        "Generic Pharmacy System",
        "EHR to pharmacy order interfaces",
        &["HL7"],
        0.4,
    );
    pharmacy.application_patterns = vec![
        DetectionRule::new(MatchType::Regex, r"^(RX|PHARM)", 0.2),
        DetectionRule::new(MatchType::Contains, "PHARMACY", 0.25),
    ];

    let mut lab = pattern(
        "generic-lab",
        "Generic LIS",
        "Laboratory information system result interfaces",
        &["HL7"],
        0.4,
    );
    lab.application_patterns = vec![DetectionRule::new(MatchType::Regex, r"^(LIS|LAB)", 0.2)];
    lab.facility_patterns = vec![DetectionRule::new(MatchType::Regex, r"^LAB", 0.1)];

    let mut ncpdp = pattern(
        "ncpdp-script",
        "Surescripts",
        "NCPDP SCRIPT e-prescribing network",
        &["NCPDP"],
        0.5,
    );
    ncpdp.application_patterns = vec![DetectionRule::new(MatchType::Contains, "SURESCRIPTS", 0.35)];

    let mut imaging = pattern(
        "imaging-ris",
        "Generic RIS",
        "Radiology information system order interfaces",
        &["HL7"],
        0.4,
    );
    imaging.application_patterns =
        vec![DetectionRule::new(MatchType::Regex, r"^(RIS|PACS|RAD)", 0.2)];

    vec![epic, cerner, pharmacy, lab, ncpdp, imaging]
}

fn field(position: usize, name: &str, usage: FieldUsage) -> FieldSpec {
    FieldSpec {
        position,
        name: name.to_string(),
        usage,
        ..Default::default()
    }
}

fn segment(description: &str, repeating: bool, fields: Vec<FieldSpec>) -> SegmentSpec {
    SegmentSpec {
        description: description.to_string(),
        repeating,
        fields,
    }
}

fn specification(
    id: &str,
    name: &str,
    vendor: &str,
    standard: &str,
    interface_type: &str,
    detection_info: DetectionInfo,
    messages: Vec<(&str, MessageTypeSpec)>,
) -> VendorSpecification {
    VendorSpecification {
        id: id.to_string(),
        specification: SpecificationInfo {
            name: name.to_string(),
            vendor_name: vendor.to_string(),
            standard: standard.to_string(),
            interface_type: interface_type.to_string(),
            confidential: false,
            description: format!("Built-in {interface_type} interface"),
        },
        detection_info,
        messages_to_receiver: messages
            .into_iter()
            .map(|(message_type, spec)| (message_type.to_string(), spec))
            .collect(),
        common_deviations: Vec::new(),
    }
}

fn detection(apps: &[&str], facilities: &[&str], types: &[&str], base: f64) -> DetectionInfo {
    let owned = |values: &[&str]| values.iter().map(|v| v.to_string()).collect();
    DetectionInfo {
        common_application_names: owned(apps),
        common_facility_patterns: owned(facilities),
        message_type_patterns: owned(types),
        base_confidence: base,
    }
}

fn message(description: &str, segments: Vec<(&str, SegmentSpec)>) -> MessageTypeSpec {
    MessageTypeSpec {
        description: description.to_string(),
        segments: segments
            .into_iter()
            .map(|(id, spec)| (id.to_string(), spec))
            .collect::<BTreeMap<_, _>>(),
        sample_messages: Vec::new(),
    }
}

/// Interface specifications shipped with the crate
pub fn default_specifications() -> Vec<VendorSpecification> {
    use FieldUsage::{Optional, Required};

    let pharmacy = specification(
        "generic-ehr-pharmacy",
        "EHR to pharmacy orders",
        "Generic Pharmacy System",
        "HL7v23",
        "EHR to Pharmacy",
        detection(&["PHARMACY", "RX"], &[], &["RDE^O11"], 0.4),
        vec![(
            "RDE^O11",
            message(
                "Pharmacy encoded order",
                vec![
                    (
                        "PID",
                        segment(
                            "Patient identification",
                            false,
                            vec![
                                field(3, "Patient Identifier List", Required),
                                field(5, "Patient Name", Required),
                                field(7, "Date of Birth", Optional),
                            ],
                        ),
                    ),
                    (
                        "RXE",
                        segment(
                            "Pharmacy encoded order",
                            true,
                            vec![
                                field(2, "Give Code", Required),
                                field(3, "Give Amount Minimum", Required),
                                field(5, "Give Units", Optional),
                            ],
                        ),
                    ),
                ],
            ),
        )],
    );

    let mut lab_status = field(11, "Observation Result Status", Required);
    lab_status.allowed_values = vec!["F".into(), "P".into(), "C".into()];
    let lab = specification(
        "lab-to-ehr",
        "Laboratory results",
        "Generic LIS",
        "HL7v23",
        "Lab to EHR",
        detection(&["LIS", "LAB"], &["^LAB"], &["ORU^R01"], 0.4),
        vec![(
            "ORU^R01",
            message(
                "Unsolicited observation result",
                vec![
                    (
                        "OBR",
                        segment(
                            "Observation request",
                            true,
                            vec![
                                field(4, "Universal Service ID", Required),
                                field(7, "Observation Date/Time", Optional),
                            ],
                        ),
                    ),
                    (
                        "OBX",
                        segment(
                            "Observation result",
                            true,
                            vec![
                                field(2, "Value Type", Required),
                                field(3, "Observation Identifier", Required),
                                field(5, "Observation Value", Optional),
                                lab_status,
                            ],
                        ),
                    ),
                ],
            ),
        )],
    );

    let ncpdp = specification(
        "ncpdp-script",
        "NCPDP SCRIPT e-prescribing",
        "Surescripts",
        "NCPDP",
        "Prescriber to Pharmacy",
        detection(&["SURESCRIPTS"], &[], &["NEWRX", "RXRENEWAL"], 0.5),
        vec![(
            "NEWRX",
            message(
                "New prescription",
                vec![(
                    "Patient",
                    segment(
                        "Patient",
                        false,
                        vec![
                            field(1, "Name", Required),
                            field(2, "Gender", Required),
                            field(3, "Date of Birth", Required),
                        ],
                    ),
                )],
            ),
        )],
    );

    let imaging = specification(
        "imaging-ris",
        "Radiology orders",
        "Generic RIS",
        "HL7v23",
        "EHR to RIS",
        detection(&["RIS", "PACS", "RAD"], &[], &["ORM^O01"], 0.4),
        vec![(
            "ORM^O01",
            message(
                "General order",
                vec![
                    (
                        "ORC",
                        segment(
                            "Common order",
                            true,
                            vec![
                                field(1, "Order Control", Required),
                                field(2, "Placer Order Number", Optional),
                            ],
                        ),
                    ),
                    (
                        "OBR",
                        segment(
                            "Observation request",
                            true,
                            vec![field(4, "Universal Service ID", Required)],
                        ),
                    ),
                ],
            ),
        )],
    );

    vec![pharmacy, lab, ncpdp, imaging]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ids_unique() {
        let patterns = default_patterns();
        let mut ids: Vec<&str> = patterns.iter().map(|p| p.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), patterns.len());
    }

    #[test]
    fn test_epic_scores_high() {
        let epic = default_patterns().into_iter().find(|p| p.id == "epic").unwrap();
        let score = epic.score("EPIC_ADT", "MAIN_HOSPITAL").unwrap();
        assert!((score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_lab_required_fields() {
        let lab = default_specifications()
            .into_iter()
            .find(|s| s.id == "lab-to-ehr")
            .unwrap();
        let required = lab.required_fields("ORU^R01");
        assert!(required.contains(&"OBX.11".to_string()));
        assert!(!required.contains(&"OBX.5".to_string()));
    }
}
