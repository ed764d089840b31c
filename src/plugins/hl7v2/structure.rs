//! Reference tables: message structures, field names, field formats

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Segment expectations for one message type
#[derive(Debug, Clone, Copy)]
pub struct MessageStructure {
    pub message_type: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

impl MessageStructure {
    pub fn allows(&self, segment_id: &str) -> bool {
        self.required.contains(&segment_id) || self.optional.contains(&segment_id)
    }
}

static STRUCTURES: &[MessageStructure] = &[
    MessageStructure {
        message_type: "ADT^A01",
        required: &["MSH", "EVN", "PID", "PV1"],
        optional: &[
            "SFT", "PD1", "ROL", "NK1", "PV2", "DB1", "OBX", "AL1", "DG1", "DRG", "PR1", "GT1",
            "IN1", "IN2", "IN3", "ACC", "UB1", "UB2",
        ],
    },
    MessageStructure {
        message_type: "ADT^A04",
        required: &["MSH", "EVN", "PID", "PV1"],
        optional: &[
            "SFT", "PD1", "ROL", "NK1", "PV2", "DB1", "OBX", "AL1", "DG1", "DRG", "PR1", "GT1",
            "IN1", "IN2", "IN3", "ACC", "UB1", "UB2",
        ],
    },
    MessageStructure {
        message_type: "ADT^A08",
        required: &["MSH", "EVN", "PID", "PV1"],
        optional: &[
            "SFT", "PD1", "ROL", "NK1", "PV2", "DB1", "OBX", "AL1", "DG1", "DRG", "PR1", "GT1",
            "IN1", "IN2", "IN3", "ACC", "UB1", "UB2",
        ],
    },
    MessageStructure {
        message_type: "ORU^R01",
        required: &["MSH", "PID", "OBR", "OBX"],
        optional: &["SFT", "PD1", "NK1", "NTE", "PV1", "PV2", "ORC", "CTD", "SPM", "FT1", "CTI", "DSC"],
    },
    MessageStructure {
        message_type: "ORM^O01",
        required: &["MSH", "PID", "ORC"],
        optional: &["NTE", "PD1", "PV1", "PV2", "IN1", "GT1", "AL1", "OBR", "RQD", "RXO", "ODS", "DG1", "OBX", "CTI", "BLG"],
    },
    MessageStructure {
        message_type: "RDE^O11",
        required: &["MSH", "PID", "ORC", "RXE"],
        optional: &["NTE", "PD1", "PV1", "PV2", "IN1", "GT1", "AL1", "RXO", "RXR", "RXC", "OBX", "FT1", "BLG", "CTI"],
    },
    MessageStructure {
        message_type: "SIU^S12",
        required: &["MSH", "SCH"],
        optional: &["TQ1", "NTE", "PID", "PD1", "PV1", "PV2", "OBX", "DG1", "RGS", "AIS", "AIG", "AIL", "AIP"],
    },
    MessageStructure {
        message_type: "MDM^T02",
        required: &["MSH", "EVN", "PID", "PV1", "TXA", "OBX"],
        optional: &["SFT", "CON", "NTE"],
    },
];

/// Expected structure for a message type, if known
pub fn structure(message_type: &str) -> Option<&'static MessageStructure> {
    STRUCTURES.iter().find(|s| s.message_type == message_type)
}

/// Segments outside any table entry that any message may carry
static COMMON_SEGMENTS: &[&str] = &["MSH", "MSA", "ERR", "EVN", "NTE", "SFT"];

/// Resolved segment expectations for one message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentExpectation {
    pub required: BTreeSet<&'static str>,
    pub allowed: BTreeSet<&'static str>,
}

impl SegmentExpectation {
    /// Union of allowed segments, intersection of required ones
    fn from_structures<'a>(structures: impl IntoIterator<Item = &'a MessageStructure>) -> Self {
        let mut required: Option<BTreeSet<&'static str>> = None;
        let mut allowed = BTreeSet::new();
        for structure in structures {
            let own: BTreeSet<&'static str> = structure.required.iter().copied().collect();
            allowed.extend(own.iter().copied());
            allowed.extend(structure.optional.iter().copied());
            required = Some(match required {
                Some(required) => required.intersection(&own).copied().collect(),
                None => own,
            });
        }
        Self {
            required: required.unwrap_or_default(),
            allowed,
        }
    }

    pub fn allows(&self, segment_id: &str) -> bool {
        self.allowed.contains(segment_id)
    }
}

/// Event family of a message type: `ADT` for `ADT^A03`
pub fn message_family(message_type: &str) -> &str {
    message_type
        .split_once('^')
        .map_or(message_type, |(family, _)| family)
}

/// Expected segments for `message_type`.
///
/// A type missing from the table falls back to the entries of its event
/// family. An unknown family allows every segment the table names and
/// requires only `MSH`.
pub fn expected_segments(message_type: &str) -> SegmentExpectation {
    if let Some(known) = structure(message_type) {
        return SegmentExpectation::from_structures([known]);
    }
    let family = message_family(message_type);
    let mut members = STRUCTURES
        .iter()
        .filter(|s| message_family(s.message_type) == family)
        .peekable();
    let mut expectation = if members.peek().is_some() {
        SegmentExpectation::from_structures(members)
    } else {
        let mut generic = SegmentExpectation::from_structures(STRUCTURES);
        generic.required = BTreeSet::from(["MSH"]);
        generic
    };
    expectation.allowed.extend(COMMON_SEGMENTS.iter().copied());
    expectation
}

/// Vendor extension segments start with `Z`
pub fn is_custom_segment(segment_id: &str) -> bool {
    segment_id.starts_with('Z')
}

static FIELD_NAMES: &[(&str, &[&str])] = &[
    (
        "MSH",
        &[
            "Field Separator",
            "Encoding Characters",
            "Sending Application",
            "Sending Facility",
            "Receiving Application",
            "Receiving Facility",
            "Date/Time Of Message",
            "Security",
            "Message Type",
            "Message Control ID",
            "Processing ID",
            "Version ID",
        ],
    ),
    ("EVN", &["Event Type Code", "Recorded Date/Time", "Date/Time Planned Event"]),
    (
        "PID",
        &[
            "Set ID",
            "Patient ID",
            "Patient Identifier List",
            "Alternate Patient ID",
            "Patient Name",
            "Mother's Maiden Name",
            "Date/Time of Birth",
            "Administrative Sex",
            "Patient Alias",
            "Race",
            "Patient Address",
            "County Code",
            "Phone Number - Home",
            "Phone Number - Business",
            "Primary Language",
            "Marital Status",
            "Religion",
            "Patient Account Number",
            "SSN Number",
        ],
    ),
    (
        "PV1",
        &[
            "Set ID",
            "Patient Class",
            "Assigned Patient Location",
            "Admission Type",
            "Preadmit Number",
            "Prior Patient Location",
            "Attending Doctor",
            "Referring Doctor",
            "Consulting Doctor",
            "Hospital Service",
        ],
    ),
    (
        "ORC",
        &["Order Control", "Placer Order Number", "Filler Order Number", "Placer Group Number", "Order Status"],
    ),
    (
        "OBR",
        &[
            "Set ID",
            "Placer Order Number",
            "Filler Order Number",
            "Universal Service ID",
            "Priority",
            "Requested Date/Time",
            "Observation Date/Time",
        ],
    ),
    (
        "OBX",
        &[
            "Set ID",
            "Value Type",
            "Observation Identifier",
            "Observation Sub-ID",
            "Observation Value",
            "Units",
            "References Range",
            "Abnormal Flags",
            "Probability",
            "Nature of Abnormal Test",
            "Observation Result Status",
        ],
    ),
    ("RXE", &["Quantity/Timing", "Give Code", "Give Amount - Minimum", "Give Amount - Maximum", "Give Units"]),
];

/// Human-readable field name, or `SEG.n` when unknown
pub fn field_name(segment_id: &str, index: usize) -> String {
    FIELD_NAMES
        .iter()
        .find(|(id, _)| *id == segment_id)
        .and_then(|(_, names)| index.checked_sub(1).and_then(|i| names.get(i)))
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("{segment_id}.{index}"))
}

static PERSON_NAME: &[&str] = &["Family Name", "Given Name", "Middle Name", "Suffix", "Prefix", "Degree"];
static CODED_ELEMENT: &[&str] = &["Identifier", "Text", "Name of Coding System"];
static IDENTIFIER: &[&str] = &["ID", "Check Digit", "Check Digit Scheme", "Assigning Authority", "Identifier Type Code"];
static ADDRESS: &[&str] = &["Street Address", "Other Designation", "City", "State", "Zip", "Country"];

fn component_table(segment_id: &str, index: usize) -> Option<&'static [&'static str]> {
    match (segment_id, index) {
        ("PID", 5) | ("PID", 6) | ("PID", 9) => Some(PERSON_NAME),
        ("PID", 3) | ("PID", 2) | ("PID", 4) => Some(IDENTIFIER),
        ("PID", 11) => Some(ADDRESS),
        ("MSH", 9) => Some(&["Message Type", "Trigger Event", "Message Structure"]),
        ("OBX", 3) | ("OBR", 4) | ("RXE", 2) => Some(CODED_ELEMENT),
        _ => None,
    }
}

/// Human-readable component name, or `SEG.n.c` when unknown
pub fn component_name(segment_id: &str, index: usize, component: usize) -> String {
    component_table(segment_id, index)
        .and_then(|names| component.checked_sub(1).and_then(|i| names.get(i)))
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("{segment_id}.{index}.{component}"))
}

/// Timestamp fields; the flag marks fields that should carry a time
pub static TIMESTAMP_FIELDS: &[(&str, usize, bool)] = &[
    ("MSH", 7, true),
    ("EVN", 2, true),
    ("PID", 7, false),
    ("PV1", 44, true),
    ("OBR", 7, true),
    ("OBX", 14, true),
];

/// Fields that must be populated
pub static REQUIRED_FIELDS: &[(&str, usize)] = &[
    ("MSH", 9),
    ("MSH", 10),
    ("MSH", 12),
    ("PID", 3),
    ("PID", 5),
];

/// `YYYY[MM[DD[HH[MM[SS[.S[S[S[S]]]]]]]]][+/-ZZZZ]`
pub static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}(\d{2}(\d{2}(\d{2}(\d{2}(\d{2}(\.\d{1,4})?)?)?)?)?)?([+-]\d{4})?$").unwrap()
});

/// Number of digits before any fraction or offset
pub fn timestamp_precision(value: &str) -> usize {
    value.chars().take_while(char::is_ascii_digit).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_lookup() {
        let adt = structure("ADT^A01").unwrap();
        assert!(adt.allows("PID"));
        assert!(adt.allows("NK1"));
        assert!(!adt.allows("OBR"));
        assert!(structure("ZZZ^Z99").is_none());
    }

    #[test]
    fn test_expected_segments_fall_back_to_family() {
        let a03 = expected_segments("ADT^A03");
        assert!(a03.allows("PV1"));
        assert!(a03.allows("NK1"));
        assert!(!a03.allows("RXE"));
        assert!(!a03.allows("OBR"));
        assert!(a03.required.contains("PID"));

        let known = expected_segments("ORU^R01");
        assert!(known.required.contains("OBR"));
        assert!(!known.allows("RXE"));

        let unknown = expected_segments("QBP^Q11");
        assert_eq!(unknown.required, BTreeSet::from(["MSH"]));
        assert!(unknown.allows("MSA"));
        assert!(unknown.allows("RXE"));
        assert!(!unknown.allows("QPD"));
        assert_eq!(message_family("ADT^A03"), "ADT");
        assert_eq!(message_family("ACK"), "ACK");
    }

    #[test]
    fn test_names() {
        assert_eq!(field_name("PID", 5), "Patient Name");
        assert_eq!(field_name("ZPD", 2), "ZPD.2");
        assert_eq!(component_name("PID", 5, 1), "Family Name");
        assert_eq!(component_name("PID", 5, 9), "PID.5.9");
    }

    #[test]
    fn test_timestamp_format() {
        assert!(TIMESTAMP.is_match("20240101120000"));
        assert!(TIMESTAMP.is_match("202401011200-0500"));
        assert!(TIMESTAMP.is_match("19800101"));
        assert!(!TIMESTAMP.is_match("2024-01-01"));
        assert!(!TIMESTAMP.is_match("01/01/2024"));
        assert_eq!(timestamp_precision("20240101"), 8);
    }
}
