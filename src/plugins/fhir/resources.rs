//! Resource property tables and format rules

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Known top-level properties per resource type, in definition order.
///
/// The 1-based position in a table is the field index reported for the
/// property.
static PROPERTIES: &[(&str, &[&str])] = &[
    (
        "Patient",
        &[
            "id",
            "meta",
            "text",
            "extension",
            "identifier",
            "active",
            "name",
            "telecom",
            "gender",
            "birthDate",
            "deceasedBoolean",
            "deceasedDateTime",
            "address",
            "maritalStatus",
            "multipleBirthBoolean",
            "multipleBirthInteger",
            "photo",
            "contact",
            "communication",
            "generalPractitioner",
            "managingOrganization",
            "link",
        ],
    ),
    (
        "Observation",
        &[
            "id",
            "meta",
            "text",
            "extension",
            "identifier",
            "basedOn",
            "status",
            "category",
            "code",
            "subject",
            "encounter",
            "effectiveDateTime",
            "effectivePeriod",
            "issued",
            "performer",
            "valueQuantity",
            "valueCodeableConcept",
            "valueString",
            "valueBoolean",
            "valueInteger",
            "dataAbsentReason",
            "interpretation",
            "note",
            "bodySite",
            "method",
            "specimen",
            "referenceRange",
            "hasMember",
            "component",
        ],
    ),
    (
        "Encounter",
        &[
            "id",
            "meta",
            "text",
            "extension",
            "identifier",
            "status",
            "class",
            "type",
            "serviceType",
            "priority",
            "subject",
            "participant",
            "period",
            "reasonCode",
            "diagnosis",
            "hospitalization",
            "location",
            "serviceProvider",
        ],
    ),
    (
        "MedicationRequest",
        &[
            "id",
            "meta",
            "text",
            "extension",
            "identifier",
            "status",
            "intent",
            "category",
            "priority",
            "medicationCodeableConcept",
            "medicationReference",
            "subject",
            "encounter",
            "authoredOn",
            "requester",
            "reasonCode",
            "note",
            "dosageInstruction",
            "dispenseRequest",
            "substitution",
        ],
    ),
    (
        "Practitioner",
        &[
            "id",
            "meta",
            "text",
            "extension",
            "identifier",
            "active",
            "name",
            "telecom",
            "address",
            "gender",
            "birthDate",
            "qualification",
        ],
    ),
    (
        "Bundle",
        &["id", "meta", "identifier", "type", "timestamp", "total", "link", "entry"],
    ),
];

/// Property table for a resource type, if known
pub fn properties(resource_type: &str) -> Option<&'static [&'static str]> {
    PROPERTIES
        .iter()
        .find(|(name, _)| *name == resource_type)
        .map(|(_, properties)| *properties)
}

/// 1-based index of a known property
pub fn property_index(resource_type: &str, property: &str) -> Option<usize> {
    properties(resource_type)?
        .iter()
        .position(|p| *p == property)
        .map(|i| i + 1)
}

/// Property at a known 1-based index
pub fn property_at(resource_type: &str, index: usize) -> Option<&'static str> {
    properties(resource_type)?.get(index.checked_sub(1)?).copied()
}

/// Properties that must be present
pub static REQUIRED: &[(&str, &str)] = &[
    ("Observation", "status"),
    ("Observation", "code"),
    ("Encounter", "status"),
    ("Encounter", "class"),
    ("MedicationRequest", "status"),
    ("MedicationRequest", "intent"),
    ("MedicationRequest", "subject"),
    ("Bundle", "type"),
];

/// Format rule applied to a scalar property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Date,
    DateTime,
    Instant,
    Code(&'static [&'static str]),
}

pub static FORMATTED: &[(&str, &str, Format)] = &[
    ("Patient", "birthDate", Format::Date),
    ("Patient", "gender", Format::Code(GENDER)),
    ("Practitioner", "birthDate", Format::Date),
    ("Practitioner", "gender", Format::Code(GENDER)),
    ("Observation", "effectiveDateTime", Format::DateTime),
    ("Observation", "issued", Format::Instant),
    (
        "Observation",
        "status",
        Format::Code(&[
            "registered",
            "preliminary",
            "final",
            "amended",
            "corrected",
            "cancelled",
            "entered-in-error",
            "unknown",
        ]),
    ),
    ("MedicationRequest", "authoredOn", Format::DateTime),
    ("Bundle", "timestamp", Format::Instant),
];

static GENDER: &[&str] = &["male", "female", "other", "unknown"];

static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}(-(0[1-9]|1[0-2])(-(0[1-9]|[12]\d|3[01]))?)?$").unwrap());

static DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\d{4}(-(0[1-9]|1[0-2])(-(0[1-9]|[12]\d|3[01])(T([01]\d|2[0-3]):[0-5]\d:([0-5]\d|60)(\.\d+)?(Z|[+-]((0\d|1[0-3]):[0-5]\d|14:00)))?)?)?$",
    )
    .unwrap()
});

static INSTANT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\d{4}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])T([01]\d|2[0-3]):[0-5]\d:([0-5]\d|60)(\.\d+)?(Z|[+-]((0\d|1[0-3]):[0-5]\d|14:00))$",
    )
    .unwrap()
});

impl Format {
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Format::Date => DATE.is_match(value),
            Format::DateTime => DATE_TIME.is_match(value),
            Format::Instant => INSTANT.is_match(value),
            Format::Code(codes) => codes.contains(&value),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Format::Date => "YYYY[-MM[-DD]] date".to_string(),
            Format::DateTime => "FHIR dateTime".to_string(),
            Format::Instant => "FHIR instant".to_string(),
            Format::Code(codes) => format!("one of {}", codes.join(", ")),
        }
    }
}

/// A resource value is populated unless null, `""`, `[]` or `{}`
pub fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Histogram key for a property value: scalars as text, composites as
/// compact JSON
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resources carried by a parsed document: the root plus, for bundles,
/// every `entry[].resource`
pub fn resources(root: &Map<String, Value>) -> Vec<&Map<String, Value>> {
    let mut found = vec![root];
    if root.get("resourceType").and_then(Value::as_str) == Some("Bundle")
        && let Some(entries) = root.get("entry").and_then(Value::as_array)
    {
        found.extend(
            entries
                .iter()
                .filter_map(|e| e.get("resource"))
                .filter_map(Value::as_object)
                .filter(|r| r.get("resourceType").and_then(Value::as_str).is_some()),
        );
    }
    found
}

pub fn resource_type(resource: &Map<String, Value>) -> &str {
    resource
        .get("resourceType")
        .and_then(Value::as_str)
        .unwrap_or_default()
}
