//! FHIR R4 JSON plugin
//!
//! Treats each resource as a "segment" keyed by its `resourceType` and each
//! top-level property as a field. Bundles contribute their entry resources.
//! Known properties keep their definition order as field index; properties
//! outside the tables are numbered after them in name order.

mod resources;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use crate::cancel::CancellationToken;
use crate::config::InferenceOptions;
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::models::{
    DeviationType, FieldPatterns, FormatDeviation, Severity, VendorConfiguration,
    VendorDetectionPattern, VendorMatch, population_rate,
};
use crate::plugin::{
    FieldAnalysis, FieldPathMapping, FormatAnalysis, StandardPlugin, VendorDetection,
    WrappedSegments,
};
use crate::repository::default_patterns;

use resources::{
    FORMATTED, REQUIRED, is_populated, properties, property_at, property_index, resource_type,
    value_text,
};

/// Default standard label
pub const FHIR_R4: &str = "FHIR R4";

const BOM: char = '\u{feff}';

static NULL: Value = Value::Null;

static FIELD_PATHS: &[(&str, &str)] = &[
    ("patient.id", "Patient.identifier.value"),
    ("patient.mrn", "Patient.identifier.value"),
    ("patient.lastname", "Patient.name.family"),
    ("patient.firstname", "Patient.name.given"),
    ("patient.birthdate", "Patient.birthDate"),
    ("patient.sex", "Patient.gender"),
    ("patient.gender", "Patient.gender"),
    ("patient.address", "Patient.address"),
    ("patient.phone", "Patient.telecom.value"),
    ("message.type", "resourceType"),
    ("message.timestamp", "meta.lastUpdated"),
    ("sending.application", "meta.source"),
    ("visit.class", "Encounter.class"),
    ("visit.location", "Encounter.location.location"),
    ("observation.id", "Observation.code.coding.code"),
    ("observation.value", "Observation.valueQuantity.value"),
    ("observation.units", "Observation.valueQuantity.unit"),
    ("observation.status", "Observation.status"),
    ("medication.code", "MedicationRequest.medicationCodeableConcept.coding.code"),
];

type Resource = Map<String, Value>;

fn parse_document(raw: &str) -> IntelligenceResult<Resource> {
    let value: Value = serde_json::from_str(raw.trim_start_matches(BOM).trim())
        .map_err(|e| IntelligenceError::validation(format!("Invalid JSON: {e}")))?;
    match value {
        Value::Object(map) if map.get("resourceType").and_then(Value::as_str).is_some() => Ok(map),
        _ => Err(IntelligenceError::validation(
            "Document is not a FHIR resource (no resourceType)",
        )),
    }
}

fn parse_corpus(messages: &[String]) -> IntelligenceResult<Vec<Resource>> {
    if messages.is_empty() {
        return Err(IntelligenceError::validation("No messages provided"));
    }
    let parsed: Vec<Resource> = messages
        .iter()
        .enumerate()
        .filter_map(|(index, raw)| match parse_document(raw) {
            Ok(document) => Some(document),
            Err(e) => {
                warn!(message = index, error = %e, "Skipping unparseable document");
                None
            }
        })
        .collect();
    if parsed.is_empty() {
        return Err(IntelligenceError::analysis(
            "parsing",
            format!("none of {} documents could be parsed", messages.len()),
        ));
    }
    Ok(parsed)
}

/// Objects inside a property value; each array element is one repetition
fn composite_parts(value: &Value) -> Vec<&Resource> {
    match value {
        Value::Object(map) => vec![map],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

/// Field index of every property observed for one resource type
fn field_indices(resource: &str, observed: &BTreeSet<String>) -> BTreeMap<String, usize> {
    let known = properties(resource).map_or(0, <[&str]>::len);
    let mut extra = 0;
    observed
        .iter()
        .map(|property| {
            let index = property_index(resource, property).unwrap_or_else(|| {
                extra += 1;
                known + extra
            });
            (property.clone(), index)
        })
        .collect()
}

fn count_fields(
    documents: &[Resource],
    standard: &str,
    message_type: &str,
    options: &InferenceOptions,
    cancel: &CancellationToken,
) -> IntelligenceResult<FieldPatterns> {
    // resource type -> observed properties; (type, property) -> component keys
    let mut observed: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    let mut component_keys: BTreeMap<(&str, &str), BTreeSet<&str>> = BTreeMap::new();

    for document in documents {
        for resource in resources::resources(document) {
            let kind = resource_type(resource);
            let seen = observed.entry(kind).or_default();
            for (property, value) in resource {
                if property == "resourceType" {
                    continue;
                }
                seen.insert(property.clone());
                if options.include_component_patterns {
                    for part in composite_parts(value) {
                        component_keys
                            .entry((kind, property.as_str()))
                            .or_default()
                            .extend(part.keys().map(String::as_str));
                    }
                }
            }
        }
    }

    let indices: BTreeMap<&str, BTreeMap<String, usize>> = observed
        .iter()
        .map(|(kind, properties)| (*kind, field_indices(kind, properties)))
        .collect();

    let mut patterns = FieldPatterns::new(standard, message_type);
    patterns.sample_size = documents.len();

    for document in documents {
        cancel.check()?;
        for resource in resources::resources(document) {
            let kind = resource_type(resource);
            let Some(fields) = indices.get(kind) else {
                continue;
            };
            let pattern = patterns.segment_mut(kind);
            pattern.sample_size += 1;

            for (property, index) in fields {
                let value = resource.get(property).unwrap_or(&NULL);
                let field = pattern.field_mut(*index, property);
                field.record(&if is_populated(value) {
                    value_text(value)
                } else {
                    String::new()
                });

                let Some(keys) = component_keys.get(&(kind, property.as_str())) else {
                    continue;
                };
                let parts = composite_parts(value);
                let repetitions: Vec<Option<&Resource>> = if parts.is_empty() {
                    vec![None]
                } else {
                    parts.into_iter().map(Some).collect()
                };
                for part in repetitions {
                    for (position, key) in keys.iter().enumerate() {
                        let text = part
                            .and_then(|p| p.get(*key))
                            .filter(|v| is_populated(v))
                            .map(value_text)
                            .unwrap_or_default();
                        field.record_component(position + 1, key, &text);
                    }
                }
            }
        }
    }

    Ok(patterns)
}

fn encoding_deviations(messages: &[String]) -> Vec<FormatDeviation> {
    let total = messages.len();
    let invalid = messages
        .iter()
        .filter(|raw| parse_document(raw).is_err())
        .count();
    let with_bom = messages
        .iter()
        .filter(|raw| raw.starts_with(BOM))
        .count();

    let mut deviations = Vec::new();
    if invalid > 0 {
        deviations.push(FormatDeviation::new(
            DeviationType::EncodingVariation,
            "document",
            "Documents that are not valid FHIR JSON",
            Severity::Error,
            population_rate(invalid, total),
        ));
    }
    if with_bom > 0 {
        deviations.push(FormatDeviation::new(
            DeviationType::EncodingVariation,
            "BOM",
            "Documents prefixed with a byte order mark",
            Severity::Info,
            population_rate(with_bom, total),
        ));
    }
    deviations
}

fn structural_deviations(documents: &[Resource], message_type: Option<&str>) -> Vec<FormatDeviation> {
    let total = documents.len();
    let mismatched = message_type.map_or(0, |expected| {
        documents
            .iter()
            .filter(|d| resource_type(d) != expected)
            .count()
    });

    let mut instances: BTreeMap<&str, usize> = BTreeMap::new();
    let mut unknown: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    let mut extended: BTreeMap<&str, usize> = BTreeMap::new();

    for document in documents {
        for resource in resources::resources(document) {
            let kind = resource_type(resource);
            let Some(known) = properties(kind) else {
                continue;
            };
            *instances.entry(kind).or_insert(0) += 1;
            for property in resource.keys() {
                if property == "resourceType"
                    || property.starts_with('_')
                    || property == "modifierExtension"
                    || known.contains(&property.as_str())
                {
                    continue;
                }
                *unknown.entry((kind, property.as_str())).or_insert(0) += 1;
            }
            let has_extensions = ["extension", "modifierExtension"]
                .iter()
                .any(|p| resource.get(*p).is_some_and(is_populated));
            if has_extensions {
                *extended.entry(kind).or_insert(0) += 1;
            }
        }
    }

    let mut deviations = Vec::new();
    if mismatched > 0 {
        deviations.push(FormatDeviation::new(
            DeviationType::StructuralDeviation,
            "resourceType",
            format!(
                "resourceType differs from expected '{}'",
                message_type.unwrap_or_default()
            ),
            Severity::Warning,
            population_rate(mismatched, total),
        ));
    }
    for (kind, count) in extended {
        deviations.push(FormatDeviation::new(
            DeviationType::StructuralDeviation,
            format!("{kind}.extension"),
            format!("{kind} carries vendor extensions"),
            Severity::Info,
            population_rate(count, instances.get(kind).copied().unwrap_or(count)),
        ));
    }
    for ((kind, property), count) in unknown {
        deviations.push(FormatDeviation::new(
            DeviationType::StructuralDeviation,
            format!("{kind}.{property}"),
            format!("Property '{property}' is not defined for {kind}"),
            Severity::Warning,
            population_rate(count, instances.get(kind).copied().unwrap_or(count)),
        ));
    }
    deviations
}

fn field_format_deviations(documents: &[Resource], segment_type: &str) -> Vec<FormatDeviation> {
    let instances: Vec<&Resource> = documents
        .iter()
        .flat_map(resources::resources)
        .filter(|r| resource_type(r) == segment_type)
        .collect();
    if instances.is_empty() {
        return Vec::new();
    }

    let mut deviations = Vec::new();
    for (kind, property, format) in FORMATTED {
        if *kind != segment_type {
            continue;
        }
        let values: Vec<&Value> = instances
            .iter()
            .filter_map(|r| r.get(*property))
            .filter(|v| is_populated(v))
            .collect();
        let malformed = values
            .iter()
            .filter(|v| !v.as_str().is_some_and(|s| format.accepts(s)))
            .count();
        if malformed > 0 {
            deviations.push(FormatDeviation::new(
                DeviationType::FieldFormatDeviation,
                format!("{kind}.{property}"),
                format!("{malformed} values are not {}", format.describe()),
                Severity::Warning,
                population_rate(malformed, values.len()),
            ));
        }
    }

    for (kind, property) in REQUIRED {
        if *kind != segment_type {
            continue;
        }
        let missing = instances
            .iter()
            .filter(|r| !r.get(*property).is_some_and(is_populated))
            .count();
        if missing > 0 {
            deviations.push(FormatDeviation::new(
                DeviationType::MissingRequiredField,
                format!("{kind}.{property}"),
                format!("{kind}.{property} is required but missing"),
                Severity::Error,
                population_rate(missing, instances.len()),
            ));
        }
    }
    deviations
}

/// First non-empty string at `pointer` below property `key`, searching the
/// document's resources in order
fn first_string<'a>(resources: &[&'a Resource], key: &str, pointer: &str) -> Option<&'a str> {
    resources.iter().find_map(|resource| {
        resource
            .get(key)?
            .pointer(pointer)?
            .as_str()
            .filter(|s| !s.is_empty())
    })
}

/// FHIR R4 JSON plugin
#[derive(Debug, Clone)]
pub struct FhirJsonPlugin {
    standard: String,
    priority: i32,
    patterns: Vec<VendorDetectionPattern>,
    baselines: Vec<VendorConfiguration>,
}

impl Default for FhirJsonPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl FhirJsonPlugin {
    pub fn new() -> Self {
        let patterns = default_patterns()
            .into_iter()
            .filter(|p| p.supports_standard(FHIR_R4))
            .collect();
        Self {
            standard: FHIR_R4.to_string(),
            priority: 0,
            patterns,
            baselines: Vec::new(),
        }
    }

    pub fn with_standard(mut self, standard: impl Into<String>) -> Self {
        self.standard = standard.into();
        self
    }

    pub fn with_patterns(mut self, patterns: Vec<VendorDetectionPattern>) -> Self {
        self.patterns = patterns
            .into_iter()
            .filter(|p| p.supports_standard(&self.standard))
            .collect();
        self
    }

    pub fn with_baselines(mut self, baselines: Vec<VendorConfiguration>) -> Self {
        self.baselines = baselines;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl StandardPlugin for FhirJsonPlugin {
    fn standard(&self) -> &str {
        &self.standard
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_analyze(&self, message: &str) -> bool {
        message.trim_start_matches(BOM).trim_start().starts_with('{')
            && parse_document(message).is_ok()
    }

    fn message_type(&self, message: &str) -> Option<String> {
        parse_document(message)
            .ok()
            .map(|document| resource_type(&document).to_string())
    }

    fn field_analysis(&self) -> Option<&dyn FieldAnalysis> {
        Some(self)
    }

    fn format_analysis(&self) -> Option<&dyn FormatAnalysis> {
        Some(self)
    }

    fn vendor_detection(&self) -> Option<&dyn VendorDetection> {
        Some(self)
    }

    fn field_paths(&self) -> Option<&dyn FieldPathMapping> {
        Some(self)
    }
}

#[async_trait]
impl FieldAnalysis for FhirJsonPlugin {
    #[instrument(skip_all, fields(standard = %self.standard, messages = messages.len()))]
    async fn analyze_field_patterns(
        &self,
        messages: &[String],
        message_type: &str,
        options: &InferenceOptions,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<FieldPatterns> {
        cancel.check()?;
        let documents = parse_corpus(messages)?;
        let patterns = count_fields(&documents, &self.standard, message_type, options, cancel)?;
        debug!(
            resources = patterns.segment_patterns.len(),
            fields = patterns.field_count(),
            "Counted property population"
        );
        Ok(patterns)
    }

    fn wrap_segments(
        &self,
        segments: &[String],
        _message_type: &str,
    ) -> IntelligenceResult<WrappedSegments> {
        let mut wrapped = WrappedSegments::default();
        for (index, segment) in segments.iter().enumerate() {
            let resource = parse_document(segment).map_err(|e| {
                IntelligenceError::validation(format!("Resource {index}: {e}"))
            })?;
            wrapped
                .segment_ids
                .insert(resource_type(&resource).to_string());
            let bundle = json!({
                "resourceType": "Bundle",
                "type": "collection",
                "entry": [{ "resource": Value::Object(resource) }],
            });
            wrapped.messages.push(bundle.to_string());
        }
        Ok(wrapped)
    }

    fn wrap_field_values(
        &self,
        segment_id: &str,
        field_index: usize,
        values: &[String],
        message_type: &str,
    ) -> IntelligenceResult<WrappedSegments> {
        let property = property_at(segment_id, field_index).ok_or_else(|| {
            IntelligenceError::validation(format!(
                "No known property at position {field_index} of {segment_id}"
            ))
        })?;
        let resources: Vec<String> = values
            .iter()
            .map(|value| {
                let value = if value.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.clone()))
                };
                let mut resource = Map::new();
                resource.insert("resourceType".to_string(), Value::from(segment_id));
                resource.insert(property.to_string(), value);
                Value::Object(resource).to_string()
            })
            .collect();
        self.wrap_segments(&resources, message_type)
    }
}

#[async_trait]
impl FormatAnalysis for FhirJsonPlugin {
    async fn detect_encoding_deviations(
        &self,
        messages: &[String],
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        cancel.check()?;
        if messages.is_empty() {
            return Err(IntelligenceError::validation("No messages provided"));
        }
        Ok(encoding_deviations(messages))
    }

    async fn detect_structural_deviations(
        &self,
        messages: &[String],
        message_type: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        cancel.check()?;
        let documents = parse_corpus(messages)?;
        let message_type = Some(message_type).filter(|t| !t.is_empty());
        Ok(structural_deviations(&documents, message_type))
    }

    async fn detect_field_format_deviations(
        &self,
        messages: &[String],
        segment_type: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        cancel.check()?;
        let documents = parse_corpus(messages)?;
        Ok(field_format_deviations(&documents, segment_type))
    }

    #[instrument(skip_all, fields(standard = %self.standard, messages = messages.len()))]
    async fn detect_all_deviations(
        &self,
        messages: &[String],
        message_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        cancel.check()?;
        let mut deviations = encoding_deviations(messages);
        let documents = parse_corpus(messages)?;
        deviations.extend(structural_deviations(&documents, message_type));

        let kinds: BTreeSet<&str> = documents
            .iter()
            .flat_map(resources::resources)
            .map(resource_type)
            .collect();
        for kind in kinds {
            cancel.check()?;
            for deviation in field_format_deviations(&documents, kind) {
                if !deviations.iter().any(|d| d.key() == deviation.key()) {
                    deviations.push(deviation);
                }
            }
        }
        Ok(deviations)
    }
}

#[async_trait]
impl VendorDetection for FhirJsonPlugin {
    async fn detect_vendor_candidates(
        &self,
        message: &str,
        baselines: &[VendorConfiguration],
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<VendorMatch>> {
        cancel.check()?;
        let document = parse_document(message)?;
        let carried = resources::resources(&document);
        let source = first_string(&carried, "meta", "/source").unwrap_or_default();
        let system = first_string(&carried, "identifier", "/0/system").unwrap_or_default();

        let candidate = |vendor: &str, confidence: f64, method: &str| {
            let mut found = VendorMatch::new(vendor, confidence, method);
            found.standard = self.standard.clone();
            found.sending_application = Some(source.to_string()).filter(|s| !s.is_empty());
            found.sending_facility = Some(system.to_string()).filter(|s| !s.is_empty());
            found
        };

        let mut candidates = Vec::new();
        for pattern in &self.patterns {
            if let Some(confidence) = pattern.score(source, system) {
                let mut found = candidate(&pattern.vendor_name, confidence, "meta-source-pattern");
                found.pattern_id = Some(pattern.id.clone());
                candidates.push(found);
            }
        }
        if !source.is_empty() {
            for baseline in baselines {
                let matches = baseline
                    .signature
                    .sending_application
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(source));
                if matches {
                    let mut found = candidate(
                        &baseline.signature.name,
                        baseline.signature.confidence,
                        "baseline-signature",
                    );
                    found.deviations = baseline.format_deviations.clone();
                    candidates.push(found);
                }
            }
        }
        Ok(candidates)
    }

    async fn baseline_vendor_configurations(
        &self,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<VendorConfiguration>> {
        cancel.check()?;
        Ok(self.baselines.clone())
    }
}

impl FieldPathMapping for FhirJsonPlugin {
    fn resolve_field_path(&self, semantic_name: &str) -> Option<String> {
        let semantic_name = semantic_name.to_ascii_lowercase();
        FIELD_PATHS
            .iter()
            .find(|(name, _)| *name == semantic_name)
            .map(|(_, path)| path.to_string())
    }

    fn semantic_names(&self) -> Vec<String> {
        FIELD_PATHS.iter().map(|(name, _)| name.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(id: &str, gender: &str, birth_date: &str) -> String {
        json!({
            "resourceType": "Patient",
            "id": id,
            "meta": { "source": "https://fhir.epic.com/interconnect" },
            "name": [{ "family": "Doe", "given": ["Jane"] }],
            "gender": gender,
            "birthDate": birth_date,
        })
        .to_string()
    }

    #[test]
    fn test_can_analyze() {
        let plugin = FhirJsonPlugin::new();
        assert!(plugin.can_analyze(&patient("1", "female", "1980-01-01")));
        assert!(!plugin.can_analyze("{\"id\": 1}"));
        assert!(!plugin.can_analyze("MSH|^~\\&|"));
        assert_eq!(
            plugin.message_type(&patient("1", "female", "1980")).as_deref(),
            Some("Patient")
        );
    }

    #[tokio::test]
    async fn test_property_counts() {
        let plugin = FhirJsonPlugin::new();
        let messages = vec![
            patient("1", "female", "1980-01-01"),
            json!({ "resourceType": "Patient", "id": "2", "custom": "x" }).to_string(),
        ];
        let patterns = plugin
            .analyze_field_patterns(
                &messages,
                "Patient",
                &InferenceOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let gender = patterns.field("Patient.9").unwrap();
        assert_eq!(gender.field_name, "gender");
        assert_eq!((gender.populated_count, gender.total_count), (1, 2));

        let known = properties("Patient").unwrap().len();
        let custom = patterns.segment("Patient").unwrap().field(known + 1).unwrap();
        assert_eq!(custom.field_name, "custom");

        let name = patterns.field("Patient.7").unwrap();
        let family = name
            .component_patterns
            .values()
            .find(|c| c.component_name == "family")
            .unwrap();
        assert_eq!((family.populated_count, family.total_count), (1, 2));
    }

    #[tokio::test]
    async fn test_deviations() {
        let plugin = FhirJsonPlugin::new();
        let cancel = CancellationToken::new();
        let messages = vec![
            patient("1", "F", "01/01/1980"),
            patient("2", "female", "1980-01-01"),
            json!({ "resourceType": "Observation", "status": "final", "shoeSize": 9 }).to_string(),
            "not json".to_string(),
        ];
        let deviations = plugin
            .detect_all_deviations(&messages, Some("Patient"), &cancel)
            .await
            .unwrap();
        let find = |location: &str| deviations.iter().find(|d| d.location == location).unwrap();

        assert_eq!(find("document").severity, Severity::Error);
        assert_eq!(find("resourceType").severity, Severity::Warning);
        assert_eq!(find("Patient.gender").frequency, 0.5);
        assert_eq!(find("Patient.birthDate").deviation_type, DeviationType::FieldFormatDeviation);
        assert_eq!(find("Observation.shoeSize").severity, Severity::Warning);
        assert_eq!(find("Observation.code").deviation_type, DeviationType::MissingRequiredField);
    }

    #[tokio::test]
    async fn test_vendor_from_meta_source() {
        let plugin = FhirJsonPlugin::new();
        let candidates = plugin
            .detect_vendor_candidates(
                &patient("1", "female", "1980"),
                &[],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].vendor_name, "Epic");
        assert!((candidates[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(candidates[0].standard, FHIR_R4);
    }

    #[test]
    fn test_wrap_field_values() {
        let plugin = FhirJsonPlugin::new();
        let values = vec!["female".to_string(), String::new()];
        let wrapped = plugin.wrap_field_values("Patient", 9, &values, "Patient").unwrap();
        assert_eq!(wrapped.messages.len(), 2);
        assert!(wrapped.segment_ids.contains("Patient"));
        assert!(wrapped.messages[0].contains("\"gender\":\"female\""));
        assert!(plugin.wrap_field_values("Patient", 999, &values, "Patient").is_err());
    }

    #[test]
    fn test_field_paths() {
        let plugin = FhirJsonPlugin::new();
        assert_eq!(
            plugin.resolve_field_path("patient.lastname").as_deref(),
            Some("Patient.name.family")
        );
        assert!(plugin.resolve_field_path("patient.shoe_size").is_none());
    }
}
