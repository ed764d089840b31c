//! HL7 v2.x plugin
//!
//! Parses pipe-delimited messages with the delimiters each message declares
//! in MSH-1/MSH-2, counts field population per segment type, flags
//! deviations from the v2.3 reference structures and fingerprints vendors
//! from MSH-3/MSH-4.

mod analysis;
mod message;
mod structure;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::cancel::CancellationToken;
use crate::config::InferenceOptions;
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::models::{FieldPatterns, FormatDeviation, VendorConfiguration, VendorDetectionPattern, VendorMatch};
use crate::plugin::{
    FieldAnalysis, FieldPathMapping, FormatAnalysis, StandardPlugin, VendorDetection,
    WrappedSegments,
};
use crate::repository::default_patterns;

pub use message::{Delimiters, LineTerminator, ParsedMessage, Segment, STANDARD_ENCODING};
pub use structure::{MessageStructure, structure};

/// Default standard label
pub const HL7V23: &str = "HL7v23";

/// Placeholder header used when wrapping isolated segments
const WRAPPER_HEADER: &str = "MSH|^~\\&|PIDGEON|PIDGEON|PIDGEON|PIDGEON|20000101000000||";

static FIELD_PATHS: &[(&str, &str)] = &[
    ("patient.id", "PID.3.1"),
    ("patient.mrn", "PID.3.1"),
    ("patient.lastname", "PID.5.1"),
    ("patient.firstname", "PID.5.2"),
    ("patient.middlename", "PID.5.3"),
    ("patient.birthdate", "PID.7"),
    ("patient.sex", "PID.8"),
    ("patient.gender", "PID.8"),
    ("patient.address", "PID.11"),
    ("patient.phone", "PID.13"),
    ("patient.account", "PID.18"),
    ("patient.ssn", "PID.19"),
    ("message.type", "MSH.9"),
    ("message.controlid", "MSH.10"),
    ("message.timestamp", "MSH.7"),
    ("message.version", "MSH.12"),
    ("sending.application", "MSH.3"),
    ("sending.facility", "MSH.4"),
    ("receiving.application", "MSH.5"),
    ("receiving.facility", "MSH.6"),
    ("visit.class", "PV1.2"),
    ("visit.location", "PV1.3"),
    ("visit.attending", "PV1.7"),
    ("order.placer", "ORC.2"),
    ("order.filler", "ORC.3"),
    ("observation.id", "OBX.3.1"),
    ("observation.value", "OBX.5"),
    ("observation.units", "OBX.6"),
    ("observation.status", "OBX.11"),
    ("medication.code", "RXE.2.1"),
];

/// HL7 v2.x standard plugin
#[derive(Debug, Clone)]
pub struct Hl7v2Plugin {
    standard: String,
    priority: i32,
    patterns: Vec<VendorDetectionPattern>,
    baselines: Vec<VendorConfiguration>,
}

impl Default for Hl7v2Plugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Hl7v2Plugin {
    /// Plugin for `HL7v23` with the built-in vendor patterns
    pub fn new() -> Self {
        let patterns = default_patterns()
            .into_iter()
            .filter(|p| p.supports_standard(HL7V23))
            .collect();
        Self {
            standard: HL7V23.to_string(),
            priority: 0,
            patterns,
            baselines: Vec::new(),
        }
    }

    /// Register under a different label, e.g. `HL7v251`
    pub fn with_standard(mut self, standard: impl Into<String>) -> Self {
        self.standard = standard.into();
        self
    }

    /// Replace the vendor detection patterns, keeping those for this standard
    pub fn with_patterns(mut self, patterns: Vec<VendorDetectionPattern>) -> Self {
        self.patterns = patterns
            .into_iter()
            .filter(|p| p.supports_standard(&self.standard))
            .collect();
        self
    }

    /// Known vendor configurations matched by exact sending application
    pub fn with_baselines(mut self, baselines: Vec<VendorConfiguration>) -> Self {
        self.baselines = baselines;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn patterns(&self) -> &[VendorDetectionPattern] {
        &self.patterns
    }

    fn wrapper(message_type: &str, index: usize, body: &str) -> String {
        format!("{WRAPPER_HEADER}{message_type}|WRAP{index}|P|2.3\r{body}")
    }
}

impl StandardPlugin for Hl7v2Plugin {
    fn standard(&self) -> &str {
        &self.standard
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_analyze(&self, message: &str) -> bool {
        let message = message.trim_start_matches('\u{feff}').trim_start();
        message.starts_with("MSH")
            && message
                .chars()
                .nth(3)
                .is_some_and(|c| !c.is_ascii_alphanumeric() && !c.is_whitespace())
    }

    fn message_type(&self, message: &str) -> Option<String> {
        ParsedMessage::parse(message).ok()?.message_type()
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
impl FieldAnalysis for Hl7v2Plugin {
    #[instrument(skip_all, fields(standard = %self.standard, messages = messages.len()))]
    async fn analyze_field_patterns(
        &self,
        messages: &[String],
        message_type: &str,
        options: &InferenceOptions,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<FieldPatterns> {
        cancel.check()?;
        let parsed = analysis::require_parsed(messages)?;
        let patterns =
            analysis::count_fields(&parsed, &self.standard, message_type, options, cancel)?;
        debug!(
            segments = patterns.segment_patterns.len(),
            fields = patterns.field_count(),
            "Counted field population"
        );
        Ok(patterns)
    }

    fn wrap_segments(
        &self,
        segments: &[String],
        message_type: &str,
    ) -> IntelligenceResult<WrappedSegments> {
        let mut wrapped = WrappedSegments::default();
        for (index, segment) in segments.iter().enumerate() {
            let segment = segment.trim();
            let id = segment.split('|').next().unwrap_or_default();
            if id.is_empty() {
                return Err(IntelligenceError::validation(format!(
                    "Segment {index} has no segment id"
                )));
            }
            let message = if id == "MSH" {
                segment.to_string()
            } else {
                Self::wrapper(message_type, index, segment)
            };
            wrapped.segment_ids.insert(id.to_string());
            wrapped.messages.push(message);
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
        if field_index == 0 {
            return Err(IntelligenceError::validation("Field positions start at 1"));
        }
        if segment_id == "MSH" && field_index <= 2 {
            return Err(IntelligenceError::validation(
                "MSH-1 and MSH-2 hold delimiters and cannot be wrapped",
            ));
        }

        let segments: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                if segment_id == "MSH" {
                    // MSH-1 is the separator itself, so MSH.n sits after n-1 pipes
                    let header = format!("{WRAPPER_HEADER}{message_type}|WRAP{index}|P|2.3");
                    let mut fields: Vec<String> = header.split('|').map(str::to_string).collect();
                    if fields.len() < field_index {
                        fields.resize(field_index, String::new());
                    }
                    fields[field_index - 1] = value.clone();
                    fields.join("|")
                } else {
                    format!("{segment_id}{}{value}", "|".repeat(field_index))
                }
            })
            .collect();
        self.wrap_segments(&segments, message_type)
    }
}

#[async_trait]
impl FormatAnalysis for Hl7v2Plugin {
    async fn detect_encoding_deviations(
        &self,
        messages: &[String],
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        cancel.check()?;
        let parsed = analysis::require_parsed(messages)?;
        Ok(analysis::encoding_deviations(&parsed))
    }

    async fn detect_structural_deviations(
        &self,
        messages: &[String],
        message_type: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        cancel.check()?;
        let parsed = analysis::require_parsed(messages)?;
        let message_type = Some(message_type).filter(|t| !t.is_empty());
        Ok(analysis::structural_deviations(&parsed, message_type))
    }

    async fn detect_field_format_deviations(
        &self,
        messages: &[String],
        segment_type: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        cancel.check()?;
        let parsed = analysis::require_parsed(messages)?;
        Ok(analysis::field_format_deviations(&parsed, segment_type))
    }

    #[instrument(skip_all, fields(standard = %self.standard, messages = messages.len()))]
    async fn detect_all_deviations(
        &self,
        messages: &[String],
        message_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        cancel.check()?;
        let parsed = analysis::require_parsed(messages)?;
        analysis::all_deviations(&parsed, message_type, cancel)
    }
}

#[async_trait]
impl VendorDetection for Hl7v2Plugin {
    async fn detect_vendor_candidates(
        &self,
        message: &str,
        baselines: &[VendorConfiguration],
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<VendorMatch>> {
        cancel.check()?;
        let parsed = ParsedMessage::parse(message)?;
        let application = parsed.sending_application().unwrap_or_default();
        let facility = parsed.sending_facility().unwrap_or_default();
        let version = parsed.version().map(str::to_string);

        let candidate = |vendor: &str, confidence: f64, method: &str| {
            let mut found = VendorMatch::new(vendor, confidence, method);
            found.standard = self.standard.clone();
            found.version = version.clone();
            found.sending_application = Some(application.to_string()).filter(|a| !a.is_empty());
            found.sending_facility = Some(facility.to_string()).filter(|f| !f.is_empty());
            found
        };

        let mut candidates = Vec::new();
        for pattern in &self.patterns {
            if let Some(confidence) = pattern.score(application, facility) {
                let mut found = candidate(&pattern.vendor_name, confidence, "application-pattern");
                found.pattern_id = Some(pattern.id.clone());
                found.deviations = pattern.common_deviations.clone();
                candidates.push(found);
            }
        }

        if !application.is_empty() {
            for baseline in baselines {
                let matches = baseline
                    .signature
                    .sending_application
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(application));
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

        debug!(
            application,
            facility,
            candidates = candidates.len(),
            "Matched vendor patterns"
        );
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

impl FieldPathMapping for Hl7v2Plugin {
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
