//! Field pattern analysis orchestration

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{missing_capability, plugin_failure};
use crate::cancel::CancellationToken;
use crate::config::InferenceOptions;
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::models::{FieldFrequency, FieldPatterns, MessagePattern};
use crate::plugin::PluginRegistry;

const STAGE: &str = "field analysis";

/// Routes field statistics requests to the plugin for a standard
#[derive(Debug, Clone)]
pub struct FieldPatternAnalysisService {
    registry: Arc<PluginRegistry>,
}

impl FieldPatternAnalysisService {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Per-segment field statistics for a message corpus
    pub async fn analyze(
        &self,
        messages: &[String],
        standard: &str,
        message_type: &str,
        options: &InferenceOptions,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<FieldPatterns> {
        if messages.is_empty() {
            return Err(IntelligenceError::validation(
                "No messages provided for field analysis",
            ));
        }
        cancel.check()?;

        let plugin = self.registry.require(standard)?;
        let analysis = plugin
            .field_analysis()
            .ok_or_else(|| missing_capability(standard, STAGE))?;

        debug!(standard, message_type, messages = messages.len(), "Analyzing field patterns");

        let mut patterns = analysis
            .analyze_field_patterns(messages, message_type, options, cancel)
            .await
            .map_err(|e| plugin_failure(STAGE, e))?;

        normalize(&mut patterns, standard, message_type, messages.len(), options);

        info!(
            standard,
            message_type,
            segments = patterns.segment_patterns.len(),
            fields = patterns.field_count(),
            "Field pattern analysis complete"
        );
        Ok(patterns)
    }

    /// Statistics for isolated segments, wrapped by the plugin into minimal
    /// messages. Only the caller's segment types are kept in the result.
    pub async fn analyze_segment_patterns(
        &self,
        segments: &[String],
        standard: &str,
        message_type: &str,
        options: &InferenceOptions,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<FieldPatterns> {
        if segments.is_empty() {
            return Err(IntelligenceError::validation("No segments provided"));
        }
        let plugin = self.registry.require(standard)?;
        let analysis = plugin
            .field_analysis()
            .ok_or_else(|| missing_capability(standard, STAGE))?;

        let wrapped = analysis
            .wrap_segments(segments, message_type)
            .map_err(|e| plugin_failure(STAGE, e))?;

        let mut patterns = self
            .analyze(&wrapped.messages, standard, message_type, options, cancel)
            .await?;
        patterns
            .segment_patterns
            .retain(|id, _| wrapped.segment_ids.contains(id));
        Ok(patterns)
    }

    /// Statistics for a list of raw values of one field position
    pub async fn analyze_field_values(
        &self,
        values: &[String],
        standard: &str,
        message_type: &str,
        segment_id: &str,
        field_index: usize,
        options: &InferenceOptions,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<FieldFrequency> {
        if values.is_empty() {
            return Err(IntelligenceError::validation("No field values provided"));
        }
        let plugin = self.registry.require(standard)?;
        let analysis = plugin
            .field_analysis()
            .ok_or_else(|| missing_capability(standard, STAGE))?;

        let wrapped = analysis
            .wrap_field_values(segment_id, field_index, values, message_type)
            .map_err(|e| plugin_failure(STAGE, e))?;

        let patterns = self
            .analyze(&wrapped.messages, standard, message_type, options, cancel)
            .await?;

        patterns
            .segment(segment_id)
            .and_then(|segment| segment.field(field_index))
            .cloned()
            .ok_or_else(|| {
                IntelligenceError::analysis(
                    STAGE,
                    format!("{segment_id}.{field_index} missing from wrapped analysis"),
                )
            })
    }

    /// Roll field statistics up into a corpus-level pattern
    pub fn build_message_pattern(
        &self,
        patterns: &FieldPatterns,
        total_samples: usize,
        confidence: f64,
    ) -> MessagePattern {
        MessagePattern::from_field_patterns(patterns, total_samples, confidence)
    }
}

/// Enforce the counting invariants on whatever the plugin returned
fn normalize(
    patterns: &mut FieldPatterns,
    standard: &str,
    message_type: &str,
    messages: usize,
    options: &InferenceOptions,
) {
    if patterns.standard.is_empty() {
        patterns.standard = standard.to_string();
    }
    if patterns.message_type.is_empty() {
        patterns.message_type = message_type.to_string();
    }
    if patterns.sample_size == 0 {
        patterns.sample_size = messages;
    }

    for segment in patterns.segment_patterns.values_mut() {
        for field in segment.field_frequencies.values_mut() {
            if field.populated_count > field.total_count {
                warn!(
                    segment = %segment.segment_id,
                    field = field.field_index,
                    "Plugin reported more populated than total occurrences, capping"
                );
                field.populated_count = field.total_count;
            }
            field.frequency = crate::models::population_rate(field.populated_count, field.total_count);
            if !options.include_component_patterns {
                field.component_patterns.clear();
            }
        }
    }
    patterns.truncate_common_values(options.max_common_values);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::Hl7v2Plugin;

    fn service() -> FieldPatternAnalysisService {
        let registry = PluginRegistry::new().with_plugin(Arc::new(Hl7v2Plugin::new()));
        FieldPatternAnalysisService::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_no_plugin_for_standard() {
        let err = service()
            .analyze(
                &["MSH|^~\\&|A".to_string()],
                "NCPDP",
                "NEWRX",
                &InferenceOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, IntelligenceError::no_plugin("NCPDP"));
    }

    #[tokio::test]
    async fn test_empty_corpus_rejected() {
        let err = service()
            .analyze(
                &[],
                "HL7v23",
                "ADT^A01",
                &InferenceOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IntelligenceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_segment_analysis_drops_wrapper() {
        let segments = vec![
            "PID|1||123^^^MRN||DOE^JOHN".to_string(),
            "PID|1||456^^^MRN||ROE^JANE|||F".to_string(),
        ];
        let patterns = service()
            .analyze_segment_patterns(
                &segments,
                "HL7v23",
                "ADT^A01",
                &InferenceOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(patterns.segment("MSH").is_none());
        let pid = patterns.segment("PID").unwrap();
        assert_eq!(pid.sample_size, 2);
        assert_eq!(pid.field(5).unwrap().populated_count, 2);
        assert_eq!(pid.field(8).unwrap().populated_count, 1);
        assert_eq!(pid.field(8).unwrap().total_count, 2);
    }

    #[tokio::test]
    async fn test_field_value_analysis() {
        let values = vec!["M".to_string(), "F".to_string(), "".to_string(), "F".to_string()];
        let field = service()
            .analyze_field_values(
                &values,
                "HL7v23",
                "ADT^A01",
                "PID",
                8,
                &InferenceOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(field.total_count, 4);
        assert_eq!(field.populated_count, 3);
        assert_eq!(field.common_values["F"], 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = service()
            .analyze(
                &["MSH|^~\\&|A".to_string()],
                "HL7v23",
                "ADT^A01",
                &InferenceOptions::default(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err, IntelligenceError::Cancelled);
    }
}
