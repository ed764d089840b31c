//! Inference pipeline sequencing

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{Instrument, debug, info, info_span, warn};

use crate::analysis::{
    ConfidenceCalculationService, FieldPatternAnalysisService, FormatDeviationDetector,
    MultiStandardVendorDetectionService, VendorDetectionService,
};
use crate::cancel::CancellationToken;
use crate::config::InferenceOptions;
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::models::{
    ConfigurationAddress, ConfigurationMetadata, FormatDeviation, UNKNOWN_VENDOR,
    VendorConfiguration, VendorSignature,
};
use crate::plugin::PluginRegistry;

/// Message type used when a plugin cannot read one from a message
const UNKNOWN_MESSAGE_TYPE: &str = "Unknown";

/// Sequences the analysis services into a single inference run
#[derive(Debug, Clone)]
pub struct ConfigurationInferenceOrchestrator {
    registry: Arc<PluginRegistry>,
    fields: FieldPatternAnalysisService,
    deviations: FormatDeviationDetector,
    vendors: VendorDetectionService,
    multi_standard: MultiStandardVendorDetectionService,
}

impl ConfigurationInferenceOrchestrator {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            fields: FieldPatternAnalysisService::new(registry.clone()),
            deviations: FormatDeviationDetector::new(registry.clone()),
            vendors: VendorDetectionService::new(registry.clone()),
            multi_standard: MultiStandardVendorDetectionService::new(registry.clone()),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Infer a configuration for `address` from a single-standard corpus.
    ///
    /// Only an empty corpus, a failed field analysis and cancellation are
    /// errors; vendor detection, deviation detection and confidence scoring
    /// fall back to neutral values.
    pub async fn infer(
        &self,
        messages: &[String],
        address: &ConfigurationAddress,
        options: &InferenceOptions,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<VendorConfiguration> {
        let span = info_span!(
            "infer_configuration",
            standard = %address.standard,
            vendor = %address.vendor,
            message_type = %address.message_type,
        );
        self.infer_inner(messages, address, options, cancel)
            .instrument(span)
            .await
    }

    async fn infer_inner(
        &self,
        messages: &[String],
        address: &ConfigurationAddress,
        options: &InferenceOptions,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<VendorConfiguration> {
        if messages.is_empty() {
            return Err(IntelligenceError::validation(
                "Cannot infer a configuration from an empty corpus",
            ));
        }
        cancel.check()?;

        let corpus = options.limit(messages);
        let standard = address.standard.as_str();
        info!(messages = corpus.len(), offered = messages.len(), "Starting inference");

        let signature = match self.vendors.detect(corpus, standard, options, cancel).await {
            Ok(Some(signature)) => signature,
            Ok(None) => VendorSignature::unknown(),
            Err(IntelligenceError::Cancelled) => return Err(IntelligenceError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Vendor detection failed, using unknown vendor");
                VendorSignature::unknown()
            }
        };

        let field_patterns = self
            .fields
            .analyze(corpus, standard, &address.message_type, options, cancel)
            .await?;

        let format_deviations = if options.detect_deviations {
            self.detect_deviations(corpus, address, cancel).await?
        } else {
            Vec::new()
        };

        let confidence = ConfidenceCalculationService::new(options.confidence.clone());
        let field_confidence = match confidence.field_pattern_confidence(&field_patterns, corpus.len()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "Field confidence unavailable");
                None
            }
        };
        let vendor_confidence = (!signature.is_unknown()).then_some(signature.confidence);
        let overall = confidence.overall_confidence(vendor_confidence, field_confidence, corpus.len());

        info!(
            vendor = %signature.name,
            confidence = overall,
            segments = field_patterns.segment_patterns.len(),
            deviations = format_deviations.len(),
            "Inference complete"
        );

        Ok(VendorConfiguration {
            address: address.clone(),
            signature,
            field_patterns,
            format_deviations,
            metadata: ConfigurationMetadata::created(corpus.len(), overall),
        })
    }

    async fn detect_deviations(
        &self,
        corpus: &[String],
        address: &ConfigurationAddress,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        match self
            .deviations
            .detect_all(corpus, &address.standard, Some(&address.message_type), cancel)
            .await
        {
            Ok(deviations) => Ok(deviations),
            Err(IntelligenceError::Cancelled) => Err(IntelligenceError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Deviation detection failed, continuing without deviations");
                Ok(Vec::new())
            }
        }
    }

    /// Infer from a corpus that may mix standards.
    ///
    /// Messages are grouped by the standard of the plugin that accepts them;
    /// unclassifiable messages are dropped. Each group is inferred on its own
    /// and the highest-confidence configuration is returned, addressed by the
    /// vendor it detected.
    pub async fn infer_mixed_corpus(
        &self,
        messages: &[String],
        options: &InferenceOptions,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<VendorConfiguration> {
        if messages.is_empty() {
            return Err(IntelligenceError::validation(
                "Cannot infer a configuration from an empty corpus",
            ));
        }

        let grouped = self.multi_standard.group_by_standard(messages);
        if grouped.is_empty() {
            return Err(IntelligenceError::validation(format!(
                "None of {} messages matched a registered standard",
                messages.len()
            )));
        }

        let mut best: Option<VendorConfiguration> = None;
        for (standard, group) in &grouped.groups {
            cancel.check()?;
            let message_type = self.majority_message_type(standard, group);
            let address = ConfigurationAddress::new(standard, UNKNOWN_VENDOR, &message_type);
            debug!(standard, message_type, messages = group.len(), "Inferring standard group");

            let mut config = match self.infer(group, &address, options, cancel).await {
                Ok(config) => config,
                Err(IntelligenceError::Cancelled) => return Err(IntelligenceError::Cancelled),
                Err(e) => {
                    warn!(standard, error = %e, "Inference failed for standard group");
                    continue;
                }
            };
            config.address.vendor = config.signature.name.clone();

            if best
                .as_ref()
                .is_none_or(|b| config.confidence() > b.confidence())
            {
                best = Some(config);
            }
        }

        best.ok_or_else(|| {
            IntelligenceError::analysis("inference", "no standard group could be analyzed")
        })
    }

    /// Most frequent message type within a group; ties go to the lexically
    /// smaller type
    fn majority_message_type(&self, standard: &str, messages: &[String]) -> String {
        let Some(plugin) = self.registry.get(standard) else {
            return UNKNOWN_MESSAGE_TYPE.to_string();
        };
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for message in messages {
            if let Some(message_type) = plugin.message_type(message) {
                *counts.entry(message_type).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .rev()
            .max_by_key(|(_, count)| *count)
            .map(|(message_type, _)| message_type)
            .unwrap_or_else(|| UNKNOWN_MESSAGE_TYPE.to_string())
    }
}
