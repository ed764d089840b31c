//! Format deviation detection fan-out

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{missing_capability, plugin_failure};
use crate::cancel::CancellationToken;
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::models::FormatDeviation;
use crate::plugin::{FormatAnalysis, PluginRegistry, StandardPlugin};

const STAGE: &str = "deviation detection";

/// Routes deviation queries to the plugin registered for a standard
#[derive(Debug, Clone)]
pub struct FormatDeviationDetector {
    registry: Arc<PluginRegistry>,
}

impl FormatDeviationDetector {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    fn plugin(&self, standard: &str) -> IntelligenceResult<Arc<dyn StandardPlugin>> {
        self.registry.require(standard).inspect_err(|_| {
            warn!(
                standard,
                available = ?self.registry.standards(),
                "No plugin available for deviation detection"
            );
        })
    }

    fn capability<'a>(
        plugin: &'a Arc<dyn StandardPlugin>,
        standard: &str,
    ) -> IntelligenceResult<&'a dyn FormatAnalysis> {
        plugin
            .format_analysis()
            .ok_or_else(|| missing_capability(standard, STAGE))
    }

    pub async fn detect_encoding(
        &self,
        messages: &[String],
        standard: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        let plugin = self.plugin(standard)?;
        let analysis = Self::capability(&plugin, standard)?;
        cancel.check()?;

        let deviations = analysis
            .detect_encoding_deviations(messages, cancel)
            .await
            .map_err(|e| plugin_failure(STAGE, e))?;
        debug!(standard, count = deviations.len(), "Encoding deviations detected");
        Ok(deviations)
    }

    pub async fn detect_structural(
        &self,
        messages: &[String],
        standard: &str,
        message_type: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        let plugin = self.plugin(standard)?;
        let analysis = Self::capability(&plugin, standard)?;
        cancel.check()?;

        let deviations = analysis
            .detect_structural_deviations(messages, message_type, cancel)
            .await
            .map_err(|e| plugin_failure(STAGE, e))?;
        debug!(
            standard,
            message_type,
            count = deviations.len(),
            "Structural deviations detected"
        );
        Ok(deviations)
    }

    pub async fn detect_field_format(
        &self,
        messages: &[String],
        standard: &str,
        segment_type: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        let plugin = self.plugin(standard)?;
        let analysis = Self::capability(&plugin, standard)?;
        cancel.check()?;

        let deviations = analysis
            .detect_field_format_deviations(messages, segment_type, cancel)
            .await
            .map_err(|e| plugin_failure(STAGE, e))?;
        debug!(
            standard,
            segment_type,
            count = deviations.len(),
            "Field format deviations detected"
        );
        Ok(deviations)
    }

    /// Comprehensive scan, de-duplicated by `(type, location)`
    pub async fn detect_all(
        &self,
        messages: &[String],
        standard: &str,
        message_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<FormatDeviation>> {
        if messages.is_empty() {
            return Err(IntelligenceError::validation(
                "No messages provided for deviation detection",
            ));
        }
        let plugin = self.plugin(standard)?;
        let analysis = Self::capability(&plugin, standard)?;
        cancel.check()?;

        let deviations = analysis
            .detect_all_deviations(messages, message_type, cancel)
            .await
            .map_err(|e| plugin_failure(STAGE, e))?;

        let mut unique: Vec<FormatDeviation> = Vec::with_capacity(deviations.len());
        for deviation in deviations {
            match unique.iter_mut().find(|d| d.key() == deviation.key()) {
                Some(existing) => {
                    existing.severity = existing.severity.max(deviation.severity);
                    existing.frequency = existing.frequency.max(deviation.frequency);
                }
                None => unique.push(deviation),
            }
        }

        info!(
            standard,
            messages = messages.len(),
            deviations = unique.len(),
            "Format deviation scan complete"
        );
        Ok(unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviationType, Severity};
    use crate::plugins::Hl7v2Plugin;

    fn detector() -> FormatDeviationDetector {
        let registry = PluginRegistry::new().with_plugin(Arc::new(Hl7v2Plugin::new()));
        FormatDeviationDetector::new(Arc::new(registry))
    }

    fn adt(encoding: &str) -> String {
        format!(
            "MSH|{encoding}|EPIC|HOSP|RCV|FAC|20240101120000||ADT^A01|1|P|2.3\rEVN|A01|20240101120000\rPID|1||123||DOE^JOHN||19800101|M\rPV1|1|I"
        )
    }

    #[tokio::test]
    async fn test_missing_plugin_is_not_found() {
        let err = detector()
            .detect_all(&[adt("^~\\&")], "X12", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, IntelligenceError::no_plugin("X12"));
    }

    #[tokio::test]
    async fn test_detect_all_is_superset() {
        let messages = vec![adt("^~\\#"), adt("^~\\&")];
        let detector = detector();
        let cancel = CancellationToken::new();

        let encoding = detector
            .detect_encoding(&messages, "HL7v23", &cancel)
            .await
            .unwrap();
        let all = detector
            .detect_all(&messages, "HL7v23", Some("ADT^A01"), &cancel)
            .await
            .unwrap();

        assert!(!encoding.is_empty());
        for deviation in &encoding {
            assert!(all.iter().any(|d| d.key() == deviation.key()));
        }
        let msh2 = all
            .iter()
            .find(|d| d.deviation_type == DeviationType::EncodingVariation && d.location == "MSH.2")
            .unwrap();
        assert_eq!(msh2.severity, Severity::Warning);
        assert!((msh2.frequency - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_structural_unexpected_z_segment() {
        let message = format!("{}\rZPD|custom", adt("^~\\&"));
        let deviations = detector()
            .detect_structural(&[message], "HL7v23", "ADT^A01", &CancellationToken::new())
            .await
            .unwrap();
        let zpd = deviations.iter().find(|d| d.location == "ZPD").unwrap();
        assert_eq!(zpd.severity, Severity::Info);
    }
}
