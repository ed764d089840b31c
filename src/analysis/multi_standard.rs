//! Vendor detection across standards

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::models::VendorMatch;
use crate::plugin::PluginRegistry;

/// Messages partitioned by the standard of the plugin that accepted them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StandardGroups {
    pub groups: BTreeMap<String, Vec<String>>,
    /// Messages no registered plugin could classify
    pub unclassified: usize,
}

impl StandardGroups {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Detects vendors for messages whose standard is not known up front
#[derive(Debug, Clone)]
pub struct MultiStandardVendorDetectionService {
    registry: Arc<PluginRegistry>,
}

impl MultiStandardVendorDetectionService {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Ask every plugin accepting `message`, in priority order, and keep the
    /// highest-confidence match. On equal confidence the earlier plugin wins.
    pub async fn detect_vendor(
        &self,
        message: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Option<VendorMatch>> {
        let plugins = self.registry.compatible_plugins(message);
        if plugins.is_empty() {
            debug!("No plugin accepts message");
            return Ok(None);
        }

        let mut best: Option<VendorMatch> = None;
        for plugin in plugins {
            cancel.check()?;
            let Some(detection) = plugin.vendor_detection() else {
                continue;
            };

            let baselines = match detection.baseline_vendor_configurations(cancel).await {
                Ok(baselines) => baselines,
                Err(IntelligenceError::Cancelled) => return Err(IntelligenceError::Cancelled),
                Err(e) => {
                    warn!(standard = plugin.standard(), error = %e, "Baselines unavailable");
                    Vec::new()
                }
            };

            let candidates = match detection
                .detect_vendor_candidates(message, &baselines, cancel)
                .await
            {
                Ok(candidates) => candidates,
                Err(IntelligenceError::Cancelled) => return Err(IntelligenceError::Cancelled),
                Err(e) => {
                    warn!(standard = plugin.standard(), error = %e, "Vendor detection failed");
                    continue;
                }
            };

            for mut candidate in candidates {
                if best
                    .as_ref()
                    .is_none_or(|b| candidate.confidence > b.confidence)
                {
                    candidate.standard = plugin.standard().to_string();
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }

    /// Partition a corpus by standard; unclassifiable messages are dropped
    pub fn group_by_standard(&self, messages: &[String]) -> StandardGroups {
        let mut grouped = StandardGroups::default();
        for (index, message) in messages.iter().enumerate() {
            match self.registry.classify(message) {
                Some(plugin) => grouped
                    .groups
                    .entry(plugin.standard().to_string())
                    .or_default()
                    .push(message.clone()),
                None => {
                    warn!(message = index, "Dropping message no plugin can classify");
                    grouped.unclassified += 1;
                }
            }
        }
        debug!(
            standards = grouped.groups.len(),
            unclassified = grouped.unclassified,
            "Grouped corpus by standard"
        );
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{FhirJsonPlugin, Hl7v2Plugin};

    fn service() -> MultiStandardVendorDetectionService {
        let registry = PluginRegistry::new()
            .with_plugin(Arc::new(Hl7v2Plugin::new()))
            .with_plugin(Arc::new(FhirJsonPlugin::new()));
        MultiStandardVendorDetectionService::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_detect_sets_standard() {
        let message = "MSH|^~\\&|EPIC|HOSP|RCV|FAC|20240101||ADT^A01|1|P|2.3";
        let found = service()
            .detect_vendor(message, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.vendor_name, "Epic");
        assert_eq!(found.standard, "HL7v23");
    }

    #[tokio::test]
    async fn test_unclassifiable_message() {
        let found = service()
            .detect_vendor("not a message", &CancellationToken::new())
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_group_by_standard() {
        let messages = vec![
            "MSH|^~\\&|A|B|C|D|20240101||ADT^A01|1|P|2.3".to_string(),
            r#"{"resourceType":"Patient","id":"1"}"#.to_string(),
            "garbage".to_string(),
        ];
        let groups = service().group_by_standard(&messages);
        assert_eq!(groups.groups["HL7v23"].len(), 1);
        assert_eq!(groups.groups["FHIR R4"].len(), 1);
        assert_eq!(groups.unclassified, 1);
    }
}
