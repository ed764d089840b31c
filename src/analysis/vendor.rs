//! Single-standard vendor detection

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::missing_capability;
use crate::cancel::CancellationToken;
use crate::config::{InferenceOptions, VendorDetectionPolicy};
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::models::{VendorConfiguration, VendorMatch, VendorSignature};
use crate::plugin::{PluginRegistry, VendorDetection};

const STAGE: &str = "vendor detection";

/// Fingerprints the sender of a corpus using one standard's plugin
#[derive(Debug, Clone)]
pub struct VendorDetectionService {
    registry: Arc<PluginRegistry>,
}

impl VendorDetectionService {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Detect the vendor of `messages`, or `None` when no message yields a
    /// candidate above `options.min_vendor_confidence`.
    ///
    /// Per-message plugin errors are logged and skipped; only cancellation
    /// and a missing plugin surface as errors.
    pub async fn detect(
        &self,
        messages: &[String],
        standard: &str,
        options: &InferenceOptions,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Option<VendorSignature>> {
        let plugin = self.registry.require(standard)?;
        let detection = plugin
            .vendor_detection()
            .ok_or_else(|| missing_capability(standard, STAGE))?;

        let baselines = self.baselines(detection, standard, cancel).await?;

        let mut hits: Vec<VendorMatch> = Vec::new();
        for (index, message) in messages.iter().enumerate() {
            cancel.check()?;
            let candidates = match detection
                .detect_vendor_candidates(message, &baselines, cancel)
                .await
            {
                Ok(candidates) => candidates,
                Err(IntelligenceError::Cancelled) => return Err(IntelligenceError::Cancelled),
                Err(e) => {
                    warn!(standard, message = index, error = %e, "Vendor detection failed for message");
                    continue;
                }
            };

            let Some(best) = best_candidate(candidates, options.min_vendor_confidence) else {
                continue;
            };

            if options.vendor_detection_policy == VendorDetectionPolicy::FirstMatch {
                info!(
                    standard,
                    vendor = %best.vendor_name,
                    confidence = best.confidence,
                    message = index,
                    "Vendor detected"
                );
                return Ok(Some(best.into()));
            }
            hits.push(best);
        }

        let signature = aggregate(hits, messages.len(), options.vendor_detection_policy);
        match &signature {
            Some(s) => info!(
                standard,
                vendor = %s.name,
                confidence = s.confidence,
                policy = ?options.vendor_detection_policy,
                "Vendor detected"
            ),
            None => debug!(standard, messages = messages.len(), "No vendor detected"),
        }
        Ok(signature)
    }

    async fn baselines(
        &self,
        detection: &dyn VendorDetection,
        standard: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<Vec<VendorConfiguration>> {
        match detection.baseline_vendor_configurations(cancel).await {
            Ok(baselines) => Ok(baselines),
            Err(IntelligenceError::Cancelled) => Err(IntelligenceError::Cancelled),
            Err(e) => {
                warn!(standard, error = %e, "Baseline vendor configurations unavailable");
                Ok(Vec::new())
            }
        }
    }
}

/// Highest-confidence candidate at or above `threshold`; ties keep the first
fn best_candidate(candidates: Vec<VendorMatch>, threshold: f64) -> Option<VendorMatch> {
    candidates
        .into_iter()
        .filter(|c| c.confidence >= threshold)
        .fold(None, |best: Option<VendorMatch>, candidate| match best {
            Some(b) if b.confidence >= candidate.confidence => Some(b),
            _ => Some(candidate),
        })
}

/// Combine per-message hits under a corpus-wide policy.
///
/// The winning vendor's confidence is its mean match confidence scaled by
/// the share of messages it matched.
fn aggregate(
    hits: Vec<VendorMatch>,
    corpus_size: usize,
    policy: VendorDetectionPolicy,
) -> Option<VendorSignature> {
    if hits.is_empty() || corpus_size == 0 {
        return None;
    }

    let mut tallies: BTreeMap<String, (usize, f64, VendorMatch)> = BTreeMap::new();
    for hit in hits {
        tallies
            .entry(hit.vendor_name.clone())
            .and_modify(|(count, sum, best)| {
                *count += 1;
                *sum += hit.confidence;
                if hit.confidence > best.confidence {
                    *best = hit.clone();
                }
            })
            .or_insert_with(|| (1, hit.confidence, hit));
    }

    // BTreeMap iteration is by vendor name, so `max_by` ties resolve to the
    // lexically last name; reverse to prefer the first.
    let (_, (count, sum, best)) = tallies.into_iter().rev().max_by(|a, b| {
        let (ca, sa, _) = &a.1;
        let (cb, sb, _) = &b.1;
        match policy {
            VendorDetectionPolicy::MajorityVote => ca.cmp(cb).then(sa.total_cmp(sb)),
            _ => sa.total_cmp(sb).then(ca.cmp(cb)),
        }
    })?;

    let mean = sum / count as f64;
    let share = count as f64 / corpus_size as f64;
    let mut signature = VendorSignature::from(best);
    signature.confidence = (mean * share).clamp(0.0, 1.0);
    signature.detection_method = match policy {
        VendorDetectionPolicy::MajorityVote => "majority-vote".to_string(),
        _ => "confidence-weighted".to_string(),
    };
    Some(signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::Hl7v2Plugin;

    fn message(app: &str) -> String {
        format!("MSH|^~\\&|{app}|FAC|RCV|RFAC|20240101||ADT^A01|1|P|2.3\rPID|1||123")
    }

    fn service() -> VendorDetectionService {
        let registry = PluginRegistry::new().with_plugin(Arc::new(Hl7v2Plugin::new()));
        VendorDetectionService::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_first_match() {
        let messages = vec![message("UNKNOWNAPP"), message("EPIC_PROD")];
        let signature = service()
            .detect(
                &messages,
                "HL7v23",
                &InferenceOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signature.name, "Epic");
        assert!(signature.confidence >= 0.85);
    }

    #[tokio::test]
    async fn test_no_match_is_none() {
        let signature = service()
            .detect(
                &[message("HOMEGROWN")],
                "HL7v23",
                &InferenceOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(signature.is_none());
    }

    #[tokio::test]
    async fn test_majority_vote() {
        let messages = vec![
            message("CERNER"),
            message("EPIC"),
            message("EPIC"),
            message("HOMEGROWN"),
        ];
        let options = InferenceOptions::builder()
            .vendor_detection_policy(VendorDetectionPolicy::MajorityVote)
            .build();
        let signature = service()
            .detect(&messages, "HL7v23", &options, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signature.name, "Epic");
        assert_eq!(signature.detection_method, "majority-vote");
        assert!(signature.confidence <= 0.5);
    }

    #[test]
    fn test_aggregate_tie_prefers_first_name() {
        let hits = vec![
            VendorMatch::new("Zeta", 0.8, "x"),
            VendorMatch::new("Alpha", 0.8, "x"),
        ];
        let signature = aggregate(hits, 2, VendorDetectionPolicy::ConfidenceWeighted).unwrap();
        assert_eq!(signature.name, "Alpha");
        assert!((signature.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_best_candidate_threshold() {
        let candidates = vec![
            VendorMatch::new("A", 0.4, "x"),
            VendorMatch::new("B", 0.7, "x"),
        ];
        assert_eq!(best_candidate(candidates.clone(), 0.5).unwrap().vendor_name, "B");
        assert!(best_candidate(candidates, 0.9).is_none());
    }
}
