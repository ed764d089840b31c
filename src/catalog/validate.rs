//! Scoring a message against a stored configuration

use tracing::debug;

use super::ConfigurationCatalog;
use crate::cancel::CancellationToken;
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::models::{
    ConfigurationAddress, LOW_CONFIDENCE_THRESHOLD, MessageValidationResult, VendorConfiguration,
};

/// Confidence factor for a message whose type differs from the configuration
const TYPE_MISMATCH_FACTOR: f64 = 0.8;

/// Confidence factor when the configuration has recorded deviations
const KNOWN_DEVIATION_FACTOR: f64 = 0.9;

impl ConfigurationCatalog {
    /// Score `message` against the configuration stored at `address`.
    ///
    /// A missing configuration or an empty message yields an invalid result,
    /// not an error. Only a stored configuration that cannot be scored is an
    /// error.
    pub async fn validate_message(
        &self,
        message: &str,
        address: &ConfigurationAddress,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<MessageValidationResult> {
        cancel.check()?;
        if message.trim().is_empty() {
            return Ok(MessageValidationResult::invalid(
                address.clone(),
                "Message is empty",
            ));
        }
        let Some(config) = self.get_configuration(address).await? else {
            return Ok(MessageValidationResult::invalid(
                address.clone(),
                format!("No configuration stored for {address}"),
            ));
        };
        check_scorable(&config)?;

        let mut result = MessageValidationResult::valid(address.clone(), config.confidence());

        match self.registry().get(&address.standard) {
            Some(plugin) if !plugin.can_analyze(message) => {
                result.is_valid = false;
                result
                    .errors
                    .push(format!("Message is not a {} message", plugin.standard()));
            }
            Some(plugin) => {
                let expected = &config.field_patterns.message_type;
                if let Some(actual) = plugin.message_type(message)
                    && !expected.is_empty()
                    && actual != *expected
                {
                    result.scale_confidence(TYPE_MISMATCH_FACTOR);
                    result.warn(format!(
                        "Message type '{actual}' differs from configured '{expected}'"
                    ));
                }
            }
            None => {
                debug!(standard = %address.standard, "No plugin to read message type");
            }
        }

        if !config.format_deviations.is_empty() {
            result.scale_confidence(KNOWN_DEVIATION_FACTOR);
            result.warn(format!(
                "Configuration records {} known format deviations",
                config.format_deviations.len()
            ));
        }

        if result.confidence < LOW_CONFIDENCE_THRESHOLD {
            result.warn(format!(
                "Low confidence {:.2} (below {LOW_CONFIDENCE_THRESHOLD})",
                result.confidence
            ));
        }

        debug!(
            address = %address,
            valid = result.is_valid,
            confidence = result.confidence,
            warnings = result.warnings.len(),
            "Validated message"
        );
        Ok(result)
    }
}

fn check_scorable(config: &VendorConfiguration) -> IntelligenceResult<()> {
    let confidence = config.confidence();
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(IntelligenceError::validation(format!(
            "Stored configuration for {} has invalid confidence {confidence}",
            config.address
        )));
    }
    if config.messages_sampled() == 0 {
        return Err(IntelligenceError::validation(format!(
            "Stored configuration for {} was built from no messages",
            config.address
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::InferenceOptions;
    use crate::plugins::default_registry;

    const ADT: &str = "MSH|^~\\&|EPIC_PROD|HOSP|RCV|FAC|20240101120000||ADT^A01|1|P|2.3\rEVN|A01|20240101120000\rPID|1||1^^^MRN||DOE^JOHN||19800101|M\rPV1|1|I";

    async fn seeded() -> (ConfigurationCatalog, ConfigurationAddress) {
        let catalog = ConfigurationCatalog::new(Arc::new(default_registry()));
        let address = ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01");
        let messages: Vec<String> = (0..10).map(|_| ADT.to_string()).collect();
        catalog
            .analyze_messages(
                &messages,
                &address,
                &InferenceOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        (catalog, address)
    }

    #[tokio::test]
    async fn test_missing_configuration_is_invalid_result() {
        let catalog = ConfigurationCatalog::new(Arc::new(default_registry()));
        let address = ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01");
        let result = catalog
            .validate_message(ADT, &address, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_empty_message_is_invalid_result() {
        let (catalog, address) = seeded().await;
        let result = catalog
            .validate_message("  ", &address, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_type_mismatch_scales_confidence() {
        let (catalog, address) = seeded().await;
        let cancel = CancellationToken::new();
        let stored = catalog.get_configuration(&address).await.unwrap().unwrap();

        let matching = catalog.validate_message(ADT, &address, &cancel).await.unwrap();
        let mismatched = catalog
            .validate_message(&ADT.replace("ADT^A01", "ADT^A08"), &address, &cancel)
            .await
            .unwrap();

        assert!(matching.is_valid);
        let deviation_factor = if stored.format_deviations.is_empty() { 1.0 } else { 0.9 };
        assert!((matching.confidence - stored.confidence() * deviation_factor).abs() < 1e-9);
        assert!((mismatched.confidence - matching.confidence * 0.8).abs() < 1e-9);
        assert!(mismatched.warnings.iter().any(|w| w.contains("ADT^A08")));
    }

    #[tokio::test]
    async fn test_known_deviations_and_low_confidence() {
        let (catalog, address) = seeded().await;
        let cancel = CancellationToken::new();
        let mut config = catalog.get_configuration(&address).await.unwrap().unwrap();
        config.format_deviations = vec![crate::models::FormatDeviation::new(
            crate::models::DeviationType::StructuralDeviation,
            "ZPD",
            "custom segment",
            crate::models::Severity::Info,
            1.0,
        )];
        config.metadata.confidence = 0.6;
        catalog.store_configuration(config, &cancel).await.unwrap();

        let result = catalog.validate_message(ADT, &address, &cancel).await.unwrap();
        assert!((result.confidence - 0.54).abs() < 1e-9);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[1].starts_with("Low confidence"));
    }

    #[tokio::test]
    async fn test_wrong_standard_message() {
        let (catalog, address) = seeded().await;
        let result = catalog
            .validate_message(
                r#"{"resourceType":"Patient"}"#,
                &address,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_unscorable_configuration_is_error() {
        let (catalog, address) = seeded().await;
        let cancel = CancellationToken::new();
        let mut config = catalog.get_configuration(&address).await.unwrap().unwrap();
        config.metadata.messages_sampled = 0;
        catalog.store_configuration(config, &cancel).await.unwrap();

        assert!(matches!(
            catalog.validate_message(ADT, &address, &cancel).await,
            Err(IntelligenceError::Validation(_))
        ));
    }
}
