//! Configuration catalog
//!
//! Process-local knowledge base of inferred configurations, keyed by
//! [`ConfigurationAddress`]. New evidence for a known address is merged into
//! the stored entry; everything else is a plain keyed read or write.
//!
//! All mutations hold the single write lock for their whole
//! read-merge-write, so two concurrent analyses of the same address never
//! lose an update. Inference itself runs before the lock is taken.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pidgeon_intelligence::{CancellationToken, ConfigurationCatalog, InferenceOptions};
//! use pidgeon_intelligence::models::ConfigurationAddress;
//! use pidgeon_intelligence::plugins::default_registry;
//!
//! let catalog = ConfigurationCatalog::new(Arc::new(default_registry()));
//! let address = ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01");
//! let config = catalog
//!     .analyze_messages(&messages, &address, &InferenceOptions::default(), &CancellationToken::new())
//!     .await?;
//! ```

mod snapshot;
mod validate;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{Instrument, debug, info, info_span};

use crate::cancel::CancellationToken;
use crate::config::InferenceOptions;
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::inference::{ConfigurationInferenceOrchestrator, PatternMergeService};
use crate::models::{
    CatalogStatistics, ChangeType, ConfigurationAddress, ConfigurationChange,
    VendorConfiguration,
};
use crate::plugin::PluginRegistry;

pub use snapshot::CatalogSnapshot;

/// Concurrent store of vendor configurations
#[derive(Debug)]
pub struct ConfigurationCatalog {
    entries: RwLock<HashMap<ConfigurationAddress, VendorConfiguration>>,
    orchestrator: ConfigurationInferenceOrchestrator,
}

impl ConfigurationCatalog {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            orchestrator: ConfigurationInferenceOrchestrator::new(registry),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        self.orchestrator.registry()
    }

    /// Infer a configuration from `messages` and create or merge the entry
    /// at `address`. Returns the stored result.
    pub async fn analyze_messages(
        &self,
        messages: &[String],
        address: &ConfigurationAddress,
        options: &InferenceOptions,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<VendorConfiguration> {
        validate_address(address)?;
        let span = info_span!("analyze_messages", address = %address, messages = messages.len());
        self.analyze_inner(messages, address, options, cancel)
            .instrument(span)
            .await
    }

    async fn analyze_inner(
        &self,
        messages: &[String],
        address: &ConfigurationAddress,
        options: &InferenceOptions,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<VendorConfiguration> {
        let inferred = self
            .orchestrator
            .infer(messages, address, options, cancel)
            .await?;
        cancel.check()?;

        let mut entries = self.entries.write().await;
        let stored = match entries.get(address) {
            Some(existing) => {
                let merged = PatternMergeService::new(options.confidence.clone())
                    .with_max_common_values(options.max_common_values)
                    .merge_configurations(existing, &inferred)?;
                info!(
                    version = merged.metadata.version,
                    messages_sampled = merged.messages_sampled(),
                    confidence = merged.confidence(),
                    "Merged into existing configuration"
                );
                merged
            }
            None => {
                info!(confidence = inferred.confidence(), "Created configuration");
                inferred
            }
        };
        entries.insert(address.clone(), stored.clone());
        Ok(stored)
    }

    /// Entry at `address`, if any
    pub async fn get_configuration(
        &self,
        address: &ConfigurationAddress,
    ) -> IntelligenceResult<Option<VendorConfiguration>> {
        Ok(self.entries.read().await.get(address).cloned())
    }

    /// Entries whose vendor matches, ignoring ASCII case
    pub async fn get_by_vendor(&self, vendor: &str) -> IntelligenceResult<Vec<VendorConfiguration>> {
        Ok(self
            .filtered(|a| a.vendor.eq_ignore_ascii_case(vendor))
            .await)
    }

    /// Entries whose standard matches, ignoring ASCII case
    pub async fn get_by_standard(
        &self,
        standard: &str,
    ) -> IntelligenceResult<Vec<VendorConfiguration>> {
        Ok(self
            .filtered(|a| a.standard.eq_ignore_ascii_case(standard))
            .await)
    }

    pub async fn get_by_message_type(
        &self,
        message_type: &str,
    ) -> IntelligenceResult<Vec<VendorConfiguration>> {
        Ok(self.filtered(|a| a.message_type == message_type).await)
    }

    /// Every entry, ordered by address
    pub async fn list_all(&self) -> IntelligenceResult<Vec<VendorConfiguration>> {
        Ok(self.filtered(|_| true).await)
    }

    async fn filtered(
        &self,
        keep: impl Fn(&ConfigurationAddress) -> bool,
    ) -> Vec<VendorConfiguration> {
        let entries = self.entries.read().await;
        let mut found: Vec<VendorConfiguration> = entries
            .iter()
            .filter(|(address, _)| keep(*address))
            .map(|(_, config)| config.clone())
            .collect();
        found.sort_by(|a, b| a.address.cmp(&b.address));
        found
    }

    /// Insert or replace the entry at `configuration.address`, recording a
    /// `Stored` change. A non-finite confidence is rejected; any other value
    /// is clamped into [0, 1].
    pub async fn store_configuration(
        &self,
        mut configuration: VendorConfiguration,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<()> {
        validate_entry(&mut configuration)?;
        cancel.check()?;

        let change = ConfigurationChange::new(
            ChangeType::Stored,
            format!("Stored configuration for {}", configuration.address),
            0.0,
        );
        configuration.metadata.last_updated = change.timestamp;
        configuration.metadata.changes.append(change);

        let mut entries = self.entries.write().await;
        let replaced = entries
            .insert(configuration.address.clone(), configuration)
            .is_some();
        debug!(replaced, "Stored configuration");
        Ok(())
    }

    /// Remove the entry at `address`; `false` when there was none
    pub async fn remove_configuration(
        &self,
        address: &ConfigurationAddress,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<bool> {
        cancel.check()?;
        let removed = self.entries.write().await.remove(address).is_some();
        debug!(address = %address, removed, "Removed configuration");
        Ok(removed)
    }

    /// Audit log of the entry at `address`, optionally limited to changes
    /// made within `window` of now
    pub async fn get_change_history(
        &self,
        address: &ConfigurationAddress,
        window: Option<Duration>,
    ) -> IntelligenceResult<Vec<ConfigurationChange>> {
        let entries = self.entries.read().await;
        let config = entries
            .get(address)
            .ok_or_else(|| IntelligenceError::ConfigurationNotFound(address.to_string()))?;
        let changes = &config.metadata.changes;
        Ok(match window {
            Some(window) => changes.within(window),
            None => changes.entries().to_vec(),
        })
    }

    /// Corpus-wide rollup
    pub async fn get_statistics(&self) -> IntelligenceResult<CatalogStatistics> {
        let entries = self.entries.read().await;
        let mut stats = CatalogStatistics {
            total_configurations: entries.len(),
            ..Default::default()
        };
        let mut confidence_sum = 0.0;
        for config in entries.values() {
            *stats
                .configurations_by_vendor
                .entry(config.address.vendor.clone())
                .or_insert(0) += 1;
            *stats
                .configurations_by_standard
                .entry(config.address.standard.clone())
                .or_insert(0) += 1;
            stats.total_messages_analyzed += config.messages_sampled();
            confidence_sum += config.confidence();
            let updated = config.metadata.last_updated;
            if stats.most_recent_update.is_none_or(|latest| updated > latest) {
                stats.most_recent_update = Some(updated);
            }
        }
        if !entries.is_empty() {
            stats.average_confidence = confidence_sum / entries.len() as f64;
        }
        Ok(stats)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every entry older than `max_age` since its last update
    pub async fn prune_older_than(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, config| config.metadata.last_updated >= cutoff);
        before - entries.len()
    }
}

fn validate_address(address: &ConfigurationAddress) -> IntelligenceResult<()> {
    if address.standard.trim().is_empty() {
        return Err(IntelligenceError::validation("Address has no standard"));
    }
    if address.message_type.trim().is_empty() {
        return Err(IntelligenceError::validation("Address has no message type"));
    }
    Ok(())
}

/// Complete address and finite confidence, clamped into [0, 1]
fn validate_entry(configuration: &mut VendorConfiguration) -> IntelligenceResult<()> {
    validate_address(&configuration.address)?;
    let confidence = configuration.metadata.confidence;
    if !confidence.is_finite() {
        return Err(IntelligenceError::validation(format!(
            "Configuration {} has non-finite confidence {confidence}",
            configuration.address
        )));
    }
    configuration.metadata.confidence = confidence.clamp(0.0, 1.0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeType;
    use crate::plugins::default_registry;

    fn adt(app: &str, control: usize) -> String {
        format!(
            "MSH|^~\\&|{app}|HOSP|RCV|FAC|20240101120000||ADT^A01|{control}|P|2.3\rEVN|A01|20240101120000\rPID|1||{control}^^^MRN||DOE^JOHN||19800101|M\rPV1|1|I"
        )
    }

    fn corpus(app: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| adt(app, i)).collect()
    }

    fn catalog() -> ConfigurationCatalog {
        ConfigurationCatalog::new(Arc::new(default_registry()))
    }

    fn epic_address() -> ConfigurationAddress {
        ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01")
    }

    #[tokio::test]
    async fn test_analyze_creates_then_merges() {
        let catalog = catalog();
        let cancel = CancellationToken::new();
        let options = InferenceOptions::default();
        let address = epic_address();

        let first = catalog
            .analyze_messages(&corpus("EPIC_PROD", 5), &address, &options, &cancel)
            .await
            .unwrap();
        assert_eq!(first.metadata.version, 1);

        let second = catalog
            .analyze_messages(&corpus("EPIC_PROD", 3), &address, &options, &cancel)
            .await
            .unwrap();
        assert_eq!(second.messages_sampled(), 8);
        assert_eq!(second.metadata.version, 2);
        assert_eq!(
            second.field_patterns.field("PID.5").unwrap().total_count,
            8
        );

        let history = catalog.get_change_history(&address, None).await.unwrap();
        let kinds: Vec<ChangeType> = history.iter().map(|c| c.change_type).collect();
        assert_eq!(kinds, vec![ChangeType::Created, ChangeType::Merged]);
        assert_eq!(catalog.len().await, 1);
    }

    #[tokio::test]
    async fn test_reads_never_fail_on_absence() {
        let catalog = catalog();
        assert!(catalog.get_configuration(&epic_address()).await.unwrap().is_none());
        assert!(catalog.get_by_vendor("Epic").await.unwrap().is_empty());
        assert!(catalog.get_by_standard("HL7v23").await.unwrap().is_empty());
        assert!(catalog.get_by_message_type("ADT^A01").await.unwrap().is_empty());
        assert!(catalog.list_all().await.unwrap().is_empty());
        assert_eq!(catalog.get_statistics().await.unwrap(), CatalogStatistics::default());
        assert!(matches!(
            catalog.get_change_history(&epic_address(), None).await,
            Err(IntelligenceError::ConfigurationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_queries_and_statistics() {
        let catalog = catalog();
        let cancel = CancellationToken::new();
        let options = InferenceOptions::default();

        catalog
            .analyze_messages(&corpus("EPIC_PROD", 4), &epic_address(), &options, &cancel)
            .await
            .unwrap();
        let cerner = ConfigurationAddress::new("HL7v23", "Cerner", "ADT^A01");
        catalog
            .analyze_messages(&corpus("CERNER", 6), &cerner, &options, &cancel)
            .await
            .unwrap();

        assert_eq!(catalog.get_by_vendor("epic").await.unwrap().len(), 1);
        assert_eq!(catalog.get_by_standard("hl7v23").await.unwrap().len(), 2);
        assert_eq!(catalog.get_by_message_type("ADT^A01").await.unwrap().len(), 2);

        let all = catalog.list_all().await.unwrap();
        assert_eq!(all[0].address.vendor, "Cerner");

        let stats = catalog.get_statistics().await.unwrap();
        assert_eq!(stats.total_configurations, 2);
        assert_eq!(stats.total_messages_analyzed, 10);
        assert_eq!(stats.configurations_by_standard["HL7v23"], 2);
        assert!(stats.average_confidence > 0.0 && stats.average_confidence <= 1.0);
        assert!(stats.most_recent_update.is_some());
    }

    #[tokio::test]
    async fn test_store_and_remove() {
        let catalog = catalog();
        let cancel = CancellationToken::new();
        let config = catalog
            .orchestrator
            .infer(
                &corpus("EPIC_PROD", 2),
                &epic_address(),
                &InferenceOptions::default(),
                &cancel,
            )
            .await
            .unwrap();

        catalog.store_configuration(config, &cancel).await.unwrap();
        let history = catalog.get_change_history(&epic_address(), None).await.unwrap();
        assert_eq!(history.last().unwrap().change_type, ChangeType::Stored);

        let recent = catalog
            .get_change_history(&epic_address(), Some(Duration::minutes(5)))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);

        assert!(catalog.remove_configuration(&epic_address(), &cancel).await.unwrap());
        assert!(!catalog.remove_configuration(&epic_address(), &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_checks_confidence() {
        let catalog = catalog();
        let cancel = CancellationToken::new();
        let config = catalog
            .orchestrator
            .infer(
                &corpus("EPIC_PROD", 2),
                &epic_address(),
                &InferenceOptions::default(),
                &cancel,
            )
            .await
            .unwrap();

        let mut broken = config.clone();
        broken.metadata.confidence = f64::NAN;
        assert!(matches!(
            catalog.store_configuration(broken, &cancel).await,
            Err(IntelligenceError::Validation(_))
        ));
        assert!(catalog.is_empty().await);

        let mut overconfident = config;
        overconfident.metadata.confidence = 1.5;
        catalog.store_configuration(overconfident, &cancel).await.unwrap();
        let stored = catalog.get_configuration(&epic_address()).await.unwrap().unwrap();
        assert_eq!(stored.confidence(), 1.0);

        let stats = catalog.get_statistics().await.unwrap();
        assert!(stats.average_confidence.is_finite());
        assert!((0.0..=1.0).contains(&stats.average_confidence));
    }

    #[tokio::test]
    async fn test_rejects_blank_address() {
        let catalog = catalog();
        let address = ConfigurationAddress::new("", "Epic", "ADT^A01");
        let result = catalog
            .analyze_messages(
                &corpus("EPIC", 1),
                &address,
                &InferenceOptions::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(IntelligenceError::Validation(_))));

        let mut config = catalog
            .orchestrator
            .infer(
                &corpus("EPIC", 1),
                &epic_address(),
                &InferenceOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        config.address.message_type.clear();
        assert!(
            catalog
                .store_configuration(config, &CancellationToken::new())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_prune() {
        let catalog = catalog();
        catalog
            .analyze_messages(
                &corpus("EPIC", 1),
                &epic_address(),
                &InferenceOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(catalog.prune_older_than(Duration::hours(1)).await, 0);
        assert_eq!(catalog.prune_older_than(Duration::seconds(-1)).await, 1);
        assert!(catalog.is_empty().await);
    }
}
