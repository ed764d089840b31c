//! Catalog export and import through a document store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ConfigurationCatalog, validate_entry};
use crate::cancel::CancellationToken;
use crate::error::IntelligenceResult;
use crate::models::{ChangeType, ConfigurationChange, VendorConfiguration};
use crate::storage::DocumentStore;

/// Serialized catalog contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    pub exported_at: DateTime<Utc>,
    pub configurations: Vec<VendorConfiguration>,
}

impl ConfigurationCatalog {
    /// Write every entry to `name` in `store`. Returns the number written.
    pub async fn export_snapshot(
        &self,
        store: &dyn DocumentStore,
        name: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<usize> {
        cancel.check()?;
        let snapshot = CatalogSnapshot {
            exported_at: Utc::now(),
            configurations: self.list_all().await?,
        };
        let content = serde_json::to_string_pretty(&snapshot)?;
        cancel.check()?;
        store.ensure_root().await?;
        store.write_document(name, &content).await?;
        info!(
            document = name,
            configurations = snapshot.configurations.len(),
            "Exported catalog snapshot"
        );
        Ok(snapshot.configurations.len())
    }

    /// Load entries from `name` in `store`, replacing entries at the same
    /// address. Each imported entry records an `Imported` change. Returns
    /// the number imported.
    pub async fn import_snapshot(
        &self,
        store: &dyn DocumentStore,
        name: &str,
        cancel: &CancellationToken,
    ) -> IntelligenceResult<usize> {
        cancel.check()?;
        let content = store.read_document(name).await?;
        let mut snapshot: CatalogSnapshot = serde_json::from_str(&content)?;
        for config in &mut snapshot.configurations {
            validate_entry(config)?;
        }
        cancel.check()?;

        let count = snapshot.configurations.len();
        let mut entries = self.entries.write().await;
        for mut config in snapshot.configurations {
            let change = ConfigurationChange::new(
                ChangeType::Imported,
                format!(
                    "Imported from snapshot '{name}' exported at {}",
                    snapshot.exported_at.to_rfc3339()
                ),
                0.0,
            );
            config.metadata.changes.append(change);
            entries.insert(config.address.clone(), config);
        }
        info!(document = name, configurations = count, "Imported catalog snapshot");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::InferenceOptions;
    use crate::error::IntelligenceError;
    use crate::models::{
        ConfigurationAddress, ConfigurationMetadata, FieldPatterns, VendorSignature,
    };
    use crate::plugins::default_registry;
    use crate::storage::MemoryDocumentStore;

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let cancel = CancellationToken::new();
        let source = ConfigurationCatalog::new(Arc::new(default_registry()));
        let address = ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01");
        let messages = vec![
            "MSH|^~\\&|EPIC|HOSP|RCV|FAC|20240101120000||ADT^A01|1|P|2.3\rEVN|A01\rPID|1||1||DOE\rPV1|1".to_string(),
        ];
        source
            .analyze_messages(&messages, &address, &InferenceOptions::default(), &cancel)
            .await
            .unwrap();

        let store = MemoryDocumentStore::new();
        assert_eq!(source.export_snapshot(&store, "catalog.json", &cancel).await.unwrap(), 1);

        let target = ConfigurationCatalog::new(Arc::new(default_registry()));
        assert_eq!(target.import_snapshot(&store, "catalog.json", &cancel).await.unwrap(), 1);

        let imported = target.get_configuration(&address).await.unwrap().unwrap();
        let original = source.get_configuration(&address).await.unwrap().unwrap();
        assert_eq!(imported.field_patterns, original.field_patterns);
        assert_eq!(
            imported.metadata.changes.last().unwrap().change_type,
            ChangeType::Imported
        );
        assert_eq!(imported.metadata.changes.len(), original.metadata.changes.len() + 1);
    }

    #[tokio::test]
    async fn test_import_clamps_confidence() {
        let cancel = CancellationToken::new();
        let address = ConfigurationAddress::new("HL7v23", "Epic", "ADT^A01");
        let mut config = VendorConfiguration {
            address: address.clone(),
            signature: VendorSignature::unknown(),
            field_patterns: FieldPatterns::new("HL7v23", "ADT^A01"),
            format_deviations: Vec::new(),
            metadata: ConfigurationMetadata::created(3, 0.5),
        };
        config.metadata.confidence = 1.5;
        let snapshot = CatalogSnapshot {
            exported_at: Utc::now(),
            configurations: vec![config],
        };
        let store = MemoryDocumentStore::new();
        store
            .write_document("catalog.json", &serde_json::to_string(&snapshot).unwrap())
            .await
            .unwrap();

        let catalog = ConfigurationCatalog::new(Arc::new(default_registry()));
        catalog.import_snapshot(&store, "catalog.json", &cancel).await.unwrap();
        let imported = catalog.get_configuration(&address).await.unwrap().unwrap();
        assert_eq!(imported.confidence(), 1.0);
    }

    #[tokio::test]
    async fn test_import_missing_document() {
        let catalog = ConfigurationCatalog::new(Arc::new(default_registry()));
        let store = MemoryDocumentStore::new();
        let result = catalog
            .import_snapshot(&store, "absent.json", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(IntelligenceError::Persistence(_))));
    }
}
